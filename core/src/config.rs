//! Construction config.
//!
//! This crate does not read files or a secrets vault itself — process
//! configuration and credential storage are external collaborators — but it does define the shape an embedding process deserializes
//! into before constructing an `Exchange`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_true() -> bool {
    true
}

/// Recognized construction options. `options` is an opaque bag
/// for adapter-specific toggles the base never inspects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    pub api_key: Option<String>,
    pub secret: Option<String>,
    pub passphrase: Option<String>,
    pub memo: Option<String>,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_true")]
    pub enable_rate_limit: bool,

    #[serde(default)]
    pub verbose: bool,

    #[serde(default)]
    pub options: Value,

    /// Routes to testnet/sandbox URLs where the venue's `describe()` defines them.
    #[serde(default)]
    pub sandbox: bool,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            secret: None,
            passphrase: None,
            memo: None,
            timeout_ms: default_timeout_ms(),
            enable_rate_limit: true,
            verbose: false,
            options: Value::Null,
            sandbox: false,
        }
    }
}

impl ExchangeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn has_credentials(&self) -> bool {
        self.api_key.is_some() && self.secret.is_some()
    }
}
