//! Closed error taxonomy.
//!
//! Every fault raised anywhere in the stack — signing, throttling, HTTP
//! dispatch, envelope unwrapping, parsing — ends up as one of these kinds.
//! Classification is a pure function of `(status, body)`: the same input
//! must always produce the same kind, so adapters implement
//! `classify(status, body) -> ExchangeErrorKind` rather than raising ad hoc.

use std::fmt;
use thiserror::Error;

/// The closed set of failure kinds a venue adapter can raise.
///
/// `Fault` is the base "exchange fault" kind, for
/// callers who only care that *something* went wrong on the venue side and
/// don't need a narrower match; every other kind still carries the same
/// fields, so matching on `ExchangeError::kind` stays exhaustive without
/// forcing every caller to enumerate all ten variants.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum ExchangeErrorKind {
    Authentication,
    RateLimitExceeded,
    InsufficientFunds,
    InvalidOrder,
    OrderNotFound,
    BadSymbol,
    BadRequest,
    ExchangeNotAvailable,
    Network,
    RequestTimeout,
    /// Unclassified or venue-specific fault that doesn't map to a narrower kind.
    Fault,
}

impl fmt::Display for ExchangeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExchangeErrorKind::Authentication => "Authentication",
            ExchangeErrorKind::RateLimitExceeded => "RateLimitExceeded",
            ExchangeErrorKind::InsufficientFunds => "InsufficientFunds",
            ExchangeErrorKind::InvalidOrder => "InvalidOrder",
            ExchangeErrorKind::OrderNotFound => "OrderNotFound",
            ExchangeErrorKind::BadSymbol => "BadSymbol",
            ExchangeErrorKind::BadRequest => "BadRequest",
            ExchangeErrorKind::ExchangeNotAvailable => "ExchangeNotAvailable",
            ExchangeErrorKind::Network => "Network",
            ExchangeErrorKind::RequestTimeout => "RequestTimeout",
            ExchangeErrorKind::Fault => "ExchangeError",
        };
        f.write_str(s)
    }
}

/// A classified fault. Every fault is prefixed with the venue id, carries
/// the raw venue error code if the venue gave one, and preserves the
/// venue's message verbatim.
#[derive(Debug, Clone, Error, Eq, PartialEq)]
pub struct ExchangeError {
    pub kind: ExchangeErrorKind,
    pub venue_id: String,
    pub venue_code: Option<i64>,
    pub venue_message: String,
    /// Present only for RateLimitExceeded when the venue supplied a hint.
    pub retry_after_ms: Option<u64>,
}

impl ExchangeError {
    pub fn new(
        kind: ExchangeErrorKind,
        venue_id: impl Into<String>,
        venue_code: Option<i64>,
        venue_message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            venue_id: venue_id.into(),
            venue_code,
            venue_message: venue_message.into(),
            retry_after_ms: None,
        }
    }

    pub fn with_retry_after(mut self, ms: u64) -> Self {
        self.retry_after_ms = Some(ms);
        self
    }

    pub fn authentication(venue_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ExchangeErrorKind::Authentication, venue_id, None, message)
    }

    pub fn bad_request(venue_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ExchangeErrorKind::BadRequest, venue_id, None, message)
    }

    pub fn invalid_order(venue_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ExchangeErrorKind::InvalidOrder, venue_id, None, message)
    }

    pub fn bad_symbol(venue_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ExchangeErrorKind::BadSymbol, venue_id, None, message)
    }

    pub fn network(venue_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ExchangeErrorKind::Network, venue_id, None, message)
    }

    pub fn timeout(venue_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ExchangeErrorKind::RequestTimeout, venue_id, None, message)
    }

    pub fn not_implemented(venue_id: impl Into<String>, operation: &str) -> Self {
        Self::new(
            ExchangeErrorKind::BadRequest,
            venue_id,
            None,
            format!("{operation} is not implemented"),
        )
    }
}

impl fmt::Display for ExchangeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.venue_id, self.kind)?;
        if let Some(code) = self.venue_code {
            write!(f, " ({code})")?;
        }
        write!(f, ": {}", self.venue_message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_carries_venue_id_and_raw_code() {
        let err = ExchangeError::new(
            ExchangeErrorKind::InsufficientFunds,
            "binance",
            Some(-2010),
            "Account has insufficient balance",
        );
        let rendered = err.to_string();
        assert!(rendered.contains("binance"));
        assert!(rendered.contains("-2010"));
        assert!(rendered.contains("Account has insufficient balance"));
    }
}
