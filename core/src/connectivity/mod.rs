use std::fmt::{Display, Formatter};
use std::time::Duration;
use thiserror::Error;
use url::Url;

mod websocket;
mod websocket_connection;

#[derive(Error, Debug)]
pub enum ConnectivityError {
    #[error("failed to connect websocket `{0}`: `{1}`")]
    FailedToConnect(Url, tokio_tungstenite::tungstenite::Error),
    #[error("not connected")]
    NotConnected,
}

pub type Result<T> = std::result::Result<T, ConnectivityError>;

/// Keep-alive flavor a venue's websocket expects: either a protocol-level
/// ping frame the server answers with a pong automatically handled by the
/// socket, or an application-level JSON message the venue expects on the
/// data channel itself.
#[derive(Debug, Clone)]
pub enum PingMode {
    Protocol,
    Application(String),
}

#[derive(Debug, Clone)]
pub struct WebSocketParams {
    pub url: Url,
    pub ping_interval: Duration,
    pub ping_mode: PingMode,
}

impl WebSocketParams {
    pub fn new(url: Url, ping_interval: Duration, ping_mode: PingMode) -> Self {
        Self {
            url,
            ping_interval,
            ping_mode,
        }
    }
}

/// A raw frame as it came off the wire. Adapters decode these according to
/// their own framing (plain JSON text, zlib-compressed binary, channel-id
/// multiplexed arrays) — the connection layer is agnostic to payload shape.
#[derive(Debug, Clone)]
pub enum WsFrame {
    Text(String),
    Binary(Vec<u8>),
}

/// Tag used only for logging when a caller keeps more than one connection
/// open to the same venue (e.g. public vs. private streams).
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ConnectionId(pub &'static str);

impl Display for ConnectionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.0)
    }
}

pub use websocket::{open, WsHandle};
