use super::websocket_connection::WebSocketConnection;
use super::{ConnectionId, Result, WebSocketParams, WsFrame};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Handle to a single open websocket connection. Cloning the handle is
/// cheap; dropping every clone does not close the socket — callers close
/// explicitly via `Exchange::close_all_ws`.
#[derive(Clone)]
pub struct WsHandle {
    connection: Arc<WebSocketConnection>,
}

impl WsHandle {
    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub async fn send(&self, text: String) -> std::result::Result<(), super::ConnectivityError> {
        self.connection.send_text(text).await
    }
}

pub async fn open(
    id: ConnectionId,
    params: WebSocketParams,
) -> Result<(WsHandle, mpsc::UnboundedReceiver<WsFrame>)> {
    let (connection, rx) = WebSocketConnection::open(id, params).await?;
    Ok((WsHandle { connection }, rx))
}
