use super::{ConnectionId, ConnectivityError, PingMode, Result, WebSocketParams, WsFrame};
use futures::{SinkExt, StreamExt};
use mmb_utils::infrastructure::SpawnFutureFlags;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio::net::TcpStream;

type Writer = futures::stream::SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type Reader = futures::stream::SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// One websocket connection to one URL. The client does not restore
/// subscriptions after a reconnect; a caller that needs them back reissues
/// its subscribe frames once it observes the connection reopen.
pub struct WebSocketConnection {
    id: ConnectionId,
    writer: tokio::sync::Mutex<Writer>,
    last_pong: Mutex<Instant>,
    is_connected: Mutex<bool>,
}

impl WebSocketConnection {
    pub async fn open(
        id: ConnectionId,
        params: WebSocketParams,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<WsFrame>)> {
        let (stream, _response) = connect_async(params.url.clone())
            .await
            .map_err(|e| ConnectivityError::FailedToConnect(params.url.clone(), e))?;

        log::trace!("websocket {id} connected to {}", params.url);

        let (writer, reader) = stream.split();
        let connection = Arc::new(Self {
            id,
            writer: tokio::sync::Mutex::new(writer),
            last_pong: Mutex::new(Instant::now()),
            is_connected: Mutex::new(true),
        });

        let (tx, rx) = mpsc::unbounded_channel();

        mmb_utils::infrastructure::spawn_future(
            "websocket reader",
            SpawnFutureFlags::STOP_BY_TOKEN,
            Self::read_loop(connection.clone(), reader, tx),
            |_, _| {},
            Default::default(),
        );

        mmb_utils::infrastructure::spawn_future(
            "websocket keepalive",
            SpawnFutureFlags::STOP_BY_TOKEN,
            Self::keepalive_loop(connection.clone(), params.ping_interval, params.ping_mode),
            |_, _| {},
            Default::default(),
        );

        Ok((connection, rx))
    }

    pub fn is_connected(&self) -> bool {
        *self.is_connected.lock()
    }

    pub async fn send_text(&self, text: String) -> std::result::Result<(), ConnectivityError> {
        self.send(Message::Text(text)).await
    }

    async fn send(&self, msg: Message) -> std::result::Result<(), ConnectivityError> {
        let mut writer = self.writer.lock().await;
        writer
            .send(msg)
            .await
            .map_err(|_| ConnectivityError::NotConnected)
    }

    async fn read_loop(
        self_: Arc<Self>,
        mut reader: Reader,
        tx: mpsc::UnboundedSender<WsFrame>,
    ) -> anyhow::Result<()> {
        while let Some(message) = reader.next().await {
            match message {
                Ok(Message::Text(text)) => {
                    if tx.send(WsFrame::Text(text)).is_err() {
                        break;
                    }
                }
                Ok(Message::Binary(bytes)) => {
                    if tx.send(WsFrame::Binary(bytes)).is_err() {
                        break;
                    }
                }
                Ok(Message::Pong(_)) => {
                    *self_.last_pong.lock() = Instant::now();
                }
                Ok(Message::Ping(payload)) => {
                    let _ = self_.send(Message::Pong(payload)).await;
                }
                Ok(Message::Close(_)) => break,
                Ok(Message::Frame(_)) => {}
                Err(err) => {
                    log::warn!("websocket {} read error: {err}", self_.id);
                    break;
                }
            }
        }

        *self_.is_connected.lock() = false;
        Ok(())
    }

    async fn keepalive_loop(
        self_: Arc<Self>,
        interval: std::time::Duration,
        mode: PingMode,
    ) -> anyhow::Result<()> {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if !self_.is_connected() {
                break;
            }

            let result = match &mode {
                PingMode::Protocol => self_.send(Message::Ping(Vec::new())).await,
                PingMode::Application(payload) => self_.send_text(payload.clone()).await,
            };

            if result.is_err() {
                log::warn!("websocket {} keepalive send failed, closing", self_.id);
                *self_.is_connected.lock() = false;
                break;
            }
        }
        Ok(())
    }
}
