//! Websocket subscription registry.
//!
//! One client per URL. Each subscribed topic gets its own bounded dispatch
//! queue, drained by a dedicated dispatcher task; a slow callback exerts
//! backpressure by filling its queue, and once full the oldest queued
//! message is dropped with a warning event rather than blocking the reader.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use mmb_domain::error::ExchangeError;
use mmb_utils::cancellation_token::CancellationToken;
use mmb_utils::infrastructure::{spawn_future, SpawnFutureFlags};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, Notify};
use url::Url;

use crate::config::ExchangeConfig;
use crate::connectivity::{self, ConnectionId, WebSocketParams, WsFrame};
use crate::events::{EventEmitter, ExchangeEvent};
use crate::venue::{DemuxOutcome, VenueAdapter};

const QUEUE_CAPACITY: usize = 1024;

pub type Callback = Arc<dyn Fn(Value) + Send + Sync>;

/// Bounded per-topic queue with drop-oldest backpressure.
struct DispatchQueue {
    items: Mutex<VecDeque<Value>>,
    notify: Notify,
    capacity: usize,
}

impl DispatchQueue {
    fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            notify: Notify::new(),
            capacity,
        }
    }

    /// Returns `true` if pushing this item dropped an older one.
    fn push(&self, value: Value) -> bool {
        let dropped = {
            let mut items = self.items.lock();
            let dropped = if items.len() >= self.capacity {
                items.pop_front();
                true
            } else {
                false
            };
            items.push_back(value);
            dropped
        };
        self.notify.notify_one();
        dropped
    }

    async fn pop(&self) -> Value {
        loop {
            if let Some(value) = self.items.lock().pop_front() {
                return value;
            }
            self.notify.notified().await;
        }
    }
}

struct TopicState {
    queue: Arc<DispatchQueue>,
    token: CancellationToken,
}

struct ClientState {
    handle: connectivity::WsHandle,
    topics: DashMap<String, Arc<TopicState>>,
    authenticated: AtomicBool,
    reader_token: CancellationToken,
}

/// Owned by one `Exchange` instance; tracks every open websocket client and
/// its live topic subscriptions.
#[derive(Default)]
pub struct SubscriptionRegistry {
    clients: DashMap<Url, Arc<ClientState>>,
}

impl SubscriptionRegistry {
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn is_authenticated(&self, url: &Url) -> bool {
        self.clients
            .get(url)
            .map(|client| client.authenticated.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    fn mark_authenticated(&self, url: &Url) {
        if let Some(client) = self.clients.get(url) {
            client.authenticated.store(true, Ordering::SeqCst);
        }
    }

    /// Opens (or reuses) the websocket client for `private`/public channels
    /// and registers `topic`'s dispatcher.
    pub async fn subscribe<A: VenueAdapter>(
        &self,
        adapter: Arc<A>,
        config: &ExchangeConfig,
        events: Arc<EventEmitter>,
        private: bool,
        topic: String,
        callback: Callback,
    ) -> Result<(), ExchangeError> {
        let url = adapter.ws_url(private, config)?;
        let client = self.ensure_client(adapter.clone(), config, events, private, &url).await?;

        if private && !client.authenticated.load(Ordering::SeqCst) {
            if let Some(frame) = adapter.auth_frame(config)? {
                client
                    .handle
                    .send(frame)
                    .await
                    .map_err(|e| ExchangeError::network(adapter.describe().id, e.to_string()))?;
            }
            self.mark_authenticated(&url);
        }

        let queue = Arc::new(DispatchQueue::new(QUEUE_CAPACITY));
        let topic_token = client.reader_token.create_linked_token();
        client.topics.insert(
            topic.clone(),
            Arc::new(TopicState { queue: queue.clone(), token: topic_token.clone() }),
        );

        spawn_future(
            "subscription dispatcher",
            SpawnFutureFlags::STOP_BY_TOKEN,
            dispatch_loop(queue, callback, topic_token.clone()),
            |_, _| {},
            topic_token,
        );

        let venue_id = adapter.describe().id;
        client
            .handle
            .send(adapter.subscribe_frame(&topic))
            .await
            .map_err(|e| ExchangeError::network(venue_id, e.to_string()))?;

        Ok(())
    }

    pub fn unsubscribe(&self, url: &Url, topic: &str) {
        if let Some(client) = self.clients.get(url) {
            if let Some((_, state)) = client.topics.remove(topic) {
                state.token.cancel();
            }
        }
    }

    async fn ensure_client<A: VenueAdapter>(
        &self,
        adapter: Arc<A>,
        config: &ExchangeConfig,
        events: Arc<EventEmitter>,
        private: bool,
        url: &Url,
    ) -> Result<Arc<ClientState>, ExchangeError> {
        if let Some(client) = self.clients.get(url) {
            return Ok(client.clone());
        }

        let venue_id = adapter.describe().id;
        let params = WebSocketParams::new(url.clone(), adapter.ping_interval(), adapter.ping_mode(private));
        let tag: &'static str = if private { "private" } else { "public" };
        let (handle, rx) = connectivity::open(ConnectionId(tag), params)
            .await
            .map_err(|e| ExchangeError::network(venue_id, e.to_string()))?;

        let client = Arc::new(ClientState {
            handle,
            topics: DashMap::new(),
            authenticated: AtomicBool::new(false),
            reader_token: CancellationToken::new(),
        });

        self.clients.insert(url.clone(), client.clone());

        let reader_token = client.reader_token.clone();
        spawn_future(
            "subscription demux reader",
            SpawnFutureFlags::STOP_BY_TOKEN,
            demux_loop(client.clone(), adapter, events, rx, reader_token.clone()),
            |_, _| {},
            reader_token,
        );

        Ok(client)
    }

    /// Tears down every open client and its dispatcher tasks.
    pub fn close_all(&self) {
        for entry in self.clients.iter() {
            for topic in entry.value().topics.iter() {
                topic.value().token.cancel();
            }
            entry.value().reader_token.cancel();
        }
        self.clients.clear();
    }
}

async fn dispatch_loop(
    queue: Arc<DispatchQueue>,
    callback: Callback,
    token: CancellationToken,
) -> anyhow::Result<()> {
    loop {
        tokio::select! {
            _ = token.when_cancelled() => break,
            value = queue.pop() => callback(value),
        }
    }
    Ok(())
}

/// Reads raw frames off one websocket, demultiplexes them via the adapter,
/// and routes each payload into its topic's dispatch queue, emitting a
/// warning event when a full queue drops the oldest entry.
async fn demux_loop<A: VenueAdapter>(
    client: Arc<ClientState>,
    adapter: Arc<A>,
    events: Arc<EventEmitter>,
    mut rx: mpsc::UnboundedReceiver<WsFrame>,
    token: CancellationToken,
) -> anyhow::Result<()> {
    loop {
        let frame = tokio::select! {
            _ = token.when_cancelled() => break,
            frame = rx.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        match adapter.demux(&frame) {
            DemuxOutcome::Topic(topic, payload) => {
                if let Some(state) = client.topics.get(&topic) {
                    if state.queue.push(payload) {
                        events.emit(ExchangeEvent::Error {
                            cause: ExchangeError::network(
                                adapter.describe().id,
                                format!("dispatch queue for topic '{topic}' is full; dropped oldest message"),
                            ),
                        });
                    }
                }
            }
            DemuxOutcome::Heartbeat | DemuxOutcome::Ignore => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dispatch_queue_drops_oldest_when_full() {
        let queue = DispatchQueue::new(2);
        assert!(!queue.push(Value::from(1)));
        assert!(!queue.push(Value::from(2)));
        assert!(queue.push(Value::from(3)));
        assert_eq!(queue.pop().await, Value::from(2));
        assert_eq!(queue.pop().await, Value::from(3));
    }

    #[tokio::test]
    async fn dispatch_queue_pop_waits_for_push() {
        let queue = Arc::new(DispatchQueue::new(4));
        let reader = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        queue.push(Value::from("hello"));
        let value = reader.await.expect("reader task");
        assert_eq!(value, Value::from("hello"));
    }
}
