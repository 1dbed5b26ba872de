//! Event stream: `rateLimitWarning` and `error`, with no ordering
//! guarantee against operation completions. Backed by a broadcast channel.

use chrono::{DateTime, Utc};
use mmb_domain::error::ExchangeError;
use tokio::sync::broadcast;

#[derive(Debug, Clone)]
pub enum ExchangeEvent {
    RateLimitWarning {
        used: f64,
        limit: f64,
        remaining: f64,
        reset_timestamp: Option<DateTime<Utc>>,
    },
    Error {
        cause: ExchangeError,
    },
}

const CHANNEL_CAPACITY: usize = 256;

/// Owned by each `Exchange` instance — no process-wide singleton.
pub struct EventEmitter {
    sender: broadcast::Sender<ExchangeEvent>,
}

impl Default for EventEmitter {
    fn default() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }
}

impl EventEmitter {
    pub fn subscribe(&self) -> broadcast::Receiver<ExchangeEvent> {
        self.sender.subscribe()
    }

    /// Dropped silently if nobody is listening — emitting is best-effort,
    /// never a reason to fail the operation that triggered it.
    pub fn emit(&self, event: ExchangeEvent) {
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_without_subscribers_does_not_panic() {
        let emitter = EventEmitter::default();
        emitter.emit(ExchangeEvent::Error {
            cause: ExchangeError::network("binance", "boom"),
        });
    }

    #[tokio::test]
    async fn subscriber_receives_emitted_event() {
        let emitter = EventEmitter::default();
        let mut rx = emitter.subscribe();
        emitter.emit(ExchangeEvent::RateLimitWarning {
            used: 900.0,
            limit: 1200.0,
            remaining: 300.0,
            reset_timestamp: None,
        });
        let event = rx.recv().await.expect("event");
        assert!(matches!(event, ExchangeEvent::RateLimitWarning { .. }));
    }
}
