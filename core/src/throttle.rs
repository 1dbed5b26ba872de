//! Token-bucket request throttle.
//!
//! Every adapter owns one bucket per rate-limit domain the venue exposes
//! (usually one per weight class). `consume` suspends the caller until a
//! token is available instead of failing; a ticket taken at call entry
//! orders waiters, so two callers are always admitted in the order they
//! called `consume`, not the order their cost happens to fit the bucket.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::Notify;

struct Inner {
    capacity: f64,
    tokens: f64,
    refill_per_ms: f64,
    last_refill: Instant,
    /// Ticket handed to the next `consume` call, in call order.
    next_ticket: u64,
    /// Ticket currently allowed to debit tokens; everyone else waits.
    next_serving: u64,
}

impl Inner {
    fn refill(&mut self, now: Instant) {
        let elapsed_ms = now.duration_since(self.last_refill).as_secs_f64() * 1000.0;
        if elapsed_ms <= 0.0 {
            return;
        }
        self.tokens = (self.tokens + elapsed_ms * self.refill_per_ms).min(self.capacity);
        self.last_refill = now;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ThrottleStatus {
    pub capacity: f64,
    pub available: f64,
}

/// What a `consume` loop iteration found for its ticket.
enum Turn {
    /// Tokens debited; the caller is done.
    Admitted,
    /// Another ticket is still being served; wait to be woken, then recheck.
    NotYet,
    /// This ticket is at the front but tokens haven't refilled enough yet.
    AwaitingRefill(Duration),
}

/// A single token bucket. `capacity` tokens refill at `refill_per_period`
/// tokens every `period`; `try_consume`/`consume` take `cost` tokens (1.0 for
/// most requests, higher for heavier-weighted endpoints).
pub struct Throttle {
    inner: Mutex<Inner>,
    notify: Notify,
}

impl Throttle {
    pub fn new(capacity: u32, refill_per_period: u32, period: Duration) -> Arc<Self> {
        let refill_per_ms = refill_per_period as f64 / period.as_secs_f64().max(f64::EPSILON) / 1000.0;
        Arc::new(Self {
            inner: Mutex::new(Inner {
                capacity: capacity as f64,
                tokens: capacity as f64,
                refill_per_ms,
                last_refill: Instant::now(),
                next_ticket: 0,
                next_serving: 0,
            }),
            notify: Notify::new(),
        })
    }

    /// Takes `cost` tokens immediately if available, without waiting.
    pub fn try_consume(&self, cost: f64) -> bool {
        let mut inner = self.inner.lock();
        inner.refill(Instant::now());
        if inner.tokens >= cost {
            inner.tokens -= cost;
            true
        } else {
            false
        }
    }

    /// Takes `cost` tokens, suspending the caller (in strict FIFO arrival
    /// order — a ticket taken at call entry, served only once every earlier
    /// ticket has been) until enough have refilled.
    pub async fn consume(&self, cost: f64) {
        let ticket = {
            let mut inner = self.inner.lock();
            let ticket = inner.next_ticket;
            inner.next_ticket += 1;
            ticket
        };

        loop {
            let notified = self.notify.notified();

            let turn = {
                let mut inner = self.inner.lock();
                if inner.next_serving != ticket {
                    Turn::NotYet
                } else {
                    inner.refill(Instant::now());
                    if inner.tokens >= cost {
                        inner.tokens -= cost;
                        inner.next_serving += 1;
                        Turn::Admitted
                    } else {
                        let missing = cost - inner.tokens;
                        let ms = missing / inner.refill_per_ms;
                        Turn::AwaitingRefill(Duration::from_secs_f64((ms / 1000.0).max(0.0)))
                    }
                }
            };

            match turn {
                Turn::Admitted => {
                    self.notify.notify_waiters();
                    return;
                }
                Turn::NotYet => notified.await,
                Turn::AwaitingRefill(duration) => {
                    tokio::select! {
                        _ = tokio::time::sleep(duration) => {}
                        _ = notified => {}
                    }
                }
            }
        }
    }

    /// Reconciles local bookkeeping with a venue-reported rate-limit header
    /// (e.g. `X-MBX-USED-WEIGHT`), since the venue's counting is authoritative.
    pub fn update_from_header(&self, used: f64) {
        let mut inner = self.inner.lock();
        inner.refill(Instant::now());
        inner.tokens = (inner.capacity - used).max(0.0);
        self.notify.notify_waiters();
    }

    pub fn get_status(&self) -> ThrottleStatus {
        let mut inner = self.inner.lock();
        inner.refill(Instant::now());
        ThrottleStatus {
            capacity: inner.capacity,
            available: inner.tokens,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    /// Capacity 10, refill 10 tokens/1000ms — ten immediate consumes drain
    /// the bucket, the eleventh must wait roughly 100ms (the time for one
    /// token to refill) before proceeding.
    #[tokio::test]
    async fn eleventh_consume_waits_for_one_refilled_token() {
        let throttle = Throttle::new(10, 10, Duration::from_millis(1000));
        for _ in 0..10 {
            assert!(throttle.try_consume(1.0));
        }
        assert!(!throttle.try_consume(1.0));

        let started = Instant::now();
        throttle.consume(1.0).await;
        let elapsed = started.elapsed();

        assert!(elapsed >= Duration::from_millis(80));
        assert!(elapsed <= Duration::from_millis(220));
    }

    /// Capacity 1, drained up front, so both waiters queue on the same
    /// refill. The first call to `consume` must finish before the second
    /// even though they're racing the same timer.
    #[tokio::test]
    async fn concurrent_waiters_complete_in_arrival_order() {
        let throttle = Throttle::new(1, 1, Duration::from_millis(60));
        assert!(throttle.try_consume(1.0));

        let order: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));

        let first_throttle = throttle.clone();
        let first_order = order.clone();
        let first = tokio::spawn(async move {
            first_throttle.consume(1.0).await;
            first_order.lock().push(1);
        });

        // Give the first task a chance to actually enter `consume` (and take
        // its ticket) before the second one is spawned.
        tokio::time::sleep(Duration::from_millis(5)).await;

        let second_throttle = throttle.clone();
        let second_order = order.clone();
        let second = tokio::spawn(async move {
            second_throttle.consume(1.0).await;
            second_order.lock().push(2);
        });

        first.await.expect("first task");
        second.await.expect("second task");

        assert_eq!(*order.lock(), vec![1, 2]);
    }

    #[test]
    fn status_reports_full_bucket_initially() {
        let throttle = Throttle::new(5, 5, Duration::from_secs(1));
        let status = throttle.get_status();
        assert_eq!(status.capacity, 5.0);
        assert_eq!(status.available, 5.0);
    }

    #[test]
    fn update_from_header_reconciles_with_venue_reported_usage() {
        let throttle = Throttle::new(10, 10, Duration::from_secs(1));
        throttle.update_from_header(7.0);
        let status = throttle.get_status();
        assert_eq!(status.available, 3.0);
    }

    #[rstest]
    #[case(10, 4.0, true)]
    #[case(10, 10.0, true)]
    #[case(10, 10.1, false)]
    #[case(10, 0.0, true)]
    fn try_consume_succeeds_iff_cost_fits_in_capacity(
        #[case] capacity: u32,
        #[case] cost: f64,
        #[case] expected: bool,
    ) {
        let throttle = Throttle::new(capacity, capacity, Duration::from_secs(1));
        assert_eq!(throttle.try_consume(cost), expected);
    }
}
