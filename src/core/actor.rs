//! # BrokerActor: keeps one broker slot alive.
//!
//! A slot is one `(tube, index)` pair. The actor connects, runs a [`Broker`] until it
//! fails, and reconnects after a [`RestartBackoff`] delay.
//!
//! ```text
//! loop {
//!   ├─► connect()            ──err──┐
//!   ├─► publish BrokerStarted       │
//!   ├─► Broker::run()        ──err──┤
//!   │     └─ Ok (cancelled) → exit  ▼
//!   │                       publish BrokerDead
//!   │                       delay = restart.next(attempt)
//!   │                       publish RestartScheduled
//!   └─◄──────────────────── sleep(delay)   (cancellable)
//! }
//! ```
//!
//! ## Rules
//! - Cancellation is observed at safe points only: while connecting, while blocked in
//!   reserve, and during the restart sleep. A running job is never interrupted.
//! - The restart attempt counter resets once a broker finishes at least one cycle.

use std::sync::Arc;

use tokio::{select, time};
use tokio_util::sync::CancellationToken;

use crate::{
    core::{broker::Broker, config::BrokerConfig},
    error::BrokerError,
    events::{Bus, Event, EventKind},
    policies::RestartBackoff,
    queue::Connect,
};

/// Supervises one broker slot.
pub struct BrokerActor {
    name: Arc<str>,
    tube: Arc<str>,
    connector: Arc<dyn Connect>,
    cfg: Arc<BrokerConfig>,
    restart: RestartBackoff,
    bus: Bus,
}

impl BrokerActor {
    /// Creates the actor for slot `index` of `tube`.
    pub fn new(
        tube: &str,
        index: usize,
        connector: Arc<dyn Connect>,
        cfg: Arc<BrokerConfig>,
        restart: RestartBackoff,
        bus: Bus,
    ) -> Self {
        Self {
            name: slot_name(tube, index).into(),
            tube: tube.into(),
            connector,
            cfg,
            restart,
            bus,
        }
    }

    /// Slot name (`tube#index`).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runs until `token` is cancelled.
    pub async fn run(self, token: CancellationToken) {
        let mut attempt: u32 = 0;

        loop {
            if token.is_cancelled() {
                return;
            }

            let connected = select! {
                _ = token.cancelled() => return,
                res = self.connector.connect() => res,
            };
            let outcome = match connected {
                Ok(queue) => {
                    self.bus.publish(self.event(EventKind::BrokerStarted).with_attempt(attempt));
                    let mut broker = Broker::new(
                        Arc::clone(&self.name),
                        Arc::clone(&self.tube),
                        queue,
                        Arc::clone(&self.cfg),
                        self.bus.clone(),
                    );
                    let res = broker.run(&token).await;
                    if broker.completed() > 0 {
                        attempt = 0;
                    }
                    res
                }
                Err(e) => Err(BrokerError::Connect(e)),
            };

            let err = match outcome {
                Ok(()) => return,
                Err(err) => err,
            };

            let mut dead = self
                .event(EventKind::BrokerDead)
                .with_reason(err.to_string());
            if let Some(job) = err.job() {
                dead = dead.with_job(job);
            }
            self.bus.publish(dead);

            let delay = self.restart.next(attempt);
            self.bus.publish(
                self.event(EventKind::RestartScheduled)
                    .with_delay(delay)
                    .with_attempt(attempt),
            );
            attempt = attempt.saturating_add(1);

            select! {
                _ = time::sleep(delay) => {}
                _ = token.cancelled() => return,
            }
        }
    }

    fn event(&self, kind: EventKind) -> Event {
        Event::new(kind)
            .with_tube(Arc::clone(&self.tube))
            .with_broker(Arc::clone(&self.name))
    }
}

/// `tube#index`.
pub fn slot_name(tube: &str, index: usize) -> String {
    format!("{tube}#{index}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QueueError;
    use crate::policies::JitterPolicy;
    use crate::queue::{JobState, MemoryQueue, QueueRef};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Refuses the first `failures` connections, then hands out the memory queue.
    struct Flaky {
        queue: MemoryQueue,
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Connect for Flaky {
        async fn connect(&self) -> Result<QueueRef, QueueError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                return Err(QueueError::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "refused",
                )));
            }
            self.queue.connect().await
        }

        fn target(&self) -> String {
            "flaky".into()
        }
    }

    fn backoff() -> RestartBackoff {
        RestartBackoff {
            first: Duration::from_millis(10),
            max: Duration::from_millis(40),
            factor: 2.0,
            jitter: JitterPolicy::None,
        }
    }

    fn cfg() -> Arc<BrokerConfig> {
        Arc::new(BrokerConfig {
            reserve_timeout: Duration::from_millis(50),
            ..BrokerConfig::new("cat")
        })
    }

    #[test]
    fn slot_names() {
        assert_eq!(slot_name("emails", 2), "emails#2");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn reconnects_with_growing_delays_then_serves() {
        let q = MemoryQueue::new();
        let id = q.put("t", 0, Duration::from_secs(60), "x");
        let connector = Arc::new(Flaky {
            queue: q.clone(),
            failures: 3,
            calls: AtomicU32::new(0),
        });
        let bus = Bus::new(256);
        let mut rx = bus.subscribe();
        let token = CancellationToken::new();

        let actor = BrokerActor::new("t", 0, connector.clone(), cfg(), backoff(), bus);
        assert_eq!(actor.name(), "t#0");
        let handle = tokio::spawn(actor.run(token.clone()));

        while q.state(id) != Some(JobState::Deleted) {
            time::sleep(Duration::from_millis(10)).await;
        }
        token.cancel();
        handle.await.unwrap();
        assert_eq!(connector.calls.load(Ordering::SeqCst), 4);

        let mut delays = Vec::new();
        let mut deaths = 0;
        while let Ok(ev) = rx.try_recv() {
            match ev.kind {
                EventKind::BrokerDead => {
                    deaths += 1;
                    assert!(ev.reason.as_deref().unwrap().starts_with("connect failed"));
                }
                EventKind::RestartScheduled => delays.push(ev.delay.unwrap()),
                _ => {}
            }
        }
        assert_eq!(deaths, 3);
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(10),
                Duration::from_millis(20),
                Duration::from_millis(40)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_during_backoff_exits() {
        let connector = Arc::new(Flaky {
            queue: MemoryQueue::new(),
            failures: u32::MAX,
            calls: AtomicU32::new(0),
        });
        let slow = RestartBackoff {
            first: Duration::from_secs(3600),
            max: Duration::from_secs(3600),
            ..backoff()
        };
        let token = CancellationToken::new();
        let actor = BrokerActor::new("t", 1, connector.clone(), cfg(), slow, Bus::new(16));
        let handle = tokio::spawn(actor.run(token.clone()));

        time::sleep(Duration::from_secs(1)).await;
        token.cancel();
        handle.await.unwrap();
        assert_eq!(connector.calls.load(Ordering::SeqCst), 1);
    }
}
