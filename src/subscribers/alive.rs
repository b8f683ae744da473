//! # Busy-broker tracker with sequence-based ordering.
//!
//! Tracks which brokers are in the middle of a job, so a shutdown that runs out of
//! grace can name them.
//!
//! ## Rules
//! - `JobReserved` marks the broker busy.
//! - `JobCompleted`, `JobBuriedUnexecuted`, `BrokerDead` and `BrokerStarted` mark it idle.
//! - Events with `seq <= last_seq` for the same broker are rejected (stale).
//! - Events without a `broker` are ignored.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

#[derive(Debug, Clone)]
struct BrokerState {
    last_seq: u64,
    busy: bool,
    job: Option<u64>,
}

/// Thread-safe view of which brokers hold a reservation.
#[derive(Default)]
pub struct AliveTracker {
    state: RwLock<HashMap<String, BrokerState>>,
}

impl AliveTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies an event; returns `true` if the busy state changed.
    pub async fn update(&self, ev: &Event) -> bool {
        let Some(name) = ev.broker.as_deref() else {
            return false;
        };

        let mut state = self.state.write().await;
        let entry = state.entry(name.to_string()).or_insert(BrokerState {
            last_seq: 0,
            busy: false,
            job: None,
        });
        if entry.last_seq != 0 && ev.seq <= entry.last_seq {
            return false;
        }
        entry.last_seq = ev.seq;

        let busy = match ev.kind {
            EventKind::JobReserved => true,
            EventKind::BrokerStarted => false,
            kind if kind.ends_cycle() => false,
            _ => return false,
        };
        let changed = entry.busy != busy;
        entry.busy = busy;
        entry.job = if busy { ev.job } else { None };
        changed
    }

    /// Sorted names of busy brokers, each with its job: `tube#0 (job 17)`.
    pub async fn snapshot(&self) -> Vec<String> {
        let state = self.state.read().await;
        let mut busy: Vec<String> = state
            .iter()
            .filter(|(_, s)| s.busy)
            .map(|(name, s)| match s.job {
                Some(job) => format!("{name} (job {job})"),
                None => name.clone(),
            })
            .collect();
        busy.sort_unstable();
        busy
    }

    /// True if the broker currently holds a reservation.
    pub async fn is_busy(&self, broker: &str) -> bool {
        self.state
            .read()
            .await
            .get(broker)
            .is_some_and(|s| s.busy)
    }
}

#[async_trait]
impl Subscribe for AliveTracker {
    async fn on_event(&self, event: &Event) {
        self.update(event).await;
    }

    fn name(&self) -> &'static str {
        "alive_tracker"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(kind: EventKind, broker: &str) -> Event {
        Event::new(kind).with_broker(broker).with_job(7)
    }

    #[tokio::test]
    async fn reservation_marks_busy_until_cycle_ends() {
        let t = AliveTracker::new();
        assert!(t.update(&ev(EventKind::JobReserved, "a#0")).await);
        assert!(!t.update(&ev(EventKind::CommandStarted, "a#0")).await);
        assert!(t.is_busy("a#0").await);
        assert_eq!(t.snapshot().await, vec!["a#0 (job 7)".to_string()]);

        assert!(t.update(&ev(EventKind::JobCompleted, "a#0")).await);
        assert!(!t.is_busy("a#0").await);
        assert!(t.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn stale_events_are_rejected() {
        let t = AliveTracker::new();
        let reserved = ev(EventKind::JobReserved, "a#0");
        let dead = ev(EventKind::BrokerDead, "a#0");

        assert!(!t.update(&dead).await);
        assert!(!t.update(&reserved).await);
        assert!(!t.is_busy("a#0").await);
    }

    #[tokio::test]
    async fn events_without_broker_are_ignored() {
        let t = AliveTracker::new();
        assert!(!t.update(&Event::new(EventKind::JobReserved)).await);
        assert!(t.snapshot().await.is_empty());
    }
}
