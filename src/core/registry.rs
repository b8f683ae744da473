//! # Slot registry: which tubes have brokers, and their tasks.
//!
//! ```text
//! run_tube("emails")   (per_tube = 2)
//!     ├─► BrokerActor "emails#0" ──► JoinSet   (child token of the runtime token)
//!     └─► BrokerActor "emails#1" ──► JoinSet
//! run_tube("emails")   → false, already served
//! ```
//!
//! ## Rules
//! - A tube is started at most once; rediscovering it is a no-op.
//! - Actors end only when the runtime token is cancelled.
//! - An actor that panics is reported as `BrokerDead` and replaced by a fresh one after
//!   the restart backoff, so the slot keeps serving its tube.

use std::{collections::BTreeSet, panic::AssertUnwindSafe, sync::Arc};

use futures::FutureExt;
use tokio::{select, task::JoinSet, time};
use tokio_util::sync::CancellationToken;

use crate::{
    core::{actor::BrokerActor, config::BrokerConfig},
    events::{Bus, Event, EventKind},
    policies::RestartBackoff,
    queue::Connect,
};

/// Broker slots started by the dispatcher.
pub(crate) struct SlotRegistry {
    tubes: BTreeSet<String>,
    set: JoinSet<()>,
    connector: Arc<dyn Connect>,
    cfg: Arc<BrokerConfig>,
    restart: RestartBackoff,
    per_tube: usize,
    bus: Bus,
    token: CancellationToken,
}

impl SlotRegistry {
    pub(crate) fn new(
        connector: Arc<dyn Connect>,
        cfg: Arc<BrokerConfig>,
        restart: RestartBackoff,
        per_tube: usize,
        bus: Bus,
        token: CancellationToken,
    ) -> Self {
        Self {
            tubes: BTreeSet::new(),
            set: JoinSet::new(),
            connector,
            cfg,
            restart,
            per_tube: per_tube.max(1),
            bus,
            token,
        }
    }

    /// Starts `per_tube` brokers for `tube`; returns `false` if it was already served.
    pub(crate) fn run_tube(&mut self, tube: &str) -> bool {
        if !self.tubes.insert(tube.to_string()) {
            return false;
        }
        for index in 0..self.per_tube {
            let slot = Slot {
                tube: tube.to_string(),
                index,
                connector: Arc::clone(&self.connector),
                cfg: Arc::clone(&self.cfg),
                restart: self.restart,
                bus: self.bus.clone(),
            };
            self.set.spawn(slot.run(self.token.child_token()));
        }
        true
    }

    /// Served tubes, sorted.
    pub(crate) fn tubes(&self) -> Vec<String> {
        self.tubes.iter().cloned().collect()
    }

    /// True when no actor task is left.
    pub(crate) fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    /// Waits for the next actor to end; `None` when there is none.
    pub(crate) async fn join_next(&mut self) -> Option<()> {
        self.set.join_next().await.map(|_| ())
    }

    /// Waits for every actor to end.
    pub(crate) async fn join_all(&mut self) {
        while self.join_next().await.is_some() {}
    }
}

/// One `(tube, index)` slot; rebuilds its actor after a panic.
struct Slot {
    tube: String,
    index: usize,
    connector: Arc<dyn Connect>,
    cfg: Arc<BrokerConfig>,
    restart: RestartBackoff,
    bus: Bus,
}

impl Slot {
    async fn run(self, token: CancellationToken) {
        let mut attempt: u32 = 0;
        loop {
            let actor = BrokerActor::new(
                &self.tube,
                self.index,
                Arc::clone(&self.connector),
                Arc::clone(&self.cfg),
                self.restart,
                self.bus.clone(),
            );
            let name = actor.name().to_string();
            if AssertUnwindSafe(actor.run(token.clone()))
                .catch_unwind()
                .await
                .is_ok()
            {
                return;
            }

            self.bus.publish(
                Event::new(EventKind::BrokerDead)
                    .with_tube(self.tube.as_str())
                    .with_broker(name.as_str())
                    .with_reason("broker task panicked"),
            );
            let delay = self.restart.next(attempt);
            attempt = attempt.saturating_add(1);
            select! {
                _ = time::sleep(delay) => {}
                _ = token.cancelled() => return,
            }
        }
    }
}
