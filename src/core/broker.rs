//! # Broker: one engine running forever against one tube.
//!
//! ```text
//! loop {
//!   ├─► cancelled?               → Ok(())
//!   ├─► ReservationLoop::reserve → JobReserved
//!   └─► JobRunner::run           (never interrupted once the job is reserved)
//! }
//! ```
//!
//! A broker returns only when cancelled (between jobs) or on its first fatal
//! [`BrokerError`]; restarting it is the [`BrokerActor`](super::actor::BrokerActor)'s job.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::{
    core::{config::BrokerConfig, reserve::ReservationLoop, runner::JobRunner},
    error::BrokerError,
    events::{Bus, Event, EventKind},
    queue::QueueRef,
};

/// Sequential reserve → execute → dispose loop over one connection.
pub struct Broker {
    name: Arc<str>,
    tube: Arc<str>,
    reservations: ReservationLoop,
    runner: JobRunner,
    bus: Bus,
    completed: u64,
}

impl Broker {
    /// Creates a broker named `name` serving `tube` over `queue`.
    pub fn new(
        name: impl Into<Arc<str>>,
        tube: impl Into<Arc<str>>,
        queue: QueueRef,
        cfg: Arc<BrokerConfig>,
        bus: Bus,
    ) -> Self {
        let name = name.into();
        let tube = tube.into();
        let reservations = ReservationLoop::new(
            queue,
            vec![tube.to_string()],
            cfg.reserve_timeout,
            cfg.deadline_soon_delay,
        );
        let runner = JobRunner::new(cfg, bus.clone(), Arc::clone(&tube), Arc::clone(&name));
        Self {
            name,
            tube,
            reservations,
            runner,
            bus,
            completed: 0,
        }
    }

    /// Broker name (`tube#n`).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of cycles this broker finished (executed or buried unexecuted).
    pub fn completed(&self) -> u64 {
        self.completed
    }

    /// Runs until `cancel` fires (`Ok`) or a fatal error occurs.
    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<(), BrokerError> {
        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }
            let Some(job) = self.reservations.reserve(cancel).await? else {
                return Ok(());
            };
            self.bus.publish(
                Event::new(EventKind::JobReserved)
                    .with_tube(Arc::clone(&self.tube))
                    .with_broker(Arc::clone(&self.name))
                    .with_job(job.id()),
            );
            self.runner.run(job).await?;
            self.completed += 1;
        }
    }
}
