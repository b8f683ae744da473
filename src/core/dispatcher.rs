//! # Dispatcher: broker slots per tube, tube discovery, graceful shutdown.
//!
//! The [`Dispatcher`] owns the event bus, the [`SubscriberSet`] and the configuration.
//! It starts `per_tube` [`BrokerActor`](super::actor::BrokerActor)s for every served
//! tube, optionally discovers new tubes by polling `list-tubes`, and stops everything
//! on a termination signal.
//!
//! ## Architecture
//! ```text
//! run(TubeSelection)
//!   ├─ Named(tubes) ─► SlotRegistry::run_tube(t) for each t
//!   └─ All ─────────► discovery connection ─► every discovery_interval:
//!                        list_tubes() ─► run_tube(unseen) ─► TubeDiscovered
//!                        (errors → DiscoveryFailed, retried next tick;
//!                         a pending call is abandoned on shutdown)
//!
//! Event flow:
//!   actors / runner ── publish ──► Bus ──► listener ──► SubscriberSet ──► LogWriter,
//!                                                                        AliveTracker,
//!                                                                        ResultForwarder, ...
//! Shutdown:
//!   signal ─► ShutdownRequested ─► runtime token cancelled
//!          ─► brokers finish their current job, then exit
//!          ─► all joined within grace → AllStoppedWithin, Ok
//!             grace exceeded          → GraceExceeded, Err(busy brokers from AliveTracker)
//! ```
//!
//! ## Example
//! ```no_run
//! use std::sync::Arc;
//! use stalkvisor::{
//!     BeanstalkConnector, BrokerConfig, Dispatcher, DispatcherConfig, LogWriter, TubeSelection,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let dispatcher = Dispatcher::builder(
//!         DispatcherConfig::default(),
//!         BrokerConfig::new("./handle-job.sh"),
//!         Arc::new(BeanstalkConnector::new("127.0.0.1:11300")),
//!     )
//!     .with_subscriber(Arc::new(LogWriter::new()))
//!     .build();
//!
//!     dispatcher.run(TubeSelection::Named(vec!["emails".into()])).await?;
//!     dispatcher.close().await;
//!     Ok(())
//! }
//! ```

use std::{future::Future, sync::Arc, time::Duration};

use tokio::{
    select,
    sync::broadcast::error::RecvError,
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use super::{
    builder::DispatcherBuilder,
    config::{BrokerConfig, DispatcherConfig},
    registry::SlotRegistry,
    shutdown,
};
use crate::{
    error::{QueueError, RuntimeError},
    events::{Bus, Event, EventKind},
    queue::{Connect, QueueRef},
    subscribers::{AliveTracker, Subscribe, SubscriberSet},
};

/// Which tubes to serve.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TubeSelection {
    /// Exactly these tubes.
    Named(Vec<String>),
    /// Every tube on the server, including ones created later.
    All,
}

/// Coordinates broker slots, event delivery and graceful shutdown.
pub struct Dispatcher {
    cfg: DispatcherConfig,
    broker_cfg: Arc<BrokerConfig>,
    connector: Arc<dyn Connect>,
    bus: Bus,
    subs: Arc<SubscriberSet>,
    alive: Arc<AliveTracker>,
    listener: JoinHandle<()>,
    listener_stop: CancellationToken,
}

impl Dispatcher {
    /// Starts building a dispatcher.
    pub fn builder(
        cfg: DispatcherConfig,
        broker_cfg: BrokerConfig,
        connector: Arc<dyn Connect>,
    ) -> DispatcherBuilder {
        DispatcherBuilder::new(cfg, broker_cfg, connector)
    }

    pub(crate) fn new_internal(
        cfg: DispatcherConfig,
        broker_cfg: BrokerConfig,
        connector: Arc<dyn Connect>,
        mut subscribers: Vec<Arc<dyn Subscribe>>,
    ) -> Self {
        let bus = Bus::new(cfg.bus_capacity_clamped());
        let alive = Arc::new(AliveTracker::new());
        subscribers.push(alive.clone());
        let subs = Arc::new(SubscriberSet::new(subscribers, bus.clone()));

        let listener_stop = CancellationToken::new();
        let listener = tokio::spawn(listen(bus.clone(), Arc::clone(&subs), listener_stop.clone()));

        Self {
            cfg,
            broker_cfg: Arc::new(broker_cfg),
            connector,
            bus,
            subs,
            alive,
            listener,
            listener_stop,
        }
    }

    /// The event bus; subscribe to it for a raw event stream.
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Serves `tubes` until SIGINT/SIGTERM/SIGQUIT, then shuts down gracefully.
    pub async fn run(&self, tubes: TubeSelection) -> Result<(), RuntimeError> {
        self.drive(tubes, shutdown::wait_for_signal()).await
    }

    /// Serves `tubes` until `stop` resolves, then shuts down gracefully.
    pub async fn run_until<F>(&self, tubes: TubeSelection, stop: F) -> Result<(), RuntimeError>
    where
        F: Future<Output = ()>,
    {
        self.drive(tubes, async {
            stop.await;
            Ok::<_, RuntimeError>("requested")
        })
        .await
    }

    /// Stops the event listener and waits for the subscribers to drain their queues.
    pub async fn close(self) {
        self.listener_stop.cancel();
        let _ = self.listener.await;
        if let Ok(subs) = Arc::try_unwrap(self.subs) {
            subs.shutdown().await;
        }
    }

    async fn drive<F>(&self, tubes: TubeSelection, stop: F) -> Result<(), RuntimeError>
    where
        F: Future<Output = Result<&'static str, RuntimeError>>,
    {
        let token = CancellationToken::new();
        let mut slots = SlotRegistry::new(
            Arc::clone(&self.connector),
            Arc::clone(&self.broker_cfg),
            self.cfg.restart,
            self.cfg.per_tube_clamped(),
            self.bus.clone(),
            token.clone(),
        );

        let mut discovery = match tubes {
            TubeSelection::Named(list) => {
                for tube in list {
                    slots.run_tube(&tube);
                }
                None
            }
            TubeSelection::All => {
                let queue = self
                    .connector
                    .connect()
                    .await
                    .map_err(RuntimeError::Discovery)?;
                Some(Discovery {
                    connector: Arc::clone(&self.connector),
                    queue: Some(queue),
                })
            }
        };

        tracing::debug!(tubes = ?slots.tubes(), discovery = discovery.is_some(), "dispatcher started");

        let period = self.cfg.discovery_interval.max(Duration::from_millis(1));
        let mut tick = time::interval(period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(stop);

        let requested = loop {
            select! {
                requested = &mut stop => break requested,
                _ = tick.tick(), if discovery.is_some() => {
                    if let Some(d) = discovery.as_mut() {
                        // A stalled list-tubes must not delay shutdown.
                        select! {
                            requested = &mut stop => break requested,
                            () = self.discover(d, &mut slots) => {}
                        }
                    }
                }
                Some(()) = slots.join_next(), if !slots.is_empty() => {}
            }
        };

        let reason = match &requested {
            Ok(signal) => *signal,
            Err(e) => e.as_label(),
        };
        self.bus
            .publish(Event::new(EventKind::ShutdownRequested).with_reason(reason));
        token.cancel();
        let stopped = self.wait_all_with_grace(&mut slots).await;
        requested.and(stopped)
    }

    async fn discover(&self, discovery: &mut Discovery, slots: &mut SlotRegistry) {
        match discovery.list().await {
            Ok(tubes) => {
                for tube in tubes {
                    if slots.run_tube(&tube) {
                        self.bus
                            .publish(Event::new(EventKind::TubeDiscovered).with_tube(tube));
                    }
                }
            }
            Err(e) => {
                self.bus
                    .publish(Event::new(EventKind::DiscoveryFailed).with_reason(e.to_string()));
            }
        }
    }

    /// Waits for all actors to finish within the configured grace period.
    async fn wait_all_with_grace(&self, slots: &mut SlotRegistry) -> Result<(), RuntimeError> {
        let grace = self.cfg.grace;
        match time::timeout(grace, slots.join_all()).await {
            Ok(()) => {
                self.bus.publish(Event::new(EventKind::AllStoppedWithin));
                Ok(())
            }
            Err(_) => {
                let stuck = self.alive.snapshot().await;
                self.bus.publish(
                    Event::new(EventKind::GraceExceeded).with_reason(stuck.join(", ")),
                );
                Err(RuntimeError::GraceExceeded { grace, stuck })
            }
        }
    }
}

/// Connection used for `list-tubes`; reopened after a failure.
struct Discovery {
    connector: Arc<dyn Connect>,
    queue: Option<QueueRef>,
}

impl Discovery {
    async fn list(&mut self) -> Result<Vec<String>, QueueError> {
        let queue = match &self.queue {
            Some(queue) => Arc::clone(queue),
            None => {
                let queue = self.connector.connect().await?;
                self.queue = Some(Arc::clone(&queue));
                queue
            }
        };
        let listed = queue.list_tubes().await;
        if listed.is_err() {
            self.queue = None;
        }
        listed
    }
}

/// Forwards bus events to the subscriber set until stopped; drains what is buffered.
async fn listen(bus: Bus, subs: Arc<SubscriberSet>, stop: CancellationToken) {
    let mut rx = bus.subscribe();
    loop {
        select! {
            msg = rx.recv() => match msg {
                Ok(ev) => subs.emit(ev),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event listener lagged");
                }
                Err(RecvError::Closed) => return,
            },
            _ = stop.cancelled() => {
                while let Ok(ev) = rx.try_recv() {
                    subs.emit(ev);
                }
                return;
            }
        }
    }
}
