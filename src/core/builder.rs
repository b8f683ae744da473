use std::sync::Arc;

use super::{
    config::{BrokerConfig, DispatcherConfig},
    dispatcher::Dispatcher,
};
use crate::{queue::Connect, subscribers::Subscribe};

/// Builder for a [`Dispatcher`].
pub struct DispatcherBuilder {
    cfg: DispatcherConfig,
    broker_cfg: BrokerConfig,
    connector: Arc<dyn Connect>,
    subscribers: Vec<Arc<dyn Subscribe>>,
}

impl DispatcherBuilder {
    pub(crate) fn new(
        cfg: DispatcherConfig,
        broker_cfg: BrokerConfig,
        connector: Arc<dyn Connect>,
    ) -> Self {
        Self {
            cfg,
            broker_cfg,
            connector,
            subscribers: Vec::new(),
        }
    }

    /// Sets the event subscribers (log writer, result forwarder, metrics, ...).
    ///
    /// Each gets a dedicated worker with a bounded queue.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Adds one subscriber.
    pub fn with_subscriber(mut self, subscriber: Arc<dyn Subscribe>) -> Self {
        self.subscribers.push(subscriber);
        self
    }

    /// Builds the dispatcher: creates the bus, spawns the subscriber workers and the
    /// event listener. Must be called inside a tokio runtime.
    pub fn build(self) -> Dispatcher {
        Dispatcher::new_internal(self.cfg, self.broker_cfg, self.connector, self.subscribers)
    }
}
