//! Runtime core: brokers, their supervision, and the dispatcher.
//!
//! - [`runner`]: one reserve-to-dispose cycle with deadline enforcement;
//! - [`reserve`]: reservation loop riding out transient server answers;
//! - [`broker`]: sequential cycles over one connection;
//! - [`actor`]: keeps one broker slot alive across failures;
//! - [`registry`]: which tubes have brokers;
//! - [`dispatcher`]: tube selection, discovery and graceful shutdown;
//! - [`shutdown`]: termination signal handling.

mod actor;
mod broker;
mod builder;
mod config;
mod dispatcher;
mod registry;
mod reserve;
mod runner;
mod shutdown;

pub use actor::{BrokerActor, slot_name};
pub use broker::Broker;
pub use builder::DispatcherBuilder;
pub use config::{BrokerConfig, DispatcherConfig};
pub use dispatcher::{Dispatcher, TubeSelection};
pub use reserve::ReservationLoop;
pub use runner::{Cycle, ExecutionResult, JobRunner};
