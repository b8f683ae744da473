//! # Event subscribers.
//!
//! [`Subscribe`] is the consumer side of the [`Bus`](crate::Bus); the dispatcher drives
//! every subscriber through a [`SubscriberSet`].
//!
//! ## Built-in subscribers
//! - [`LogWriter`] renders events as `tracing` records (`logging` feature)
//! - [`ResultForwarder`] sends each [`JobResult`](crate::JobResult) to a channel
//! - [`AliveTracker`] knows which brokers are mid-job (used for shutdown reports)

mod alive;
#[cfg(feature = "logging")]
mod log;
mod results;
mod set;
mod subscribe;

pub use alive::AliveTracker;
#[cfg(feature = "logging")]
pub use log::LogWriter;
pub use results::ResultForwarder;
pub use set::SubscriberSet;
pub use subscribe::Subscribe;
