//! Runtime events: data model and broadcast bus.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: `BrokerActor` (start/death/restart), the job runner (one
//!   reservation from `JobReserved` to `JobCompleted`), `Dispatcher` (discovery,
//!   shutdown), `SubscriberSet` workers (overflow/panic).
//! - **Consumer**: the dispatcher's listener, which fans out to the `SubscriberSet`.

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
