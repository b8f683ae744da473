//! # Subscriber trait.
//!
//! `Subscribe` is the extension point for consuming runtime events: log writers,
//! result collectors, metrics. Each subscriber is driven by its own worker task fed by
//! a bounded queue owned by the [`SubscriberSet`](crate::SubscriberSet), so a slow
//! subscriber never holds up a broker.
//!
//! ## Example
//! ```rust
//! use async_trait::async_trait;
//! use stalkvisor::{Event, EventKind, Subscribe};
//!
//! struct CountReleases(std::sync::atomic::AtomicU64);
//!
//! #[async_trait]
//! impl Subscribe for CountReleases {
//!     async fn on_event(&self, ev: &Event) {
//!         if ev.kind == EventKind::JobReleased {
//!             self.0.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
//!         }
//!     }
//!     fn name(&self) -> &'static str { "count-releases" }
//! }
//! ```

use async_trait::async_trait;

use crate::events::Event;

/// Contract for event subscribers.
///
/// Called from a subscriber-dedicated worker task. Implementations should avoid
/// blocking the async runtime.
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    /// Handles one event.
    async fn on_event(&self, event: &Event);

    /// Name used in overflow/panic reports.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Capacity of this subscriber's queue. Events beyond it are dropped.
    fn queue_capacity(&self) -> usize {
        1024
    }
}
