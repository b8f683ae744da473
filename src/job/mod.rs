//! Reserved jobs and what can be done with them.
//!
//! - [`JobHandle`] a reservation with delete / release / bury and stat queries
//! - [`JobStats`] typed view over the server's per-job statistics
//! - [`Disposition`] the terminal action chosen for a reservation
//! - [`JobResult`] what one executed cycle produced

mod disposition;
mod handle;
mod result;
mod stats;

pub use disposition::Disposition;
pub use handle::JobHandle;
pub use result::JobResult;
pub use stats::JobStats;
