//! # Worker process supervision.
//!
//! Launches one shell process per job and splits it into three independent handles,
//! so the broker can race them without sharing mutable state:
//!
//! ```text
//! ShellCommand::start(payload)
//!     ├─► spawn  <shell> -c <command>   (own process group, stderr inherited)
//!     └─► Launched {
//!           control: ProcessControl   terminate() / kill() → whole process group
//!           stdin:   StdinFeed        resolves once the payload is written    (writer task)
//!           stdout:  StdoutStream     chunks in arrival order, None at EOF   (reader task)
//!           exit:    ExitSignal       resolves once with the wait() result   (waiter task)
//!         }
//! ```
//!
//! ## Rules
//! - Nothing waits for the child to read its payload; `StdinFeed` reports the write.
//! - End of `stdout` only means the pipe closed; the process may still be running.
//! - `ExitSignal` resolves exactly once and is independent of signals sent.
//! - Signalling an already-reaped group is a no-op, so `terminate()` can be repeated.

mod command;

pub use command::{
    ExitSignal, Launched, ProcessControl, ShellCommand, StdinFeed, StdoutStream,
};
