//! # OS termination signals.
//!
//! [`wait_for_signal`] resolves with the name of the first termination signal received:
//! `SIGINT` (Ctrl-C), `SIGTERM` (service managers) or `SIGQUIT`.

use tokio::signal::unix::{SignalKind, signal};

use crate::error::RuntimeError;

/// Waits for a termination signal; returns its name.
///
/// Fails with [`RuntimeError::Signal`] if a handler cannot be installed.
pub async fn wait_for_signal() -> Result<&'static str, RuntimeError> {
    let mut sigint = signal(SignalKind::interrupt()).map_err(RuntimeError::Signal)?;
    let mut sigterm = signal(SignalKind::terminate()).map_err(RuntimeError::Signal)?;
    let mut sigquit = signal(SignalKind::quit()).map_err(RuntimeError::Signal)?;

    let name = tokio::select! {
        _ = sigint.recv() => "SIGINT",
        _ = sigterm.recv() => "SIGTERM",
        _ = sigquit.recv() => "SIGQUIT",
    };
    Ok(name)
}
