/**
 * Soft-then-hard interrupt handling
 *
 * The first SIGINT/SIGTERM cancels the run so workers abandon their current
 * request and shut their sessions down. A second one exits immediately.
 */

use log::{error, warn};
use std::io;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const FORCED_EXIT_CODE: i32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptState {
    Running,
    /// Cancellation issued, sessions shutting down.
    Draining,
    ForceExit,
}

impl InterruptState {
    pub fn on_signal(self) -> Self {
        match self {
            InterruptState::Running => InterruptState::Draining,
            InterruptState::Draining | InterruptState::ForceExit => InterruptState::ForceExit,
        }
    }
}

/// Listen for interrupts for the rest of the process lifetime.
pub fn spawn_handler(cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut state = InterruptState::Running;
        loop {
            if let Err(e) = wait_for_signal().await {
                error!("failed to listen for interrupts: {}", e);
                return;
            }
            state = state.on_signal();
            match state {
                InterruptState::Running => {}
                InterruptState::Draining => {
                    warn!("Interrupted, shutting down (interrupt again to exit immediately)");
                    cancel.cancel();
                }
                InterruptState::ForceExit => {
                    error!("Interrupted again, exiting");
                    std::process::exit(FORCED_EXIT_CODE);
                }
            }
        }
    })
}

#[cfg(unix)]
async fn wait_for_signal() -> io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> io::Result<()> {
    tokio::signal::ctrl_c().await
}
