//! Shutdown and reload signal handling
//!
//! Ctrl+C and SIGTERM stop the service; SIGHUP asks it to reload its
//! configuration. Handlers are installed once by [`SignalListener::install`]
//! and keep their registration between polls, so a signal delivered while
//! the service loop is busy is seen by the next `select!`.
//!
//! ```ignore
//! let mut signals = SignalListener::install();
//! loop {
//!     tokio::select! {
//!         _ = timer.tick() => gateway.publish().await,
//!         event = signals.recv() => match event {
//!             SignalEvent::Reload => gateway.reload().await?,
//!             SignalEvent::Shutdown => break,
//!         },
//!     }
//! }
//! ```

use tracing::{info, warn};

#[cfg(unix)]
use tokio::signal::unix::{signal, Signal, SignalKind};

/// Install a handler, logging instead of failing when the OS refuses
#[cfg(unix)]
fn install(kind: SignalKind, name: &str) -> Option<Signal> {
    match signal(kind) {
        Ok(sig) => Some(sig),
        Err(e) => {
            warn!("Failed to install {} handler: {}", name, e);
            None
        },
    }
}

/// Wait on an optional handler; a missing one never fires
#[cfg(unix)]
async fn recv_or_pending(sig: Option<&mut Signal>) {
    match sig {
        Some(sig) => {
            sig.recv().await;
        },
        None => std::future::pending::<()>().await,
    }
}

/// What a received signal asks the service to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalEvent {
    /// Ctrl+C or SIGTERM
    Shutdown,
    /// SIGHUP
    Reload,
}

/// Process signal handlers owned by the service loop
pub struct SignalListener {
    #[cfg(unix)]
    interrupt: Option<Signal>,
    #[cfg(unix)]
    terminate: Option<Signal>,
    #[cfg(unix)]
    hangup: Option<Signal>,
}

impl SignalListener {
    /// Register the handlers; must be called inside a tokio runtime
    pub fn install() -> Self {
        #[cfg(unix)]
        {
            Self {
                interrupt: install(SignalKind::interrupt(), "SIGINT"),
                terminate: install(SignalKind::terminate(), "SIGTERM"),
                hangup: install(SignalKind::hangup(), "SIGHUP"),
            }
        }
        #[cfg(not(unix))]
        {
            Self {}
        }
    }

    /// Wait for the next signal
    ///
    /// Cancel safe: a signal that arrives while the returned future is not
    /// polled is reported by the next call.
    pub async fn recv(&mut self) -> SignalEvent {
        #[cfg(unix)]
        {
            tokio::select! {
                _ = recv_or_pending(self.interrupt.as_mut()) => {
                    info!("Received Ctrl+C");
                    SignalEvent::Shutdown
                },
                _ = recv_or_pending(self.terminate.as_mut()) => {
                    info!("Received SIGTERM");
                    SignalEvent::Shutdown
                },
                _ = recv_or_pending(self.hangup.as_mut()) => {
                    info!("Received SIGHUP");
                    SignalEvent::Reload
                },
            }
        }
        #[cfg(not(unix))]
        {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await
            }
            info!("Received Ctrl+C");
            SignalEvent::Shutdown
        }
    }
}
