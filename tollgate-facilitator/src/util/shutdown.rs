//! Graceful shutdown signal handling.
//!
//! [`Shutdown`] listens for OS shutdown signals in a background task and
//! fans the event out through a [`CancellationToken`], so the HTTP server
//! and the settlement sweep can wind down together. On Unix it reacts to
//! SIGTERM and SIGINT; on Windows to Ctrl+C.

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Coordinates graceful shutdown across subsystems.
///
/// ```ignore
/// let shutdown = Shutdown::try_new()?;
/// let token = shutdown.cancellation_token();
/// axum::serve(listener, app)
///     .with_graceful_shutdown(async move { token.cancelled().await })
///     .await?;
/// ```
#[allow(missing_debug_implementations)] // TaskTracker doesn't impl Debug
pub struct Shutdown {
    task_tracker: TaskTracker,
    cancellation_token: CancellationToken,
}

impl Shutdown {
    /// Registers the signal handlers and starts listening.
    ///
    /// # Errors
    ///
    /// Returns an [`std::io::Error`] if signal registration fails.
    #[allow(clippy::unnecessary_wraps)] // Result needed on Unix for signal registration
    pub fn try_new() -> Result<Self, std::io::Error> {
        let inner = CancellationToken::new();
        let outer = inner.clone();
        let task_tracker = TaskTracker::new();

        #[cfg(unix)]
        {
            let mut sigterm = signal(SignalKind::terminate())?;
            let mut sigint = signal(SignalKind::interrupt())?;
            task_tracker.spawn(async move {
                tokio::select! {
                    _ = sigterm.recv() => inner.cancel(),
                    _ = sigint.recv() => inner.cancel(),
                }
            });
        }

        #[cfg(windows)]
        {
            task_tracker.spawn(async move {
                let _ = tokio::signal::ctrl_c().await;
                inner.cancel();
            });
        }

        task_tracker.close();
        Ok(Self {
            task_tracker,
            cancellation_token: outer,
        })
    }

    /// Returns a token that is cancelled when a shutdown signal arrives.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Waits for a shutdown signal and for the handler task to finish.
    pub async fn recv(&self) {
        self.cancellation_token.cancelled().await;
        self.task_tracker.wait().await;
    }
}
