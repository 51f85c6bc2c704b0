//! OS-signal to cancellation translation.

use tokio::signal::unix::{SignalKind, signal};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Translates SIGINT/SIGTERM into cancellation of a shared token, so every
/// blocking wait in the runner observes shutdown cooperatively instead of
/// relying on signal-to-exception conversion.
pub struct SignalHandler {
    token: CancellationToken,
    _task: JoinHandle<()>,
}

impl SignalHandler {
    /// Install the handlers and start listening. Must be called from within
    /// a tokio runtime.
    pub fn install() -> std::io::Result<Self> {
        let token = CancellationToken::new();
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        let task_token = token.clone();
        let task = tokio::spawn(async move {
            tokio::select! {
                _ = sigint.recv() => info!("received SIGINT, shutting down"),
                _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
            }
            task_token.cancel();
        });

        Ok(Self {
            token,
            _task: task,
        })
    }

    /// Token cancelled when a termination signal arrives.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}
