//! Handle to a spawned logger process.

use std::time::Duration;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::process::Child;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::debug;

/// How long to wait for a killed child to be reaped before giving up on it.
const REAP_TIMEOUT: Duration = Duration::from_secs(5);

/// One logger's OS process together with its output classifier task.
pub struct LoggerProcess {
    child: Child,
    pid: Option<u32>,
    classifier: Option<JoinHandle<()>>,
}

impl LoggerProcess {
    pub(crate) fn new(child: Child, classifier: Option<JoinHandle<()>>) -> Self {
        let pid = child.id();
        Self {
            child,
            pid,
            classifier,
        }
    }

    /// OS process id, captured at spawn time.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Whether the process is still running. Also reaps the child if it has
    /// already exited.
    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Force the process down: SIGKILL to its process group, then the
    /// runtime's own kill, then a bounded wait for the exit status. Every
    /// failure along the way is swallowed; the goal is "no process left
    /// behind", not reporting teardown errors.
    pub(crate) async fn kill(mut self, name: &str) {
        if let Some(pid) = self.pid {
            // The child leads its own process group (see CommandLauncher),
            // so signal the group to take down anything it spawned.
            if let Err(e) = signal::kill(Pid::from_raw(-(pid as i32)), Signal::SIGKILL) {
                debug!(logger = %name, "kill signal failed: {e}");
            }
        }
        if let Err(e) = self.child.start_kill() {
            debug!(logger = %name, "terminate request failed: {e}");
        }
        match timeout(REAP_TIMEOUT, self.child.wait()).await {
            Ok(Ok(status)) => debug!(logger = %name, "process exited: {status}"),
            Ok(Err(e)) => debug!(logger = %name, "wait for exit failed: {e}"),
            Err(_) => debug!(logger = %name, "process not reaped within {REAP_TIMEOUT:?}"),
        }
        // Give the classifier a moment to drain the closed stream.
        if let Some(task) = self.classifier.take() {
            let _ = timeout(Duration::from_secs(1), task).await;
        }
    }
}
