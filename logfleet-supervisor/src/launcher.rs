//! Launching logger processes.
//!
//! The runner doesn't know how to execute a pipeline; it goes through the
//! [`Launcher`] boundary. The production [`CommandLauncher`] hands the
//! configuration to a listener executable as JSON on stdin, wrapped in a
//! shell script that merges stderr into stdout so the output classifier
//! sees a single combined stream.

use std::process::Stdio;

use async_trait::async_trait;
use miette::{IntoDiagnostic, Result, WrapErr};
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdout, Command};
use tracing::debug;

use crate::config::LoggerConfig;

/// A freshly spawned logger process: the child plus its combined output
/// stream.
pub struct SpawnedProcess {
    pub child: Child,
    pub output: Option<ChildStdout>,
}

/// Boundary to the process factory: given a configuration, produce an
/// isolated OS process that runs the pipeline until killed.
#[async_trait]
pub trait Launcher: Send + Sync {
    async fn launch(&self, name: &str, config: &LoggerConfig) -> Result<SpawnedProcess>;
}

/// Launches a listener command per logger, feeding it the configuration as
/// JSON on stdin.
pub struct CommandLauncher {
    /// Full command line of the listener; passed to the shell verbatim.
    listener: String,
    /// Log level exported to the listener for its own output.
    log_level: String,
}

impl CommandLauncher {
    pub fn new(listener: impl Into<String>, log_level: impl Into<String>) -> Self {
        Self {
            listener: listener.into(),
            log_level: log_level.into(),
        }
    }
}

#[async_trait]
impl Launcher for CommandLauncher {
    async fn launch(&self, name: &str, config: &LoggerConfig) -> Result<SpawnedProcess> {
        let script = build_wrapper_script(&self.listener, &self.log_level);
        let payload = serde_json::to_vec(config).into_diagnostic()?;

        let mut command = Command::new("bash");
        command
            .arg("-c")
            .arg(script)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .process_group(0)
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .into_diagnostic()
            .wrap_err_with(|| format!("Failed to launch process for logger {name}"))?;

        if let Some(mut stdin) = child.stdin.take() {
            // The listener may never read its stdin; write from a task so a
            // full pipe can't stall the launch path.
            tokio::spawn(async move {
                let _ = stdin.write_all(&payload).await;
                let _ = stdin.shutdown().await;
            });
        }

        let output = child.stdout.take();
        debug!(logger = %name, "spawned listener, pid {:?}", child.id());
        Ok(SpawnedProcess { child, output })
    }
}

/// Shell wrapper around the listener command: merge stderr into the stdout
/// pipe before anything else runs, export the component log level, then
/// exec the listener so the spawned pid is the pipeline itself.
fn build_wrapper_script(listener: &str, log_level: &str) -> String {
    use std::fmt::Write;

    let mut script = String::new();
    writeln!(script, "exec 2>&1").unwrap();
    writeln!(
        script,
        "export LOGFLEET_LOG_LEVEL={}",
        shell_escape::escape(log_level.into())
    )
    .unwrap();
    writeln!(script, "exec {}", listener).unwrap();
    script
}
