//! Classification of logger process output.
//!
//! Every live logger process gets one background task reading its combined
//! output stream line by line. Lines carry the severity markers the pipeline
//! framework embeds (` :INFO: `, ` :ERROR: `, ...); the classifier routes
//! each tagged line to the process-wide log sink at the matching level and
//! accumulates ERROR/FATAL lines on the owning logger's error list.

use std::collections::VecDeque;
use std::io::Write as _;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::ChildStdout;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Severity a logger process may embed in an output line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
    Fatal,
}

/// Scan a line for an embedded severity marker.
pub fn classify_line(line: &str) -> Option<Severity> {
    if line.contains(" :DEBUG: ") {
        Some(Severity::Debug)
    } else if line.contains(" :INFO: ") {
        Some(Severity::Info)
    } else if line.contains(" :WARNING: ") {
        Some(Severity::Warning)
    } else if line.contains(" :ERROR: ") {
        Some(Severity::Error)
    } else if line.contains(" :FATAL: ") {
        Some(Severity::Fatal)
    } else {
        None
    }
}

/// Recent error lines for one logger, shared between the runner and the
/// logger's output classifier task.
///
/// A capped ring: a crash-looping pipeline keeps its newest errors and drops
/// the oldest rather than growing without bound.
#[derive(Debug, Clone, Default)]
pub struct ErrorLog {
    entries: Arc<Mutex<VecDeque<String>>>,
}

impl ErrorLog {
    /// Retained entries per logger; the oldest are dropped first.
    pub const MAX: usize = 100;

    pub fn push(&self, line: impl Into<String>) {
        let mut entries = self.entries.lock().unwrap();
        while entries.len() >= Self::MAX {
            entries.pop_front();
        }
        entries.push_back(line.into());
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.entries.lock().unwrap().iter().cloned().collect()
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }
}

/// Spawn the classifier task for a logger's combined output stream.
/// The task ends when the stream reaches end-of-input.
pub(crate) fn spawn_classifier(
    name: String,
    stream: ChildStdout,
    errors: ErrorLog,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        classify_output(&name, BufReader::new(stream), &errors).await;
        debug!(logger = %name, "output stream closed");
    })
}

/// Read newline-delimited output until EOF: suppress consecutive duplicate
/// lines, forward tagged lines to the log sink (recording ERROR/FATAL on the
/// error list), and pass untagged lines through to stderr verbatim.
async fn classify_output<R>(name: &str, reader: R, errors: &ErrorLog)
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut previous: Option<String> = None;

    while let Ok(Some(raw)) = lines.next_line().await {
        let line = raw.trim();
        if line.is_empty() || previous.as_deref() == Some(line) {
            continue;
        }
        previous = Some(line.to_string());

        match classify_line(line) {
            Some(Severity::Debug) => debug!(logger = %name, "{line}"),
            Some(Severity::Info) => info!(logger = %name, "{line}"),
            Some(Severity::Warning) => warn!(logger = %name, "{line}"),
            Some(Severity::Error) | Some(Severity::Fatal) => {
                error!(logger = %name, "{line}");
                errors.push(format!("Logger {name}: {line}"));
            }
            None => {
                let _ = writeln!(std::io::stderr(), "{line}");
            }
        }
    }
}
