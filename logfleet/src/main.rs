//! Standalone logger runner: give it a dict of logger configurations and it
//! tries to keep them running.
//!
//! A higher-level fleet controller would use `logfleet-supervisor` as a
//! library and push desired states over its own transport; this binary is
//! the direct command-line form of the same loop.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use logfleet_supervisor::{
    CommandLauncher, LoggerConfig, LoggerRunner, RunnerOptions, SignalHandler,
};
use miette::{IntoDiagnostic, Result, WrapErr};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// YAML file mapping logger names to their configurations (null means
    /// "tracked but should not run").
    #[arg(long)]
    config: Option<PathBuf>,

    /// Seconds to sleep between logger checks.
    #[arg(long, default_value_t = 1.0)]
    interval: f64,

    /// How many times to try a crashing config before giving up on it as
    /// failed. If zero, then never stop retrying.
    #[arg(long, default_value_t = 3)]
    max_tries: u32,

    /// Command that runs one logger pipeline; it receives the configuration
    /// as JSON on stdin.
    #[arg(long, default_value = "logfleet-listen")]
    listener: String,

    /// Increase output verbosity.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Increase output verbosity of the component loggers.
    #[arg(long, action = clap::ArgAction::Count)]
    logger_verbosity: u8,
}

fn level_for(count: u8) -> &'static str {
    match count {
        0 => "warn",
        1 => "info",
        _ => "debug",
    }
}

/// Level name in the form the component loggers understand.
fn component_level_for(count: u8) -> &'static str {
    match count {
        0 => "warning",
        1 => "info",
        _ => "debug",
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_for(cli.verbose)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let initial = match &cli.config {
        Some(path) => load_fleet_file(path)?,
        None => HashMap::new(),
    };
    info!("loaded {} logger configs", initial.len());

    let signals = SignalHandler::install().into_diagnostic()?;
    let launcher = Arc::new(CommandLauncher::new(
        cli.listener.as_str(),
        component_level_for(cli.logger_verbosity),
    ));
    let runner = LoggerRunner::new(
        RunnerOptions {
            interval: Duration::from_secs_f64(cli.interval.max(0.0)),
            max_tries: cli.max_tries,
            shutdown: signals.token(),
        },
        launcher,
    );

    runner.set_configs(initial).await;
    runner.run().await;
    Ok(())
}

fn load_fleet_file(path: &Path) -> Result<HashMap<String, Option<LoggerConfig>>> {
    let text = std::fs::read_to_string(path)
        .into_diagnostic()
        .wrap_err_with(|| format!("Failed to read config file {}", path.display()))?;
    parse_fleet(&text).wrap_err_with(|| format!("Failed to parse config file {}", path.display()))
}

fn parse_fleet(text: &str) -> Result<HashMap<String, Option<LoggerConfig>>> {
    serde_yaml::from_str(text).into_diagnostic()
}

#[cfg(test)]
mod tests {
    use super::*;
    use logfleet_supervisor::runnable;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_a_fleet_file() {
        let text = r#"
gyro->net:
  name: gyro->net
  readers:
    class: SerialReader
    kwargs:
      port: /dev/ttyr0
  writers:
    class: UdpWriter
    kwargs:
      port: 6224
idle: null
named-only:
  name: placeholder
"#;
        let fleet = parse_fleet(text).unwrap();
        assert_eq!(fleet.len(), 3);

        let gyro = fleet["gyro->net"].as_ref().unwrap();
        assert_eq!(gyro.display_name(), "gyro->net");
        assert!(runnable(Some(gyro)));

        assert!(fleet["idle"].is_none());
        assert!(!runnable(fleet["named-only"].as_ref()));
    }

    #[test]
    fn verbosity_maps_to_levels() {
        assert_eq!(level_for(0), "warn");
        assert_eq!(level_for(1), "info");
        assert_eq!(level_for(5), "debug");
    }
}
