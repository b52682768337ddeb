use anyhow::Context;
use clap::{Parser, ValueEnum};
use log::{error, info, warn};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::mpsc::{self, Sender};
use vigil::config::MonitoringConfig;
use vigil::error::ConfigError;
use vigil::hub::{render_report, MonitoringHub, MonitoringReport};
use vigil::ingest::Ingestor;

/// Output format for the final report
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ReportFormat {
    Json,
    Prometheus,
}

/// Command-line arguments for the vigil pipeline
#[derive(Parser)]
#[command(
    name = "vigil",
    about = "Observability pipeline - error tracking, structured logs and performance metrics",
    long_about = "Reads newline-delimited JSON signals (errors, logs, metrics and Web Vitals) \
                  from stdin, feeds them through the monitoring hub and prints a final report \
                  on end of input or Ctrl+C."
)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "Configuration file path (TOML format)"
    )]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(
        short,
        long,
        help = "Enable verbose logging output (sets RUST_LOG=debug)"
    )]
    verbose: bool,

    /// Final report format
    #[arg(long, value_enum, default_value = "json")]
    format: ReportFormat,
}

impl Cli {
    /// Validate the CLI arguments
    ///
    /// Missing config files are not an error; `load_config` falls back to defaults.
    fn validate(&self) -> Result<(), String> {
        if let Some(ref config_path) = self.config {
            if config_path.exists() {
                if !config_path.is_file() {
                    return Err(format!(
                        "Configuration path is not a file: {}",
                        config_path.display()
                    ));
                }

                if let Some(extension) = config_path.extension() {
                    if extension != "toml" {
                        warn!(
                            "Configuration file does not have .toml extension: {}",
                            config_path.display()
                        );
                    }
                }
            }
        }

        Ok(())
    }
}

/// Load configuration, falling back to defaults when the file is missing
///
/// Invalid configuration is an error.
fn load_config(config_path: Option<&PathBuf>) -> Result<MonitoringConfig, ConfigError> {
    match config_path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            match MonitoringConfig::from_file(path) {
                Ok(config) => Ok(config),
                Err(ConfigError::ReadError { .. }) => {
                    warn!(
                        "Configuration file '{}' not found or unreadable, using defaults",
                        path.display()
                    );
                    Ok(MonitoringConfig::default())
                }
                Err(e) => Err(e),
            }
        }
        None => {
            info!("Using default configuration");
            Ok(MonitoringConfig::default())
        }
    }
}

/// Messages reaching the main loop
enum Input {
    Line(String),
    Eof,
    Interrupt,
}

fn spawn_stdin_reader(sender: Sender<Input>) -> std::io::Result<()> {
    std::thread::Builder::new()
        .name("vigil-stdin".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                match line {
                    Ok(line) => {
                        if sender.send(Input::Line(line)).is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        error!("Failed to read stdin: {}", e);
                        break;
                    }
                }
            }
            let _ = sender.send(Input::Eof);
        })?;
    Ok(())
}

fn print_report(report: &MonitoringReport, format: ReportFormat) -> anyhow::Result<()> {
    match format {
        ReportFormat::Json => {
            let json = serde_json::to_string_pretty(report).context("Failed to serialize report")?;
            println!("{}", json);
        }
        ReportFormat::Prometheus => print!("{}", render_report(report)),
    }
    Ok(())
}

fn run(cli: Cli) -> anyhow::Result<()> {
    cli.validate().map_err(anyhow::Error::msg)?;

    let config = load_config(cli.config.as_ref()).context("Failed to load configuration")?;
    let hub = MonitoringHub::new(config).context("Failed to initialize monitoring hub")?;
    hub.start().context("Failed to start background tasks")?;

    let (sender, receiver) = mpsc::channel();
    let interrupt = sender.clone();
    ctrlc::set_handler(move || {
        info!("Received interrupt signal (SIGINT), shutting down gracefully...");
        let _ = interrupt.send(Input::Interrupt);
    })
    .context("Failed to set SIGINT handler")?;
    spawn_stdin_reader(sender).context("Failed to spawn stdin reader")?;

    info!("vigil is running. Reading signals from stdin, press Ctrl+C to stop.");

    let mut ingestor = Ingestor::new(&hub);
    for input in receiver {
        match input {
            Input::Line(line) => ingestor.line(&line),
            Input::Eof => {
                info!("End of input");
                break;
            }
            Input::Interrupt => break,
        }
    }

    let summary = ingestor.summary();
    info!(
        "Ingested {} signal(s), skipped {} malformed line(s)",
        summary.accepted, summary.rejected
    );

    let report = hub.shutdown();
    print_report(&report, cli.format)
}

fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        std::env::set_var("RUST_LOG", "debug");
    }
    env_logger::init();

    if let Err(e) = run(cli) {
        error!("{:#}", e);
        std::process::exit(1);
    }
}
