/*!
 * orbit-adls CLI
 *
 * Reads newline-delimited JSON events from stdin, delivers them in batches
 * and stops renewing credentials on EOF.
 *
 * Author: Shane Wall <shaneawall@gmail.com>
 */

use clap::{Parser, ValueEnum};
use orbit_adls::{
    auth::AzureAdTokenProvider,
    backend::LocalConnector,
    config::LogLevel,
    error::{AdlsError, Result, EXIT_SUCCESS},
    logging, AdlsSink, Event, SinkConfig,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "orbit-adls")]
#[command(version, about = "Ship newline-delimited JSON logs to Azure Data Lake Store", long_about = None)]
struct Cli {
    /// Sink configuration file (TOML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: PathBuf,

    /// Local directory the store mirror writes under (<DIR>/<fqdn>/<path>)
    #[arg(long = "mirror-root", value_name = "DIR", default_value = "adls-mirror")]
    mirror_root: PathBuf,

    /// Log level (error, warn, info, debug, trace); overrides the config file
    #[arg(long, value_enum)]
    log_level: Option<LogLevelArg>,

    /// Path to log file (default: stderr)
    #[arg(long = "log-file", value_name = "FILE")]
    log_file: Option<PathBuf>,

    /// Enable verbose logging (equivalent to --log-level=debug)
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Events per multi_receive call
    #[arg(long, default_value = "125", value_parser = clap::value_parser!(u32).range(1..))]
    batch_size: u32,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum LogLevelArg {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevelArg> for LogLevel {
    fn from(arg: LogLevelArg) -> Self {
        match arg {
            LogLevelArg::Error => LogLevel::Error,
            LogLevelArg::Warn => LogLevel::Warn,
            LogLevelArg::Info => LogLevel::Info,
            LogLevelArg::Debug => LogLevel::Debug,
            LogLevelArg::Trace => LogLevel::Trace,
        }
    }
}

fn main() {
    let code = match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    };
    std::process::exit(code);
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    let mut config = SinkConfig::from_file(&cli.config)?;
    if let Some(level) = cli.log_level {
        config.log_level = level.into();
    }
    if cli.log_file.is_some() {
        config.log_file = cli.log_file.clone();
    }
    config.verbose |= cli.verbose;

    if let Err(e) = logging::init_logging(&config) {
        eprintln!("Warning: Failed to initialize logging: {}", e);
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(ship(config, cli))
}

async fn ship(config: SinkConfig, cli: Cli) -> Result<()> {
    let provider = Arc::new(AzureAdTokenProvider::new()?);
    let connector = Arc::new(LocalConnector::new(&cli.mirror_root));
    let sink = AdlsSink::register(&config, provider, connector, config.build_codec()).await?;

    let batch_size = cli.batch_size as usize;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut pending = Vec::with_capacity(batch_size);
    let mut totals = Totals::default();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                sink.close().await;
                return Err(AdlsError::Io(e));
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        match Event::from_json_line(&line) {
            Ok(event) => pending.push(event),
            Err(e) => {
                totals.unparseable += 1;
                warn!(error = %e, "Skipping unparseable input line");
            }
        }

        if pending.len() >= batch_size {
            let batch = std::mem::replace(&mut pending, Vec::with_capacity(batch_size));
            totals.add(&sink.multi_receive(batch).await);
        }
    }

    if !pending.is_empty() {
        totals.add(&sink.multi_receive(pending).await);
    }

    info!(
        written = totals.written,
        discarded = totals.discarded,
        skipped = totals.skipped,
        unparseable = totals.unparseable,
        "Input exhausted"
    );
    sink.close().await;
    Ok(())
}

#[derive(Default)]
struct Totals {
    written: usize,
    discarded: usize,
    skipped: usize,
    unparseable: usize,
}

impl Totals {
    fn add(&mut self, report: &orbit_adls::DeliveryReport) {
        self.written += report.events_written();
        self.discarded += report.events_discarded();
        self.skipped += report.skipped_events;
    }
}
