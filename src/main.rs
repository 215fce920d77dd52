//! fitness-input
//!
//! Entry point invoked by Splunk:
//! - `--scheme`: print the input scheme
//! - `--validate-arguments`: validate the `<items>` document on stdin
//! - no mode flag: read the `<input>` document on stdin and stream events

use anyhow::Context;
use clap::Parser;
use fitness_input::config::{generate_default_config, Config, LoadedConfig, LoggingConfig};
use fitness_input::credentials::SplunkPasswordStore;
use fitness_input::modinput::{validation_error_xml, InputConfig, Scheme};
use fitness_input::output::{EventSink, JsonLinesSink};
use fitness_input::{IngestionOrchestrator, RunReport, StaticRegistry};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::Instrument;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "fitness-input")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Splunk modular input polling fitness-tracking APIs")]
struct Cli {
    /// Print the input scheme and exit
    #[arg(long, conflicts_with = "validate_arguments")]
    scheme: bool,

    /// Validate the configuration read from stdin
    #[arg(long)]
    validate_arguments: bool,

    /// Connector settings file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print a default settings file and exit
    #[arg(long)]
    print_config: bool,
}

/// Logs go to stderr; stdout carries events and protocol documents
fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("fitness_input={}", config.level)));

    let registry = tracing_subscriber::registry().with(filter);
    if config.format.eq_ignore_ascii_case("json") {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr)).init();
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<LoadedConfig> {
    match path {
        Some(path) => {
            let config = Config::load_with_env(path)
                .with_context(|| format!("loading settings from {}", path.display()))?;
            Ok(LoadedConfig {
                config,
                source: Some(path.to_path_buf()),
                skipped: Vec::new(),
            })
        }
        None => Ok(Config::load_default()),
    }
}

fn log_config_source(loaded: &LoadedConfig) {
    for error in &loaded.skipped {
        tracing::warn!(error = %error, "Skipping settings file");
    }
    match &loaded.source {
        Some(path) => tracing::info!(path = %path.display(), "Loaded settings"),
        None => tracing::debug!("No settings file found, using defaults and environment"),
    }
}

fn validate_arguments() -> ExitCode {
    let result = InputConfig::read_from(std::io::stdin()).and_then(|input| input.validate_stanzas());

    match result {
        Ok(instances) => {
            tracing::info!(instances = instances.len(), "Arguments valid");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::warn!(error = %e, "Arguments rejected");
            print!("{}", validation_error_xml(&e.to_string()));
            ExitCode::FAILURE
        }
    }
}

async fn stream_events(config: &Config) -> anyhow::Result<RunReport> {
    let input =
        InputConfig::read_from(std::io::stdin()).context("reading input configuration from stdin")?;

    let orchestrator = IngestionOrchestrator::new(
        SplunkPasswordStore::new(&config.splunk),
        StaticRegistry,
        config,
    );

    let mut sink = JsonLinesSink::new(std::io::stdout());
    let report = orchestrator.run(&input, &mut sink).await?;
    sink.flush().context("flushing events to stdout")?;

    tracing::info!(
        processed = report.processed_count(),
        failures = report.failure_count(),
        events = sink.events_written(),
        "Run complete"
    );
    if let Ok(summary) = serde_json::to_string(&report) {
        tracing::debug!(report = %summary, "Run report");
    }

    Ok(report)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.print_config {
        print!("{}", generate_default_config());
        return ExitCode::SUCCESS;
    }

    if cli.scheme {
        print!("{}", Scheme::fitness().to_xml());
        return ExitCode::SUCCESS;
    }

    let loaded = match load_config(cli.config.as_deref()) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("fitness-input: {:#}", e);
            return ExitCode::FAILURE;
        }
    };
    init_logging(&loaded.config.logging);
    log_config_source(&loaded);
    let config = loaded.config;

    if cli.validate_arguments {
        return validate_arguments();
    }

    let run_id = uuid::Uuid::new_v4();
    let span = tracing::info_span!("run", run_id = %run_id);

    match stream_events(&config).instrument(span).await {
        Ok(report) if report.is_success() => ExitCode::SUCCESS,
        Ok(report) => {
            tracing::error!(
                run_id = %run_id,
                failures = report.failure_count(),
                "Run finished with failed credentials"
            );
            ExitCode::FAILURE
        }
        Err(e) => {
            tracing::error!(run_id = %run_id, error = %format!("{:#}", e), "Run aborted");
            ExitCode::FAILURE
        }
    }
}
