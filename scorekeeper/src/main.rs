use clap::{Parser, Subcommand};
use metrics_exporter_statsd::StatsdBuilder;
use score_sync::metrics_defs::ALL_METRICS;
use score_sync::{BackendError, EvaluationSession, JsonRpcClient, SessionError};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod config;
mod terminal;

use config::{Config, ConfigError, LoggingConfig, MetricsConfig};
use terminal::TerminalView;

#[derive(Parser)]
#[command(name = "scorekeeper", about = "Score entry for vendor evaluations")]
struct Cli {
    #[arg(long, default_value = "scorekeeper.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Edit and submit one evaluation from stdin
    Session {
        #[arg(long)]
        evaluation_id: u64,
    },
    /// Load and validate the config file, then exit
    CheckConfig,
    /// List the metrics the sync pipeline emits
    Metrics,
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("could not set up metrics: {0}")]
    Metrics(String),
    #[error("could not create backend client: {0}")]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match &cli.command {
        CliCommand::Session { evaluation_id } => run_session(&cli.config, *evaluation_id),
        CliCommand::CheckConfig => check_config(&cli.config),
        CliCommand::Metrics => {
            for def in ALL_METRICS {
                println!(
                    "{:<36} {:<10} {}",
                    def.name,
                    def.metric_type.as_str(),
                    def.description
                );
            }
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("scorekeeper: {error}");
            ExitCode::FAILURE
        }
    }
}

fn check_config(path: &std::path::Path) -> Result<(), CliError> {
    let config = Config::from_file(path)?;
    println!("config ok: backend {}", config.backend.url);
    Ok(())
}

fn run_session(path: &std::path::Path, evaluation_id: u64) -> Result<(), CliError> {
    let config = Config::from_file(path)?;
    let _sentry = init_logging(config.logging.as_ref());
    if let Some(metrics) = &config.metrics {
        init_metrics(metrics)?;
    }

    let backend = Arc::new(JsonRpcClient::new(&config.backend)?);

    // Everything runs on one thread, like the UI event loop it stands in for.
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    rt.block_on(async move {
        let view = Arc::new(TerminalView::default());
        let session = Arc::new(EvaluationSession::mount(
            evaluation_id,
            &config.sync,
            backend,
            view.clone(),
        )?);

        println!("evaluation {evaluation_id}: set <question> <vendor> [value] | submit | status | quit");
        terminal::run(session, view).await?;
        Ok::<(), CliError>(())
    })
}

fn init_logging(config: Option<&LoggingConfig>) -> Option<sentry::ClientInitGuard> {
    let guard = config.map(|logging| {
        sentry::init((
            logging.sentry_dsn.as_str(),
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });

    // stdout belongs to the terminal view.
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(guard.as_ref().map(|_| sentry::integrations::tracing::layer()))
        .init();

    guard
}

fn init_metrics(config: &MetricsConfig) -> Result<(), CliError> {
    let recorder = StatsdBuilder::from(config.statsd_host.clone(), config.statsd_port)
        .build(Some("scorekeeper"))
        .map_err(|e| CliError::Metrics(e.to_string()))?;

    metrics::set_global_recorder(recorder)
        .map_err(|_| CliError::Metrics("a metrics recorder is already installed".into()))?;

    tracing::info!(
        host = %config.statsd_host,
        port = config.statsd_port,
        "statsd metrics enabled"
    );
    Ok(())
}
