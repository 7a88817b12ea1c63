use anyhow::Result;
use clap::Parser;
use term_tracker::cli::{self, Cli};
use term_tracker::config::Config;
use tracing::Level;
use tracing_subscriber::{filter::EnvFilter, fmt::format::FmtSpan, FmtSubscriber};

fn setup_logging(log_level_str: &str) {
    let level = match log_level_str.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("term_tracker={}", level)));

    // stdout belongs to the rendered panels; logs go to stderr.
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .with_level(true)
        .with_span_events(FmtSpan::CLOSE)
        .json()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli::apply_overrides(Config::load()?, &cli)?;
    setup_logging(&config.log_level);

    tracing::info!(version = %env!("CARGO_PKG_VERSION"), backend = %config.backend_url, "Starting term-tracker");
    tracing::debug!("Loaded configuration: {:?}", config);

    let result = cli::run(cli, config).await;
    if let Err(e) = &result {
        tracing::error!(error = %e, "term-tracker exited with an error");
    }
    result
}
