// Weave task loop
// Main entry point for the weave binary

use clap::Parser;
use weave_engine::cli::{Cli, Command, ConfigAction};
use weave_engine::config::Config;
use weave_engine::handlers::{
    handle_config_path, handle_config_show, handle_evict, handle_history, handle_patterns,
    handle_run, OutputFormat,
};
use weave_engine::telemetry::{init_telemetry, LogFormat};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let version = env!("CARGO_PKG_VERSION");
    let commit = env!("GIT_COMMIT_HASH");
    let timestamp = env!("BUILD_TIMESTAMP");

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => Config::default_config_path()?,
    };
    let config = if cli.config.is_some() {
        Config::load_from_path(&config_path)?
    } else {
        Config::load_or_create()?
    };

    // --log wins over the configured level; RUST_LOG wins over both
    init_telemetry(
        cli.log.as_deref().unwrap_or(&config.core.log_level),
        LogFormat::select(cli.json),
    );

    tracing::info!("Weave v{} ({} - {})", version, commit, timestamp);

    match cli.command {
        Command::Run {
            description,
            domain,
            priority,
            deep,
        } => handle_run(description, domain, priority.into(), deep, &config, format).await,

        Command::History { limit } => {
            tracing::info!("Showing last {} experiences", limit);
            handle_history(limit, &config, format).await
        }

        Command::Patterns { limit } => {
            tracing::info!("Analyzing patterns across {} experiences", limit);
            handle_patterns(limit, &config, format).await
        }

        Command::Evict => handle_evict(&config, format).await,

        Command::Config { action } => match action {
            ConfigAction::Show => handle_config_show(&config, format),
            ConfigAction::Path => handle_config_path(&config_path, format),
        },
    }
}
