use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::Parser;
use consult_server::logging::{log_welcome, parse_log_level, setup_logging, LoggingConfig};
use consult_server::{create_router, ApiState, ServerConfig, SweepScheduler};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "consult-server")]
#[command(about = "Consultation booking and call session server")]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, default_value = "consult.toml")]
    config: PathBuf,

    /// Address to listen on, overrides the config file
    #[arg(short, long)]
    bind: Option<String>,

    #[arg(long)]
    database_url: Option<String>,

    #[arg(short, long)]
    log_level: Option<String>,

    /// Emit JSON log lines
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = ServerConfig::load(Some(&cli.config))?;
    if let Some(bind) = cli.bind {
        config.bind_address = bind;
    }
    if let Some(database_url) = cli.database_url {
        config.database_url = database_url;
    }
    if let Some(log_level) = cli.log_level {
        config.log_level = log_level;
    }
    config.json_logs |= cli.json_logs;

    let logging = LoggingConfig::new(parse_log_level(&config.log_level)?, "consult-server")
        .with_json(config.json_logs);
    setup_logging(&logging)?;
    log_welcome(&logging.app_name, env!("CARGO_PKG_VERSION"));

    config.validate()?;
    let addr = config.socket_addr()?;

    let services = consult_core::init(config.to_core_config())
        .await
        .map_err(|e| anyhow!("failed to initialize engine: {}", e))?;
    info!("✅ Lifecycle engine ready ({})", config.database_url);

    let scheduler = SweepScheduler::start(services.engine.clone(), config.sweep_interval());

    let state = ApiState::new(services.engine, services.identity);
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("🌐 Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| anyhow!("server error: {}", e))?;

    scheduler.shutdown().await;
    info!("👋 Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("🛑 Shutdown requested");
}
