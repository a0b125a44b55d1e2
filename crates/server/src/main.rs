mod bootstrap;
mod health;
mod routes;

use std::sync::Arc;

use anyhow::Result;
use renta_core::config::{AppConfig, LoadOptions};

fn init_logging(config: &AppConfig) {
    use renta_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    // Load config and initialize logging before any other operations.
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    // Bootstrap is fail-fast: a missing catalog or unreachable database
    // stops the process here instead of serving wrong answers.
    let app = bootstrap::bootstrap_with_config(config).await?;

    let state = routes::AppState {
        orchestrator: Arc::clone(&app.orchestrator),
        sessions: Arc::clone(&app.sessions),
        dashboard: app.dashboard.clone(),
    };
    let router = routes::router(state)
        .merge(health::router(app.db_pool.clone(), Arc::clone(&app.retriever)));

    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;

    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bind_address = %address,
        profile = app.config.llm.profile.as_str(),
        chat_model = app.config.chat_model(),
        "renta-server listening"
    );

    axum::serve(listener, router).with_graceful_shutdown(shutdown_signal()).await?;

    tracing::info!(
        event_name = "system.server.stopped",
        correlation_id = "shutdown",
        "renta-server stopped"
    );

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
