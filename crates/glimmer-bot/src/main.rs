use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use glimmer_bot::app::App;
use glimmer_bot::config::Config;
use glimmer_bot::gateway::LoggingGateway;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(1);
        }
    };

    // RUST_LOG wins when set; LOG_LEVEL is the configured default.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // The chat-platform adapter implements `ChatGateway` and feeds
    // `Interaction` values into `app.router`. Without one wired in the
    // process runs headless: recovered queued jobs still drain against
    // the renderer, with outbound traffic logged.
    let gateway = Arc::new(LoggingGateway);

    let app = match App::boot(config, gateway).await {
        Ok(app) => app,
        Err(e) => {
            tracing::error!(error = %e, "Boot failed");
            std::process::exit(1);
        }
    };
    tracing::info!("Glimmer is up");

    shutdown_signal().await;
    app.shutdown().await;
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT, shutting down");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, shutting down");
        }
    }
}
