use botrelay::config::Config;
use botrelay::logging::Logger;
use botrelay::server::{router, AppState};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::new();
    config.validate()?;
    Logger::init_logger(&config)?;

    let shutdown = CancellationToken::new();
    let state = AppState::from_config(&config, shutdown.clone())?;
    info!(
        bot_id = config.bot_id(),
        channels = ?state.channels(),
        "starting botrelay"
    );

    let listener = tokio::net::TcpListener::bind((config.interface.as_str(), config.port)).await?;
    info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            // Abort in-flight backend streams so open requests can finish.
            shutdown.cancel();
        })
        .await?;

    info!("shutdown complete");
    Ok(())
}

/// Wait for SIGINT (ctrl-c) or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .unwrap_or_else(|e| error!(error = %e, "ctrl-c handler failed"));
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "SIGTERM handler unavailable, relying on ctrl-c");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received ctrl-c"),
        () = terminate => info!("received SIGTERM"),
    }
}
