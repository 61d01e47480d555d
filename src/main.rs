use std::time::Duration;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::signal;

use dashboard_relay::bus::create_bus;
use dashboard_relay::config::Settings;
use dashboard_relay::server::{create_app, AppState};
use dashboard_relay::shutdown::GracefulShutdown;
use dashboard_relay::tasks::StatsReporter;
use dashboard_relay::telemetry::init_telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let settings = Settings::new()?;

    // Initialize tracing
    let _telemetry = init_telemetry(&settings.otel, &settings.log.level)?;
    tracing::info!(
        bus_backend = %settings.bus.backend,
        channel = %settings.bus.channel,
        "Configuration loaded"
    );

    // Connect the upstream bus; None means degraded mode
    let bus = create_bus(&settings.bus).await;
    if bus.is_none() {
        tracing::warn!("Running without an upstream bus; only test broadcasts will reach clients");
    }

    // Create application state
    let state = AppState::new(settings.clone(), bus);
    tracing::info!("Application state initialized");

    // Start periodic stats logging
    let reporter = StatsReporter::new(
        Duration::from_secs(settings.stats.report_interval_secs),
        state.stats.clone(),
        state.shutdown.signal(),
    );
    let reporter_handle = tokio::spawn(reporter.run());

    let graceful = GracefulShutdown::new(
        state.connection_manager.clone(),
        state.shutdown.clone(),
        Duration::from_secs(settings.shutdown.drain_timeout_secs),
    );

    // Create Axum app
    let app = create_app(state);

    // Start server
    let addr = settings.server_addr();
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(
        addr = %addr,
        sse = "/dashboard/stream",
        websocket = "/cable",
        stats = "/dashboard/stats",
        "Server listening"
    );

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_handler(graceful))
        .await?;

    // Wait for background tasks to finish
    let _ = reporter_handle.await;

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal_handler(graceful: GracefulShutdown) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let reason = tokio::select! {
        _ = ctrl_c => "ctrl_c",
        _ = terminate => "sigterm",
    };

    // Stop connection loops and wait for the registry to drain
    graceful.execute(reason).await;
}
