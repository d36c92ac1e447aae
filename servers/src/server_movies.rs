//! # ReelStream Movie Gateway
//!
//! HTTP entry point between the browser and the recommendation backend.
//!
//! ## Core Responsibilities:
//! - **Admission:** every request under the protected prefix passes a
//!   per-client fixed-window gate; excess requests get `429` with a retry hint.
//! - **Search relay:** `POST /api/movies` streams growing, de-duplicated
//!   recommendation snapshots as the backend produces them.
//! - **Provider lookup:** `POST /api/providers` is forwarded to the backend.
//! - **Lifecycle:** stale admission records are swept in the background, and
//!   SIGINT/SIGTERM trigger a graceful shutdown.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

use anyhow::Result;
use movie_logic::admission::spawn_sweeper;
use movie_logic::config::load_config;
use movie_logic::logger::setup_logging;
use movie_logic::routes::router;
use movie_logic::state::AppState;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let settings = load_config()?;
    let _log_guard = setup_logging(&settings.log_dir, &settings.log_level)?;

    let state = AppState::new(&settings)?;
    let admission = state.gate.config();
    info!(
        backend = %state.backend.base_url(),
        limit = admission.limit,
        window_ms = admission.window_ms,
        prefix = %state.rate_limit_prefix,
        "Starting server_movies"
    );

    let cancel = CancellationToken::new();
    let sweeper = spawn_sweeper(state.gate.clone(), settings.sweep_interval, cancel.clone());

    let listener = TcpListener::bind(settings.bind_addr()).await?;
    info!("Listening on http://{}", listener.local_addr()?);

    let served = axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await;

    cancel.cancel();
    if let Err(e) = sweeper.await {
        error!("Sweeper task ended abnormally: {}", e);
    }

    served?;
    info!("Server stopped");
    Ok(())
}

/// Resolves on `CTRL+C` or, on UNIX, `SIGTERM`.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received. Finishing in-flight requests...");
}
