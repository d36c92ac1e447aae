//! Admission middleware and the background sweeper for the gate's records.

use crate::error::AppError;
use crate::state::AppState;
use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use lib_common::admission::{AdmissionDecision, AdmissionGate, resolve_client_key};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Runs every request under the protected prefix through the admission gate.
///
/// The peer address is only available when the server was started with
/// `into_make_service_with_connect_info`; without it, callers that send no
/// forwarding headers share the anonymous bucket.
pub async fn admission_layer(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if !state.is_protected(request.uri().path()) {
        return next.run(request).await;
    }

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let client = resolve_client_key(request.headers(), peer);

    match state.gate.admit(&client) {
        AdmissionDecision::Admitted { remaining } => {
            trace!(%client, remaining, "Request admitted");
            next.run(request).await
        }
        AdmissionDecision::Denied { retry_after_secs } => {
            warn!(%client, retry_after_secs, path = %request.uri().path(), "Rate limit exceeded");
            AppError::RateLimited { retry_after_secs }.into_response()
        }
    }
}

/// Periodically evicts stale records until `cancel` fires.
pub fn spawn_sweeper(gate: Arc<AdmissionGate>, every: Duration, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let evicted = gate.sweep();
                    debug!(evicted, tracked = gate.tracked_clients(), "Admission sweep finished");
                }
            }
        }
        info!("Admission sweeper stopped");
    })
}
