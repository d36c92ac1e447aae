//! # HTTP Surface
//!
//! | Route | Method | Purpose |
//! |---|---|---|
//! | `/health` | GET | liveness check, never rate-limited |
//! | `/api/movies`, `/api/movies/` | POST | streamed recommendation search |
//! | `/api/providers`, `/api/providers/` | POST | provider lookup passthrough |
//!
//! Everything under the protected prefix, unknown paths included, passes the
//! admission gate before routing.

use crate::admission::admission_layer;
use crate::error::AppError;
use crate::state::AppState;
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::header::{ACCEPT, CACHE_CONTROL, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router, middleware};
use lib_common::aggregator::{NDJSON_CONTENT_TYPE, aggregate, relay};
use serde_json::Value;
use tower_http::trace::TraceLayer;
use tracing::info;

pub const QUERY_REQUIRED: &str = "Query parameter is required";
pub const PROVIDER_FIELDS_REQUIRED: &str = "movie_id and region parameters are required";
pub const INVALID_BODY: &str = "Request body must be valid JSON";

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/movies", post(search_handler))
        .route("/api/movies/", post(search_handler))
        .route("/api/providers", post(providers_handler))
        .route("/api/providers/", post(providers_handler))
        .fallback(not_found_handler)
        .layer(middleware::from_fn_with_state(state.clone(), admission_layer))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_handler() -> &'static str {
    "OK"
}

async fn not_found_handler() -> AppError {
    AppError::NotFound
}

/// # Recommendation Search
///
/// Validates the query, opens the backend stream and relays it as
/// newline-delimited snapshots. Callers that explicitly ask for plain JSON
/// get the final snapshot only, once the backend has finished.
async fn search_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let query = search_query(&body)?;
    let upstream = state.backend.open_recommendations(&query).await?;
    info!(query = %query, shape = ?upstream.shape, "Relaying recommendations");

    if wants_buffered(&headers) {
        let snapshot = aggregate(query, upstream.shape, upstream.body).await?;
        return Ok(Json(snapshot).into_response());
    }

    let frames = relay(query, upstream.shape, upstream.body);
    Ok((
        [
            (CONTENT_TYPE, HeaderValue::from_static(NDJSON_CONTENT_TYPE)),
            (CACHE_CONTROL, HeaderValue::from_static("no-cache")),
        ],
        Body::from_stream(frames),
    )
        .into_response())
}

/// # Provider Lookup
///
/// Forwards `{ movie_id, region }` to the backend and relays its JSON answer.
async fn providers_handler(State(state): State<AppState>, body: Bytes) -> Result<Response, AppError> {
    let request = parse_body(&body)?;

    let movie_id = request.get("movie_id").filter(|value| is_present(value));
    let region = request
        .get("region")
        .and_then(Value::as_str)
        .filter(|region| !region.trim().is_empty());

    let (Some(movie_id), Some(region)) = (movie_id, region) else {
        return Err(AppError::BadRequest(PROVIDER_FIELDS_REQUIRED.to_string()));
    };

    let providers = state.backend.fetch_providers(movie_id, region).await?;
    Ok(Json(providers).into_response())
}

fn parse_body(body: &[u8]) -> Result<Value, AppError> {
    serde_json::from_slice::<Value>(body).map_err(|_| AppError::BadRequest(INVALID_BODY.to_string()))
}

/// Pulls a non-blank `query` out of a search body. The query is passed on untrimmed.
fn search_query(body: &[u8]) -> Result<String, AppError> {
    let request = parse_body(body)?;
    request
        .get("query")
        .and_then(Value::as_str)
        .filter(|query| !query.trim().is_empty())
        .map(str::to_owned)
        .ok_or_else(|| AppError::BadRequest(QUERY_REQUIRED.to_string()))
}

// null, false, 0 and "" count as missing
fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// True when the caller accepts plain JSON but not the line-delimited stream.
fn wants_buffered(headers: &HeaderMap) -> bool {
    let accept = headers
        .get_all(ACCEPT)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .collect::<Vec<_>>()
        .join(",")
        .to_ascii_lowercase();

    accept.contains("application/json") && !accept.contains(NDJSON_CONTENT_TYPE)
}
