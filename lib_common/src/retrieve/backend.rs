//! # Recommendation Backend Client
//!
//! A thin asynchronous wrapper around `reqwest` for the two backend calls the
//! gateway makes. Every call is a single attempt: non-success statuses come
//! back as [`UpstreamError::Status`] carrying the backend's own status code and
//! a readable message, so the HTTP layer can pass both through unchanged.

use bytes::Bytes;
use futures_util::stream::{BoxStream, StreamExt};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Response, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::aggregator::{BodyShape, NDJSON_CONTENT_TYPE};

/// Backend used when nothing else is configured (local development).
pub const DEFAULT_BACKEND_URL: &str = "http://localhost:8000";
/// Streaming recommendation endpoint, relative to the base URL.
pub const RECOMMENDATIONS_PATH: &str = "api/movies/recommendations";
/// Provider lookup endpoint, relative to the base URL.
pub const PROVIDERS_PATH: &str = "api/providers/";
/// Message used when a failed recommendation call carries no `detail`.
pub const RECOMMENDATIONS_FALLBACK: &str = "Failed to fetch movie recommendations";
/// Message used when a failed provider call carries no `detail`.
pub const PROVIDERS_FALLBACK: &str = "Failed to fetch providers";

/// Failures talking to the backend.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    /// The backend answered with a non-success status.
    #[error("backend responded {status}: {message}")]
    Status {
        /// Status code to pass through to the caller.
        status: u16,
        /// The backend's `detail`, or a generic message.
        message: String,
    },
    /// The request could not be sent or its response could not be read.
    #[error("backend request failed: {0}")]
    Transport(#[from] reqwest::Error),
    /// The configured base URL cannot address an endpoint.
    #[error("invalid backend url: {0}")]
    Url(#[from] url::ParseError),
}

/// An open recommendation response, not yet read.
pub struct RecommendationStream {
    /// How the body is framed.
    pub shape: BodyShape,
    /// The raw body. Dropping it closes the backend connection.
    pub body: BoxStream<'static, Result<Bytes, reqwest::Error>>,
}

impl std::fmt::Debug for RecommendationStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecommendationStream")
            .field("shape", &self.shape)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
struct RecommendationRequest<'a> {
    query: &'a str,
}

#[derive(Serialize)]
struct ProvidersRequest<'a> {
    movie_id: &'a Value,
    region: &'a str,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    detail: Option<Value>,
}

/// HTTP client bound to one backend base URL.
#[derive(Debug, Clone)]
pub struct BackendClient {
    /// Shared connection pool.
    inner: Client,
    /// Base URL, always ending in `/` so relative paths join beneath it.
    base_url: Url,
}

impl BackendClient {
    /// Creates a client for `base_url`.
    ///
    /// # Errors
    /// Returns [`UpstreamError::Url`] if `base_url` is not an absolute URL.
    pub fn new(base_url: &str) -> Result<Self, UpstreamError> {
        Self::with_client(Client::new(), base_url)
    }

    /// Creates a client reusing an existing `reqwest::Client`.
    pub fn with_client(inner: Client, base_url: &str) -> Result<Self, UpstreamError> {
        let mut url = Url::parse(base_url)?;
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        Ok(Self { inner, base_url: url })
    }

    /// The normalised base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, UpstreamError> {
        Ok(self.base_url.join(path)?)
    }

    /// Opens the recommendation stream for `query`.
    ///
    /// Only the status line and headers are read here; the body is handed
    /// back unread so the caller controls how fast it is consumed.
    pub async fn open_recommendations(&self, query: &str) -> Result<RecommendationStream, UpstreamError> {
        let url = self.endpoint(RECOMMENDATIONS_PATH)?;
        tracing::debug!(%url, "Opening recommendation stream");

        let response = self
            .inner
            .post(url)
            .header(ACCEPT, format!("{}, application/json", NDJSON_CONTENT_TYPE))
            .json(&RecommendationRequest { query })
            .send()
            .await?;
        let response = check_status(response, RECOMMENDATIONS_FALLBACK).await?;

        let shape = BodyShape::from_content_type(
            response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|value| value.to_str().ok()),
        );

        Ok(RecommendationStream {
            shape,
            body: response.bytes_stream().boxed(),
        })
    }

    /// Looks up streaming providers for one movie in one region.
    ///
    /// The backend's JSON answer is returned as-is.
    pub async fn fetch_providers(&self, movie_id: &Value, region: &str) -> Result<Value, UpstreamError> {
        let url = self.endpoint(PROVIDERS_PATH)?;
        tracing::debug!(%url, %movie_id, region, "Fetching providers");

        let response = self
            .inner
            .post(url)
            .json(&ProvidersRequest { movie_id, region })
            .send()
            .await?;
        let response = check_status(response, PROVIDERS_FALLBACK).await?;

        Ok(response.json::<Value>().await?)
    }
}

/// Turns a non-success response into [`UpstreamError::Status`].
async fn check_status(response: Response, fallback: &str) -> Result<Response, UpstreamError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = match response.bytes().await {
        Ok(body) => body,
        Err(e) => {
            tracing::warn!(status = status.as_u16(), error = %e, "Failed to read backend error body");
            Bytes::new()
        }
    };
    let message = extract_detail(&body, fallback);
    tracing::warn!(status = status.as_u16(), %message, "Backend returned an error status");

    Err(UpstreamError::Status {
        status: status.as_u16(),
        message,
    })
}

/// Reads the human-readable `detail` out of a backend error body.
///
/// A string `detail` is used as-is. Numbers, `true` and structured details
/// (lists of validation errors, say) are rendered as compact JSON. Missing,
/// empty, `null`, `false` and zero details fall back.
pub fn extract_detail(body: &[u8], fallback: &str) -> String {
    let detail = serde_json::from_slice::<ErrorBody>(body)
        .ok()
        .and_then(|parsed| parsed.detail);

    match detail {
        Some(Value::String(text)) if !text.is_empty() => text,
        Some(Value::Number(n)) if n.as_f64() != Some(0.0) => n.to_string(),
        Some(value @ (Value::Bool(true) | Value::Array(_) | Value::Object(_))) => value.to_string(),
        _ => fallback.to_string(),
    }
}
