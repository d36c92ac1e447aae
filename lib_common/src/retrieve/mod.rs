//! # Data Retrieval Module
//!
//! Networking towards the recommendation backend lives here, so the HTTP
//! surface only deals with status mapping and the aggregator only deals with
//! bytes.
//!
//! ## Contained Modules:
//!
//! - **`backend`**: [`BackendClient`], a `reqwest` client bound to the
//!   backend base URL. It opens the recommendation stream without reading it
//!   and performs the provider lookup. Calls are never retried.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Single-attempt HTTP client for the recommendation backend.
pub mod backend;

pub use backend::{
    extract_detail, BackendClient, RecommendationStream, UpstreamError, DEFAULT_BACKEND_URL,
    PROVIDERS_FALLBACK, RECOMMENDATIONS_FALLBACK,
};
