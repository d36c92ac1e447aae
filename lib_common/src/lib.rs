//! # ReelStream Common Library
//!
//! Shared building blocks for the ReelStream movie-discovery gateway. The
//! library is feature gated by folder, so a consumer only compiles the parts
//! it actually uses.
//!
//! - **`admission`**: per-client fixed-window request admission.
//! - **`aggregator`**: turns a backend's line-delimited event stream into a
//!   sequence of growing, de-duplicated JSON snapshots.
//! - **`retrieve`**: the HTTP client that talks to the recommendation backend.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Per-client fixed-window admission gate.
#[cfg(feature = "admission")]
pub mod admission;

/// Incremental stream aggregation and snapshot relay.
#[cfg(feature = "aggregator")]
pub mod aggregator;

/// HTTP retrieval from the recommendation backend.
#[cfg(feature = "retrieve")]
pub mod retrieve;
