//! # Incremental Stream Aggregator
//!
//! Consumes the recommendation backend's response and re-emits it to the
//! caller as a sequence of growing JSON snapshots.
//!
//! ## Pipeline
//!
//! ```text
//! backend bytes ─► LineSplitter ─► parse_line ─► StreamEvent ─┐
//!                                                             ├─► AggregationState::apply ─► snapshot frames
//! backend JSON document ─► parse_document ─► StreamEvent::Batch ┘
//! ```
//!
//! Both body shapes feed one fold, and the bytes decide which parser reads
//! them: a document line inside a stream and a line stream labelled as a
//! document both still yield their items. Lines that fail to parse are logged and
//! dropped; they never end the stream. Snapshots always carry the whole
//! accumulated item list, so the latest one is enough for a caller to
//! resynchronise.
//!
//! Snapshot frames are newline-terminated, except the final one, which marks
//! completion.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Parsing of individual stream lines and JSON documents into events.
pub mod event;
/// Splitting of raw byte chunks into complete lines.
pub mod lines;
/// Movie payloads and the snapshot wire format.
pub mod model;
/// The per-request stream relay.
pub mod relay;
/// The de-duplicating, order-preserving fold.
pub mod state;

pub use event::{events, parse_document, parse_line, ParseSkip, StreamEvent};
pub use lines::LineSplitter;
pub use model::{Movie, MovieId, Snapshot};
pub use relay::{aggregate, relay, BodyShape, RelayError};
pub use state::{AggregationState, Emission};

/// Media type of the caller-facing snapshot stream.
pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";
