//! Stream events and their parsers.
//!
//! Parsing is a lazy sequence with skip: a malformed line or payload yields
//! no event and a `warn!` record, never a terminal failure.
//!
//! Which parser applies is decided by the bytes, not by how the backend
//! labelled them. A line holding a whole `{ "recommendations": [...] }`
//! document is read as a [`StreamEvent::Batch`].

use serde::Deserialize;
use serde_json::value::RawValue;

use crate::aggregator::model::Movie;

/// Longest slice of an offending line copied into a log record.
const LOG_PREVIEW_CHARS: usize = 200;

/// One discrete event read from the backend.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Stream start marker. Carries the query as echoed by the backend, if it sent one.
    Init {
        /// The backend's copy of the query.
        echoed_query: Option<String>,
    },
    /// One recommended item.
    Item(Movie),
    /// A complete recommendation list delivered in one document.
    Batch(Vec<Movie>),
}

/// Why a single line was dropped.
#[derive(Debug, thiserror::Error)]
pub enum ParseSkip {
    /// The line's bytes are not UTF-8.
    #[error("line is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    /// The line is not a JSON object with a `type` tag.
    #[error("line is not a JSON event: {0}")]
    Json(#[from] serde_json::Error),
    /// A `movie` event without a `data` object.
    #[error("movie event carries no data payload")]
    MissingData,
    /// A `movie` payload whose `id` is absent or unusable.
    #[error("movie payload has no usable id: {0}")]
    Payload(#[source] serde_json::Error),
}

#[derive(Deserialize)]
struct WireEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    data: Option<Box<RawValue>>,
}

#[derive(Deserialize)]
struct WireDocument {
    recommendations: Vec<Box<RawValue>>,
}

/// Parses one line of the backend stream.
///
/// Blank lines and events with an unknown `type` give `Ok(None)`. A line that
/// is not an event but is a recommendation document gives a batch.
pub fn parse_line(line: &[u8]) -> Result<Option<StreamEvent>, ParseSkip> {
    let text = std::str::from_utf8(line)?.trim();
    if text.is_empty() {
        return Ok(None);
    }

    let wire: WireEvent = match serde_json::from_str(text) {
        Ok(wire) => wire,
        Err(e) => {
            return match parse_document(text.as_bytes()) {
                Ok(movies) => Ok(Some(StreamEvent::Batch(movies))),
                Err(_) => Err(ParseSkip::Json(e)),
            };
        }
    };
    match wire.kind.as_str() {
        "init" => Ok(Some(StreamEvent::Init {
            echoed_query: wire.query,
        })),
        "movie" => {
            let data = wire.data.ok_or(ParseSkip::MissingData)?;
            let movie = Movie::from_raw(data).map_err(ParseSkip::Payload)?;
            Ok(Some(StreamEvent::Item(movie)))
        }
        other => {
            tracing::trace!(kind = other, "Ignoring stream event of unknown type");
            Ok(None)
        }
    }
}

/// Lazily turns complete lines into events, logging and dropping bad ones.
pub fn events<I, L>(lines: I) -> impl Iterator<Item = StreamEvent>
where
    I: IntoIterator<Item = L>,
    L: AsRef<[u8]>,
{
    lines
        .into_iter()
        .filter_map(|line| match parse_line(line.as_ref()) {
            Ok(event) => event,
            Err(skip) => {
                tracing::warn!(
                    error = %skip,
                    line = %preview(line.as_ref()),
                    "Skipping malformed stream line"
                );
                None
            }
        })
}

/// Parses a non-streaming `{ "recommendations": [...] }` body.
///
/// Fails when the body is not a JSON object with a `recommendations` array.
/// Individual entries without a usable id are logged and skipped.
pub fn parse_document(body: &[u8]) -> Result<Vec<Movie>, serde_json::Error> {
    let document: WireDocument = serde_json::from_slice(body)?;
    let movies = document
        .recommendations
        .into_iter()
        .filter_map(|raw| match Movie::from_raw(raw) {
            Ok(movie) => Some(movie),
            Err(e) => {
                tracing::warn!(error = %e, "Skipping recommendation without a usable id");
                None
            }
        })
        .collect();
    Ok(movies)
}

fn preview(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .chars()
        .take(LOG_PREVIEW_CHARS)
        .collect()
}
