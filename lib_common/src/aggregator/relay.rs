//! # Snapshot Relay
//!
//! Drives one request through `Connecting → Streaming → {Completed |
//! TransportFailure}`. The relay is a pull-based stream: nothing is read from
//! the backend until the caller's transport asks for the next frame, so a slow
//! caller slows consumption of backend bytes. Dropping the relay (for instance
//! because the caller went away) drops the backend body with it, which closes
//! the outbound connection.

use std::collections::VecDeque;
use std::iter;

use bytes::{Bytes, BytesMut};
use futures_util::stream::{self, BoxStream, Stream, StreamExt};

use crate::aggregator::event::{events, parse_document, StreamEvent};
use crate::aggregator::lines::LineSplitter;
use crate::aggregator::model::Snapshot;
use crate::aggregator::state::{AggregationState, Emission};

/// Boxed error type accepted from the byte source.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// How the backend claims to have framed its successful response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyShape {
    /// One JSON event per line, emitted incrementally.
    LineDelimited,
    /// A single `{ "recommendations": [...] }` document, buffered until the end.
    Document,
}

impl BodyShape {
    /// Picks the starting shape from the backend's `Content-Type`.
    ///
    /// Only an exact `application/json` media type starts out as a document;
    /// everything else, including a missing header, is read line by line.
    pub fn from_content_type(content_type: Option<&str>) -> Self {
        let media_type = content_type
            .and_then(|value| value.split(';').next())
            .map(|value| value.trim().to_ascii_lowercase());

        match media_type.as_deref() {
            Some("application/json") => BodyShape::Document,
            _ => BodyShape::LineDelimited,
        }
    }
}

/// Terminal failures of a relay. Per-line parse problems are never reported here.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// The backend connection failed mid-stream.
    #[error("backend stream failed: {0}")]
    Transport(#[source] BoxError),
    /// A snapshot could not be serialised.
    #[error("failed to encode snapshot: {0}")]
    Encode(#[from] serde_json::Error),
}

struct Relay {
    source: BoxStream<'static, Result<Bytes, BoxError>>,
    shape: BodyShape,
    incremental: bool,
    lines: LineSplitter,
    document: BytesMut,
    state: AggregationState,
    ready: VecDeque<Bytes>,
    // Folds that left the list unchanged.
    repeats: usize,
    finished: bool,
}

impl Relay {
    fn new<S, E>(query: String, shape: BodyShape, incremental: bool, source: S) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: Into<BoxError>,
    {
        Self {
            source: source.map(|chunk| chunk.map_err(Into::into)).boxed(),
            shape,
            incremental: incremental && shape == BodyShape::LineDelimited,
            lines: LineSplitter::new(),
            document: BytesMut::new(),
            state: AggregationState::new(query),
            ready: VecDeque::new(),
            repeats: 0,
            finished: false,
        }
    }

    fn ingest(&mut self, chunk: &[u8]) -> Result<(), RelayError> {
        match self.shape {
            BodyShape::Document => {
                self.document.extend_from_slice(chunk);
                Ok(())
            }
            BodyShape::LineDelimited => {
                let lines = self.lines.push(chunk);
                self.fold(events(lines), true)
            }
        }
    }

    /// Folds whatever is left once the backend signals end-of-stream.
    ///
    /// Nothing folded here is emitted on its own; it only shows up in the
    /// closing snapshot.
    fn fold_tail(&mut self) -> Result<(), RelayError> {
        match self.shape {
            BodyShape::Document => {
                let body = self.document.split().freeze();
                match parse_document(&body) {
                    Ok(movies) => self.fold(iter::once(StreamEvent::Batch(movies)), false),
                    Err(e) => {
                        tracing::debug!(
                            error = %e,
                            query = %self.state.query(),
                            "Backend body is not one document, reading it as lines"
                        );
                        let mut splitter = LineSplitter::new();
                        let mut lines = splitter.push(&body);
                        lines.extend(splitter.finish());
                        self.fold(events(lines), false)
                    }
                }
            }
            BodyShape::LineDelimited => {
                tracing::trace!(bytes = self.lines.pending().len(), "Folding unterminated tail");
                let tail = self.lines.finish();
                self.fold(events(tail), false)
            }
        }
    }

    /// The single fold every body shape goes through. `live` events get their
    /// own frame when the relay is incremental; a batch never does.
    fn fold(&mut self, events: impl Iterator<Item = StreamEvent>, live: bool) -> Result<(), RelayError> {
        for event in events {
            let batch = matches!(event, StreamEvent::Batch(_));
            let emission = self.state.apply(event);
            if let Emission::Current { grew: false } = emission {
                self.repeats += 1;
            }
            if self.incremental && live && !batch {
                self.emit(&emission)?;
            }
        }
        Ok(())
    }

    fn emit(&mut self, emission: &Emission) -> Result<(), RelayError> {
        let frame = self.state.render(emission)?;
        self.ready.push_back(frame);
        Ok(())
    }

    async fn next_frame(&mut self) -> Option<Result<Bytes, RelayError>> {
        loop {
            if let Some(frame) = self.ready.pop_front() {
                return Some(Ok(frame));
            }
            if self.finished {
                return None;
            }

            match self.source.next().await {
                Some(Ok(chunk)) => {
                    if let Err(e) = self.ingest(&chunk) {
                        self.finished = true;
                        return Some(Err(e));
                    }
                }
                Some(Err(e)) => {
                    tracing::error!(error = %e, query = %self.state.query(), "Backend stream broke mid-response");
                    self.finished = true;
                    return Some(Err(RelayError::Transport(e)));
                }
                None => {
                    self.finished = true;
                    let closing = self
                        .fold_tail()
                        .and_then(|()| self.state.render_final().map_err(RelayError::from));
                    match closing {
                        Ok(frame) => {
                            tracing::debug!(
                                items = self.state.items().len(),
                                repeats = self.repeats,
                                query = %self.state.query(),
                                "Backend stream completed"
                            );
                            self.ready.push_back(frame);
                        }
                        Err(e) => return Some(Err(e)),
                    }
                }
            }
        }
    }
}

/// Relays a backend body as caller-facing snapshot frames.
///
/// Line-delimited bodies produce one newline-terminated frame per folded
/// event, then a final unterminated frame. Bodies labelled as a document, and
/// document lines inside any body, only show up in the final frame. A transport error from `source` ends the stream with
/// [`RelayError::Transport`] instead of a final frame.
pub fn relay<S, E>(
    query: String,
    shape: BodyShape,
    source: S,
) -> impl Stream<Item = Result<Bytes, RelayError>> + Send + 'static
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Into<BoxError>,
{
    let relay = Relay::new(query, shape, true, source);
    stream::unfold(relay, |mut relay| async move {
        let frame = relay.next_frame().await?;
        Some((frame, relay))
    })
}

/// Drains a backend body and returns only the final snapshot.
///
/// This is the buffered fallback for callers that cannot consume a stream.
pub async fn aggregate<S, E>(query: String, shape: BodyShape, source: S) -> Result<Snapshot, RelayError>
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Into<BoxError>,
{
    let mut relay = Relay::new(query, shape, false, source);
    while let Some(chunk) = relay.source.next().await {
        relay.ingest(&chunk.map_err(RelayError::Transport)?)?;
    }
    relay.fold_tail()?;
    Ok(relay.state.into_snapshot())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    fn chunks(parts: &[&str]) -> impl Stream<Item = Result<Bytes, io::Error>> + Send + 'static {
        let owned: Vec<Result<Bytes, io::Error>> = parts
            .iter()
            .map(|part| Ok(Bytes::from(part.to_string())))
            .collect();
        stream::iter(owned)
    }

    async fn collect_frames(
        shape: BodyShape,
        parts: &[&str],
    ) -> Vec<Result<Snapshot, String>> {
        relay("q".into(), shape, chunks(parts))
            .map(|frame| {
                frame
                    .map_err(|e| e.to_string())
                    .map(|bytes| serde_json::from_slice::<Snapshot>(&bytes).unwrap())
            })
            .collect()
            .await
    }

    fn counts(frames: &[Result<Snapshot, String>]) -> Vec<usize> {
        frames
            .iter()
            .map(|frame| frame.as_ref().unwrap().recommendations.len())
            .collect()
    }

    #[test]
    fn shape_follows_content_type() {
        assert_eq!(BodyShape::from_content_type(None), BodyShape::LineDelimited);
        assert_eq!(
            BodyShape::from_content_type(Some("application/x-ndjson")),
            BodyShape::LineDelimited
        );
        assert_eq!(
            BodyShape::from_content_type(Some("Application/JSON; charset=utf-8")),
            BodyShape::Document
        );
        assert_eq!(
            BodyShape::from_content_type(Some("text/plain")),
            BodyShape::LineDelimited
        );
    }

    #[tokio::test]
    async fn init_then_two_items_gives_growing_snapshots() {
        let frames = collect_frames(
            BodyShape::LineDelimited,
            &[
                "{\"type\":\"init\",\"query\":\"q\"}\n{\"type\":\"movie\",\"data\":{\"id\":1,\"title\":\"A\"}}\n",
                "{\"type\":\"movie\",\"data\":{\"id\":2,\"title\":\"B\"}}\n",
            ],
        )
        .await;

        // Three incremental snapshots plus the closing one.
        assert_eq!(counts(&frames), vec![0, 1, 2, 2]);
        assert!(frames.iter().all(|f| f.as_ref().unwrap().query == "q"));
    }

    #[tokio::test]
    async fn frames_are_terminated_except_the_last() {
        let frames: Vec<Bytes> = relay(
            "q".into(),
            BodyShape::LineDelimited,
            chunks(&["{\"type\":\"movie\",\"data\":{\"id\":1}}\n"]),
        )
        .map(Result::unwrap)
        .collect()
        .await;

        assert_eq!(frames.len(), 2);
        assert!(frames[0].ends_with(b"\n"));
        assert!(!frames[1].ends_with(b"\n"));
    }

    #[tokio::test]
    async fn duplicate_item_does_not_grow_the_list() {
        let frames = collect_frames(
            BodyShape::LineDelimited,
            &[
                "{\"type\":\"movie\",\"data\":{\"id\":1}}\n",
                "{\"type\":\"movie\",\"data\":{\"id\":1}}\n",
                "{\"type\":\"movie\",\"data\":{\"id\":2}}\n",
            ],
        )
        .await;

        assert_eq!(counts(&frames), vec![1, 1, 2, 2]);
    }

    #[tokio::test]
    async fn split_line_matches_whole_line() {
        let whole = collect_frames(
            BodyShape::LineDelimited,
            &["{\"type\":\"movie\",\"data\":{\"id\":5,\"title\":\"Split\"}}\n"],
        )
        .await;
        let split = collect_frames(
            BodyShape::LineDelimited,
            &["{\"type\":\"movie\",\"data\":{\"id\":5,\"ti", "tle\":\"Split\"}}\n"],
        )
        .await;

        assert_eq!(whole, split);
    }

    #[tokio::test]
    async fn malformed_line_between_valid_lines_is_skipped() {
        let frames = collect_frames(
            BodyShape::LineDelimited,
            &[
                "{\"type\":\"movie\",\"data\":{\"id\":1}}\n",
                "{\"type\":\"movie\",\"data\":{broken\n",
                "{\"type\":\"movie\",\"data\":{\"id\":2}}\n",
            ],
        )
        .await;

        assert_eq!(counts(&frames), vec![1, 2, 2]);
    }

    #[tokio::test]
    async fn unterminated_tail_is_folded_into_final_snapshot() {
        let frames = collect_frames(
            BodyShape::LineDelimited,
            &[
                "{\"type\":\"movie\",\"data\":{\"id\":1}}\n",
                "{\"type\":\"movie\",\"data\":{\"id\":2}}",
            ],
        )
        .await;

        assert_eq!(counts(&frames), vec![1, 2]);
    }

    #[tokio::test]
    async fn empty_body_still_gets_a_final_snapshot() {
        let frames = collect_frames(BodyShape::LineDelimited, &[]).await;
        assert_eq!(counts(&frames), vec![0]);
        assert_eq!(frames[0].as_ref().unwrap().query, "q");
    }

    #[tokio::test]
    async fn document_body_becomes_one_final_snapshot() {
        let frames = collect_frames(
            BodyShape::Document,
            &[
                "{\"recommendations\":[{\"id\":1},",
                "{\"id\":2},{\"id\":1}]}",
            ],
        )
        .await;

        assert_eq!(counts(&frames), vec![2]);
    }

    #[tokio::test]
    async fn unlabelled_document_is_recognised_by_its_content() {
        for shape in [
            BodyShape::from_content_type(None),
            BodyShape::from_content_type(Some("text/plain")),
            BodyShape::from_content_type(Some("application/x-ndjson")),
        ] {
            let bare = collect_frames(shape, &["{\"recommendations\":[{\"id\":1},", "{\"id\":2}]}"]).await;
            assert_eq!(counts(&bare), vec![2]);

            let terminated = collect_frames(shape, &["{\"recommendations\":[{\"id\":1},{\"id\":2}]}\n"]).await;
            assert_eq!(counts(&terminated), vec![2]);
        }
    }

    #[tokio::test]
    async fn event_stream_labelled_as_document_is_read_as_lines() {
        let frames = collect_frames(
            BodyShape::from_content_type(Some("application/json")),
            &[
                "{\"type\":\"init\",\"query\":\"q\"}\n{\"type\":\"movie\",\"data\":{\"id\":1}}\n",
                "{\"type\":\"movie\",\"data\":{\"id\":2}}\n{\"type\":\"movie\",\"data\":{\"id\":2}}",
            ],
        )
        .await;

        assert_eq!(counts(&frames), vec![2]);
        assert_eq!(frames[0].as_ref().unwrap().query, "q");
    }

    #[tokio::test]
    async fn aggregate_reads_mislabelled_bodies_too() {
        let from_lines = aggregate(
            "q".into(),
            BodyShape::Document,
            chunks(&["{\"type\":\"movie\",\"data\":{\"id\":1}}\n{\"type\":\"movie\",\"data\":{\"id\":2}}\n"]),
        )
        .await
        .unwrap();
        assert_eq!(from_lines.recommendations.len(), 2);

        let from_document = aggregate(
            "q".into(),
            BodyShape::LineDelimited,
            chunks(&["{\"recommendations\":[{\"id\":1},{\"id\":2},{\"id\":3}]}"]),
        )
        .await
        .unwrap();
        assert_eq!(from_document.recommendations.len(), 3);
    }

    #[tokio::test]
    async fn snapshots_that_did_not_grow_are_counted() {
        let mut relay = Relay::new(
            "q".into(),
            BodyShape::LineDelimited,
            true,
            chunks(&[
                "{\"type\":\"movie\",\"data\":{\"id\":1}}\n",
                "{\"type\":\"movie\",\"data\":{\"id\":1}}\n",
                "{\"recommendations\":[{\"id\":1}]}",
            ]),
        );
        while let Some(frame) = relay.next_frame().await {
            frame.unwrap();
        }

        assert_eq!(relay.repeats, 2);
        assert_eq!(relay.state.items().len(), 1);
        assert!(relay.lines.pending().is_empty());
    }

    #[tokio::test]
    async fn transport_failure_aborts_instead_of_completing() {
        let source = stream::iter(vec![
            Ok(Bytes::from_static(b"{\"type\":\"movie\",\"data\":{\"id\":1}}\n")),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer")),
            Ok(Bytes::from_static(b"{\"type\":\"movie\",\"data\":{\"id\":2}}\n")),
        ]);

        let frames: Vec<Result<Bytes, RelayError>> =
            relay("q".into(), BodyShape::LineDelimited, source).collect().await;

        assert_eq!(frames.len(), 2);
        assert!(frames[0].is_ok());
        assert!(matches!(frames[1], Err(RelayError::Transport(_))));
    }

    #[tokio::test]
    async fn aggregate_returns_final_state_only() {
        let snapshot = aggregate(
            "q".into(),
            BodyShape::LineDelimited,
            chunks(&[
                "{\"type\":\"init\",\"query\":\"q\"}\n",
                "{\"type\":\"movie\",\"data\":{\"id\":1}}\n{\"type\":\"movie\",\"data\":{\"id\":2}}\n",
            ]),
        )
        .await
        .unwrap();

        assert_eq!(snapshot.recommendations.len(), 2);
        assert_eq!(snapshot.query, "q");
    }

    #[tokio::test]
    async fn aggregate_surfaces_transport_failure() {
        let source = stream::iter(vec![
            Ok(Bytes::from_static(b"{\"type\":\"init\"}\n")),
            Err(io::Error::new(io::ErrorKind::UnexpectedEof, "closed")),
        ]);
        let result = aggregate("q".into(), BodyShape::LineDelimited, source).await;
        assert!(matches!(result, Err(RelayError::Transport(_))));
    }
}
