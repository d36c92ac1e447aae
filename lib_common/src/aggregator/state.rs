//! Per-request aggregation state.

use std::collections::HashSet;

use bytes::{BufMut, Bytes, BytesMut};

use crate::aggregator::event::StreamEvent;
use crate::aggregator::model::{Movie, MovieId, Snapshot, SnapshotView};

/// What a folded event asks the relay to emit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Emission {
    /// Stream start: an empty list under the backend's echoed query.
    Opened {
        /// Query to report in the opening snapshot.
        echoed_query: String,
    },
    /// An item or batch event: the whole current list.
    Current {
        /// `false` when nothing new was added and the list did not grow.
        grew: bool,
    },
}

/// Items accumulated for one in-flight search.
///
/// `items` keeps arrival order and never holds two entries with the same id;
/// the first occurrence wins.
#[derive(Debug)]
pub struct AggregationState {
    items: Vec<Movie>,
    seen: HashSet<MovieId>,
    query: String,
}

impl AggregationState {
    /// Starts an empty aggregation for `query`.
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            items: Vec::new(),
            seen: HashSet::new(),
            query: query.into(),
        }
    }

    /// Folds one event into the state.
    pub fn apply(&mut self, event: StreamEvent) -> Emission {
        match event {
            StreamEvent::Init { echoed_query } => Emission::Opened {
                echoed_query: echoed_query.unwrap_or_else(|| self.query.clone()),
            },
            StreamEvent::Item(movie) => Emission::Current {
                grew: self.insert(movie),
            },
            StreamEvent::Batch(movies) => {
                let before = self.items.len();
                for movie in movies {
                    self.insert(movie);
                }
                Emission::Current {
                    grew: self.items.len() > before,
                }
            }
        }
    }

    fn insert(&mut self, movie: Movie) -> bool {
        let fresh = self.seen.insert(movie.id().clone());
        if fresh {
            self.items.push(movie);
        } else {
            tracing::debug!(id = %movie.id(), "Dropping duplicate recommendation");
        }
        fresh
    }

    /// Items folded so far.
    pub fn items(&self) -> &[Movie] {
        &self.items
    }

    /// The caller's query.
    pub fn query(&self) -> &str {
        &self.query
    }

    /// Renders the snapshot an emission calls for, newline-terminated.
    pub fn render(&self, emission: &Emission) -> Result<Bytes, serde_json::Error> {
        let view = match emission {
            Emission::Opened { echoed_query } => SnapshotView {
                recommendations: &[],
                query: echoed_query,
            },
            Emission::Current { .. } => self.view(),
        };
        encode(&view, true)
    }

    /// Renders the closing snapshot, without a terminator.
    pub fn render_final(&self) -> Result<Bytes, serde_json::Error> {
        encode(&self.view(), false)
    }

    /// Consumes the state into an owned snapshot.
    pub fn into_snapshot(self) -> Snapshot {
        Snapshot {
            recommendations: self.items,
            query: self.query,
        }
    }

    fn view(&self) -> SnapshotView<'_> {
        SnapshotView {
            recommendations: &self.items,
            query: &self.query,
        }
    }
}

fn encode(view: &SnapshotView<'_>, terminated: bool) -> Result<Bytes, serde_json::Error> {
    let mut writer = BytesMut::new().writer();
    serde_json::to_writer(&mut writer, view)?;
    let mut buf = writer.into_inner();
    if terminated {
        buf.put_u8(b'\n');
    }
    Ok(buf.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(json: &str) -> StreamEvent {
        StreamEvent::Item(Movie::from_json(json).unwrap())
    }

    fn text(bytes: Bytes) -> String {
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn init_emits_empty_list_with_echoed_query() {
        let mut state = AggregationState::new("caller query");
        state.apply(item(r#"{"id":1}"#));

        let emission = state.apply(StreamEvent::Init {
            echoed_query: Some("backend query".into()),
        });
        assert_eq!(
            text(state.render(&emission).unwrap()),
            "{\"recommendations\":[],\"query\":\"backend query\"}\n"
        );

        let emission = state.apply(StreamEvent::Init { echoed_query: None });
        assert_eq!(
            emission,
            Emission::Opened {
                echoed_query: "caller query".into()
            }
        );
    }

    #[test]
    fn items_accumulate_in_arrival_order() {
        let mut state = AggregationState::new("q");
        state.apply(item(r#"{"id":3,"title":"c"}"#));
        state.apply(item(r#"{"id":1,"title":"a"}"#));
        let emission = state.apply(item(r#"{"id":2,"title":"b"}"#));

        assert_eq!(emission, Emission::Current { grew: true });
        assert_eq!(
            text(state.render(&emission).unwrap()),
            "{\"recommendations\":[{\"id\":3,\"title\":\"c\"},{\"id\":1,\"title\":\"a\"},{\"id\":2,\"title\":\"b\"}],\"query\":\"q\"}\n"
        );
    }

    #[test]
    fn duplicate_keeps_first_occurrence() {
        let mut state = AggregationState::new("q");
        state.apply(item(r#"{"id":1,"title":"first"}"#));
        let emission = state.apply(item(r#"{"id":1,"title":"second"}"#));

        assert_eq!(emission, Emission::Current { grew: false });
        assert_eq!(state.items().len(), 1);
        assert_eq!(state.items()[0].raw().get(), r#"{"id":1,"title":"first"}"#);
    }

    #[test]
    fn batch_merges_behind_earlier_items() {
        let mut state = AggregationState::new("q");
        state.apply(item(r#"{"id":1}"#));

        let batch = ["{\"id\":1}", "{\"id\":2}", "{\"id\":2}"]
            .into_iter()
            .map(|json| Movie::from_json(json).unwrap())
            .collect();
        assert_eq!(state.apply(StreamEvent::Batch(batch)), Emission::Current { grew: true });
        assert_eq!(state.items().len(), 2);

        let repeat = vec![Movie::from_json(r#"{"id":2}"#).unwrap()];
        assert_eq!(state.apply(StreamEvent::Batch(repeat)), Emission::Current { grew: false });
    }

    #[test]
    fn final_render_has_no_terminator() {
        let mut state = AggregationState::new("q");
        state.apply(item(r#"{"id":9}"#));
        let rendered = text(state.render_final().unwrap());
        assert_eq!(rendered, "{\"recommendations\":[{\"id\":9}],\"query\":\"q\"}");

        let snapshot = state.into_snapshot();
        assert_eq!(snapshot.query, "q");
        assert_eq!(snapshot.recommendations.len(), 1);
    }
}
