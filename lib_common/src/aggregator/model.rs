//! Movie payloads and snapshot types.
//!
//! The aggregator only ever looks at a movie's `id`. Everything else is kept
//! as the exact JSON text the backend sent and written back out untouched.

use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::value::RawValue;

/// Identifier of a recommended item. The backend sends integers; string ids
/// are accepted as well.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MovieId {
    /// Numeric id, the usual case.
    Number(i64),
    /// Integer id above `i64::MAX`.
    Unsigned(u64),
    /// Textual id.
    Text(String),
    /// Any other JSON number (fractional, or wider than 64 bits), keyed by
    /// its literal text.
    Literal(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PlainId {
    Number(i64),
    Unsigned(u64),
    Text(String),
}

impl MovieId {
    fn from_raw(raw: &RawValue) -> Result<Self, serde_json::Error> {
        let text = raw.get();
        match serde_json::from_str::<PlainId>(text) {
            Ok(PlainId::Number(id)) => Ok(MovieId::Number(id)),
            Ok(PlainId::Unsigned(id)) => Ok(MovieId::Unsigned(id)),
            Ok(PlainId::Text(id)) => Ok(MovieId::Text(id)),
            Err(e) => match serde_json::from_str::<serde_json::Number>(text) {
                Ok(_) => Ok(MovieId::Literal(text.to_owned())),
                Err(_) => Err(e),
            },
        }
    }
}

impl fmt::Display for MovieId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MovieId::Number(id) => write!(f, "{}", id),
            MovieId::Unsigned(id) => write!(f, "{}", id),
            MovieId::Text(id) | MovieId::Literal(id) => f.write_str(id),
        }
    }
}

/// One recommended movie: its id plus the untouched JSON object it came from.
#[derive(Debug, Clone)]
pub struct Movie {
    id: MovieId,
    raw: Box<RawValue>,
}

#[derive(Deserialize)]
struct IdField<'a> {
    #[serde(borrow)]
    id: &'a RawValue,
}

impl Movie {
    /// Wraps a raw JSON payload, reading only its `id` field.
    pub fn from_raw(raw: Box<RawValue>) -> Result<Self, serde_json::Error> {
        let field: IdField<'_> = serde_json::from_str(raw.get())?;
        let id = MovieId::from_raw(field.id)?;
        Ok(Self { id, raw })
    }

    /// Parses a movie from JSON text.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let raw: Box<RawValue> = serde_json::from_str(json)?;
        Self::from_raw(raw)
    }

    /// The identifier used for de-duplication.
    pub fn id(&self) -> &MovieId {
        &self.id
    }

    /// The payload exactly as received.
    pub fn raw(&self) -> &RawValue {
        &self.raw
    }
}

impl PartialEq for Movie {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.raw.get() == other.raw.get()
    }
}

impl Serialize for Movie {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.raw.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Movie {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Box::<RawValue>::deserialize(deserializer)?;
        Movie::from_raw(raw).map_err(D::Error::custom)
    }
}

/// One caller-facing message: the full accumulated list plus the query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Every item received so far, in arrival order, without duplicates.
    pub recommendations: Vec<Movie>,
    /// The query this result set answers.
    pub query: String,
}

/// Borrowed form of [`Snapshot`], used to serialise without cloning items.
#[derive(Debug, Serialize)]
pub(crate) struct SnapshotView<'a> {
    pub(crate) recommendations: &'a [Movie],
    pub(crate) query: &'a str,
}
