use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Key of an enrolled person (the student USN in the bundled store).
///
/// "Unknown" is never an `Identity`; unmatched faces carry `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(pub i64);

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Bounding box for a detected face, in full-frame pixel coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    #[serde(default = "default_box_confidence")]
    pub confidence: f32,
}

fn default_box_confidence() -> f32 {
    1.0
}

/// Face embedding vector (128-dimensional for dlib-style extractors).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// True when every component is a finite number.
    pub fn is_finite(&self) -> bool {
        self.values.iter().all(|v| v.is_finite())
    }

    /// Compute Euclidean distance between two embeddings.
    ///
    /// Accumulates in `f64`; callers must check dimensions first since
    /// extra components on either side are ignored.
    pub fn euclidean_distance(&self, other: &Embedding) -> f64 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| {
                let d = f64::from(*a) - f64::from(*b);
                d * d
            })
            .sum::<f64>()
            .sqrt()
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(values: Vec<f32>) -> Self {
        Self { values }
    }
}

/// A known identity and its reference embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub identity: Identity,
    pub embedding: Embedding,
}

/// Result of matching one query embedding against the catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    /// Matched identity, `None` when the query is unknown.
    pub identity: Option<Identity>,
    /// Distance to the nearest catalog entry (`+inf` for an empty catalog).
    pub distance: f64,
    /// Confidence percentage in [0, 100]; 0 when unknown.
    pub confidence: f64,
}

impl MatchResult {
    pub fn unknown(distance: f64) -> Self {
        Self {
            identity: None,
            distance,
            confidence: 0.0,
        }
    }

    pub fn is_known(&self) -> bool {
        self.identity.is_some()
    }
}

/// A recorded admission. Appended to the store, never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct AttendanceEvent {
    pub identity: Identity,
    pub at: DateTime<Local>,
}

/// What the display sink draws for one face.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FaceOverlay {
    pub bbox: BoundingBox,
    pub label: String,
}
