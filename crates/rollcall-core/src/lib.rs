//! rollcall-core — Recognition-to-attendance pipeline.
//!
//! Matches per-frame face embeddings against a catalog of enrolled people,
//! scores the matches, and admits confident ones as attendance events at
//! most once per person per session.

pub mod admission;
pub mod catalog;
pub mod confidence;
pub mod config;
pub mod matcher;
pub mod scheduler;
pub mod session;
pub mod types;

pub use admission::{AdmissionController, AdmissionWindow, Decision, Rejection, WindowCheck};
pub use catalog::{Catalog, CatalogError};
pub use confidence::face_confidence;
pub use config::{parse_time_of_day, ConfigError, PipelineConfig};
pub use matcher::{EuclideanMatcher, MatchError, Matcher};
pub use scheduler::{FpsCounter, FrameScheduler};
pub use session::{
    AttendanceStore, DisplaySink, ExtractorError, FeatureExtractor, FrameReport, PersistenceFailure,
    PipelineError, RecognitionSession, StoreError,
};
pub use types::{
    AttendanceEvent, BoundingBox, CatalogEntry, Embedding, FaceOverlay, Identity, MatchResult,
};
