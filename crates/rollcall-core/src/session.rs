//! Recognition session — owns the catalog, seen set, frame scheduler and
//! configuration, and drives one frame at a time through
//! match → score → admit.

use crate::admission::{AdmissionController, Decision};
use crate::catalog::{Catalog, CatalogError};
use crate::config::{ConfigError, PipelineConfig};
use crate::matcher::{EuclideanMatcher, MatchError, Matcher};
use crate::scheduler::FrameScheduler;
use crate::types::{
    AttendanceEvent, BoundingBox, CatalogEntry, Embedding, FaceOverlay, Identity, MatchResult,
};
use chrono::{DateTime, Local, NaiveDate};
use std::collections::HashMap;
use thiserror::Error;

/// Label drawn for faces that match nobody.
pub const UNKNOWN_LABEL: &str = "UNKNOWN";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExtractorError {
    #[error("face detection failed: {0}")]
    Detection(String),
    #[error("embedding extraction failed: {0}")]
    Embedding(String),
    #[error("extractor returned {embeddings} embeddings for {boxes} faces")]
    Misaligned { boxes: usize, embeddings: usize },
    #[error("embedding for face {face} has non-finite values")]
    NonFinite { face: usize },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("identity {0} not found")]
    NotFound(Identity),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("config: {0}")]
    Config(#[from] ConfigError),
    #[error("catalog: {0}")]
    Catalog(#[from] CatalogError),
    #[error("matcher: {0}")]
    Match(#[from] MatchError),
    #[error("store: {0}")]
    Store(#[from] StoreError),
}

/// Upstream face detector and embedding extractor.
pub trait FeatureExtractor {
    type Frame;

    fn detect_faces(&mut self, frame: &Self::Frame) -> Result<Vec<BoundingBox>, ExtractorError>;

    /// Embeddings aligned by index with `boxes`.
    fn extract_embeddings(
        &mut self,
        frame: &Self::Frame,
        boxes: &[BoundingBox],
    ) -> Result<Vec<Embedding>, ExtractorError>;
}

/// Persistent side of the pipeline.
pub trait AttendanceStore {
    fn load_catalog(&self) -> Result<Vec<CatalogEntry>, StoreError>;

    fn record_attendance(&self, event: &AttendanceEvent) -> Result<(), StoreError>;

    /// `Ok(None)` when the identity has no record.
    fn resolve_display_name(&self, identity: Identity) -> Result<Option<String>, StoreError>;

    /// Identities with at least one attendance event on `date` (local).
    fn admitted_on(&self, date: NaiveDate) -> Result<Vec<Identity>, StoreError>;
}

/// Overlay renderer. Receives, never feeds back.
pub trait DisplaySink {
    fn render(&mut self, overlays: &[FaceOverlay], fps: f64);
}

/// An admission whose event could not be stored. The identity stays seen.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistenceFailure {
    pub identity: Identity,
    pub error: StoreError,
}

/// Outcome of one `process_frame` call.
#[derive(Debug, Clone, Default)]
pub struct FrameReport {
    /// False when the scheduler skipped recognition and overlays were held over.
    pub processed: bool,
    pub overlays: Vec<FaceOverlay>,
    /// Match results for this frame, in face order. Empty on skipped frames.
    pub matches: Vec<MatchResult>,
    /// Events recorded by the store during this frame.
    pub events: Vec<AttendanceEvent>,
    pub failures: Vec<PersistenceFailure>,
}

pub struct RecognitionSession<M: Matcher = EuclideanMatcher> {
    config: PipelineConfig,
    catalog: Catalog,
    matcher: M,
    admission: AdmissionController,
    scheduler: FrameScheduler,
    overlays: Vec<FaceOverlay>,
    labels: HashMap<Identity, String>,
}

impl RecognitionSession<EuclideanMatcher> {
    /// Validate config, load the catalog and open the session at `now`.
    pub fn start<S: AttendanceStore>(
        config: PipelineConfig,
        store: &S,
        now: DateTime<Local>,
    ) -> Result<Self, PipelineError> {
        Self::with_matcher(config, EuclideanMatcher, store, now)
    }
}

impl<M: Matcher> RecognitionSession<M> {
    pub fn with_matcher<S: AttendanceStore>(
        config: PipelineConfig,
        matcher: M,
        store: &S,
        now: DateTime<Local>,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        let catalog = load_catalog(store)?;

        let mut admission = AdmissionController::new(
            config.window,
            config.min_confidence,
            config.window_check,
            now,
        );

        if config.seed_seen_from_store {
            let today = now.date_naive();
            match store.admitted_on(today) {
                Ok(ids) => {
                    tracing::info!(
                        count = ids.len(),
                        %today,
                        "seeded seen set from stored attendance"
                    );
                    admission.seed(ids);
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        "could not read today's attendance; seen set starts empty"
                    );
                }
            }
        }

        Ok(Self {
            scheduler: FrameScheduler::new(config.frame_stride),
            config,
            catalog,
            matcher,
            admission,
            overlays: Vec::new(),
            labels: HashMap::new(),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    /// Overlays from the most recent processed frame.
    pub fn overlays(&self) -> &[FaceOverlay] {
        &self.overlays
    }

    /// Swap in a fresh catalog snapshot between frames. The seen set is kept.
    pub fn reload_catalog<S: AttendanceStore>(
        &mut self,
        store: &S,
    ) -> Result<usize, PipelineError> {
        self.catalog = load_catalog(store)?;
        self.labels.clear();
        Ok(self.catalog.len())
    }

    pub fn process_frame<E, S>(
        &mut self,
        extractor: &mut E,
        store: &S,
        frame: &E::Frame,
    ) -> Result<FrameReport, PipelineError>
    where
        E: FeatureExtractor,
        S: AttendanceStore,
    {
        self.process_frame_at(extractor, store, frame, Local::now())
    }

    /// Process one frame with an explicit clock reading.
    ///
    /// A dimension mismatch is reported before any face of the frame is
    /// admitted, so a failing frame never leaves partial events behind.
    pub fn process_frame_at<E, S>(
        &mut self,
        extractor: &mut E,
        store: &S,
        frame: &E::Frame,
        now: DateTime<Local>,
    ) -> Result<FrameReport, PipelineError>
    where
        E: FeatureExtractor,
        S: AttendanceStore,
    {
        let process = self.scheduler.should_process();
        self.scheduler.advance();

        if !process {
            return Ok(FrameReport {
                processed: false,
                overlays: self.overlays.clone(),
                ..Default::default()
            });
        }

        let faces = match extract_faces(extractor, frame) {
            Ok(faces) => faces,
            Err(e) => {
                tracing::warn!(error = %e, "extractor failed; treating frame as empty");
                Vec::new()
            }
        };

        if let Some(expected) = self.catalog.dim() {
            if let Some((_, bad)) = faces.iter().find(|(_, emb)| emb.dim() != expected) {
                return Err(MatchError::DimensionMismatch {
                    expected,
                    actual: bad.dim(),
                }
                .into());
            }
        }

        let mut report = FrameReport {
            processed: true,
            ..Default::default()
        };

        for (bbox, embedding) in faces {
            let result = self
                .matcher
                .compare(&embedding, &self.catalog, self.config.match_threshold)?;

            if let Some(identity) = result.identity {
                match self.admission.consider(identity, result.confidence, now) {
                    Decision::Admitted(event) => match store.record_attendance(&event) {
                        Ok(()) => report.events.push(event),
                        Err(error) => {
                            tracing::warn!(
                                %identity,
                                error = %error,
                                "failed to record attendance"
                            );
                            report.failures.push(PersistenceFailure { identity, error });
                        }
                    },
                    Decision::Rejected(reason) => {
                        tracing::trace!(
                            %identity,
                            confidence = result.confidence,
                            %reason,
                            "match not admitted"
                        );
                    }
                }
            }

            let label = self.label_for(store, result.identity);
            report.overlays.push(FaceOverlay { bbox, label });
            report.matches.push(result);
        }

        self.overlays = report.overlays.clone();
        Ok(report)
    }

    fn label_for<S: AttendanceStore>(&mut self, store: &S, identity: Option<Identity>) -> String {
        let Some(identity) = identity else {
            return UNKNOWN_LABEL.to_string();
        };
        if let Some(label) = self.labels.get(&identity) {
            return label.clone();
        }
        match store.resolve_display_name(identity) {
            Ok(name) => {
                let label = name
                    .as_deref()
                    .and_then(display_label)
                    .unwrap_or_else(|| format!("#{identity}"));
                self.labels.insert(identity, label.clone());
                label
            }
            Err(e) => {
                tracing::warn!(%identity, error = %e, "could not resolve display name");
                format!("#{identity}")
            }
        }
    }
}

/// First word of the name, upper-cased, so it fits under a face box.
pub fn display_label(name: &str) -> Option<String> {
    name.split_whitespace().next().map(str::to_uppercase)
}

fn load_catalog<S: AttendanceStore>(store: &S) -> Result<Catalog, PipelineError> {
    let catalog = Catalog::new(store.load_catalog()?)?;
    if catalog.is_empty() {
        tracing::warn!("catalog is empty; every face will be reported as unknown");
    } else {
        tracing::info!(entries = catalog.len(), dim = ?catalog.dim(), "catalog loaded");
    }
    Ok(catalog)
}

fn extract_faces<E: FeatureExtractor>(
    extractor: &mut E,
    frame: &E::Frame,
) -> Result<Vec<(BoundingBox, Embedding)>, ExtractorError> {
    let boxes = extractor.detect_faces(frame)?;
    if boxes.is_empty() {
        return Ok(Vec::new());
    }
    let embeddings = extractor.extract_embeddings(frame, &boxes)?;
    if embeddings.len() != boxes.len() {
        return Err(ExtractorError::Misaligned {
            boxes: boxes.len(),
            embeddings: embeddings.len(),
        });
    }
    if let Some(face) = embeddings.iter().position(|e| !e.is_finite()) {
        return Err(ExtractorError::NonFinite { face });
    }
    Ok(boxes.into_iter().zip(embeddings).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::WindowCheck;
    use chrono::TimeZone;
    use std::cell::{Cell, RefCell};

    type Faces = Vec<(BoundingBox, Embedding)>;

    /// Frames are pre-computed faces, or an error string.
    struct FakeExtractor;

    impl FeatureExtractor for FakeExtractor {
        type Frame = Result<Faces, String>;

        fn detect_faces(
            &mut self,
            frame: &Self::Frame,
        ) -> Result<Vec<BoundingBox>, ExtractorError> {
            match frame {
                Ok(faces) => Ok(faces.iter().map(|(b, _)| b.clone()).collect()),
                Err(e) => Err(ExtractorError::Detection(e.clone())),
            }
        }

        fn extract_embeddings(
            &mut self,
            frame: &Self::Frame,
            _boxes: &[BoundingBox],
        ) -> Result<Vec<Embedding>, ExtractorError> {
            match frame {
                Ok(faces) => Ok(faces.iter().map(|(_, e)| e.clone()).collect()),
                Err(e) => Err(ExtractorError::Embedding(e.clone())),
            }
        }
    }

    #[derive(Default)]
    struct FakeStore {
        entries: Vec<CatalogEntry>,
        names: HashMap<Identity, String>,
        recorded: RefCell<Vec<AttendanceEvent>>,
        fail_record: Cell<bool>,
        today: Vec<Identity>,
        name_lookups: Cell<usize>,
    }

    impl AttendanceStore for FakeStore {
        fn load_catalog(&self) -> Result<Vec<CatalogEntry>, StoreError> {
            Ok(self.entries.clone())
        }

        fn record_attendance(&self, event: &AttendanceEvent) -> Result<(), StoreError> {
            if self.fail_record.get() {
                return Err(StoreError::Unavailable("disk full".into()));
            }
            self.recorded.borrow_mut().push(event.clone());
            Ok(())
        }

        fn resolve_display_name(&self, identity: Identity) -> Result<Option<String>, StoreError> {
            self.name_lookups.set(self.name_lookups.get() + 1);
            Ok(self.names.get(&identity).cloned())
        }

        fn admitted_on(&self, _date: NaiveDate) -> Result<Vec<Identity>, StoreError> {
            Ok(self.today.clone())
        }
    }

    fn e1() -> Embedding {
        Embedding::new(vec![0.1, 0.2, 0.3, 0.4])
    }

    fn e2() -> Embedding {
        Embedding::new(vec![0.9, 0.8, 0.1, 0.0])
    }

    fn stranger() -> Embedding {
        Embedding::new(vec![-1.0, -1.0, -1.0, -1.0])
    }

    fn bbox(x: f32) -> BoundingBox {
        BoundingBox { x, y: 10.0, width: 50.0, height: 60.0, confidence: 0.99 }
    }

    fn store() -> FakeStore {
        FakeStore {
            entries: vec![
                CatalogEntry { identity: Identity(1), embedding: e1() },
                CatalogEntry { identity: Identity(2), embedding: e2() },
            ],
            names: HashMap::from([
                (Identity(1), "Ada Lovelace".to_string()),
                (Identity(2), "grace hopper".to_string()),
            ]),
            ..Default::default()
        }
    }

    fn at(h: u32, m: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 4, h, m, 0).single().unwrap()
    }

    fn every_frame() -> PipelineConfig {
        PipelineConfig { frame_stride: 1, ..Default::default() }
    }

    fn step(
        session: &mut RecognitionSession,
        store: &FakeStore,
        frame: &Result<Faces, String>,
        now: DateTime<Local>,
    ) -> FrameReport {
        session.process_frame_at(&mut FakeExtractor, store, frame, now).unwrap()
    }

    #[test]
    fn test_exact_match_is_admitted_and_labelled() {
        let store = store();
        let mut session = RecognitionSession::start(every_frame(), &store, at(8, 10)).unwrap();
        let frame = Ok(vec![(bbox(0.0), e1())]);

        let report = step(&mut session, &store, &frame, at(8, 10));

        assert!(report.processed);
        assert_eq!(report.matches[0].identity, Some(Identity(1)));
        assert_eq!(report.matches[0].confidence, 97.89);
        assert_eq!(
            report.events,
            vec![AttendanceEvent { identity: Identity(1), at: at(8, 10) }]
        );
        assert_eq!(report.overlays[0].label, "ADA");
        assert_eq!(store.recorded.borrow().len(), 1);
    }

    #[test]
    fn test_at_most_one_event_per_identity() {
        let store = store();
        let mut session = RecognitionSession::start(every_frame(), &store, at(8, 10)).unwrap();
        let frame = Ok(vec![(bbox(0.0), e1()), (bbox(100.0), e1())]);

        for minute in 10..15 {
            step(&mut session, &store, &frame, at(8, minute));
        }

        assert_eq!(store.recorded.borrow().len(), 1);
        assert!(session.admission().has_seen(Identity(1)));
    }

    #[test]
    fn test_events_follow_face_order() {
        let store = store();
        let mut session = RecognitionSession::start(every_frame(), &store, at(8, 10)).unwrap();
        let frame = Ok(vec![
            (bbox(0.0), e2()),
            (bbox(100.0), stranger()),
            (bbox(200.0), e1()),
        ]);

        let report = step(&mut session, &store, &frame, at(8, 10));

        let ids: Vec<_> = report.events.iter().map(|e| e.identity).collect();
        assert_eq!(ids, vec![Identity(2), Identity(1)]);
        let labels: Vec<_> = report.overlays.iter().map(|o| o.label.as_str()).collect();
        assert_eq!(labels, vec!["GRACE", UNKNOWN_LABEL, "ADA"]);
    }

    #[test]
    fn test_outside_window_records_nothing() {
        let store = store();
        let mut session = RecognitionSession::start(every_frame(), &store, at(12, 0)).unwrap();
        let frame = Ok(vec![(bbox(0.0), e1())]);

        let report = step(&mut session, &store, &frame, at(12, 0));

        assert_eq!(report.matches[0].identity, Some(Identity(1)));
        assert!(report.events.is_empty());
        assert!(store.recorded.borrow().is_empty());
    }

    #[test]
    fn test_window_rechecked_per_decision() {
        let store = store();
        let mut session = RecognitionSession::start(every_frame(), &store, at(9, 29)).unwrap();
        let frame = Ok(vec![(bbox(0.0), e1())]);

        let report = step(&mut session, &store, &frame, at(9, 31));
        assert!(report.events.is_empty());
    }

    #[test]
    fn test_window_fixed_at_start() {
        let store = store();
        let config = PipelineConfig { window_check: WindowCheck::AtStart, ..every_frame() };
        let mut session = RecognitionSession::start(config, &store, at(9, 29)).unwrap();
        let frame = Ok(vec![(bbox(0.0), e1())]);

        let report = step(&mut session, &store, &frame, at(9, 31));
        assert_eq!(report.events.len(), 1);
    }

    #[test]
    fn test_skipped_frames_hold_overlays() {
        let store = store();
        let mut session =
            RecognitionSession::start(PipelineConfig::default(), &store, at(8, 10)).unwrap();
        let first = Ok(vec![(bbox(0.0), e1())]);
        let second = Ok(vec![(bbox(300.0), e2())]);

        let r1 = step(&mut session, &store, &first, at(8, 10));
        let r2 = step(&mut session, &store, &second, at(8, 10));
        let r3 = step(&mut session, &store, &second, at(8, 10));

        assert!(r1.processed);
        assert!(!r2.processed);
        assert_eq!(r2.overlays, r1.overlays);
        assert!(r2.events.is_empty());
        assert!(r3.processed);
        assert_eq!(r3.overlays[0].label, "GRACE");
        assert_eq!(session.overlays(), r3.overlays.as_slice());
    }

    #[test]
    fn test_empty_catalog_all_unknown() {
        let store = FakeStore::default();
        let mut session = RecognitionSession::start(every_frame(), &store, at(8, 10)).unwrap();
        let frame = Ok(vec![(bbox(0.0), e1())]);

        let report = step(&mut session, &store, &frame, at(8, 10));

        assert!(!report.matches[0].is_known());
        assert_eq!(report.matches[0].distance, f64::INFINITY);
        assert_eq!(report.overlays[0].label, UNKNOWN_LABEL);
        assert!(report.events.is_empty());
    }

    #[test]
    fn test_dimension_mismatch_is_fatal_and_admits_nothing() {
        let store = store();
        let mut session = RecognitionSession::start(every_frame(), &store, at(8, 10)).unwrap();
        let frame = Ok(vec![
            (bbox(0.0), e1()),
            (bbox(100.0), Embedding::new(vec![0.0; 3])),
        ]);

        let err = session
            .process_frame_at(&mut FakeExtractor, &store, &frame, at(8, 10))
            .unwrap_err();

        assert!(matches!(
            err,
            PipelineError::Match(MatchError::DimensionMismatch { expected: 4, actual: 3 })
        ));
        assert!(store.recorded.borrow().is_empty());
        assert!(!session.admission().has_seen(Identity(1)));
    }

    #[test]
    fn test_extractor_failure_is_empty_frame() {
        let store = store();
        let mut session = RecognitionSession::start(every_frame(), &store, at(8, 10)).unwrap();
        let good = Ok(vec![(bbox(0.0), e2())]);
        step(&mut session, &store, &good, at(8, 10));

        let bad: Result<Faces, String> = Err("camera glitch".into());
        let report = step(&mut session, &store, &bad, at(8, 10));

        assert!(report.processed);
        assert!(report.overlays.is_empty());
        assert!(session.overlays().is_empty());
    }

    #[test]
    fn test_non_finite_embedding_is_empty_frame() {
        let store = store();
        let mut session = RecognitionSession::start(every_frame(), &store, at(8, 10)).unwrap();
        let nan = Embedding::new(vec![f32::NAN, 0.2, 0.3, 0.4]);
        let frame = Ok(vec![(bbox(0.0), e1()), (bbox(100.0), nan)]);

        let report = step(&mut session, &store, &frame, at(8, 10));

        assert!(report.processed);
        assert!(report.matches.is_empty());
        assert!(report.events.is_empty());
        assert!(store.recorded.borrow().is_empty());
        assert!(!session.admission().has_seen(Identity(1)));

        let report = step(&mut session, &store, &Ok(vec![(bbox(0.0), e1())]), at(8, 11));
        assert_eq!(report.events.len(), 1);
    }

    #[test]
    fn test_extract_faces_rejects_non_finite() {
        let inf = Embedding::new(vec![0.1, f32::INFINITY, 0.3, 0.4]);
        let frame = Ok(vec![(bbox(0.0), e1()), (bbox(1.0), e2()), (bbox(2.0), inf)]);
        assert_eq!(
            extract_faces(&mut FakeExtractor, &frame),
            Err(ExtractorError::NonFinite { face: 2 })
        );
    }

    #[test]
    fn test_persistence_failure_keeps_identity_seen() {
        let store = store();
        store.fail_record.set(true);
        let mut session = RecognitionSession::start(every_frame(), &store, at(8, 10)).unwrap();
        let frame = Ok(vec![(bbox(0.0), e1())]);

        let report = step(&mut session, &store, &frame, at(8, 10));
        assert_eq!(
            report.failures,
            vec![PersistenceFailure {
                identity: Identity(1),
                error: StoreError::Unavailable("disk full".into())
            }]
        );
        assert!(report.events.is_empty());

        store.fail_record.set(false);
        let report = step(&mut session, &store, &frame, at(8, 11));
        assert!(report.events.is_empty());
        assert!(report.failures.is_empty());
        assert!(store.recorded.borrow().is_empty());
    }

    #[test]
    fn test_seen_set_seeded_from_today() {
        let store = FakeStore { today: vec![Identity(1)], ..store() };
        let mut session = RecognitionSession::start(every_frame(), &store, at(8, 10)).unwrap();
        let frame = Ok(vec![(bbox(0.0), e1())]);

        let report = step(&mut session, &store, &frame, at(8, 10));
        assert!(report.events.is_empty());

        let config = PipelineConfig { seed_seen_from_store: false, ..every_frame() };
        let mut session = RecognitionSession::start(config, &store, at(8, 10)).unwrap();
        let report = step(&mut session, &store, &frame, at(8, 10));
        assert_eq!(report.events.len(), 1);
    }

    #[test]
    fn test_labels_cached_until_reload() {
        let store = store();
        let mut session = RecognitionSession::start(every_frame(), &store, at(12, 0)).unwrap();
        let frame = Ok(vec![(bbox(0.0), e1())]);

        for _ in 0..3 {
            step(&mut session, &store, &frame, at(12, 0));
        }
        assert_eq!(store.name_lookups.get(), 1);

        assert_eq!(session.reload_catalog(&store).unwrap(), 2);
        step(&mut session, &store, &frame, at(12, 0));
        assert_eq!(store.name_lookups.get(), 2);
    }

    #[test]
    fn test_unnamed_identity_falls_back_to_key() {
        let store = FakeStore { names: HashMap::new(), ..store() };
        let mut session = RecognitionSession::start(every_frame(), &store, at(12, 0)).unwrap();
        let frame = Ok(vec![(bbox(0.0), e2())]);

        let report = step(&mut session, &store, &frame, at(12, 0));
        assert_eq!(report.overlays[0].label, "#2");
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = PipelineConfig { match_threshold: 1.5, ..Default::default() };
        assert!(matches!(
            RecognitionSession::start(config, &store(), at(8, 0)),
            Err(PipelineError::Config(ConfigError::MatchThreshold(_)))
        ));
    }

    #[test]
    fn test_display_label() {
        assert_eq!(display_label("Samarth Sanjay Pyati").as_deref(), Some("SAMARTH"));
        assert_eq!(display_label("   "), None);
    }
}
