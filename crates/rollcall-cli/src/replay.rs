//! Replay frame source — pre-extracted faces read from a JSON-lines file.
//!
//! Each line is one frame:
//!
//! ```text
//! {"faces":[{"bbox":{"x":10,"y":20,"width":80,"height":90},"embedding":[0.01, ...]}]}
//! {"error":"detector timeout"}
//! ```
//!
//! A line with `error` stands in for an extractor failure on that frame.

use rollcall_core::{BoundingBox, Embedding, ExtractorError, FeatureExtractor};
use serde::Deserialize;
use std::io::BufRead;

#[derive(Debug, Clone, Deserialize)]
pub struct ReplayFace {
    pub bbox: BoundingBox,
    pub embedding: Embedding,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReplayFrame {
    #[serde(default)]
    pub faces: Vec<ReplayFace>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ReplayFrame {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            faces: Vec::new(),
            error: Some(reason.into()),
        }
    }
}

/// Iterates frames from a JSON-lines reader, skipping blank lines.
///
/// A malformed line yields a failed frame rather than ending the stream.
pub struct ReplaySource<R> {
    reader: R,
    line_no: usize,
}

impl<R: BufRead> ReplaySource<R> {
    pub fn new(reader: R) -> Self {
        Self { reader, line_no: 0 }
    }
}

impl<R: BufRead> Iterator for ReplaySource<R> {
    type Item = std::io::Result<ReplayFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut line = String::new();
        loop {
            line.clear();
            match self.reader.read_line(&mut line) {
                Ok(0) => return None,
                Ok(_) => {}
                Err(e) => return Some(Err(e)),
            }
            self.line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            let frame = serde_json::from_str(&line).unwrap_or_else(|e| {
                tracing::warn!(line = self.line_no, error = %e, "malformed replay frame");
                ReplayFrame::failed(format!("line {}: {e}", self.line_no))
            });
            return Some(Ok(frame));
        }
    }
}

/// Serves the faces stored in each replay frame.
pub struct ReplayExtractor;

impl FeatureExtractor for ReplayExtractor {
    type Frame = ReplayFrame;

    fn detect_faces(&mut self, frame: &ReplayFrame) -> Result<Vec<BoundingBox>, ExtractorError> {
        if let Some(reason) = &frame.error {
            return Err(ExtractorError::Detection(reason.clone()));
        }
        Ok(frame.faces.iter().map(|f| f.bbox.clone()).collect())
    }

    fn extract_embeddings(
        &mut self,
        frame: &ReplayFrame,
        boxes: &[BoundingBox],
    ) -> Result<Vec<Embedding>, ExtractorError> {
        if boxes.len() != frame.faces.len() {
            return Err(ExtractorError::Misaligned {
                boxes: boxes.len(),
                embeddings: frame.faces.len(),
            });
        }
        Ok(frame.faces.iter().map(|f| f.embedding.clone()).collect())
    }
}
