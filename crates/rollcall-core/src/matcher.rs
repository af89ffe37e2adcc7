//! Nearest-neighbour matching of query embeddings against the catalog.

use crate::catalog::Catalog;
use crate::confidence::face_confidence;
use crate::types::{Embedding, MatchResult};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatchError {
    #[error("query embedding is {actual}-dim, catalog is {expected}-dim")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Strategy for comparing a query embedding against the catalog.
pub trait Matcher {
    fn compare(
        &self,
        query: &Embedding,
        catalog: &Catalog,
        threshold: f64,
    ) -> Result<MatchResult, MatchError>;
}

/// Distance from the query to every catalog entry, in catalog order.
pub fn face_distances(catalog: &Catalog, query: &Embedding) -> Result<Vec<f64>, MatchError> {
    if let Some(expected) = catalog.dim() {
        if query.dim() != expected {
            return Err(MatchError::DimensionMismatch {
                expected,
                actual: query.dim(),
            });
        }
    }
    Ok(catalog
        .entries()
        .iter()
        .map(|entry| query.euclidean_distance(&entry.embedding))
        .collect())
}

/// Per-entry match flags: `distance <= threshold`.
pub fn compare_faces(distances: &[f64], threshold: f64) -> Vec<bool> {
    distances.iter().map(|&d| d <= threshold).collect()
}

/// Index of the smallest distance; the first one wins a tie. NaN distances
/// never win, so a non-finite query comes back unknown.
fn argmin(distances: &[f64]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, &d) in distances.iter().enumerate() {
        if d.is_nan() {
            continue;
        }
        match best {
            Some((_, best_d)) if d >= best_d => {}
            _ => best = Some((i, d)),
        }
    }
    best.map(|(i, _)| i)
}

/// Euclidean nearest-neighbour matcher.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn compare(
        &self,
        query: &Embedding,
        catalog: &Catalog,
        threshold: f64,
    ) -> Result<MatchResult, MatchError> {
        let distances = face_distances(catalog, query)?;
        let matches = compare_faces(&distances, threshold);

        let Some(idx) = argmin(&distances) else {
            return Ok(MatchResult::unknown(f64::INFINITY));
        };

        let distance = distances[idx];
        if !matches[idx] {
            return Ok(MatchResult::unknown(distance));
        }

        Ok(MatchResult {
            identity: Some(catalog.entries()[idx].identity),
            distance,
            confidence: face_confidence(distance, threshold),
        })
    }
}
