//! Embedding catalog — the per-session snapshot of known faces.

use crate::types::{CatalogEntry, Identity};
use std::collections::HashSet;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum CatalogError {
    #[error("identity {0} has an empty embedding")]
    EmptyEmbedding(Identity),
    #[error("identity {0} has a non-finite embedding component")]
    NonFinite(Identity),
    #[error("identity {identity} has a {actual}-dim embedding, catalog is {expected}-dim")]
    DimensionMismatch {
        identity: Identity,
        expected: usize,
        actual: usize,
    },
    #[error("identity {0} appears more than once")]
    DuplicateIdentity(Identity),
}

/// Validated, read-only set of catalog entries in load order.
///
/// Load order is significant: the matcher breaks distance ties in favour of
/// the lower index.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
    dim: Option<usize>,
}

impl Catalog {
    /// Validate entries and build the catalog.
    pub fn new(entries: Vec<CatalogEntry>) -> Result<Self, CatalogError> {
        let mut seen = HashSet::with_capacity(entries.len());
        let mut dim = None;

        for entry in &entries {
            let actual = entry.embedding.dim();
            if actual == 0 {
                return Err(CatalogError::EmptyEmbedding(entry.identity));
            }
            if !entry.embedding.is_finite() {
                return Err(CatalogError::NonFinite(entry.identity));
            }
            match dim {
                None => dim = Some(actual),
                Some(expected) if expected != actual => {
                    return Err(CatalogError::DimensionMismatch {
                        identity: entry.identity,
                        expected,
                        actual,
                    });
                }
                Some(_) => {}
            }
            if !seen.insert(entry.identity) {
                return Err(CatalogError::DuplicateIdentity(entry.identity));
            }
        }

        Ok(Self { entries, dim })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Shared embedding dimensionality, `None` for an empty catalog.
    pub fn dim(&self) -> Option<usize> {
        self.dim
    }
}
