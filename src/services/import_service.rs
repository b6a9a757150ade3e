//! Incremental import of newly seen records into an already merged set.
//!
//! Import is the cheap append path: it fingerprints the existing records
//! once and classifies each incoming record by signature lookup, so the cost
//! is linear. It does **not** run the similarity scorer, which means a copy
//! whose sender, subject, raw date or body opening differs cosmetically from
//! the stored one is imported as new. Use it when re-scanning the same
//! source; run a full [`MergeService`](super::MergeService) merge when fuzzy
//! duplicates matter.
//!
//! Turning `signature_matching` off switches to a pairwise similarity check
//! against every existing and accepted record, trading the linear cost for
//! the recall of a full merge.

use std::collections::HashSet;
use std::sync::Arc;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::MergeOptions;
use crate::dedup::{signature, RecordFeatures, SimilarityScorer};
use crate::domain::EmailRecord;
use crate::progress::{Cancelled, Phase, RunControl};

/// Pools smaller than this are scanned on the calling thread.
const PARALLEL_MIN_POOL: usize = 256;

/// Errors that can occur during an incremental import.
#[derive(Debug, Error)]
pub enum ImportError {
    /// The caller cancelled the import.
    #[error("import cancelled")]
    Cancelled,

    /// The background worker running the import failed.
    #[error("background import failed: {0}")]
    Worker(String),
}

impl From<Cancelled> for ImportError {
    fn from(_: Cancelled) -> Self {
        ImportError::Cancelled
    }
}

/// Result type for import operations.
pub type ImportResult<T> = Result<T, ImportError>;

/// Outcome of an incremental import.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IncrementalResult {
    /// Existing records followed by the newly added ones.
    pub records: Vec<EmailRecord>,
    /// Number of incoming records added.
    pub new_emails_added: usize,
    /// Number of incoming records skipped as duplicates.
    pub duplicates_skipped: usize,
    /// Incoming records that were added, in incoming order.
    pub added: Vec<EmailRecord>,
    /// Incoming records that were skipped, in incoming order.
    pub skipped: Vec<EmailRecord>,
}

/// Service that absorbs new records into an existing collection.
#[derive(Debug, Clone, Default)]
pub struct ImportService {
    options: MergeOptions,
}

impl ImportService {
    /// Creates a new ImportService.
    pub fn new(options: MergeOptions) -> Self {
        Self { options }
    }

    /// Adds the records of `incoming` that are not already in `existing`.
    ///
    /// A record repeated within `incoming` is added once. Fails only when
    /// `control` is cancelled.
    pub fn import_incremental(
        &self,
        existing: &[EmailRecord],
        incoming: &[EmailRecord],
        control: &RunControl,
    ) -> ImportResult<IncrementalResult> {
        tracing::info!(
            existing = existing.len(),
            incoming = incoming.len(),
            signature_matching = self.options.signature_matching,
            "starting incremental import"
        );

        let mut tracker = control.tracker(Phase::Importing, incoming.len());
        let mut added = Vec::new();
        let mut skipped = Vec::new();

        if !self.options.remove_duplicates {
            added.extend_from_slice(incoming);
        } else if self.options.signature_matching {
            let mut seen: HashSet<String> = existing.iter().map(signature).collect();
            for (i, record) in incoming.iter().enumerate() {
                control.checkpoint()?;
                if seen.insert(signature(record)) {
                    added.push(record.clone());
                } else {
                    skipped.push(record.clone());
                }
                tracker.update(i + 1);
            }
        } else {
            let mut pool = FuzzyPool::new(&self.options, existing);
            for (i, record) in incoming.iter().enumerate() {
                control.checkpoint()?;
                if pool.contains(record) {
                    skipped.push(record.clone());
                } else {
                    pool.push(record);
                    added.push(record.clone());
                }
                tracker.update(i + 1);
            }
        }
        tracker.finish();

        let mut records = Vec::with_capacity(existing.len() + added.len());
        records.extend_from_slice(existing);
        records.extend(added.iter().cloned());

        tracing::info!(
            added = added.len(),
            skipped = skipped.len(),
            "incremental import complete"
        );

        Ok(IncrementalResult {
            records,
            new_emails_added: added.len(),
            duplicates_skipped: skipped.len(),
            added,
            skipped,
        })
    }

    /// Runs [`import_incremental`](Self::import_incremental) on the blocking thread pool.
    pub async fn import_in_background(
        self: Arc<Self>,
        existing: Vec<EmailRecord>,
        incoming: Vec<EmailRecord>,
        control: RunControl,
    ) -> ImportResult<IncrementalResult> {
        tokio::task::spawn_blocking(move || self.import_incremental(&existing, &incoming, &control))
            .await
            .map_err(|e| ImportError::Worker(e.to_string()))?
    }
}

/// Records already accepted, compared by similarity.
struct FuzzyPool<'a> {
    scorer: SimilarityScorer,
    threshold: f64,
    parallel: bool,
    entries: Vec<(String, RecordFeatures<'a>)>,
}

impl<'a> FuzzyPool<'a> {
    fn new(options: &MergeOptions, existing: &'a [EmailRecord]) -> Self {
        let mut pool = Self {
            scorer: SimilarityScorer::new(options.similarity),
            threshold: options.duplicate_threshold.value(),
            parallel: options.parallel,
            entries: Vec::with_capacity(existing.len()),
        };
        for record in existing {
            pool.push(record);
        }
        pool
    }

    fn push(&mut self, record: &'a EmailRecord) {
        self.entries
            .push((signature(record), RecordFeatures::extract(record)));
    }

    fn contains(&self, record: &EmailRecord) -> bool {
        let sig = signature(record);
        let features = RecordFeatures::extract(record);
        let matches = |(other_sig, other): &(String, RecordFeatures<'_>)| {
            *other_sig == sig
                || self.scorer.score_features(other, &features).value >= self.threshold
        };

        if self.parallel && self.entries.len() >= PARALLEL_MIN_POOL {
            self.entries.par_iter().any(matches)
        } else {
            self.entries.iter().any(matches)
        }
    }
}
