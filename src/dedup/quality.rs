//! Data-completeness ranking used to choose a survivor among duplicates.

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::domain::EmailRecord;

/// Points awarded per completeness signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityWeights {
    /// Awarded when a usable Message-ID is present.
    pub message_id: u32,
    /// Awarded when at least one attachment descriptor is present.
    pub attachments: u32,
    /// Awarded when at least one reference identifier is present.
    pub references: u32,
    /// Body characters needed for each body point.
    pub body_chars_per_point: u32,
    /// Upper bound on body points.
    pub body_max_points: u32,
}

impl Default for QualityWeights {
    fn default() -> Self {
        Self {
            message_id: 10,
            attachments: 5,
            references: 5,
            body_chars_per_point: 100,
            body_max_points: 20,
        }
    }
}

impl QualityWeights {
    /// Checks that the weights can be applied.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.body_chars_per_point == 0 {
            return Err(ConfigError::InvalidWeights(
                "body_chars_per_point must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Orders duplicate records by completeness.
#[derive(Debug, Clone, Copy, Default)]
pub struct QualityRanker {
    weights: QualityWeights,
}

impl QualityRanker {
    pub fn new(weights: QualityWeights) -> Self {
        Self { weights }
    }

    /// Completeness score of one record.
    pub fn score(&self, record: &EmailRecord) -> u32 {
        let w = &self.weights;
        let mut score = 0;

        if record.usable_message_id().is_some() {
            score += w.message_id;
        }
        if !record.attachments.is_empty() {
            score += w.attachments;
        }
        if !record.references.is_empty() {
            score += w.references;
        }

        let body_chars = u32::try_from(record.body.chars().count()).unwrap_or(u32::MAX);
        score + (body_chars / w.body_chars_per_point.max(1)).min(w.body_max_points)
    }

    /// Returns indices into `records`, most complete first.
    ///
    /// Equal scores keep their input order.
    pub fn rank(&self, records: &[&EmailRecord]) -> Vec<usize> {
        let scores: Vec<u32> = records.iter().map(|r| self.score(r)).collect();
        let mut order: Vec<usize> = (0..records.len()).collect();
        order.sort_by(|&a, &b| scores[b].cmp(&scores[a]));
        order
    }

    /// Index of the record that should survive, or `None` for an empty slice.
    pub fn survivor(&self, records: &[&EmailRecord]) -> Option<usize> {
        self.rank(records).first().copied()
    }
}
