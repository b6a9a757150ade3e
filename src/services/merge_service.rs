//! Merge service for combining several archives into one collection.
//!
//! The [`MergeService`] concatenates its sources, clusters near-duplicates,
//! keeps the most complete record of each cluster, orders the survivors and
//! reports what was removed and why.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{MergeOptions, SortOrder};
use crate::dedup::{
    normalize_sender, normalize_subject, DuplicateGrouper, QualityRanker, SimilarityScorer,
};
use crate::domain::{EmailRecord, RecordId};
use crate::progress::{Cancelled, RunControl};

/// Errors that can occur during a merge.
#[derive(Debug, Error)]
pub enum MergeError {
    /// The caller cancelled the merge.
    #[error("merge cancelled")]
    Cancelled,

    /// The background worker running the merge failed.
    #[error("background merge failed: {0}")]
    Worker(String),
}

impl From<Cancelled> for MergeError {
    fn from(_: Cancelled) -> Self {
        MergeError::Cancelled
    }
}

/// One input archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeSource {
    /// Human-readable label, e.g. a file name.
    pub label: String,
    /// Records in archive order.
    pub records: Vec<EmailRecord>,
}

impl MergeSource {
    pub fn new(label: impl Into<String>, records: Vec<EmailRecord>) -> Self {
        Self {
            label: label.into(),
            records,
        }
    }

    /// Wraps unlabeled record lists as "Source 1", "Source 2", ...
    pub fn numbered(lists: Vec<Vec<EmailRecord>>) -> Vec<Self> {
        lists
            .into_iter()
            .enumerate()
            .map(|(i, records)| Self::new(format!("Source {}", i + 1), records))
            .collect()
    }
}

/// Records judged to be copies of one message.
#[derive(Debug, Clone, PartialEq)]
pub struct DuplicateGroup {
    /// Members in input order.
    pub records: Vec<EmailRecord>,
    /// Position of the kept record in `records`.
    pub survivor_index: usize,
}

impl DuplicateGroup {
    /// The record kept in the merged output.
    pub fn survivor(&self) -> &EmailRecord {
        &self.records[self.survivor_index]
    }

    /// The records dropped in favor of the survivor.
    pub fn removed(&self) -> impl Iterator<Item = &EmailRecord> {
        self.records
            .iter()
            .enumerate()
            .filter(move |(i, _)| *i != self.survivor_index)
            .map(|(_, r)| r)
    }
}

/// Outcome of a merge.
#[derive(Debug, Clone, Default)]
pub struct MergeResult {
    /// Deduplicated, ordered records.
    pub records: Vec<EmailRecord>,
    /// Records across all sources before deduplication.
    pub total_before: usize,
    /// Records in `records`.
    pub total_after: usize,
    /// `total_before - total_after`.
    pub duplicates_removed: usize,
    /// Every collapsed group, for audit.
    pub duplicate_groups: Vec<DuplicateGroup>,
    /// Source label per record identity; empty unless provenance was kept.
    pub source_labels: HashMap<RecordId, String>,
}

impl MergeResult {
    /// Summarizes the merge by identity, suitable for writing to disk.
    pub fn report(&self) -> MergeReport {
        let groups = self
            .duplicate_groups
            .iter()
            .map(|group| {
                let survivor = group.survivor().id.clone();
                GroupReport {
                    source: self.source_labels.get(&survivor).cloned(),
                    survivor,
                    removed: group.removed().map(|r| r.id.clone()).collect(),
                }
            })
            .collect();

        MergeReport {
            total_before: self.total_before,
            total_after: self.total_after,
            duplicates_removed: self.duplicates_removed,
            groups,
        }
    }
}

/// Serializable audit summary of a merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeReport {
    pub total_before: usize,
    pub total_after: usize,
    pub duplicates_removed: usize,
    pub groups: Vec<GroupReport>,
}

/// One collapsed group in a [`MergeReport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupReport {
    pub survivor: RecordId,
    pub removed: Vec<RecordId>,
    /// Source of the survivor, when provenance was kept.
    pub source: Option<String>,
}

/// Service that merges record sources.
///
/// Holds only read-only options; every call is independent.
///
/// # Example
///
/// ```ignore
/// let service = MergeService::new(MergeOptions::default());
/// let result = service.merge(&MergeSource::numbered(vec![a, b]), &RunControl::new())?;
/// println!("removed {} duplicates", result.duplicates_removed);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MergeService {
    options: MergeOptions,
}

impl MergeService {
    /// Creates a new MergeService.
    pub fn new(options: MergeOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &MergeOptions {
        &self.options
    }

    /// Merges `sources` into one deduplicated, ordered collection.
    ///
    /// Fails only when `control` is cancelled.
    pub fn merge(
        &self,
        sources: &[MergeSource],
        control: &RunControl,
    ) -> Result<MergeResult, MergeError> {
        let options = &self.options;
        let mut all: Vec<EmailRecord> = Vec::new();
        let mut labels: Vec<&str> = Vec::new();
        for source in sources {
            all.extend(source.records.iter().cloned());
            labels.extend(std::iter::repeat(source.label.as_str()).take(source.records.len()));
        }
        let total_before = all.len();

        tracing::info!(
            sources = sources.len(),
            records = total_before,
            dedup = options.remove_duplicates,
            threshold = options.duplicate_threshold.value(),
            "starting merge"
        );

        let mut source_labels = HashMap::new();
        if options.preserve_source_info {
            for (record, label) in all.iter().zip(&labels) {
                source_labels
                    .entry(record.id.clone())
                    .or_insert_with(|| (*label).to_string());
            }
        }

        let mut removed: HashSet<usize> = HashSet::new();
        let mut duplicate_groups = Vec::new();

        if options.remove_duplicates {
            let grouper = DuplicateGrouper::new(
                SimilarityScorer::new(options.similarity),
                options.duplicate_threshold,
            )
            .with_strategy(options.clustering)
            .with_parallel(options.parallel);
            let ranker = QualityRanker::new(options.quality);

            for cluster in grouper.group(&all, control)? {
                let members: Vec<&EmailRecord> = cluster.iter().map(|&i| &all[i]).collect();
                let survivor_index = ranker.survivor(&members).unwrap_or(0);

                for (pos, &i) in cluster.iter().enumerate() {
                    if pos != survivor_index {
                        removed.insert(i);
                    }
                }

                tracing::debug!(
                    survivor = %members[survivor_index].id,
                    size = members.len(),
                    "collapsed duplicate group"
                );
                duplicate_groups.push(DuplicateGroup {
                    records: members.into_iter().cloned().collect(),
                    survivor_index,
                });
            }
        }

        let mut records: Vec<EmailRecord> = all
            .into_iter()
            .enumerate()
            .filter(|(i, _)| !removed.contains(i))
            .map(|(_, r)| r)
            .collect();
        sort_records(&mut records, options.sort_order);

        let total_after = records.len();
        tracing::info!(
            total_before,
            total_after,
            groups = duplicate_groups.len(),
            "merge complete"
        );

        Ok(MergeResult {
            records,
            total_before,
            total_after,
            duplicates_removed: total_before - total_after,
            duplicate_groups,
            source_labels,
        })
    }

    /// Runs [`merge`](Self::merge) on the blocking thread pool.
    pub async fn merge_in_background(
        self: Arc<Self>,
        sources: Vec<MergeSource>,
        control: RunControl,
    ) -> Result<MergeResult, MergeError> {
        tokio::task::spawn_blocking(move || self.merge(&sources, &control))
            .await
            .map_err(|e| MergeError::Worker(e.to_string()))?
    }
}

/// Orders records in place. Every order is stable.
pub fn sort_records(records: &mut [EmailRecord], order: SortOrder) {
    match order {
        SortOrder::DateAscending => records.sort_by(|a, b| a.date.cmp(&b.date)),
        SortOrder::DateDescending => records.sort_by(|a, b| b.date.cmp(&a.date)),
        SortOrder::Sender => records.sort_by_cached_key(|r| normalize_sender(&r.sender)),
        SortOrder::Subject => records.sort_by_cached_key(|r| normalize_subject(&r.subject)),
        SortOrder::None => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AttachmentDescriptor;
    use chrono::{Duration, TimeZone, Utc};

    fn at(minutes: i64) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 2, 1, 12, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    fn make_record(id: &str, subject: &str, minutes: i64) -> EmailRecord {
        EmailRecord::new("ops@example.com", subject, format!("details about {subject}"))
            .with_id(id)
            .with_parsed_date(at(minutes))
    }

    fn options() -> MergeOptions {
        MergeOptions::default()
    }

    #[test]
    fn merges_duplicates_across_sources() {
        let a = vec![make_record("a1", "Deploy window", 0)];
        let b = vec![
            make_record("b1", "Deploy window", 0),
            make_record("b2", "Incident review", 300),
        ];
        let service = MergeService::new(options());
        let result = service
            .merge(&MergeSource::numbered(vec![a, b]), &RunControl::new())
            .unwrap();

        assert_eq!(result.total_before, 3);
        assert_eq!(result.total_after, 2);
        assert_eq!(result.duplicates_removed, 1);
        assert_eq!(result.duplicate_groups.len(), 1);
        assert_eq!(result.duplicate_groups[0].records.len(), 2);
    }

    #[test]
    fn survivor_is_most_complete_copy() {
        let plain = make_record("plain", "Contract", 0);
        let rich = make_record("rich", "Contract", 0)
            .with_attachment(AttachmentDescriptor::new("contract.pdf"));

        let service = MergeService::new(options());
        let result = service
            .merge(
                &MergeSource::numbered(vec![vec![plain], vec![rich]]),
                &RunControl::new(),
            )
            .unwrap();

        assert_eq!(result.records.len(), 1);
        assert_eq!(result.records[0].id, RecordId::from("rich"));
        let group = &result.duplicate_groups[0];
        assert_eq!(group.survivor().id, RecordId::from("rich"));
        assert_eq!(group.removed().count(), 1);
    }

    #[test]
    fn disabled_dedup_keeps_everything() {
        let records = vec![make_record("1", "Same", 0), make_record("2", "Same", 0)];
        let service = MergeService::new(
            MergeOptions::builder()
                .remove_duplicates(false)
                .build()
                .unwrap(),
        );
        let result = service
            .merge(&MergeSource::numbered(vec![records]), &RunControl::new())
            .unwrap();

        assert_eq!(result.total_after, 2);
        assert_eq!(result.duplicates_removed, 0);
        assert!(result.duplicate_groups.is_empty());
    }

    #[test]
    fn date_orders_put_undated_first_then_last() {
        let undated = EmailRecord::new("x@example.com", "undated", "zzz").with_id("u");
        let records = vec![
            make_record("late", "late", 90),
            undated,
            make_record("early", "early", 10),
        ];

        let mut asc = records.clone();
        sort_records(&mut asc, SortOrder::DateAscending);
        let ids: Vec<_> = asc.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["u", "early", "late"]);

        let mut desc = records;
        sort_records(&mut desc, SortOrder::DateDescending);
        let ids: Vec<_> = desc.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["late", "early", "u"]);
    }

    #[test]
    fn sender_and_subject_orders_use_normalized_text() {
        let mut records = vec![
            EmailRecord::new("Zed@example.com", "Re: beta", "").with_id("1"),
            EmailRecord::new("amy@example.com", "Gamma", "").with_id("2"),
            EmailRecord::new("  bob@example.com", "alpha", "").with_id("3"),
        ];

        sort_records(&mut records, SortOrder::Sender);
        let ids: Vec<_> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["2", "3", "1"]);

        sort_records(&mut records, SortOrder::Subject);
        let ids: Vec<_> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["3", "1", "2"]);
    }

    #[test]
    fn none_order_keeps_survivor_positions() {
        let records = vec![
            make_record("first", "Topic A", 50),
            make_record("second", "Topic B", 5),
            make_record("third", "Topic A", 50)
                .with_attachment(AttachmentDescriptor::new("a.txt")),
        ];
        let service = MergeService::new(
            MergeOptions::builder()
                .sort_order(SortOrder::None)
                .build()
                .unwrap(),
        );
        let result = service
            .merge(&MergeSource::numbered(vec![records]), &RunControl::new())
            .unwrap();

        let ids: Vec<_> = result.records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["second", "third"]);
    }

    #[test]
    fn source_labels_follow_options() {
        let sources = vec![
            MergeSource::new("inbox.mbox", vec![make_record("a", "One", 0)]),
            MergeSource::new("backup.mbox", vec![make_record("b", "Two", 500)]),
        ];

        let with = MergeService::new(options())
            .merge(&sources, &RunControl::new())
            .unwrap();
        assert_eq!(with.source_labels[&RecordId::from("a")], "inbox.mbox");
        assert_eq!(with.source_labels[&RecordId::from("b")], "backup.mbox");

        let without = MergeService::new(
            MergeOptions::builder()
                .preserve_source_info(false)
                .build()
                .unwrap(),
        )
        .merge(&sources, &RunControl::new())
        .unwrap();
        assert!(without.source_labels.is_empty());
    }

    #[test]
    fn report_lists_groups_by_identity() {
        let sources = vec![
            MergeSource::new("a", vec![make_record("x", "Hello", 0)]),
            MergeSource::new("b", vec![make_record("y", "Hello", 0)]),
        ];
        let result = MergeService::new(options())
            .merge(&sources, &RunControl::new())
            .unwrap();
        let report = result.report();

        assert_eq!(report.duplicates_removed, 1);
        assert_eq!(report.groups.len(), 1);
        assert_eq!(report.groups[0].survivor, RecordId::from("x"));
        assert_eq!(report.groups[0].removed, vec![RecordId::from("y")]);
        assert_eq!(report.groups[0].source.as_deref(), Some("a"));
    }

    #[test]
    fn cancelled_merge_returns_error() {
        let token = crate::progress::CancellationToken::new();
        token.cancel();
        let control = RunControl::new().with_cancellation(token);
        let sources = MergeSource::numbered(vec![vec![make_record("1", "s", 0)]]);

        let err = MergeService::new(options()).merge(&sources, &control).unwrap_err();
        assert!(matches!(err, MergeError::Cancelled));
    }

    #[tokio::test]
    async fn merge_in_background_matches_sync_merge() {
        let sources = MergeSource::numbered(vec![
            vec![make_record("1", "Standup", 0)],
            vec![make_record("2", "Standup", 0), make_record("3", "Retro", 200)],
        ]);
        let service = Arc::new(MergeService::new(options()));

        let background = Arc::clone(&service)
            .merge_in_background(sources.clone(), RunControl::new())
            .await
            .unwrap();
        let direct = service.merge(&sources, &RunControl::new()).unwrap();

        assert_eq!(background.records, direct.records);
        assert_eq!(background.total_after, 2);
    }
}
