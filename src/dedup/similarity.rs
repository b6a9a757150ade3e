//! Multi-signal similarity between two email records.
//!
//! The score is a weighted combination of four signals, each in `[0, 1]`:
//!
//! | Signal   | Rule                                                          |
//! |----------|---------------------------------------------------------------|
//! | subject  | 1.0 for identical normalized subjects, else word Jaccard      |
//! | sender   | 1.0 for identical normalized senders, else 0.0                |
//! | temporal | 1.0 within 60 s, 0.5 within an hour, else 0.0                 |
//! | body     | word Jaccard over the first 500 folded characters             |
//!
//! Two records sharing a Message-ID short-circuit to 1.0. Missing fields
//! contribute zero for their signal. Every rule is symmetric, so
//! `score(a, b) == score(b, a)` holds bit for bit.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::normalize::{char_prefix, normalize_body, normalize_sender, normalize_subject};
use crate::config::ConfigError;
use crate::domain::{EmailRecord, MessageId};

/// Characters of each body compared by the body signal.
const BODY_EXCERPT_CHARS: usize = 500;

/// Timestamps this close count as the same moment.
const SAME_MOMENT_SECS: i64 = 60;

/// Timestamps this close still count as nearby.
const NEARBY_SECS: i64 = 3600;

/// Allowed drift of the weight sum from 1.0.
const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// Relative weight of each signal in the combined score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawWeights", into = "RawWeights")]
pub struct SimilarityWeights {
    subject: f64,
    sender: f64,
    temporal: f64,
    body: f64,
}

impl Default for SimilarityWeights {
    fn default() -> Self {
        Self {
            subject: 0.3,
            sender: 0.2,
            temporal: 0.2,
            body: 0.3,
        }
    }
}

impl SimilarityWeights {
    /// Creates a weight set.
    ///
    /// Weights must be finite, non-negative and sum to 1 so the combined
    /// score stays in `[0, 1]`.
    pub fn new(subject: f64, sender: f64, temporal: f64, body: f64) -> Result<Self, ConfigError> {
        let all = [subject, sender, temporal, body];
        if all.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(ConfigError::InvalidWeights(format!(
                "weights must be finite and non-negative, got {all:?}"
            )));
        }
        let sum: f64 = all.iter().sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(ConfigError::InvalidWeights(format!(
                "weights must sum to 1.0, got {sum}"
            )));
        }
        Ok(Self {
            subject,
            sender,
            temporal,
            body,
        })
    }

    pub fn subject(&self) -> f64 {
        self.subject
    }

    pub fn sender(&self) -> f64 {
        self.sender
    }

    pub fn temporal(&self) -> f64 {
        self.temporal
    }

    pub fn body(&self) -> f64 {
        self.body
    }
}

/// Serialized form of [`SimilarityWeights`], validated on the way in.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct RawWeights {
    subject: f64,
    sender: f64,
    temporal: f64,
    body: f64,
}

impl TryFrom<RawWeights> for SimilarityWeights {
    type Error = ConfigError;

    fn try_from(raw: RawWeights) -> Result<Self, Self::Error> {
        Self::new(raw.subject, raw.sender, raw.temporal, raw.body)
    }
}

impl From<SimilarityWeights> for RawWeights {
    fn from(w: SimilarityWeights) -> Self {
        Self {
            subject: w.subject,
            sender: w.sender,
            temporal: w.temporal,
            body: w.body,
        }
    }
}

/// Per-signal scores behind a combined similarity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignalScores {
    pub subject: f64,
    pub sender: f64,
    pub temporal: f64,
    pub body: f64,
}

/// Similarity of two records in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimilarityScore {
    /// Combined weighted score.
    pub value: f64,
    /// Signals that produced `value`; `None` when a shared Message-ID
    /// decided the match without looking at anything else.
    pub signals: Option<SignalScores>,
}

impl SimilarityScore {
    fn message_id_match() -> Self {
        Self {
            value: 1.0,
            signals: None,
        }
    }

    /// Returns true if the score came from the Message-ID fast path.
    pub fn is_message_id_match(&self) -> bool {
        self.signals.is_none()
    }
}

/// Comparable view of a record, normalized once and reused across pairs.
#[derive(Debug, Clone)]
pub struct RecordFeatures<'a> {
    message_id: Option<&'a MessageId>,
    subject: String,
    subject_words: HashSet<String>,
    sender: String,
    date: Option<DateTime<Utc>>,
    body_words: HashSet<String>,
}

impl<'a> RecordFeatures<'a> {
    /// Extracts the comparable features of a record.
    pub fn extract(record: &'a EmailRecord) -> Self {
        let subject = normalize_subject(&record.subject);
        let subject_words = words(&subject);
        let body = normalize_body(char_prefix(&record.body, BODY_EXCERPT_CHARS));

        Self {
            message_id: record.usable_message_id(),
            subject_words,
            subject,
            sender: normalize_sender(&record.sender),
            date: record.date,
            body_words: words(&body),
        }
    }
}

fn words(text: &str) -> HashSet<String> {
    text.split_whitespace().map(str::to_owned).collect()
}

/// Jaccard index of two word sets; two empty sets share nothing.
fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    let intersection = small.iter().filter(|w| large.contains(*w)).count();
    let union = a.len() + b.len() - intersection;
    intersection as f64 / union as f64
}

/// Scores pairs of records with a fixed weight set.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimilarityScorer {
    weights: SimilarityWeights,
}

impl SimilarityScorer {
    /// Creates a scorer with the given weights.
    pub fn new(weights: SimilarityWeights) -> Self {
        Self { weights }
    }

    /// Returns the weights in use.
    pub fn weights(&self) -> &SimilarityWeights {
        &self.weights
    }

    /// Scores two records.
    pub fn score(&self, a: &EmailRecord, b: &EmailRecord) -> SimilarityScore {
        self.score_features(&RecordFeatures::extract(a), &RecordFeatures::extract(b))
    }

    /// Scores two pre-extracted feature sets.
    pub fn score_features(&self, a: &RecordFeatures<'_>, b: &RecordFeatures<'_>) -> SimilarityScore {
        if let (Some(x), Some(y)) = (a.message_id, b.message_id) {
            if x == y {
                return SimilarityScore::message_id_match();
            }
        }

        let signals = SignalScores {
            subject: subject_signal(a, b),
            sender: if !a.sender.is_empty() && a.sender == b.sender {
                1.0
            } else {
                0.0
            },
            temporal: temporal_signal(a.date, b.date),
            body: jaccard(&a.body_words, &b.body_words),
        };

        let w = &self.weights;
        let value = w.subject * signals.subject
            + w.sender * signals.sender
            + w.temporal * signals.temporal
            + w.body * signals.body;

        SimilarityScore {
            value: value.clamp(0.0, 1.0),
            signals: Some(signals),
        }
    }
}

fn subject_signal(a: &RecordFeatures<'_>, b: &RecordFeatures<'_>) -> f64 {
    if !a.subject.is_empty() && a.subject == b.subject {
        1.0
    } else {
        jaccard(&a.subject_words, &b.subject_words)
    }
}

fn temporal_signal(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> f64 {
    let (Some(a), Some(b)) = (a, b) else {
        return 0.0;
    };
    let delta = (a - b).num_seconds().abs();
    if delta <= SAME_MOMENT_SECS {
        1.0
    } else if delta <= NEARBY_SECS {
        0.5
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn base_date() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 10, 1, 9, 0, 0).unwrap()
    }

    fn make_record(subject: &str, body: &str) -> EmailRecord {
        EmailRecord::new("cfo@example.com", subject, body).with_parsed_date(base_date())
    }

    #[test]
    fn shared_message_id_scores_one() {
        let a = EmailRecord::new("a@x", "one", "alpha").with_message_id("msg-1");
        let b = EmailRecord::new("b@y", "two", "beta").with_message_id("msg-1");

        let score = SimilarityScorer::default().score(&a, &b);
        assert_eq!(score.value, 1.0);
        assert!(score.is_message_id_match());
    }

    #[test]
    fn different_message_ids_fall_back_to_signals() {
        let a = make_record("Report", "same body").with_message_id("msg-1");
        let b = make_record("Report", "same body").with_message_id("msg-2");

        let score = SimilarityScorer::default().score(&a, &b);
        assert!(!score.is_message_id_match());
        assert!((score.value - 1.0).abs() < 1e-9);
    }

    #[test]
    fn identical_records_without_ids_score_one() {
        let a = make_record("Quarterly numbers", "please review the attached numbers");
        let b = a.clone();
        let score = SimilarityScorer::default().score(&a, &b);
        assert!((score.value - 1.0).abs() < 1e-9);
    }

    #[test]
    fn reply_marker_keeps_subject_signal() {
        let a = make_record("Q4 Budget", "numbers attached");
        let b = make_record("Re: Q4 Budget", "numbers attached");
        let signals = SimilarityScorer::default().score(&a, &b).signals.unwrap();
        assert_eq!(signals.subject, 1.0);
    }

    #[test]
    fn subject_jaccard_for_partial_overlap() {
        let a = make_record("budget review meeting", "");
        let b = make_record("budget review", "");
        let signals = SimilarityScorer::default().score(&a, &b).signals.unwrap();
        assert!((signals.subject - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn sender_is_exact_after_normalization() {
        let a = EmailRecord::new("Alice@Example.com ", "s", "b");
        let b = EmailRecord::new("alice@example.com", "s", "b");
        let c = EmailRecord::new("alice@example.org", "s", "b");
        let scorer = SimilarityScorer::default();

        assert_eq!(scorer.score(&a, &b).signals.unwrap().sender, 1.0);
        assert_eq!(scorer.score(&a, &c).signals.unwrap().sender, 0.0);
    }

    #[test]
    fn temporal_buckets() {
        let t = base_date();
        assert_eq!(temporal_signal(Some(t), Some(t + Duration::seconds(60))), 1.0);
        assert_eq!(temporal_signal(Some(t), Some(t + Duration::seconds(61))), 0.5);
        assert_eq!(temporal_signal(Some(t), Some(t - Duration::hours(1))), 0.5);
        assert_eq!(temporal_signal(Some(t), Some(t + Duration::seconds(3601))), 0.0);
        assert_eq!(temporal_signal(Some(t), None), 0.0);
        assert_eq!(temporal_signal(None, None), 0.0);
    }

    #[test]
    fn unparseable_dates_contribute_nothing() {
        let a = EmailRecord::new("a@x.com", "Lunch", "see you").with_date("unknown");
        let b = EmailRecord::new("a@x.com", "Lunch", "see you at noon").with_date("n/a");

        let score = SimilarityScorer::default().score(&a, &b);
        let signals = score.signals.unwrap();
        assert_eq!(signals.temporal, 0.0);
        assert!(score.value < 0.85, "score was {}", score.value);
    }

    #[test]
    fn body_only_compares_first_500_chars() {
        let prefix = "word ".repeat(100);
        let a = make_record("s", &format!("{prefix}apples oranges"));
        let b = make_record("s", &format!("{prefix}pears plums"));
        let signals = SimilarityScorer::default().score(&a, &b).signals.unwrap();
        assert_eq!(signals.body, 1.0);
    }

    #[test]
    fn body_is_case_folded() {
        let a = make_record("s", "Hello World");
        let b = make_record("s", "hello world");
        let signals = SimilarityScorer::default().score(&a, &b).signals.unwrap();
        assert_eq!(signals.body, 1.0);
    }

    #[test]
    fn missing_fields_contribute_zero() {
        let a = EmailRecord::new("", "", "");
        let b = EmailRecord::new("", "", "");
        let score = SimilarityScorer::default().score(&a, &b);
        assert_eq!(score.value, 0.0);
    }

    #[test]
    fn score_is_symmetric() {
        let a = make_record("Lunch plans", "are we still on for noon");
        let b = EmailRecord::new("someone@else.com", "Fwd: lunch", "still on for noon?")
            .with_parsed_date(base_date() + Duration::minutes(20));
        let scorer = SimilarityScorer::default();
        assert_eq!(scorer.score(&a, &b), scorer.score(&b, &a));
    }

    #[test]
    fn custom_weights_change_the_score() {
        let a = make_record("alpha", "one two");
        let b = EmailRecord::new("cfo@example.com", "beta", "three four")
            .with_parsed_date(base_date());
        let sender_only = SimilarityWeights::new(0.0, 1.0, 0.0, 0.0).unwrap();
        let score = SimilarityScorer::new(sender_only).score(&a, &b);
        assert_eq!(score.value, 1.0);
    }

    #[test]
    fn weights_must_sum_to_one() {
        assert!(SimilarityWeights::new(0.5, 0.5, 0.5, 0.5).is_err());
        assert!(SimilarityWeights::new(-0.1, 0.5, 0.3, 0.3).is_err());
        assert!(SimilarityWeights::new(f64::NAN, 0.5, 0.3, 0.2).is_err());
        assert!(SimilarityWeights::new(0.25, 0.25, 0.25, 0.25).is_ok());
    }

    #[test]
    fn weights_reject_invalid_json() {
        let bad = r#"{"subject":0.9,"sender":0.9,"temporal":0.0,"body":0.0}"#;
        assert!(serde_json::from_str::<SimilarityWeights>(bad).is_err());

        let good = r#"{"subject":0.4,"sender":0.1,"temporal":0.2,"body":0.3}"#;
        let weights: SimilarityWeights = serde_json::from_str(good).unwrap();
        assert_eq!(weights.subject(), 0.4);
    }
}
