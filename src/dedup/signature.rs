//! Cheap deterministic fingerprints for exact-match deduplication.
//!
//! Equal signatures mean "certainly the same message" and skip the
//! similarity scorer entirely. The converse does not hold: two copies that
//! differ cosmetically in sender, subject, date or the start of the body get
//! different signatures, and only the full merge path catches them.

use super::normalize::{char_prefix, normalize_subject};
use crate::domain::EmailRecord;

/// Characters of the normalized body included in a signature.
const BODY_PREFIX_CHARS: usize = 100;

/// Computes the record signature.
///
/// A usable Message-ID is the signature. Otherwise the signature joins the
/// lower-cased sender, normalized subject, raw date string and the first 100
/// characters of the lower-cased body with `|`. Sender and body are folded
/// but not trimmed.
pub fn signature(record: &EmailRecord) -> String {
    if let Some(message_id) = record.usable_message_id() {
        return message_id.as_str().to_owned();
    }

    let body = record.body.to_lowercase();
    format!(
        "{}|{}|{}|{}",
        record.sender.to_lowercase(),
        normalize_subject(&record.subject),
        record.raw_date,
        char_prefix(&body, BODY_PREFIX_CHARS)
    )
}
