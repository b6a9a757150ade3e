//! Email record domain types.
//!
//! An [`EmailRecord`] is one message as captured by some archive. Two records
//! may describe the same underlying message with different fidelity (missing
//! headers, different line endings, lost attachments); deciding that is the
//! job of the [`crate::dedup`] engine, which never mutates a record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{MessageId, RecordId};

/// An individual email message drawn from an archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailRecord {
    /// Opaque identity, stable for the duration of one merge.
    pub id: RecordId,
    /// Sender address as captured (may include a display name).
    #[serde(default)]
    pub sender: String,
    /// Recipient header value, if captured.
    #[serde(default)]
    pub recipient: Option<String>,
    /// Subject line as captured.
    #[serde(default)]
    pub subject: String,
    /// Date header exactly as it appeared in the source.
    #[serde(default)]
    pub raw_date: String,
    /// Parsed form of `raw_date`, when it could be parsed.
    #[serde(default)]
    pub date: Option<DateTime<Utc>>,
    /// Plain text body.
    #[serde(default)]
    pub body: String,
    /// RFC 5322 Message-ID header.
    #[serde(default)]
    pub message_id: Option<MessageId>,
    /// Message-ID of the email this is replying to.
    #[serde(default)]
    pub in_reply_to: Option<MessageId>,
    /// Chain of Message-IDs for threading.
    #[serde(default)]
    pub references: Vec<MessageId>,
    /// Attachment descriptors that survived extraction.
    #[serde(default)]
    pub attachments: Vec<AttachmentDescriptor>,
}

/// A file attachment known to be part of a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentDescriptor {
    /// Original filename.
    pub filename: String,
    /// Size in bytes, when known.
    #[serde(default)]
    pub size_bytes: Option<u64>,
}

impl AttachmentDescriptor {
    /// Creates a descriptor with an unknown size.
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            size_bytes: None,
        }
    }

    /// Creates a descriptor with a known size.
    pub fn with_size(filename: impl Into<String>, size_bytes: u64) -> Self {
        Self {
            filename: filename.into(),
            size_bytes: Some(size_bytes),
        }
    }
}

impl EmailRecord {
    /// Creates a record with a freshly generated identity and no optional fields.
    pub fn new(
        sender: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: RecordId::generate(),
            sender: sender.into(),
            recipient: None,
            subject: subject.into(),
            raw_date: String::new(),
            date: None,
            body: body.into(),
            message_id: None,
            in_reply_to: None,
            references: Vec::new(),
            attachments: Vec::new(),
        }
    }

    /// Replaces the identity.
    pub fn with_id(mut self, id: impl Into<RecordId>) -> Self {
        self.id = id.into();
        self
    }

    /// Sets the recipient header.
    pub fn with_recipient(mut self, recipient: impl Into<String>) -> Self {
        self.recipient = Some(recipient.into());
        self
    }

    /// Sets the raw date header and parses it when possible.
    ///
    /// RFC 2822 is tried first; the lenient mail date parser handles the
    /// malformed variants real archives are full of.
    pub fn with_date(mut self, raw_date: impl Into<String>) -> Self {
        self.raw_date = raw_date.into();
        self.date = parse_mail_date(&self.raw_date);
        if self.date.is_none() && !self.raw_date.trim().is_empty() {
            tracing::debug!(raw_date = %self.raw_date, "unparseable date header");
        }
        self
    }

    /// Sets the parsed date directly, deriving the raw header from it when absent.
    pub fn with_parsed_date(mut self, date: DateTime<Utc>) -> Self {
        if self.raw_date.is_empty() {
            self.raw_date = date.to_rfc2822();
        }
        self.date = Some(date);
        self
    }

    /// Sets the Message-ID header.
    pub fn with_message_id(mut self, message_id: impl Into<MessageId>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    /// Sets the In-Reply-To header.
    pub fn with_in_reply_to(mut self, in_reply_to: impl Into<MessageId>) -> Self {
        self.in_reply_to = Some(in_reply_to.into());
        self
    }

    /// Sets the References chain.
    pub fn with_references(mut self, references: Vec<MessageId>) -> Self {
        self.references = references;
        self
    }

    /// Appends an attachment descriptor.
    pub fn with_attachment(mut self, attachment: AttachmentDescriptor) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// Returns the Message-ID if it is present and non-blank.
    pub fn usable_message_id(&self) -> Option<&MessageId> {
        self.message_id.as_ref().filter(|id| !id.is_blank())
    }
}

/// Month abbreviations a lenient date must mention.
const MONTHS: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];

/// Parses a mail Date header into UTC.
///
/// Returns `None` for text that is not a date. The lenient parser maps
/// unrecognized input to the epoch, so it is only consulted for strings
/// carrying a month name plus a day and a year.
pub fn parse_mail_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(date) = DateTime::parse_from_rfc2822(raw) {
        return Some(date.with_timezone(&Utc));
    }
    if !looks_like_date(raw) {
        return None;
    }
    mailparse::dateparse(raw)
        .ok()
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
}

/// True if `raw` names a month and has at least two numeric groups.
fn looks_like_date(raw: &str) -> bool {
    let lower = raw.to_ascii_lowercase();
    let has_month = lower
        .split(|c: char| !c.is_ascii_alphabetic())
        .any(|word| word.len() >= 3 && MONTHS.iter().any(|m| word.starts_with(m)));
    let numeric_groups = lower
        .split(|c: char| !c.is_ascii_digit())
        .filter(|group| !group.is_empty())
        .count();
    has_month && numeric_groups >= 2
}
