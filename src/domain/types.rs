//! Core identifier types for email records.
//!
//! These newtype wrappers keep record identities and RFC 5322 message
//! identifiers from being mixed up with each other or with plain strings.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identity of one email record within a merge operation.
///
/// Identities are assigned by whoever loaded the record and must stay stable
/// for the lifetime of a single merge or import call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub String);

impl RecordId {
    /// Generates a fresh random identity.
    pub fn generate() -> Self {
        Self(format!("record-{}", uuid::Uuid::new_v4()))
    }

    /// Returns the identity as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for RecordId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// RFC 5322 Message-ID header value.
///
/// Assumed globally unique per true message, which is what makes it usable
/// as an exact-match fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl MessageId {
    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the identifier carries no usable value.
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_id_display() {
        let id = RecordId("rec-1".to_string());
        assert_eq!(id.to_string(), "rec-1");
    }

    #[test]
    fn record_id_generate_is_unique() {
        let a = RecordId::generate();
        let b = RecordId::generate();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("record-"));
    }

    #[test]
    fn record_id_hash() {
        use std::collections::HashSet;
        let mut set = HashSet::new();
        set.insert(RecordId::from("rec-1"));
        assert!(set.contains(&RecordId::from("rec-1".to_string())));
    }

    #[test]
    fn message_id_from_str() {
        let id: MessageId = "<unique@example.com>".into();
        assert_eq!(id.0, "<unique@example.com>");
    }

    #[test]
    fn message_id_blank() {
        assert!(MessageId::from("   ").is_blank());
        assert!(!MessageId::from("<a@b>").is_blank());
    }

    #[test]
    fn ids_serialize_as_plain_strings() {
        let json = serde_json::to_string(&MessageId::from("msg-1")).unwrap();
        assert_eq!(json, "\"msg-1\"");
    }
}
