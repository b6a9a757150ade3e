//! Canonical forms used only for comparison, never shown to users.

/// Reply and forward markers stripped from the front of a subject.
const SUBJECT_MARKERS: [&str; 3] = ["re:", "fwd:", "fw:"];

/// Canonicalizes a subject line.
///
/// Case-folds, strips any number of leading `Re:`/`Fwd:`/`Fw:` markers and
/// collapses internal whitespace to single spaces.
pub fn normalize_subject(subject: &str) -> String {
    let folded = subject.to_lowercase();
    let mut rest = folded.trim_start();

    loop {
        let Some(marker) = SUBJECT_MARKERS.iter().find(|m| rest.starts_with(*m)) else {
            break;
        };
        rest = rest[marker.len()..].trim_start();
    }

    collapse_whitespace(rest)
}

/// Canonicalizes a sender address.
pub fn normalize_sender(sender: &str) -> String {
    sender.trim().to_lowercase()
}

/// Canonicalizes a body excerpt.
pub fn normalize_body(body: &str) -> String {
    body.trim().to_lowercase()
}

/// Joins whitespace-separated words with single spaces.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Returns at most the first `max_chars` characters of `text`.
pub fn char_prefix(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
