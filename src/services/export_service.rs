//! Export service for writing merged records to disk.
//!
//! Two formats are supported:
//!
//! - **mbox**: one stream; each message starts with a `From ` separator line,
//!   then the reconstructed headers, a blank line and the body (mboxrd
//!   quoting), and ends with a blank line.
//! - **eml**: one file per message in a directory, named
//!   `<index>_<sanitized subject>.eml`, with CRLF-terminated headers.
//!
//! Every file is written to a temporary file beside its destination and
//! renamed into place only when complete, so a failed or cancelled export
//! never leaves a truncated file over earlier output. Per-message exports
//! stage every file before renaming any of them.

use std::fmt;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::{NamedTempFile, TempPath};
use thiserror::Error;

use crate::config::ConfigError;
use crate::domain::EmailRecord;
use crate::progress::{Phase, RunControl};

/// Longest sanitized subject used in a per-message file name.
const MAX_FILE_STEM_CHARS: usize = 50;

/// Characters that are not allowed in file names on common filesystems.
const ILLEGAL_FILE_CHARS: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// Separator date used when a record carries no date at all.
const EPOCH_ASCTIME: &str = "Thu Jan  1 00:00:00 1970";

/// Errors that can occur during export.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("cannot create directory {}: {source}", path.display())]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot move finished export into place at {}: {source}", path.display())]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{} exists and is not a directory", .0.display())]
    NotADirectory(PathBuf),

    #[error("export to {} cancelled", .0.display())]
    Cancelled(PathBuf),
}

impl ExportError {
    /// The path the failure refers to.
    pub fn path(&self) -> &Path {
        match self {
            ExportError::CreateDirectory { path, .. }
            | ExportError::Write { path, .. }
            | ExportError::Persist { path, .. } => path,
            ExportError::NotADirectory(path) | ExportError::Cancelled(path) => path,
        }
    }
}

/// Result type for export operations.
pub type ExportResult<T> = Result<T, ExportError>;

/// Output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    /// Single mbox archive container.
    #[default]
    Mbox,
    /// One `.eml` file per message.
    Eml,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Mbox => "mbox",
            ExportFormat::Eml => "eml",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mbox" | "archive" => Ok(ExportFormat::Mbox),
            "eml" | "files" | "per-message" | "per_message" => Ok(ExportFormat::Eml),
            _ => Err(ConfigError::UnknownFormat(s.to_string())),
        }
    }
}

/// What an export wrote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportSummary {
    pub format: ExportFormat,
    pub records_written: usize,
    /// Files created, in record order.
    pub paths: Vec<PathBuf>,
}

/// Writes record collections to disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExportService;

impl ExportService {
    /// Creates a new ExportService.
    pub fn new() -> Self {
        Self
    }

    /// Writes `records` to `destination` in `format`.
    ///
    /// For mbox, `destination` is the archive file; for eml it is the
    /// directory receiving one file per record. Missing parent directories
    /// are created.
    ///
    /// Cancellation or a write error leaves existing files untouched. For
    /// eml, files are renamed into place only after all of them are written;
    /// a rename failing partway through leaves the earlier renames applied
    /// and is reported as [`ExportError::Persist`].
    pub fn export(
        &self,
        records: &[EmailRecord],
        destination: impl AsRef<Path>,
        format: ExportFormat,
        control: &RunControl,
    ) -> ExportResult<ExportSummary> {
        let destination = destination.as_ref();
        tracing::info!(
            records = records.len(),
            destination = %destination.display(),
            %format,
            "starting export"
        );

        let paths = match format {
            ExportFormat::Mbox => {
                export_mbox(records, destination, control)?;
                vec![destination.to_path_buf()]
            }
            ExportFormat::Eml => export_eml(records, destination, control)?,
        };

        tracing::info!(files = paths.len(), "export complete");
        Ok(ExportSummary {
            format,
            records_written: records.len(),
            paths,
        })
    }
}

fn export_mbox(records: &[EmailRecord], path: &Path, control: &RunControl) -> ExportResult<()> {
    let parent = parent_dir(path);
    ensure_dir(&parent)?;

    let write_err = |source| ExportError::Write {
        path: path.to_path_buf(),
        source,
    };
    let temp = NamedTempFile::new_in(&parent).map_err(write_err)?;
    let mut writer = BufWriter::new(temp);
    let mut tracker = control.tracker(Phase::Exporting, records.len());

    for (i, record) in records.iter().enumerate() {
        if control.checkpoint().is_err() {
            return Err(ExportError::Cancelled(path.to_path_buf()));
        }
        writer
            .write_all(render_mbox_message(record).as_bytes())
            .map_err(write_err)?;
        tracker.update(i + 1);
    }
    tracker.finish();

    let temp = writer
        .into_inner()
        .map_err(|e| write_err(e.into_error()))?;
    persist(temp, path)
}

fn export_eml(
    records: &[EmailRecord],
    dir: &Path,
    control: &RunControl,
) -> ExportResult<Vec<PathBuf>> {
    if dir.exists() && !dir.is_dir() {
        return Err(ExportError::NotADirectory(dir.to_path_buf()));
    }
    ensure_dir(dir)?;

    let mut tracker = control.tracker(Phase::Exporting, records.len());
    let mut staged: Vec<(TempPath, PathBuf)> = Vec::with_capacity(records.len());

    for (i, record) in records.iter().enumerate() {
        if control.checkpoint().is_err() {
            return Err(ExportError::Cancelled(dir.to_path_buf()));
        }
        let path = dir.join(message_file_name(i + 1, &record.subject));
        let write_err = |source| ExportError::Write {
            path: path.clone(),
            source,
        };

        let mut temp = NamedTempFile::new_in(dir).map_err(write_err)?;
        temp.write_all(render_eml(record).as_bytes())
            .map_err(write_err)?;
        staged.push((temp.into_temp_path(), path));
        tracker.update(i + 1);
    }

    let mut paths = Vec::with_capacity(staged.len());
    for (temp, path) in staged {
        temp.persist(&path).map_err(|e| ExportError::Persist {
            path: path.clone(),
            source: e.error,
        })?;
        tracing::debug!(path = %path.display(), "wrote message file");
        paths.push(path);
    }
    tracker.finish();

    Ok(paths)
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn ensure_dir(dir: &Path) -> ExportResult<()> {
    fs::create_dir_all(dir).map_err(|source| ExportError::CreateDirectory {
        path: dir.to_path_buf(),
        source,
    })
}

fn persist(temp: NamedTempFile, path: &Path) -> ExportResult<()> {
    temp.persist(path)
        .map(|_| ())
        .map_err(|e| ExportError::Persist {
            path: path.to_path_buf(),
            source: e.error,
        })
}

/// Renders one record as an mbox entry, including its trailing blank line.
pub fn render_mbox_message(record: &EmailRecord) -> String {
    let mut out = format!(
        "From {} {}\n",
        envelope_sender(&record.sender),
        separator_date(record)
    );
    for (name, value) in header_lines(record) {
        out.push_str(&format!("{name}: {value}\n"));
    }
    out.push('\n');

    let body = record.body.replace("\r\n", "\n");
    for line in body.lines() {
        if line.trim_start_matches('>').starts_with("From ") {
            out.push('>');
        }
        out.push_str(line);
        out.push('\n');
    }
    out.push('\n');
    out
}

/// Renders one record as a standalone message file.
pub fn render_eml(record: &EmailRecord) -> String {
    let mut out = String::new();
    for (name, value) in header_lines(record) {
        out.push_str(&format!("{name}: {value}\r\n"));
    }
    out.push_str("\r\n");
    out.push_str(&record.body);
    out
}

/// File name for the `index`-th record of a per-message export.
pub fn message_file_name(index: usize, subject: &str) -> String {
    format!("{index:04}_{}.eml", sanitize_file_stem(subject))
}

/// Replaces characters that are illegal in file names and truncates.
pub fn sanitize_file_stem(subject: &str) -> String {
    let cleaned: String = subject
        .trim()
        .chars()
        .map(|c| {
            if ILLEGAL_FILE_CHARS.contains(&c) || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .take(MAX_FILE_STEM_CHARS)
        .collect();
    let cleaned = cleaned.trim_end();

    if cleaned.is_empty() {
        "no_subject".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Headers present on the record, in output order.
fn header_lines(record: &EmailRecord) -> Vec<(&'static str, String)> {
    let mut headers = Vec::new();
    let mut push = |name: &'static str, value: &str| {
        let value = single_line(value);
        if !value.is_empty() {
            headers.push((name, value));
        }
    };

    push("From", &record.sender);
    if let Some(to) = &record.recipient {
        push("To", to);
    }
    push("Subject", &record.subject);
    push("Date", &date_header(record));
    if let Some(id) = &record.message_id {
        push("Message-ID", id.as_str());
    }
    if let Some(id) = &record.in_reply_to {
        push("In-Reply-To", id.as_str());
    }
    headers
}

fn date_header(record: &EmailRecord) -> String {
    if !record.raw_date.trim().is_empty() {
        record.raw_date.clone()
    } else {
        record.date.map(|d| d.to_rfc2822()).unwrap_or_default()
    }
}

/// Folds a header value onto one line so it cannot inject headers.
fn single_line(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Address used on the `From ` separator line.
fn envelope_sender(sender: &str) -> String {
    let address = match (sender.find('<'), sender.rfind('>')) {
        (Some(start), Some(end)) if start < end => &sender[start + 1..end],
        _ => sender.split_whitespace().next().unwrap_or(""),
    };
    let address = address.trim();
    if address.is_empty() || address.contains(char::is_whitespace) {
        "MAILER-DAEMON".to_string()
    } else {
        address.to_string()
    }
}

fn separator_date(record: &EmailRecord) -> String {
    match record.date {
        Some(date) => asctime(date),
        None if !record.raw_date.trim().is_empty() => single_line(&record.raw_date),
        None => EPOCH_ASCTIME.to_string(),
    }
}

fn asctime(date: DateTime<Utc>) -> String {
    date.format("%a %b %e %H:%M:%S %Y").to_string()
}
