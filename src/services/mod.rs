//! Business services layer.
//!
//! This module contains the services that orchestrate the dedup engine,
//! coordinating between caller-supplied record sets, the engine in
//! [`crate::dedup`] and the filesystem.
//!
//! # Architecture
//!
//! ```text
//! Caller (CLI, UI, background task)
//!          |
//!          v
//!    Services Layer  <-- You are here
//!          |
//!          v
//!   Dedup engine, filesystem
//! ```
//!
//! # Services Overview
//!
//! - [`MergeService`]: Full multi-source merge with fuzzy deduplication
//! - [`ImportService`]: Cheap signature-based append into a merged set
//! - [`ExportService`]: Writes records as an mbox archive or `.eml` files

mod export_service;
mod import_service;
mod merge_service;

pub use export_service::{
    message_file_name, render_eml, render_mbox_message, sanitize_file_stem, ExportError,
    ExportFormat, ExportResult, ExportService, ExportSummary,
};
pub use import_service::{ImportError, ImportResult, ImportService, IncrementalResult};
pub use merge_service::{
    sort_records, DuplicateGroup, GroupReport, MergeError, MergeReport, MergeResult,
    MergeService, MergeSource,
};
