//! mboxmerge - Merge, deduplicate and export email archives
//!
//! This crate combines email records from several archives into a single
//! deterministically ordered collection without duplicates, with statistics
//! about what was merged and why. It also absorbs newly seen records into an
//! already merged collection cheaply, and writes results as mbox or `.eml`.

pub mod config;
pub mod dedup;
pub mod domain;
pub mod progress;
pub mod services;

pub use config::{MergeOptions, Settings, SortOrder};
pub use domain::EmailRecord;
pub use services::{ExportService, ImportService, MergeService};
