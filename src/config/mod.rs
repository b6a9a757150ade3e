//! Configuration and settings management.
//!
//! This module provides merge options and their persisted settings file.
//! Settings are stored in the user's config directory as JSON, and every
//! value is validated when it is constructed or loaded, never mid-merge.

mod error;
mod settings;

pub use error::{ConfigError, ConfigResult};
pub use settings::{
    ExportSettings, MergeOptions, MergeOptionsBuilder, Settings, SortOrder, Threshold,
};
