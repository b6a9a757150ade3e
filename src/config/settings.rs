//! Merge options and persisted settings.
//!
//! Settings are persisted to `~/.config/mboxmerge/settings.json` (or the
//! platform equivalent) and loaded by the command-line front end. The engine
//! itself only ever sees an already-validated [`MergeOptions`].

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use super::{ConfigError, ConfigResult};
use crate::dedup::{ClusteringStrategy, QualityWeights, SimilarityWeights};
use crate::services::ExportFormat;

const SETTINGS_FILE: &str = "settings.json";

/// Similarity threshold in `(0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Threshold(f64);

impl Threshold {
    /// Threshold used when none is configured.
    pub const DEFAULT: f64 = 0.85;

    pub fn new(value: f64) -> ConfigResult<Self> {
        if value.is_finite() && value > 0.0 && value <= 1.0 {
            Ok(Self(value))
        } else {
            Err(ConfigError::InvalidThreshold(value))
        }
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}

impl Default for Threshold {
    fn default() -> Self {
        Self(Self::DEFAULT)
    }
}

impl TryFrom<f64> for Threshold {
    type Error = ConfigError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Threshold> for f64 {
    fn from(t: Threshold) -> Self {
        t.0
    }
}

/// Ordering applied to merged records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    /// Oldest first; undated records first.
    #[default]
    DateAscending,
    /// Newest first; undated records last.
    DateDescending,
    /// Alphabetical by normalized sender.
    Sender,
    /// Alphabetical by normalized subject.
    Subject,
    /// Input order with removed duplicates filtered out.
    None,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::DateAscending => "date_ascending",
            SortOrder::DateDescending => "date_descending",
            SortOrder::Sender => "sender",
            SortOrder::Subject => "subject",
            SortOrder::None => "none",
        }
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortOrder {
    type Err = ConfigError;

    /// Accepts snake_case, kebab-case and camelCase spellings.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .collect::<String>()
            .to_lowercase();
        match key.as_str() {
            "dateascending" | "date" => Ok(SortOrder::DateAscending),
            "datedescending" => Ok(SortOrder::DateDescending),
            "sender" => Ok(SortOrder::Sender),
            "subject" => Ok(SortOrder::Subject),
            "none" => Ok(SortOrder::None),
            _ => Err(ConfigError::UnknownSortOrder(s.to_string())),
        }
    }
}

/// Options for one merge or incremental import.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeOptions {
    /// Whether duplicates are grouped and collapsed at all.
    pub remove_duplicates: bool,
    /// Minimum similarity for two records to be duplicates.
    pub duplicate_threshold: Threshold,
    /// Ordering of the merged result.
    pub sort_order: SortOrder,
    /// Whether to record which source each record came from.
    pub preserve_source_info: bool,
    /// Whether incremental import matches on signatures only.
    pub signature_matching: bool,
    /// How duplicate groups are formed.
    pub clustering: ClusteringStrategy,
    /// Whether inner similarity scans may run on the rayon pool.
    pub parallel: bool,
    /// Signal weights for the similarity scorer.
    pub similarity: SimilarityWeights,
    /// Point values for survivor selection.
    pub quality: QualityWeights,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            remove_duplicates: true,
            duplicate_threshold: Threshold::default(),
            sort_order: SortOrder::default(),
            preserve_source_info: true,
            signature_matching: true,
            clustering: ClusteringStrategy::default(),
            parallel: true,
            similarity: SimilarityWeights::default(),
            quality: QualityWeights::default(),
        }
    }
}

impl MergeOptions {
    pub fn builder() -> MergeOptionsBuilder {
        MergeOptionsBuilder::default()
    }

    /// Checks invariants not already enforced by the field types.
    pub fn validate(&self) -> ConfigResult<()> {
        self.quality.validate()
    }
}

/// Builds a validated [`MergeOptions`] from raw values.
#[derive(Debug, Clone, Default)]
pub struct MergeOptionsBuilder {
    options: MergeOptions,
    threshold: Option<f64>,
    sort_order: Option<String>,
}

impl MergeOptionsBuilder {
    pub fn remove_duplicates(mut self, enabled: bool) -> Self {
        self.options.remove_duplicates = enabled;
        self
    }

    pub fn duplicate_threshold(mut self, threshold: f64) -> Self {
        self.threshold = Some(threshold);
        self
    }

    pub fn sort_order(mut self, order: SortOrder) -> Self {
        self.options.sort_order = order;
        self.sort_order = None;
        self
    }

    /// Sets the sort order from its textual name, validated at `build`.
    pub fn sort_order_name(mut self, name: impl Into<String>) -> Self {
        self.sort_order = Some(name.into());
        self
    }

    pub fn preserve_source_info(mut self, enabled: bool) -> Self {
        self.options.preserve_source_info = enabled;
        self
    }

    pub fn signature_matching(mut self, enabled: bool) -> Self {
        self.options.signature_matching = enabled;
        self
    }

    pub fn clustering(mut self, strategy: ClusteringStrategy) -> Self {
        self.options.clustering = strategy;
        self
    }

    pub fn parallel(mut self, enabled: bool) -> Self {
        self.options.parallel = enabled;
        self
    }

    pub fn similarity(mut self, weights: SimilarityWeights) -> Self {
        self.options.similarity = weights;
        self
    }

    pub fn quality(mut self, weights: QualityWeights) -> Self {
        self.options.quality = weights;
        self
    }

    pub fn build(self) -> ConfigResult<MergeOptions> {
        let mut options = self.options;
        if let Some(threshold) = self.threshold {
            options.duplicate_threshold = Threshold::new(threshold)?;
        }
        if let Some(name) = self.sort_order {
            options.sort_order = name.parse()?;
        }
        options.validate()?;
        Ok(options)
    }
}

/// Export defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportSettings {
    /// Format used when none is given explicitly.
    pub format: ExportFormat,
}

/// Top-level persisted settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Merge and import behavior.
    pub merge: MergeOptions,
    /// Export behavior.
    pub export: ExportSettings,
}

impl Settings {
    /// Returns the platform-specific settings file location.
    pub fn default_path() -> ConfigResult<PathBuf> {
        ProjectDirs::from("com", "mboxmerge", "mboxmerge")
            .map(|dirs| dirs.config_dir().join(SETTINGS_FILE))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Loads and validates settings from `path`.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let settings: Settings =
            serde_json::from_str(&json).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        settings.merge.validate()?;
        tracing::debug!(path = %path.display(), "loaded settings");
        Ok(settings)
    }

    /// Loads settings from `path`, falling back to defaults if it does not exist.
    pub fn load_or_default(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!(path = %path.display(), "no settings file, using defaults");
            Ok(Self::default())
        }
    }

    /// Writes settings to `path` as pretty JSON, creating parent directories.
    pub fn save(&self, path: impl AsRef<Path>) -> ConfigResult<()> {
        let path = path.as_ref();
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(path, json).map_err(io_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_match_documented_values() {
        let options = MergeOptions::default();
        assert!(options.remove_duplicates);
        assert_eq!(options.duplicate_threshold.value(), 0.85);
        assert_eq!(options.sort_order, SortOrder::DateAscending);
        assert!(options.signature_matching);
        assert_eq!(options.clustering, ClusteringStrategy::SeedGreedy);
    }

    #[test]
    fn threshold_bounds() {
        assert!(Threshold::new(0.0).is_err());
        assert!(Threshold::new(-0.5).is_err());
        assert!(Threshold::new(1.01).is_err());
        assert!(Threshold::new(f64::NAN).is_err());
        assert!(Threshold::new(1.0).is_ok());
        assert!(Threshold::new(0.01).is_ok());
    }

    #[test]
    fn builder_rejects_bad_threshold() {
        let err = MergeOptions::builder()
            .duplicate_threshold(1.5)
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidThreshold(t) if t == 1.5));
    }

    #[test]
    fn builder_rejects_unknown_sort_order() {
        let err = MergeOptions::builder()
            .sort_order_name("by_size")
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownSortOrder(_)));
    }

    #[test]
    fn builder_applies_values() {
        let options = MergeOptions::builder()
            .remove_duplicates(false)
            .duplicate_threshold(0.9)
            .sort_order_name("dateDescending")
            .preserve_source_info(false)
            .clustering(ClusteringStrategy::Transitive)
            .build()
            .unwrap();

        assert!(!options.remove_duplicates);
        assert_eq!(options.duplicate_threshold.value(), 0.9);
        assert_eq!(options.sort_order, SortOrder::DateDescending);
        assert!(!options.preserve_source_info);
        assert_eq!(options.clustering, ClusteringStrategy::Transitive);
    }

    #[test]
    fn sort_order_spellings() {
        for s in ["date_ascending", "dateAscending", "date-ascending", "DATE_ASCENDING"] {
            assert_eq!(s.parse::<SortOrder>().unwrap(), SortOrder::DateAscending);
        }
        assert_eq!("none".parse::<SortOrder>().unwrap(), SortOrder::None);
        assert!("sideways".parse::<SortOrder>().is_err());
    }

    #[test]
    fn sort_order_serialization() {
        let json = serde_json::to_string(&SortOrder::DateDescending).unwrap();
        assert_eq!(json, "\"date_descending\"");
    }

    #[test]
    fn invalid_threshold_in_json_is_rejected() {
        let json = r#"{"merge":{"duplicate_threshold":0}}"#;
        assert!(serde_json::from_str::<Settings>(json).is_err());
    }

    #[test]
    fn partial_settings_fill_defaults() {
        let json = r#"{"merge":{"sort_order":"subject"}}"#;
        let settings: Settings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.merge.sort_order, SortOrder::Subject);
        assert_eq!(settings.merge.duplicate_threshold.value(), 0.85);
        assert_eq!(settings.export.format, ExportFormat::Mbox);
    }

    #[test]
    fn settings_roundtrip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(SETTINGS_FILE);

        let mut settings = Settings::default();
        settings.merge.duplicate_threshold = Threshold::new(0.7).unwrap();
        settings.export.format = ExportFormat::Eml;
        settings.save(&path).unwrap();

        let loaded = Settings::load(&path).unwrap();
        assert_eq!(loaded, settings);
    }

    #[test]
    fn load_or_default_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load_or_default(dir.path().join("missing.json")).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn load_reports_path_on_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        std::fs::write(&path, "{ not json").unwrap();

        let err = Settings::load(&path).unwrap_err();
        assert!(err.to_string().contains(SETTINGS_FILE));
    }
}
