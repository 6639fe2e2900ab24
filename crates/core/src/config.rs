//! Engine configuration.
//!
//! `RawConfig` is the loosely typed shape read from flags, env and config files;
//! `CleanupConfig` is the validated form the engine accepts. Conversion is the
//! only place `InvalidConfiguration` is raised, so callers fail before grouping.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

use crate::{Error, ImageId, Result};

pub const DEFAULT_KEEP_PREVIOUS: usize = 4;
pub const DEFAULT_TAG_KEYS: [&str; 2] = ["environment", "role"];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MappingMode {
    Name,
    Tags,
}

impl std::str::FromStr for MappingMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "name" => Ok(MappingMode::Name),
            "tags" => Ok(MappingMode::Tags),
            other => Err(Error::InvalidConfiguration(format!("unsupported mapping mode {other:?} (expected name or tags)"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MappingConfig {
    pub mode: MappingMode,
    /// Name substrings (`name`) or tag keys (`tags`), in priority order.
    pub values: Vec<String>,
    /// Tags mode only: unmatched unless every requested key is present.
    pub require_all_keys: bool,
    /// Images carrying one of these values are reported but never reduced.
    pub excluded_values: Vec<String>,
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            mode: MappingMode::Tags,
            values: DEFAULT_TAG_KEYS.iter().map(|s| s.to_string()).collect(),
            require_all_keys: false,
            excluded_values: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CleanupConfig {
    pub mapping: MappingConfig,
    pub keep_previous: usize,
    pub min_age_days: u32,
    /// Explicit image ids; when non-empty, grouping and retention are skipped.
    pub from_ids: Vec<ImageId>,
    pub check_orphans: bool,
    /// Only snapshots owned by this account are considered for orphan detection.
    pub owner_id: Option<String>,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            mapping: MappingConfig::default(),
            keep_previous: DEFAULT_KEEP_PREVIOUS,
            min_age_days: 0,
            from_ids: Vec::new(),
            check_orphans: true,
            owner_id: None,
        }
    }
}

impl CleanupConfig {
    pub fn validate(&self) -> Result<()> {
        if self.mapping.values.is_empty() {
            return Err(Error::InvalidConfiguration("mapping values must not be empty".into()));
        }
        if self.mapping.values.iter().any(|v| v.is_empty()) {
            return Err(Error::InvalidConfiguration("mapping values must not contain empty strings".into()));
        }
        if self.mapping.require_all_keys && self.mapping.mode == MappingMode::Name {
            return Err(Error::InvalidConfiguration("require_all_keys only applies to tags mode".into()));
        }
        Ok(())
    }
}

/// Unvalidated configuration as read from a file or assembled from CLI flags.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct RawConfig {
    pub mapping_key: Option<String>,
    pub mapping_values: Option<Vec<String>>,
    pub require_all_keys: Option<bool>,
    pub excluded_values: Option<Vec<String>>,
    pub keep_previous: Option<i64>,
    pub min_age_days: Option<i64>,
    pub from_ids: Option<Vec<String>>,
    pub check_orphans: Option<bool>,
    pub owner_id: Option<String>,
}

impl RawConfig {
    /// Field-wise overlay: values set in `over` win.
    pub fn merge(self, over: RawConfig) -> RawConfig {
        RawConfig {
            mapping_key: over.mapping_key.or(self.mapping_key),
            mapping_values: over.mapping_values.or(self.mapping_values),
            require_all_keys: over.require_all_keys.or(self.require_all_keys),
            excluded_values: over.excluded_values.or(self.excluded_values),
            keep_previous: over.keep_previous.or(self.keep_previous),
            min_age_days: over.min_age_days.or(self.min_age_days),
            from_ids: over.from_ids.or(self.from_ids),
            check_orphans: over.check_orphans.or(self.check_orphans),
            owner_id: over.owner_id.or(self.owner_id),
        }
    }
}

impl TryFrom<RawConfig> for CleanupConfig {
    type Error = Error;

    fn try_from(raw: RawConfig) -> Result<Self> {
        let mode = match raw.mapping_key.as_deref() {
            Some(s) => s.parse::<MappingMode>()?,
            None => MappingMode::Tags,
        };
        let values = match (mode, raw.mapping_values) {
            (_, Some(v)) => v,
            (MappingMode::Tags, None) => DEFAULT_TAG_KEYS.iter().map(|s| s.to_string()).collect(),
            (MappingMode::Name, None) => {
                return Err(Error::InvalidConfiguration("name mapping requires at least one mapping value".into()))
            }
        };
        let keep_previous = match raw.keep_previous {
            Some(k) if k < 0 => return Err(Error::InvalidConfiguration(format!("keep_previous must be >= 0, got {k}"))),
            Some(k) => usize::try_from(k).map_err(|_| Error::InvalidConfiguration(format!("keep_previous out of range: {k}")))?,
            None => DEFAULT_KEEP_PREVIOUS,
        };
        let min_age_days = match raw.min_age_days {
            Some(d) if d < 0 => return Err(Error::InvalidConfiguration(format!("min_age_days must be >= 0, got {d}"))),
            Some(d) => u32::try_from(d).map_err(|_| Error::InvalidConfiguration(format!("min_age_days out of range: {d}")))?,
            None => 0,
        };
        let cfg = CleanupConfig {
            mapping: MappingConfig {
                mode,
                values,
                require_all_keys: raw.require_all_keys.unwrap_or(false),
                excluded_values: raw.excluded_values.unwrap_or_default(),
            },
            keep_previous,
            min_age_days,
            from_ids: raw.from_ids.unwrap_or_default(),
            check_orphans: raw.check_orphans.unwrap_or(true),
            owner_id: raw.owner_id,
        };
        cfg.validate()?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_tags_mode_with_environment_and_role() {
        let cfg = CleanupConfig::try_from(RawConfig::default()).unwrap();
        assert_eq!(cfg.mapping.mode, MappingMode::Tags);
        assert_eq!(cfg.mapping.values, vec!["environment".to_string(), "role".to_string()]);
        assert_eq!(cfg.keep_previous, 4);
        assert!(cfg.check_orphans);
    }

    #[test]
    fn rejects_unknown_mode_and_negative_retention() {
        let raw = RawConfig { mapping_key: Some("label".into()), ..Default::default() };
        assert!(matches!(CleanupConfig::try_from(raw), Err(Error::InvalidConfiguration(_))));
        let raw = RawConfig { keep_previous: Some(-1), ..Default::default() };
        assert!(matches!(CleanupConfig::try_from(raw), Err(Error::InvalidConfiguration(_))));
    }

    #[test]
    fn name_mode_needs_values() {
        let raw = RawConfig { mapping_key: Some("name".into()), ..Default::default() };
        assert!(CleanupConfig::try_from(raw).is_err());
        let raw = RawConfig { mapping_key: Some("name".into()), mapping_values: Some(vec!["".into()]), ..Default::default() };
        assert!(CleanupConfig::try_from(raw).is_err());
        let raw = RawConfig { mapping_key: Some("name".into()), mapping_values: Some(vec!["web".into()]), ..Default::default() };
        assert_eq!(CleanupConfig::try_from(raw).unwrap().mapping.mode, MappingMode::Name);
    }

    #[test]
    fn partial_document_fills_defaults() {
        let cfg: CleanupConfig = serde_yaml::from_str("keep_previous: 2\nmapping:\n  excluded_values: [prod]\n").unwrap();
        assert_eq!(cfg.keep_previous, 2);
        assert_eq!(cfg.mapping.mode, MappingMode::Tags);
        assert_eq!(cfg.mapping.values, vec!["environment".to_string(), "role".to_string()]);
        assert_eq!(cfg.mapping.excluded_values, vec!["prod".to_string()]);
        assert!(cfg.check_orphans);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn flags_override_file_values() {
        let file: RawConfig = serde_yaml::from_str("keep_previous: 7\nmapping_key: name\nmapping_values: [web]\n").unwrap();
        let flags = RawConfig { keep_previous: Some(1), ..Default::default() };
        let cfg = CleanupConfig::try_from(file.merge(flags)).unwrap();
        assert_eq!(cfg.keep_previous, 1);
        assert_eq!(cfg.mapping.values, vec!["web".to_string()]);
    }
}
