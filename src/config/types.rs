//! Configuration types.

use crate::model::PresetIdentity;
use crate::synthesis::OutputLayout;
use crate::validation::{ConflictPolicy, NumericRange, ValidationConfig, default_ranges};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Validation knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationSettings {
    /// Keys allowed to diverge across occurrences of a section.
    #[serde(default)]
    pub allowlist: Vec<String>,

    /// Numeric bounds by key name. Entries merge field-by-field with the
    /// built-in ranges.
    #[serde(default = "default_ranges")]
    pub ranges: BTreeMap<String, NumericRange>,

    /// Warn about files not reachable from the root (default: true).
    #[serde(default = "default_true")]
    pub orphan_warnings: bool,
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self {
            allowlist: Vec::new(),
            ranges: default_ranges(),
            orphan_warnings: true,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisSettings {
    /// Root file name for generated trees (default: `printer.cfg`).
    /// A project that records its own root keeps it.
    #[serde(default = "default_root_file")]
    pub root_file: String,

    /// Source-tree target for sections without a recorded origin.
    #[serde(default)]
    pub default_section_file: Option<String>,

    /// Layout forced on every synthesis unless `--layout` is given.
    #[serde(default)]
    pub layout: Option<OutputLayout>,
}

impl Default for SynthesisSettings {
    fn default() -> Self {
        Self {
            root_file: default_root_file(),
            default_section_file: None,
            layout: None,
        }
    }
}

fn default_root_file() -> String {
    "printer.cfg".to_string()
}

/// Preset used for add-on compatibility checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresetSettings {
    #[serde(default = "default_family")]
    pub family: String,
    #[serde(default)]
    pub preset_id: Option<String>,
}

impl Default for PresetSettings {
    fn default() -> Self {
        Self {
            family: default_family(),
            preset_id: None,
        }
    }
}

fn default_family() -> String {
    "voron".to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BundleSettings {
    /// Bundle roots loaded when the command line names none.
    #[serde(default)]
    pub dirs: Vec<PathBuf>,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub validation: ValidationSettings,
    #[serde(default)]
    pub synthesis: SynthesisSettings,
    #[serde(default)]
    pub preset: PresetSettings,
    #[serde(default)]
    pub bundles: BundleSettings,
}

impl Config {
    /// Load a single YAML file, without tier merging.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    pub fn validation_config(&self) -> ValidationConfig {
        ValidationConfig {
            policy: ConflictPolicy::new(&self.validation.allowlist),
            ranges: self.validation.ranges.clone(),
            orphan_warnings: self.validation.orphan_warnings,
        }
    }

    pub fn preset_identity(&self) -> PresetIdentity {
        PresetIdentity {
            family: self.preset.family.clone(),
            preset_id: self.preset.preset_id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.synthesis.root_file, "printer.cfg");
        assert_eq!(config.preset.family, "voron");
        assert!(config.validation.orphan_warnings);
        assert!(config.validation.ranges.contains_key("microsteps"));
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let config: Config = serde_yaml::from_str("validation:\n  allowlist: [max_accel]\n").unwrap();
        assert_eq!(config.validation.allowlist, vec!["max_accel"]);
        assert_eq!(config.validation.ranges, default_ranges());
        assert!(config.validation_config().policy.is_allowlisted("MAX_ACCEL"));
    }
}
