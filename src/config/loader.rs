//! Configuration loader with tier-based merging.
//!
//! Loads configuration from multiple tiers and merges them field-by-field.

use super::merge::deep_merge_all;
use super::types::Config;
use anyhow::{Context, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Configuration tier priority (lowest to highest).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConfigTier {
    /// Built-in defaults (lowest priority)
    Defaults = 0,
    /// Project-level config ($CWD/klipper-forge/)
    Project = 1,
    /// User-level config (~/.klipper-forge/)
    User = 2,
    /// Environment variables (highest priority)
    Environment = 3,
}

impl std::fmt::Display for ConfigTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigTier::Defaults => write!(f, "defaults"),
            ConfigTier::Project => write!(f, "project"),
            ConfigTier::User => write!(f, "user"),
            ConfigTier::Environment => write!(f, "environment"),
        }
    }
}

/// Directories searched for `config.yaml`.
#[derive(Debug, Clone, Default)]
pub struct ConfigPaths {
    pub project_dir: Option<PathBuf>,
    pub user_dir: Option<PathBuf>,
}

impl ConfigPaths {
    /// Discover configuration paths from environment and defaults.
    pub fn discover() -> Self {
        // User dir: KLIPPER_FORGE_USER_DIR or ~/.klipper-forge
        let user_dir = std::env::var("KLIPPER_FORGE_USER_DIR")
            .ok()
            .map(PathBuf::from)
            .or_else(|| dirs::home_dir().map(|h| h.join(".klipper-forge")));

        // Project dir: KLIPPER_FORGE_PROJECT_DIR or $CWD/klipper-forge
        let project_dir = std::env::var("KLIPPER_FORGE_PROJECT_DIR")
            .ok()
            .map(PathBuf::from)
            .or_else(|| Some(PathBuf::from("klipper-forge")));

        Self {
            project_dir,
            user_dir,
        }
    }

    pub fn with_dirs(project_dir: Option<PathBuf>, user_dir: Option<PathBuf>) -> Self {
        Self {
            project_dir,
            user_dir,
        }
    }

    fn config_file(dir: Option<&Path>) -> Option<PathBuf> {
        dir.map(|d| d.join("config.yaml")).filter(|f| f.exists())
    }
}

/// Environment variable lookup, injectable so tests do not touch the
/// process environment.
pub type EnvLookup<'a> = &'a dyn Fn(&str) -> Option<String>;

fn process_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Configuration loader that handles tier-based merging.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    pub paths: ConfigPaths,
    config: Config,
    /// Files merged, lowest tier first.
    sources: Vec<(ConfigTier, PathBuf)>,
}

impl ConfigLoader {
    /// Load configuration from all tiers with proper merging.
    pub fn load() -> Result<Self> {
        Self::load_with_paths(ConfigPaths::discover())
    }

    /// Load with an explicit config file layered on top of the discovered
    /// tiers (the `--config` flag).
    pub fn load_with_explicit(explicit: Option<&Path>) -> Result<Self> {
        let mut loader = Self::load()?;
        if let Some(path) = explicit {
            loader.overlay_file(ConfigTier::Environment, path)?;
        }
        Ok(loader)
    }

    pub fn load_with_paths(paths: ConfigPaths) -> Result<Self> {
        Self::load_with_env(paths, &process_env)
    }

    /// Load using `env` for environment lookups.
    pub fn load_with_env(paths: ConfigPaths, env: EnvLookup<'_>) -> Result<Self> {
        let mut configs: Vec<Value> = Vec::new();
        let mut sources = Vec::new();

        // Tier 1: Defaults
        configs.push(serde_json::to_value(Config::default())?);

        // Tier 2: Project, Tier 3: User
        for (tier, dir) in [
            (ConfigTier::Project, paths.project_dir.as_deref()),
            (ConfigTier::User, paths.user_dir.as_deref()),
        ] {
            if let Some(file) = ConfigPaths::config_file(dir)
                && let Some(value) = read_yaml(&file)
            {
                debug!(%tier, path = %file.display(), "Loaded config tier");
                configs.push(value);
                sources.push((tier, file));
            }
        }

        // Tier 4: explicit file from the environment
        if let Some(explicit) = env("KLIPPER_FORGE_CONFIG_PATH") {
            let file = PathBuf::from(explicit);
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("reading KLIPPER_FORGE_CONFIG_PATH {}", file.display()))?;
            let value: Value = serde_yaml::from_str(&content)
                .with_context(|| format!("parsing {}", file.display()))?;
            configs.push(value);
            sources.push((ConfigTier::Environment, file));
        }

        let merged = deep_merge_all(configs);
        let mut config: Config = serde_json::from_value(merged)?;
        Self::apply_env_overrides(&mut config, env);

        Ok(Self {
            paths,
            config,
            sources,
        })
    }

    fn overlay_file(&mut self, tier: ConfigTier, path: &Path) -> Result<()> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let overlay: Value = serde_yaml::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        let base = serde_json::to_value(&self.config)?;
        self.config = serde_json::from_value(deep_merge_all([base, overlay]))?;
        self.sources.push((tier, path.to_path_buf()));
        Ok(())
    }

    /// Apply environment variable overrides to config.
    fn apply_env_overrides(config: &mut Config, env: EnvLookup<'_>) {
        if let Some(root) = env("KLIPPER_FORGE_ROOT_FILE").filter(|r| !r.trim().is_empty()) {
            config.synthesis.root_file = root.trim().to_string();
        }

        if let Some(list) = env("KLIPPER_FORGE_ALLOWLIST") {
            config.validation.allowlist = list
                .split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(str::to_string)
                .collect();
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    pub fn into_config(self) -> Config {
        self.config
    }

    /// Config files that contributed, lowest tier first.
    pub fn sources(&self) -> &[(ConfigTier, PathBuf)] {
        &self.sources
    }
}

fn read_yaml(path: &Path) -> Option<Value> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Cannot read config file, skipping");
            return None;
        }
    };
    match serde_yaml::from_str::<Value>(&content) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Invalid YAML in config file, skipping");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_config_paths_discover() {
        let paths = ConfigPaths::discover();
        assert!(paths.project_dir.is_some());
    }

    #[test]
    fn test_load_defaults_only() {
        let temp = TempDir::new().unwrap();
        let paths = ConfigPaths::with_dirs(
            Some(temp.path().join("project")),
            Some(temp.path().join("user")),
        );

        let loader = ConfigLoader::load_with_env(paths, &no_env).unwrap();
        assert_eq!(loader.config(), &Config::default());
        assert!(loader.sources().is_empty());
    }

    #[test]
    fn test_user_overrides_project_field_by_field() {
        let temp = TempDir::new().unwrap();
        let project_dir = temp.path().join("klipper-forge");
        let user_dir = temp.path().join("user");
        std::fs::create_dir_all(&project_dir).unwrap();
        std::fs::create_dir_all(&user_dir).unwrap();

        std::fs::write(
            project_dir.join("config.yaml"),
            "synthesis:\n  root_file: config/printer.cfg\nvalidation:\n  ranges:\n    max_temp:\n      max: 350\n",
        )
        .unwrap();
        std::fs::write(user_dir.join("config.yaml"), "synthesis:\n  root_file: main.cfg\n").unwrap();

        let paths = ConfigPaths::with_dirs(Some(project_dir), Some(user_dir));
        let loader = ConfigLoader::load_with_env(paths, &no_env).unwrap();
        let config = loader.config();

        assert_eq!(config.synthesis.root_file, "main.cfg");
        let max_temp = config.validation.ranges["max_temp"];
        assert_eq!(max_temp.max, Some(350.0));
        assert_eq!(max_temp.min, Some(0.0));
        assert_eq!(loader.sources().len(), 2);
    }

    #[test]
    fn test_environment_wins() {
        let temp = TempDir::new().unwrap();
        let explicit = temp.path().join("explicit.yaml");
        std::fs::write(&explicit, "preset:\n  family: trident\n").unwrap();
        let explicit_str = explicit.display().to_string();

        let env = move |key: &str| match key {
            "KLIPPER_FORGE_CONFIG_PATH" => Some(explicit_str.clone()),
            "KLIPPER_FORGE_ROOT_FILE" => Some("machine.cfg".to_string()),
            "KLIPPER_FORGE_ALLOWLIST" => Some("max_accel, run_current,".to_string()),
            _ => None,
        };
        let paths = ConfigPaths::with_dirs(None, None);
        let loader = ConfigLoader::load_with_env(paths, &env).unwrap();
        let config = loader.config();

        assert_eq!(config.preset.family, "trident");
        assert_eq!(config.synthesis.root_file, "machine.cfg");
        assert_eq!(config.validation.allowlist, vec!["max_accel", "run_current"]);
    }

    #[test]
    fn test_invalid_tier_is_skipped() {
        let temp = TempDir::new().unwrap();
        let project_dir = temp.path().join("klipper-forge");
        std::fs::create_dir_all(&project_dir).unwrap();
        std::fs::write(project_dir.join("config.yaml"), "validation: [unclosed").unwrap();

        let paths = ConfigPaths::with_dirs(Some(project_dir), None);
        let loader = ConfigLoader::load_with_env(paths, &no_env).unwrap();
        assert_eq!(loader.config(), &Config::default());
    }
}
