//! Tiered configuration.
//!
//! Configuration is merged field-by-field from four tiers:
//! 1. **Defaults** - built into [`Config::default`]
//! 2. **Project** - `$CWD/klipper-forge/config.yaml`
//! 3. **User** - `~/.klipper-forge/config.yaml`
//! 4. **Environment** - variables below, then `--config`
//!
//! ## Environment Variables
//! - `KLIPPER_FORGE_CONFIG_PATH` - Explicit config file merged over the file tiers
//! - `KLIPPER_FORGE_ROOT_FILE` - Root file name for generated trees
//! - `KLIPPER_FORGE_ALLOWLIST` - Comma-separated conflict allowlist
//! - `KLIPPER_FORGE_USER_DIR` - User config dir (default: `~/.klipper-forge`)
//! - `KLIPPER_FORGE_PROJECT_DIR` - Project config dir (default: `./klipper-forge`)

mod loader;
mod merge;
mod types;

pub use loader::{ConfigLoader, ConfigPaths, ConfigTier, EnvLookup};
pub use merge::{deep_merge, deep_merge_all};
pub use types::*;
