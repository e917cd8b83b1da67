//! Bundle registry: an immutable, id-deduplicated snapshot of every bundle
//! root, and the handle that swaps snapshots on refresh.

use super::records::{AddonBundle, BoardBundle, decode};
use crate::error::{BundleKind, BundleLoadError};
use arc_swap::ArcSwap;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};

/// One bundle root as already-parsed records.
#[derive(Debug, Clone, Default)]
pub struct BundleSource {
    /// Name used in load errors (usually the root directory).
    pub label: String,
    pub boards: Vec<Value>,
    pub toolhead_boards: Vec<Value>,
    pub addons: Vec<Value>,
    /// Template reference → template text.
    pub templates: BTreeMap<String, String>,
}

impl BundleSource {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Default::default()
        }
    }
}

/// Immutable registry snapshot.
#[derive(Debug, Clone, Default)]
pub struct BundleRegistry {
    boards: BTreeMap<String, BoardBundle>,
    toolhead_boards: BTreeMap<String, BoardBundle>,
    addons: BTreeMap<String, AddonBundle>,
    templates: BTreeMap<String, String>,
}

impl BundleRegistry {
    pub fn board(&self, id: &str) -> Option<&BoardBundle> {
        self.boards.get(id.trim())
    }

    pub fn toolhead_board(&self, id: &str) -> Option<&BoardBundle> {
        self.toolhead_boards.get(id.trim())
    }

    pub fn addon(&self, id: &str) -> Option<&AddonBundle> {
        self.addons.get(id.trim())
    }

    pub fn template(&self, reference: &str) -> Option<&str> {
        self.templates.get(reference).map(String::as_str)
    }

    pub fn boards(&self) -> impl Iterator<Item = &BoardBundle> {
        self.boards.values()
    }

    pub fn toolhead_boards(&self) -> impl Iterator<Item = &BoardBundle> {
        self.toolhead_boards.values()
    }

    pub fn addons(&self) -> impl Iterator<Item = &AddonBundle> {
        self.addons.values()
    }
}

/// Accumulates records root by root. A record whose id already exists in
/// the same kind replaces it (later root wins); a record whose id is taken
/// by the other board kind is rejected.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    registry: BundleRegistry,
    errors: Vec<BundleLoadError>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_board(mut self, board: BoardBundle) -> Self {
        self.add_board(BundleKind::Board, board, "<inline>");
        self
    }

    pub fn with_toolhead_board(mut self, board: BoardBundle) -> Self {
        self.add_board(BundleKind::ToolheadBoard, board, "<inline>");
        self
    }

    pub fn with_addon(mut self, addon: AddonBundle) -> Self {
        self.registry.addons.insert(addon.id.clone(), addon);
        self
    }

    pub fn with_template(mut self, reference: impl Into<String>, text: impl Into<String>) -> Self {
        self.registry.templates.insert(reference.into(), text.into());
        self
    }

    /// Merge one root. Rejected records are logged and collected; the rest
    /// of the root still loads.
    pub fn load_source(&mut self, source: BundleSource) {
        let label = source.label.as_str();
        for value in &source.boards {
            match decode::<BoardBundle>(BundleKind::Board, value, label) {
                Ok(board) => self.add_board(BundleKind::Board, board, label),
                Err(e) => self.reject(e),
            }
        }
        for value in &source.toolhead_boards {
            match decode::<BoardBundle>(BundleKind::ToolheadBoard, value, label) {
                Ok(board) => self.add_board(BundleKind::ToolheadBoard, board, label),
                Err(e) => self.reject(e),
            }
        }
        for value in &source.addons {
            match decode::<AddonBundle>(BundleKind::Addon, value, label) {
                Ok(addon) => {
                    if self.registry.addons.contains_key(&addon.id) {
                        debug!(id = %addon.id, root = label, "add-on overridden by later root");
                    }
                    self.registry.addons.insert(addon.id.clone(), addon);
                }
                Err(e) => self.reject(e),
            }
        }
        self.registry.templates.extend(source.templates);
    }

    fn add_board(&mut self, kind: BundleKind, board: BoardBundle, source_label: &str) {
        let (own, other, other_kind) = match kind {
            BundleKind::ToolheadBoard => (
                &mut self.registry.toolhead_boards,
                &self.registry.boards,
                BundleKind::Board,
            ),
            _ => (
                &mut self.registry.boards,
                &self.registry.toolhead_boards,
                BundleKind::ToolheadBoard,
            ),
        };
        if other.contains_key(&board.id) {
            let err = BundleLoadError::IncompatibleOverride {
                kind,
                existing: other_kind,
                id: board.id,
                source_label: source_label.to_string(),
            };
            self.reject(err);
            return;
        }
        if own.contains_key(&board.id) {
            debug!(id = %board.id, root = source_label, "{} overridden by later root", kind);
        }
        own.insert(board.id.clone(), board);
    }

    fn reject(&mut self, err: BundleLoadError) {
        warn!("Skipping bundle record: {}", err);
        self.errors.push(err);
    }

    pub fn errors(&self) -> &[BundleLoadError] {
        &self.errors
    }

    pub fn build(self) -> BundleRegistry {
        self.registry
    }

    /// Build and hand back the rejected records alongside the snapshot.
    pub fn finish(self) -> (BundleRegistry, Vec<BundleLoadError>) {
        info!(
            boards = self.registry.boards.len(),
            toolhead_boards = self.registry.toolhead_boards.len(),
            addons = self.registry.addons.len(),
            rejected = self.errors.len(),
            "Bundle registry built"
        );
        (self.registry, self.errors)
    }
}

/// Build a registry from roots in priority order (later wins).
pub fn load_sources(
    sources: impl IntoIterator<Item = BundleSource>,
) -> (BundleRegistry, Vec<BundleLoadError>) {
    let mut builder = RegistryBuilder::new();
    for source in sources {
        builder.load_source(source);
    }
    builder.finish()
}

/// Holds the current registry snapshot. Readers get an `Arc` that stays
/// valid across a concurrent [`RegistryHandle::reload`].
#[derive(Debug)]
pub struct RegistryHandle {
    current: ArcSwap<BundleRegistry>,
}

impl RegistryHandle {
    pub fn new(registry: BundleRegistry) -> Self {
        Self {
            current: ArcSwap::from_pointee(registry),
        }
    }

    pub fn snapshot(&self) -> Arc<BundleRegistry> {
        self.current.load_full()
    }

    pub fn reload(&self, registry: BundleRegistry) {
        self.current.store(Arc::new(registry));
        info!("Bundle registry reloaded");
    }
}

static GLOBAL: OnceLock<RegistryHandle> = OnceLock::new();

/// Install the process-wide handle. Returns `false` if one already exists;
/// use [`reload_global`] to replace its snapshot.
pub fn init_global(registry: BundleRegistry) -> bool {
    GLOBAL.set(RegistryHandle::new(registry)).is_ok()
}

pub fn global() -> Option<&'static RegistryHandle> {
    GLOBAL.get()
}

/// Replace the global snapshot, installing the handle if needed.
pub fn reload_global(registry: BundleRegistry) {
    match GLOBAL.get() {
        Some(handle) => handle.reload(registry),
        None => {
            if let Err(handle) = GLOBAL.set(RegistryHandle::new(registry)) {
                // Lost an init race; the winner is installed, apply ours on top.
                if let Some(current) = GLOBAL.get() {
                    current.reload(handle.snapshot().as_ref().clone());
                }
            }
        }
    }
}
