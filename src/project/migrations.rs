//! Schema migrations for persisted project records.
//!
//! Each step rewrites the JSON record of one schema version into the next.
//! Steps are total over any object, idempotent, and never drop data: fields
//! with no counterpart in the newer shape move under `passthrough.legacy`.
//!
//! | version | shape |
//! |---------|-------|
//! | 1 | flat legacy project (`board`, `toolhead`, `leds`, `advanced_overrides`, …) |
//! | 2 | adds `machine_attributes` (limits, MCU map, include graph) and an `addon_configs` map |
//! | 3 | `machine_attributes` is the attribute model; `addon_configs` is an ordered list |

use crate::error::SchemaMigrationError;
use anyhow::{Result, anyhow};
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use tracing::{debug, info};

/// Schema version identifier.
pub type SchemaVersion = u32;

/// Version written by this build.
pub const CURRENT_SCHEMA_VERSION: SchemaVersion = 3;

/// Version assumed when a record carries no `schema_version`.
pub const LEGACY_SCHEMA_VERSION: SchemaVersion = 1;

/// Rewrites a record in place.
pub type MigrationFn = fn(&mut Value) -> Result<()>;

#[derive(Clone)]
pub struct Migration {
    pub from: SchemaVersion,
    pub to: SchemaVersion,
    pub description: &'static str,
    pub migrate: MigrationFn,
}

impl fmt::Debug for Migration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Migration")
            .field("from", &self.from)
            .field("to", &self.to)
            .field("description", &self.description)
            .finish()
    }
}

/// Directed graph of migration steps.
#[derive(Default)]
pub struct MigrationRegistry {
    migrations: BTreeMap<(SchemaVersion, SchemaVersion), Migration>,
    adjacency: BTreeMap<SchemaVersion, Vec<SchemaVersion>>,
}

impl fmt::Debug for MigrationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationRegistry")
            .field("migrations", &self.migrations.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl MigrationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a step.
    ///
    /// # Panics
    /// Panics if `from >= to`; migrations only go forward.
    pub fn register(
        mut self,
        from: SchemaVersion,
        to: SchemaVersion,
        description: &'static str,
        migrate: MigrationFn,
    ) -> Self {
        assert!(from < to, "Migration must go forward: {} -> {}", from, to);
        self.migrations.insert(
            (from, to),
            Migration {
                from,
                to,
                description,
                migrate,
            },
        );
        self.adjacency.entry(from).or_default().push(to);
        self
    }

    pub fn available_migrations(&self) -> Vec<(SchemaVersion, SchemaVersion)> {
        self.migrations.keys().copied().collect()
    }

    fn available_label(&self) -> String {
        let steps: Vec<String> = self
            .migrations
            .keys()
            .map(|(a, b)| format!("v{}->v{}", a, b))
            .collect();
        if steps.is_empty() {
            "none".to_string()
        } else {
            steps.join(", ")
        }
    }

    /// Shortest forward path (fewest steps) from `from` to `to`.
    pub fn find_path(
        &self,
        from: SchemaVersion,
        to: SchemaVersion,
    ) -> Result<Vec<(SchemaVersion, SchemaVersion)>, SchemaMigrationError> {
        if from == to {
            return Ok(Vec::new());
        }
        let no_path = || SchemaMigrationError::NoPath {
            from,
            to,
            available: self.available_label(),
        };
        if from > to {
            return Err(no_path());
        }

        let mut queue = VecDeque::from([from]);
        let mut visited = BTreeSet::from([from]);
        let mut parent: BTreeMap<SchemaVersion, SchemaVersion> = BTreeMap::new();

        while let Some(current) = queue.pop_front() {
            if current == to {
                let mut path = Vec::new();
                let mut node = to;
                while let Some(&prev) = parent.get(&node) {
                    path.push((prev, node));
                    node = prev;
                }
                path.reverse();
                return Ok(path);
            }
            for &next in self.adjacency.get(&current).into_iter().flatten() {
                if next <= to && visited.insert(next) {
                    parent.insert(next, current);
                    queue.push_back(next);
                }
            }
        }

        Err(no_path())
    }

    /// Apply every step from `from` to `to`, stamping `schema_version` after
    /// each. On error `data` may be half-migrated; callers work on a copy.
    pub fn migrate(
        &self,
        data: &mut Value,
        from: SchemaVersion,
        to: SchemaVersion,
    ) -> Result<Vec<(SchemaVersion, SchemaVersion)>, SchemaMigrationError> {
        let path = self.find_path(from, to)?;
        for &(step_from, step_to) in &path {
            let Some(migration) = self.migrations.get(&(step_from, step_to)) else {
                return Err(SchemaMigrationError::NoPath {
                    from,
                    to,
                    available: self.available_label(),
                });
            };
            debug!(from = step_from, to = step_to, "{}", migration.description);
            (migration.migrate)(data).map_err(|e| SchemaMigrationError::StepFailed {
                from: step_from,
                to: step_to,
                reason: e.to_string(),
            })?;
            if let Some(obj) = data.as_object_mut() {
                obj.insert("schema_version".to_string(), Value::from(step_to));
            }
        }
        Ok(path)
    }

    pub fn describe_path(
        &self,
        from: SchemaVersion,
        to: SchemaVersion,
    ) -> Result<Vec<String>, SchemaMigrationError> {
        Ok(self
            .find_path(from, to)?
            .iter()
            .filter_map(|key| self.migrations.get(key))
            .map(|m| format!("v{} -> v{}: {}", m.from, m.to, m.description))
            .collect())
    }

    pub fn max_version(&self) -> Option<SchemaVersion> {
        self.migrations.values().map(|m| m.to).max()
    }
}

/// Registry with every known step.
pub fn build_default_registry() -> MigrationRegistry {
    MigrationRegistry::new()
        .register(
            1,
            2,
            "Add machine attributes, MCU map and add-on config map",
            migrate_v1_to_v2,
        )
        .register(
            2,
            3,
            "Adopt the attribute model and ordered add-on configs",
            migrate_v2_to_v3,
        )
}

/// What a load did to the record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationOutcome {
    pub from: SchemaVersion,
    pub to: SchemaVersion,
    pub steps: Vec<(SchemaVersion, SchemaVersion)>,
}

impl MigrationOutcome {
    pub fn migrated(&self) -> bool {
        !self.steps.is_empty()
    }
}

/// Read `schema_version`, treating a missing field as legacy.
pub fn detect_version(record: &Value) -> Result<SchemaVersion, SchemaMigrationError> {
    let obj = record.as_object().ok_or(SchemaMigrationError::NotAnObject)?;
    match obj.get("schema_version") {
        None | Some(Value::Null) => Ok(LEGACY_SCHEMA_VERSION),
        Some(value) => value
            .as_u64()
            .filter(|v| *v >= 1)
            .and_then(|v| SchemaVersion::try_from(v).ok())
            .ok_or_else(|| SchemaMigrationError::InvalidVersion(value.to_string())),
    }
}

/// Bring `record` to the current version. Works on a copy: on error the
/// caller's value is untouched and nothing partial is returned.
pub fn upgrade(
    registry: &MigrationRegistry,
    record: &Value,
) -> Result<(Value, MigrationOutcome), SchemaMigrationError> {
    let from = detect_version(record)?;
    if from > CURRENT_SCHEMA_VERSION {
        return Err(SchemaMigrationError::NewerThanCurrent {
            found: from,
            current: CURRENT_SCHEMA_VERSION,
        });
    }

    let mut working = record.clone();
    let steps = registry.migrate(&mut working, from, CURRENT_SCHEMA_VERSION)?;
    if !steps.is_empty() {
        info!(from, to = CURRENT_SCHEMA_VERSION, "Migrated project record");
    }
    Ok((
        working,
        MigrationOutcome {
            from,
            to: CURRENT_SCHEMA_VERSION,
            steps,
        },
    ))
}

// ============================================================================
// Steps
// ============================================================================

fn object_mut(data: &mut Value) -> Result<&mut Map<String, Value>> {
    data.as_object_mut()
        .ok_or_else(|| anyhow!("project record must be a JSON object"))
}

/// Positive number or the default.
fn positive_or(value: Option<&Value>, default: f64) -> f64 {
    value
        .and_then(|v| match v {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
        .filter(|v| *v > 0.0)
        .unwrap_or(default)
}

fn string_or_null(value: Option<&Value>) -> Value {
    match value {
        Some(Value::String(s)) => Value::String(s.clone()),
        Some(Value::Number(n)) => Value::String(n.to_string()),
        _ => Value::Null,
    }
}

/// Put `value` under `passthrough.legacy.<key>` unless something is there.
fn stash(root: &mut Map<String, Value>, key: &str, value: Value) {
    let passthrough = root
        .entry("passthrough")
        .or_insert_with(|| Value::Object(Map::new()));
    if !passthrough.is_object() {
        let previous = std::mem::replace(passthrough, Value::Object(Map::new()));
        if let Some(obj) = passthrough.as_object_mut() {
            obj.insert("previous".to_string(), previous);
        }
    }
    if let Some(obj) = passthrough.as_object_mut() {
        let legacy = obj
            .entry("legacy")
            .or_insert_with(|| Value::Object(Map::new()));
        if let Some(legacy) = legacy.as_object_mut() {
            legacy.entry(key.to_string()).or_insert(value);
        }
    }
}

const LEARNABLE_ADDON_CONFIGS: [&str; 3] = ["kamp", "stealthburner_leds", "timelapse"];

/// v1 → v2: derive printer limits and the MCU map from `advanced_overrides`,
/// default the layout, add-on config map and section map.
fn migrate_v1_to_v2(data: &mut Value) -> Result<()> {
    let root = object_mut(data)?;
    let overrides = root
        .get("advanced_overrides")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    let toolhead = root
        .get("toolhead")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    let mut mcu_map = Map::new();
    mcu_map.insert(
        "mcu".to_string(),
        json!({
            "serial": string_or_null(overrides.get("mcu.serial")),
            "canbus_uuid": Value::Null,
        }),
    );
    if toolhead.get("board").is_some_and(|b| b.as_str().is_some_and(|s| !s.is_empty())) {
        let uuid = match toolhead.get("canbus_uuid") {
            Some(Value::String(s)) if !s.is_empty() => Some(Value::String(s.clone())),
            _ => None,
        }
        .unwrap_or_else(|| string_or_null(overrides.get("toolhead.canbus_uuid")));
        mcu_map.insert(
            "toolhead".to_string(),
            json!({
                "serial": string_or_null(overrides.get("toolhead.serial")),
                "canbus_uuid": uuid,
            }),
        );
    }

    let optional = |key: &str, default: f64| match overrides.get(key) {
        Some(v) if !v.is_null() => json!(positive_or(Some(v), default)),
        _ => Value::Null,
    };
    let printer_limits = json!({
        "max_velocity": positive_or(overrides.get("motion.max_velocity"), 300.0),
        "max_accel": positive_or(overrides.get("motion.max_accel"), 3000.0),
        "max_z_velocity": optional("motion.max_z_velocity", 15.0),
        "max_z_accel": optional("motion.max_z_accel", 350.0),
        "square_corner_velocity": positive_or(overrides.get("motion.square_corner_velocity"), 5.0),
    });

    root.entry("output_layout")
        .or_insert_with(|| Value::from("source_tree"));
    root.entry("machine_attributes").or_insert_with(|| {
        json!({
            "root_file": "printer.cfg",
            "include_graph": {},
            "printer_limits": printer_limits,
            "mcu_map": mcu_map,
        })
    });
    root.entry("addon_configs").or_insert_with(|| {
        let configs: Map<String, Value> = LEARNABLE_ADDON_CONFIGS
            .iter()
            .map(|id| {
                (
                    id.to_string(),
                    json!({"enabled": false, "include_files": [], "sections": {}}),
                )
            })
            .collect();
        Value::Object(configs)
    });
    root.entry("section_map")
        .or_insert_with(|| Value::Object(Map::new()));
    Ok(())
}

/// Keys of the v3 top level.
const V3_KEYS: [&str; 8] = [
    "schema_version",
    "output_layout",
    "machine_attributes",
    "addon_configs",
    "section_map",
    "root_file",
    "include_graph",
    "passthrough",
];

/// Override keys consumed by v1 → v2.
const CONSUMED_OVERRIDES: [&str; 8] = [
    "motion.max_velocity",
    "motion.max_accel",
    "motion.max_z_velocity",
    "motion.max_z_accel",
    "motion.square_corner_velocity",
    "mcu.serial",
    "toolhead.serial",
    "toolhead.canbus_uuid",
];

/// Flat v1 fields that v3 folds into the attribute model.
const FLAT_FIELDS: [&str; 8] = [
    "board",
    "toolhead",
    "probe",
    "leds",
    "addons",
    "dimensions",
    "kinematics",
    "advanced_overrides",
];

/// Keys only the v2 `machine_attributes` carries.
const V2_ATTRIBUTE_KEYS: [&str; 4] = ["root_file", "include_graph", "printer_limits", "mcu_map"];

fn is_v3_shaped(root: &Map<String, Value>) -> bool {
    let attributes_v3 = root
        .get("machine_attributes")
        .and_then(Value::as_object)
        .is_none_or(|m| !V2_ATTRIBUTE_KEYS.iter().any(|k| m.contains_key(*k)));
    attributes_v3
        && !FLAT_FIELDS.iter().any(|k| root.contains_key(*k))
        && !root.get("addon_configs").is_some_and(Value::is_object)
}

/// v2 → v3: fold the flat legacy fields and the v2 machine attributes into
/// the attribute model, order add-on configs, hoist the root file and
/// include graph, and stash everything else.
fn migrate_v2_to_v3(data: &mut Value) -> Result<()> {
    let root = object_mut(data)?;

    let v2_attributes = root
        .get("machine_attributes")
        .cloned()
        .unwrap_or_else(|| Value::Object(Map::new()));
    if !v2_attributes.is_object() {
        return Err(anyhow!("machine_attributes must be an object"));
    }

    // Already in v3 shape: only fill defaults.
    if is_v3_shaped(root) {
        fill_v3_defaults(root);
        return Ok(());
    }

    let mut attributes = Map::new();
    let mut leftovers = Map::new();
    let mut v2_attrs = v2_attributes.as_object().cloned().unwrap_or_default();

    // Hoisted.
    let root_file = v2_attrs
        .remove("root_file")
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| "printer.cfg".to_string());
    let include_graph = v2_attrs
        .remove("include_graph")
        .filter(Value::is_object)
        .unwrap_or_else(|| Value::Object(Map::new()));

    if let Some(limits) = v2_attrs.remove("printer_limits").and_then(|v| v.as_object().cloned()) {
        let mut motion = Map::new();
        for key in ["max_velocity", "max_accel", "max_z_velocity", "max_z_accel", "square_corner_velocity"] {
            if let Some(v) = limits.get(key).filter(|v| v.is_number()) {
                motion.insert(key.to_string(), v.clone());
            }
        }
        attributes.insert("motion".to_string(), Value::Object(motion));
    }

    let mcu_map = v2_attrs
        .remove("mcu_map")
        .and_then(|v| v.as_object().cloned())
        .unwrap_or_default();
    if let Some(mcu) = mcu_map.get("mcu").and_then(Value::as_object) {
        attributes.insert(
            "mcu".to_string(),
            json!({
                "serial": mcu.get("serial").cloned().unwrap_or(Value::Null),
                "canbus_uuid": mcu.get("canbus_uuid").cloned().unwrap_or(Value::Null),
            }),
        );
    }

    // Flat v1 fields.
    let flat_toolhead = root.remove("toolhead").unwrap_or(Value::Null);
    let toolhead_board = flat_toolhead
        .get("board")
        .and_then(Value::as_str)
        .filter(|b| !b.is_empty())
        .map(str::to_string);
    let toolhead_enabled = flat_toolhead
        .get("enabled")
        .and_then(Value::as_bool)
        .unwrap_or(toolhead_board.is_some());
    if let (Some(board), true) = (toolhead_board, toolhead_enabled) {
        let mapped = mcu_map.get("toolhead").cloned().unwrap_or(Value::Null);
        let uuid = mapped
            .get("canbus_uuid")
            .filter(|v| !v.is_null())
            .or_else(|| flat_toolhead.get("canbus_uuid"))
            .cloned()
            .unwrap_or(Value::Null);
        attributes.insert(
            "toolhead".to_string(),
            json!({
                "board": board,
                "canbus_uuid": uuid,
                "serial": mapped.get("serial").cloned().unwrap_or(Value::Null),
            }),
        );
    } else if !flat_toolhead.is_null() {
        leftovers.insert("toolhead".to_string(), flat_toolhead);
    }

    for key in ["board", "dimensions", "leds", "addons", "kinematics"] {
        if let Some(v) = root.remove(key) {
            attributes.insert(key.to_string(), v);
        }
    }
    if let Some(probe) = root.remove("probe") {
        let enabled = probe.get("enabled").and_then(Value::as_bool).unwrap_or(false);
        attributes.insert(
            "probe".to_string(),
            json!({
                "enabled": enabled,
                "type": probe.get("type").cloned().unwrap_or(Value::Null),
            }),
        );
    }

    if let Some(overrides) = root.remove("advanced_overrides").and_then(|v| v.as_object().cloned()) {
        let rest: Map<String, Value> = overrides
            .into_iter()
            .filter(|(k, _)| !CONSUMED_OVERRIDES.contains(&k.as_str()))
            .collect();
        if !rest.is_empty() {
            leftovers.insert("advanced_overrides".to_string(), Value::Object(rest));
        }
    }

    // Anything else in the v2 machine attributes (`*_sections`, …).
    for (key, value) in v2_attrs {
        leftovers.insert(format!("machine_attributes.{}", key), value);
    }

    let addon_order: Vec<String> = attributes
        .get("addons")
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default();
    let addon_configs = match root.remove("addon_configs") {
        Some(Value::Object(map)) => order_addon_configs(map, &addon_order),
        Some(Value::Array(list)) => Value::Array(list),
        Some(other) => {
            leftovers.insert("addon_configs".to_string(), other);
            Value::Array(Vec::new())
        }
        None => Value::Array(Vec::new()),
    };

    let section_map = match root.remove("section_map") {
        Some(value) => invert_section_map(value, &mut leftovers),
        None => Value::Object(Map::new()),
    };

    // Unknown top-level keys (preset_id, thermistors, macro_packs, …).
    let unknown: Vec<String> = root
        .keys()
        .filter(|k| !V3_KEYS.contains(&k.as_str()))
        .cloned()
        .collect();
    for key in unknown {
        if let Some(v) = root.remove(&key) {
            leftovers.insert(key, v);
        }
    }

    root.insert("machine_attributes".to_string(), Value::Object(attributes));
    root.insert("addon_configs".to_string(), addon_configs);
    root.insert("section_map".to_string(), section_map);
    root.entry("root_file").or_insert(Value::String(root_file));
    root.entry("include_graph").or_insert(include_graph);
    for (key, value) in leftovers {
        stash(root, &key, value);
    }
    fill_v3_defaults(root);
    Ok(())
}

fn fill_v3_defaults(root: &mut Map<String, Value>) {
    root.entry("output_layout")
        .or_insert_with(|| Value::from("source_tree"));
    root.entry("machine_attributes")
        .or_insert_with(|| Value::Object(Map::new()));
    root.entry("addon_configs")
        .or_insert_with(|| Value::Array(Vec::new()));
    root.entry("section_map")
        .or_insert_with(|| Value::Object(Map::new()));
    root.entry("root_file")
        .or_insert_with(|| Value::from("printer.cfg"));
    root.entry("include_graph")
        .or_insert_with(|| Value::Object(Map::new()));
    root.entry("passthrough")
        .or_insert_with(|| Value::Object(Map::new()));
}

/// `{id: {...}}` → `[{id, ...}]`, enabled add-ons in enabling order first,
/// then the rest sorted by id.
fn order_addon_configs(mut map: Map<String, Value>, order: &[String]) -> Value {
    let mut ids: Vec<String> = order.iter().filter(|id| map.contains_key(*id)).cloned().collect();
    let mut rest: Vec<String> = map.keys().filter(|k| !ids.contains(k)).cloned().collect();
    rest.sort();
    ids.extend(rest);

    let list = ids
        .into_iter()
        .filter_map(|id| {
            let mut entry = match map.remove(&id)? {
                Value::Object(obj) => obj,
                other => {
                    let mut obj = Map::new();
                    obj.insert("enabled".to_string(), Value::Bool(other.as_bool().unwrap_or(false)));
                    obj
                }
            };
            entry.insert("id".to_string(), Value::String(id));
            Some(Value::Object(entry))
        })
        .collect();
    Value::Array(list)
}

/// v2 section maps were `file → {section → {key → value}}`; v3 records
/// `section → file`. String-valued maps are already in v3 shape.
fn invert_section_map(value: Value, leftovers: &mut Map<String, Value>) -> Value {
    let Value::Object(map) = value else {
        leftovers.insert("section_map".to_string(), value);
        return Value::Object(Map::new());
    };
    if map.values().all(Value::is_string) {
        return Value::Object(map);
    }

    let mut inverted = Map::new();
    for (file, sections) in &map {
        match sections {
            Value::Object(sections) => {
                for section in sections.keys() {
                    let id = section.trim().to_lowercase();
                    if !id.starts_with("include ") {
                        inverted
                            .entry(id)
                            .or_insert_with(|| Value::String(file.clone()));
                    }
                }
            }
            Value::String(path) => {
                inverted.insert(file.trim().to_lowercase(), Value::String(path.clone()));
            }
            _ => {}
        }
    }
    leftovers.insert("section_map".to_string(), Value::Object(map));
    Value::Object(inverted)
}
