//! Bundle record shapes and their decoding from JSON values.

use crate::error::{BundleKind, BundleLoadError};
use crate::model::Transport;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A main or toolhead control board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardBundle {
    pub id: String,
    pub label: String,
    pub mcu: String,
    #[serde(default)]
    pub serial_hint: Option<String>,
    /// Pin alias → physical pin.
    pub pins: BTreeMap<String, String>,
    /// Section → ordered pin roles (`stepper_x` → `[step, dir, enable]`).
    #[serde(default)]
    pub layout: BTreeMap<String, Vec<String>>,
    /// Toolhead boards only.
    #[serde(default)]
    pub transport: Option<Transport>,
}

impl BoardBundle {
    pub fn new(id: impl Into<String>, label: impl Into<String>, mcu: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            mcu: mcu.into(),
            serial_hint: None,
            pins: BTreeMap::new(),
            layout: BTreeMap::new(),
            transport: None,
        }
    }

    pub fn with_pin(mut self, alias: impl Into<String>, pin: impl Into<String>) -> Self {
        self.pins.insert(alias.into(), pin.into());
        self
    }

    /// Resolve a layout hint role for `section`: `role` first, then
    /// `<section>_<role>`.
    pub fn layout_pin(&self, section: &str, role: &str) -> Option<&str> {
        self.pins
            .get(role)
            .or_else(|| self.pins.get(&format!("{}_{}", section, role)))
            .map(String::as_str)
    }
}

fn default_families() -> Vec<String> {
    vec!["voron".to_string()]
}

/// An optional add-on package.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddonBundle {
    pub id: String,
    pub label: String,
    /// Template reference for the single-file form. Empty means
    /// `addons/<id>.cfg.j2`.
    #[serde(default)]
    pub template: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub multi_material: bool,
    #[serde(default)]
    pub recommends_toolhead: bool,
    #[serde(default = "default_families")]
    pub supported_families: Vec<String>,
    #[serde(default)]
    pub supported_presets: Vec<String>,
    /// Output files the root should include. Empty means every package output.
    #[serde(default)]
    pub include_files: Vec<String>,
    /// Output path → template reference, for multi-file add-ons.
    #[serde(default)]
    pub package_templates: BTreeMap<String, String>,
    #[serde(default)]
    pub output_files: Vec<String>,
    #[serde(default)]
    pub learned: bool,
}

impl AddonBundle {
    pub fn new(id: impl Into<String>, label: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            template: template.into(),
            description: String::new(),
            multi_material: false,
            recommends_toolhead: false,
            supported_families: default_families(),
            supported_presets: Vec::new(),
            include_files: Vec::new(),
            package_templates: BTreeMap::new(),
            output_files: Vec::new(),
            learned: false,
        }
    }

    pub fn template_ref(&self) -> String {
        if self.template.trim().is_empty() {
            format!("addons/{}.cfg.j2", self.id)
        } else {
            self.template.clone()
        }
    }

    /// Whether the add-on may be enabled for a preset. An empty
    /// `supported_presets` list accepts every preset of a supported family.
    pub fn supports(&self, family: &str, preset_id: Option<&str>) -> bool {
        let family_ok = self
            .supported_families
            .iter()
            .any(|f| f.eq_ignore_ascii_case(family));
        let preset_ok = match preset_id {
            Some(id) if !self.supported_presets.is_empty() => {
                self.supported_presets.iter().any(|p| p == id)
            }
            _ => true,
        };
        family_ok && preset_ok
    }

    pub fn is_package(&self) -> bool {
        !self.package_templates.is_empty()
    }
}

/// Decode one record. Unknown fields are ignored.
pub fn decode<T>(kind: BundleKind, value: &Value, source_label: &str) -> Result<T, BundleLoadError>
where
    T: for<'de> Deserialize<'de> + HasId,
{
    let Some(object) = value.as_object() else {
        return Err(BundleLoadError::NotAnObject {
            kind,
            source_label: source_label.to_string(),
        });
    };
    let id = object
        .get("id")
        .and_then(Value::as_str)
        .unwrap_or("<missing id>")
        .to_string();
    let invalid = |reason: String| BundleLoadError::Invalid {
        kind,
        id: id.clone(),
        source_label: source_label.to_string(),
        reason,
    };

    let record: T = serde_json::from_value(value.clone()).map_err(|e| invalid(e.to_string()))?;
    if record.id().trim().is_empty() {
        return Err(invalid("id must not be empty".to_string()));
    }
    Ok(record)
}

/// Records keyed by id.
pub trait HasId {
    fn id(&self) -> &str;
}

impl HasId for BoardBundle {
    fn id(&self) -> &str {
        &self.id
    }
}

impl HasId for AddonBundle {
    fn id(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_ignores_unknown_fields() {
        let value = json!({
            "id": "octopus",
            "label": "BTT Octopus",
            "mcu": "stm32f446xx",
            "pins": {"x_step": "PF13"},
            "vendor_url": "https://example.invalid"
        });
        let board: BoardBundle = decode(BundleKind::Board, &value, "root-a").unwrap();
        assert_eq!(board.pins["x_step"], "PF13");
        assert!(board.transport.is_none());
    }

    #[test]
    fn test_decode_board_requires_mcu_and_pins() {
        let value = json!({"id": "bad", "label": "Bare board"});
        let err = decode::<BoardBundle>(BundleKind::Board, &value, "root-a").unwrap_err();
        match err {
            BundleLoadError::Invalid { id, kind, reason, .. } => {
                assert_eq!(id, "bad");
                assert_eq!(kind, BundleKind::Board);
                assert!(reason.contains("mcu"), "{reason}");
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let no_pins = json!({"id": "bad", "label": "Bare board", "mcu": "rp2040"});
        let err = decode::<BoardBundle>(BundleKind::ToolheadBoard, &no_pins, "root-a").unwrap_err();
        assert!(matches!(err, BundleLoadError::Invalid { ref reason, .. } if reason.contains("pins")));
    }

    #[test]
    fn test_decode_missing_label_is_invalid() {
        let value = json!({"id": "ercf"});
        let err = decode::<AddonBundle>(BundleKind::Addon, &value, "root-a").unwrap_err();
        match err {
            BundleLoadError::Invalid { id, kind, .. } => {
                assert_eq!(id, "ercf");
                assert_eq!(kind, BundleKind::Addon);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_decode_rejects_non_object_and_empty_id() {
        assert!(matches!(
            decode::<BoardBundle>(BundleKind::Board, &json!([1, 2]), "x"),
            Err(BundleLoadError::NotAnObject { .. })
        ));
        assert!(matches!(
            decode::<BoardBundle>(BundleKind::Board, &json!({"id": " ", "label": "x"}), "x"),
            Err(BundleLoadError::Invalid { .. })
        ));
    }

    #[test]
    fn test_addon_defaults_and_support() {
        let addon: AddonBundle =
            decode(BundleKind::Addon, &json!({"id": "kamp", "label": "KAMP"}), "x").unwrap();
        assert_eq!(addon.template_ref(), "addons/kamp.cfg.j2");
        assert!(addon.supports("Voron", None));
        assert!(!addon.supports("prusa", None));

        let mut limited = addon.clone();
        limited.supported_presets = vec!["voron-2.4-350".into()];
        assert!(limited.supports("voron", Some("voron-2.4-350")));
        assert!(!limited.supports("voron", Some("voron-trident-300")));
    }

    #[test]
    fn test_layout_pin_fallback() {
        let board = BoardBundle::new("b", "B", "rp2040")
            .with_pin("fan_pin", "gpio1")
            .with_pin("heater_bed_heater_pin", "gpio2");
        assert_eq!(board.layout_pin("fan", "fan_pin"), Some("gpio1"));
        assert_eq!(board.layout_pin("heater_bed", "heater_pin"), Some("gpio2"));
        assert_eq!(board.layout_pin("heater_bed", "sensor_pin"), None);
    }
}
