//! Attribute model: the typed snapshot of machine choices.
//!
//! The model is plain data. [`AttributeModel::check`] verifies the
//! invariants that depend on a bundle registry (every referenced id resolves,
//! add-on compatibility, transport requirements, pin usage) and reports them
//! as findings located at [`ATTRIBUTES_LOCATION`].

use crate::bundles::BundleRegistry;
use crate::model::finding::{ATTRIBUTES_LOCATION, Category, ValidationFinding};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// MCU transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    #[default]
    Usb,
    Can,
}

/// Connection settings of the main MCU.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct McuSettings {
    #[serde(default)]
    pub serial: Option<String>,
    #[serde(default)]
    pub canbus_uuid: Option<String>,
}

/// Selected toolhead board.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolheadSelection {
    #[serde(default)]
    pub board: String,
    /// Overrides the transport declared by the bundle.
    #[serde(default)]
    pub transport: Option<Transport>,
    #[serde(default)]
    pub canbus_uuid: Option<String>,
    #[serde(default)]
    pub serial: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dimensions {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl Default for Dimensions {
    fn default() -> Self {
        Self { x: 300, y: 300, z: 300 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionLimits {
    #[serde(default = "default_max_velocity")]
    pub max_velocity: f64,
    #[serde(default = "default_max_accel")]
    pub max_accel: f64,
    #[serde(default)]
    pub max_z_velocity: Option<f64>,
    #[serde(default)]
    pub max_z_accel: Option<f64>,
    #[serde(default = "default_square_corner_velocity")]
    pub square_corner_velocity: f64,
}

impl Default for MotionLimits {
    fn default() -> Self {
        Self {
            max_velocity: default_max_velocity(),
            max_accel: default_max_accel(),
            max_z_velocity: None,
            max_z_accel: None,
            square_corner_velocity: default_square_corner_velocity(),
        }
    }
}

fn default_max_velocity() -> f64 {
    300.0
}

fn default_max_accel() -> f64 {
    3000.0
}

fn default_square_corner_velocity() -> f64 {
    5.0
}

/// Stepper driver attached to a stepper section (`[tmc2209 stepper_x]`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverAssignment {
    /// Driver section prefix, e.g. `tmc2209`.
    pub kind: String,
    /// Pin alias of the UART/CS line.
    pub uart: String,
    pub run_current: f64,
    #[serde(default)]
    pub stealthchop_threshold: Option<u32>,
}

/// Stepper section assignment. Pin fields are aliases into the board (or
/// toolhead) pin map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepperAssignment {
    pub step: String,
    pub dir: String,
    pub enable: String,
    #[serde(default)]
    pub endstop: Option<String>,
    #[serde(default = "default_rotation_distance")]
    pub rotation_distance: f64,
    #[serde(default = "default_microsteps")]
    pub microsteps: u32,
    #[serde(default)]
    pub full_steps_per_rotation: Option<u32>,
    #[serde(default)]
    pub position_max: Option<f64>,
    #[serde(default)]
    pub driver: Option<DriverAssignment>,
    #[serde(default)]
    pub on_toolhead: bool,
}

fn default_rotation_distance() -> f64 {
    40.0
}

fn default_microsteps() -> u32 {
    16
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProbeSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    /// Pin alias of the probe signal.
    #[serde(default)]
    pub pin: Option<String>,
    #[serde(default)]
    pub x_offset: f64,
    #[serde(default)]
    pub y_offset: f64,
    #[serde(default)]
    pub on_toolhead: bool,
}

/// Heater section (`extruder`, `heater_bed`, `heater_generic <name>`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeaterAssignment {
    /// Pin alias of the heater output.
    pub heater: String,
    /// Pin alias of the thermistor input.
    pub sensor: String,
    pub sensor_type: String,
    #[serde(default)]
    pub min_temp: f64,
    pub max_temp: f64,
    #[serde(default)]
    pub on_toolhead: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedSettings {
    #[serde(default)]
    pub enabled: bool,
    /// Physical pin, written as-is.
    #[serde(default)]
    pub pin: Option<String>,
    #[serde(default = "default_chain_count")]
    pub chain_count: u32,
    #[serde(default = "default_color_order")]
    pub color_order: String,
    #[serde(default)]
    pub initial_red: f64,
    #[serde(default)]
    pub initial_green: f64,
    #[serde(default)]
    pub initial_blue: f64,
}

impl Default for LedSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            pin: None,
            chain_count: default_chain_count(),
            color_order: default_color_order(),
            initial_red: 0.0,
            initial_green: 0.0,
            initial_blue: 0.0,
        }
    }
}

fn default_chain_count() -> u32 {
    1
}

fn default_color_order() -> String {
    "GRB".to_string()
}

fn default_kinematics() -> String {
    "corexy".to_string()
}

/// Typed snapshot of everything the user chose for one machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeModel {
    #[serde(default)]
    pub board: String,
    #[serde(default)]
    pub toolhead: Option<ToolheadSelection>,
    #[serde(default)]
    pub mcu: McuSettings,
    #[serde(default = "default_kinematics")]
    pub kinematics: String,
    #[serde(default)]
    pub dimensions: Dimensions,
    #[serde(default)]
    pub motion: MotionLimits,
    #[serde(default)]
    pub steppers: BTreeMap<String, StepperAssignment>,
    #[serde(default)]
    pub probe: ProbeSettings,
    #[serde(default)]
    pub heaters: BTreeMap<String, HeaterAssignment>,
    #[serde(default)]
    pub leds: LedSettings,
    /// Enabled add-on ids, in the order the user enabled them.
    #[serde(default)]
    pub addons: Vec<String>,
    /// Per-add-on template settings (add-on id → name → scalar).
    #[serde(default)]
    pub addon_settings: BTreeMap<String, BTreeMap<String, Value>>,
    /// Key overrides applied on top of generated sections.
    #[serde(default)]
    pub section_overrides: BTreeMap<String, BTreeMap<String, String>>,
}

impl Default for AttributeModel {
    fn default() -> Self {
        Self::new("")
    }
}

/// Preset identity used for add-on compatibility checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresetIdentity {
    pub family: String,
    pub preset_id: Option<String>,
}

impl Default for PresetIdentity {
    fn default() -> Self {
        Self {
            family: "voron".to_string(),
            preset_id: None,
        }
    }
}

impl AttributeModel {
    pub fn new(board: impl Into<String>) -> Self {
        Self {
            board: board.into(),
            toolhead: None,
            mcu: McuSettings::default(),
            kinematics: default_kinematics(),
            dimensions: Dimensions::default(),
            motion: MotionLimits::default(),
            steppers: BTreeMap::new(),
            probe: ProbeSettings::default(),
            heaters: BTreeMap::new(),
            leds: LedSettings::default(),
            addons: Vec::new(),
            addon_settings: BTreeMap::new(),
            section_overrides: BTreeMap::new(),
        }
    }

    pub fn with_addon(mut self, id: impl Into<String>) -> Self {
        self.addons.push(id.into());
        self
    }

    pub fn with_toolhead(mut self, toolhead: ToolheadSelection) -> Self {
        self.toolhead = Some(toolhead);
        self
    }

    /// Toolhead selection with a non-empty board id.
    pub fn active_toolhead(&self) -> Option<&ToolheadSelection> {
        self.toolhead.as_ref().filter(|t| !t.board.trim().is_empty())
    }

    /// Effective toolhead transport: explicit selection, then bundle, then USB.
    pub fn toolhead_transport(&self, registry: &BundleRegistry) -> Option<Transport> {
        let toolhead = self.active_toolhead()?;
        Some(
            toolhead
                .transport
                .or_else(|| registry.toolhead_board(&toolhead.board).and_then(|b| b.transport))
                .unwrap_or_default(),
        )
    }

    /// Check registry-dependent invariants.
    pub fn check(&self, registry: &BundleRegistry, preset: &PresetIdentity) -> Vec<ValidationFinding> {
        let mut findings = Vec::new();
        let at = |category: Category, key: &str, message: String| {
            ValidationFinding::blocking(category, ATTRIBUTES_LOCATION, message).with_key(key)
        };

        if self.board.trim().is_empty() {
            findings.push(at(Category::Resolution, "board", "no board selected".to_string()));
        } else if registry.board(&self.board).is_none() {
            findings.push(at(
                Category::Resolution,
                "board",
                format!("board '{}' is not in the bundle registry", self.board),
            ));
        }

        if let Some(toolhead) = self.active_toolhead() {
            if registry.toolhead_board(&toolhead.board).is_none() {
                findings.push(at(
                    Category::Resolution,
                    "toolhead.board",
                    format!("toolhead board '{}' is not in the bundle registry", toolhead.board),
                ));
            } else {
                let has_uuid = toolhead
                    .canbus_uuid
                    .as_deref()
                    .is_some_and(|u| !u.trim().is_empty());
                match self.toolhead_transport(registry) {
                    Some(Transport::Can) if !has_uuid => findings.push(at(
                        Category::Role,
                        "toolhead.canbus_uuid",
                        "CAN toolhead board is selected but canbus_uuid is empty".to_string(),
                    )),
                    Some(Transport::Usb) if has_uuid => findings.push(
                        ValidationFinding::warning(
                            Category::Role,
                            ATTRIBUTES_LOCATION,
                            "USB toolhead board selected; canbus_uuid will be ignored",
                        )
                        .with_key("toolhead.canbus_uuid"),
                    ),
                    _ => {}
                }
            }
        }

        let mut multi_material = Vec::new();
        let mut wants_toolhead = Vec::new();
        for id in &self.addons {
            let Some(addon) = registry.addon(id) else {
                findings.push(at(
                    Category::Resolution,
                    "addons",
                    format!("add-on '{}' is not in the bundle registry", id),
                ));
                continue;
            };
            if !addon.supports(&preset.family, preset.preset_id.as_deref()) {
                findings.push(at(
                    Category::Resolution,
                    "addons",
                    format!("add-on '{}' does not support preset family '{}'", id, preset.family),
                ));
            }
            if addon.multi_material {
                multi_material.push(id.as_str());
            }
            if addon.multi_material || addon.recommends_toolhead {
                wants_toolhead.push(id.as_str());
            }
        }
        if multi_material.len() > 1 {
            findings.push(at(
                Category::Conflict,
                "addons",
                format!(
                    "only one multi-material add-on can be active; selected: {}",
                    multi_material.join(", ")
                ),
            ));
        }
        if !wants_toolhead.is_empty() && self.active_toolhead().is_none() {
            findings.push(
                ValidationFinding::warning(
                    Category::Role,
                    ATTRIBUTES_LOCATION,
                    format!(
                        "add-ons usually need a toolhead board: {}",
                        wants_toolhead.join(", ")
                    ),
                )
                .with_key("toolhead"),
            );
        }

        for (axis, value) in [("x", self.dimensions.x), ("y", self.dimensions.y), ("z", self.dimensions.z)] {
            if value == 0 {
                findings.push(at(
                    Category::NumericRange,
                    &format!("dimensions.{}", axis),
                    format!("dimension {} must be positive", axis.to_uppercase()),
                ));
            }
        }

        if self.leds.enabled {
            if self.leds.pin.as_deref().is_none_or(|p| p.trim().is_empty()) {
                findings.push(at(
                    Category::Role,
                    "leds.pin",
                    "LED control is enabled but no LED pin is set".to_string(),
                ));
            }
            if !(1..=256).contains(&self.leds.chain_count) {
                findings.push(
                    ValidationFinding::warning(
                        Category::NumericRange,
                        ATTRIBUTES_LOCATION,
                        format!("LED chain_count {} is outside 1..=256", self.leds.chain_count),
                    )
                    .with_key("leds.chain_count"),
                );
            }
            for (name, value) in [
                ("initial_red", self.leds.initial_red),
                ("initial_green", self.leds.initial_green),
                ("initial_blue", self.leds.initial_blue),
            ] {
                if !(0.0..=1.0).contains(&value) {
                    findings.push(
                        ValidationFinding::warning(
                            Category::NumericRange,
                            ATTRIBUTES_LOCATION,
                            format!("LED {} {} is outside 0..=1", name, value),
                        )
                        .with_key(format!("leds.{}", name)),
                    );
                }
            }
        }

        findings.extend(self.pin_conflicts(registry));
        findings
    }

    /// Physical pins claimed by more than one assignment on the same MCU.
    fn pin_conflicts(&self, registry: &BundleRegistry) -> Vec<ValidationFinding> {
        let board_pins = registry.board(&self.board).map(|b| &b.pins);
        let toolhead_pins = self
            .active_toolhead()
            .and_then(|t| registry.toolhead_board(&t.board))
            .map(|b| &b.pins);

        // (on_toolhead, physical pin) -> roles using it
        let mut usage: BTreeMap<(bool, String), Vec<String>> = BTreeMap::new();
        let mut claim = |on_toolhead: bool, alias: &str, role: String| {
            let pins = if on_toolhead { toolhead_pins } else { board_pins };
            if let Some(pin) = pins.and_then(|p| p.get(alias)) {
                usage.entry((on_toolhead, pin.clone())).or_default().push(role);
            }
        };

        for (name, stepper) in &self.steppers {
            claim(stepper.on_toolhead, &stepper.step, format!("{}.step", name));
            claim(stepper.on_toolhead, &stepper.dir, format!("{}.dir", name));
            claim(stepper.on_toolhead, &stepper.enable, format!("{}.enable", name));
            if let Some(endstop) = &stepper.endstop {
                claim(stepper.on_toolhead, endstop, format!("{}.endstop", name));
            }
            if let Some(driver) = &stepper.driver {
                claim(stepper.on_toolhead, &driver.uart, format!("{}.uart", name));
            }
        }
        for (name, heater) in &self.heaters {
            claim(heater.on_toolhead, &heater.heater, format!("{}.heater", name));
            claim(heater.on_toolhead, &heater.sensor, format!("{}.sensor", name));
        }
        if self.probe.enabled
            && let Some(pin) = &self.probe.pin
        {
            claim(self.probe.on_toolhead, pin, "probe.pin".to_string());
        }

        usage
            .into_iter()
            .filter(|(_, roles)| roles.len() > 1)
            .map(|((on_toolhead, pin), roles)| {
                let mcu = if on_toolhead { "toolhead" } else { "mcu" };
                ValidationFinding::blocking(
                    Category::Conflict,
                    ATTRIBUTES_LOCATION,
                    format!(
                        "pin {} on {} is assigned more than once: {}",
                        pin,
                        mcu,
                        roles.join(", ")
                    ),
                )
                .with_key("pins")
            })
            .collect()
    }
}
