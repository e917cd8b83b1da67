//! Sections built in code from the attribute model and board bundles.
//!
//! Board pin tables, stepper/driver/heater blocks and the `[printer]` block
//! iterate over assignments, which placeholders cannot express, so they are
//! assembled here as [`ConfigSection`]s and written by the parser's writer.

use super::format_number;
use crate::bundles::BoardBundle;
use crate::error::{FieldErrorReason, TemplateFieldError};
use crate::model::{
    AttributeModel, ConfigEntry, ConfigSection, StepperAssignment, ToolheadSelection, Transport,
};
use std::collections::BTreeSet;

/// MCU name of the toolhead board in generated sections.
pub const TOOLHEAD_MCU: &str = "toolhead";

/// Which MCU a set of assignments lives on.
#[derive(Debug, Clone, Copy)]
struct Target<'a> {
    template: &'a str,
    board: &'a BoardBundle,
    on_toolhead: bool,
}

impl Target<'_> {
    /// Resolve a pin alias. Klipper pin modifiers (`^`, `~`, `!`) in front of
    /// the alias are kept; toolhead pins get the `toolhead:` prefix.
    fn pin(&self, alias: &str) -> Result<String, TemplateFieldError> {
        let name = alias.trim_start_matches(['^', '~', '!']);
        let modifiers = &alias[..alias.len() - name.len()];
        let physical = self
            .board
            .pins
            .get(name)
            .ok_or_else(|| TemplateFieldError::unknown_pin(self.template, name))?;
        Ok(if self.on_toolhead {
            format!("{}{}:{}", modifiers, TOOLHEAD_MCU, physical)
        } else {
            format!("{}{}", modifiers, physical)
        })
    }
}

fn pin_table(section: String, mcu: &str, board: &BoardBundle) -> ConfigSection {
    let count = board.pins.len();
    let lines = board.pins.iter().enumerate().map(|(idx, (alias, pin))| {
        let comma = if idx + 1 < count { "," } else { "" };
        format!("{}={}{}", alias, pin, comma)
    });
    ConfigSection::generated(section)
        .with("mcu", mcu)
        .with_entry(ConfigEntry::multiline("aliases", lines.collect::<Vec<_>>()))
}

fn default_serial(board: &BoardBundle) -> String {
    board
        .serial_hint
        .clone()
        .unwrap_or_else(|| format!("/dev/serial/by-id/usb-Klipper_{}", board.mcu))
}

fn position_max(name: &str, stepper: &StepperAssignment, attrs: &AttributeModel) -> Option<f64> {
    stepper.position_max.or(match name {
        "stepper_x" => Some(attrs.dimensions.x as f64),
        "stepper_y" => Some(attrs.dimensions.y as f64),
        "stepper_z" => Some(attrs.dimensions.z as f64),
        _ => None,
    })
}

/// Stepper, driver and heater sections for one MCU, in that order per name.
fn motion_sections(
    attrs: &AttributeModel,
    target: Target<'_>,
) -> Result<Vec<ConfigSection>, TemplateFieldError> {
    let mut sections = Vec::new();

    for (name, stepper) in attrs.steppers.iter().filter(|(_, s)| s.on_toolhead == target.on_toolhead) {
        let mut section = ConfigSection::generated(name.as_str())
            .with("step_pin", target.pin(&stepper.step)?)
            .with("dir_pin", target.pin(&stepper.dir)?)
            .with("enable_pin", target.pin(&stepper.enable)?)
            .with("microsteps", stepper.microsteps.to_string())
            .with("rotation_distance", format_number(stepper.rotation_distance));
        if let Some(steps) = stepper.full_steps_per_rotation {
            section = section.with("full_steps_per_rotation", steps.to_string());
        }
        if let Some(endstop) = &stepper.endstop {
            section = section.with("endstop_pin", target.pin(endstop)?);
        }
        if let Some(max) = position_max(name, stepper, attrs) {
            section = section.with("position_max", format_number(max));
        }
        sections.push(section);

        if let Some(driver) = &stepper.driver {
            let mut driver_section = ConfigSection::generated(format!("{} {}", driver.kind, name))
                .with("uart_pin", target.pin(&driver.uart)?)
                .with("run_current", format_number(driver.run_current));
            if let Some(threshold) = driver.stealthchop_threshold {
                driver_section = driver_section.with("stealthchop_threshold", threshold.to_string());
            }
            sections.push(driver_section);
        }
    }

    for (name, heater) in attrs.heaters.iter().filter(|(_, h)| h.on_toolhead == target.on_toolhead) {
        let entries = [
            ("heater_pin", target.pin(&heater.heater)?),
            ("sensor_type", heater.sensor_type.clone()),
            ("sensor_pin", target.pin(&heater.sensor)?),
            ("min_temp", format_number(heater.min_temp)),
            ("max_temp", format_number(heater.max_temp)),
        ];
        // `[extruder]` carries both the stepper and the heater.
        let existing = sections.iter_mut().find(|s| s.id() == name.to_lowercase());
        match existing {
            Some(section) => {
                for (key, value) in entries {
                    section.set(key, value);
                }
            }
            None => {
                let mut section = ConfigSection::generated(name.as_str());
                for (key, value) in entries {
                    section = section.with(key, value);
                }
                sections.push(section);
            }
        }
    }

    let probe = &attrs.probe;
    if probe.enabled && probe.on_toolhead == target.on_toolhead {
        let Some(alias) = probe.pin.as_deref() else {
            return Err(TemplateFieldError::missing(target.template, "probe.pin"));
        };
        let section = match probe.kind.as_deref() {
            Some("bltouch") => ConfigSection::generated("bltouch").with("sensor_pin", target.pin(alias)?),
            _ => ConfigSection::generated("probe").with("pin", target.pin(alias)?),
        };
        sections.push(
            section
                .with("x_offset", format_number(probe.x_offset))
                .with("y_offset", format_number(probe.y_offset)),
        );
    }

    Ok(sections)
}

/// Sections from the bundle's layout hint that no assignment already covers.
fn layout_sections(
    target: Target<'_>,
    covered: &BTreeSet<String>,
) -> Result<Vec<ConfigSection>, TemplateFieldError> {
    let mut sections = Vec::new();
    for (name, roles) in &target.board.layout {
        if covered.contains(&name.to_lowercase()) {
            continue;
        }
        let mut section = ConfigSection::generated(name.as_str());
        for role in roles {
            let key = if role == "pin" || role.ends_with("_pin") {
                role.clone()
            } else {
                format!("{}_pin", role)
            };
            let pin = target
                .board
                .layout_pin(name, role)
                .or_else(|| target.board.layout_pin(name, &key))
                .ok_or_else(|| TemplateFieldError::unknown_pin(target.template, &format!("{}_{}", name, role)))?;
            let pin = if target.on_toolhead {
                format!("{}:{}", TOOLHEAD_MCU, pin)
            } else {
                pin.to_string()
            };
            section = section.with(key, pin);
        }
        sections.push(section);
    }
    Ok(sections)
}

fn with_layout(
    mut sections: Vec<ConfigSection>,
    target: Target<'_>,
) -> Result<Vec<ConfigSection>, TemplateFieldError> {
    let covered: BTreeSet<String> = sections.iter().map(ConfigSection::id).collect();
    sections.extend(layout_sections(target, &covered)?);
    Ok(sections)
}

/// `board_<id>.cfg`: main MCU, pin alias table, then everything on the main
/// board.
pub fn board_sections(
    template: &str,
    attrs: &AttributeModel,
    board: &BoardBundle,
) -> Result<Vec<ConfigSection>, TemplateFieldError> {
    let mut mcu = ConfigSection::generated("mcu");
    match (&attrs.mcu.canbus_uuid, &attrs.mcu.serial) {
        (Some(uuid), _) if !uuid.trim().is_empty() => mcu.set("canbus_uuid", uuid.trim()),
        (_, Some(serial)) if !serial.trim().is_empty() => mcu.set("serial", serial.trim()),
        _ => mcu.set("serial", default_serial(board)),
    }

    let target = Target {
        template,
        board,
        on_toolhead: false,
    };
    let mut sections = vec![mcu, pin_table(format!("board_pins board_{}", board.id), "mcu", board)];
    sections.extend(with_layout(motion_sections(attrs, target)?, target)?);
    Ok(sections)
}

/// `toolhead_<id>.cfg`: toolhead MCU, its pin table, then everything marked
/// `on_toolhead`.
pub fn toolhead_sections(
    template: &str,
    attrs: &AttributeModel,
    selection: &ToolheadSelection,
    board: &BoardBundle,
    transport: Transport,
) -> Result<Vec<ConfigSection>, TemplateFieldError> {
    let mut mcu = ConfigSection::generated(format!("mcu {}", TOOLHEAD_MCU));
    match transport {
        Transport::Can => {
            let uuid = selection
                .canbus_uuid
                .as_deref()
                .map(str::trim)
                .filter(|u| !u.is_empty())
                .ok_or_else(|| TemplateFieldError::missing(template, "toolhead.canbus_uuid"))?;
            mcu.set("canbus_uuid", uuid);
        }
        Transport::Usb => {
            let serial = selection
                .serial
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| default_serial(board));
            mcu.set("serial", serial);
        }
    }

    let target = Target {
        template,
        board,
        on_toolhead: true,
    };
    let mut sections = vec![
        mcu,
        pin_table(format!("board_pins toolhead_{}", board.id), TOOLHEAD_MCU, board),
    ];
    sections.extend(with_layout(motion_sections(attrs, target)?, target)?);
    Ok(sections)
}

/// `leds.cfg`: the status LED chain.
pub fn led_sections(template: &str, attrs: &AttributeModel) -> Result<Vec<ConfigSection>, TemplateFieldError> {
    let leds = &attrs.leds;
    let pin = leds
        .pin
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .ok_or_else(|| TemplateFieldError::missing(template, "leds.pin"))?;
    if leds.color_order.trim().is_empty() {
        return Err(TemplateFieldError::new(template, "leds.color_order", FieldErrorReason::Missing));
    }
    Ok(vec![
        ConfigSection::generated("neopixel status_leds")
            .with("pin", pin)
            .with("chain_count", leds.chain_count.to_string())
            .with("color_order", leds.color_order.trim())
            .with("initial_RED", format_number(leds.initial_red))
            .with("initial_GREEN", format_number(leds.initial_green))
            .with("initial_BLUE", format_number(leds.initial_blue)),
    ])
}

/// The `[printer]` block of the root file.
pub fn printer_section(attrs: &AttributeModel) -> ConfigSection {
    let motion = &attrs.motion;
    let mut section = ConfigSection::generated("printer")
        .with("kinematics", attrs.kinematics.as_str())
        .with("max_velocity", format_number(motion.max_velocity))
        .with("max_accel", format_number(motion.max_accel));
    if let Some(v) = motion.max_z_velocity {
        section = section.with("max_z_velocity", format_number(v));
    }
    if let Some(a) = motion.max_z_accel {
        section = section.with("max_z_accel", format_number(a));
    }
    section.with("square_corner_velocity", format_number(motion.square_corner_velocity))
}
