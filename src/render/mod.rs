//! Template rendering.
//!
//! Templates are plain Klipper text with `{{ path }}` placeholders. A path is
//! `pins.<alias>` (looked up in the bundle pin map), a dotted attribute path
//! (`motion.max_velocity`, `probe.type`), or a bare name looked up in the
//! rendering add-on's settings and then among top-level attributes. There is
//! no control flow: anything that needs a loop is built in code, see
//! [`sections`].

pub mod sections;

use crate::error::{FieldErrorReason, TemplateFieldError};
use crate::model::AttributeModel;
use serde_json::Value;
use std::collections::BTreeMap;

/// Everything a template may reference.
#[derive(Debug, Clone)]
pub struct RenderContext<'a> {
    attributes: Value,
    pins: Option<&'a BTreeMap<String, String>>,
    settings: Option<&'a BTreeMap<String, Value>>,
}

impl<'a> RenderContext<'a> {
    pub fn new(attributes: &AttributeModel) -> Self {
        Self {
            // Serializing plain data cannot fail; a null root just makes
            // every attribute lookup report `Missing`.
            attributes: serde_json::to_value(attributes).unwrap_or(Value::Null),
            pins: None,
            settings: None,
        }
    }

    pub fn with_pins(mut self, pins: &'a BTreeMap<String, String>) -> Self {
        self.pins = Some(pins);
        self
    }

    pub fn with_settings(mut self, settings: Option<&'a BTreeMap<String, Value>>) -> Self {
        self.settings = settings;
        self
    }

    fn resolve(&self, template: &str, field: &str) -> Result<String, TemplateFieldError> {
        if let Some(alias) = field.strip_prefix("pins.") {
            return self
                .pins
                .and_then(|pins| pins.get(alias))
                .cloned()
                .ok_or_else(|| TemplateFieldError::unknown_pin(template, alias));
        }

        let value = if field.contains('.') {
            lookup(&self.attributes, field)
        } else {
            self.settings
                .and_then(|s| s.get(field))
                .or_else(|| self.attributes.get(field))
        };

        match value {
            None | Some(Value::Null) => Err(TemplateFieldError::missing(template, field)),
            Some(value) => scalar(value).ok_or_else(|| {
                TemplateFieldError::new(template, field, FieldErrorReason::NotScalar)
            }),
        }
    }
}

fn lookup<'v>(root: &'v Value, path: &str) -> Option<&'v Value> {
    path.split('.').try_fold(root, |node, segment| node.get(segment))
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(if *b { "True" } else { "False" }.to_string()),
        Value::Number(n) => Some(match (n.as_i64(), n.as_u64()) {
            (Some(i), _) => i.to_string(),
            (None, Some(u)) => u.to_string(),
            _ => format_number(n.as_f64().unwrap_or(0.0)),
        }),
        _ => None,
    }
}

/// Locale-free number formatting: integral values have no fraction, others
/// at most six decimals with trailing zeros trimmed.
pub fn format_number(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
        return format!("{}", value as i64);
    }
    let fixed = format!("{:.6}", value);
    let trimmed = fixed.trim_end_matches('0').trim_end_matches('.');
    if trimmed == "-0" {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Substitute every placeholder of `text`. The result ends with exactly one
/// newline.
pub fn render(template: &str, text: &str, ctx: &RenderContext<'_>) -> Result<String, TemplateFieldError> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            let field = after.lines().next().unwrap_or("").trim();
            return Err(TemplateFieldError::new(
                template,
                field,
                FieldErrorReason::Unterminated,
            ));
        };
        let field = after[..end].trim();
        out.push_str(&ctx.resolve(template, field)?);
        rest = &after[end + 2..];
    }
    out.push_str(rest);

    let body = out.trim_end_matches(['\n', '\r', ' ', '\t']);
    Ok(format!("{}\n", body))
}
