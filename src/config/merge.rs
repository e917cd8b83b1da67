//! Field-by-field merge of configuration tiers.
//!
//! Objects merge recursively, everything else (arrays included) is replaced
//! by the higher tier. A `null` in the higher tier means "not specified".

use serde_json::Value;

/// Merge `overlay` onto `base`, `overlay` winning.
///
/// ```
/// use serde_json::json;
/// use klipper_forge::config::deep_merge;
///
/// let base = json!({"validation": {"orphan_warnings": true, "allowlist": ["max_accel"]}});
/// let overlay = json!({"validation": {"allowlist": ["run_current"]}});
/// assert_eq!(
///     deep_merge(base, overlay),
///     json!({"validation": {"orphan_warnings": true, "allowlist": ["run_current"]}})
/// );
/// ```
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                let merged_value = match base_map.remove(&key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => overlay_value,
                };
                base_map.insert(key, merged_value);
            }
            Value::Object(base_map)
        }
        (base, Value::Null) => base,
        (_, overlay) => overlay,
    }
}

/// Fold [`deep_merge`] over tiers, lowest first.
pub fn deep_merge_all(values: impl IntoIterator<Item = Value>) -> Value {
    values.into_iter().fold(Value::Null, deep_merge)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_nested_range_override_keeps_siblings() {
        let base = json!({"ranges": {"max_temp": {"min": 0.0, "max": 500.0}, "microsteps": {"min": 1.0, "max": 256.0}}});
        let overlay = json!({"ranges": {"max_temp": {"max": 350}}});
        assert_eq!(
            deep_merge(base, overlay),
            json!({"ranges": {"max_temp": {"min": 0.0, "max": 350}, "microsteps": {"min": 1.0, "max": 256.0}}})
        );
    }

    #[test]
    fn test_lists_replaced() {
        let base = json!({"allowlist": ["max_accel", "max_velocity"]});
        let overlay = json!({"allowlist": ["run_current"]});
        assert_eq!(deep_merge(base, overlay), json!({"allowlist": ["run_current"]}));
    }

    #[test]
    fn test_null_preserves_base() {
        let base = json!({"root_file": "printer.cfg", "preset": {"family": "voron"}});
        let overlay = json!({"root_file": null, "preset": {"family": null}});
        assert_eq!(
            deep_merge(base, overlay),
            json!({"root_file": "printer.cfg", "preset": {"family": "voron"}})
        );
    }

    #[test]
    fn test_merge_all_in_tier_order() {
        let merged = deep_merge_all([
            json!({"root_file": "printer.cfg", "orphan_warnings": true}),
            json!({"root_file": "config/printer.cfg"}),
            json!({"orphan_warnings": false}),
        ]);
        assert_eq!(merged, json!({"root_file": "config/printer.cfg", "orphan_warnings": false}));
    }

    #[test]
    fn test_scalar_base_replaced_by_object() {
        assert_eq!(deep_merge(json!("flat"), json!({"a": 1})), json!({"a": 1}));
    }
}
