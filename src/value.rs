//! Value helpers shared across the runtime.
//!
//! All state, props, event payloads and URL maps are `serde_json::Value`
//! trees; the helpers here centralize the coercion rules so the evaluator,
//! renderer and synchronizer agree on them.

use serde_json::{Map, Value};

/// Truthiness: `false`, `null`, `0`, and `""` are falsy, everything else is
/// truthy (arrays and objects included, even when empty).
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// A falsy *variant* in the boolean-attribute sense: false, "false", null.
pub fn is_boolean_attr_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !*b,
        Value::String(s) => s == "false",
        _ => !is_truthy(value),
    }
}

/// The display form used when a value lands in text: strings render bare,
/// null renders empty, everything else renders as compact JSON.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

/// Stable stringification for iteration markers and cache keys: scalars use
/// their display form, objects serialize with sorted keys so structurally
/// equal values always produce the same string.
pub fn stable_stringify(value: &Value) -> String {
    match value {
        Value::Object(_) | Value::Array(_) => {
            let sorted = sort_keys(value);
            sorted.to_string()
        }
        other => display_value(other),
    }
}

fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let mut out = Map::new();
            for (k, v) in entries {
                out.insert(k.clone(), sort_keys(v));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}

/// Deep-merge `patch` into `base`: object keys merge recursively, everything
/// else replaces. Used by the setup tag against the global namespace.
pub fn deep_merge(base: &mut Value, patch: Value) {
    match (base, patch) {
        (Value::Object(base_map), Value::Object(patch_map)) => {
            for (k, v) in patch_map {
                match base_map.get_mut(&k) {
                    Some(slot) => deep_merge(slot, v),
                    None => {
                        base_map.insert(k, v);
                    }
                }
            }
        }
        (slot, patch) => *slot = patch,
    }
}

/// Loose equality on values. Numbers compare numerically across the
/// integer/float representations; all other comparisons are structural.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(fx), Some(fy)) => fx == fy,
            _ => x == y,
        },
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_truthiness() {
        assert!(!is_truthy(&json!(null)));
        assert!(!is_truthy(&json!(false)));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!("")));
        assert!(is_truthy(&json!("0")));
        assert!(is_truthy(&json!([])));
        assert!(is_truthy(&json!({})));
    }

    #[test]
    fn test_stable_stringify_sorts_keys() {
        let a = json!({"b": 1, "a": {"d": 2, "c": 3}});
        let b = json!({"a": {"c": 3, "d": 2}, "b": 1});
        assert_eq!(stable_stringify(&a), stable_stringify(&b));
    }

    #[test]
    fn test_stable_stringify_scalars_bare() {
        assert_eq!(stable_stringify(&json!("x")), "x");
        assert_eq!(stable_stringify(&json!(2)), "2");
    }

    #[test]
    fn test_deep_merge() {
        let mut base = json!({"a": {"x": 1}, "b": 2});
        deep_merge(&mut base, json!({"a": {"y": 3}, "c": 4}));
        assert_eq!(base, json!({"a": {"x": 1, "y": 3}, "b": 2, "c": 4}));
    }

    #[test]
    fn test_values_equal_numeric() {
        assert!(values_equal(&json!(1), &json!(1.0)));
        assert!(!values_equal(&json!("1"), &json!(1)));
    }
}
