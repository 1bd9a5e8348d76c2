//! Handles: value-less references to a place in reactive state.
//!
//! A handle is `(root namespace, path segments)`. It never carries the value
//! at that place; reads and writes resolve through the substrate at the
//! moment of use, which is what makes `@Foo.bar` behave as a live reference
//! in both pure and effect expressions.

use serde_json::{Map, Value};

/// Evaluation mode for handle access. Pure mode rejects writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Pure,
    Effect,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Handle {
    pub root: String,
    pub path: Vec<String>,
}

impl Handle {
    pub fn root(name: impl Into<String>) -> Self {
        Handle {
            root: name.into(),
            path: Vec::new(),
        }
    }

    /// Extend by one path segment. Handles are structural values; extension
    /// never touches state.
    pub fn join(&self, segment: &str) -> Handle {
        let mut path = self.path.clone();
        path.push(segment.to_string());
        Handle {
            root: self.root.clone(),
            path,
        }
    }

    pub fn join_path<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> Handle {
        let mut h = self.clone();
        for seg in segments {
            h.path.push(seg.to_string());
        }
        h
    }
}

impl std::fmt::Display for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "@{}", self.root)?;
        for seg in &self.path {
            write!(f, ".{}", seg)?;
        }
        Ok(())
    }
}

/// Null-safe path read: any missing or null intermediate yields `Null`.
/// Numeric segments index into arrays.
pub fn read_path<'a>(root: &'a Value, path: &[String]) -> Option<&'a Value> {
    let mut current = root;
    for seg in path {
        current = match current {
            Value::Object(map) => map.get(seg)?,
            Value::Array(items) => {
                let idx: usize = seg.parse().ok()?;
                items.get(idx)?
            }
            _ => return None,
        };
    }
    Some(current)
}

/// Path write: creates empty objects along the way and assigns the final
/// segment. Numeric segments assign into arrays when the slot is already an
/// array; a write past the end extends it with nulls.
pub fn write_path(root: &mut Value, path: &[String], value: Value) {
    match path.split_first() {
        None => *root = value,
        Some((seg, rest)) if rest.is_empty() => assign_slot(root, seg, value),
        Some((seg, rest)) => write_path(descend(root, seg), rest, value),
    }
}

/// Step into `seg`, materializing a traversable slot: null or scalar
/// intermediates become empty objects.
fn descend<'a>(node: &'a mut Value, seg: &str) -> &'a mut Value {
    if let Ok(idx) = seg.parse::<usize>() {
        if let Value::Array(items) = node {
            if idx >= items.len() {
                items.resize(idx + 1, Value::Null);
            }
            if items[idx].is_null() {
                items[idx] = Value::Object(Map::new());
            }
            return &mut items[idx];
        }
    }
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    let slot = node
        .as_object_mut()
        .unwrap()
        .entry(seg.to_string())
        .or_insert(Value::Null);
    if slot.is_null() {
        *slot = Value::Object(Map::new());
    }
    slot
}

fn assign_slot(node: &mut Value, seg: &str, value: Value) {
    if let Ok(idx) = seg.parse::<usize>() {
        if let Value::Array(items) = node {
            if idx >= items.len() {
                items.resize(idx + 1, Value::Null);
            }
            items[idx] = value;
            return;
        }
    }
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    node.as_object_mut().unwrap().insert(seg.to_string(), value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_join_is_structural() {
        let h = Handle::root("global").join("a").join("b");
        assert_eq!(h.root, "global");
        assert_eq!(h.path, vec!["a", "b"]);
        let h2 = Handle::root("global").join_path(["a", "b"]);
        assert_eq!(h, h2);
    }

    #[test]
    fn test_read_path_null_safe() {
        let root = json!({"a": {"b": 1}});
        let path = |segs: &[&str]| segs.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        assert_eq!(read_path(&root, &path(&["a", "b"])), Some(&json!(1)));
        assert_eq!(read_path(&root, &path(&["a", "x", "y"])), None);
        assert_eq!(read_path(&root, &path(&["z"])), None);
    }

    #[test]
    fn test_write_path_creates_intermediates() {
        let mut root = json!({});
        let path: Vec<String> = vec!["a".into(), "b".into(), "c".into()];
        write_path(&mut root, &path, json!(5));
        assert_eq!(root, json!({"a": {"b": {"c": 5}}}));
    }

    #[test]
    fn test_write_path_array_index() {
        let mut root = json!({"xs": [1, 2]});
        let path: Vec<String> = vec!["xs".into(), "1".into()];
        write_path(&mut root, &path, json!(9));
        assert_eq!(root, json!({"xs": [1, 9]}));
    }
}
