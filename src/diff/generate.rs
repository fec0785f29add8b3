//! Structural diff between two state trees

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::ops::EditOperation;
use super::pointer::{PathKey, PointerPath};

/// How arrays are compared
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArrayStrategy {
    /// Any difference outside `ignore_paths` replaces the whole array in one
    /// operation
    #[default]
    Replace,
    /// Index-positional comparison. Does not detect reordering: a moved
    /// element shows up as changes at both indices.
    Merge,
}

/// Diff configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffConfig {
    /// Subtrees that never produce operations
    pub ignore_paths: Vec<PointerPath>,
    /// Numbers closer than 10^-precision compare equal. `None` = exact.
    pub precision: Option<u32>,
    pub array_strategy: ArrayStrategy,
    /// Nodes deeper than this emit nothing, including adds and removes
    /// (root is depth 0)
    pub max_depth: usize,
}

impl Default for DiffConfig {
    fn default() -> Self {
        Self {
            ignore_paths: Vec::new(),
            precision: Some(10),
            array_strategy: ArrayStrategy::Replace,
            max_depth: 64,
        }
    }
}

impl DiffConfig {
    fn is_ignored(&self, path: &PointerPath) -> bool {
        self.ignore_paths.iter().any(|prefix| path.starts_with(prefix))
    }
}

/// Compare `before` and `after` and return the operations that turn one into
/// the other.
pub fn generate_diff(before: &Value, after: &Value, config: &DiffConfig) -> Vec<EditOperation> {
    let mut ops = Vec::new();
    diff_node(before, after, &PointerPath::root(), 0, config, &mut ops);
    ops
}

fn diff_node(
    before: &Value,
    after: &Value,
    path: &PointerPath,
    depth: usize,
    config: &DiffConfig,
    ops: &mut Vec<EditOperation>,
) {
    if depth > config.max_depth || config.is_ignored(path) {
        return;
    }

    match (before, after) {
        (Value::Object(a), Value::Object(b)) => diff_objects(a, b, path, depth, config, ops),
        (Value::Array(a), Value::Array(b)) => match config.array_strategy {
            ArrayStrategy::Replace => {
                if !equal_outside_ignored(before, after, path, config) {
                    ops.push(EditOperation::replace(path.clone(), after.clone()));
                }
            }
            ArrayStrategy::Merge => diff_arrays_positional(a, b, path, depth, config, ops),
        },
        _ => {
            if !values_equal(before, after, config.precision) {
                ops.push(EditOperation::replace(path.clone(), after.clone()));
            }
        }
    }
}

fn diff_objects(
    before: &Map<String, Value>,
    after: &Map<String, Value>,
    path: &PointerPath,
    depth: usize,
    config: &DiffConfig,
    ops: &mut Vec<EditOperation>,
) {
    if depth + 1 > config.max_depth {
        return;
    }

    for key in before.keys() {
        if !after.contains_key(key) {
            let child = path.child(key.as_str());
            if !config.is_ignored(&child) {
                ops.push(EditOperation::remove(child));
            }
        }
    }

    for (key, new_value) in after {
        let child = path.child(key.as_str());
        match before.get(key) {
            Some(old_value) => diff_node(old_value, new_value, &child, depth + 1, config, ops),
            None => {
                if !config.is_ignored(&child) {
                    ops.push(EditOperation::add(child, new_value.clone()));
                }
            }
        }
    }
}

fn diff_arrays_positional(
    before: &[Value],
    after: &[Value],
    path: &PointerPath,
    depth: usize,
    config: &DiffConfig,
    ops: &mut Vec<EditOperation>,
) {
    if depth + 1 > config.max_depth {
        return;
    }

    let common = before.len().min(after.len());

    for i in 0..common {
        diff_node(&before[i], &after[i], &path.child(i), depth + 1, config, ops);
    }

    for (i, value) in after.iter().enumerate().skip(common) {
        let child = path.child(i);
        if !config.is_ignored(&child) {
            ops.push(EditOperation::add(child, value.clone()));
        }
    }

    // Back to front so earlier removals don't shift later indices
    for i in (common..before.len()).rev() {
        let child = path.child(i);
        if !config.is_ignored(&child) {
            ops.push(EditOperation::remove(child));
        }
    }
}

/// Deep equality where numbers within 10^-precision are equal
pub fn values_equal(a: &Value, b: &Value, precision: Option<u32>) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (precision, x.as_f64(), y.as_f64()) {
            (Some(p), Some(x), Some(y)) => x == y || (x - y).abs() < tolerance(p),
            _ => x == y,
        },
        (Value::Array(x), Value::Array(y)) => arrays_equal(x, y, precision),
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(k, v)| y.get(k).is_some_and(|w| values_equal(v, w, precision)))
        }
        _ => a == b,
    }
}

/// Like `values_equal`, but differences under an ignored path don't count
fn equal_outside_ignored(
    before: &Value,
    after: &Value,
    path: &PointerPath,
    config: &DiffConfig,
) -> bool {
    if config.ignore_paths.is_empty() {
        return values_equal(before, after, config.precision);
    }
    if config.is_ignored(path) {
        return true;
    }

    match (before, after) {
        (Value::Object(a), Value::Object(b)) => a.keys().chain(b.keys()).all(|key| {
            let child = path.child(key.as_str());
            match (a.get(key), b.get(key)) {
                (Some(x), Some(y)) => equal_outside_ignored(x, y, &child, config),
                _ => config.is_ignored(&child),
            }
        }),
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len()
                && a.iter()
                    .zip(b)
                    .enumerate()
                    .all(|(i, (x, y))| equal_outside_ignored(x, y, &path.child(i), config))
        }
        _ => values_equal(before, after, config.precision),
    }
}

fn arrays_equal(a: &[Value], b: &[Value], precision: Option<u32>) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y, precision))
}

fn tolerance(precision: u32) -> f64 {
    10f64.powi(-(precision.min(i32::MAX as u32) as i32))
}

/// Look up the value at `path`
pub fn value_at<'a>(tree: &'a Value, path: &PointerPath) -> Option<&'a Value> {
    path.segments()
        .iter()
        .try_fold(tree, |node, segment| match (node, segment) {
            (Value::Object(map), key) => map.get(&key.as_key()),
            (Value::Array(items), PathKey::Index(i)) => items.get(*i),
            (Value::Array(items), PathKey::Key(k)) => {
                k.parse::<usize>().ok().and_then(|i| items.get(i))
            }
            _ => None,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::ops::OpKind;
    use serde_json::json;

    fn with_precision(p: u32) -> DiffConfig {
        DiffConfig {
            precision: Some(p),
            ..DiffConfig::default()
        }
    }

    #[test]
    fn tolerance_follows_precision() {
        let before = json!({"x": 1});
        let after = json!({"x": 1.0000001});

        assert!(generate_diff(&before, &after, &with_precision(3)).is_empty());

        let ops = generate_diff(&before, &after, &with_precision(8));
        let expected = EditOperation::replace(PointerPath::parse("/x").unwrap(), json!(1.0000001));
        assert_eq!(ops, vec![expected]);
    }

    #[test]
    fn huge_precision_still_matches_identical_numbers() {
        let state = json!({"x": 1.5, "units": [{"hp": 0.25}]});
        assert!(generate_diff(&state, &state, &with_precision(400)).is_empty());
        assert!(values_equal(&json!(1.5), &json!(1.5), Some(u32::MAX)));
        assert!(!values_equal(&json!(1.5), &json!(1.6), Some(400)));
    }

    #[test]
    fn keys_added_and_removed() {
        let ops = generate_diff(
            &json!({"a": 1, "b": 2}),
            &json!({"b": 2, "c": 3}),
            &DiffConfig::default(),
        );
        assert_eq!(ops.len(), 2);
        assert!(ops
            .iter()
            .any(|op| op.kind == OpKind::Remove && op.path.to_string() == "/a"));
        assert!(ops
            .iter()
            .any(|op| op.kind == OpKind::Add && op.path.to_string() == "/c"));
    }

    #[test]
    fn type_mismatch_is_single_replace() {
        let ops = generate_diff(
            &json!({"units": {"a": 1}}),
            &json!({"units": [1, 2]}),
            &DiffConfig::default(),
        );
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].kind, OpKind::Replace);
        assert_eq!(ops[0].path.to_string(), "/units");
    }

    #[test]
    fn replace_strategy_swaps_whole_array() {
        let ops = generate_diff(
            &json!({"tiles": [1, 2, 3]}),
            &json!({"tiles": [1, 5, 3]}),
            &DiffConfig::default(),
        );
        let tiles = PointerPath::parse("/tiles").unwrap();
        let expected = EditOperation::replace(tiles, json!([1, 5, 3]));
        assert_eq!(ops, vec![expected]);
    }

    #[test]
    fn merge_strategy_removes_from_the_tail_first() {
        let config = DiffConfig {
            array_strategy: ArrayStrategy::Merge,
            ..DiffConfig::default()
        };
        let ops = generate_diff(&json!([1, 2, 3, 4]), &json!([1, 9]), &config);
        let rendered: Vec<String> = ops
            .iter()
            .map(|op| format!("{} {}", op.kind, op.path))
            .collect();
        assert_eq!(rendered, vec!["replace /1", "remove /3", "remove /2"]);

        let grow = generate_diff(&json!([1]), &json!([1, 2, 3]), &config);
        let rendered: Vec<String> = grow
            .iter()
            .map(|op| format!("{} {}", op.kind, op.path))
            .collect();
        assert_eq!(rendered, vec!["add /1", "add /2"]);
    }

    #[test]
    fn ignored_paths_never_emit() {
        let config = DiffConfig {
            ignore_paths: vec![PointerPath::parse("/meta").unwrap()],
            ..DiffConfig::default()
        };
        let before = json!({"meta": {"t": 1}});
        let after = json!({"meta": {"t": 2}});
        assert!(generate_diff(&before, &after, &config).is_empty());
        assert!(generate_diff(&json!({}), &json!({"meta": 1}), &config).is_empty());
        assert!(generate_diff(&json!({"meta": 1}), &json!({}), &config).is_empty());
    }

    #[test]
    fn max_depth_stops_descent() {
        let config = DiffConfig {
            max_depth: 1,
            ..DiffConfig::default()
        };
        let before = json!({"a": {"b": {"c": 1}}});
        let after = json!({"a": {"b": {"c": 2}}});
        assert!(generate_diff(&before, &after, &config).is_empty());

        let config = DiffConfig {
            max_depth: 3,
            ..DiffConfig::default()
        };
        assert_eq!(generate_diff(&before, &after, &config).len(), 1);
    }

    #[test]
    fn max_depth_suppresses_added_and_removed_members() {
        let flat = DiffConfig {
            max_depth: 0,
            ..DiffConfig::default()
        };
        assert!(generate_diff(&json!({"x": 1}), &json!({"x": 2}), &flat).is_empty());
        assert!(generate_diff(&json!({}), &json!({"x": 2}), &flat).is_empty());
        assert!(generate_diff(&json!({"x": 2}), &json!({}), &flat).is_empty());

        let merge = DiffConfig {
            max_depth: 1,
            array_strategy: ArrayStrategy::Merge,
            ..DiffConfig::default()
        };
        let before = json!({"a": {"b": 1}, "list": [[1]]});
        let after = json!({"a": {"b": 1, "c": 2}, "list": [[1, 2]]});
        assert!(generate_diff(&before, &after, &merge).is_empty());

        let deeper = DiffConfig {
            max_depth: 3,
            ..merge
        };
        assert_eq!(generate_diff(&before, &after, &deeper).len(), 2);
    }

    #[test]
    fn replaced_arrays_skip_ignored_fields() {
        let config = DiffConfig {
            ignore_paths: vec![PointerPath::parse("/units/0/last_seen").unwrap()],
            ..DiffConfig::default()
        };
        let before = json!({"units": [{"id": "u1", "last_seen": 1}]});
        let touched = json!({"units": [{"id": "u1", "last_seen": 2}]});
        assert!(generate_diff(&before, &touched, &config).is_empty());

        let moved = json!({"units": [{"id": "u1", "last_seen": 2, "x": 4}]});
        let ops = generate_diff(&before, &moved, &config);
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].path.to_string(), "/units");
    }

    #[test]
    fn value_lookup() {
        let tree = json!({"units": [{"id": "u1"}]});
        let path = PointerPath::parse("/units/0/id").unwrap();
        assert_eq!(value_at(&tree, &path), Some(&json!("u1")));
        assert_eq!(value_at(&tree, &PointerPath::parse("/units/4").unwrap()), None);
    }
}
