//! Applying edit operations to a state tree
//!
//! Writes are permissive: missing intermediate object members are created as
//! empty objects, so `add` never fails because an ancestor is absent. Strict
//! JSON Patch would reject those operations instead.

use serde_json::{Map, Value};

use super::generate::value_at;
use super::ops::{EditOperation, OpKind};
use super::pointer::{PathKey, PointerPath};

/// Patch application errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PatchError {
    #[error("test operation failed at {path}: expected {expected}, found {actual}")]
    AssertionFailed {
        path: String,
        expected: Value,
        actual: Value,
    },

    #[error("unknown patch operation: {0}")]
    UnknownOperation(String),

    #[error("{kind} operation at {path} is missing its value")]
    MissingValue { kind: OpKind, path: String },

    #[error("{kind} operation at {path} is missing its source path")]
    MissingFrom { kind: OpKind, path: String },

    #[error("no value at {0}")]
    PathNotFound(String),

    #[error("array index {index} out of bounds (len {len}) at {path}")]
    IndexOutOfBounds {
        path: String,
        index: usize,
        len: usize,
    },

    #[error("cannot descend into scalar at {0}")]
    InvalidTarget(String),

    #[error("malformed patch: {0}")]
    Malformed(String),
}

/// Apply `operations` in order to a copy of `target`. `target` is never
/// modified; on error nothing is returned.
pub fn apply_patch(target: &Value, operations: &[EditOperation]) -> Result<Value, PatchError> {
    let mut doc = target.clone();
    for op in operations {
        apply_operation(&mut doc, op)?;
    }
    Ok(doc)
}

fn apply_operation(doc: &mut Value, op: &EditOperation) -> Result<(), PatchError> {
    match op.kind {
        OpKind::Add => add(doc, &op.path, required_value(op)?.clone()),
        OpKind::Remove => remove(doc, &op.path).map(|_| ()),
        OpKind::Replace => replace(doc, &op.path, required_value(op)?.clone()),
        OpKind::Move => {
            let from = required_from(op)?;
            let value = remove(doc, from)?;
            add(doc, &op.path, value)
        }
        OpKind::Copy => {
            let from = required_from(op)?;
            let value = value_at(doc, from)
                .cloned()
                .ok_or_else(|| PatchError::PathNotFound(from.to_string()))?;
            add(doc, &op.path, value)
        }
        OpKind::Test => {
            let expected = required_value(op)?;
            let actual = value_at(doc, &op.path).cloned().unwrap_or(Value::Null);
            if &actual != expected {
                return Err(PatchError::AssertionFailed {
                    path: op.path.to_string(),
                    expected: expected.clone(),
                    actual,
                });
            }
            Ok(())
        }
    }
}

fn required_value(op: &EditOperation) -> Result<&Value, PatchError> {
    op.value.as_ref().ok_or_else(|| PatchError::MissingValue {
        kind: op.kind,
        path: op.path.to_string(),
    })
}

fn required_from(op: &EditOperation) -> Result<&PointerPath, PatchError> {
    op.from.as_ref().ok_or_else(|| PatchError::MissingFrom {
        kind: op.kind,
        path: op.path.to_string(),
    })
}

fn add(doc: &mut Value, path: &PointerPath, value: Value) -> Result<(), PatchError> {
    let Some((parent_path, last)) = path.split_last() else {
        *doc = value;
        return Ok(());
    };
    let parent = materialize(doc, parent_path, path)?;

    match parent {
        Value::Object(map) => {
            map.insert(last.as_key(), value);
            Ok(())
        }
        Value::Array(items) => {
            let len = items.len();
            let index = match last {
                PathKey::Key(k) if k == "-" => len,
                _ => array_index(last, path)?,
            };
            if index > len {
                return Err(PatchError::IndexOutOfBounds {
                    path: path.to_string(),
                    index,
                    len,
                });
            }
            items.insert(index, value);
            Ok(())
        }
        _ => Err(PatchError::InvalidTarget(path.to_string())),
    }
}

fn replace(doc: &mut Value, path: &PointerPath, value: Value) -> Result<(), PatchError> {
    let Some((parent_path, last)) = path.split_last() else {
        *doc = value;
        return Ok(());
    };
    let parent = materialize(doc, parent_path, path)?;

    match parent {
        Value::Object(map) => {
            map.insert(last.as_key(), value);
            Ok(())
        }
        Value::Array(items) => {
            let index = array_index(last, path)?;
            let len = items.len();
            let slot = items.get_mut(index).ok_or(PatchError::IndexOutOfBounds {
                path: path.to_string(),
                index,
                len,
            })?;
            *slot = value;
            Ok(())
        }
        _ => Err(PatchError::InvalidTarget(path.to_string())),
    }
}

fn remove(doc: &mut Value, path: &PointerPath) -> Result<Value, PatchError> {
    let Some((parent_path, last)) = path.split_last() else {
        return Ok(std::mem::take(doc));
    };
    let parent = navigate(doc, parent_path)
        .ok_or_else(|| PatchError::PathNotFound(path.to_string()))?;

    match parent {
        Value::Object(map) => map
            .remove(&last.as_key())
            .ok_or_else(|| PatchError::PathNotFound(path.to_string())),
        Value::Array(items) => {
            let index = array_index(last, path)?;
            if index >= items.len() {
                return Err(PatchError::IndexOutOfBounds {
                    path: path.to_string(),
                    index,
                    len: items.len(),
                });
            }
            Ok(items.remove(index))
        }
        _ => Err(PatchError::InvalidTarget(path.to_string())),
    }
}

/// Walk to `segments`, creating empty objects for missing members
fn materialize<'a>(
    doc: &'a mut Value,
    segments: &[PathKey],
    full: &PointerPath,
) -> Result<&'a mut Value, PatchError> {
    let mut node = doc;
    for segment in segments {
        if node.is_null() {
            *node = Value::Object(Map::new());
        }
        node = match node {
            Value::Object(map) => map
                .entry(segment.as_key())
                .or_insert_with(|| Value::Object(Map::new())),
            Value::Array(items) => {
                let index = array_index(segment, full)?;
                let len = items.len();
                items.get_mut(index).ok_or(PatchError::IndexOutOfBounds {
                    path: full.to_string(),
                    index,
                    len,
                })?
            }
            _ => return Err(PatchError::InvalidTarget(full.to_string())),
        };
    }
    Ok(node)
}

fn navigate<'a>(doc: &'a mut Value, segments: &[PathKey]) -> Option<&'a mut Value> {
    segments.iter().try_fold(doc, |node, segment| match node {
        Value::Object(map) => map.get_mut(&segment.as_key()),
        Value::Array(items) => match segment {
            PathKey::Index(i) => items.get_mut(*i),
            PathKey::Key(k) => k.parse::<usize>().ok().and_then(move |i| items.get_mut(i)),
        },
        _ => None,
    })
}

fn array_index(segment: &PathKey, full: &PointerPath) -> Result<usize, PatchError> {
    match segment {
        PathKey::Index(i) => Ok(*i),
        PathKey::Key(k) => k
            .parse::<usize>()
            .map_err(|_| PatchError::PathNotFound(full.to_string())),
    }
}
