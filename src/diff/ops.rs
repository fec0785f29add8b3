//! Edit operations produced by the diff and consumed by the patcher

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::patch::PatchError;
use super::pointer::PointerPath;

/// Kind of structural edit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum OpKind {
    Add,
    Remove,
    Replace,
    Move,
    Copy,
    /// Assertion; applies nothing
    Test,
}

impl OpKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpKind::Add => "add",
            OpKind::Remove => "remove",
            OpKind::Replace => "replace",
            OpKind::Move => "move",
            OpKind::Copy => "copy",
            OpKind::Test => "test",
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OpKind {
    type Err = PatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "add" => Ok(OpKind::Add),
            "remove" => Ok(OpKind::Remove),
            "replace" => Ok(OpKind::Replace),
            "move" => Ok(OpKind::Move),
            "copy" => Ok(OpKind::Copy),
            "test" => Ok(OpKind::Test),
            other => Err(PatchError::UnknownOperation(other.to_string())),
        }
    }
}

impl TryFrom<String> for OpKind {
    type Error = PatchError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<OpKind> for String {
    fn from(kind: OpKind) -> Self {
        kind.as_str().to_string()
    }
}

/// A single structural edit, serialized in JSON Patch layout
/// (`{"op": "replace", "path": "/x", "value": 2}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditOperation {
    #[serde(rename = "op")]
    pub kind: OpKind,
    pub path: PointerPath,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Source location, required by `move` and `copy`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<PointerPath>,
}

impl EditOperation {
    pub fn add(path: PointerPath, value: Value) -> Self {
        Self {
            kind: OpKind::Add,
            path,
            value: Some(value),
            from: None,
        }
    }

    pub fn remove(path: PointerPath) -> Self {
        Self {
            kind: OpKind::Remove,
            path,
            value: None,
            from: None,
        }
    }

    pub fn replace(path: PointerPath, value: Value) -> Self {
        Self {
            kind: OpKind::Replace,
            path,
            value: Some(value),
            from: None,
        }
    }

    pub fn move_from(from: PointerPath, path: PointerPath) -> Self {
        Self {
            kind: OpKind::Move,
            path,
            value: None,
            from: Some(from),
        }
    }

    pub fn copy_from(from: PointerPath, path: PointerPath) -> Self {
        Self {
            kind: OpKind::Copy,
            path,
            value: None,
            from: Some(from),
        }
    }

    pub fn test(path: PointerPath, value: Value) -> Self {
        Self {
            kind: OpKind::Test,
            path,
            value: Some(value),
            from: None,
        }
    }

    /// Parse a JSON Patch document (array of operation objects)
    pub fn list_from_json(doc: &Value) -> Result<Vec<EditOperation>, PatchError> {
        let items = doc
            .as_array()
            .ok_or_else(|| PatchError::Malformed("patch document must be an array".into()))?;

        items
            .iter()
            .map(|item| {
                // Resolve the op name first so unknown kinds get their own error
                if let Some(name) = item.get("op").and_then(Value::as_str) {
                    name.parse::<OpKind>()?;
                }
                serde_json::from_value(item.clone())
                    .map_err(|e| PatchError::Malformed(e.to_string()))
            })
            .collect()
    }
}
