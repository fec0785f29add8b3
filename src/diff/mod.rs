//! Structural diff/patch over JSON state trees
//!
//! `generate_diff` produces an ordered list of [`EditOperation`]s and
//! `apply_patch` replays them. Neither knows anything about game semantics.

pub mod generate;
pub mod ops;
pub mod patch;
pub mod pointer;

pub use generate::{generate_diff, value_at, values_equal, ArrayStrategy, DiffConfig};
pub use ops::{EditOperation, OpKind};
pub use patch::{apply_patch, PatchError};
pub use pointer::{PathKey, PointerError, PointerPath};

/// The state tree type shared by the diff utility and the engine
pub type StateTree = serde_json::Value;
