//! Per-kind command predictors
//!
//! A predictor applies the optimistic effect of one command to a state tree.
//! Predictors only enforce what the client can know locally (cell occupancy,
//! ownership); the server stays authoritative and may still reject the
//! command. Every built-in predictor is safe to replay on a state that already
//! contains its effect.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{json, Map, Value};

use crate::diff::StateTree;
use crate::protocol::{kinds, Command, PlayerId};

/// Outcome of a successful predictor run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prediction {
    /// Effect applied (or already present)
    Applied,
    /// A local invariant forbids predicting this command; state is unchanged
    Refused(&'static str),
}

/// Predictor failures (bad payloads or unexpected state shapes)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PredictionError {
    #[error("no predictor registered for command kind {0:?}")]
    UnknownKind(String),

    #[error("command payload is missing field {0:?}")]
    MissingField(&'static str),

    #[error("command field {field:?} must be {expected}")]
    InvalidField {
        field: &'static str,
        expected: &'static str,
    },

    #[error("state has unexpected shape at {0}")]
    MalformedState(&'static str),
}

/// Applies one command kind to a state tree
pub trait Predictor: Send + Sync {
    fn predict(
        &self,
        command: &Command,
        state: &mut StateTree,
    ) -> Result<Prediction, PredictionError>;
}

impl<F> Predictor for F
where
    F: Fn(&Command, &mut StateTree) -> Result<Prediction, PredictionError> + Send + Sync,
{
    fn predict(
        &self,
        command: &Command,
        state: &mut StateTree,
    ) -> Result<Prediction, PredictionError> {
        self(command, state)
    }
}

/// Kind tag → predictor
#[derive(Clone, Default)]
pub struct PredictorRegistry {
    predictors: HashMap<String, Arc<dyn Predictor>>,
}

impl PredictorRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the four built-in game predictors
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(kinds::PLACE_TILE, predict_place_tile);
        registry.register(kinds::MOVE_UNIT, predict_move_unit);
        registry.register(kinds::TRAIN_UNIT, predict_train_unit);
        registry.register(kinds::PLACE_WORKER, predict_place_worker);
        registry
    }

    /// Register (or replace) the predictor for `kind`
    pub fn register(&mut self, kind: impl Into<String>, predictor: impl Predictor + 'static) {
        self.predictors.insert(kind.into(), Arc::new(predictor));
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.predictors.contains_key(kind)
    }

    /// Run the predictor for `command.kind` against `state`
    pub fn apply(
        &self,
        command: &Command,
        state: &mut StateTree,
    ) -> Result<Prediction, PredictionError> {
        let predictor = self
            .predictors
            .get(&command.kind)
            .ok_or_else(|| PredictionError::UnknownKind(command.kind.clone()))?;
        predictor.predict(command, state)
    }
}

impl fmt::Debug for PredictorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<&String> = self.predictors.keys().collect();
        kinds.sort();
        f.debug_struct("PredictorRegistry").field("kinds", &kinds).finish()
    }
}

/// `place_tile {x, y, tile_type}`
pub fn predict_place_tile(
    command: &Command,
    state: &mut StateTree,
) -> Result<Prediction, PredictionError> {
    let x = coord(&command.data, "x")?;
    let y = coord(&command.data, "y")?;
    let tile_type = text(&command.data, "tile_type")?;

    let tiles = collection_mut(state, "tiles")?;
    if tiles.iter().any(|t| tile_at(t, x, y)) {
        return Ok(Prediction::Refused("cell already occupied"));
    }

    tiles.push(json!({
        "id": format!("{},{}", x, y),
        "type": tile_type,
        "x": x,
        "y": y,
        "owner": command.issuer,
        "hp": 100,
        "max_hp": 100,
        "worker": null,
        "placed_at": command.issued_at.timestamp_millis() as f64 / 1000.0,
        "predicted": true,
    }));
    Ok(Prediction::Applied)
}

/// `move_unit {unit_id, x, y}`
pub fn predict_move_unit(
    command: &Command,
    state: &mut StateTree,
) -> Result<Prediction, PredictionError> {
    let unit_id = text(&command.data, "unit_id")?;
    let x = coord(&command.data, "x")?;
    let y = coord(&command.data, "y")?;

    let units = collection_mut(state, "units")?;
    let Some(index) = units
        .iter()
        .position(|u| u.get("id").and_then(Value::as_str) == Some(unit_id))
    else {
        return Ok(Prediction::Refused("unknown unit"));
    };
    if !owned_by(&units[index], command.issuer) {
        return Ok(Prediction::Refused("unit not owned by issuer"));
    }
    if unit_at(&units[index], x, y) {
        return Ok(Prediction::Applied);
    }
    let occupied = units.iter().enumerate().any(|(i, u)| {
        i != index && unit_at(u, x, y) && u.get("status").and_then(Value::as_str) != Some("dead")
    });
    if occupied {
        return Ok(Prediction::Refused("target cell occupied"));
    }

    let unit = units[index]
        .as_object_mut()
        .ok_or(PredictionError::MalformedState("/units"))?;
    unit.insert("position".into(), json!({"x": x, "y": y}));
    unit.insert("status".into(), json!("moving"));
    Ok(Prediction::Applied)
}

/// `train_unit {x, y, unit_type}`
pub fn predict_train_unit(
    command: &Command,
    state: &mut StateTree,
) -> Result<Prediction, PredictionError> {
    let x = coord(&command.data, "x")?;
    let y = coord(&command.data, "y")?;
    let unit_type = text(&command.data, "unit_type")?;

    let site_owned = collection_mut(state, "tiles")?
        .iter()
        .any(|t| tile_at(t, x, y) && owned_by(t, command.issuer));
    if !site_owned {
        return Ok(Prediction::Refused("no owned tile at training site"));
    }

    let unit_id = format!("pending_{}", command.id);
    let units = collection_mut(state, "units")?;
    if units
        .iter()
        .any(|u| u.get("id").and_then(Value::as_str) == Some(unit_id.as_str()))
    {
        return Ok(Prediction::Applied);
    }

    units.push(json!({
        "id": unit_id,
        "type": unit_type,
        "owner": command.issuer,
        "position": {"x": x, "y": y},
        "hp": 100,
        "max_hp": 100,
        "status": "training",
        "target": null,
        "created_at": command.issued_at.timestamp_millis() as f64 / 1000.0,
        "predicted": true,
    }));
    Ok(Prediction::Applied)
}

/// `place_worker {x, y, worker_type}`
pub fn predict_place_worker(
    command: &Command,
    state: &mut StateTree,
) -> Result<Prediction, PredictionError> {
    let x = coord(&command.data, "x")?;
    let y = coord(&command.data, "y")?;
    let worker_type = text(&command.data, "worker_type")?;

    let tiles = collection_mut(state, "tiles")?;
    let Some(tile) = tiles.iter_mut().find(|t| tile_at(t, x, y)) else {
        return Ok(Prediction::Refused("no tile at position"));
    };
    if !owned_by(tile, command.issuer) {
        return Ok(Prediction::Refused("tile not owned by issuer"));
    }

    let worker = json!({"type": worker_type, "owner": command.issuer});
    match tile.get("worker") {
        Some(existing) if existing == &worker => return Ok(Prediction::Applied),
        Some(existing) if !existing.is_null() => {
            return Ok(Prediction::Refused("tile already has a worker"))
        }
        _ => {}
    }

    tile.as_object_mut()
        .ok_or(PredictionError::MalformedState("/tiles"))?
        .insert("worker".into(), worker);
    Ok(Prediction::Applied)
}

fn coord(data: &Value, field: &'static str) -> Result<u64, PredictionError> {
    data.get(field)
        .ok_or(PredictionError::MissingField(field))?
        .as_u64()
        .ok_or(PredictionError::InvalidField {
            field,
            expected: "a non-negative integer",
        })
}

fn text<'a>(data: &'a Value, field: &'static str) -> Result<&'a str, PredictionError> {
    data.get(field)
        .ok_or(PredictionError::MissingField(field))?
        .as_str()
        .ok_or(PredictionError::InvalidField {
            field,
            expected: "a string",
        })
}

/// Top-level array member, created empty when absent
fn collection_mut<'a>(
    state: &'a mut StateTree,
    name: &'static str,
) -> Result<&'a mut Vec<Value>, PredictionError> {
    if state.is_null() {
        *state = Value::Object(Map::new());
    }
    state
        .as_object_mut()
        .ok_or(PredictionError::MalformedState("/"))?
        .entry(name)
        .or_insert_with(|| Value::Array(Vec::new()))
        .as_array_mut()
        .ok_or(PredictionError::MalformedState(name))
}

fn tile_at(tile: &Value, x: u64, y: u64) -> bool {
    tile.get("x").and_then(Value::as_u64) == Some(x)
        && tile.get("y").and_then(Value::as_u64) == Some(y)
}

fn unit_at(unit: &Value, x: u64, y: u64) -> bool {
    unit.get("position").is_some_and(|p| tile_at(p, x, y))
}

fn owned_by(entity: &Value, player: PlayerId) -> bool {
    entity.get("owner").and_then(Value::as_u64) == Some(u64::from(player))
}
