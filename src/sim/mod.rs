//! Deterministic stand-in for the authoritative server
//!
//! Used by the `prediction-sim` binary and integration tests to exercise the
//! engine against a server that lags, rejects some commands and changes state
//! on its own (enemy moves, resource income, turn changes).

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde_json::json;
use tracing::debug;

use crate::diff::StateTree;
use crate::engine::{Prediction, PredictorRegistry};
use crate::protocol::{kinds, ClientMsg, Command, PlayerId, ServerMsg};

/// Board edge length
pub const MAP_SIZE: u64 = 12;
/// Ticks per turn
pub const TURN_TICKS: u64 = 10;

const TILE_TYPES: &[&str] = &["city", "field", "monastery", "marsh", "mine", "orchard"];
const UNIT_TYPES: &[&str] = &["infantry", "archer", "knight", "siege"];
const WORKER_TYPES: &[&str] = &["magistrate", "farmer", "monk", "scout"];

/// Simulated authoritative server
pub struct SimulatedServer {
    tick: u64,
    state: StateTree,
    rng: ChaCha8Rng,
    reject_rate: f64,
    ack_delay_ticks: u64,
    predictors: PredictorRegistry,
    /// (tick the command becomes due, command)
    inbox: Vec<(u64, Command)>,
    next_unit: u64,
}

impl SimulatedServer {
    pub fn new(seed: u64, reject_rate: f64, ack_delay_ticks: u64) -> Self {
        Self {
            tick: 0,
            state: initial_board(),
            rng: ChaCha8Rng::seed_from_u64(seed),
            reject_rate,
            ack_delay_ticks,
            predictors: PredictorRegistry::with_builtin(),
            inbox: Vec::new(),
            next_unit: 100,
        }
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn state(&self) -> &StateTree {
        &self.state
    }

    /// Accept a client message; returns immediate replies
    pub fn receive(&mut self, msg: ClientMsg) -> Vec<ServerMsg> {
        match msg {
            ClientMsg::Command { command } => {
                self.inbox.push((self.tick + self.ack_delay_ticks, command));
                Vec::new()
            }
            ClientMsg::Ping { t } => vec![ServerMsg::Pong { t }],
        }
    }

    /// Advance one tick: resolve due commands, run the world, emit a snapshot
    pub fn step(&mut self) -> Vec<ServerMsg> {
        self.tick += 1;
        let mut out = Vec::new();

        let (due, later): (Vec<_>, Vec<_>) = self
            .inbox
            .drain(..)
            .partition(|(due_tick, _)| *due_tick <= self.tick);
        self.inbox = later;

        for (_, command) in due {
            let success = self.resolve(&command);
            out.push(ServerMsg::CommandAck {
                command_id: command.id,
                success,
            });
        }

        self.advance_world();

        out.push(ServerMsg::Snapshot {
            tick: self.tick,
            state: self.state.clone(),
        });
        out
    }

    fn resolve(&mut self, command: &Command) -> bool {
        if self.rng.gen_bool(self.reject_rate) {
            debug!(command_id = %command.id, "Simulated server rejected command");
            return false;
        }

        let mut next = self.state.clone();
        match self.predictors.apply(command, &mut next) {
            Ok(Prediction::Applied) => {
                self.state = next;
                true
            }
            _ => false,
        }
    }

    fn advance_world(&mut self) {
        self.state["last_update"] = json!(self.tick as f64 / 20.0);
        self.state["turn_time_remaining"] =
            json!(((TURN_TICKS - self.tick % TURN_TICKS) as f64) * 1.5);

        self.collect_income();
        self.move_enemy_unit();

        if self.tick % TURN_TICKS == 0 {
            self.change_turn();
        }
    }

    fn collect_income(&mut self) {
        let tiles = self.state["tiles"].as_array().cloned().unwrap_or_default();
        if let Some(players) = self.state["players"].as_array_mut() {
            for player in players.iter_mut() {
                let id = player["id"].as_u64();
                let owned = tiles.iter().filter(|t| t["owner"].as_u64() == id).count() as u64;
                let gold = player["resources"]["gold"].as_u64().unwrap_or(0) + owned;
                player["resources"]["gold"] = json!(gold);
            }
        }
    }

    fn move_enemy_unit(&mut self) {
        if !self.rng.gen_bool(0.3) {
            return;
        }
        let (dx, dy) = (self.rng.gen_range(0..3u64), self.rng.gen_range(0..3u64));
        let Some(units) = self.state["units"].as_array_mut() else {
            return;
        };
        if let Some(unit) = units.iter_mut().find(|u| u["owner"] == 2) {
            let x = (unit["position"]["x"].as_u64().unwrap_or(0) + dx).saturating_sub(1) % MAP_SIZE;
            let y = (unit["position"]["y"].as_u64().unwrap_or(0) + dy).saturating_sub(1) % MAP_SIZE;
            unit["position"] = json!({"x": x, "y": y});
        }
    }

    fn change_turn(&mut self) {
        let next_player = if self.state["current_player"] == 1 { 2 } else { 1 };
        let turn = self.state["turn_number"].as_u64().unwrap_or(0) + 1;
        self.state["current_player"] = json!(next_player);
        self.state["turn_number"] = json!(turn);

        let options: Vec<&str> = (0..3)
            .map(|_| TILE_TYPES[self.rng.gen_range(0..TILE_TYPES.len())])
            .collect();
        self.state["current_tile_options"] = json!(options);

        // The opponent trains a unit at their capital each turn
        let id = format!("unit_{}", self.next_unit);
        self.next_unit += 1;
        if let Some(units) = self.state["units"].as_array_mut() {
            units.push(json!({
                "id": id,
                "type": "infantry",
                "owner": 2,
                "position": {"x": MAP_SIZE - 2, "y": MAP_SIZE - 2},
                "hp": 100,
                "max_hp": 100,
                "status": "idle"
            }));
        }
    }
}

/// Two players, one capital each, one unit each
pub fn initial_board() -> StateTree {
    let far = MAP_SIZE - 2;
    json!({
        "game_id": "sim",
        "status": "playing",
        "current_player": 1,
        "turn_number": 1,
        "turn_time_remaining": 15.0,
        "last_update": 0.0,
        "players": [
            {"id": 1, "name": "Local", "resources": {"gold": 100, "food": 50, "faith": 0}},
            {"id": 2, "name": "Remote", "resources": {"gold": 100, "food": 50, "faith": 0}}
        ],
        "tiles": [
            {"id": "1,1", "type": "capital_city", "x": 1, "y": 1, "owner": 1,
             "hp": 1000, "max_hp": 1000, "worker": null},
            {"id": format!("{},{}", far, far), "type": "capital_city", "x": far, "y": far,
             "owner": 2, "hp": 1000, "max_hp": 1000, "worker": null}
        ],
        "units": [
            {"id": "unit_1", "type": "infantry", "owner": 1, "position": {"x": 2, "y": 1},
             "hp": 100, "max_hp": 100, "status": "idle"},
            {"id": "unit_2", "type": "infantry", "owner": 2, "position": {"x": far - 1, "y": far},
             "hp": 100, "max_hp": 100, "status": "idle"}
        ],
        "current_tile_options": ["city", "field", "monastery"],
        "events": []
    })
}

/// A plausible command for `issuer` given the state they currently see
pub fn random_command<R: Rng>(rng: &mut R, state: &StateTree, issuer: PlayerId) -> Command {
    let x = rng.gen_range(0..MAP_SIZE);
    let y = rng.gen_range(0..MAP_SIZE);

    match rng.gen_range(0..4) {
        0 => {
            let own_unit = state["units"].as_array().and_then(|units| {
                units
                    .iter()
                    .find(|u| u["owner"].as_u64() == Some(u64::from(issuer)))
                    .and_then(|u| u["id"].as_str().map(str::to_string))
            });
            match own_unit {
                Some(unit_id) => {
                    let data = json!({"unit_id": unit_id, "x": x, "y": y});
                    Command::new(kinds::MOVE_UNIT, data, issuer)
                }
                None => place_tile(rng, x, y, issuer),
            }
        }
        1 => {
            let (tx, ty) = owned_tile(state, issuer).unwrap_or((x, y));
            let unit_type = UNIT_TYPES[rng.gen_range(0..UNIT_TYPES.len())];
            let data = json!({"x": tx, "y": ty, "unit_type": unit_type});
            Command::new(kinds::TRAIN_UNIT, data, issuer)
        }
        2 => {
            let (tx, ty) = owned_tile(state, issuer).unwrap_or((x, y));
            let worker_type = WORKER_TYPES[rng.gen_range(0..WORKER_TYPES.len())];
            let data = json!({"x": tx, "y": ty, "worker_type": worker_type});
            Command::new(kinds::PLACE_WORKER, data, issuer)
        }
        _ => place_tile(rng, x, y, issuer),
    }
}

fn place_tile<R: Rng>(rng: &mut R, x: u64, y: u64, issuer: PlayerId) -> Command {
    let tile_type = TILE_TYPES[rng.gen_range(0..TILE_TYPES.len())];
    Command::new(kinds::PLACE_TILE, json!({"x": x, "y": y, "tile_type": tile_type}), issuer)
}

/// Last tile owned by `player` that has no worker yet
fn owned_tile(state: &StateTree, player: PlayerId) -> Option<(u64, u64)> {
    state["tiles"]
        .as_array()?
        .iter()
        .rev()
        .filter(|t| t["owner"].as_u64() == Some(u64::from(player)))
        .find(|t| t["worker"].is_null())
        .and_then(|t| Some((t["x"].as_u64()?, t["y"].as_u64()?)))
}
