//! Prediction & reconciliation engine
//!
//! Holds a bounded history of local predictions and the set of commands the
//! server has not yet resolved. Each authoritative snapshot is compared with
//! the previous one; small divergence keeps the optimistic view by
//! re-predicting pending commands on top of the new server state, large
//! divergence rolls back and replays only the recent, still-pending commands.

use indexmap::IndexMap;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::ReconciliationConfig;
use crate::diff::{generate_diff, EditOperation, StateTree};
use crate::protocol::Command;
use crate::util::time::Timer;

use super::divergence::DivergenceScorer;
use super::events::{ReconcileListener, ReconciledEvent};
use super::predictors::{Prediction, PredictionError, PredictorRegistry};
use super::snapshot::{Snapshot, SnapshotHistory};
use super::stats::ReconciliationStats;

/// Snapshots built more than this many ticks before the newest server tick
/// are retired on reconciliation
pub const SNAPSHOT_RETENTION_TICKS: u64 = 2;

/// Engine lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnginePhase {
    /// No baseline yet
    Uninitialized,
    /// Baseline known; steady state
    Ready,
}

/// Full result of one reconciliation
#[derive(Debug, Clone)]
pub struct Reconciliation {
    /// State the client should now render
    pub state: StateTree,
    /// Diff between the previous and the new server state
    pub operations: Vec<EditOperation>,
    pub event: ReconciledEvent,
}

/// Client-side prediction and reconciliation core
pub struct PredictionEngine {
    config: ReconciliationConfig,
    predictors: PredictorRegistry,
    phase: EnginePhase,
    history: SnapshotHistory,
    /// Unresolved commands in issuance order
    pending: IndexMap<String, Command>,
    last_server_state: Option<StateTree>,
    last_server_tick: u64,
    stats: ReconciliationStats,
    listeners: Vec<ReconcileListener>,
}

impl PredictionEngine {
    /// Engine with the built-in predictors
    pub fn new(config: ReconciliationConfig) -> Self {
        Self::with_predictors(config, PredictorRegistry::with_builtin())
    }

    pub fn with_predictors(config: ReconciliationConfig, predictors: PredictorRegistry) -> Self {
        Self {
            history: SnapshotHistory::new(config.max_snapshots),
            config,
            predictors,
            phase: EnginePhase::Uninitialized,
            pending: IndexMap::new(),
            last_server_state: None,
            last_server_tick: 0,
            stats: ReconciliationStats::default(),
            listeners: Vec::new(),
        }
    }

    /// Reset history and pending commands and adopt `server_state` as baseline
    pub fn initialize(&mut self, server_state: StateTree, server_tick: u64) {
        self.history.clear();
        self.pending.clear();
        self.last_server_state = Some(server_state);
        self.last_server_tick = server_tick;
        self.phase = EnginePhase::Ready;

        info!(tick = server_tick, "Prediction engine initialized");
    }

    /// Apply `command` optimistically on top of `current_state`.
    ///
    /// Never fails: predictor errors, refusals and unknown kinds all return
    /// `current_state` unchanged. Unless prediction is disabled (or the engine
    /// has no baseline yet) the command is recorded as pending either way,
    /// since it was still sent to the server.
    pub fn predict(&mut self, command: Command, current_state: &StateTree) -> StateTree {
        if !self.config.prediction_enabled {
            return current_state.clone();
        }
        if self.phase == EnginePhase::Uninitialized {
            warn!(command_id = %command.id, "Prediction requested before initialization");
            return current_state.clone();
        }

        let mut predicted = current_state.clone();
        match self.predictors.apply(&command, &mut predicted) {
            Ok(Prediction::Applied) => {
                debug!(command_id = %command.id, kind = %command.kind, "Command predicted");
            }
            Ok(Prediction::Refused(reason)) => {
                debug!(
                    command_id = %command.id,
                    kind = %command.kind,
                    reason,
                    "Prediction refused locally"
                );
                predicted = current_state.clone();
            }
            Err(PredictionError::UnknownKind(kind)) => {
                warn!(command_id = %command.id, kind = %kind, "No predictor for command kind");
                predicted = current_state.clone();
            }
            Err(err) => {
                warn!(
                    command_id = %command.id,
                    kind = %command.kind,
                    error = %err,
                    "Prediction failed"
                );
                predicted = current_state.clone();
            }
        }

        self.stats.total_predictions += 1;

        let snapshot = Snapshot::new(
            self.last_server_tick,
            predicted.clone(),
            Some(command.clone()),
        );
        self.pending.insert(command.id.clone(), command);
        let evicted = self.history.push(snapshot);
        self.retire(evicted);

        predicted
    }

    /// Converge on `server_state` and return the state to render
    pub fn reconcile(&mut self, server_state: StateTree, server_tick: u64) -> StateTree {
        self.reconcile_detailed(server_state, server_tick).state
    }

    /// Like `reconcile`, also returning the server diff and the emitted event
    pub fn reconcile_detailed(
        &mut self,
        server_state: StateTree,
        server_tick: u64,
    ) -> Reconciliation {
        let timer = Timer::new();

        if self.phase == EnginePhase::Uninitialized {
            info!(tick = server_tick, "Adopting first server state as baseline");
            self.phase = EnginePhase::Ready;
        } else if server_tick < self.last_server_tick {
            warn!(
                tick = server_tick,
                last_tick = self.last_server_tick,
                "Server tick went backwards"
            );
        }

        if self.history.is_empty() {
            self.adopt(server_state.clone(), server_tick);
            let event = self.finish(server_tick, 0.0, false, &timer);
            return Reconciliation {
                state: server_state,
                operations: Vec::new(),
                event,
            };
        }

        let operations = {
            let baseline = self.last_server_state.as_ref().unwrap_or(&Value::Null);
            generate_diff(baseline, &server_state, &self.config.diff)
        };
        let report = DivergenceScorer::assess(&operations, &self.config.critical_paths);
        let divergent = DivergenceScorer::is_divergent(
            &report,
            self.config.divergence_threshold,
            self.config.rollback_on_critical_changes,
        );

        let (state, rollback_occurred) = if divergent {
            self.stats.divergence_events += 1;
            if self.config.rollback_enabled {
                (self.rollback(&server_state, server_tick), true)
            } else {
                warn!(
                    tick = server_tick,
                    score = report.score,
                    discarded = self.pending.len(),
                    "Divergence with rollback disabled, discarding predictions"
                );
                self.discard_predictions();
                (server_state.clone(), false)
            }
        } else {
            (self.replay_pending(server_state.clone()), false)
        };

        self.expire(server_tick);
        self.adopt(server_state, server_tick);
        let event = self.finish(server_tick, report.score, rollback_occurred, &timer);

        Reconciliation {
            state,
            operations,
            event,
        }
    }

    /// Resolve a pending command. Rejected commands also lose every snapshot
    /// that references them, so they can never be replayed.
    pub fn acknowledge_command(&mut self, command_id: &str, success: bool) {
        let was_pending = self.pending.shift_remove(command_id).is_some();

        if success {
            if was_pending {
                self.stats.successful_predictions += 1;
                self.history.mark_confirmed(command_id);
                debug!(command_id, "Command confirmed");
            } else {
                debug!(command_id, "Confirmation for unknown or expired command");
            }
        } else {
            let stripped = self.history.remove_command(command_id);
            debug!(command_id, stripped, was_pending, "Command rejected");
        }
    }

    /// Register an observer for reconciled events
    pub fn on_reconciled<F>(&mut self, listener: F)
    where
        F: FnMut(&ReconciledEvent) + Send + 'static,
    {
        self.listeners.push(Box::new(listener));
    }

    /// Swap tuning at runtime; shrinking capacity evicts immediately
    pub fn update_config(&mut self, config: ReconciliationConfig) {
        let evicted = self.history.set_capacity(config.max_snapshots);
        self.config = config;
        self.retire(evicted);
    }

    pub fn phase(&self) -> EnginePhase {
        self.phase
    }

    pub fn config(&self) -> &ReconciliationConfig {
        &self.config
    }

    pub fn stats(&self) -> &ReconciliationStats {
        &self.stats
    }

    pub fn snapshot_count(&self) -> usize {
        self.history.len()
    }

    pub fn snapshots(&self) -> impl Iterator<Item = &Snapshot> {
        self.history.iter()
    }

    pub fn pending_command_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, command_id: &str) -> bool {
        self.pending.contains_key(command_id)
    }

    /// Pending commands in issuance order
    pub fn pending_commands(&self) -> impl Iterator<Item = &Command> {
        self.pending.values()
    }

    pub fn last_server_tick(&self) -> u64 {
        self.last_server_tick
    }

    pub fn last_server_state(&self) -> Option<&StateTree> {
        self.last_server_state.as_ref()
    }

    /// Rebuild from `server_state`, replaying recent snapshots whose command
    /// is still pending
    fn rollback(&mut self, server_state: &StateTree, server_tick: u64) -> StateTree {
        let window_start = server_tick.saturating_sub(self.config.max_rollback_ticks);
        let mut state = server_state.clone();
        let mut replayed = 0usize;

        for snapshot in self.history.iter().filter(|s| s.server_tick >= window_start) {
            let Some(command) = &snapshot.command else {
                continue;
            };
            if self.pending.contains_key(&command.id) {
                self.replay(command, &mut state);
                replayed += 1;
            }
        }

        self.stats.rollbacks_performed += 1;
        info!(tick = server_tick, replayed, "Rolled back to server state");
        state
    }

    /// Re-predict every pending command on top of `state`, oldest first
    fn replay_pending(&self, mut state: StateTree) -> StateTree {
        for command in self.pending.values() {
            self.replay(command, &mut state);
        }
        state
    }

    fn replay(&self, command: &Command, state: &mut StateTree) {
        let mut candidate = state.clone();
        match self.predictors.apply(command, &mut candidate) {
            Ok(Prediction::Applied) => *state = candidate,
            Ok(Prediction::Refused(reason)) => {
                debug!(command_id = %command.id, reason, "Replay refused");
            }
            Err(err) => {
                debug!(command_id = %command.id, error = %err, "Replay failed");
            }
        }
    }

    /// Retire snapshots that fell behind the retention window and commands
    /// that fell outside the rollback window
    fn expire(&mut self, server_tick: u64) {
        let pruned = self
            .history
            .prune_before(server_tick.saturating_sub(SNAPSHOT_RETENTION_TICKS));
        self.retire(pruned);

        let window_start = server_tick.saturating_sub(self.config.max_rollback_ticks);
        let stale: Vec<String> = self
            .history
            .iter()
            .filter(|s| s.server_tick < window_start)
            .filter_map(|s| s.command_id().map(str::to_string))
            .collect();
        for id in stale {
            if self.pending.shift_remove(&id).is_some() {
                debug!(command_id = %id, "Pending command outside rollback window");
            }
        }
    }

    /// Drop pending status for commands whose snapshot left the history
    fn retire(&mut self, snapshots: Vec<Snapshot>) {
        for snapshot in snapshots {
            if let Some(id) = snapshot.command_id() {
                if self.pending.shift_remove(id).is_some() {
                    debug!(command_id = id, "Pending command aged out");
                }
            }
        }
    }

    fn discard_predictions(&mut self) {
        self.history.clear();
        self.pending.clear();
    }

    fn adopt(&mut self, server_state: StateTree, server_tick: u64) {
        self.last_server_state = Some(server_state);
        self.last_server_tick = server_tick;
    }

    fn finish(
        &mut self,
        server_tick: u64,
        divergence_score: f64,
        rollback_occurred: bool,
        timer: &Timer,
    ) -> ReconciledEvent {
        let duration_ms = timer.elapsed_ms();
        self.stats.record_reconciliation(duration_ms);

        let event = ReconciledEvent {
            server_tick,
            divergence_score,
            rollback_occurred,
            reconciliation_duration_ms: duration_ms,
        };
        for listener in &mut self.listeners {
            listener(&event);
        }

        debug!(
            tick = server_tick,
            score = divergence_score,
            rollback = rollback_occurred,
            duration_ms,
            pending = self.pending.len(),
            "Reconciled"
        );
        event
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::kinds;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::Arc;

    fn base_state() -> StateTree {
        json!({
            "current_player": 1,
            "turn_number": 1,
            "players": [{"id": 1, "resources": {"gold": 100}}],
            "tiles": [{"id": "1,1", "type": "city", "x": 1, "y": 1, "owner": 1, "worker": null}],
            "units": []
        })
    }

    fn place(id: &str, x: u64, y: u64) -> Command {
        Command::with_id(id, kinds::PLACE_TILE, json!({"x": x, "y": y, "tile_type": "field"}), 1)
    }

    fn ready_engine(config: ReconciliationConfig) -> PredictionEngine {
        let mut engine = PredictionEngine::new(config);
        engine.initialize(base_state(), 10);
        engine
    }

    #[test]
    fn disabled_prediction_is_pass_through() {
        let mut engine = ready_engine(ReconciliationConfig {
            prediction_enabled: false,
            ..ReconciliationConfig::default()
        });
        let out = engine.predict(place("a", 5, 5), &base_state());
        assert_eq!(out, base_state());
        assert_eq!(engine.snapshot_count(), 0);
        assert_eq!(engine.pending_command_count(), 0);
        assert_eq!(engine.stats().total_predictions, 0);
    }

    #[test]
    fn predict_before_initialize_records_nothing() {
        let mut engine = PredictionEngine::new(ReconciliationConfig::default());
        let out = engine.predict(place("a", 5, 5), &base_state());
        assert_eq!(out, base_state());
        assert_eq!(engine.phase(), EnginePhase::Uninitialized);
        assert_eq!(engine.snapshot_count(), 0);
    }

    #[test]
    fn snapshots_are_tagged_with_current_tick() {
        let mut engine = ready_engine(ReconciliationConfig::default());
        let out = engine.predict(place("a", 5, 5), &base_state());
        let snapshot = engine.snapshots().next().unwrap();
        assert_eq!(snapshot.server_tick, 10);
        assert_eq!(snapshot.predicted_state, out);
        assert_eq!(snapshot.command_id(), Some("a"));
        assert!(!snapshot.confirmed);
    }

    #[test]
    fn unknown_kind_is_recorded_but_unchanged() {
        let mut engine = ready_engine(ReconciliationConfig::default());
        let cmd = Command::with_id("x", "cast_spell", json!({}), 1);
        let out = engine.predict(cmd, &base_state());
        assert_eq!(out, base_state());
        assert!(engine.is_pending("x"));
    }

    #[test]
    fn eviction_retires_pending_commands() {
        let mut engine = ready_engine(ReconciliationConfig {
            max_snapshots: 2,
            ..ReconciliationConfig::default()
        });
        let mut state = base_state();
        for (i, id) in ["a", "b", "c"].iter().enumerate() {
            state = engine.predict(place(id, 10 + i as u64, 0), &state);
        }
        assert_eq!(engine.snapshot_count(), 2);
        assert!(!engine.is_pending("a"));
        assert!(engine.is_pending("b") && engine.is_pending("c"));

        engine.update_config(ReconciliationConfig {
            max_snapshots: 1,
            ..ReconciliationConfig::default()
        });
        assert_eq!(engine.snapshot_count(), 1);
        assert_eq!(engine.pending_command_count(), 1);
    }

    #[test]
    fn divergence_without_rollback_discards_predictions() {
        let mut engine = ready_engine(ReconciliationConfig {
            rollback_enabled: false,
            divergence_threshold: 0.5,
            ..ReconciliationConfig::default()
        });
        engine.predict(place("a", 5, 5), &base_state());

        let mut server = base_state();
        server["turn_number"] = json!(2);
        let result = engine.reconcile_detailed(server.clone(), 11);

        assert_eq!(result.state, server);
        assert!(!result.event.rollback_occurred);
        assert_eq!(engine.snapshot_count(), 0);
        assert_eq!(engine.pending_command_count(), 0);
        assert_eq!(engine.stats().divergence_events, 1);
    }

    #[test]
    fn critical_override_forces_rollback_when_enabled() {
        let mut engine = ready_engine(ReconciliationConfig {
            rollback_on_critical_changes: true,
            ..ReconciliationConfig::default()
        });
        engine.predict(place("a", 5, 5), &base_state());

        let mut server = base_state();
        server["current_player"] = json!(2);
        let result = engine.reconcile_detailed(server, 11);

        assert_eq!(result.event.divergence_score, 1.0);
        assert!(result.event.rollback_occurred);
        assert_eq!(engine.stats().rollbacks_performed, 1);
    }

    #[test]
    fn ephemeral_fields_do_not_count() {
        let mut engine = ready_engine(ReconciliationConfig::default());
        engine.predict(place("a", 5, 5), &base_state());

        let mut server = base_state();
        server["last_update"] = json!(1234.5);
        server["events"] = json!([{"type": "tick"}]);
        let result = engine.reconcile_detailed(server, 11);
        assert!(result.operations.is_empty());
    }

    #[test]
    fn old_snapshots_are_pruned() {
        let mut engine = ready_engine(ReconciliationConfig::default());
        engine.predict(place("a", 5, 5), &base_state());

        engine.reconcile(base_state(), 12);
        assert_eq!(engine.snapshot_count(), 1);

        engine.reconcile(base_state(), 13);
        assert_eq!(engine.snapshot_count(), 0);
        assert!(!engine.is_pending("a"));
    }

    #[test]
    fn listeners_receive_every_reconciliation() {
        let mut engine = ready_engine(ReconciliationConfig::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        engine.on_reconciled(move |event| sink.lock().push(event.server_tick));

        engine.reconcile(base_state(), 11);
        engine.predict(place("a", 5, 5), &base_state());
        engine.reconcile(base_state(), 12);

        assert_eq!(*seen.lock(), vec![11, 12]);
        assert!(engine.stats().average_latency_ms >= 0.0);
    }

    #[test]
    fn success_ack_marks_snapshot_confirmed() {
        let mut engine = ready_engine(ReconciliationConfig::default());
        engine.predict(place("a", 5, 5), &base_state());
        engine.acknowledge_command("a", true);
        engine.acknowledge_command("a", true);

        assert_eq!(engine.stats().successful_predictions, 1);
        assert!(engine.snapshots().all(|s| s.confirmed));
        assert_eq!(engine.pending_command_count(), 0);
    }
}
