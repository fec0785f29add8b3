//! Session hosting for multi-threaded clients
//!
//! The engine is single-owner. Hosts that touch it from several tasks either
//! share it behind a mutex ([`SharedEngine`]) or hand it to a task that owns it
//! and talk to that task over channels ([`ClientSession`] + [`SessionHandle`]).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::config::ReconciliationConfig;
use crate::diff::StateTree;
use crate::engine::{PredictionEngine, ReconciledEvent, ReconciliationStats};
use crate::protocol::{Command, ServerMsg};
use crate::util::time::unix_millis;

/// Session errors
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session task has stopped")]
    Closed,
}

/// Mutex-guarded engine that can be cloned across threads
#[derive(Clone)]
pub struct SharedEngine {
    inner: Arc<Mutex<PredictionEngine>>,
}

impl SharedEngine {
    pub fn new(engine: PredictionEngine) -> Self {
        Self {
            inner: Arc::new(Mutex::new(engine)),
        }
    }

    pub fn initialize(&self, server_state: StateTree, server_tick: u64) {
        self.inner.lock().initialize(server_state, server_tick);
    }

    pub fn predict(&self, command: Command, current_state: &StateTree) -> StateTree {
        self.inner.lock().predict(command, current_state)
    }

    pub fn reconcile(&self, server_state: StateTree, server_tick: u64) -> StateTree {
        self.inner.lock().reconcile(server_state, server_tick)
    }

    pub fn acknowledge_command(&self, command_id: &str, success: bool) {
        self.inner.lock().acknowledge_command(command_id, success);
    }

    /// Run `f` with exclusive access to the engine
    pub fn with<R>(&self, f: impl FnOnce(&mut PredictionEngine) -> R) -> R {
        f(&mut self.inner.lock())
    }
}

/// Point-in-time view of a session
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub engine: ReconciliationStats,
    pub pending_commands: usize,
    pub snapshots: usize,
    pub last_server_tick: u64,
    pub last_rtt_ms: Option<u64>,
}

/// Requests handled by the session task
#[derive(Debug)]
pub enum SessionMsg {
    Initialize {
        state: StateTree,
        tick: u64,
    },
    Predict {
        command: Command,
        reply: oneshot::Sender<StateTree>,
    },
    Server(ServerMsg),
    CurrentState {
        reply: oneshot::Sender<StateTree>,
    },
    Stats {
        reply: oneshot::Sender<SessionStats>,
    },
    Shutdown,
}

/// Handle to a running session
#[derive(Clone)]
pub struct SessionHandle {
    input_tx: mpsc::Sender<SessionMsg>,
    event_tx: broadcast::Sender<ReconciledEvent>,
    pending_count: Arc<AtomicUsize>,
}

impl SessionHandle {
    pub async fn initialize(&self, state: StateTree, tick: u64) -> Result<(), SessionError> {
        self.send(SessionMsg::Initialize { state, tick }).await
    }

    /// Predict `command` on top of the session's current state
    pub async fn predict(&self, command: Command) -> Result<StateTree, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionMsg::Predict { command, reply }).await?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    /// Feed a message received from the server
    pub async fn handle_server_msg(&self, msg: ServerMsg) -> Result<(), SessionError> {
        self.send(SessionMsg::Server(msg)).await
    }

    pub async fn acknowledge(&self, command_id: String, success: bool) -> Result<(), SessionError> {
        let msg = ServerMsg::CommandAck {
            command_id,
            success,
        };
        self.handle_server_msg(msg).await
    }

    /// State the client should currently render
    pub async fn current_state(&self) -> Result<StateTree, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionMsg::CurrentState { reply }).await?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    pub async fn stats(&self) -> Result<SessionStats, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionMsg::Stats { reply }).await?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    pub async fn shutdown(&self) -> Result<(), SessionError> {
        self.send(SessionMsg::Shutdown).await
    }

    /// Reconciled events for telemetry consumers
    pub fn subscribe(&self) -> broadcast::Receiver<ReconciledEvent> {
        self.event_tx.subscribe()
    }

    /// Pending command count as of the last processed message
    pub fn pending_count(&self) -> usize {
        self.pending_count.load(Ordering::Relaxed)
    }

    async fn send(&self, msg: SessionMsg) -> Result<(), SessionError> {
        self.input_tx.send(msg).await.map_err(|_| SessionError::Closed)
    }
}

/// Task that owns one engine and the state the client is rendering
pub struct ClientSession {
    engine: PredictionEngine,
    current: StateTree,
    input_rx: mpsc::Receiver<SessionMsg>,
    pending_count: Arc<AtomicUsize>,
    last_rtt_ms: Option<u64>,
}

impl ClientSession {
    /// Create a session with the built-in predictors
    pub fn new(config: ReconciliationConfig) -> (Self, SessionHandle) {
        Self::with_engine(PredictionEngine::new(config))
    }

    pub fn with_engine(mut engine: PredictionEngine) -> (Self, SessionHandle) {
        let (input_tx, input_rx) = mpsc::channel(256);
        let (event_tx, _) = broadcast::channel(64);
        let pending_count = Arc::new(AtomicUsize::new(0));

        let listener_tx = event_tx.clone();
        engine.on_reconciled(move |event| {
            // No subscribers is fine
            let _ = listener_tx.send(event.clone());
        });

        let handle = SessionHandle {
            input_tx,
            event_tx,
            pending_count: pending_count.clone(),
        };

        let session = Self {
            engine,
            current: StateTree::Null,
            input_rx,
            pending_count,
            last_rtt_ms: None,
        };

        (session, handle)
    }

    /// Process messages until shutdown or until every handle is dropped
    pub async fn run(mut self) {
        info!("Client session started");

        while let Some(msg) = self.input_rx.recv().await {
            match msg {
                SessionMsg::Initialize { state, tick } => {
                    self.engine.initialize(state.clone(), tick);
                    self.current = state;
                }
                SessionMsg::Predict { command, reply } => {
                    self.current = self.engine.predict(command, &self.current);
                    let _ = reply.send(self.current.clone());
                }
                SessionMsg::Server(server_msg) => self.handle_server_msg(server_msg),
                SessionMsg::CurrentState { reply } => {
                    let _ = reply.send(self.current.clone());
                }
                SessionMsg::Stats { reply } => {
                    let _ = reply.send(self.stats());
                }
                SessionMsg::Shutdown => break,
            }

            self.pending_count
                .store(self.engine.pending_command_count(), Ordering::Relaxed);
        }

        let stats = self.engine.stats();
        info!(
            predictions = stats.total_predictions,
            confirmed = stats.successful_predictions,
            rollbacks = stats.rollbacks_performed,
            "Client session stopped"
        );
    }

    fn handle_server_msg(&mut self, msg: ServerMsg) {
        match msg {
            ServerMsg::Snapshot { tick, state } => {
                self.current = self.engine.reconcile(state, tick);
            }
            ServerMsg::CommandAck {
                command_id,
                success,
            } => {
                if !success {
                    warn!(command_id = %command_id, "Server rejected command");
                }
                self.engine.acknowledge_command(&command_id, success);
            }
            ServerMsg::Pong { t } => {
                let rtt = unix_millis().saturating_sub(t);
                debug!(rtt_ms = rtt, "Pong");
                self.last_rtt_ms = Some(rtt);
            }
        }
    }

    fn stats(&self) -> SessionStats {
        SessionStats {
            engine: self.engine.stats().clone(),
            pending_commands: self.engine.pending_command_count(),
            snapshots: self.engine.snapshot_count(),
            last_server_tick: self.engine.last_server_tick(),
            last_rtt_ms: self.last_rtt_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::kinds;
    use serde_json::json;

    fn board() -> StateTree {
        json!({"tiles": [], "units": []})
    }

    #[tokio::test]
    async fn session_predicts_and_reconciles() {
        let (session, handle) = ClientSession::new(ReconciliationConfig::default());
        let task = tokio::spawn(session.run());
        let mut events = handle.subscribe();

        handle.initialize(board(), 1).await.unwrap();
        let data = json!({"x": 2, "y": 3, "tile_type": "city"});
        let cmd = Command::with_id("a", kinds::PLACE_TILE, data, 1);
        let predicted = handle.predict(cmd).await.unwrap();
        assert_eq!(predicted["tiles"].as_array().unwrap().len(), 1);

        let snapshot = ServerMsg::Snapshot {
            tick: 2,
            state: board(),
        };
        handle.handle_server_msg(snapshot).await.unwrap();
        let event = events.recv().await.unwrap();
        assert_eq!(event.server_tick, 2);
        assert!(!event.rollback_occurred);

        // Still pending, so the tile stays predicted on top of the server state
        let current = handle.current_state().await.unwrap();
        assert_eq!(current["tiles"].as_array().unwrap().len(), 1);

        handle.acknowledge("a".into(), false).await.unwrap();
        let stats = handle.stats().await.unwrap();
        assert_eq!(stats.pending_commands, 0);
        assert_eq!(stats.snapshots, 0);
        assert_eq!(handle.pending_count(), 0);

        handle.shutdown().await.unwrap();
        task.await.unwrap();
        assert!(handle.current_state().await.is_err());
    }

    #[tokio::test]
    async fn pong_records_round_trip() {
        let (session, handle) = ClientSession::new(ReconciliationConfig::default());
        let task = tokio::spawn(session.run());
        assert_eq!(handle.stats().await.unwrap().last_rtt_ms, None);

        let sent = unix_millis().saturating_sub(25);
        handle.handle_server_msg(ServerMsg::Pong { t: sent }).await.unwrap();
        let rtt = handle.stats().await.unwrap().last_rtt_ms.unwrap();
        assert!(rtt >= 25);
        assert_eq!(handle.pending_count(), 0);

        handle.shutdown().await.unwrap();
        task.await.unwrap();
    }

    #[test]
    fn shared_engine_across_threads() {
        let shared = SharedEngine::new(PredictionEngine::new(ReconciliationConfig::default()));
        shared.initialize(board(), 1);

        let workers: Vec<_> = (0..4u64)
            .map(|i| {
                let engine = shared.clone();
                std::thread::spawn(move || {
                    let data = json!({"x": i, "y": 0, "tile_type": "field"});
                    let cmd = Command::new(kinds::PLACE_TILE, data, 1);
                    engine.predict(cmd, &board());
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(shared.with(|e| e.pending_command_count()), 4);
        let state = shared.reconcile(board(), 2);
        assert_eq!(state["tiles"].as_array().unwrap().len(), 4);
    }
}
