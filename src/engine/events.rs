//! Events emitted by the engine for telemetry and debug overlays

use serde::{Deserialize, Serialize};

/// Emitted after every `reconcile()` call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciledEvent {
    pub server_tick: u64,
    pub divergence_score: f64,
    pub rollback_occurred: bool,
    pub reconciliation_duration_ms: f64,
}

/// Observer callback for reconciled events
pub type ReconcileListener = Box<dyn FnMut(&ReconciledEvent) + Send>;
