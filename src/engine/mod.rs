//! Prediction & reconciliation modules

pub mod divergence;
pub mod events;
pub mod predictors;
pub mod reconciler;
pub mod snapshot;
pub mod stats;

pub use divergence::{
    calculate_divergence_score, has_critical_changes, DivergenceReport, DivergenceScorer,
};
pub use events::{ReconcileListener, ReconciledEvent};
pub use predictors::{Prediction, PredictionError, Predictor, PredictorRegistry};
pub use reconciler::{EnginePhase, PredictionEngine, Reconciliation, SNAPSHOT_RETENTION_TICKS};
pub use snapshot::{Snapshot, SnapshotHistory};
pub use stats::ReconciliationStats;
