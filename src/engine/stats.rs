//! Running reconciliation counters

use serde::Serialize;

/// Weight of the newest sample in the smoothed latency
pub const LATENCY_SMOOTHING: f64 = 0.1;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconciliationStats {
    pub total_predictions: u64,
    /// Predictions the server acknowledged as accepted
    pub successful_predictions: u64,
    pub rollbacks_performed: u64,
    pub divergence_events: u64,
    pub last_reconciliation_ms: f64,
    /// Exponential moving average of reconciliation duration
    pub average_latency_ms: f64,
}

impl ReconciliationStats {
    pub fn record_reconciliation(&mut self, duration_ms: f64) {
        self.last_reconciliation_ms = duration_ms;
        self.average_latency_ms =
            self.average_latency_ms * (1.0 - LATENCY_SMOOTHING) + duration_ms * LATENCY_SMOOTHING;
    }

    /// Share of predictions confirmed by the server
    pub fn accuracy(&self) -> f64 {
        if self.total_predictions == 0 {
            0.0
        } else {
            self.successful_predictions as f64 / self.total_predictions as f64
        }
    }
}
