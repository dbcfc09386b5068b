use serde::{Deserialize, Serialize};

/// Engine operation counters
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Metrics {
    pub sessions_started: u64,
    pub answers_applied: u64,
    pub sessions_finished: u64,
    pub sessions_imported: u64,
    pub sessions_exported: u64,
    pub requests_total: u64,
    pub requests_failed: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a request that succeeded
    pub fn record_success(&mut self) {
        self.requests_total += 1;
    }

    /// Record a request that returned an error
    pub fn record_failure(&mut self) {
        self.requests_total += 1;
        self.requests_failed += 1;
    }

    /// Get success rate as percentage
    pub fn success_rate(&self) -> f64 {
        if self.requests_total == 0 {
            return 100.0;
        }
        let ok = self.requests_total - self.requests_failed;
        (ok as f64 / self.requests_total as f64) * 100.0
    }
}
