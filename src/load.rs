//! Time-decayed per-backend load estimates

use crate::backend::BackendId;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Estimated load of every backend plus the instant it was last decayed.
///
/// Loads are measured in seconds of outstanding work and drain at one
/// unit per second of wall-clock time. Every stored value is >= 0.
#[derive(Debug, Clone)]
pub struct LoadState {
    loads: Vec<f64>,
    last_update: Instant,
}

impl LoadState {
    /// All backends start idle
    pub fn new(backends: usize, now: Instant) -> Self {
        Self {
            loads: vec![0.0; backends],
            last_update: now,
        }
    }

    pub fn len(&self) -> usize {
        self.loads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loads.is_empty()
    }

    pub fn get(&self, id: BackendId) -> Option<f64> {
        self.loads.get(id.0).copied()
    }

    pub fn loads(&self) -> &[f64] {
        &self.loads
    }

    pub fn last_update(&self) -> Instant {
        self.last_update
    }

    /// Drain every load by the time elapsed since the last update, clamping at zero.
    ///
    /// An instant earlier than `last_update` counts as zero elapsed time.
    pub fn decay(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_update).as_secs_f64();

        if elapsed > 0.0 {
            for load in &mut self.loads {
                *load = (*load - elapsed).max(0.0);
            }
        }

        self.last_update = self.last_update.max(now);
    }

    /// Store a committed projection for one backend
    pub(crate) fn commit(&mut self, id: BackendId, load: f64) {
        if let Some(slot) = self.loads.get_mut(id.0) {
            *slot = load.max(0.0);
        }
    }
}

/// Point-in-time copy of the load estimates, published for observers
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoadSnapshot {
    pub loads: Vec<f64>,
    pub selections: u64,
    pub updated_at: Option<chrono::DateTime<chrono::Utc>>,
}
