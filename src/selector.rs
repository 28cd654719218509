//! Projected-load backend selection

use crate::backend::BackendId;
use crate::error::RequestError;
use crate::load::{LoadSnapshot, LoadState};
use crate::request::RequestDescriptor;
use crate::weights::WeightTable;
use std::time::Instant;

/// Picks the backend whose load would be lowest after taking a request.
///
/// Owns the load estimates outright. Callers drive it from a single task,
/// so selections are applied strictly in call order without locking.
#[derive(Debug, Clone)]
pub struct BackendSelector {
    state: LoadState,
    weights: WeightTable,
    selections: u64,
}

impl BackendSelector {
    pub fn new(weights: WeightTable, now: Instant) -> Self {
        Self {
            state: LoadState::new(weights.backend_count(), now),
            weights,
            selections: 0,
        }
    }

    pub fn weights(&self) -> &WeightTable {
        &self.weights
    }

    pub fn state(&self) -> &LoadState {
        &self.state
    }

    pub fn backend_count(&self) -> usize {
        self.state.len()
    }

    /// Parse a raw payload and select a backend for it.
    ///
    /// A malformed payload is rejected before any decay, leaving the load
    /// estimates exactly as they were.
    pub fn route(
        &mut self,
        payload: &[u8],
        now: Instant,
    ) -> Result<(RequestDescriptor, BackendId), RequestError> {
        let request = RequestDescriptor::parse(payload, &self.weights)?;
        let backend = self.select(&request, now)?;
        Ok((request, backend))
    }

    /// Decay, project, pick the minimum, and commit it.
    ///
    /// Ties go to the lowest backend id. A request whose cheapest projection
    /// is not finite is rejected before any decay, so committed loads always
    /// stay finite.
    pub fn select(
        &mut self,
        request: &RequestDescriptor,
        now: Instant,
    ) -> Result<BackendId, RequestError> {
        // Decay only lowers loads, so a finite minimum now stays finite after it
        let (_, cheapest) = argmin(&self.projected_loads(request)?);
        if !cheapest.is_finite() {
            return Err(RequestError::LoadOverflow {
                category: request.category(),
                duration: request.duration(),
            });
        }

        self.state.decay(now);

        let projected = self.projected_loads(request)?;
        let (chosen, load) = argmin(&projected);

        self.state.commit(chosen, load);
        self.selections += 1;

        tracing::debug!(
            backend = %chosen,
            category = %request.category_char(),
            duration = request.duration(),
            projected = ?projected,
            "Selected backend"
        );

        Ok(chosen)
    }

    /// Load each backend would carry after taking `request`, without decaying or committing
    pub fn projected_loads(&self, request: &RequestDescriptor) -> Result<Vec<f64>, RequestError> {
        let row = self
            .weights
            .row(request.category())
            .ok_or(RequestError::InvalidCategory(request.category()))?;

        let duration = request.duration() as f64;
        Ok(self
            .state
            .loads()
            .iter()
            .zip(row)
            .map(|(load, weight)| load + duration * weight)
            .collect())
    }

    pub fn snapshot(&self) -> LoadSnapshot {
        LoadSnapshot {
            loads: self.state.loads().to_vec(),
            selections: self.selections,
            updated_at: Some(chrono::Utc::now()),
        }
    }
}

/// First index holding the minimum value
fn argmin(values: &[f64]) -> (BackendId, f64) {
    let mut best = (BackendId(0), f64::INFINITY);
    for (i, &value) in values.iter().enumerate() {
        if value < best.1 {
            best = (BackendId(i), value);
        }
    }
    best
}
