//! API response models

use serde::{Deserialize, Serialize};

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Estimated load of one backend
#[derive(Debug, Serialize, Deserialize)]
pub struct BackendLoad {
    pub id: usize,
    pub endpoint: String,
    pub load: f64,
}

/// Latest load estimates as of the most recent selection
#[derive(Debug, Serialize, Deserialize)]
pub struct LoadsResponse {
    pub backends: Vec<BackendLoad>,
    pub selections: u64,

    /// When the listener published this snapshot
    pub updated_at: Option<chrono::DateTime<chrono::Utc>>,
}
