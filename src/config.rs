//! Configuration structures and loading logic

use crate::backend::{BackendEndpoint, BackendId, ConnectionPolicy};
use crate::weights::{self, WeightTable};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Main balancer configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BalancerConfig {
    pub listen_addr: SocketAddr,
    pub listen_backlog: u32,

    /// Port used to reach every backend that does not set its own.
    /// Defaults to the listener's own port.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend_port: Option<u16>,

    pub buffer_size: usize,
    pub max_sessions: usize,
    pub connection_policy: ConnectionPolicy,
    pub graceful_shutdown_timeout_secs: u64,

    /// Admin HTTP API (health, metrics, loads). Disabled when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin_port: Option<u16>,

    /// Index in this list is the backend id
    pub backends: Vec<BackendConfig>,

    /// Category -> one multiplier per backend
    pub weights: BTreeMap<String, Vec<f64>>,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            listen_backlog: default_listen_backlog(),
            backend_port: None,
            buffer_size: default_buffer_size(),
            max_sessions: default_max_sessions(),
            connection_policy: ConnectionPolicy::default(),
            graceful_shutdown_timeout_secs: default_graceful_shutdown_timeout(),
            admin_port: None,
            backends: Vec::new(),
            weights: weights::default_rows(),
        }
    }
}

impl BalancerConfig {
    /// Load configuration from file with environment variable overrides
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content).context("Failed to parse TOML config")?
        } else {
            Self::default()
        };

        if let Ok(addr) = std::env::var("BALANCER_LISTEN_ADDR") {
            config.listen_addr = addr.parse().context("Invalid BALANCER_LISTEN_ADDR value")?;
        }
        if let Ok(port) = std::env::var("BALANCER_BACKEND_PORT") {
            config.backend_port =
                Some(port.parse().context("Invalid BALANCER_BACKEND_PORT value")?);
        }
        if let Ok(size) = std::env::var("BALANCER_BUFFER_SIZE") {
            config.buffer_size = size.parse().context("Invalid BALANCER_BUFFER_SIZE value")?;
        }
        if let Ok(port) = std::env::var("BALANCER_ADMIN_PORT") {
            config.admin_port = Some(port.parse().context("Invalid BALANCER_ADMIN_PORT value")?);
        }

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.backends.is_empty() {
            anyhow::bail!("At least one backend must be configured");
        }

        for (i, backend) in self.backends.iter().enumerate() {
            if backend.host.trim().is_empty() {
                anyhow::bail!("Backend {} has an empty host", i);
            }
            if backend.port == Some(0) {
                anyhow::bail!("Backend {} port must be non-zero", i);
            }
        }

        if self.backend_port == Some(0) {
            anyhow::bail!("backend_port must be non-zero");
        }

        let table = self.weight_table()?;
        if table.backend_count() != self.backends.len() {
            anyhow::bail!(
                "Weight table has {} columns but {} backends are configured",
                table.backend_count(),
                self.backends.len()
            );
        }

        if self.buffer_size == 0 {
            anyhow::bail!("buffer_size must be > 0");
        }
        if self.max_sessions == 0 {
            anyhow::bail!("max_sessions must be > 0");
        }

        if let Some(admin_port) = self.admin_port
            && admin_port == self.listen_addr.port()
        {
            anyhow::bail!("Admin port {} conflicts with listen port", admin_port);
        }

        Ok(())
    }

    pub fn weight_table(&self) -> Result<WeightTable> {
        WeightTable::from_named(&self.weights).context("Invalid weight table")
    }

    /// Resolve every backend to an endpoint.
    ///
    /// Port precedence: the backend's own `port`, then `backend_port`,
    /// then the listener's port.
    pub fn endpoints(&self) -> Vec<BackendEndpoint> {
        let default_port = self.backend_port.unwrap_or(self.listen_addr.port());

        self.backends
            .iter()
            .enumerate()
            .map(|(i, backend)| {
                BackendEndpoint::new(
                    BackendId(i),
                    backend.host.clone(),
                    backend.port.unwrap_or(default_port),
                )
            })
            .collect()
    }

    pub fn graceful_shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.graceful_shutdown_timeout_secs)
    }
}

/// One backend server
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct BackendConfig {
    pub host: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

impl BackendConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: None,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }
}

// Default functions
fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}
fn default_listen_backlog() -> u32 {
    128
}
fn default_buffer_size() -> usize {
    1024
}
fn default_max_sessions() -> usize {
    512
}
fn default_graceful_shutdown_timeout() -> u64 {
    30
}
