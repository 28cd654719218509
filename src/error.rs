//! Error types for request parsing, backend transfers, and startup

use crate::backend::BackendId;
use std::net::SocketAddr;
use thiserror::Error;

/// Malformed client payload. Aborts only the offending session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("empty request")]
    EmptyRequest,

    #[error("invalid request category {:?}", as_char(.0))]
    InvalidCategory(u8),

    #[error("invalid request duration: {0:?}")]
    InvalidDuration(String),

    #[error("request {:?}{duration} would overflow every backend's load", as_char(category))]
    LoadOverflow { category: u8, duration: u64 },
}

fn as_char(byte: &u8) -> char {
    char::from(*byte)
}

impl RequestError {
    /// Short label used for metrics and structured logs
    pub fn reason(&self) -> &'static str {
        match self {
            RequestError::EmptyRequest => "empty_request",
            RequestError::InvalidCategory(_) => "invalid_category",
            RequestError::InvalidDuration(_) => "invalid_duration",
            RequestError::LoadOverflow { .. } => "load_overflow",
        }
    }
}

/// Socket failure while serving a single session
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("failed to connect to backend {backend}: {source}")]
    Connect {
        backend: BackendId,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write request to backend {backend}: {source}")]
    BackendWrite {
        backend: BackendId,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read response from backend {backend}: {source}")]
    BackendRead {
        backend: BackendId,
        #[source]
        source: std::io::Error,
    },

    #[error("backend {backend} closed the connection")]
    BackendClosed { backend: BackendId },

    #[error("failed to read request from client: {0}")]
    ClientRead(#[source] std::io::Error),

    #[error("failed to write response to client: {0}")]
    ClientWrite(#[source] std::io::Error),

    #[error("unknown backend {0}")]
    UnknownBackend(BackendId),
}

impl TransferError {
    /// True when the failure happened on a backend socket, which makes that socket unusable
    pub fn is_backend_failure(&self) -> bool {
        matches!(
            self,
            TransferError::Connect { .. }
                | TransferError::BackendWrite { .. }
                | TransferError::BackendRead { .. }
                | TransferError::BackendClosed { .. }
        )
    }
}

/// Rejected weight table configuration
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WeightTableError {
    #[error("weight table has no categories")]
    Empty,

    #[error("weight table has no backend columns")]
    NoBackends,

    #[error("category {0:?} must be a single ASCII character")]
    InvalidCategory(String),

    #[error("category {category:?} has {found} weights, expected {expected}")]
    RaggedRow {
        category: char,
        expected: usize,
        found: usize,
    },

    #[error("category {category:?} weight for backend {backend} must be finite and >= 0 (got {value})")]
    InvalidWeight {
        category: char,
        backend: usize,
        value: f64,
    },
}

/// Fatal failure while bringing the balancer up
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("failed to bind listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to connect to backend {backend} at {endpoint}: {source}")]
    BackendConnect {
        backend: BackendId,
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    #[error("weight table covers {weights} backends but {backends} are configured")]
    BackendCountMismatch { weights: usize, backends: usize },

    #[error(transparent)]
    Weights(#[from] WeightTableError),
}

pub type SetupResult<T> = Result<T, SetupError>;
