//! Weighted Balancer - projected-load TCP load balancer
//!
//! Routes each client request to the backend whose estimated load would be
//! lowest after taking it, forwards the request bytes, and relays one
//! response chunk back.

pub mod api;
pub mod backend;
pub mod config;
pub mod error;
pub mod listener;
pub mod load;
pub mod metrics;
pub mod request;
pub mod selector;
pub mod session;
pub mod weights;

pub use backend::{BackendEndpoint, BackendId, BackendLease, BackendPool, ConnectionPolicy};
pub use config::{BackendConfig, BalancerConfig};
pub use error::{RequestError, SetupError, SetupResult, TransferError, WeightTableError};
pub use listener::Listener;
pub use load::{LoadSnapshot, LoadState};
pub use request::RequestDescriptor;
pub use selector::BackendSelector;
pub use session::{Session, SessionState};
pub use weights::WeightTable;
