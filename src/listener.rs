//! Client accept loop
//!
//! Accepting, reading the request, and selecting a backend all happen on
//! one task, one client at a time, which is what lets the selector mutate
//! its load estimates without locking. Only the backend exchange runs
//! concurrently, as a tracked session task.

use crate::backend::BackendPool;
use crate::config::BalancerConfig;
use crate::error::{SetupError, SetupResult, TransferError};
use crate::load::LoadSnapshot;
use crate::selector::BackendSelector;
use crate::session::Session;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, watch};
use tokio::task::JoinSet;
use tracing::Instrument;

/// Accepts clients, routes them, and supervises their sessions
pub struct Listener {
    listener: TcpListener,
    selector: BackendSelector,
    pool: BackendPool,
    buffer_size: usize,
    permits: Arc<Semaphore>,
    sessions: JoinSet<()>,
    loads_tx: watch::Sender<LoadSnapshot>,
    shutdown_timeout: Duration,
    next_session_id: u64,
}

impl Listener {
    /// Bind the client-facing socket.
    ///
    /// The selector's weight table must cover exactly the pool's backends.
    pub async fn bind(
        config: &BalancerConfig,
        selector: BackendSelector,
        pool: BackendPool,
    ) -> SetupResult<Self> {
        if selector.backend_count() != pool.len() {
            return Err(SetupError::BackendCountMismatch {
                weights: selector.backend_count(),
                backends: pool.len(),
            });
        }

        let addr = config.listen_addr;
        let listener = bind_socket(addr, config.listen_backlog)
            .map_err(|source| SetupError::Bind { addr, source })?;

        tracing::info!(
            addr = %listener.local_addr().unwrap_or(addr),
            backends = pool.len(),
            policy = ?pool.policy(),
            "Listening for clients"
        );

        let (loads_tx, _) = watch::channel(selector.snapshot());

        Ok(Self {
            listener,
            selector,
            pool,
            buffer_size: config.buffer_size,
            permits: Arc::new(Semaphore::new(config.max_sessions)),
            sessions: JoinSet::new(),
            loads_tx,
            shutdown_timeout: config.graceful_shutdown_timeout(),
            next_session_id: 0,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Receive a fresh load snapshot after every selection
    pub fn subscribe_loads(&self) -> watch::Receiver<LoadSnapshot> {
        self.loads_tx.subscribe()
    }

    pub fn pool(&self) -> &BackendPool {
        &self.pool
    }

    /// Serve clients until `shutdown` resolves, then drain in-flight sessions.
    ///
    /// Per-request failures never end the loop.
    pub async fn run<F>(mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            self.reap_sessions();

            let permit = tokio::select! {
                biased;
                _ = &mut shutdown => break,
                permit = self.permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let (stream, peer) = tokio::select! {
                biased;
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to accept client connection");
                        continue;
                    }
                },
            };

            self.handle_client(stream, peer, permit).await;
        }

        self.drain().await;
    }

    /// Read the request, pick a backend, and start the session.
    ///
    /// A client whose request cannot be read or routed is closed without a
    /// response.
    async fn handle_client(
        &mut self,
        mut stream: TcpStream,
        peer: SocketAddr,
        permit: OwnedSemaphorePermit,
    ) {
        let request = match read_request(&mut stream, self.buffer_size).await {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(peer = %peer, error = %e, "Failed to read client request");
                crate::metrics::record_request_rejected("client_read");
                return;
            }
        };

        let (descriptor, backend) = match self.selector.route(&request, Instant::now()) {
            Ok(routed) => routed,
            Err(e) => {
                tracing::warn!(
                    peer = %peer,
                    reason = e.reason(),
                    error = %e,
                    "Rejected client request"
                );
                crate::metrics::record_request_rejected(e.reason());
                return;
            }
        };

        self.publish_loads();
        crate::metrics::record_request_routed(backend, descriptor.category_char());

        self.next_session_id += 1;
        let id = self.next_session_id;
        tracing::debug!(
            session = id,
            peer = %peer,
            backend = %backend,
            category = %descriptor.category_char(),
            duration = descriptor.duration(),
            "Routing request"
        );

        let session = Session::new(id, stream, backend, request, self.buffer_size);
        self.spawn_session(session, permit);
    }

    fn spawn_session(&mut self, session: Session<TcpStream>, permit: OwnedSemaphorePermit) {
        let pool = self.pool.clone();
        let backend = session.backend();
        let span = tracing::info_span!("session", id = session.id(), backend = %backend);
        let active = crate::metrics::ActiveSessionGuard::new();

        self.sessions.spawn(
            async move {
                let _permit = permit;
                let _active = active;
                match session.run(&pool).await {
                    Ok(bytes) => {
                        tracing::debug!(bytes, "Session complete");
                        crate::metrics::record_session_completed(backend);
                    }
                    Err(_) => crate::metrics::record_session_failed(backend),
                }
            }
            .instrument(span),
        );
    }

    fn publish_loads(&self) {
        let snapshot = self.selector.snapshot();
        crate::metrics::update_backend_loads(&snapshot.loads);
        self.loads_tx.send_replace(snapshot);
    }

    /// Forget sessions that already finished
    fn reap_sessions(&mut self) {
        while let Some(result) = self.sessions.try_join_next() {
            if let Err(e) = result
                && e.is_panic()
            {
                tracing::error!(error = %e, "Session task panicked");
            }
        }
    }

    async fn drain(mut self) {
        let in_flight = self.sessions.len();
        tracing::info!(in_flight, "Listener stopped, draining sessions");

        let timeout = self.shutdown_timeout;
        let sessions = &mut self.sessions;
        let drained = tokio::time::timeout(timeout, async move {
            while sessions.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            tracing::warn!(
                remaining = self.sessions.len(),
                timeout_secs = timeout.as_secs(),
                "Graceful shutdown timed out, aborting sessions"
            );
            self.sessions.shutdown().await;
        }

        tracing::info!("All sessions finished");
    }
}

fn bind_socket(addr: SocketAddr, backlog: u32) -> std::io::Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(backlog)
}

/// Single read of at most `buffer_size` bytes; longer requests are truncated
async fn read_request(
    stream: &mut TcpStream,
    buffer_size: usize,
) -> Result<Vec<u8>, TransferError> {
    let mut buf = vec![0u8; buffer_size];
    let n = stream
        .read(&mut buf)
        .await
        .map_err(TransferError::ClientRead)?;
    buf.truncate(n);
    Ok(buf)
}
