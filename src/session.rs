//! Per-request forwarding between one client and one backend

use crate::backend::{BackendId, BackendPool};
use crate::error::TransferError;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Lifecycle of a session. `Closed` is reached on every exit path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Forwarding,
    AwaitingResponse,
    Relaying,
    Closed,
}

/// One client request routed to one backend.
///
/// The session owns the client connection and closes it when `run`
/// returns, whether or not the exchange succeeded. The backend
/// connection is only borrowed from the pool.
pub struct Session<C> {
    id: u64,
    client: C,
    backend: BackendId,
    request: Vec<u8>,
    buffer_size: usize,
    state: SessionState,
}

impl<C> Session<C>
where
    C: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(
        id: u64,
        client: C,
        backend: BackendId,
        request: Vec<u8>,
        buffer_size: usize,
    ) -> Self {
        Self {
            id,
            client,
            backend,
            request,
            buffer_size,
            state: SessionState::Created,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn backend(&self) -> BackendId {
        self.backend
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Forward the request, relay one bounded response chunk, then close the client.
    ///
    /// Returns the number of response bytes relayed. A response larger than
    /// `buffer_size` is truncated to its first chunk, and a backend
    /// connection whose response filled the buffer is not reused.
    pub async fn run(mut self, pool: &BackendPool) -> Result<usize, TransferError> {
        let result = self.exchange(pool).await;

        if let Err(e) = &result {
            tracing::warn!(
                session = self.id,
                backend = %self.backend,
                state = ?self.state,
                error = %e,
                "Session failed"
            );
        }

        self.close().await;
        result
    }

    async fn exchange(&mut self, pool: &BackendPool) -> Result<usize, TransferError> {
        let mut lease = pool.checkout(self.backend).await?;

        self.transition(SessionState::Forwarding);
        if let Err(source) = lease.stream_mut().write_all(&self.request).await {
            lease.discard();
            return Err(TransferError::BackendWrite {
                backend: self.backend,
                source,
            });
        }

        self.transition(SessionState::AwaitingResponse);
        let mut buf = vec![0u8; self.buffer_size];
        let n = match lease.stream_mut().read(&mut buf).await {
            Ok(0) => {
                lease.discard();
                return Err(TransferError::BackendClosed {
                    backend: self.backend,
                });
            }
            Ok(n) => n,
            Err(source) => {
                lease.discard();
                return Err(TransferError::BackendRead {
                    backend: self.backend,
                    source,
                });
            }
        };
        if n == self.buffer_size {
            // Rest of an oversized response may still be in flight
            lease.discard();
        } else {
            lease.release();
        }
        buf.truncate(n);

        self.transition(SessionState::Relaying);
        self.client
            .write_all(&buf)
            .await
            .map_err(TransferError::ClientWrite)?;

        Ok(n)
    }

    async fn close(&mut self) {
        self.transition(SessionState::Closed);
        if let Err(e) = self.client.shutdown().await {
            tracing::debug!(session = self.id, error = %e, "Client shutdown failed");
        }
    }

    fn transition(&mut self, next: SessionState) {
        tracing::trace!(session = self.id, from = ?self.state, to = ?next, "Session state");
        self.state = next;
    }
}
