//! Backend endpoints and the connections sessions borrow to reach them

use crate::error::{SetupError, SetupResult, TransferError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Index of a backend, stable for the process lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BackendId(pub usize);

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Network address of one backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendEndpoint {
    pub id: BackendId,
    pub host: String,
    pub port: u16,
}

impl BackendEndpoint {
    pub fn new(id: BackendId, host: impl Into<String>, port: u16) -> Self {
        Self {
            id,
            host: host.into(),
            port,
        }
    }

    async fn connect(&self) -> std::io::Result<TcpStream> {
        let stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

impl fmt::Display for BackendEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// How sessions obtain a backend connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionPolicy {
    /// A fresh connection per session, closed when the exchange ends.
    #[default]
    Ephemeral,
    /// One long-lived connection per backend, opened at startup. A session
    /// holds it exclusively for its write+read exchange.
    ///
    /// Only safe for backends that answer every request with a single
    /// write. A response split across segments leaves bytes behind after
    /// the one bounded read; checkout drops a connection with bytes already
    /// waiting, but bytes that arrive after the next request is sent are
    /// read as that request's response.
    Shared,
}

struct BackendSlot {
    endpoint: BackendEndpoint,
    // None after a failed exchange; refilled on the next checkout
    conn: Arc<Mutex<Option<TcpStream>>>,
}

/// Connections to every configured backend.
/// Cheap to clone.
#[derive(Clone)]
pub struct BackendPool {
    slots: Arc<[BackendSlot]>,
    policy: ConnectionPolicy,
}

impl fmt::Debug for BackendPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendPool")
            .field("backends", &self.slots.len())
            .field("policy", &self.policy)
            .finish()
    }
}

impl BackendPool {
    /// Open the pool.
    ///
    /// Every backend is dialled up front and any failure aborts startup.
    /// The shared policy keeps those connections; the ephemeral policy
    /// closes them again and dials per session.
    pub async fn connect(
        endpoints: Vec<BackendEndpoint>,
        policy: ConnectionPolicy,
    ) -> SetupResult<Self> {
        let mut slots = Vec::with_capacity(endpoints.len());

        for endpoint in endpoints {
            let stream =
                endpoint
                    .connect()
                    .await
                    .map_err(|source| SetupError::BackendConnect {
                        backend: endpoint.id,
                        endpoint: endpoint.to_string(),
                        source,
                    })?;
            tracing::info!(
                backend = %endpoint.id,
                endpoint = %endpoint,
                "Connected to backend"
            );

            let conn = match policy {
                ConnectionPolicy::Shared => Some(stream),
                ConnectionPolicy::Ephemeral => None,
            };

            slots.push(BackendSlot {
                endpoint,
                conn: Arc::new(Mutex::new(conn)),
            });
        }

        Ok(Self {
            slots: slots.into(),
            policy,
        })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn policy(&self) -> ConnectionPolicy {
        self.policy
    }

    pub fn endpoint(&self, id: BackendId) -> Option<&BackendEndpoint> {
        self.slots.get(id.0).map(|slot| &slot.endpoint)
    }

    pub fn endpoints(&self) -> impl Iterator<Item = &BackendEndpoint> {
        self.slots.iter().map(|slot| &slot.endpoint)
    }

    /// Borrow a connection to `id` for one request/response exchange.
    ///
    /// Under the shared policy this waits until no other session holds the
    /// backend's connection, reconnecting first if a previous exchange
    /// discarded it or the idle connection has unread bytes or EOF pending.
    pub async fn checkout(&self, id: BackendId) -> Result<BackendLease, TransferError> {
        let slot = self
            .slots
            .get(id.0)
            .ok_or(TransferError::UnknownBackend(id))?;

        match self.policy {
            ConnectionPolicy::Ephemeral => {
                let stream = slot
                    .endpoint
                    .connect()
                    .await
                    .map_err(|source| TransferError::Connect {
                        backend: id,
                        source,
                    })?;
                Ok(BackendLease {
                    id,
                    stream,
                    home: None,
                })
            }
            ConnectionPolicy::Shared => {
                let mut guard = slot.conn.clone().lock_owned().await;

                let stream = match guard.take() {
                    Some(stream) if is_idle(&stream) => stream,
                    stale => {
                        if stale.is_some() {
                            tracing::warn!(
                                backend = %id,
                                "Idle backend connection has unread data, dropping it"
                            );
                        }
                        tracing::info!(
                            backend = %id,
                            endpoint = %slot.endpoint,
                            "Reconnecting to backend"
                        );
                        slot.endpoint
                            .connect()
                            .await
                            .map_err(|source| TransferError::Connect {
                                backend: id,
                                source,
                            })?
                    }
                };

                Ok(BackendLease {
                    id,
                    stream,
                    home: Some(guard),
                })
            }
        }
    }
}

/// Nothing is waiting to be read, neither stray response bytes nor EOF
fn is_idle(stream: &TcpStream) -> bool {
    let mut probe = [0u8; 1];
    matches!(
        stream.try_read(&mut probe),
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock
    )
}

/// Exclusive use of one backend connection.
///
/// `release` hands a shared connection back for the next session;
/// `discard` (or dropping the lease) closes it instead.
pub struct BackendLease {
    id: BackendId,
    stream: TcpStream,
    home: Option<OwnedMutexGuard<Option<TcpStream>>>,
}

impl BackendLease {
    pub fn id(&self) -> BackendId {
        self.id
    }

    pub fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    /// Return the connection to its slot after a clean exchange
    pub fn release(self) {
        if let Some(mut home) = self.home {
            *home = Some(self.stream);
        }
    }

    /// Drop the connection after a failed exchange
    pub fn discard(self) {
        if self.home.is_some() {
            tracing::warn!(backend = %self.id, "Discarding backend connection");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn local_listener() -> (TcpListener, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    #[test]
    fn test_endpoint_display() {
        let endpoint = BackendEndpoint::new(BackendId(0), "192.168.0.101", 80);
        assert_eq!(endpoint.to_string(), "192.168.0.101:80");
        assert_eq!(BackendId(2).to_string(), "2");
    }

    #[test]
    fn test_policy_deserialize() {
        #[derive(Deserialize)]
        struct Wrapper {
            policy: ConnectionPolicy,
        }
        let w: Wrapper = toml::from_str("policy = \"ephemeral\"").unwrap();
        assert_eq!(w.policy, ConnectionPolicy::Ephemeral);
        assert_eq!(ConnectionPolicy::default(), ConnectionPolicy::Ephemeral);
    }

    #[tokio::test]
    async fn test_shared_connect_fails_when_backend_down() {
        let (listener, port) = local_listener().await;
        drop(listener);

        let result = BackendPool::connect(
            vec![BackendEndpoint::new(BackendId(0), "127.0.0.1", port)],
            ConnectionPolicy::Shared,
        )
        .await;

        assert!(matches!(result, Err(SetupError::BackendConnect { .. })));
    }

    #[tokio::test]
    async fn test_ephemeral_connect_fails_when_backend_down() {
        let (listener, port) = local_listener().await;
        drop(listener);

        let result = BackendPool::connect(
            vec![BackendEndpoint::new(BackendId(0), "127.0.0.1", port)],
            ConnectionPolicy::Ephemeral,
        )
        .await;

        assert!(matches!(result, Err(SetupError::BackendConnect { .. })));
    }

    #[tokio::test]
    async fn test_ephemeral_checkout_dials_per_session() {
        let (listener, port) = local_listener().await;
        let pool = BackendPool::connect(
            vec![BackendEndpoint::new(BackendId(0), "127.0.0.1", port)],
            ConnectionPolicy::Ephemeral,
        )
        .await
        .unwrap();
        // startup check connection
        let _ = listener.accept().await.unwrap();

        assert_eq!(pool.len(), 1);
        let (lease, accepted) = tokio::join!(pool.checkout(BackendId(0)), listener.accept());
        assert!(lease.is_ok());
        assert!(accepted.is_ok());

        drop(listener);
        assert!(matches!(
            pool.checkout(BackendId(0)).await,
            Err(TransferError::Connect { .. })
        ));
    }

    #[tokio::test]
    async fn test_checkout_unknown_backend() {
        let pool = BackendPool::connect(Vec::new(), ConnectionPolicy::Ephemeral)
            .await
            .unwrap();
        assert!(matches!(
            pool.checkout(BackendId(3)).await,
            Err(TransferError::UnknownBackend(BackendId(3)))
        ));
    }

    #[tokio::test]
    async fn test_shared_connection_is_reused_after_release() {
        let (listener, port) = local_listener().await;
        let pool = BackendPool::connect(
            vec![BackendEndpoint::new(BackendId(0), "127.0.0.1", port)],
            ConnectionPolicy::Shared,
        )
        .await
        .unwrap();
        let (mut server_side, _) = listener.accept().await.unwrap();

        let mut lease = pool.checkout(BackendId(0)).await.unwrap();
        lease.stream_mut().write_all(b"a").await.unwrap();
        lease.release();

        let mut lease = pool.checkout(BackendId(0)).await.unwrap();
        lease.stream_mut().write_all(b"b").await.unwrap();
        lease.release();

        let mut buf = [0u8; 2];
        server_side.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ab");
    }

    #[tokio::test]
    async fn test_discarded_connection_is_replaced() {
        let (listener, port) = local_listener().await;
        let pool = BackendPool::connect(
            vec![BackendEndpoint::new(BackendId(0), "127.0.0.1", port)],
            ConnectionPolicy::Shared,
        )
        .await
        .unwrap();
        let (_first, _) = listener.accept().await.unwrap();

        pool.checkout(BackendId(0)).await.unwrap().discard();

        let checkout = pool.checkout(BackendId(0));
        let (lease, accepted) = tokio::join!(checkout, listener.accept());
        assert!(lease.is_ok());
        assert!(accepted.is_ok());
    }

    #[tokio::test]
    async fn test_shared_connection_with_late_bytes_is_replaced() {
        let (listener, port) = local_listener().await;
        let pool = BackendPool::connect(
            vec![BackendEndpoint::new(BackendId(0), "127.0.0.1", port)],
            ConnectionPolicy::Shared,
        )
        .await
        .unwrap();
        let (mut first, _) = listener.accept().await.unwrap();

        pool.checkout(BackendId(0)).await.unwrap().release();

        // tail of a response nobody read
        first.write_all(b"late").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let (lease, accepted) = tokio::join!(pool.checkout(BackendId(0)), listener.accept());
        let mut lease = lease.unwrap();
        let (mut second, _) = accepted.unwrap();

        lease.stream_mut().write_all(b"x").await.unwrap();
        let mut buf = [0u8; 1];
        second.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"x");
    }

    #[tokio::test]
    async fn test_shared_lease_is_exclusive() {
        let (listener, port) = local_listener().await;
        let pool = BackendPool::connect(
            vec![BackendEndpoint::new(BackendId(0), "127.0.0.1", port)],
            ConnectionPolicy::Shared,
        )
        .await
        .unwrap();
        let _accepted = listener.accept().await.unwrap();

        let lease = pool.checkout(BackendId(0)).await.unwrap();
        let second = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            pool.checkout(BackendId(0)),
        )
        .await;
        assert!(second.is_err(), "second checkout must wait for the first lease");

        lease.release();
        assert!(pool.checkout(BackendId(0)).await.is_ok());
    }
}
