//! Common fixtures for in-process balancer tests

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use weighted_balancer::{
    BackendConfig, BackendPool, BackendSelector, BalancerConfig, ConnectionPolicy, Listener,
    LoadSnapshot,
};

/// How a fake backend treats its connections
#[derive(Debug, Clone, Copy)]
pub enum BackendMode {
    /// Reply `"<name>:<request>"` to every read
    Reply,
    /// Like `Reply`, after sleeping
    SlowReply(Duration),
    /// Reply `"<name>:<request>:1"`, then `"<name>:<request>:2"` after a pause
    SplitReply(Duration),
    /// Close every connection as soon as it is accepted
    HangUp,
}

/// Loopback backend that records every payload it reads
pub struct FakeBackend {
    pub port: u16,
    received: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl FakeBackend {
    pub async fn start(name: &'static str, mode: BackendMode) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind fake backend");
        let port = listener.local_addr().unwrap().port();
        let received = Arc::new(Mutex::new(Vec::new()));

        let log = received.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                match mode {
                    BackendMode::HangUp => drop(stream),
                    BackendMode::Reply => {
                        tokio::spawn(serve(stream, name, Duration::ZERO, log.clone()));
                    }
                    BackendMode::SlowReply(delay) => {
                        tokio::spawn(serve(stream, name, delay, log.clone()));
                    }
                    BackendMode::SplitReply(pause) => {
                        tokio::spawn(serve_split(stream, name, pause, log.clone()));
                    }
                }
            }
        });

        Self { port, received }
    }

    pub fn received(&self) -> Vec<Vec<u8>> {
        self.received.lock().unwrap().clone()
    }

    pub fn config(&self) -> BackendConfig {
        BackendConfig::new("127.0.0.1").with_port(self.port)
    }
}

async fn serve(
    mut stream: TcpStream,
    name: &'static str,
    delay: Duration,
    log: Arc<Mutex<Vec<Vec<u8>>>>,
) {
    let mut buf = [0u8; 4096];
    loop {
        let n = match stream.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        log.lock().unwrap().push(buf[..n].to_vec());

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut reply = format!("{}:", name).into_bytes();
        reply.extend_from_slice(&buf[..n]);
        if stream.write_all(&reply).await.is_err() {
            return;
        }
    }
}

async fn serve_split(
    mut stream: TcpStream,
    name: &'static str,
    pause: Duration,
    log: Arc<Mutex<Vec<Vec<u8>>>>,
) {
    let mut buf = [0u8; 4096];
    loop {
        let n = match stream.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        log.lock().unwrap().push(buf[..n].to_vec());
        let request = String::from_utf8_lossy(&buf[..n]).into_owned();

        if stream
            .write_all(format!("{}:{}:1", name, request).as_bytes())
            .await
            .is_err()
        {
            return;
        }
        tokio::time::sleep(pause).await;
        if stream
            .write_all(format!("{}:{}:2", name, request).as_bytes())
            .await
            .is_err()
        {
            return;
        }
    }
}

/// A running balancer bound to an ephemeral loopback port
pub struct RunningBalancer {
    pub addr: SocketAddr,
    pub loads: watch::Receiver<LoadSnapshot>,
    stop: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl RunningBalancer {
    pub async fn start(config: BalancerConfig) -> Self {
        let pool = BackendPool::connect(config.endpoints(), config.connection_policy)
            .await
            .expect("Failed to connect to fake backends");
        let selector = BackendSelector::new(config.weight_table().unwrap(), Instant::now());
        let listener = Listener::bind(&config, selector, pool)
            .await
            .expect("Failed to bind listener");

        let addr = listener.local_addr().unwrap();
        let loads = listener.subscribe_loads();
        let (stop, stop_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(listener.run(async move {
            let _ = stop_rx.await;
        }));

        Self {
            addr,
            loads,
            stop: Some(stop),
            handle,
        }
    }

    /// Stop accepting and wait for in-flight sessions
    pub async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        tokio::time::timeout(Duration::from_secs(5), &mut self.handle)
            .await
            .expect("Listener did not stop")
            .expect("Listener task panicked");
    }

    pub fn snapshot(&self) -> LoadSnapshot {
        self.loads.borrow().clone()
    }
}

/// Config listening on loopback with the given backends
pub fn test_config(backends: &[&FakeBackend], policy: ConnectionPolicy) -> BalancerConfig {
    BalancerConfig {
        listen_addr: "127.0.0.1:0".parse().unwrap(),
        connection_policy: policy,
        graceful_shutdown_timeout_secs: 2,
        backends: backends.iter().map(|b| b.config()).collect(),
        ..Default::default()
    }
}

/// Send one request and read until the balancer closes the connection
pub async fn send_request(addr: SocketAddr, payload: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr)
        .await
        .expect("Failed to connect to balancer");
    stream.write_all(payload).await.unwrap();

    let mut response = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut response))
        .await
        .expect("Balancer did not close the client connection")
        .ok();
    response
}
