//! Test harness for relay integration tests.
//!
//! Provides helpers to spawn TCP backends and a proxy listener running its
//! dispatch loop on a dedicated thread.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use relay_proxy::{Backend, Listener, ListenerConfig, ProxyContext, RelayOptions};

#[allow(dead_code)]
pub struct TcpEchoBackend {
    pub addr: SocketAddr,
    pub connections: Arc<AtomicU64>,
    pub bytes_received: Arc<AtomicU64>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl TcpEchoBackend {
    pub async fn spawn() -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let connections = Arc::new(AtomicU64::new(0));
        let bytes_received = Arc::new(AtomicU64::new(0));

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        let conn_clone = Arc::clone(&connections);
        let bytes_clone = Arc::clone(&bytes_received);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accept_result = listener.accept() => {
                        match accept_result {
                            Ok((mut stream, _)) => {
                                conn_clone.fetch_add(1, Ordering::Relaxed);
                                let bytes = Arc::clone(&bytes_clone);
                                tokio::spawn(async move {
                                    let mut buf = vec![0u8; 8192];
                                    loop {
                                        match stream.read(&mut buf).await {
                                            Ok(0) => break,
                                            Ok(n) => {
                                                bytes.fetch_add(n as u64, Ordering::Relaxed);
                                                if stream.write_all(&buf[..n]).await.is_err() {
                                                    break;
                                                }
                                            }
                                            Err(_) => break,
                                        }
                                    }
                                });
                            }
                            Err(_) => break,
                        }
                    }
                    _ = &mut shutdown_rx => break,
                }
            }
        });

        Ok(Self {
            addr,
            connections,
            bytes_received,
            shutdown_tx: Some(shutdown_tx),
        })
    }

    #[allow(dead_code)]
    pub fn connection_count(&self) -> u64 {
        self.connections.load(Ordering::Relaxed)
    }
}

impl Drop for TcpEchoBackend {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Backend that writes a fixed banner to every connection and hangs up.
#[allow(dead_code)]
pub struct BannerBackend {
    pub addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

#[allow(dead_code)]
impl BannerBackend {
    pub async fn spawn(banner: &'static [u8]) -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accept_result = listener.accept() => {
                        match accept_result {
                            Ok((mut stream, _)) => {
                                tokio::spawn(async move {
                                    let _ = stream.write_all(banner).await;
                                    let _ = stream.shutdown().await;
                                });
                            }
                            Err(_) => break,
                        }
                    }
                    _ = &mut shutdown_rx => break,
                }
            }
        });

        Ok(Self {
            addr,
            shutdown_tx: Some(shutdown_tx),
        })
    }
}

impl Drop for BannerBackend {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// A proxy listener whose dispatch loop runs on its own thread.
pub struct ProxyHandle {
    pub listen_addr: SocketAddr,
    pub context: Arc<ProxyContext>,
}

#[allow(dead_code)]
impl ProxyHandle {
    pub fn spawn(backend: SocketAddr) -> io::Result<Self> {
        Self::spawn_with(backend, RelayOptions::default())
    }

    pub fn spawn_with(backend: SocketAddr, options: RelayOptions) -> io::Result<Self> {
        let mut config =
            ListenerConfig::new("127.0.0.1:0".parse().unwrap(), Backend::from_addr(backend));
        config.options = options;
        config.poll_timeout = Duration::from_millis(100);

        let listener = Listener::bind(config)?;
        let listen_addr = listener.local_addr();
        let context = listener.context();

        std::thread::spawn(move || {
            let _ = listener.run();
        });

        Ok(Self {
            listen_addr,
            context,
        })
    }

    pub fn stat(&self, pick: impl Fn(&relay_proxy::RelayStats) -> &AtomicU64) -> u64 {
        pick(&self.context.stats).load(Ordering::Relaxed)
    }
}

/// An address nothing is listening on.
#[allow(dead_code)]
pub async fn dead_addr() -> SocketAddr {
    let temp_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = temp_listener.local_addr().unwrap();
    drop(temp_listener);
    addr
}
