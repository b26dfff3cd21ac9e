//! The server supervisor: binds a listener, spawns one task per accepted
//! connection, and stops cleanly on `host:kill` or an external signal.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::Notify;
use tracing::{info, warn};

use crate::app::App;
use crate::session::Session;

/// Runtime knobs an embedder supplies; CLI flags in `main.rs` map onto this
/// one-to-one.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub version: u32,
    pub features: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 5037,
            version: 0x29,
            features: "shell".to_string(),
        }
    }
}

/// Shared shutdown latch: `host:kill` and an external signal both resolve
/// to the same `Notify`, so the accept loop only has to wait on one thing.
pub struct ShutdownLatch {
    notify: Notify,
    requested: AtomicBool,
}

impl ShutdownLatch {
    pub fn new() -> Self {
        ShutdownLatch {
            notify: Notify::new(),
            requested: AtomicBool::new(false),
        }
    }

    pub fn trigger(&self) {
        self.requested.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_triggered(&self) -> bool {
        self.requested.load(Ordering::Relaxed)
    }

    async fn wait(&self) {
        if self.is_triggered() {
            return;
        }
        self.notify.notified().await;
    }
}

impl Default for ShutdownLatch {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound but not-yet-running server. Binding happens up front (via
/// [`AdbServer::bind`]) so embedders using `port = 0` can read the
/// OS-assigned port with [`AdbServer::local_addr`] before calling
/// [`AdbServer::run`], mirroring the original's `bound_port`.
pub struct AdbServer {
    listener: TcpListener,
    app: Arc<App>,
    shutdown: Arc<ShutdownLatch>,
}

impl AdbServer {
    pub async fn bind(
        config: &ServerConfig,
        app: Arc<App>,
        shutdown: Arc<ShutdownLatch>,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
        Ok(AdbServer {
            listener,
            app,
            shutdown,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run the accept loop until the shutdown latch trips.
    pub async fn run(self) -> std::io::Result<()> {
        let addr = self.local_addr()?;
        info!(address = %addr, "adb server listening");

        loop {
            tokio::select! {
                _ = self.shutdown.wait() => {
                    info!("shutdown requested, stopping accept loop");
                    return Ok(());
                }
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let app = Arc::clone(&self.app);
                            let session = Arc::new(Session::new(stream));
                            info!(session = %session.id, peer = %peer, "accepted connection");
                            tokio::spawn(async move {
                                session.run(app).await;
                            });
                        }
                        Err(e) => warn!(error = %e, "accept failed"),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::InMemoryDeviceRegistry;
    use crate::host::HostService;
    use crate::wire::encode_request;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    async fn spawn_server() -> (SocketAddr, Arc<ShutdownLatch>) {
        let registry: Arc<dyn crate::device::DeviceRegistry> =
            Arc::new(InMemoryDeviceRegistry::new());
        let mut app = App::new(Arc::clone(&registry));
        let shutdown = Arc::new(ShutdownLatch::new());
        let host = Arc::new(HostService::new(
            41,
            "shell",
            Arc::clone(&registry),
            Arc::clone(&shutdown),
        ));
        host.register(&mut app.router);

        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            version: 41,
            features: "shell".to_string(),
        };
        let server = AdbServer::bind(&config, Arc::new(app), Arc::clone(&shutdown))
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(server.run());

        (addr, shutdown)
    }

    #[tokio::test]
    async fn test_accept_loop_serves_version() {
        let (addr, _shutdown) = spawn_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(&encode_request("host:version"))
            .await
            .unwrap();
        let mut reply = [0u8; 8];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"OKAY0029");
    }

    #[tokio::test]
    async fn test_host_kill_trips_shutdown_latch() {
        let (addr, shutdown) = spawn_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(&encode_request("host:kill")).await.unwrap();
        let mut reply = [0u8; 4];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"OKAY");

        tokio::time::timeout(Duration::from_millis(200), async {
            while !shutdown.is_triggered() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("shutdown latch should trip after host:kill");
    }

    #[tokio::test]
    async fn test_run_stops_accept_loop_on_shutdown() {
        let registry: Arc<dyn crate::device::DeviceRegistry> =
            Arc::new(InMemoryDeviceRegistry::new());
        let app = Arc::new(App::new(registry));
        let shutdown = Arc::new(ShutdownLatch::new());
        let config = ServerConfig {
            port: 0,
            ..ServerConfig::default()
        };
        let server = AdbServer::bind(&config, app, Arc::clone(&shutdown))
            .await
            .unwrap();

        shutdown.trigger();
        tokio::time::timeout(Duration::from_millis(200), server.run())
            .await
            .expect("run() should return promptly")
            .unwrap();
    }
}
