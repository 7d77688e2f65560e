//! RTSP server listener
//!
//! Handles the TCP accept loop, spawns connection handlers and runs the
//! idle-session sweep.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::ingest::IngestSupervisor;
use crate::registry::Registry;
use crate::server::config::ServerConfig;
use crate::server::connection::{Connection, ServerContext};
use crate::session::{expire_idle, SessionTable};

/// RTSP server
pub struct RtspServer {
    config: ServerConfig,
    supervisor: IngestSupervisor,
    sessions: Arc<SessionTable>,
    next_connection_id: AtomicU64,
    connection_semaphore: Option<Arc<Semaphore>>,
}

impl RtspServer {
    /// Create a new server; workers are started through `supervisor`
    pub fn new(config: ServerConfig, supervisor: IngestSupervisor) -> Self {
        let connection_semaphore = if config.max_connections > 0 {
            Some(Arc::new(Semaphore::new(config.max_connections)))
        } else {
            None
        };

        Self {
            config,
            supervisor,
            sessions: Arc::new(SessionTable::new()),
            next_connection_id: AtomicU64::new(1),
            connection_semaphore,
        }
    }

    /// Get a reference to the channel registry
    pub fn registry(&self) -> &Arc<Registry> {
        self.supervisor.registry()
    }

    /// Live RTSP sessions
    pub fn sessions(&self) -> &Arc<SessionTable> {
        &self.sessions
    }

    /// Run the server
    ///
    /// This method blocks until the server is shut down.
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.run_with_listener(listener).await
    }

    /// Run the server with graceful shutdown
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        let listener = TcpListener::bind(self.config.bind_addr).await?;

        tokio::select! {
            _ = shutdown => {
                tracing::info!("Shutdown signal received");
                Ok(())
            }
            result = self.run_with_listener(listener) => result,
        }
    }

    /// Serve on an already bound listener
    pub async fn run_with_listener(&self, listener: TcpListener) -> Result<()> {
        let addr = listener.local_addr()?;
        tracing::info!(addr = %addr, "RTSP server listening");

        let ctx = Arc::new(ServerContext {
            config: self.config.clone(),
            supervisor: self.supervisor.clone(),
            sessions: Arc::clone(&self.sessions),
            udp: self.bind_udp(addr).await,
        });

        let sweep_handle = self.spawn_sweep_task();
        let result = self.accept_loop(&listener, &ctx).await;
        sweep_handle.abort();

        result
    }

    async fn accept_loop(&self, listener: &TcpListener, ctx: &Arc<ServerContext>) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((socket, peer_addr)) => {
                    self.handle_connection(socket, peer_addr, ctx);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    /// Shared UDP socket on the advertised server port
    async fn bind_udp(&self, tcp_addr: SocketAddr) -> Option<Arc<UdpSocket>> {
        let addr = SocketAddr::new(tcp_addr.ip(), self.config.udp_server_ports.0);
        match UdpSocket::bind(addr).await {
            Ok(socket) => Some(Arc::new(socket)),
            Err(e) => {
                tracing::warn!(addr = %addr, error = %e, "UDP transport disabled");
                None
            }
        }
    }

    fn spawn_sweep_task(&self) -> JoinHandle<()> {
        let sessions = Arc::clone(&self.sessions);
        let registry = Arc::clone(self.registry());
        let idle = self.config.session_idle_timeout;
        let period = self.config.sweep_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let expired = expire_idle(&sessions, &registry, idle).await;
                if expired > 0 {
                    tracing::debug!(expired = expired, remaining = sessions.len(), "Session sweep");
                }
            }
        })
    }

    fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr, ctx: &Arc<ServerContext>) {
        // Check connection limit
        let permit = if let Some(ref sem) = self.connection_semaphore {
            match sem.clone().try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    tracing::warn!(peer = %peer_addr, "Connection rejected: limit reached");
                    return;
                }
            }
        } else {
            None
        };

        let conn_id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(conn_id = conn_id, peer = %peer_addr, "New connection");

        if self.config.tcp_nodelay {
            if let Err(e) = socket.set_nodelay(true) {
                tracing::error!(error = %e, "Failed to configure socket");
                return;
            }
        }

        let ctx = Arc::clone(ctx);
        tokio::spawn(async move {
            let _permit = permit;
            let mut connection = Connection::new(conn_id, socket, peer_addr, ctx);

            if let Err(e) = connection.run().await {
                tracing::debug!(conn_id = conn_id, error = %e, "Connection error");
            }
        });
    }

    /// Get the bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.config.bind_addr
    }
}
