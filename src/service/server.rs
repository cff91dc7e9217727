//! # Server
//!
//! Binds the bootstrap, auth and realm listeners and spawns one connection
//! actor per accepted socket. Shutdown is graceful: on signal the listeners
//! stop accepting, every actor is told to finish, and the server waits up to
//! `shutdown_timeout` for active connections to drain.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, error, info, instrument, warn};

use crate::config::NetworkConfig;
use crate::error::Result;
use crate::protocol::dispatcher::Dispatcher;
use crate::protocol::message::ConnectionRole;
use crate::protocol::session::{SessionContext, SessionServices};
use crate::service::connection::{run_connection, run_sts_connection};
use crate::store::AccountStore;

/// Addresses the listeners actually bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundAddresses {
    pub sts: SocketAddr,
    pub auth: SocketAddr,
    pub realm: SocketAddr,
}

/// Which listener accepted a socket
#[derive(Debug, Clone, Copy)]
enum Listener {
    Sts,
    Game(ConnectionRole),
}

pub struct Server {
    sts: TcpListener,
    auth: TcpListener,
    realm: TcpListener,
    services: SessionServices,
    next_connection_id: AtomicU64,
    active_connections: Arc<Mutex<u32>>,
}

impl Server {
    /// Validate the configuration and bind all three listeners.
    pub async fn bind(
        config: NetworkConfig,
        store: Arc<dyn AccountStore>,
        dispatcher: Dispatcher,
    ) -> Result<Self> {
        config.validate_strict()?;
        let sts = TcpListener::bind(&config.server.sts_address).await?;
        let auth = TcpListener::bind(&config.server.auth_address).await?;
        let realm = TcpListener::bind(&config.server.realm_address).await?;

        Ok(Self {
            sts,
            auth,
            realm,
            services: SessionServices::new(config, store, Arc::new(dispatcher)),
            next_connection_id: AtomicU64::new(1),
            active_connections: Arc::new(Mutex::new(0)),
        })
    }

    pub fn local_addrs(&self) -> Result<BoundAddresses> {
        Ok(BoundAddresses {
            sts: self.sts.local_addr()?,
            auth: self.auth.local_addr()?,
            realm: self.realm.local_addr()?,
        })
    }

    pub fn services(&self) -> &SessionServices {
        &self.services
    }

    /// Accept connections until `shutdown_rx` fires or its sender is dropped.
    #[instrument(skip_all)]
    pub async fn run(self, mut shutdown_rx: mpsc::Receiver<()>) -> Result<()> {
        let addrs = self.local_addrs()?;
        info!(
            sts = %addrs.sts,
            auth = %addrs.auth,
            realm = %addrs.realm,
            "Listening"
        );
        let (close_tx, close_rx) = watch::channel(false);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Shutting down server. Waiting for connections to close...");
                    let _ = close_tx.send(true);
                    self.drain().await;
                    self.services.metrics.log_metrics();
                    return Ok(());
                }
                accepted = self.sts.accept() => self.admit(accepted, Listener::Sts, &close_rx).await,
                accepted = self.auth.accept() => {
                    self.admit(accepted, Listener::Game(ConnectionRole::Auth), &close_rx).await
                }
                accepted = self.realm.accept() => {
                    self.admit(accepted, Listener::Game(ConnectionRole::Realm), &close_rx).await
                }
            }
        }
    }

    async fn admit(
        &self,
        accepted: std::io::Result<(TcpStream, SocketAddr)>,
        listener: Listener,
        close_rx: &watch::Receiver<bool>,
    ) {
        let (stream, peer) = match accepted {
            Ok(pair) => pair,
            Err(e) => {
                error!(error = %e, "Error accepting connection");
                return;
            }
        };

        {
            let mut count = self.active_connections.lock().await;
            if *count as usize >= self.services.config.server.max_connections {
                warn!(peer = %peer, "Connection limit reached, rejecting");
                self.services.metrics.connection_rejected();
                return;
            }
            *count += 1;
        }
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "Could not disable Nagle");
        }

        let connection_id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let services = self.services.clone();
        let active_connections = self.active_connections.clone();
        let close_rx = close_rx.clone();

        tokio::spawn(async move {
            match listener {
                Listener::Sts => {
                    run_sts_connection(stream, connection_id, services, close_rx).await
                }
                Listener::Game(role) => {
                    let ctx = SessionContext::new(connection_id, role, Some(peer));
                    run_connection(stream, ctx, services, close_rx).await
                }
            }
            let mut count = active_connections.lock().await;
            *count = count.saturating_sub(1);
        });
    }

    async fn drain(&self) {
        let timeout = tokio::time::sleep(self.services.config.server.shutdown_timeout);
        tokio::pin!(timeout);

        loop {
            tokio::select! {
                _ = &mut timeout => {
                    warn!("Shutdown timeout reached, forcing exit");
                    break;
                }
                _ = tokio::time::sleep(Duration::from_millis(100)) => {
                    let connections = *self.active_connections.lock().await;
                    debug!(connections, "Waiting for connections to close");
                    if connections == 0 {
                        info!("All connections closed, shutting down");
                        break;
                    }
                }
            }
        }
    }
}

/// Run the server until CTRL+C.
#[instrument(skip_all)]
pub async fn start_server(
    config: NetworkConfig,
    store: Arc<dyn AccountStore>,
    dispatcher: Dispatcher,
) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
    tokio::spawn(async move {
        if let Ok(()) = tokio::signal::ctrl_c().await {
            info!("Received CTRL+C signal, shutting down");
            let _ = shutdown_tx.send(()).await;
        }
    });

    start_server_with_shutdown(config, store, dispatcher, shutdown_rx).await
}

/// Run the server until `shutdown_rx` fires.
pub async fn start_server_with_shutdown(
    config: NetworkConfig,
    store: Arc<dyn AccountStore>,
    dispatcher: Dispatcher,
    shutdown_rx: mpsc::Receiver<()>,
) -> Result<()> {
    Server::bind(config, store, dispatcher)
        .await?
        .run(shutdown_rx)
        .await
}
