//! TCP accept loop.
//!
//! Each accepted socket gets its own task running a [`Connection`]. The accept
//! loop never waits on a connection. Shutdown is cooperative: the server
//! token is cancelled, connections finish the frame they are handling, and
//! the server waits up to `shutdown_timeout` for them to leave.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::NetworkConfig;
use crate::error::{ProtocolError, Result};
use crate::protocol::{Dispatcher, PacketRegistry, SessionId};
use crate::transport::connection::{Connection, Services};
use crate::utils::metrics::Metrics;

/// Callbacks for session lifetime events.
pub trait SessionObserver: Send + Sync + 'static {
    fn on_open(&self, _id: SessionId, _peer: SocketAddr) {}

    /// `error` is the fault that ended the session, if any.
    fn on_close(&self, _id: SessionId, _peer: SocketAddr, _error: Option<&ProtocolError>) {}
}

pub struct Server {
    config: NetworkConfig,
    services: Arc<Services>,
    sessions: Arc<DashMap<SessionId, SocketAddr>>,
    observer: Option<Arc<dyn SessionObserver>>,
    next_id: AtomicU64,
    shutdown: CancellationToken,
}

impl Server {
    pub fn new(config: NetworkConfig, registry: Arc<PacketRegistry>, dispatcher: Arc<Dispatcher>) -> Self {
        let services = Services::new(registry, dispatcher).with_config(&config);
        Self::with_services(config, services)
    }

    /// Use prepared services (custom clock or shared metrics).
    pub fn with_services(config: NetworkConfig, services: Services) -> Self {
        Self {
            config,
            services: Arc::new(services),
            sessions: Arc::new(DashMap::new()),
            observer: None,
            next_id: AtomicU64::new(1),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn SessionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        self.services.metrics.clone()
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stop accepting and ask every connection to close.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn live_sessions(&self) -> usize {
        self.sessions.len()
    }

    pub fn session_ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.sessions.iter().map(|entry| *entry.key()).collect();
        ids.sort();
        ids
    }

    /// Bind the configured address and serve until shut down.
    #[instrument(skip(self), fields(address = %self.config.server.address))]
    pub async fn run(&self) -> Result<()> {
        self.config.validate_strict()?;
        let listener = TcpListener::bind(&self.config.server.address).await?;
        self.serve(listener).await
    }

    /// Like [`run`](Self::run), shutting down on CTRL+C.
    pub async fn run_until_ctrl_c(&self) -> Result<()> {
        let token = self.shutdown.clone();
        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                info!("Received CTRL+C signal, shutting down");
                token.cancel();
            }
        });
        self.run().await
    }

    /// Serve connections from an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        info!(address = %listener.local_addr()?, mode = ?self.services.mode, "Listening");

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => self.admit(stream, peer),
                    Err(e) => error!(error = %e, "Error accepting connection"),
                },
            }
        }

        drop(listener);
        self.drain().await;
        self.services.metrics.log_summary();
        Ok(())
    }

    fn admit(&self, stream: TcpStream, peer: SocketAddr) {
        let max = self.config.server.max_connections;
        if self.sessions.len() >= max {
            warn!(%peer, max, "Connection limit reached; rejecting");
            self.services.metrics.connection_rejected();
            return;
        }
        if let Err(e) = stream.set_nodelay(true) {
            debug!(%peer, error = %e, "Failed to set TCP_NODELAY");
        }

        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.sessions.insert(id, peer);
        self.services.metrics.connection_established();
        if let Some(observer) = &self.observer {
            observer.on_open(id, peer);
        }
        info!(session = %id, %peer, "Session opened");

        let services = self.services.clone();
        let sessions = self.sessions.clone();
        let observer = self.observer.clone();
        let token = self.shutdown.child_token();

        tokio::spawn(async move {
            let task = tokio::spawn({
                let services = services.clone();
                async move {
                    let mut connection = Connection::new(stream, id, Some(peer), services);
                    connection.run(token).await
                }
            });
            // The session is released even if the connection task panicked
            let result = match task.await {
                Ok(result) => result,
                Err(e) => {
                    services.metrics.protocol_error();
                    error!(session = %id, %peer, error = %e, "Connection task aborted");
                    Err(ProtocolError::SessionAborted(e.to_string()))
                }
            };

            sessions.remove(&id);
            services.metrics.connection_closed();
            match &result {
                Ok(()) => info!(session = %id, %peer, "Session closed"),
                Err(e) => warn!(session = %id, %peer, error = %e, "Session closed by fault"),
            }
            if let Some(observer) = observer {
                observer.on_close(id, peer, result.as_ref().err());
            }
        });
    }

    async fn drain(&self) {
        info!(
            sessions = self.sessions.len(),
            "Shutting down server. Waiting for connections to close..."
        );
        let timeout = tokio::time::sleep(self.config.server.shutdown_timeout);
        tokio::pin!(timeout);

        while !self.sessions.is_empty() {
            tokio::select! {
                _ = &mut timeout => {
                    warn!(remaining = self.sessions.len(), "Shutdown timeout reached, forcing exit");
                    return;
                }
                _ = tokio::time::sleep(Duration::from_millis(20)) => {}
            }
        }
        info!("All connections closed, shutting down");
    }
}
