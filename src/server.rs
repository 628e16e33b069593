//! Server façade: the start/stop lifecycle around the listener.
//!
//! # Responsibilities
//! - Bind the listener and run the accept loop
//! - Spawn one connection worker per accepted socket
//! - Expose `is_active` and the crate's identity string
//! - Drain in-flight connections on `stop()`, bounded by the drain timeout

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::config::ServerConfig;
use crate::lifecycle::Shutdown;
use crate::net::{Listener, ListenerError};
use crate::responder::handler::Handler;
use crate::SERVER_IDENT;

/// Errors surfaced by the server lifecycle operations.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The port could not be bound (in use, or no permission). The caller
    /// may retry with a different port.
    #[error("port unavailable: {0}")]
    PortUnavailable(std::io::Error),

    /// `start` on a running server, or `set_handler` while active.
    #[error("server is already running")]
    AlreadyRunning,

    /// `start` without a handler installed.
    #[error("no handler installed")]
    NoHandler,
}

/// State that only exists while the server is accepting.
struct Running {
    shutdown: Shutdown,
    accept_task: JoinHandle<()>,
    connection_limit: Arc<Semaphore>,
    max_connections: usize,
    local_addr: SocketAddr,
}

/// The FastCGI responder server.
///
/// Owns the configuration and the application handler; `start` binds the
/// loopback port and accepts until `stop`.
pub struct Server {
    config: ServerConfig,
    handler: Option<Arc<dyn Handler>>,
    running: Option<Running>,
}

impl Server {
    pub fn new(config: ServerConfig) -> Server {
        Server {
            config,
            handler: None,
            running: None,
        }
    }

    /// Install the application handler. Only allowed while stopped.
    pub fn set_handler(&mut self, handler: Arc<dyn Handler>) -> Result<(), ServerError> {
        if self.running.is_some() {
            return Err(ServerError::AlreadyRunning);
        }
        self.handler = Some(handler);
        Ok(())
    }

    /// Whether the server is currently accepting connections.
    pub fn is_active(&self) -> bool {
        self.running.is_some()
    }

    /// The bound address while active.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|running| running.local_addr)
    }

    /// Short identifier string for banners and logs.
    pub fn version(&self) -> String {
        format!("{}/{}", SERVER_IDENT, env!("CARGO_PKG_VERSION"))
    }

    /// Bind `127.0.0.1:port` and start accepting. Returns the bound
    /// address (useful with port 0 in tests).
    pub async fn start(&mut self, port: u16) -> Result<SocketAddr, ServerError> {
        if self.running.is_some() {
            return Err(ServerError::AlreadyRunning);
        }
        let handler = self.handler.clone().ok_or(ServerError::NoHandler)?;

        let listener = Listener::bind(
            port,
            self.config.listener.max_connections,
            handler,
            self.config.timeouts.read(),
        )
        .await
        .map_err(|err| match err {
            ListenerError::PortUnavailable(io) | ListenerError::Accept(io) => {
                ServerError::PortUnavailable(io)
            }
        })?;
        let local_addr = listener.local_addr();
        let connection_limit = listener.slots();

        let shutdown = Shutdown::new();
        let accept_shutdown = shutdown.clone();

        // Subscribed before the spawn; a trigger can never precede it.
        let mut stop = shutdown.subscribe();
        let accept_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop.recv() => break,
                    accepted = listener.accept() => match accepted {
                        Ok(connection) => {
                            let worker_shutdown = accept_shutdown.subscribe();
                            tokio::spawn(connection.drive(worker_shutdown));
                        }
                        Err(err) => {
                            tracing::warn!(error = %err, "accept failed");
                        }
                    },
                }
            }
            tracing::debug!("accept loop stopped");
        });

        tracing::info!(address = %local_addr, version = %self.version(), "responder started");
        self.running = Some(Running {
            shutdown,
            accept_task,
            connection_limit,
            max_connections: self.config.listener.max_connections,
            local_addr,
        });
        Ok(local_addr)
    }

    /// Stop accepting, wait for in-flight connections up to the drain
    /// timeout, then release the socket. A no-op while stopped.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        tracing::info!(address = %running.local_addr, "stopping responder");

        let notified = running.shutdown.trigger();
        tracing::debug!(subscribers = notified, "shutdown signalled");
        let _ = running.accept_task.await;

        // Every connection worker holds one permit; reacquiring all of
        // them means the last worker has finished.
        let drain = self.config.timeouts.drain();
        if drain.is_zero() {
            tracing::debug!("drain disabled; not waiting for in-flight connections");
            return;
        }
        let connection_limit = running.connection_limit.clone();
        let max_connections = running.max_connections;
        let result = timeout(drain, connection_limit.acquire_many(max_connections as u32)).await;
        match result {
            Ok(Ok(_permits)) => tracing::info!("all connections drained"),
            Ok(Err(_)) => {}
            Err(_) => tracing::warn!(
                drain_secs = drain.as_secs(),
                "drain timeout expired; abandoning in-flight connections"
            ),
        }
    }
}
