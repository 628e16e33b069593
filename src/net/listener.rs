//! Loopback listener that hands out ready-to-drive connection workers.
//!
//! # Responsibilities
//! - Bind 127.0.0.1 on the configured port (the front server is local)
//! - Gate accepts on free worker slots (backpressure)
//! - Package each accepted socket as a `Connection` carrying its slot
//!
//! # Design Decisions
//! - The slot travels inside the `Connection` and frees itself when the
//!   worker finishes, so `stop()` can drain by reacquiring every slot
//! - Accept errors are per-connection, not fatal to the listener

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;

use crate::net::connection::Connection;
use crate::responder::handler::Handler;

/// Error type for listener operations.
#[derive(Debug)]
pub enum ListenerError {
    /// The loopback port could not be bound (in use, or no permission).
    PortUnavailable(std::io::Error),
    /// Accepting a queued connection failed.
    Accept(std::io::Error),
}

impl std::fmt::Display for ListenerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenerError::PortUnavailable(e) => write!(f, "port unavailable: {}", e),
            ListenerError::Accept(e) => write!(f, "accept failed: {}", e),
        }
    }
}

impl std::error::Error for ListenerError {}

/// Accepts loopback connections from the front server and turns each one
/// into a [`Connection`] worker, at most `max_workers` at a time.
pub struct Listener {
    socket: TcpListener,
    local_addr: SocketAddr,
    slots: Arc<Semaphore>,
    max_workers: usize,
    handler: Arc<dyn Handler>,
    read_timeout: Duration,
}

impl Listener {
    /// Bind `127.0.0.1:port`. Everything a worker needs (the handler and
    /// the read timeout) is fixed here, so `accept` can return drive-ready
    /// connections.
    pub async fn bind(
        port: u16,
        max_workers: usize,
        handler: Arc<dyn Handler>,
        read_timeout: Duration,
    ) -> Result<Listener, ListenerError> {
        let bind_addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
        let socket = TcpListener::bind(bind_addr)
            .await
            .map_err(ListenerError::PortUnavailable)?;
        let local_addr = socket
            .local_addr()
            .map_err(ListenerError::PortUnavailable)?;

        tracing::info!(address = %local_addr, max_workers, "listener bound");

        Ok(Listener {
            socket,
            local_addr,
            slots: Arc::new(Semaphore::new(max_workers)),
            max_workers,
            handler,
            read_timeout,
        })
    }

    /// Wait for a free worker slot, then accept the next connection and
    /// wrap it as a `Connection`. The slot rides along inside the worker
    /// and is released when the worker finishes, even on panic.
    pub async fn accept(&self) -> Result<Connection, ListenerError> {
        let slot = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .expect("worker slots never close");

        let (stream, peer) = self.socket.accept().await.map_err(ListenerError::Accept)?;
        tracing::debug!(
            peer = %peer,
            idle_slots = self.slots.available_permits(),
            "connection accepted"
        );

        let connection = Connection::new(stream, peer, self.handler.clone(), self.read_timeout);
        Ok(connection.with_slot(slot))
    }

    /// The bound address, captured at bind time.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The worker-slot pool. `stop()` drains by reacquiring all
    /// `max_workers` slots once the accept loop has quit.
    pub(crate) fn slots(&self) -> Arc<Semaphore> {
        self.slots.clone()
    }

    /// Configured worker ceiling.
    pub fn max_workers(&self) -> usize {
        self.max_workers
    }
}
