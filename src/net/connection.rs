//! Per-connection driver and lifecycle tracking.
//!
//! # Responsibilities
//! - Drive one accepted socket: read records, route them, dispatch handlers
//! - Track the connection state machine (Idle → Building → Dispatching → Closing)
//! - Hold the per-connection request map (ids are only unique per connection)
//! - Honour KEEP_CONN and answer GetValues management probes
//!
//! # State Machine
//! ```text
//! ┌──────┐ BeginRequest ┌──────────┐ empty STDIN ┌─────────────┐
//! │ Idle │─────────────▶│ Building │────────────▶│ Dispatching │
//! └──────┘              └──────────┘             └─────────────┘
//!     ▲                      │ Abort                    │ KEEP_CONN=1
//!     │◀─────────────────────┘                          │
//!     │                                                 ▼ KEEP_CONN=0
//!     │                                            ┌─────────┐
//!     └────────────────────────────────────────────│ Closing │
//!                                                  └─────────┘
//! ```
//!
//! # Design Decisions
//! - Connection ID is u64 for speed; used only as a tracing field
//! - State transitions are explicit, not implicit
//! - Records are processed strictly in arrival order

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, OwnedSemaphorePermit};

use crate::protocol::codec::{RecordReader, RecordWriter};
use crate::protocol::error::ProtocolError;
use crate::protocol::params;
use crate::protocol::record::{
    BeginRequestBody, Record, RecordType, Role, FCGI_MAX_CONNS, FCGI_MAX_REQS, FCGI_MPXS_CONNS,
    MGMT_REQUEST_ID,
};
use crate::responder::handler::Handler;
use crate::responder::request::Request;
use crate::responder::response::Response;

/// Connection ids come from a plain process-wide counter.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Driver states, kept explicit for tracing. The active request id is
/// carried by the log events rather than the state itself.
#[derive(Debug, Clone, Copy)]
enum ConnectionState {
    /// No active request.
    Idle,
    /// A request is accumulating PARAMS / STDIN.
    Building,
    /// The application handler is running.
    Dispatching,
    /// The connection is done; the socket drops with the driver.
    Closing,
}

/// What to do with the connection after a record has been handled.
enum Flow {
    Continue,
    Close,
}

/// One accepted connection and everything scoped to it.
pub struct Connection {
    id: u64,
    peer: SocketAddr,
    reader: RecordReader<OwnedReadHalf>,
    writer: RecordWriter<OwnedWriteHalf>,
    requests: HashMap<u16, Request>,
    handler: Arc<dyn Handler>,
    state: ConnectionState,
    /// Listener slot this worker occupies; released on drop.
    _slot: Option<OwnedSemaphorePermit>,
}

impl Connection {
    pub fn new(
        stream: TcpStream,
        peer: SocketAddr,
        handler: Arc<dyn Handler>,
        read_timeout: Duration,
    ) -> Connection {
        let (read_half, write_half) = stream.into_split();
        Connection {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            peer,
            reader: RecordReader::new(read_half, read_timeout),
            writer: RecordWriter::new(write_half),
            requests: HashMap::new(),
            handler,
            state: ConnectionState::Idle,
            _slot: None,
        }
    }

    /// Attach the listener slot this worker occupies.
    pub(crate) fn with_slot(mut self, slot: OwnedSemaphorePermit) -> Connection {
        self._slot = Some(slot);
        self
    }

    /// Run the connection to completion.
    ///
    /// A shutdown signal closes the connection as soon as no request is in
    /// flight; a request already accumulating or dispatching always
    /// finishes first.
    pub async fn drive(mut self, mut shutdown: broadcast::Receiver<()>) {
        tracing::debug!(connection_id = self.id, peer = %self.peer, "connection open");
        let mut shutting_down = false;

        loop {
            if shutting_down && self.requests.is_empty() {
                tracing::debug!(connection_id = self.id, "closing idle connection on shutdown");
                break;
            }

            // Only race the read against shutdown while idle: cancelling a
            // read mid-record would lose bytes, and an idle connection is
            // the only one allowed to drop early.
            let next = if self.requests.is_empty() && !shutting_down {
                tokio::select! {
                    _ = shutdown.recv() => {
                        shutting_down = true;
                        continue;
                    }
                    next = self.reader.read_record() => next,
                }
            } else {
                self.reader.read_record().await
            };

            let record = match next {
                Ok(record) => record,
                Err(ProtocolError::ConnectionClosed) => {
                    tracing::debug!(connection_id = self.id, "peer closed connection");
                    break;
                }
                Err(err) => {
                    tracing::warn!(connection_id = self.id, error = %err, "terminating connection");
                    break;
                }
            };

            match self.handle_record(record).await {
                Ok(Flow::Continue) => {}
                Ok(Flow::Close) => break,
                Err(err) => {
                    tracing::warn!(connection_id = self.id, error = %err, "write failed; closing");
                    break;
                }
            }
        }

        self.state = ConnectionState::Closing;
        tracing::debug!(connection_id = self.id, state = ?self.state, "connection closed");
    }

    /// Route one record through the state machine.
    async fn handle_record(&mut self, record: Record) -> Result<Flow, ProtocolError> {
        match record.record_type {
            RecordType::BeginRequest => self.begin_request(&record).await,
            RecordType::Params | RecordType::Stdin => self.feed_request(&record).await,
            RecordType::AbortRequest | RecordType::EndRequest => {
                if self.requests.remove(&record.request_id).is_some() {
                    tracing::debug!(
                        connection_id = self.id,
                        request_id = record.request_id,
                        "request dropped by peer"
                    );
                }
                self.state = ConnectionState::Idle;
                Ok(Flow::Continue)
            }
            RecordType::GetValues => self.get_values(&record).await,
            other => {
                // Unknown or unexpected types are read and discarded.
                tracing::debug!(
                    connection_id = self.id,
                    record_type = ?other,
                    request_id = record.request_id,
                    "discarding record"
                );
                Ok(Flow::Continue)
            }
        }
    }

    /// `BeginRequest`: create (or replace, for a duplicate id) the request
    /// and notify the application.
    async fn begin_request(&mut self, record: &Record) -> Result<Flow, ProtocolError> {
        let body = match BeginRequestBody::parse(&record.content) {
            Ok(body) => body,
            Err(err) => {
                tracing::warn!(connection_id = self.id, error = %err, "bad BeginRequest body");
                return Ok(Flow::Close);
            }
        };

        if body.role() != Some(Role::Responder) {
            // Only the Responder role is implemented; the role is noted and
            // the request is served as a responder request anyway.
            tracing::warn!(
                connection_id = self.id,
                role = body.role,
                "non-responder role requested"
            );
        }

        if self.requests.remove(&record.request_id).is_some() {
            tracing::warn!(
                connection_id = self.id,
                request_id = record.request_id,
                "duplicate BeginRequest; discarding previous request state"
            );
        }

        self.requests
            .insert(record.request_id, Request::new(record.request_id, &body));
        self.state = ConnectionState::Building;
        tracing::debug!(
            connection_id = self.id,
            request_id = record.request_id,
            keep_conn = body.keep_conn,
            state = ?self.state,
            "request begun"
        );

        if let Some(request) = self.requests.get(&record.request_id) {
            self.handler.on_request_incoming(request).await;
        }
        Ok(Flow::Continue)
    }

    /// `Params` / `Stdin`: feed the assembler; dispatch on completion.
    async fn feed_request(&mut self, record: &Record) -> Result<Flow, ProtocolError> {
        let Some(request) = self.requests.get_mut(&record.request_id) else {
            tracing::debug!(
                connection_id = self.id,
                request_id = record.request_id,
                "stream record for unknown request id"
            );
            return Ok(Flow::Continue);
        };

        match request.absorb(record) {
            Ok(true) => self.dispatch(record.request_id).await,
            Ok(false) => Ok(Flow::Continue),
            Err(err) => {
                // Fatal to the request: answer with an empty body and an
                // END_REQUEST so the front server can move on.
                tracing::warn!(
                    connection_id = self.id,
                    request_id = record.request_id,
                    error = %err,
                    "request failed during assembly"
                );
                let keep_conn = request.keep_conn();
                self.requests.remove(&record.request_id);
                let mut response = Response::new(&mut self.writer, record.request_id);
                response.flush().await?;
                self.state = ConnectionState::Idle;
                Ok(if keep_conn { Flow::Continue } else { Flow::Close })
            }
        }
    }

    /// Invoke the application handler and finalise the response.
    async fn dispatch(&mut self, request_id: u16) -> Result<Flow, ProtocolError> {
        self.state = ConnectionState::Dispatching;
        let Some(request) = self.requests.get(&request_id) else {
            return Ok(Flow::Continue);
        };
        let keep_conn = request.keep_conn();

        let mut response = Response::new(&mut self.writer, request_id);
        if let Err(err) = self.handler.on_request_received(request, &mut response).await {
            tracing::error!(
                connection_id = self.id,
                request_id,
                error = %err,
                "handler failed"
            );
            response.report_error(&err.to_string()).await?;
        }
        response.flush().await?;

        self.requests.remove(&request_id);
        if keep_conn {
            self.state = ConnectionState::Idle;
            Ok(Flow::Continue)
        } else {
            Ok(Flow::Close)
        }
    }

    /// `GetValues` management probe: advertise the responder's limits and
    /// close the socket.
    async fn get_values(&mut self, record: &Record) -> Result<Flow, ProtocolError> {
        tracing::debug!(
            connection_id = self.id,
            request_id = record.request_id,
            "GetValues probe"
        );
        let reply = params::encode_block([
            (FCGI_MAX_CONNS.as_bytes(), &b"1"[..]),
            (FCGI_MAX_REQS.as_bytes(), &b"1"[..]),
            (FCGI_MPXS_CONNS.as_bytes(), &b"0"[..]),
        ])?;
        self.writer
            .write(RecordType::GetValuesResult, MGMT_REQUEST_ID, reply)
            .await?;
        Ok(Flow::Close)
    }
}
