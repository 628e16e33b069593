//! Application handler seam.
//!
//! The application supplies one object with two hooks: an early
//! notification when a request begins, and the dispatch call once the
//! request is fully assembled. Hooks run on the connection's worker, so
//! implementations must be thread-safe.

use async_trait::async_trait;
use thiserror::Error;
use tokio::net::tcp::OwnedWriteHalf;

use crate::protocol::error::ProtocolError;
use crate::responder::request::Request;
use crate::responder::response::Response;

/// Failure returned by a handler. The driver contains it: the message is
/// reported on the `STDERR` stream and the request completes with an empty
/// body, so the front server never waits on a dead request id.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        HandlerError(message.to_string())
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        HandlerError(message)
    }
}

impl From<ProtocolError> for HandlerError {
    fn from(err: ProtocolError) -> Self {
        HandlerError(err.to_string())
    }
}

/// Application callbacks driven by the connection workers.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Called exactly once per request, right after `BeginRequest` is
    /// processed and before any parameters have been parsed. Intended for
    /// logging and early bookkeeping.
    async fn on_request_incoming(&self, _request: &Request) {}

    /// Called exactly once per completed request. Reads `request.params()`
    /// and `request.body()`, mutates `response`, and may call `send` or
    /// `flush`; if it returns without closing the response, the driver
    /// flushes automatically.
    async fn on_request_received(
        &self,
        request: &Request,
        response: &mut Response<'_, OwnedWriteHalf>,
    ) -> Result<(), HandlerError>;
}
