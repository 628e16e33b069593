//! Response staging and emission.
//!
//! A `Response` stages an HTTP status line, headers, and body for one
//! request, then serialises them as a CGI-style prelude inside `STDOUT`
//! records. Bodies larger than one record are split across ≤65535-byte
//! chunks; every response ends with one empty `STDOUT` followed by one
//! `END_REQUEST`. The response holds the connection's writer for its whole
//! lifetime, so all records for a request id go out in issue order.

use std::fmt::Write as _;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::AsyncWrite;

use crate::protocol::codec::RecordWriter;
use crate::protocol::error::ProtocolError;
use crate::protocol::record::{EndRequestBody, ProtocolStatus, RecordType, MAX_CONTENT_LEN};
use crate::SERVER_IDENT;

/// Staged response for one request.
pub struct Response<'w, W> {
    writer: &'w mut RecordWriter<W>,
    request_id: u16,
    http_version: String,
    status: u16,
    headers: Vec<(String, String)>,
    content_type: String,
    charset: Option<String>,
    closed: bool,
}

impl<'w, W: AsyncWrite + Unpin> Response<'w, W> {
    pub fn new(writer: &'w mut RecordWriter<W>, request_id: u16) -> Response<'w, W> {
        Response {
            writer,
            request_id,
            http_version: "HTTP/1.1".to_string(),
            status: 200,
            headers: vec![
                ("X-Powered-By".to_string(), SERVER_IDENT.to_string()),
                ("Content-Type".to_string(), "text/html; charset=utf-8".to_string()),
            ],
            content_type: "text/html".to_string(),
            charset: Some("utf-8".to_string()),
            closed: false,
        }
    }

    pub fn request_id(&self) -> u16 {
        self.request_id
    }

    /// Whether the closing empty `STDOUT` and `END_REQUEST` went out.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn set_status(&mut self, status: u16) {
        self.status = status;
    }

    pub fn set_http_version(&mut self, version: impl Into<String>) {
        self.http_version = version.into();
    }

    /// Set a header, replacing an existing one in place so the emission
    /// order stays deterministic.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.headers.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.headers.push((name, value)),
        }
    }

    pub fn set_content_type(&mut self, content_type: impl Into<String>) {
        self.content_type = content_type.into();
        self.rewrite_content_type();
    }

    /// Setting the charset rewrites the `Content-Type` header to
    /// `<type>; charset=<charset>`.
    pub fn set_charset(&mut self, charset: impl Into<String>) {
        self.charset = Some(charset.into());
        self.rewrite_content_type();
    }

    fn rewrite_content_type(&mut self) {
        let value = match &self.charset {
            Some(charset) => format!("{}; charset={}", self.content_type, charset),
            None => self.content_type.clone(),
        };
        self.set_header("Content-Type", value);
    }

    /// Emit the full response: status line, headers, blank line, body.
    ///
    /// The reason phrase is always the literal `OK`; the front server
    /// rewrites the status line. Header lines end in `\n`, matching the
    /// gateways this responder targets.
    pub async fn send(&mut self, body: &[u8]) -> Result<(), ProtocolError> {
        let mut prelude = String::with_capacity(64 + self.headers.len() * 32);
        let _ = write!(prelude, "{} {} OK\n", self.http_version, self.status);
        for (name, value) in &self.headers {
            let _ = write!(prelude, "{}:{}\n", name, value);
        }
        prelude.push('\n');

        let mut payload = BytesMut::with_capacity(prelude.len() + body.len());
        payload.put_slice(prelude.as_bytes());
        payload.put_slice(body);
        self.send_raw(payload.freeze()).await
    }

    /// Emit raw bytes as `STDOUT` records and terminate the request:
    /// ≤65535-byte chunks, one closing empty `STDOUT`, one `END_REQUEST`
    /// with `RequestComplete`. A closed response ignores further sends.
    pub async fn send_raw(&mut self, payload: Bytes) -> Result<(), ProtocolError> {
        if self.closed {
            tracing::debug!(request_id = self.request_id, "send on closed response ignored");
            return Ok(());
        }
        let mut remaining = payload;
        while !remaining.is_empty() {
            let take = remaining.len().min(MAX_CONTENT_LEN);
            let chunk = remaining.split_to(take);
            self.writer
                .write(RecordType::Stdout, self.request_id, chunk)
                .await?;
        }
        self.terminate().await
    }

    /// Close the output stream if the handler has not already done so.
    /// Idempotent.
    pub async fn flush(&mut self) -> Result<(), ProtocolError> {
        if self.closed {
            return Ok(());
        }
        self.terminate().await
    }

    /// Report a handler failure on the `STDERR` stream. Does not close the
    /// response; the driver flushes afterwards.
    pub(crate) async fn report_error(&mut self, message: &str) -> Result<(), ProtocolError> {
        let mut text = Bytes::copy_from_slice(message.as_bytes());
        text.truncate(MAX_CONTENT_LEN);
        self.writer
            .write(RecordType::Stderr, self.request_id, text)
            .await?;
        self.writer
            .write(RecordType::Stderr, self.request_id, Bytes::new())
            .await
    }

    /// Closing empty `STDOUT`, then the `END_REQUEST` trailer.
    async fn terminate(&mut self) -> Result<(), ProtocolError> {
        self.writer
            .write(RecordType::Stdout, self.request_id, Bytes::new())
            .await?;
        let trailer = EndRequestBody::new(0, ProtocolStatus::RequestComplete);
        self.writer
            .write(RecordType::EndRequest, self.request_id, trailer.encode())
            .await?;
        self.closed = true;
        Ok(())
    }
}
