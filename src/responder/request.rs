//! Per-request assembly.
//!
//! A `Request` accumulates the `PARAMS` and `STDIN` streams for one request
//! id. Parameter bytes are only parsed once the web server closes the
//! stream with an empty `PARAMS` record; an empty `STDIN` record marks the
//! request complete and ready for dispatch.

use std::collections::HashMap;

use bytes::{Bytes, BytesMut};

use crate::protocol::error::ProtocolError;
use crate::protocol::params;
use crate::protocol::record::{BeginRequestBody, Record, RecordType, Role};

/// One in-flight request within a connection.
#[derive(Debug)]
pub struct Request {
    id: u16,
    role: u16,
    keep_conn: bool,
    params_buf: BytesMut,
    params: HashMap<Vec<u8>, Bytes>,
    params_closed: bool,
    body: BytesMut,
    complete: bool,
}

impl Request {
    pub fn new(id: u16, begin: &BeginRequestBody) -> Request {
        Request {
            id,
            role: begin.role,
            keep_conn: begin.keep_conn,
            params_buf: BytesMut::new(),
            params: HashMap::new(),
            params_closed: false,
            body: BytesMut::new(),
            complete: false,
        }
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn role(&self) -> Option<Role> {
        Role::from_wire(self.role)
    }

    /// Whether the peer asked to keep the TCP connection after the response.
    pub fn keep_conn(&self) -> bool {
        self.keep_conn
    }

    /// Whether the final empty `STDIN` record has arrived.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Parsed parameters. Empty until the `PARAMS` stream closes.
    pub fn params(&self) -> &HashMap<Vec<u8>, Bytes> {
        &self.params
    }

    /// Look up one parameter by name.
    pub fn param(&self, name: &str) -> Option<&Bytes> {
        self.params.get(name.as_bytes())
    }

    /// Accumulated request body (`STDIN` content).
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Feed one record into the assembler. Returns `true` when the request
    /// has just become complete.
    ///
    /// Only `Params` and `Stdin` mutate state; anything else reaches the
    /// assembler in error and is ignored. A parameter-block parse failure
    /// is fatal to the request and propagates to the driver.
    pub fn absorb(&mut self, record: &Record) -> Result<bool, ProtocolError> {
        match record.record_type {
            RecordType::Params => {
                if record.content.is_empty() {
                    self.close_params()?;
                } else {
                    self.params_buf.extend_from_slice(&record.content);
                }
            }
            RecordType::Stdin => {
                if record.content.is_empty() {
                    self.complete = true;
                    return Ok(true);
                }
                self.body.extend_from_slice(&record.content);
            }
            _ => {}
        }
        Ok(false)
    }

    /// Parse the accumulated parameter buffer. Later occurrences of a name
    /// overwrite earlier ones. A repeated stream close is a no-op.
    fn close_params(&mut self) -> Result<(), ProtocolError> {
        if self.params_closed {
            return Ok(());
        }
        let block = self.params_buf.split().freeze();
        for (name, value) in params::parse_block(&block)? {
            self.params.insert(name.to_vec(), value);
        }
        self.params_closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::params::encode_block;

    fn begin(keep_conn: bool) -> BeginRequestBody {
        BeginRequestBody {
            role: 1,
            keep_conn,
        }
    }

    fn params_record(id: u16, content: Bytes) -> Record {
        Record::new(RecordType::Params, id, content)
    }

    #[test]
    fn params_parse_only_on_stream_close() {
        let block = encode_block([
            (&b"REQUEST_METHOD"[..], &b"GET"[..]),
            (&b"QUERY_STRING"[..], &b"a=1"[..]),
        ])
        .unwrap();

        let mut request = Request::new(1, &begin(false));
        request
            .absorb(&params_record(1, block.clone()))
            .unwrap();
        assert!(request.params().is_empty());

        request.absorb(&params_record(1, Bytes::new())).unwrap();
        assert_eq!(request.param("REQUEST_METHOD").unwrap(), &b"GET"[..]);
        assert_eq!(request.param("QUERY_STRING").unwrap(), &b"a=1"[..]);
    }

    #[test]
    fn split_params_match_the_contiguous_block() {
        let block = encode_block([
            (&b"SERVER_NAME"[..], &b"localhost"[..]),
            (&b"REQUEST_URI"[..], &b"/index"[..]),
            (&b"HTTP_ACCEPT"[..], &b"text/html,application/xhtml+xml"[..]),
        ])
        .unwrap();

        let mut contiguous = Request::new(1, &begin(false));
        contiguous.absorb(&params_record(1, block.clone())).unwrap();
        contiguous.absorb(&params_record(1, Bytes::new())).unwrap();

        // Same block trickled in three arbitrary fragments.
        let mut split = Request::new(1, &begin(false));
        split.absorb(&params_record(1, block.slice(..7))).unwrap();
        split.absorb(&params_record(1, block.slice(7..30))).unwrap();
        split.absorb(&params_record(1, block.slice(30..))).unwrap();
        split.absorb(&params_record(1, Bytes::new())).unwrap();

        assert_eq!(contiguous.params(), split.params());
    }

    #[test]
    fn later_duplicate_names_overwrite() {
        let block = encode_block([
            (&b"X"[..], &b"first"[..]),
            (&b"X"[..], &b"second"[..]),
        ])
        .unwrap();

        let mut request = Request::new(1, &begin(false));
        request.absorb(&params_record(1, block)).unwrap();
        request.absorb(&params_record(1, Bytes::new())).unwrap();
        assert_eq!(request.param("X").unwrap(), &b"second"[..]);
    }

    #[test]
    fn empty_stdin_completes_the_request() {
        let mut request = Request::new(1, &begin(true));
        request.absorb(&params_record(1, Bytes::new())).unwrap();
        assert!(!request.is_complete());

        let done = request
            .absorb(&Record::new(RecordType::Stdin, 1, Bytes::from_static(b"a=b")))
            .unwrap();
        assert!(!done);

        let done = request
            .absorb(&Record::new(RecordType::Stdin, 1, Bytes::new()))
            .unwrap();
        assert!(done);
        assert!(request.is_complete());
        assert_eq!(request.body(), b"a=b");
    }

    #[test]
    fn stray_record_types_are_ignored() {
        let mut request = Request::new(1, &begin(false));
        let stray = Record::new(RecordType::Data, 1, Bytes::from_static(b"x"));
        assert!(!request.absorb(&stray).unwrap());
        assert!(request.body().is_empty());
    }

    #[test]
    fn corrupt_params_block_is_fatal() {
        let mut request = Request::new(1, &begin(false));
        request
            .absorb(&params_record(1, Bytes::from_static(&[0x20])))
            .unwrap();
        assert!(request.absorb(&params_record(1, Bytes::new())).is_err());
    }
}
