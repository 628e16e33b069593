//! Shared utilities for integration testing: a byte-level FastCGI peer
//! (playing the web server) and a test handler with observable state.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;

use mvcxe_fcgi::{Handler, HandlerError, Request, Response, Server, ServerConfig};

pub const FCGI_BEGIN_REQUEST: u8 = 1;
pub const FCGI_ABORT_REQUEST: u8 = 2;
pub const FCGI_END_REQUEST: u8 = 3;
pub const FCGI_PARAMS: u8 = 4;
pub const FCGI_STDIN: u8 = 5;
pub const FCGI_STDOUT: u8 = 6;
pub const FCGI_STDERR: u8 = 7;
pub const FCGI_GET_VALUES: u8 = 9;
pub const FCGI_GET_VALUES_RESULT: u8 = 10;
pub const FCGI_RESPONDER: u16 = 1;
pub const FCGI_KEEP_CONN: u8 = 1;

/// Encode one record with zero padding, the way nginx frames them.
pub fn encode_record(record_type: u8, request_id: u16, content: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(8 + content.len());
    buf.push(1);
    buf.push(record_type);
    buf.extend_from_slice(&request_id.to_be_bytes());
    buf.extend_from_slice(&(content.len() as u16).to_be_bytes());
    buf.push(0);
    buf.push(0);
    buf.extend_from_slice(content);
    buf
}

pub fn encode_begin_request(request_id: u16, role: u16, flags: u8) -> Vec<u8> {
    let mut body = Vec::with_capacity(8);
    body.extend_from_slice(&role.to_be_bytes());
    body.push(flags);
    body.extend_from_slice(&[0; 5]);
    encode_record(FCGI_BEGIN_REQUEST, request_id, &body)
}

pub fn encode_nv_pair(name: &[u8], value: &[u8]) -> Vec<u8> {
    let mut buf = Vec::new();
    if name.len() < 128 {
        buf.push(name.len() as u8);
    } else {
        buf.extend_from_slice(&((name.len() as u32) | 0x8000_0000).to_be_bytes());
    }
    if value.len() < 128 {
        buf.push(value.len() as u8);
    } else {
        buf.extend_from_slice(&((value.len() as u32) | 0x8000_0000).to_be_bytes());
    }
    buf.extend_from_slice(name);
    buf.extend_from_slice(value);
    buf
}

pub fn decode_nv_pairs(mut data: &[u8]) -> Vec<(String, String)> {
    fn read_len(data: &mut &[u8]) -> usize {
        let first = data[0];
        if first < 128 {
            *data = &data[1..];
            first as usize
        } else {
            let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) & 0x7fff_ffff;
            *data = &data[4..];
            len as usize
        }
    }

    let mut result = Vec::new();
    while !data.is_empty() {
        let name_len = read_len(&mut data);
        let value_len = read_len(&mut data);
        let name = String::from_utf8(data[..name_len].to_vec()).unwrap();
        let value = String::from_utf8(data[name_len..name_len + value_len].to_vec()).unwrap();
        data = &data[name_len + value_len..];
        result.push((name, value));
    }
    result
}

/// One record as seen on the wire by the peer.
#[derive(Debug)]
pub struct WireRecord {
    pub record_type: u8,
    pub request_id: u16,
    pub content: Vec<u8>,
}

/// Read one record off the socket. `None` on a clean close; panics on a
/// close mid-record or a bad version byte, which no test expects.
pub async fn read_wire_record(stream: &mut TcpStream) -> Option<WireRecord> {
    let mut header = [0u8; 8];
    let mut filled = 0;
    while filled < 8 {
        let read = stream.read(&mut header[filled..]).await.unwrap();
        if read == 0 {
            assert_eq!(filled, 0, "peer closed mid-header");
            return None;
        }
        filled += read;
    }
    assert_eq!(header[0], 1, "unexpected FastCGI version");

    let record_type = header[1];
    let request_id = u16::from_be_bytes([header[2], header[3]]);
    let content_len = u16::from_be_bytes([header[4], header[5]]) as usize;
    let padding_len = header[6] as usize;

    let mut content = vec![0u8; content_len + padding_len];
    stream.read_exact(&mut content).await.unwrap();
    content.truncate(content_len);

    Some(WireRecord {
        record_type,
        request_id,
        content,
    })
}

/// Read records until (and including) `END_REQUEST`.
pub async fn read_until_end_request(stream: &mut TcpStream) -> Vec<WireRecord> {
    let mut records = Vec::new();
    loop {
        let record = read_wire_record(stream)
            .await
            .expect("connection closed before END_REQUEST");
        let done = record.record_type == FCGI_END_REQUEST;
        records.push(record);
        if done {
            return records;
        }
    }
}

/// Handler used across the integration tests. Behaviour is selected per
/// request via the `TEST_CASE` parameter; hook invocations and the last
/// parameter map are observable.
pub struct TestHandler {
    pub incoming_calls: AtomicUsize,
    pub received_calls: AtomicUsize,
    pub last_params: Mutex<HashMap<String, Vec<u8>>>,
    pub last_body: Mutex<Vec<u8>>,
}

impl TestHandler {
    pub fn new() -> Arc<TestHandler> {
        Arc::new(TestHandler {
            incoming_calls: AtomicUsize::new(0),
            received_calls: AtomicUsize::new(0),
            last_params: Mutex::new(HashMap::new()),
            last_body: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl Handler for TestHandler {
    async fn on_request_incoming(&self, _request: &Request) {
        self.incoming_calls.fetch_add(1, Ordering::SeqCst);
    }

    async fn on_request_received(
        &self,
        request: &Request,
        response: &mut Response<'_, OwnedWriteHalf>,
    ) -> Result<(), HandlerError> {
        self.received_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_params.lock().unwrap() = request
            .params()
            .iter()
            .map(|(name, value)| {
                (
                    String::from_utf8_lossy(name).into_owned(),
                    value.to_vec(),
                )
            })
            .collect();
        *self.last_body.lock().unwrap() = request.body().to_vec();

        match request.param("TEST_CASE").map(|v| &v[..]) {
            Some(b"large") => {
                response.send_raw(Bytes::from(vec![b'x'; 200_000])).await?;
            }
            Some(b"fail") => {
                return Err(HandlerError::from("handler exploded"));
            }
            _ => {
                response.send(b"hi").await?;
            }
        }
        Ok(())
    }
}

/// Start a server with short test timeouts on an ephemeral port.
pub async fn start_server(handler: Arc<dyn Handler>) -> (Server, SocketAddr) {
    let mut config = ServerConfig::default();
    config.timeouts.read_ms = 1_000;
    config.timeouts.drain_secs = 5;

    let mut server = Server::new(config);
    server.set_handler(handler).unwrap();
    let addr = server.start(0).await.unwrap();
    (server, addr)
}
