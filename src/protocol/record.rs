//! FastCGI record model and fixed-layout body codecs.
//!
//! A record is the protocol atom: an 8-byte header followed by up to 65535
//! content bytes and up to 255 padding bytes. All multi-byte integers on the
//! wire are big-endian.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::protocol::error::ProtocolError;

/// The only protocol version this responder speaks.
pub const FCGI_VERSION: u8 = 1;

/// Wire size of a record header.
pub const HEADER_LEN: usize = 8;

/// Content length ceiling imposed by the 16-bit length field.
pub const MAX_CONTENT_LEN: usize = 0xFFFF;

/// Request id used by management records (`GetValues` and its reply).
pub const MGMT_REQUEST_ID: u16 = 0;

/// Variable names advertised in a `GetValuesResult` reply.
pub const FCGI_MAX_CONNS: &str = "FCGI_MAX_CONNS";
pub const FCGI_MAX_REQS: &str = "FCGI_MAX_REQS";
pub const FCGI_MPXS_CONNS: &str = "FCGI_MPXS_CONNS";

/// The eleven record types defined by FastCGI 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    BeginRequest = 1,
    AbortRequest = 2,
    EndRequest = 3,
    Params = 4,
    Stdin = 5,
    Stdout = 6,
    Stderr = 7,
    Data = 8,
    GetValues = 9,
    GetValuesResult = 10,
    UnknownType = 11,
}

impl RecordType {
    /// Map a wire byte to a record type. Codes outside the defined set
    /// normalise to `UnknownType` so higher layers can discard them.
    pub fn from_wire(code: u8) -> RecordType {
        match code {
            1 => RecordType::BeginRequest,
            2 => RecordType::AbortRequest,
            3 => RecordType::EndRequest,
            4 => RecordType::Params,
            5 => RecordType::Stdin,
            6 => RecordType::Stdout,
            7 => RecordType::Stderr,
            8 => RecordType::Data,
            9 => RecordType::GetValues,
            10 => RecordType::GetValuesResult,
            _ => RecordType::UnknownType,
        }
    }
}

/// Roles defined by FastCGI 1.0. Only `Responder` is implemented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Role {
    Responder = 1,
    Authorizer = 2,
    Filter = 3,
}

impl Role {
    pub fn from_wire(code: u16) -> Option<Role> {
        match code {
            1 => Some(Role::Responder),
            2 => Some(Role::Authorizer),
            3 => Some(Role::Filter),
            _ => None,
        }
    }
}

/// Protocol status carried in the `END_REQUEST` trailer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ProtocolStatus {
    RequestComplete = 0,
    CantMpxConn = 1,
    Overloaded = 2,
    UnknownRole = 3,
}

/// One decoded record. Padding never survives decoding and is never
/// produced on encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub record_type: RecordType,
    pub request_id: u16,
    pub content: Bytes,
}

impl Record {
    pub fn new(record_type: RecordType, request_id: u16, content: Bytes) -> Record {
        Record {
            record_type,
            request_id,
            content,
        }
    }

    /// Serialise this record (header then content, zero padding) into `buf`.
    ///
    /// Content beyond the 16-bit ceiling is a caller bug; the response
    /// emitter chunks before it gets here.
    pub fn encode_into(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        if self.content.len() > MAX_CONTENT_LEN {
            return Err(ProtocolError::OversizeRecord(self.content.len()));
        }
        buf.reserve(HEADER_LEN + self.content.len());
        buf.put_u8(FCGI_VERSION);
        buf.put_u8(self.record_type as u8);
        buf.put_u16(self.request_id);
        buf.put_u16(self.content.len() as u16);
        buf.put_u8(0); // padding length
        buf.put_u8(0); // reserved
        buf.put_slice(&self.content);
        Ok(())
    }
}

/// Decoded record header, the first 8 bytes on the wire.
#[derive(Debug, Clone, Copy)]
pub struct RecordHeader {
    pub record_type: RecordType,
    pub request_id: u16,
    pub content_length: u16,
    pub padding_length: u8,
}

impl RecordHeader {
    /// Decode an 8-byte header. A version byte other than 1 means the
    /// stream is corrupt and the connection must be abandoned.
    pub fn parse(raw: &[u8; HEADER_LEN]) -> Result<RecordHeader, ProtocolError> {
        let mut buf = &raw[..];
        let version = buf.get_u8();
        if version != FCGI_VERSION {
            return Err(ProtocolError::BadVersion(version));
        }
        let record_type = RecordType::from_wire(buf.get_u8());
        let request_id = buf.get_u16();
        let content_length = buf.get_u16();
        let padding_length = buf.get_u8();
        Ok(RecordHeader {
            record_type,
            request_id,
            content_length,
            padding_length,
        })
    }
}

/// Body of a `BeginRequest` record: role and connection-control flags.
#[derive(Debug, Clone, Copy)]
pub struct BeginRequestBody {
    pub role: u16,
    pub keep_conn: bool,
}

impl BeginRequestBody {
    /// Flag bit 0 of the flags byte.
    pub const KEEP_CONN: u8 = 1;

    /// Wire size of the body.
    pub const LEN: usize = 8;

    /// Decode the 8-byte body. The role occupies bytes 0 and 1 as a
    /// big-endian integer; the flags byte follows.
    pub fn parse(content: &[u8]) -> Result<BeginRequestBody, ProtocolError> {
        if content.len() < Self::LEN {
            return Err(ProtocolError::MalformedBody("BeginRequest"));
        }
        let mut buf = content;
        let role = buf.get_u16();
        let flags = buf.get_u8();
        Ok(BeginRequestBody {
            role,
            keep_conn: flags & Self::KEEP_CONN != 0,
        })
    }

    pub fn role(&self) -> Option<Role> {
        Role::from_wire(self.role)
    }
}

/// Body of an `END_REQUEST` record.
#[derive(Debug, Clone, Copy)]
pub struct EndRequestBody {
    pub app_status: u32,
    pub protocol_status: ProtocolStatus,
}

impl EndRequestBody {
    /// Wire size of the body.
    pub const LEN: usize = 8;

    pub fn new(app_status: u32, protocol_status: ProtocolStatus) -> EndRequestBody {
        EndRequestBody {
            app_status,
            protocol_status,
        }
    }

    /// Serialise to the fixed 8-byte layout.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::LEN);
        buf.put_u32(self.app_status);
        buf.put_u8(self.protocol_status as u8);
        buf.put_slice(&[0; 3]); // reserved
        buf.freeze()
    }
}
