//! Protocol-level error definitions.

use thiserror::Error;

/// Errors raised while reading or writing FastCGI records.
///
/// `BadVersion` and `ShortRead` mean the byte stream can no longer be
/// trusted; the connection driver abandons the connection without sending
/// an `END_REQUEST`.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Header carried a version byte other than 1.
    #[error("corrupt stream: unsupported FastCGI version {0}")]
    BadVersion(u8),

    /// Peer closed the socket in the middle of a record.
    #[error("short read: peer closed mid-record")]
    ShortRead,

    /// Peer closed the socket between records.
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// No bytes arrived within the configured read timeout.
    #[error("read timed out after {0} ms")]
    Timeout(u64),

    /// A write was attempted with more than 65535 content bytes.
    /// Callers must chunk; reaching this is a bug in the caller.
    #[error("record content of {0} bytes exceeds the 16-bit length ceiling")]
    OversizeRecord(usize),

    /// A name or value length field decoded to 2^31 or more.
    #[error("name/value length {0} is out of range")]
    OversizeParameter(u64),

    /// A name/value block ended inside a pair.
    #[error("truncated name/value block")]
    TruncatedParams,

    /// A fixed-layout record body was shorter than its wire size.
    #[error("malformed {0} body")]
    MalformedBody(&'static str),

    /// Underlying socket error.
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
}
