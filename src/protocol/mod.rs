//! FastCGI wire protocol engine.
//!
//! # Data Flow
//! ```text
//! Socket bytes
//!     → codec.rs (RecordReader: header, content, padding, timeout)
//!     → record.rs (typed records, fixed-layout bodies)
//!     → params.rs (name/value sublanguage for PARAMS / GET_VALUES)
//!     → Hand off to the responder layer
//! ```

pub mod codec;
pub mod error;
pub mod params;
pub mod record;

pub use codec::{RecordReader, RecordWriter};
pub use error::ProtocolError;
pub use record::{
    BeginRequestBody, EndRequestBody, ProtocolStatus, Record, RecordType, Role, FCGI_VERSION,
    MAX_CONTENT_LEN,
};
