//! Responder-role request/response plumbing.
//!
//! # Data Flow
//! ```text
//! Decoded records (protocol layer)
//!     → request.rs (accumulate PARAMS / STDIN, parse on stream close)
//!     → handler.rs (application hooks)
//!     → response.rs (CGI prelude, STDOUT chunking, END_REQUEST)
//! ```

pub mod handler;
pub mod request;
pub mod response;

pub use handler::{Handler, HandlerError};
pub use request::Request;
pub use response::Response;
