//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection (loopback only)
//!     → listener.rs (accept loop, connection limits)
//!     → connection.rs (record loop, request state machine)
//!     → Hand off to the responder layer
//! ```
//!

pub mod connection;
pub mod listener;

pub use connection::Connection;
pub use listener::{Listener, ListenerError};
