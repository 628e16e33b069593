//! FastCGI responder for serving MVCXE applications behind an nginx front
//! server.
//!
//! # Architecture Overview
//!
//! ```text
//!                 ┌───────────────────────────────────────────────┐
//!                 │               FASTCGI RESPONDER               │
//!  nginx          │                                               │
//!  ───────────────┼─▶ net/listener ──▶ net/connection             │
//!  (loopback TCP) │                        │                      │
//!                 │                        ▼                      │
//!                 │                protocol (records,             │
//!                 │                 params, codec)                │
//!                 │                        │                      │
//!                 │                        ▼                      │
//!                 │      responder (request assembly, handler     │
//!                 │        dispatch, response emission)           │
//!                 │                                               │
//!                 │  ┌─────────────────────────────────────────┐  │
//!                 │  │          Cross-Cutting Concerns         │  │
//!                 │  │  config · lifecycle · observability     │  │
//!                 │  └─────────────────────────────────────────┘  │
//!                 └───────────────────────────────────────────────┘
//! ```
//!
//! The application supplies a [`Handler`]; the server drives one
//! connection worker per accepted socket and invokes the handler once per
//! completed request.

// Core subsystems
pub mod config;
pub mod net;
pub mod protocol;
pub mod responder;
pub mod server;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;

pub use config::ServerConfig;
pub use responder::{Handler, HandlerError, Request, Response};
pub use server::{Server, ServerError};

/// Identity string advertised in the default `X-Powered-By` header and in
/// `Server::version()`.
pub const SERVER_IDENT: &str = "MVCXE.NGINX.FCGI";
