//! MVCXE FastCGI responder binary.
//!
//! Loads configuration, installs a smoke-test handler, and serves until
//! SIGTERM/SIGINT. Point an nginx `fastcgi_pass 127.0.0.1:<port>;`
//! location at it.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::tcp::OwnedWriteHalf;

use mvcxe_fcgi::config::{load_config, ServerConfig};
use mvcxe_fcgi::lifecycle::signals;
use mvcxe_fcgi::observability::logging;
use mvcxe_fcgi::{Handler, HandlerError, Request, Response, Server};

/// Built-in handler so an operator can smoke-test a deployment before the
/// real application is wired in.
struct StatusPageHandler;

#[async_trait]
impl Handler for StatusPageHandler {
    async fn on_request_incoming(&self, request: &Request) {
        tracing::debug!(request_id = request.id(), "request incoming");
    }

    async fn on_request_received(
        &self,
        request: &Request,
        response: &mut Response<'_, OwnedWriteHalf>,
    ) -> Result<(), HandlerError> {
        let method = request
            .param("REQUEST_METHOD")
            .map(|v| String::from_utf8_lossy(v).into_owned())
            .unwrap_or_default();
        let uri = request
            .param("REQUEST_URI")
            .map(|v| String::from_utf8_lossy(v).into_owned())
            .unwrap_or_default();
        tracing::info!(request_id = request.id(), %method, %uri, "serving status page");

        response.set_content_type("text/plain");
        let body = format!(
            "{} is running.\nmethod: {}\nuri: {}\nbody bytes: {}\n",
            mvcxe_fcgi::SERVER_IDENT,
            method,
            uri,
            request.body().len()
        );
        response.send(body.as_bytes()).await?;
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Optional config file path as the only argument.
    let config = match std::env::args().nth(1) {
        Some(path) => load_config(Path::new(&path))?,
        None => ServerConfig::default(),
    };

    logging::init(&config.log.filter);

    tracing::info!(
        port = config.listener.port,
        max_connections = config.listener.max_connections,
        read_timeout_ms = config.timeouts.read_ms,
        "Configuration loaded"
    );

    let port = config.listener.port;
    let mut server = Server::new(config);
    server.set_handler(Arc::new(StatusPageHandler))?;
    server.start(port).await?;

    signals::shutdown_signal().await;
    tracing::info!("shutdown signal received");
    server.stop().await;

    tracing::info!("Shutdown complete");
    Ok(())
}
