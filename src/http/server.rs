//! HTTP server implementation.

use axum::Router;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::error::{FloodgateError, Result};

/// HTTP server hosting an admission-checked router.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// Routes to serve, already wrapped with the admission layer
    router: Router,
}

impl HttpServer {
    /// Create a new HTTP server.
    pub fn new(addr: SocketAddr, router: Router) -> Self {
        Self { addr, router }
    }

    /// Start the HTTP server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await?;
        let local_addr = listener.local_addr()?;

        info!(addr = %local_addr, "Starting HTTP server");

        // Peer addresses are needed to key the rate limiter.
        let app = self
            .router
            .into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(signal)
            .await
            .map_err(|e| {
                error!(error = %e, "HTTP server failed");
                FloodgateError::Io(e)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;

    #[test]
    fn test_server_creation() {
        let addr: SocketAddr = "127.0.0.1:8080".parse().unwrap();
        let router = Router::new().route("/", get(|| async { "ok" }));
        let _server = HttpServer::new(addr, router);
    }

    #[tokio::test]
    async fn test_server_stops_on_signal() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let server = HttpServer::new(addr, Router::new());

        let result = server.serve_with_shutdown(async {}).await;
        assert!(result.is_ok());
    }
}
