//! HTTP server implementation.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info};

use super::service::{router, AppState};
use crate::error::{Result, SliceLimitError};
use crate::ratelimit::{HttpRemoteNamer, SliceLimiter};

/// HTTP server for the quota gate.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// Limiter and namer shared by all requests
    state: Arc<AppState>,
}

impl HttpServer {
    /// Create a new HTTP server.
    pub fn new(addr: SocketAddr, limiter: SliceLimiter, namer: HttpRemoteNamer) -> Self {
        Self {
            addr,
            state: Arc::new(AppState::new(limiter, namer)),
        }
    }

    /// Start the HTTP server.
    ///
    /// This method will block until the server fails.
    pub async fn serve(self) -> Result<()> {
        self.serve_with_shutdown(std::future::pending()).await
    }

    /// Start the HTTP server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await.map_err(|e| {
            error!(addr = %self.addr, error = %e, "Failed to bind HTTP listener");
            SliceLimitError::Io(e)
        })?;

        info!(
            addr = %listener.local_addr()?,
            window = ?self.state.limiter.window_duration(),
            max_count = self.state.limiter.max_count(),
            "Starting HTTP server"
        );

        let app = router(self.state).into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(signal)
            .await
            .map_err(|e| {
                error!(error = %e, "HTTP server failed");
                SliceLimitError::Io(e)
            })
    }
}
