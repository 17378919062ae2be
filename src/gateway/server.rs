//! Gateway server

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

use super::router::{create_router, protected_routes};
use crate::auth::AuthPipeline;
use crate::config::Config;
use crate::{Error, Result};

/// MCP auth gateway server
pub struct Gateway {
    /// Configuration
    config: Config,
    /// Shared authorization pipeline
    pipeline: Arc<AuthPipeline>,
}

impl Gateway {
    /// Create a new gateway
    ///
    /// Discovers the OIDC issuer and builds the backend client. Any failure
    /// here is fatal.
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let pipeline = Arc::new(AuthPipeline::from_config(&config.auth).await?);

        Ok(Self { config, pipeline })
    }

    /// Run the gateway
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        let app = create_router(Arc::clone(&self.pipeline), protected_routes());

        // Bind listener
        let listener = TcpListener::bind(addr).await?;

        let auth = &self.config.auth;
        info!("============================================================");
        info!("MCP AUTH GATEWAY v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(host = %self.config.server.host, port = %self.config.server.port, "Listening");

        if self.pipeline.requires_auth() {
            info!(
                audience = %auth.effective_audience(),
                oidc = auth.issuer_url.as_deref().unwrap_or("-"),
                backend = %auth.backend.api_server,
                "AUTHENTICATION enabled"
            );
        } else {
            warn!("AUTHENTICATION disabled - gateway is open to all requests");
        }
        info!(
            "  POST http://{}:{}/mcp",
            self.config.server.host, self.config.server.port
        );
        info!("============================================================");

        let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
        let mut drain_rx = shutdown_tx.subscribe();
        let shutdown_timeout = self.config.server.shutdown_timeout;

        let server = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .into_future();

        let drain_deadline = async move {
            let _ = drain_rx.recv().await;
            tokio::time::sleep(shutdown_timeout).await;
        };

        // Run server with graceful shutdown, bounded by the drain deadline
        tokio::select! {
            result = server => result.map_err(|e| Error::Internal(e.to_string()))?,
            () = drain_deadline => {
                warn!(timeout = ?shutdown_timeout, "Shutdown timeout elapsed, dropping open connections");
            }
        }

        Ok(())
    }
}

/// Shutdown signal handler
async fn shutdown_signal(shutdown_tx: tokio::sync::broadcast::Sender<()>) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
    let _ = shutdown_tx.send(());
}
