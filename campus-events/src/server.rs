//! HTTP server with graceful shutdown

use axum::Router;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::{
    catch_panic::CatchPanicLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};

use crate::{
    error::Result,
    pipeline::{EventPipeline, ShutdownReport},
};

/// Server instance
pub struct Server {
    pipeline: EventPipeline,
}

impl Server {
    /// Create a server around a built pipeline
    pub fn new(pipeline: EventPipeline) -> Self {
        Self { pipeline }
    }

    /// Start the pipeline and serve `app` merged with the pipeline routes
    ///
    /// Returns once SIGINT or SIGTERM has been received, in-flight requests
    /// have finished and the pipeline has shut down.
    pub async fn serve(self, app: Router) -> Result<ShutdownReport> {
        let config = self.pipeline.config();
        let addr = SocketAddr::from(([0, 0, 0, 0], config.service.port));
        tracing::info!("Starting {} on {}", config.service.name, addr);

        // Layers wrap outward: panic recovery is innermost
        let app = app
            .merge(self.pipeline.router())
            .layer(
                TraceLayer::new_for_http()
                    .make_span_with(DefaultMakeSpan::new().include_headers(false))
                    .on_response(DefaultOnResponse::new()),
            )
            .layer(CatchPanicLayer::new());

        let listener = TcpListener::bind(&addr).await?;
        self.pipeline.start();
        tracing::info!("Server listening on {}", addr);

        let cancel = self.pipeline.cancellation_token();
        axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(async move {
                tokio::select! {
                    () = shutdown_signal() => {}
                    () = cancel.cancelled() => {}
                }
            })
            .await?;

        let report = self.pipeline.shutdown().await;
        tracing::info!("Server shutdown complete");
        Ok(report)
    }

    /// The pipeline being served
    pub fn pipeline(&self) -> &EventPipeline {
        &self.pipeline
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl+C), starting graceful shutdown");
        },
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
