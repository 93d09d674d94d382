use std::future::Future;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use tcas_cas::{ServerSettings, TapeOffer};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::error::{ServerError, ServerResult};
use crate::router::build_router;

/// Admin server of a tape offer.
pub struct TcasServer {
    offer: Arc<TapeOffer>,
    settings: ServerSettings,
}

impl TcasServer {
    pub fn new(offer: Arc<TapeOffer>) -> Self {
        let settings = offer.config().server.clone();
        Self { offer, settings }
    }

    pub fn settings(&self) -> &ServerSettings {
        &self.settings
    }

    /// Build the router (useful for testing).
    pub fn router(&self) -> axum::Router {
        build_router(self.offer.clone())
            .layer(DefaultBodyLimit::max(self.settings.max_upload_size))
            .layer(TraceLayer::new_for_http())
    }

    /// Serve requests until `shutdown` resolves.
    pub async fn serve(self, shutdown: impl Future<Output = ()> + Send + 'static) -> ServerResult<()> {
        let app = self.router();
        let listener = TcpListener::bind(self.settings.bind_addr).await?;
        tracing::info!(addr = %self.settings.bind_addr, "tcas server listening");
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| ServerError::Internal(e.to_string()))
    }
}
