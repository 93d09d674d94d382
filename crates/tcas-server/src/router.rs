use std::sync::Arc;

use axum::routing::{get, post, put};
use axum::Router;
use tcas_cas::TapeOffer;

use crate::handler;

/// Build the axum router with all admin endpoints.
pub fn build_router(offer: Arc<TapeOffer>) -> Router {
    Router::new()
        .route("/v1/health", get(handler::health_handler))
        .route("/v1/info", get(handler::info_handler))
        .route(
            "/v1/objects/:container/:name",
            put(handler::put_object).get(handler::get_object),
        )
        .route("/v1/tape/backup/:object_id", put(handler::put_backup))
        .route("/v1/tape/queue", get(handler::list_queue))
        .route("/v1/tape/queue/poll", post(handler::poll_queue))
        .route("/v1/tape/queue/:archive_id/release", post(handler::release_order))
        .route("/v1/tape/queue/:archive_id/complete", post(handler::complete_order))
        .route("/v1/tape/archives/:archive_id", get(handler::get_archive))
        .route("/v1/tape/flush", post(handler::flush))
        .with_state(offer)
}
