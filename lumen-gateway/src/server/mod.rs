//! Router assembly and the HTTP-level middleware.

pub mod pq;

use std::sync::Arc;

use axum::{
    Router,
    extract::{MatchedPath, Request, State},
    middleware::Next,
    response::Response,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;

use lumen_api_core::server::default_fallback;

use crate::{handlers, state::RouterState};

pub fn router(state: Arc<RouterState>) -> Router<()> {
    // Envelope-mandatory routes: the middleware authenticates, injects the
    // PqSession, and seals the response.
    let pq_routes = Router::new()
        .route("/pq/search", post(handlers::search::pq_search))
        .route("/pq/ipfs", post(handlers::proxy::pq_ipfs))
        .route("/pq/ipns", post(handlers::proxy::pq_ipns))
        .route("/wallet/usage", post(handlers::wallet::usage))
        .route("/wallet/cids", post(handlers::wallet::cids))
        .route("/wallet/cid/rename", post(handlers::wallet::rename))
        .route("/pin", post(handlers::pins::pin))
        .route("/unpin", post(handlers::pins::unpin))
        .route("/ispinned", post(handlers::pins::ispinned))
        .route("/ingest/ready", post(handlers::ingest::ready))
        .route("/ingest/init", post(handlers::ingest::init))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            pq::pq_envelope_middleware,
        ));

    Router::new()
        .route("/health", get(handlers::public::health))
        .route("/status", get(handlers::public::status))
        .route("/pq/pub", get(handlers::public::pq_pub))
        .route("/pricing", get(handlers::public::pricing))
        .route("/metrics", get(handlers::public::metrics))
        .route("/ipfs/seed", get(handlers::public::seed))
        .route("/ingest/car", post(handlers::ingest::car))
        .merge(pq_routes)
        .fallback(default_fallback)
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            http_metrics,
        ))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Per-request HTTP metrics, labeled by matched route and status.
async fn http_metrics(
    State(state): State<Arc<RouterState>>,
    req: Request,
    next: Next,
) -> Response {
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|m| m.as_str().to_owned())
        .unwrap_or_else(|| "unmatched".to_owned());
    let resp = next.run(req).await;
    state
        .metrics
        .http_requests
        .with_label_values(&[&route, resp.status().as_str()])
        .inc();
    resp
}
