//! The `/pq/search` handler: a thin shim over the search service.

use std::sync::Arc;

use axum::{Extension, extract::State};
use tracing::instrument;

use lumen_api_core::{
    error::ApiError,
    models::{SearchRequest, SearchResponse},
    server::LmJson,
};

use crate::state::{PqSession, RouterState};

#[instrument(skip_all, name = "(search)")]
pub async fn pq_search(
    State(state): State<Arc<RouterState>>,
    Extension(session): Extension<PqSession>,
) -> Result<LmJson<SearchResponse>, ApiError> {
    let req: SearchRequest = session.parse_payload()?;
    state.metrics.searches.inc();
    let resp = state.search.search(&req).await?;
    Ok(LmJson(resp))
}
