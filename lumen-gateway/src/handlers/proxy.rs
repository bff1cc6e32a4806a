//! Authenticated content proxy: `/pq/ipfs` and `/pq/ipns`.
//!
//! These record a view event per (cid, wallet) and, when
//! `VIEW_MIN_BALANCE_ULMN` is configured, require the wallet's balance to
//! meet it before any bytes are served.

use std::sync::Arc;

use axum::{Extension, extract::State};
use tracing::{instrument, warn};

use lumen_api_core::{
    error::{ApiError, ErrorKind},
    models::{ProxyRequest, ProxyResponse},
    server::LmJson,
};
use lumen_common::time::TimestampMs;

use crate::state::{PqSession, RouterState};

const VIEW_DENOM: &str = "ulmn";

#[instrument(skip_all, name = "(proxy-ipfs)")]
pub async fn pq_ipfs(
    State(state): State<Arc<RouterState>>,
    Extension(session): Extension<PqSession>,
) -> Result<LmJson<ProxyResponse>, ApiError> {
    let req: ProxyRequest = session.parse_payload()?;
    let cid = req
        .cid
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .ok_or_else(|| ApiError::new(ErrorKind::CidRequired))?;
    if lumen_common::cid::parse(cid).is_none() {
        return Err(ApiError::new(ErrorKind::CidInvalid));
    }

    let ipfs_path = format!("/ipfs/{cid}{}", normalize_path(&req.path));
    proxy_fetch(&state, &session, cid, &ipfs_path, req.query.as_deref())
        .await
}

#[instrument(skip_all, name = "(proxy-ipns)")]
pub async fn pq_ipns(
    State(state): State<Arc<RouterState>>,
    Extension(session): Extension<PqSession>,
) -> Result<LmJson<ProxyResponse>, ApiError> {
    let req: ProxyRequest = session.parse_payload()?;
    let name = req
        .name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| ApiError::new(ErrorKind::NameRequired))?;

    let ipns_path = format!("/ipns/{name}{}", normalize_path(&req.path));
    proxy_fetch(&state, &session, name, &ipns_path, req.query.as_deref())
        .await
}

async fn proxy_fetch(
    state: &RouterState,
    session: &PqSession,
    usage_key: &str,
    gateway_path: &str,
    query: Option<&str>,
) -> Result<LmJson<ProxyResponse>, ApiError> {
    let wallet = session.wallet.as_str().to_owned();

    // Balance-gated viewing, when configured.
    if let Some(min_balance) = state.config.view_min_balance_ulmn {
        let balance = state
            .chain
            .balance(&wallet, VIEW_DENOM)
            .await
            .map_err(|e| {
                ApiError::with_msg(
                    ErrorKind::ChainUnreachable,
                    format!("Could not check balance: {e}"),
                )
            })?;
        if balance < min_balance {
            return Err(ApiError::with_msg(
                ErrorKind::PlanValidationFailed,
                "Balance is below the view minimum",
            ));
        }
    }

    let raw = state
        .cas
        .gateway_fetch(gateway_path, query)
        .await
        .map_err(|e| {
            record_view(state, usage_key, &wallet, 0, false);
            ApiError::with_msg(ErrorKind::IpfsGatewayError, e.to_string())
        })?;

    let ok = (200..300).contains(&raw.status);
    record_view(state, usage_key, &wallet, raw.status, ok);
    state.metrics.views.inc();

    Ok(LmJson(ProxyResponse {
        ok,
        status: raw.status,
        content_type: raw.content_type,
        body: raw.body.to_vec(),
    }))
}

/// Best-effort usage bookkeeping; never fails the proxy response.
fn record_view(
    state: &RouterState,
    key: &str,
    wallet: &str,
    status: u16,
    ok: bool,
) {
    let usage = state.usage_store.clone();
    let key = key.to_owned();
    let wallet = wallet.to_owned();
    lumen_tokio::task::LmTask::spawn_unnamed(async move {
        if let Err(e) = usage
            .record_view(key, wallet, status, ok, TimestampMs::now())
            .await
        {
            warn!("Failed to record view event: {e}");
        }
    })
    .detach();
}

fn normalize_path(path: &Option<String>) -> String {
    match path.as_deref().map(str::trim) {
        None | Some("") => String::new(),
        Some(p) if p.starts_with('/') => p.to_owned(),
        Some(p) => format!("/{p}"),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn path_normalization() {
        assert_eq!(normalize_path(&None), "");
        assert_eq!(normalize_path(&Some(String::new())), "");
        assert_eq!(
            normalize_path(&Some("sub/index.html".to_owned())),
            "/sub/index.html"
        );
        assert_eq!(
            normalize_path(&Some("/already".to_owned())),
            "/already"
        );
    }
}
