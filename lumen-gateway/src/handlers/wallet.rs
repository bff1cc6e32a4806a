//! Wallet-scoped routes: usage rollup, CID listing, display-name rename.

use std::sync::Arc;

use axum::{Extension, extract::State};
use tracing::{debug, instrument};

use lumen_api_core::{
    error::{ApiError, ErrorKind},
    models::{
        PlanInfo, RenameRequest, RenameResponse, UsageRollup,
        WalletCidEntry, WalletCidsRequest, WalletCidsResponse,
        WalletUsageResponse,
    },
    server::LmJson,
};
use lumen_common::time::TimestampMs;
use lumen_store::queries::CIDS_PAGE_SIZE;

use crate::state::{PqSession, RouterState};

#[instrument(skip_all, name = "(wallet-usage)")]
pub async fn usage(
    State(state): State<Arc<RouterState>>,
    Extension(session): Extension<PqSession>,
) -> Result<LmJson<WalletUsageResponse>, ApiError> {
    let wallet = session.wallet.as_str().to_owned();

    // Usage is read-only: prefer a fresh plan, fall back to the cached
    // wallet row when the chain is not answering.
    let plan = match state.plan.ensure_wallet_plan_ok(&wallet).await {
        Ok(plan) => Some(plan),
        Err(e) => {
            debug!("Plan refresh unavailable for usage rollup: {e}");
            state
                .wallet_store
                .get_wallet(wallet.clone())
                .await
                .map_err(ApiError::internal)?
                .and_then(|row| {
                    row.plan_id.map(|plan_id| PlanInfo {
                        plan_id,
                        expires_at_ms: row.plan_expires_at,
                        quota_bytes: None,
                    })
                })
        }
    };

    let summary = state
        .wallet_store
        .roots_summary(wallet.clone())
        .await
        .map_err(ApiError::internal)?;
    let pins = state
        .wallet_store
        .count_wallet_pins(wallet.clone())
        .await
        .map_err(ApiError::internal)?;

    Ok(LmJson(WalletUsageResponse {
        ok: true,
        wallet,
        plan,
        usage: UsageRollup {
            roots_total: summary.total,
            roots_active: summary.active,
            bytes_estimated: summary.bytes_estimated,
            pins,
        },
    }))
}

#[instrument(skip_all, name = "(wallet-cids)")]
pub async fn cids(
    State(state): State<Arc<RouterState>>,
    Extension(session): Extension<PqSession>,
) -> Result<LmJson<WalletCidsResponse>, ApiError> {
    let req: WalletCidsRequest = session.parse_payload()?;
    let page = req.page.unwrap_or(0);

    let entries = state
        .wallet_store
        .list_wallet_cids(session.wallet.as_str().to_owned(), page)
        .await
        .map_err(ApiError::internal)?;

    Ok(LmJson(WalletCidsResponse {
        ok: true,
        page,
        page_size: CIDS_PAGE_SIZE,
        cids: entries
            .into_iter()
            .map(|e| WalletCidEntry {
                cid: e.cid,
                source: e.source,
                created_at: e.created_at,
                bytes_estimated: e.bytes_estimated,
                display_name: e.display_name,
            })
            .collect(),
    }))
}

#[instrument(skip_all, name = "(wallet-cid-rename)")]
pub async fn rename(
    State(state): State<Arc<RouterState>>,
    Extension(session): Extension<PqSession>,
) -> Result<LmJson<RenameResponse>, ApiError> {
    let req: RenameRequest = session.parse_payload()?;
    let wallet = session.wallet.as_str().to_owned();

    let cid = req.cid.trim().to_owned();
    if cid.is_empty() {
        return Err(ApiError::new(ErrorKind::CidRequired));
    }
    let display_name = req.display_name.trim().to_owned();
    if display_name.is_empty() {
        return Err(ApiError::new(ErrorKind::NameRequired));
    }

    // Rename mutates wallet state, so the plan gate applies.
    state.plan.ensure_wallet_plan_ok(&wallet).await?;

    // Names attach only to CIDs the wallet actually references.
    let has_root = state
        .wallet_store
        .has_wallet_root(wallet.clone(), cid.clone())
        .await
        .map_err(ApiError::internal)?;
    let has_pin = state
        .wallet_store
        .has_wallet_pin(wallet.clone(), cid.clone())
        .await
        .map_err(ApiError::internal)?;
    if !has_root && !has_pin {
        return Err(ApiError::new(ErrorKind::CidNotFound));
    }

    state
        .wallet_store
        .set_display_name(
            wallet,
            cid,
            display_name.clone(),
            TimestampMs::now(),
        )
        .await
        .map_err(ApiError::internal)?;

    Ok(LmJson(RenameResponse {
        ok: true,
        display_name,
    }))
}
