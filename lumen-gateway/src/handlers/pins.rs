//! Pin / unpin / ispinned.
//!
//! The unpin controller computes its flags and performs the row teardown
//! inside one transaction scope, so the last-owner decision always reads
//! the same snapshot it mutates. The CAS-daemon is only touched when the
//! wallet is the last logical owner across `wallet_roots ∪ wallet_pins`
//! under CID-variant expansion.

use std::sync::Arc;

use axum::{Extension, extract::State};
use serde_json::json;
use tracing::instrument;

use lumen_api_core::{
    error::{ApiError, ErrorKind},
    models::{CidRequest, IsPinnedResponse, PinResponse, UnpinResponse},
    server::LmJson,
};
use lumen_common::time::TimestampMs;
use lumen_store::queries;

use crate::{
    plan,
    state::{PqSession, RouterState},
};

fn require_cid(req: &CidRequest) -> Result<String, ApiError> {
    let cid = req
        .cid
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .ok_or_else(|| ApiError::new(ErrorKind::CidRequired))?;
    if lumen_common::cid::parse(cid).is_none() {
        return Err(ApiError::new(ErrorKind::CidInvalid));
    }
    Ok(cid.to_owned())
}

#[instrument(skip_all, name = "(pin)")]
pub async fn pin(
    State(state): State<Arc<RouterState>>,
    Extension(session): Extension<PqSession>,
) -> Result<LmJson<PinResponse>, ApiError> {
    let req: CidRequest = session.parse_payload()?;
    let cid = require_cid(&req)?;
    let wallet = session.wallet.as_str().to_owned();

    plan::ensure_chain_online(&state.chain_liveness, &state.chain).await?;
    state.plan.ensure_wallet_plan_ok(&wallet).await?;

    state.cas.pin_add(&cid).await.map_err(|e| {
        ApiError::with_msg(ErrorKind::IpfsPinFailed, e.to_string())
    })?;

    state
        .wallet_store
        .add_wallet_pin(wallet.clone(), cid.clone(), TimestampMs::now())
        .await
        .map_err(ApiError::internal)?;

    state.metrics.pins.inc();
    state
        .webhook
        .send("pin", json!({ "wallet": wallet, "cid": cid }));

    Ok(LmJson(PinResponse {
        ok: true,
        cid,
        wallet,
    }))
}

/// What the transactional flag computation decided.
enum UnpinAction {
    /// The wallet holds no reference; nothing changed.
    NoReference,
    /// Other owners remain; this wallet's rows were removed in the same
    /// transaction. The CAS-daemon is untouched.
    RowsRemoved,
    /// This wallet is the last logical owner; the daemon unpin happens
    /// outside the transaction, then the rows go.
    LastOwner,
}

#[instrument(skip_all, name = "(unpin)")]
pub async fn unpin(
    State(state): State<Arc<RouterState>>,
    Extension(session): Extension<PqSession>,
) -> Result<LmJson<UnpinResponse>, ApiError> {
    let req: CidRequest = session.parse_payload()?;
    let cid = require_cid(&req)?;
    let wallet = session.wallet.as_str().to_owned();

    plan::ensure_chain_online(&state.chain_liveness, &state.chain).await?;
    state.plan.ensure_wallet_plan_ok(&wallet).await?;

    let action = {
        let wallet = wallet.clone();
        let cid = cid.clone();
        state
            .wallet_store
            .with_txn(move |txn| {
                let has_pin =
                    queries::has_wallet_pin(txn, &wallet, &cid)?;
                let has_root =
                    queries::has_wallet_root(txn, &wallet, &cid)?;
                if !has_pin && !has_root {
                    // Idempotent: clear any lingering display name.
                    queries::clear_display_name(txn, &wallet, &cid)?;
                    return Ok(UnpinAction::NoReference);
                }

                let owners = queries::logical_owners(txn, &cid)?;
                if owners.len() > 1 {
                    queries::remove_wallet_refs(txn, &wallet, &cid)?;
                    Ok(UnpinAction::RowsRemoved)
                } else {
                    Ok(UnpinAction::LastOwner)
                }
            })
            .await
            .map_err(ApiError::internal)?
    };

    match action {
        UnpinAction::NoReference => {
            return Ok(LmJson(UnpinResponse {
                ok: true,
                cid,
                wallet,
                changed: Some(false),
            }));
        }
        UnpinAction::RowsRemoved => {}
        UnpinAction::LastOwner => {
            // Last owner: tear down the daemon pin first; on failure the
            // DB stays intact and the client can retry.
            state.cas.pin_rm(&cid).await.map_err(|e| {
                ApiError::with_msg(
                    ErrorKind::IpfsUnpinFailed,
                    e.to_string(),
                )
            })?;
            state
                .wallet_store
                .remove_wallet_refs(wallet.clone(), cid.clone())
                .await
                .map_err(ApiError::internal)?;
        }
    }

    state.metrics.unpins.inc();
    state
        .webhook
        .send("unpin", json!({ "wallet": wallet, "cid": cid }));

    Ok(LmJson(UnpinResponse {
        ok: true,
        cid,
        wallet,
        changed: Some(true),
    }))
}

#[instrument(skip_all, name = "(ispinned)")]
pub async fn ispinned(
    State(state): State<Arc<RouterState>>,
    Extension(session): Extension<PqSession>,
) -> Result<LmJson<IsPinnedResponse>, ApiError> {
    let req: CidRequest = session.parse_payload()?;
    let cid = require_cid(&req)?;
    let wallet = session.wallet.as_str().to_owned();

    let global =
        state.cas.is_pinned_recursive(&cid).await.map_err(|e| {
            ApiError::with_msg(ErrorKind::IpfsUnavailable, e.to_string())
        })?;

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

    // The wallet view never leaks cross-tenant pinning.
    Ok(LmJson(IsPinnedResponse {
        wallet,
        cid,
        pinned: global && (has_root || has_pin),
    }))
}
