//! Ingest routes: readiness, token issuance, and the CAR upload itself.

use std::sync::Arc;

use axum::{
    Extension,
    body::Body,
    extract::{Query, State},
};
use futures::StreamExt;
use http::HeaderMap;
use rand::RngCore;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument, warn};

use lumen_api_core::{
    error::{ApiError, ErrorKind},
    models::{
        IngestCarMeta, IngestCarResponse, IngestInitRequest,
        IngestInitResponse, IngestReadyResponse,
    },
    server::LmJson,
};
use lumen_common::time::TimestampMs;

use crate::{
    ingest::{IngestJob, spool_path},
    state::{PqSession, RouterState},
};

#[instrument(skip_all, name = "(ingest-ready)")]
pub async fn ready(
    Extension(session): Extension<PqSession>,
) -> LmJson<IngestReadyResponse> {
    LmJson(IngestReadyResponse {
        ok: true,
        wallet: session.wallet.as_str().to_owned(),
        status: "ready".to_owned(),
    })
}

#[instrument(skip_all, name = "(ingest-init)")]
pub async fn init(
    State(state): State<Arc<RouterState>>,
    Extension(session): Extension<PqSession>,
) -> Result<LmJson<IngestInitResponse>, ApiError> {
    let req: IngestInitRequest = session.parse_payload()?;
    let wallet = session.wallet.as_str().to_owned();

    // No token without a valid plan.
    let plan = state.plan.ensure_wallet_plan_ok(&wallet).await?;
    let plan_id = req.plan_id.unwrap_or(plan.plan_id);

    let upload_token = state.tokens.issue(
        wallet.clone(),
        plan_id.clone(),
        req.est_bytes,
        req.display_name,
    );

    Ok(LmJson(IngestInitResponse {
        ok: true,
        upload_token,
        plan_id,
        wallet,
    }))
}

#[derive(Deserialize)]
pub struct CarQuery {
    #[serde(default)]
    token: Option<String>,
    #[serde(default, rename = "planId")]
    plan_id: Option<String>,
}

/// The CAR upload: consume the token, re-validate the plan, stream the
/// body to a spool file under the size cap, and enqueue the background
/// import. The 200 response commits the job; the client never waits for
/// the DAG import.
#[instrument(skip_all, name = "(ingest-car)")]
pub async fn car(
    State(state): State<Arc<RouterState>>,
    Query(query): Query<CarQuery>,
    headers: HeaderMap,
    body: Body,
) -> Result<LmJson<IngestCarResponse>, ApiError> {
    let token = query
        .token
        .as_deref()
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::new(ErrorKind::UploadTokenRequired))?;

    // Atomic get-and-delete; a second upload with the same token fails
    // here no matter how the first one ended.
    let entry = state
        .tokens
        .consume(token)
        .ok_or_else(|| ApiError::new(ErrorKind::UploadTokenInvalid))?;

    // Plan re-validation between init and upload.
    state.plan.ensure_wallet_plan_ok(&entry.wallet).await?;

    let content_type = headers
        .get(http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    let max_bytes = state.config.ingest_max_bytes;
    let path = spool_path(
        &state.config.ingest_tmp_dir,
        TimestampMs::now().as_i64(),
    );

    let mut file =
        tokio::fs::File::create(&path).await.map_err(|e| {
            ApiError::internal(format!(
                "Could not create spool file: {e}"
            ))
        })?;

    let mut written: u64 = 0;
    let mut over_cap = false;
    let mut stream = body.into_data_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                drop(file);
                remove_spool(&path).await;
                return Err(ApiError::with_msg(
                    ErrorKind::BadRequest,
                    format!("Upload stream failed: {e}"),
                ));
            }
        };

        if over_cap {
            // Past the cap: drain the remainder without writing.
            continue;
        }
        if written + chunk.len() as u64 > max_bytes {
            over_cap = true;
            continue;
        }

        if let Err(e) = file.write_all(&chunk).await {
            drop(file);
            remove_spool(&path).await;
            return Err(ApiError::internal(format!(
                "Spool write failed: {e}"
            )));
        }
        written += chunk.len() as u64;
    }

    if over_cap {
        drop(file);
        remove_spool(&path).await;
        return Err(ApiError::with_msg(
            ErrorKind::CarTooLarge,
            "CAR exceeds the maximum upload size",
        )
        .with_data("max_bytes", max_bytes));
    }

    if let Err(e) = file.flush().await {
        drop(file);
        remove_spool(&path).await;
        return Err(ApiError::internal(format!("Spool flush failed: {e}")));
    }
    drop(file);

    let mut job_bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut job_bytes);
    let job_id = format!("job-{}", hex::encode(job_bytes));

    // The token's plan wins; the `planId` query param is advisory.
    let plan_id = entry.plan_id.clone();
    debug!(
        %job_id,
        wallet = %entry.wallet,
        uploaded_bytes = written,
        est_bytes = ?entry.est_bytes,
        query_plan = ?query.plan_id,
        "CAR spooled; enqueueing import"
    );

    state.ingest_queue.enqueue(IngestJob {
        job_id: job_id.clone(),
        spool_path: path,
        wallet: entry.wallet.clone(),
        plan_id: plan_id.clone(),
        display_name: entry.display_name,
        uploaded_bytes: written,
        content_type,
    });

    Ok(LmJson(IngestCarResponse {
        ok: true,
        roots: Vec::new(),
        meta: IngestCarMeta {
            job_id,
            wallet: entry.wallet,
            plan_id,
            uploaded_bytes: written,
        },
    }))
}

async fn remove_spool(path: &std::path::Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), "Failed to delete spool: {e}");
        }
    }
}
