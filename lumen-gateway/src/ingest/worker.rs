//! The delayed background import worker.
//!
//! Jobs are enqueued after the upload body has been fully spooled and the
//! 200 response sent; from that point the job is committed and client
//! cancellation cannot reach it. A single FIFO worker sleeps a uniform
//! random 100–5000 ms per job (decorrelating DAG imports from control-plane
//! events), streams the spool into the CAS-daemon, records the resulting
//! roots, and always deletes the spool.

use std::{ops::RangeInclusive, path::PathBuf, sync::Arc, time::Duration};

use lumen_clients::cas::{self, CasClient};
use lumen_common::time::TimestampMs;
use lumen_store::WalletStore;
use lumen_tokio::{notify_once::NotifyOnce, task::LmTask};
use rand::Rng;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{info, info_span, warn};

use crate::{metrics::Metrics, webhook::WebhookSender};

/// Per-job import delay bounds, sampled uniformly and independently.
const DELAY_MS: RangeInclusive<u64> = 100..=5000;

#[derive(Debug)]
pub struct IngestJob {
    pub job_id: String,
    pub spool_path: PathBuf,
    pub wallet: String,
    pub plan_id: String,
    pub display_name: Option<String>,
    pub uploaded_bytes: u64,
    pub content_type: Option<String>,
}

/// Enqueue side of the FIFO. Enqueueing returns immediately; the job id was
/// synthesized by the caller.
#[derive(Clone)]
pub struct IngestQueue {
    tx: mpsc::UnboundedSender<IngestJob>,
}

impl IngestQueue {
    pub fn enqueue(&self, job: IngestJob) {
        if self.tx.send(job).is_err() {
            warn!("Ingest worker is gone; dropping job");
        }
    }
}

pub struct IngestDeps {
    pub cas: Arc<CasClient>,
    pub store: WalletStore,
    pub webhook: WebhookSender,
    pub metrics: Arc<Metrics>,
}

/// Spawn the single ingest worker. Returns the queue handle and the worker
/// task (a static task joined at shutdown).
pub fn spawn_ingest_worker(
    deps: IngestDeps,
    mut shutdown: NotifyOnce,
) -> (IngestQueue, LmTask<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<IngestJob>();

    let task = LmTask::spawn_with_span(
        "(ingest-worker)",
        info_span!("(ingest-worker)"),
        async move {
            loop {
                let job = tokio::select! {
                    biased;
                    () = shutdown.recv() => break,
                    maybe_job = rx.recv() => match maybe_job {
                        Some(job) => job,
                        None => break,
                    },
                };

                let delay_ms = rand::thread_rng().gen_range(DELAY_MS);
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;

                let spool = job.spool_path.clone();
                if let Err(e) = run_job(&deps, job).await {
                    warn!("Ingest job failed: {e}");
                }
                // The spool is deleted whether the import succeeded or
                // not; failed imports are not retried, clients re-upload.
                if let Err(e) = tokio::fs::remove_file(&spool).await {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        warn!(
                            spool = %spool.display(),
                            "Failed to delete spool file: {e}"
                        );
                    }
                }
            }
            info!("Ingest worker stopped");
        },
    );

    (IngestQueue { tx }, task)
}

async fn run_job(deps: &IngestDeps, job: IngestJob) -> anyhow::Result<()> {
    let file = tokio::fs::File::open(&job.spool_path).await?;
    let ndjson = deps
        .cas
        .dag_import(file, job.content_type.as_deref())
        .await
        .map_err(|e| anyhow::anyhow!("dag/import failed: {e}"))?;

    let roots = cas::parse_import_roots(&ndjson);
    info!(
        job_id = %job.job_id,
        wallet = %job.wallet,
        uploaded_bytes = job.uploaded_bytes,
        roots = roots.len(),
        "DAG import complete"
    );

    deps.metrics.record_ingest(job.uploaded_bytes);

    if !roots.is_empty() {
        deps.store
            .add_or_update_wallet_roots(
                job.wallet.clone(),
                roots.clone(),
                job.uploaded_bytes,
                TimestampMs::now(),
            )
            .await?;

        if let Some(display_name) = &job.display_name {
            for root in &roots {
                // Best-effort metadata; never fails the job.
                if let Err(e) = deps
                    .store
                    .set_display_name(
                        job.wallet.clone(),
                        root.clone(),
                        display_name.clone(),
                        TimestampMs::now(),
                    )
                    .await
                {
                    warn!(%root, "Failed to set display name: {e}");
                }
            }
        }
    }

    deps.webhook.send(
        "ingest",
        json!({
            "wallet": job.wallet,
            "planId": job.plan_id,
            "uploadedBytes": job.uploaded_bytes,
            "roots": roots,
        }),
    );

    Ok(())
}
