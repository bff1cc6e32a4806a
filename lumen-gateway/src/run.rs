//! Gateway initialization and the run loop.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::{info, info_span, instrument};

use lumen_clients::{
    cas::CasClient, chain::ChainClient, indexer::IndexerClient,
};
use lumen_crypto::{kem::KemContext, replay::NonceCache};
use lumen_store::{UsageStore, WalletStore};
use lumen_tokio::{
    notify_once::NotifyOnce,
    task::{self, LmTask},
};

use crate::{
    cli::ResolvedArgs,
    ingest::{IngestDeps, spawn_ingest_worker},
    metrics::Metrics,
    plan::{LivenessCache, PlanValidator},
    search::{SearchService, linkage::LinkResolver, sites::SiteResolver},
    server,
    state::RouterState,
    webhook::WebhookSender,
};

/// Query timeout for the indexer and chain clients.
const QUERY_TIMEOUT: Duration = Duration::from_secs(3);
/// Cadence of the background maintenance sweep (usage retention, nonce
/// cache).
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(3600);
/// Time limit for graceful shutdown.
const SHUTDOWN_TIME_LIMIT: Duration = Duration::from_secs(10);

pub struct Gateway {
    listen_addr: SocketAddr,
    static_tasks: Vec<LmTask<()>>,
    shutdown: NotifyOnce,
}

impl Gateway {
    #[instrument(skip_all, name = "(gateway)")]
    pub async fn init(args: ResolvedArgs) -> anyhow::Result<Self> {
        let config = Arc::new(args.config);

        // The KEM keypair is load-or-die: a gateway that can't open
        // envelopes must not come up.
        let kem = Arc::new(
            KemContext::load(&config.kyber_key_path)
                .context("Failed to load the Kyber-768 key file")?,
        );
        info!(key_id = %kem.key_id(), "Loaded KEM context");

        let wallet_store = WalletStore::open(
            &config.wallet_db_path,
            config.sqlite_busy_timeout,
        )
        .context("Failed to open wallet DB")?;
        let usage_store = UsageStore::open(
            &config.usage_db_path,
            config.sqlite_busy_timeout,
        )
        .context("Failed to open usage DB")?;

        tokio::fs::create_dir_all(&config.ingest_tmp_dir)
            .await
            .context("Failed to create INGEST_TMP_DIR")?;

        let cas = Arc::new(CasClient::new(
            config.kubo_api_base.trim_end_matches('/').to_owned(),
            config.ipfs_gateway_base.trim_end_matches('/').to_owned(),
            config.kubo_request_timeout,
            config.kubo_import_timeout,
        ));
        let indexer = Arc::new(IndexerClient::new(
            config.indexer_base_url.trim_end_matches('/').to_owned(),
            QUERY_TIMEOUT,
        ));
        let chain = Arc::new(ChainClient::new(
            config.chain_rest_base_url.trim_end_matches('/').to_owned(),
            QUERY_TIMEOUT,
        ));

        let metrics = Arc::new(Metrics::new());
        let webhook =
            WebhookSender::new(config.webhook_url.clone(), metrics.clone());

        let link = Arc::new(LinkResolver::new(
            chain.clone(),
            cas.clone(),
            indexer.clone(),
            wallet_store.clone(),
        ));
        let sites = SiteResolver::new(
            cas.clone(),
            indexer.clone(),
            wallet_store.clone(),
            link.clone(),
        );
        let search = SearchService::new(
            indexer.clone(),
            wallet_store.clone(),
            usage_store.clone(),
            link.clone(),
            sites,
        );

        let shutdown = NotifyOnce::new();
        let mut static_tasks = Vec::with_capacity(3);

        let (ingest_queue, ingest_task) = spawn_ingest_worker(
            IngestDeps {
                cas: cas.clone(),
                store: wallet_store.clone(),
                webhook: webhook.clone(),
                metrics: metrics.clone(),
            },
            shutdown.clone(),
        );
        static_tasks.push(ingest_task);

        let plan =
            PlanValidator::new(chain.clone(), wallet_store.clone());

        let state = Arc::new(RouterState {
            config: config.clone(),
            kem,
            nonces: NonceCache::new(),
            wallet_store,
            usage_store,
            cas,
            indexer,
            chain,
            plan,
            chain_liveness: LivenessCache::new(),
            cas_liveness: LivenessCache::new(),
            tokens: crate::ingest::TokenRegistry::new(),
            ingest_queue,
            search,
            webhook,
            metrics,
        });

        static_tasks.push(spawn_maintenance_task(
            state.clone(),
            shutdown.clone(),
        ));

        let listen_addr: SocketAddr =
            ([0, 0, 0, 0], config.port).into();
        let listener = tokio::net::TcpListener::bind(listen_addr)
            .await
            .with_context(|| {
                format!("Failed to bind {listen_addr}")
            })?;
        let local_addr = listener
            .local_addr()
            .context("Could not read bound address")?;
        info!("Gateway listening on http://{local_addr}");

        let router = server::router(state);
        let server_shutdown = shutdown.clone();
        let server_task = LmTask::spawn_with_span(
            "(server)",
            info_span!("(server)"),
            async move {
                let serve = axum::serve(
                    listener,
                    router.into_make_service_with_connect_info::<SocketAddr>(
                    ),
                )
                .with_graceful_shutdown(server_shutdown.recv_owned());
                if let Err(e) = serve.await {
                    tracing::error!("Server exited with error: {e:#}");
                }
            },
        );
        static_tasks.push(server_task);

        Ok(Self {
            listen_addr: local_addr,
            static_tasks,
            shutdown,
        })
    }

    pub fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }

    pub fn shutdown_channel(&self) -> NotifyOnce {
        self.shutdown.clone()
    }

    /// Run until a shutdown signal; optionally install a Ctrl+C handler.
    #[instrument(skip_all, name = "(gateway)")]
    pub async fn run(self, spawn_ctrlc_handler: bool) -> anyhow::Result<()> {
        if spawn_ctrlc_handler {
            LmTask::spawn("ctrlc-handler", {
                let shutdown = self.shutdown.clone();
                async move {
                    use tokio::signal::ctrl_c;

                    info!("Press Ctrl+C to shut down.");
                    ctrl_c().await.expect("Error receiving first CTRL+C");
                    info!(
                        "CTRL+C received, starting graceful shutdown. \
                         Hit CTRL+C again to quit immediately."
                    );
                    shutdown.send();
                    ctrl_c().await.expect("Error receiving second CTRL+C");
                    std::process::exit(1);
                }
            })
            .detach();
        }

        let (_eph_tasks_tx, eph_tasks_rx) = mpsc::channel(1);
        task::try_join_tasks_and_shutdown(
            self.static_tasks,
            eph_tasks_rx,
            self.shutdown,
            SHUTDOWN_TIME_LIMIT,
        )
        .await
        .context("Error awaiting tasks")?;

        Ok(())
    }
}

/// Hourly sweep: purge stale usage rows and expired nonces.
fn spawn_maintenance_task(
    state: Arc<RouterState>,
    mut shutdown: NotifyOnce,
) -> LmTask<()> {
    LmTask::spawn_with_span(
        "(maintenance)",
        info_span!("(maintenance)"),
        async move {
            let mut interval =
                tokio::time::interval(MAINTENANCE_INTERVAL);
            interval.tick().await; // immediate first tick
            loop {
                tokio::select! {
                    biased;
                    () = shutdown.recv() => break,
                    _ = interval.tick() => {}
                }

                let now = lumen_common::time::TimestampMs::now();
                state.nonces.sweep(now);
                match state.usage_store.purge_stale(now).await {
                    Ok(0) => {}
                    Ok(purged) =>
                        info!(purged, "Purged stale usage rows"),
                    Err(e) =>
                        tracing::warn!("Usage purge failed: {e}"),
                }
            }
        },
    )
}
