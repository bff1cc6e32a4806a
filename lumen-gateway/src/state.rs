//! Shared router state: every injected service the handlers touch.

use std::sync::Arc;

use lumen_clients::{
    cas::CasClient, chain::ChainClient, indexer::IndexerClient,
};
use lumen_common::{addr::WalletAddress, config::Config};
use lumen_crypto::{envelope::SessionKey, kem::KemContext, replay::NonceCache};
use lumen_store::{UsageStore, WalletStore};

use crate::{
    ingest::{IngestQueue, TokenRegistry},
    metrics::Metrics,
    plan::{LivenessCache, PlanValidator},
    search::SearchService,
    webhook::WebhookSender,
};

pub struct RouterState {
    pub config: Arc<Config>,
    pub kem: Arc<KemContext>,
    pub nonces: NonceCache,

    pub wallet_store: WalletStore,
    pub usage_store: UsageStore,

    pub cas: Arc<CasClient>,
    pub indexer: Arc<IndexerClient>,
    pub chain: Arc<ChainClient>,

    pub plan: PlanValidator,
    pub chain_liveness: LivenessCache,
    pub cas_liveness: LivenessCache,

    pub tokens: TokenRegistry,
    pub ingest_queue: IngestQueue,

    pub search: SearchService,

    pub webhook: WebhookSender,
    pub metrics: Arc<Metrics>,
}

/// Authenticated PQ request context, inserted into request extensions by
/// the envelope middleware and consumed by handlers and the response
/// sealer.
#[derive(Clone, Debug)]
pub struct PqSession {
    pub wallet: WalletAddress,
    pub payload: Option<serde_json::Value>,
    pub key: SessionKey,
}

impl PqSession {
    /// Deserialize the decrypted payload into a request model. A missing
    /// payload reads as JSON `null`, letting `Option`-heavy models default.
    pub fn parse_payload<T: serde::de::DeserializeOwned>(
        &self,
    ) -> Result<T, lumen_api_core::error::ApiError> {
        let value = self
            .payload
            .clone()
            .unwrap_or(serde_json::Value::Null);
        serde_json::from_value(value).map_err(|e| {
            lumen_api_core::error::ApiError::with_msg(
                lumen_api_core::error::ErrorKind::PqBadEnvelope,
                format!("Payload does not match request shape: {e}"),
            )
        })
    }
}
