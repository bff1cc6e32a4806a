//! Plan validation against the chain, and the cached liveness gates.

use std::{
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use lumen_api_core::{
    error::{ApiError, ErrorKind},
    models::PlanInfo,
};
use lumen_clients::{cas::CasClient, chain::ChainClient};
use lumen_common::time::TimestampMs;
use lumen_store::WalletStore;
use tracing::{debug, warn};

/// How long a successful plan check on the wallet row stays fresh.
pub const PLAN_CACHE_TTL: Duration = Duration::from_secs(10 * 60);
/// Chain / CAS liveness probes are cached this long.
pub const LIVENESS_TTL: Duration = Duration::from_secs(60);
/// Fallback when the chain params omit `month_seconds` (30 days).
const DEFAULT_MONTH_SECONDS: u64 = 30 * 24 * 3600;

pub struct PlanValidator {
    chain: Arc<ChainClient>,
    store: WalletStore,
    ttl: Duration,
}

impl PlanValidator {
    pub fn new(chain: Arc<ChainClient>, store: WalletStore) -> Self {
        Self {
            chain,
            store,
            ttl: PLAN_CACHE_TTL,
        }
    }

    #[cfg(test)]
    pub fn with_ttl(
        chain: Arc<ChainClient>,
        store: WalletStore,
        ttl: Duration,
    ) -> Self {
        Self { chain, store, ttl }
    }

    /// Ensure the wallet has a valid plan, consulting the cached wallet row
    /// first and the chain on a miss. Chain fetch failures surface as
    /// `chain_unreachable`; callers refuse the mutation with 503.
    pub async fn ensure_wallet_plan_ok(
        &self,
        wallet: &str,
    ) -> Result<PlanInfo, ApiError> {
        let now = TimestampMs::now();

        // Fresh cached plan on the wallet row?
        if let Some(row) = self
            .store
            .get_wallet(wallet.to_owned())
            .await
            .map_err(ApiError::internal)?
        {
            let fresh = now.saturating_since(row.last_chain_check_at)
                < self.ttl;
            if fresh {
                if let Some(plan_id) = row.plan_id {
                    debug!(%wallet, %plan_id, "Plan check satisfied by cache");
                    return Ok(PlanInfo {
                        plan_id,
                        expires_at_ms: row.plan_expires_at,
                        quota_bytes: None,
                    });
                }
            }
        }

        let contracts =
            self.chain.contracts(wallet).await.map_err(|e| {
                ApiError::with_msg(
                    ErrorKind::ChainUnreachable,
                    format!("Could not fetch contracts: {e}"),
                )
            })?;

        // Prefer ACTIVE contracts; fall back to the full list if none are.
        let active: Vec<_> = contracts
            .iter()
            .filter(|c| {
                c.status
                    .as_deref()
                    .is_some_and(|s| s.to_uppercase().contains("ACTIVE"))
            })
            .collect();
        let pool: Vec<_> = if active.is_empty() {
            contracts.iter().collect()
        } else {
            active
        };

        let Some(contract) =
            pool.into_iter().max_by_key(|c| c.id_u64().unwrap_or(0))
        else {
            return Err(ApiError::with_msg(
                ErrorKind::PlanValidationFailed,
                "Wallet has no storage contract",
            ));
        };

        let plan_id = contract
            .plan_id
            .clone()
            .or_else(|| contract.id_u64().map(|id| id.to_string()))
            .ok_or_else(|| {
                ApiError::with_msg(
                    ErrorKind::PlanValidationFailed,
                    "Contract has no usable plan id",
                )
            })?;

        let month_seconds = self
            .chain
            .params()
            .await
            .map_err(|e| {
                ApiError::with_msg(
                    ErrorKind::ChainUnreachable,
                    format!("Could not fetch chain params: {e}"),
                )
            })?
            .month_seconds_u64()
            .unwrap_or(DEFAULT_MONTH_SECONDS);

        let start = contract.start_seconds_u64().unwrap_or(0);
        let months = contract.months_total_u64().unwrap_or(0);
        let expires_at_ms =
            ((start + months * month_seconds) as i64).saturating_mul(1000);
        let quota_bytes = contract
            .storage_gb_per_month_u64()
            .map(|gb| gb.saturating_mul(1 << 30));

        self.store
            .update_plan(
                wallet.to_owned(),
                Some(plan_id.clone()),
                Some(expires_at_ms),
                now,
            )
            .await
            .map_err(ApiError::internal)?;

        Ok(PlanInfo {
            plan_id,
            expires_at_ms: Some(expires_at_ms),
            quota_bytes,
        })
    }
}

// --- liveness gates --- //

/// A cached boolean probe with a TTL: chain liveness for `/pin`, CAS
/// liveness for `/status`.
pub struct LivenessCache {
    ttl: Duration,
    state: Mutex<Option<(Instant, bool)>>,
}

impl LivenessCache {
    pub fn new() -> Self {
        Self {
            ttl: LIVENESS_TTL,
            state: Mutex::new(None),
        }
    }

    fn cached(&self) -> Option<bool> {
        let state = self.state.lock().expect("Liveness cache poisoned");
        state.and_then(|(at, online)| {
            (at.elapsed() < self.ttl).then_some(online)
        })
    }

    fn store(&self, online: bool) {
        let mut state =
            self.state.lock().expect("Liveness cache poisoned");
        *state = Some((Instant::now(), online));
    }
}

impl Default for LivenessCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Gate for mutating ops: the chain must have answered a probe within the
/// TTL. Refuses with `chain_unreachable` otherwise.
pub async fn ensure_chain_online(
    cache: &LivenessCache,
    chain: &ChainClient,
) -> Result<(), ApiError> {
    if let Some(online) = cache.cached() {
        return if online {
            Ok(())
        } else {
            Err(ApiError::new(ErrorKind::ChainUnreachable))
        };
    }

    let online = match chain.params().await {
        Ok(_) => true,
        Err(e) => {
            warn!("Chain liveness probe failed: {e}");
            false
        }
    };
    cache.store(online);
    if online {
        Ok(())
    } else {
        Err(ApiError::new(ErrorKind::ChainUnreachable))
    }
}

/// Whether the CAS-daemon is answering; used by `/status`.
pub async fn cas_online(cache: &LivenessCache, cas: &CasClient) -> bool {
    if let Some(online) = cache.cached() {
        return online;
    }
    let online = cas.version().await.is_ok();
    cache.store(online);
    online
}
