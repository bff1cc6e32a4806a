//! Public (non-PQ) routes: health, status, the KEM pubkey, pricing,
//! metrics, and the swarm seed.

use std::{net::SocketAddr, sync::Arc};

use axum::extract::{ConnectInfo, State};
use tracing::{debug, instrument};

use lumen_api_core::{
    error::{ApiError, ErrorKind},
    models::{
        IpfsStatus, OkResponse, PqPubResponse, PricingPlan, SeedResponse,
        StatusResponse,
    },
    server::LmJson,
};
use lumen_common::time::TimestampMs;

use crate::{plan, state::RouterState};

#[instrument(skip_all, name = "(health)")]
pub async fn health() -> LmJson<OkResponse> {
    LmJson(OkResponse { ok: true })
}

#[instrument(skip_all, name = "(status)")]
pub async fn status(
    State(state): State<Arc<RouterState>>,
) -> LmJson<StatusResponse> {
    let online = plan::cas_online(&state.cas_liveness, &state.cas).await;
    LmJson(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_owned(),
        region: state.config.region.clone(),
        public: state.config.public_endpoint.clone(),
        ipfs: IpfsStatus { online },
        time: TimestampMs::now(),
    })
}

#[instrument(skip_all, name = "(pq-pub)")]
pub async fn pq_pub(
    State(state): State<Arc<RouterState>>,
) -> LmJson<PqPubResponse> {
    LmJson(PqPubResponse {
        alg: lumen_crypto::kem::KEM_ALG.to_owned(),
        key_id: state.kem.key_id().to_owned(),
        pubkey: state.kem.pubkey_b64().to_owned(),
        pubkey_hash: state.kem.pubkey_hash_b64().to_owned(),
    })
}

/// The plan catalog from the chain, or an empty array when the chain is
/// not answering; `/pricing` never fails over it.
#[instrument(skip_all, name = "(pricing)")]
pub async fn pricing(
    State(state): State<Arc<RouterState>>,
) -> LmJson<Vec<PricingPlan>> {
    let plans = match state.chain.params().await {
        Ok(params) => params
            .plans
            .iter()
            .filter_map(|raw| {
                let plan_id = raw
                    .get("plan_id")
                    .or_else(|| raw.get("id"))
                    .and_then(|v| match v {
                        serde_json::Value::String(s) => Some(s.clone()),
                        serde_json::Value::Number(n) =>
                            Some(n.to_string()),
                        _ => None,
                    })?;
                Some(PricingPlan {
                    plan_id,
                    storage_gb_per_month: raw
                        .get("storage_gb_per_month")
                        .and_then(as_flex_u64),
                    months_total: raw
                        .get("months_total")
                        .and_then(as_flex_u64),
                    price_ulmn: raw
                        .get("price_ulmn")
                        .and_then(|v| v.as_str())
                        .map(str::to_owned),
                })
            })
            .collect(),
        Err(e) => {
            debug!("Pricing unavailable, chain not answering: {e}");
            Vec::new()
        }
    };
    LmJson(plans)
}

fn as_flex_u64(v: &serde_json::Value) -> Option<u64> {
    v.as_u64().or_else(|| v.as_str()?.parse().ok())
}

/// Prometheus text exposition, for private peers only.
#[instrument(skip_all, name = "(metrics)")]
pub async fn metrics(
    State(state): State<Arc<RouterState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> Result<String, ApiError> {
    if !is_private_peer(&peer) {
        // Don't advertise the endpoint's existence to the internet.
        return Err(ApiError::new(ErrorKind::NotFound));
    }
    Ok(state.metrics.render())
}

fn is_private_peer(peer: &SocketAddr) -> bool {
    match peer.ip() {
        std::net::IpAddr::V4(ip) =>
            ip.is_loopback() || ip.is_private() || ip.is_link_local(),
        std::net::IpAddr::V6(ip) =>
            ip.is_loopback() || (ip.segments()[0] & 0xfe00) == 0xfc00,
    }
}

/// The CAS-daemon's peer id and its publicly usable multiaddrs.
#[instrument(skip_all, name = "(seed)")]
pub async fn seed(
    State(state): State<Arc<RouterState>>,
) -> Result<LmJson<SeedResponse>, ApiError> {
    let identity = state.cas.identity().await.map_err(|e| {
        ApiError::with_msg(ErrorKind::IpfsUnavailable, e.to_string())
    })?;
    let listen = state
        .cas
        .swarm_listen_addrs()
        .await
        .unwrap_or_default();

    let mut multiaddrs: Vec<String> = identity
        .addresses
        .iter()
        .chain(listen.iter())
        .filter(|addr| is_public_multiaddr(addr))
        .cloned()
        .collect();
    multiaddrs.sort();
    multiaddrs.dedup();

    if multiaddrs.is_empty() {
        return Err(ApiError::new(ErrorKind::NoUsableMultiaddrs));
    }

    Ok(LmJson(SeedResponse {
        peer_id: identity.id,
        multiaddrs,
    }))
}

/// Whether a multiaddr is usable by remote peers: loopback, RFC1918,
/// link-local, and ULA ranges are not.
pub fn is_public_multiaddr(addr: &str) -> bool {
    let mut parts = addr.split('/').skip(1);
    let (proto, host) = match (parts.next(), parts.next()) {
        (Some(proto), Some(host)) => (proto, host),
        _ => return false,
    };
    match proto {
        "ip4" => match host.parse::<std::net::Ipv4Addr>() {
            Ok(ip) => !(ip.is_loopback()
                || ip.is_private()
                || ip.is_link_local()
                || ip.is_unspecified()),
            Err(_) => false,
        },
        "ip6" => match host.parse::<std::net::Ipv6Addr>() {
            Ok(ip) => !(ip.is_loopback()
                || ip.is_unspecified()
                || (ip.segments()[0] & 0xfe00) == 0xfc00
                || (ip.segments()[0] & 0xffc0) == 0xfe80),
            Err(_) => false,
        },
        "dns" | "dns4" | "dns6" | "dnsaddr" => true,
        _ => false,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn multiaddr_filtering() {
        assert!(is_public_multiaddr("/ip4/203.0.113.7/tcp/4001"));
        assert!(is_public_multiaddr("/dns4/node.example.com/tcp/4001"));
        assert!(!is_public_multiaddr("/ip4/127.0.0.1/tcp/4001"));
        assert!(!is_public_multiaddr("/ip4/10.1.2.3/tcp/4001"));
        assert!(!is_public_multiaddr("/ip4/192.168.1.4/tcp/4001"));
        assert!(!is_public_multiaddr("/ip4/169.254.0.9/tcp/4001"));
        assert!(!is_public_multiaddr("/ip6/::1/tcp/4001"));
        assert!(!is_public_multiaddr("/ip6/fd00::1/tcp/4001"));
        assert!(!is_public_multiaddr("/ip6/fe80::1/tcp/4001"));
        assert!(is_public_multiaddr(
            "/ip6/2001:db8::1/tcp/4001"
        ));
        assert!(!is_public_multiaddr("garbage"));
    }

    #[test]
    fn private_peer_detection() {
        let private: SocketAddr = "127.0.0.1:9999".parse().unwrap();
        assert!(is_private_peer(&private));
        let rfc1918: SocketAddr = "10.0.0.5:80".parse().unwrap();
        assert!(is_private_peer(&rfc1918));
        let public: SocketAddr = "203.0.113.5:80".parse().unwrap();
        assert!(!is_private_peer(&public));
    }
}
