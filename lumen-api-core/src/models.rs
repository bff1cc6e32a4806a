//! Request / response bodies for every gateway route.
//!
//! Field names follow the wire contract exactly; where the contract uses
//! camelCase (`planId`, `displayName`, …) the serde rename says so and the
//! Rust field stays snake_case.

use serde::{Deserialize, Serialize};

use lumen_common::time::TimestampMs;

// --- /status --- //

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public: Option<String>,
    pub ipfs: IpfsStatus,
    pub time: TimestampMs,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IpfsStatus {
    pub online: bool,
}

// --- /pq/pub --- //

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PqPubResponse {
    pub alg: String,
    pub key_id: String,
    #[serde(rename = "pub")]
    pub pubkey: String,
    pub pubkey_hash: String,
}

// --- /pricing --- //

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PricingPlan {
    pub plan_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_gb_per_month: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub months_total: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_ulmn: Option<String>,
}

// --- /ipfs/seed --- //

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SeedResponse {
    #[serde(rename = "peerId")]
    pub peer_id: String,
    pub multiaddrs: Vec<String>,
}

// --- /pq/search --- //

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct SearchRequest {
    #[serde(default)]
    pub q: String,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub offset: Option<u32>,
    /// `facet=everything` widens the base kinds.
    #[serde(default)]
    pub facet: Option<String>,
    #[serde(default)]
    pub lang: Option<String>,
    /// `mode=sites` switches to site results.
    #[serde(default)]
    pub mode: Option<String>,
    /// `type=site` is equivalent to `mode=sites`.
    #[serde(default, rename = "type")]
    pub type_: Option<String>,
}

/// Bucketed ranking signals. The raw composite score is never exposed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RankSignals {
    pub popularity: SignalBucket,
    pub relevance: SignalBucket,
    pub freshness: SignalBucket,
    pub availability: SignalBucket,
    pub onchain: OnchainSignal,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalBucket {
    Low,
    Medium,
    High,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnchainSignal {
    Linked,
    None,
    Unknown,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchHitOut {
    pub cid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_cid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topics: Option<Vec<String>>,
    pub rank_signals: RankSignals,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SiteOut {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wallet: Option<String>,
    pub root_cid: String,
    pub entry_cid: String,
    pub entry_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
    pub rank_signals: RankSignals,
}

/// The executed plan, echoed so clients can see how the query was read.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchPlanOut {
    pub intent: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_kinds: Option<Vec<String>>,
    pub limit: u32,
    pub offset: u32,
    pub no_query: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchResponse {
    pub ok: bool,
    pub query: String,
    pub plan: SearchPlanOut,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<SearchHitOut>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sites: Option<Vec<SiteOut>>,
}

// --- /pq/ipfs and /pq/ipns --- //

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ProxyRequest {
    #[serde(default)]
    pub cid: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub query: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProxyResponse {
    pub ok: bool,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(with = "lumen_common::serde_helpers::b64")]
    pub body: Vec<u8>,
}

// --- /wallet/usage --- //

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WalletUsageResponse {
    pub ok: bool,
    pub wallet: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<PlanInfo>,
    pub usage: UsageRollup,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlanInfo {
    #[serde(rename = "planId")]
    pub plan_id: String,
    #[serde(rename = "expiresAtMs")]
    pub expires_at_ms: Option<i64>,
    #[serde(rename = "quotaBytes")]
    pub quota_bytes: Option<u64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UsageRollup {
    pub roots_total: u64,
    pub roots_active: u64,
    pub bytes_estimated: u64,
    pub pins: u64,
}

// --- /wallet/cids --- //

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct WalletCidsRequest {
    #[serde(default)]
    pub page: Option<u32>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WalletCidsResponse {
    pub ok: bool,
    pub page: u32,
    pub page_size: u32,
    pub cids: Vec<WalletCidEntry>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WalletCidEntry {
    pub cid: String,
    /// "root" or "pin"
    pub source: String,
    pub created_at: TimestampMs,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes_estimated: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

// --- /wallet/cid/rename --- //

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RenameRequest {
    pub cid: String,
    #[serde(rename = "displayName")]
    pub display_name: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RenameResponse {
    pub ok: bool,
    pub display_name: String,
}

// --- /pin, /unpin, /ispinned --- //

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CidRequest {
    #[serde(default)]
    pub cid: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PinResponse {
    pub ok: bool,
    pub cid: String,
    pub wallet: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UnpinResponse {
    pub ok: bool,
    pub cid: String,
    pub wallet: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub changed: Option<bool>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IsPinnedResponse {
    pub wallet: String,
    pub cid: String,
    pub pinned: bool,
}

// --- /ingest/* --- //

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IngestReadyResponse {
    pub ok: bool,
    pub wallet: String,
    pub status: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct IngestInitRequest {
    #[serde(default, rename = "planId")]
    pub plan_id: Option<String>,
    #[serde(default, rename = "estBytes")]
    pub est_bytes: Option<u64>,
    #[serde(default, rename = "displayName")]
    pub display_name: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IngestInitResponse {
    pub ok: bool,
    pub upload_token: String,
    #[serde(rename = "planId")]
    pub plan_id: String,
    pub wallet: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IngestCarResponse {
    pub ok: bool,
    /// Always empty in the immediate response; roots are recorded by the
    /// background import.
    pub roots: Vec<String>,
    pub meta: IngestCarMeta,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IngestCarMeta {
    #[serde(rename = "jobId")]
    pub job_id: String,
    pub wallet: String,
    #[serde(rename = "planId")]
    pub plan_id: String,
    #[serde(rename = "uploadedBytes")]
    pub uploaded_bytes: u64,
}

// --- misc --- //

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OkResponse {
    pub ok: bool,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn camel_case_wire_names() {
        let init = IngestInitRequest {
            plan_id: Some("basic".to_owned()),
            est_bytes: Some(42),
            display_name: Some("my site".to_owned()),
        };
        let json = serde_json::to_value(&init).unwrap();
        assert_eq!(json["planId"], "basic");
        assert_eq!(json["estBytes"], 42);
        assert_eq!(json["displayName"], "my site");

        let meta = IngestCarMeta {
            job_id: "j1".to_owned(),
            wallet: "lmn1xyz".to_owned(),
            plan_id: "basic".to_owned(),
            uploaded_bytes: 7,
        };
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["jobId"], "j1");
        assert_eq!(json["uploadedBytes"], 7);
    }

    #[test]
    fn pq_pub_uses_pub_field() {
        let resp = PqPubResponse {
            alg: "kyber768".to_owned(),
            key_id: "k1".to_owned(),
            pubkey: "AAAA".to_owned(),
            pubkey_hash: "BBBB".to_owned(),
        };
        let json = serde_json::to_value(&resp).unwrap();
        assert!(json.get("pub").is_some());
        assert!(json.get("pubkey").is_none());
    }

    #[test]
    fn search_request_accepts_type_alias() {
        let req: SearchRequest =
            serde_json::from_str(r#"{"q":"docs","type":"site"}"#).unwrap();
        assert_eq!(req.type_.as_deref(), Some("site"));
    }
}
