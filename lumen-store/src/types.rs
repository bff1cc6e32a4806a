//! Row types returned by the stores.

use lumen_common::time::TimestampMs;

#[derive(Clone, Debug, PartialEq)]
pub struct WalletRow {
    pub wallet: String,
    pub plan_id: Option<String>,
    pub plan_expires_at: Option<i64>,
    pub last_chain_check_at: TimestampMs,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RootsSummary {
    pub total: u64,
    pub active: u64,
    pub bytes_estimated: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CidListEntry {
    pub cid: String,
    /// "root" or "pin"
    pub source: String,
    pub created_at: TimestampMs,
    pub bytes_estimated: Option<u64>,
    pub display_name: Option<String>,
}

/// Wallet-scoped usage stats for a CID, feeding the availability signal.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct CidUsageStats {
    pub ok_wallets: u64,
    pub total_wallets: u64,
}
