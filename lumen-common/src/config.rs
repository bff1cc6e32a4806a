//! The gateway's typed configuration, resolved once at startup.
//!
//! Every knob is an environment variable (a `.env` file is honored by the
//! binary before this runs). The resolved [`Config`] is immutable and passed
//! by `Arc` to each component; nothing re-reads the environment after
//! startup.

use std::{env, path::PathBuf, time::Duration};

use anyhow::Context;

/// Default HTTP listen port.
pub const DEFAULT_PORT: u16 = 8787;
/// Default human-readable prefix for wallet addresses.
pub const DEFAULT_ADDR_HRP: &str = "lmn";
/// Default cap on a single CAR upload: 500 MiB.
pub const DEFAULT_INGEST_MAX_BYTES: u64 = 500 * (1 << 20);
/// Default timeout for ordinary CAS-daemon requests.
pub const DEFAULT_KUBO_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
/// Default timeout for CAS-daemon DAG imports.
pub const DEFAULT_KUBO_IMPORT_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Clone, Debug)]
pub struct Config {
    /// `PORT`: HTTP listen port.
    pub port: u16,
    /// `REGION`: operator-declared region label surfaced in `/status`.
    pub region: Option<String>,
    /// `PUBLIC_ENDPOINT`: the externally reachable URL of this gateway.
    pub public_endpoint: Option<String>,
    /// `ADDR_HRP`: bech32 human-readable prefix for wallet addresses.
    pub addr_hrp: String,

    /// `KUBO_API_BASE`: base URL of the CAS-daemon HTTP API.
    pub kubo_api_base: String,
    /// `IPFS_GATEWAY_BASE`: base URL of the CAS-daemon content gateway.
    pub ipfs_gateway_base: String,
    /// `INDEXER_BASE_URL`: base URL of the content indexer.
    pub indexer_base_url: String,
    /// `CHAIN_REST_BASE_URL`: base URL of the chain REST API.
    pub chain_rest_base_url: String,

    /// `NODE_API_WALLET_DB_PATH`: SQLite file for the wallet DB.
    pub wallet_db_path: PathBuf,
    /// `NODE_API_USAGE_DB_PATH`: SQLite file for the usage DB.
    pub usage_db_path: PathBuf,
    /// `NODE_API_SQLITE_BUSY_TIMEOUT_MS`
    pub sqlite_busy_timeout: Duration,

    /// `INGEST_TMP_DIR`: spool directory for CAR uploads.
    pub ingest_tmp_dir: PathBuf,
    /// `INGEST_MAX_BYTES`: hard cap on a single CAR upload.
    pub ingest_max_bytes: u64,

    /// `KUBO_REQUEST_TIMEOUT_MS`
    pub kubo_request_timeout: Duration,
    /// `KUBO_IMPORT_TIMEOUT_MS`
    pub kubo_import_timeout: Duration,

    /// `KYBER_KEY_PATH`: JSON file holding the Kyber-768 KEM keypair.
    /// Required; startup is fatal without it.
    pub kyber_key_path: PathBuf,

    /// `VIEW_MIN_BALANCE_ULMN`: minimum `ulmn` balance required to proxy
    /// content views, when set.
    pub view_min_balance_ulmn: Option<u128>,

    /// `WEBHOOK_URL`: where mutation events are posted, when set.
    pub webhook_url: Option<String>,
}

impl Config {
    /// Resolve the full configuration from the process environment.
    pub fn from_env() -> anyhow::Result<Self> {
        let port = parse_var("PORT")?.unwrap_or(DEFAULT_PORT);
        let region = string_var("REGION");
        let public_endpoint = string_var("PUBLIC_ENDPOINT");
        let addr_hrp = string_var("ADDR_HRP")
            .unwrap_or_else(|| DEFAULT_ADDR_HRP.to_owned());

        let kubo_api_base = string_var("KUBO_API_BASE")
            .unwrap_or_else(|| "http://127.0.0.1:5001".to_owned());
        let ipfs_gateway_base = string_var("IPFS_GATEWAY_BASE")
            .unwrap_or_else(|| "http://127.0.0.1:8080".to_owned());
        let indexer_base_url = string_var("INDEXER_BASE_URL")
            .unwrap_or_else(|| "http://127.0.0.1:7700".to_owned());
        let chain_rest_base_url = string_var("CHAIN_REST_BASE_URL")
            .unwrap_or_else(|| "http://127.0.0.1:1317".to_owned());

        let wallet_db_path = string_var("NODE_API_WALLET_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("lumen-wallets.sqlite3"));
        let usage_db_path = string_var("NODE_API_USAGE_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("lumen-usage.sqlite3"));
        let sqlite_busy_timeout = Duration::from_millis(
            parse_var("NODE_API_SQLITE_BUSY_TIMEOUT_MS")?.unwrap_or(5_000),
        );

        let ingest_tmp_dir = string_var("INGEST_TMP_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(env::temp_dir);
        let ingest_max_bytes = parse_var("INGEST_MAX_BYTES")?
            .unwrap_or(DEFAULT_INGEST_MAX_BYTES);

        let kubo_request_timeout = parse_var("KUBO_REQUEST_TIMEOUT_MS")?
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_KUBO_REQUEST_TIMEOUT);
        let kubo_import_timeout = parse_var("KUBO_IMPORT_TIMEOUT_MS")?
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_KUBO_IMPORT_TIMEOUT);

        let kyber_key_path = string_var("KYBER_KEY_PATH")
            .map(PathBuf::from)
            .context("KYBER_KEY_PATH is required")?;

        let view_min_balance_ulmn = parse_var("VIEW_MIN_BALANCE_ULMN")?;

        let webhook_url = string_var("WEBHOOK_URL");

        Ok(Self {
            port,
            region,
            public_endpoint,
            addr_hrp,
            kubo_api_base,
            ipfs_gateway_base,
            indexer_base_url,
            chain_rest_base_url,
            wallet_db_path,
            usage_db_path,
            sqlite_busy_timeout,
            ingest_tmp_dir,
            ingest_max_bytes,
            kubo_request_timeout,
            kubo_import_timeout,
            kyber_key_path,
            view_min_balance_ulmn,
            webhook_url,
        })
    }
}

/// Read an env var as a trimmed non-empty string.
fn string_var(name: &str) -> Option<String> {
    match env::var(name) {
        Ok(value) => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_owned())
            }
        }
        Err(_) => None,
    }
}

/// Read and parse an env var, erroring on a present-but-unparseable value.
fn parse_var<T: std::str::FromStr>(name: &str) -> anyhow::Result<Option<T>>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match string_var(name) {
        Some(value) => {
            let parsed = value
                .parse::<T>()
                .with_context(|| format!("Invalid value for {name}"))?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}
