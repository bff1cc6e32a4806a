//! The PQ envelope middleware.
//!
//! Every wallet-state-touching route passes through here: the outer
//! envelope is decapsulated, opened, and verified, the request gains a
//! [`PqSession`], and the handler's JSON response (success *or* error) is
//! sealed with the session key. Authentication failures themselves are
//! returned unsealed since no trusted key was established.

use std::{sync::Arc, time::Duration};

use axum::{
    body::Body,
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use http::header::CONTENT_TYPE;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use lumen_api_core::error::{ApiError, ErrorKind};
use lumen_common::{addr::WalletAddress, time::TimestampMs};
use lumen_crypto::{
    envelope::{
        self, EnvelopeError, OuterEnvelope, SessionKey,
    },
    sig,
};

use crate::state::{PqSession, RouterState};

/// The PQ protocol headers.
pub const HEADER_PQ: &str = "x-lumen-pq";
pub const HEADER_KEM: &str = "x-lumen-kem";
pub const HEADER_KEY_ID: &str = "x-lumen-keyid";

/// Envelope timestamps may skew at most this far from gateway time.
const TIMESTAMP_WINDOW: Duration = Duration::from_secs(5 * 60);
/// PQ envelope bodies are control-plane JSON; cap them well below the CAR
/// ingest limits.
const MAX_ENVELOPE_BYTES: usize = 8 * (1 << 20);

pub async fn pq_envelope_middleware(
    State(state): State<Arc<RouterState>>,
    req: Request,
    next: Next,
) -> Response {
    let (mut parts, body) = req.into_parts();

    let session = match decode_envelope(&state, &parts, body).await {
        Ok(session) => session,
        // No authenticated session: the error envelope goes out in the
        // clear.
        Err(err) => return err.into_response(),
    };

    // Wallet rows are created lazily on first authenticated action.
    if let Err(e) = state
        .wallet_store
        .upsert_wallet(session.wallet.as_str().to_owned())
        .await
    {
        warn!("Failed to upsert wallet row: {e}");
    }

    parts.extensions.insert(session.clone());
    let req = Request::from_parts(parts, Body::empty());
    let resp = next.run(req).await;
    seal_response(resp, &session.key).await
}

async fn decode_envelope(
    state: &RouterState,
    parts: &http::request::Parts,
    body: Body,
) -> Result<PqSession, ApiError> {
    let header = |name: &str| {
        parts
            .headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
    };

    if header(HEADER_PQ) != Some("v1") {
        return Err(ApiError::with_msg(
            ErrorKind::PqRequired,
            "This route requires the PQ envelope (X-Lumen-PQ: v1)",
        ));
    }
    if header(HEADER_KEM) != Some("kyber768") {
        return Err(ApiError::with_msg(
            ErrorKind::PqUnsupportedKem,
            "Only kyber768 is supported",
        ));
    }
    if let Some(key_id) = header(HEADER_KEY_ID) {
        if key_id != state.kem.key_id() {
            return Err(ApiError::new(ErrorKind::PqKeyMismatch));
        }
    }

    let body_bytes = axum::body::to_bytes(body, MAX_ENVELOPE_BYTES)
        .await
        .map_err(|e| {
            ApiError::with_msg(
                ErrorKind::PqBadBody,
                format!("Could not read request body: {e}"),
            )
        })?;
    debug!(
        body_sha256 = %hex::encode(Sha256::digest(&body_bytes)),
        body_len = body_bytes.len(),
        "PQ request body received"
    );

    let outer: OuterEnvelope = serde_json::from_slice(&body_bytes)
        .map_err(|e| {
            ApiError::with_msg(
                ErrorKind::PqBadBody,
                format!("Body is not a PQ envelope: {e}"),
            )
        })?;

    if outer.kem_ct.is_empty() {
        return Err(ApiError::new(ErrorKind::PqInvalidKemCt));
    }
    if outer.iv.len() != envelope::IV_LEN {
        return Err(ApiError::new(ErrorKind::PqInvalidIv));
    }
    if outer.tag.len() != envelope::TAG_LEN {
        return Err(ApiError::new(ErrorKind::PqInvalidTag));
    }
    if outer.ciphertext.is_empty() {
        return Err(ApiError::new(ErrorKind::PqInvalidCiphertext));
    }

    let shared_secret =
        state.kem.decapsulate(&outer.kem_ct).map_err(|_| {
            ApiError::new(ErrorKind::PqDecapsulateFailed)
        })?;
    let key = SessionKey::derive(&shared_secret);

    let plaintext = key
        .open(&outer.iv, &outer.ciphertext, &outer.tag)
        .map_err(|e| match e {
            EnvelopeError::BadIv => ApiError::new(ErrorKind::PqInvalidIv),
            EnvelopeError::BadTag =>
                ApiError::new(ErrorKind::PqInvalidTag),
            _ => ApiError::new(ErrorKind::PqDecryptFailed),
        })?;

    let inner = envelope::parse_inner(&plaintext)
        .map_err(|_| ApiError::new(ErrorKind::PqBadEnvelope))?;

    // --- inner envelope validation --- //

    let wallet_str = inner
        .wallet
        .as_deref()
        .ok_or_else(|| ApiError::new(ErrorKind::WalletRequired))?;
    let wallet = WalletAddress::parse(wallet_str, &state.config.addr_hrp)
        .map_err(|e| {
            ApiError::with_msg(ErrorKind::WalletInvalid, e.to_string())
        })?;

    let timestamp = inner.timestamp.ok_or_else(|| {
        ApiError::with_details(
            ErrorKind::AuthFailed,
            "Envelope is missing a timestamp",
            "timestamp_missing",
        )
    })?;
    let now = TimestampMs::now();
    if now.abs_diff(TimestampMs(timestamp)) > TIMESTAMP_WINDOW {
        return Err(ApiError::with_details(
            ErrorKind::AuthFailed,
            "Envelope timestamp is outside the acceptance window",
            "timestamp_out_of_window",
        ));
    }

    let nonce = inner.nonce.as_deref().ok_or_else(|| {
        ApiError::with_details(
            ErrorKind::AuthFailed,
            "Envelope is missing a nonce",
            "nonce_missing",
        )
    })?;
    let signature = inner.signature.as_deref().ok_or_else(|| {
        ApiError::with_details(
            ErrorKind::AuthFailed,
            "Envelope is missing a signature",
            "signature_missing",
        )
    })?;
    let pubkey = inner.pubkey.as_deref().ok_or_else(|| {
        ApiError::with_details(
            ErrorKind::AuthFailed,
            "Envelope is missing a pubkey",
            "pubkey_missing",
        )
    })?;

    // --- signature verification --- //

    let payload_hash = envelope::payload_hash(inner.payload.as_ref());
    let canonical = envelope::canonical_string(
        parts.method.as_str(),
        parts.uri.path(),
        nonce,
        timestamp,
        &payload_hash,
    );

    sig::verify_canonical_signature(&canonical, signature, pubkey)
        .map_err(|e| {
        ApiError::with_details(
            ErrorKind::AuthFailed,
            "Signature verification failed",
            e.to_string(),
        )
    })?;

    let derived =
        sig::derive_wallet_address(pubkey, &state.config.addr_hrp)
            .map_err(|e| {
                ApiError::with_details(
                    ErrorKind::AuthFailed,
                    "Could not derive wallet from pubkey",
                    e.to_string(),
                )
            })?;
    if derived != wallet {
        return Err(ApiError::with_details(
            ErrorKind::AuthFailed,
            "Envelope wallet does not match the signing key",
            "wallet_mismatch",
        ));
    }

    // Atomic insert-if-absent: of N identical nonces in flight, exactly
    // one passes.
    if !state.nonces.insert_if_absent(nonce, now) {
        return Err(ApiError::with_details(
            ErrorKind::AuthFailed,
            "Nonce was already used",
            "nonce_replay",
        ));
    }

    Ok(PqSession {
        wallet,
        payload: inner.payload,
        key,
    })
}

/// Seal the handler's JSON response with the request's session key,
/// preserving the status code.
async fn seal_response(resp: Response, key: &SessionKey) -> Response {
    let (parts, body) = resp.into_parts();
    let body_bytes =
        match axum::body::to_bytes(body, MAX_ENVELOPE_BYTES * 4).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Could not buffer response for sealing: {e}");
                return ApiError::new(ErrorKind::PqEncryptFailed)
                    .into_response();
            }
        };

    let sealed = match key.seal(&body_bytes) {
        Ok(sealed) => sealed,
        Err(_) => {
            return ApiError::new(ErrorKind::PqEncryptFailed)
                .into_response();
        }
    };

    let json = match serde_json::to_vec(&sealed) {
        Ok(json) => json,
        Err(e) => {
            warn!("Could not serialize sealed response: {e}");
            return ApiError::new(ErrorKind::PqEncryptFailed)
                .into_response();
        }
    };

    let mut builder = Response::builder()
        .status(parts.status)
        .header(CONTENT_TYPE, "application/json");
    if let Some(headers) = builder.headers_mut() {
        for (name, value) in parts.headers.iter() {
            if name != CONTENT_TYPE && name != http::header::CONTENT_LENGTH
            {
                headers.insert(name.clone(), value.clone());
            }
        }
    }
    builder
        .body(Body::from(json))
        .unwrap_or_else(|e| {
            warn!("Could not rebuild sealed response: {e}");
            ApiError::new(ErrorKind::PqEncryptFailed).into_response()
        })
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use base64::Engine;
    use base64::engine::general_purpose::STANDARD as B64;
    use secp256k1::{PublicKey, Secp256k1, SecretKey};
    use serde_json::json;

    use lumen_clients::{
        cas::CasClient, chain::ChainClient, indexer::IndexerClient,
    };
    use lumen_common::config::Config;
    use lumen_crypto::kem::KemContext;
    use lumen_store::{UsageStore, WalletStore};
    use lumen_tokio::notify_once::NotifyOnce;

    use crate::{
        ingest::{IngestDeps, TokenRegistry, spawn_ingest_worker},
        metrics::Metrics,
        plan::{LivenessCache, PlanValidator},
        search::{
            SearchService, linkage::LinkResolver, sites::SiteResolver,
        },
        webhook::WebhookSender,
    };

    use super::*;

    fn test_config(dir: &tempfile::TempDir) -> Config {
        Config {
            port: 0,
            region: None,
            public_endpoint: None,
            addr_hrp: "lmn".to_owned(),
            kubo_api_base: "http://127.0.0.1:1".to_owned(),
            ipfs_gateway_base: "http://127.0.0.1:1".to_owned(),
            indexer_base_url: "http://127.0.0.1:1".to_owned(),
            chain_rest_base_url: "http://127.0.0.1:1".to_owned(),
            wallet_db_path: dir.path().join("wallets.sqlite3"),
            usage_db_path: dir.path().join("usage.sqlite3"),
            sqlite_busy_timeout: Duration::from_millis(500),
            ingest_tmp_dir: dir.path().to_path_buf(),
            ingest_max_bytes: 1024,
            kubo_request_timeout: Duration::from_millis(200),
            kubo_import_timeout: Duration::from_millis(200),
            kyber_key_path: dir.path().join("kyber.json"),
            view_min_balance_ulmn: None,
            webhook_url: None,
        }
    }

    /// A state wired to unreachable collaborators; the decode path never
    /// talks to any of them.
    fn test_state(dir: &tempfile::TempDir) -> Arc<RouterState> {
        let config = Arc::new(test_config(dir));
        let kem = Arc::new(KemContext::generate("test-key-1"));
        let wallet_store = WalletStore::open(
            &config.wallet_db_path,
            config.sqlite_busy_timeout,
        )
        .unwrap();
        let usage_store = UsageStore::open(
            &config.usage_db_path,
            config.sqlite_busy_timeout,
        )
        .unwrap();
        let cas = Arc::new(CasClient::new(
            config.kubo_api_base.clone(),
            config.ipfs_gateway_base.clone(),
            config.kubo_request_timeout,
            config.kubo_import_timeout,
        ));
        let indexer = Arc::new(IndexerClient::new(
            config.indexer_base_url.clone(),
            Duration::from_millis(200),
        ));
        let chain = Arc::new(ChainClient::new(
            config.chain_rest_base_url.clone(),
            Duration::from_millis(200),
        ));
        let metrics = Arc::new(Metrics::new());
        let webhook = WebhookSender::new(None, metrics.clone());
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
            link,
            sites,
        );
        let (ingest_queue, ingest_task) = spawn_ingest_worker(
            IngestDeps {
                cas: cas.clone(),
                store: wallet_store.clone(),
                webhook: webhook.clone(),
                metrics: metrics.clone(),
            },
            NotifyOnce::new(),
        );
        ingest_task.detach();

        Arc::new(RouterState {
            config,
            kem,
            nonces: lumen_crypto::replay::NonceCache::new(),
            plan: PlanValidator::new(chain.clone(), wallet_store.clone()),
            wallet_store,
            usage_store,
            cas,
            indexer,
            chain,
            chain_liveness: LivenessCache::new(),
            cas_liveness: LivenessCache::new(),
            tokens: TokenRegistry::new(),
            ingest_queue,
            search,
            webhook,
            metrics,
        })
    }

    /// Client-side envelope construction for a given nonce/timestamp.
    fn build_envelope(
        state: &RouterState,
        method: &str,
        path: &str,
        payload: serde_json::Value,
        nonce: &str,
        timestamp: i64,
    ) -> (Vec<u8>, String) {
        let secp = Secp256k1::new();
        let sk = SecretKey::from_slice(&[0x42u8; 32]).unwrap();
        let pk = PublicKey::from_secret_key(&secp, &sk);
        let pk_hex = hex::encode(pk.serialize());
        let wallet = sig::derive_wallet_address(&pk_hex, "lmn").unwrap();

        let payload_hash = envelope::payload_hash(Some(&payload));
        let canonical = envelope::canonical_string(
            method,
            path,
            nonce,
            timestamp,
            &payload_hash,
        );
        let digest: [u8; 32] =
            Sha256::digest(canonical.as_bytes()).into();
        let sig = secp.sign_ecdsa(
            &secp256k1::Message::from_digest(digest),
            &sk,
        );

        let inner = json!({
            "wallet": wallet.as_str(),
            "payload": payload,
            "signature": hex::encode(sig.serialize_compact()),
            "timestamp": timestamp,
            "nonce": nonce,
            "pubkey": pk_hex,
        });

        let (shared_secret, kem_ct) = state.kem.encapsulate();
        let key = SessionKey::derive(&shared_secret);
        let sealed = key.seal(inner.to_string().as_bytes()).unwrap();

        let outer = json!({
            "kem_ct": B64.encode(&kem_ct),
            "ciphertext": B64.encode(&sealed.ciphertext),
            "iv": B64.encode(&sealed.iv),
            "tag": B64.encode(&sealed.tag),
        });
        (outer.to_string().into_bytes(), wallet.as_str().to_owned())
    }

    fn request_parts(path: &str) -> http::request::Parts {
        let (parts, ()) = http::Request::builder()
            .method("POST")
            .uri(path)
            .header("x-lumen-pq", "v1")
            .header("x-lumen-kem", "kyber768")
            .body(())
            .unwrap()
            .into_parts();
        parts
    }

    #[tokio::test]
    async fn happy_path_envelope_decodes() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir);
        let now = TimestampMs::now().as_i64();
        let (body, wallet) = build_envelope(
            &state,
            "POST",
            "/ingest/init",
            json!({ "planId": "basic" }),
            "n1",
            now,
        );

        let parts = request_parts("/ingest/init");
        let session =
            decode_envelope(&state, &parts, Body::from(body))
                .await
                .expect("Envelope should decode");
        assert_eq!(session.wallet.as_str(), wallet);
        assert_eq!(
            session.payload.unwrap()["planId"],
            serde_json::Value::String("basic".to_owned())
        );
    }

    #[tokio::test]
    async fn nonce_replay_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir);
        let now = TimestampMs::now().as_i64();
        let (body, _) = build_envelope(
            &state,
            "POST",
            "/ingest/init",
            json!({ "planId": "basic" }),
            "replayed-nonce",
            now,
        );

        let parts = request_parts("/ingest/init");
        decode_envelope(&state, &parts, Body::from(body.clone()))
            .await
            .expect("First use succeeds");

        let err = decode_envelope(&state, &parts, Body::from(body))
            .await
            .expect_err("Replay must fail");
        assert_eq!(err.kind, ErrorKind::AuthFailed);
        assert_eq!(err.details.as_deref(), Some("nonce_replay"));
    }

    #[tokio::test]
    async fn stale_timestamp_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir);
        let stale =
            TimestampMs::now().as_i64() - 6 * 60 * 1000; // 6 min ago
        let (body, _) = build_envelope(
            &state,
            "POST",
            "/pin",
            json!({ "cid": "x" }),
            "n2",
            stale,
        );

        let parts = request_parts("/pin");
        let err = decode_envelope(&state, &parts, Body::from(body))
            .await
            .expect_err("Stale timestamp must fail");
        assert_eq!(err.kind, ErrorKind::AuthFailed);
        assert_eq!(
            err.details.as_deref(),
            Some("timestamp_out_of_window")
        );
    }

    #[tokio::test]
    async fn wrong_path_in_signature_fails() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir);
        let now = TimestampMs::now().as_i64();
        // Signed for /unpin but sent to /pin.
        let (body, _) = build_envelope(
            &state,
            "POST",
            "/unpin",
            json!({ "cid": "x" }),
            "n3",
            now,
        );

        let parts = request_parts("/pin");
        let err = decode_envelope(&state, &parts, Body::from(body))
            .await
            .expect_err("Path mismatch must fail");
        assert_eq!(err.kind, ErrorKind::AuthFailed);
    }

    #[tokio::test]
    async fn missing_headers_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir);

        let (parts, ()) = http::Request::builder()
            .method("POST")
            .uri("/pin")
            .body(())
            .unwrap()
            .into_parts();
        let err =
            decode_envelope(&state, &parts, Body::from("{}".to_owned()))
                .await
                .expect_err("Missing headers must fail");
        assert_eq!(err.kind, ErrorKind::PqRequired);

        let (parts, ()) = http::Request::builder()
            .method("POST")
            .uri("/pin")
            .header("x-lumen-pq", "v1")
            .header("x-lumen-kem", "kyber1024")
            .body(())
            .unwrap()
            .into_parts();
        let err =
            decode_envelope(&state, &parts, Body::from("{}".to_owned()))
                .await
                .expect_err("Wrong KEM must fail");
        assert_eq!(err.kind, ErrorKind::PqUnsupportedKem);
    }

    #[tokio::test]
    async fn key_id_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir);

        let (parts, ()) = http::Request::builder()
            .method("POST")
            .uri("/pin")
            .header("x-lumen-pq", "v1")
            .header("x-lumen-kem", "kyber768")
            .header("x-lumen-keyid", "some-other-key")
            .body(())
            .unwrap()
            .into_parts();
        let err =
            decode_envelope(&state, &parts, Body::from("{}".to_owned()))
                .await
                .expect_err("Key id mismatch must fail");
        assert_eq!(err.kind, ErrorKind::PqKeyMismatch);
    }
}
