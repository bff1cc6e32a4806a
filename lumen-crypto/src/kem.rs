//! The Kyber-768 KEM context.
//!
//! Loaded once at startup from the JSON file at `KYBER_KEY_PATH`; any
//! missing file, malformed field, or algorithm mismatch is fatal. The
//! context is immutable afterwards and shared by `Arc`.

use std::path::Path;

use anyhow::Context;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use pqcrypto_kyber::kyber768;
use pqcrypto_traits::kem::{
    Ciphertext as _, PublicKey as _, SecretKey as _, SharedSecret as _,
};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// The only KEM algorithm the gateway speaks.
pub const KEM_ALG: &str = "kyber768";

#[derive(Debug, Error)]
pub enum KemError {
    #[error("KEM ciphertext is malformed")]
    BadCiphertext,
}

/// On-disk key file shape.
#[derive(Deserialize)]
struct KeyFile {
    alg: String,
    key_id: String,
    pubkey: String,
    privkey: String,
}

pub struct KemContext {
    key_id: String,
    public: kyber768::PublicKey,
    secret: kyber768::SecretKey,
    /// base64 of the raw public key, served verbatim by `/pq/pub`.
    pubkey_b64: String,
    /// base64(sha256(pubkey bytes)), served by `/pq/pub` for pinning.
    pubkey_hash_b64: String,
}

impl std::fmt::Debug for KemContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KemContext")
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

impl KemContext {
    /// Load the keypair from the JSON file at `path`. Every failure mode is
    /// an error here and fatal in `main`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read(path).with_context(|| {
            format!("Failed to read KEM key file: {}", path.display())
        })?;
        let key_file: KeyFile = serde_json::from_slice(&raw)
            .context("KEM key file is not valid JSON")?;

        if key_file.alg != KEM_ALG {
            anyhow::bail!(
                "KEM key file algorithm mismatch: expected {KEM_ALG}, \
                 got {}",
                key_file.alg
            );
        }

        let pub_bytes = B64
            .decode(key_file.pubkey.as_bytes())
            .context("KEM pubkey is not valid base64")?;
        let priv_bytes = B64
            .decode(key_file.privkey.as_bytes())
            .context("KEM privkey is not valid base64")?;

        let public = kyber768::PublicKey::from_bytes(&pub_bytes)
            .map_err(|e| anyhow::anyhow!("Invalid Kyber-768 pubkey: {e}"))?;
        let secret = kyber768::SecretKey::from_bytes(&priv_bytes)
            .map_err(|e| anyhow::anyhow!("Invalid Kyber-768 privkey: {e}"))?;

        let pubkey_hash_b64 = B64.encode(Sha256::digest(&pub_bytes));

        Ok(Self {
            key_id: key_file.key_id,
            public,
            secret,
            pubkey_b64: B64.encode(&pub_bytes),
            pubkey_hash_b64,
        })
    }

    #[inline]
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    #[inline]
    pub fn pubkey_b64(&self) -> &str {
        &self.pubkey_b64
    }

    #[inline]
    pub fn pubkey_hash_b64(&self) -> &str {
        &self.pubkey_hash_b64
    }

    /// Decapsulate a KEM ciphertext into the 32-byte shared secret.
    pub fn decapsulate(&self, kem_ct: &[u8]) -> Result<Vec<u8>, KemError> {
        let ct = kyber768::Ciphertext::from_bytes(kem_ct)
            .map_err(|_| KemError::BadCiphertext)?;
        let ss = kyber768::decapsulate(&ct, &self.secret);
        Ok(ss.as_bytes().to_vec())
    }

    /// Encapsulate to this context's public key. The gateway itself never
    /// encapsulates; clients and tests do.
    pub fn encapsulate(&self) -> (Vec<u8>, Vec<u8>) {
        let (ss, ct) = kyber768::encapsulate(&self.public);
        (ss.as_bytes().to_vec(), ct.as_bytes().to_vec())
    }

    /// Generate a fresh context, for tests and key provisioning.
    pub fn generate(key_id: impl Into<String>) -> Self {
        let (public, secret) = kyber768::keypair();
        let pub_bytes = public.as_bytes().to_vec();
        Self {
            key_id: key_id.into(),
            public,
            secret,
            pubkey_b64: B64.encode(&pub_bytes),
            pubkey_hash_b64: B64.encode(Sha256::digest(&pub_bytes)),
        }
    }
}

#[cfg(test)]
mod test {
    use std::io::Write;

    use super::*;

    fn write_key_file(
        dir: &tempfile::TempDir,
        alg: &str,
    ) -> std::path::PathBuf {
        let (pk, sk) = kyber768::keypair();
        let json = serde_json::json!({
            "alg": alg,
            "key_id": "test-key-1",
            "pubkey": B64.encode(pk.as_bytes()),
            "privkey": B64.encode(sk.as_bytes()),
        });
        let path = dir.path().join("kyber.json");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(serde_json::to_vec(&json).unwrap().as_slice())
            .unwrap();
        path
    }

    #[test]
    fn load_and_decapsulate() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_key_file(&dir, KEM_ALG);
        let ctx = KemContext::load(&path).unwrap();
        assert_eq!(ctx.key_id(), "test-key-1");

        let (ss_client, kem_ct) = ctx.encapsulate();
        let ss_server = ctx.decapsulate(&kem_ct).unwrap();
        assert_eq!(ss_client, ss_server);
        assert_eq!(ss_server.len(), 32);
    }

    #[test]
    fn rejects_wrong_alg() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_key_file(&dir, "kyber1024");
        assert!(KemContext::load(&path).is_err());
    }

    #[test]
    fn rejects_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.json");
        assert!(KemContext::load(&path).is_err());
    }

    #[test]
    fn rejects_bad_kem_ct() {
        let ctx = KemContext::generate("k");
        assert!(ctx.decapsulate(&[0u8; 5]).is_err());
    }
}
