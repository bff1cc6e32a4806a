//! PQ envelope open/seal.
//!
//! The outer envelope carries `{kem_ct, ciphertext, iv, tag}` (all base64).
//! Decapsulating `kem_ct` yields the shared secret; the AES-256-GCM key is
//! `HKDF-SHA256(salt=∅, ikm=secret, info="lumen-authwallet-v1", L=32)`. The
//! same derived key seals the response with a fresh random IV.

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit, Payload},
};
use hkdf::Hkdf;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use lumen_common::serde_helpers::b64;

/// HKDF domain separation label for the control-plane envelope.
pub const HKDF_INFO: &[u8] = b"lumen-authwallet-v1";
/// AES-256-GCM parameters.
pub const IV_LEN: usize = 12;
pub const TAG_LEN: usize = 16;
pub const KEY_LEN: usize = 32;

#[derive(Debug, Error, PartialEq)]
pub enum EnvelopeError {
    #[error("envelope iv must be {IV_LEN} bytes")]
    BadIv,
    #[error("envelope tag must be {TAG_LEN} bytes")]
    BadTag,
    #[error("envelope failed to decrypt")]
    DecryptFailed,
    #[error("response failed to encrypt")]
    EncryptFailed,
    #[error("inner envelope is not valid JSON")]
    BadInner,
}

/// The outer (wire) envelope of every PQ-mandatory request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OuterEnvelope {
    #[serde(with = "b64")]
    pub kem_ct: Vec<u8>,
    #[serde(with = "b64")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "b64")]
    pub iv: Vec<u8>,
    #[serde(with = "b64")]
    pub tag: Vec<u8>,
}

/// The decrypted inner envelope.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InnerEnvelope {
    #[serde(default)]
    pub wallet: Option<String>,
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
    #[serde(default)]
    pub signature: Option<String>,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub nonce: Option<String>,
    #[serde(default)]
    pub pubkey: Option<String>,
}

/// A sealed response body: `{ciphertext, iv, tag}` (all base64).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SealedResponse {
    #[serde(with = "b64")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "b64")]
    pub iv: Vec<u8>,
    #[serde(with = "b64")]
    pub tag: Vec<u8>,
}

/// An AES-256-GCM session key derived from a KEM shared secret. Kept on the
/// request for response sealing.
#[derive(Clone)]
pub struct SessionKey([u8; KEY_LEN]);

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

impl SessionKey {
    /// Derive the session key from the decapsulated shared secret.
    pub fn derive(shared_secret: &[u8]) -> Self {
        let hk = Hkdf::<Sha256>::new(None, shared_secret);
        let mut okm = [0u8; KEY_LEN];
        hk.expand(HKDF_INFO, &mut okm)
            .expect("32 bytes is a valid HKDF-SHA256 output length");
        Self(okm)
    }

    /// Open the request ciphertext, yielding the inner envelope plaintext.
    pub fn open(
        &self,
        iv: &[u8],
        ciphertext: &[u8],
        tag: &[u8],
    ) -> Result<Vec<u8>, EnvelopeError> {
        if iv.len() != IV_LEN {
            return Err(EnvelopeError::BadIv);
        }
        if tag.len() != TAG_LEN {
            return Err(EnvelopeError::BadTag);
        }

        let cipher = Aes256Gcm::new_from_slice(&self.0)
            .expect("Key length is static");

        // aes-gcm expects ciphertext || tag
        let mut ct_and_tag = Vec::with_capacity(ciphertext.len() + TAG_LEN);
        ct_and_tag.extend_from_slice(ciphertext);
        ct_and_tag.extend_from_slice(tag);

        cipher
            .decrypt(
                Nonce::from_slice(iv),
                Payload {
                    msg: &ct_and_tag,
                    aad: &[],
                },
            )
            .map_err(|_| EnvelopeError::DecryptFailed)
    }

    /// Seal a response body with a fresh random IV.
    pub fn seal(
        &self,
        plaintext: &[u8],
    ) -> Result<SealedResponse, EnvelopeError> {
        let mut iv = vec![0u8; IV_LEN];
        rand::thread_rng().fill_bytes(&mut iv);

        let cipher = Aes256Gcm::new_from_slice(&self.0)
            .expect("Key length is static");
        let mut ct_and_tag = cipher
            .encrypt(
                Nonce::from_slice(&iv),
                Payload {
                    msg: plaintext,
                    aad: &[],
                },
            )
            .map_err(|_| EnvelopeError::EncryptFailed)?;

        let tag = ct_and_tag.split_off(ct_and_tag.len() - TAG_LEN);
        Ok(SealedResponse {
            ciphertext: ct_and_tag,
            iv,
            tag,
        })
    }
}

/// Parse the decrypted plaintext as the inner envelope.
pub fn parse_inner(plaintext: &[u8]) -> Result<InnerEnvelope, EnvelopeError> {
    serde_json::from_slice(plaintext).map_err(|_| EnvelopeError::BadInner)
}

/// Canonical JSON: recursively key-sorted, no whitespace. `serde_json`'s
/// default map is ordered, so serializing a `Value` is already canonical.
pub fn canonical_json(payload: Option<&serde_json::Value>) -> String {
    let value = payload.unwrap_or(&serde_json::Value::Null);
    serde_json::to_string(value)
        .expect("Serializing a serde_json::Value cannot fail")
}

/// `hex(sha256(canonicalJSON(payload ?? null)))`
pub fn payload_hash(payload: Option<&serde_json::Value>) -> String {
    hex::encode(Sha256::digest(canonical_json(payload).as_bytes()))
}

/// The string the wallet signs: `METHOD|PATH|nonce|timestamp|payloadHash`.
pub fn canonical_string(
    method: &str,
    path: &str,
    nonce: &str,
    timestamp: i64,
    payload_hash: &str,
) -> String {
    format!("{method}|{path}|{nonce}|{timestamp}|{payload_hash}")
}

#[cfg(test)]
mod test {
    use proptest::{arbitrary::any, collection::vec, proptest};

    use super::*;

    #[test]
    fn seal_open_roundtrip() {
        let key = SessionKey::derive(&[7u8; 32]);
        let sealed = key.seal(b"{\"ok\":true}").unwrap();
        assert_eq!(sealed.iv.len(), IV_LEN);
        assert_eq!(sealed.tag.len(), TAG_LEN);
        let opened =
            key.open(&sealed.iv, &sealed.ciphertext, &sealed.tag).unwrap();
        assert_eq!(opened, b"{\"ok\":true}");
    }

    #[test]
    fn open_rejects_wrong_key_and_tampering() {
        let key = SessionKey::derive(&[7u8; 32]);
        let other = SessionKey::derive(&[8u8; 32]);
        let sealed = key.seal(b"secret").unwrap();

        assert_eq!(
            other.open(&sealed.iv, &sealed.ciphertext, &sealed.tag),
            Err(EnvelopeError::DecryptFailed)
        );

        let mut tampered = sealed.ciphertext.clone();
        if let Some(byte) = tampered.first_mut() {
            *byte ^= 0xff;
        }
        assert_eq!(
            key.open(&sealed.iv, &tampered, &sealed.tag),
            Err(EnvelopeError::DecryptFailed)
        );

        assert_eq!(
            key.open(&sealed.iv[..4], &sealed.ciphertext, &sealed.tag),
            Err(EnvelopeError::BadIv)
        );
    }

    #[test]
    fn canonical_json_sorts_keys() {
        let value: serde_json::Value =
            serde_json::from_str(r#"{"zeta":1,"alpha":{"b":2,"a":1}}"#)
                .unwrap();
        assert_eq!(
            canonical_json(Some(&value)),
            r#"{"alpha":{"a":1,"b":2},"zeta":1}"#
        );
        assert_eq!(canonical_json(None), "null");
    }

    #[test]
    fn payload_hash_of_null() {
        // sha256("null")
        assert_eq!(
            payload_hash(None),
            "74234e98afe7498fb5daf1f36ac2d78acc339464f950703b8c019892f982b90b"
        );
    }

    #[test]
    fn canonical_string_shape() {
        let s = canonical_string("POST", "/ingest/init", "n1", 1234, "ab");
        assert_eq!(s, "POST|/ingest/init|n1|1234|ab");
    }

    #[test]
    fn roundtrip_arbitrary_payloads() {
        proptest!(|(
            secret in vec(any::<u8>(), 32..=32),
            plaintext in vec(any::<u8>(), 0..=512),
        )| {
            let key = SessionKey::derive(&secret);
            let sealed = key.seal(&plaintext).unwrap();
            let opened = key
                .open(&sealed.iv, &sealed.ciphertext, &sealed.tag)
                .unwrap();
            assert_eq!(opened, plaintext);
        });
    }
}
