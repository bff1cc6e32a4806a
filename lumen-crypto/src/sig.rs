//! Wallet signature verification.
//!
//! The inner envelope supplies a secp256k1 pubkey and a signature over
//! `sha256(canonicalString)`. The wallet address is *derived* from the
//! pubkey (`bech32(ripemd160(sha256(pubkey_compressed)))`) and must equal
//! the envelope wallet; the address in the envelope is never trusted on its
//! own.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use ripemd::Ripemd160;
use secp256k1::{Message, PublicKey, Secp256k1, ecdsa::Signature};
use sha2::{Digest, Sha256};
use thiserror::Error;

use lumen_common::addr::WalletAddress;

#[derive(Debug, Error, PartialEq)]
pub enum SigError {
    #[error("pubkey is not a valid secp256k1 point")]
    BadPubkey,
    #[error("signature is malformed")]
    BadSignature,
    #[error("signature does not verify")]
    VerifyFailed,
}

/// Decode a field that clients may send as hex or base64.
fn decode_flex(s: &str) -> Option<Vec<u8>> {
    hex::decode(s)
        .ok()
        .or_else(|| B64.decode(s.as_bytes()).ok())
}

/// Verify `signature` over `sha256(canonical_string)` with `pubkey`.
/// Signatures are accepted in compact (64-byte) or DER form.
pub fn verify_canonical_signature(
    canonical_string: &str,
    signature: &str,
    pubkey: &str,
) -> Result<(), SigError> {
    let pk_bytes = decode_flex(pubkey).ok_or(SigError::BadPubkey)?;
    let pk =
        PublicKey::from_slice(&pk_bytes).map_err(|_| SigError::BadPubkey)?;

    let sig_bytes = decode_flex(signature).ok_or(SigError::BadSignature)?;
    let sig = match sig_bytes.len() {
        64 => {
            let mut compact = [0u8; 64];
            compact.copy_from_slice(&sig_bytes);
            Signature::from_compact(&compact)
                .map_err(|_| SigError::BadSignature)?
        }
        _ => Signature::from_der(&sig_bytes)
            .map_err(|_| SigError::BadSignature)?,
    };

    let digest: [u8; 32] =
        Sha256::digest(canonical_string.as_bytes()).into();
    let msg = Message::from_digest(digest);

    let secp = Secp256k1::verification_only();
    secp.verify_ecdsa(&msg, &sig, &pk)
        .map_err(|_| SigError::VerifyFailed)
}

/// Derive the wallet address for a pubkey under the configured HRP:
/// `bech32(hrp, ripemd160(sha256(pubkey_compressed)))`.
pub fn derive_wallet_address(
    pubkey: &str,
    hrp: &str,
) -> Result<WalletAddress, SigError> {
    let pk_bytes = decode_flex(pubkey).ok_or(SigError::BadPubkey)?;
    let pk =
        PublicKey::from_slice(&pk_bytes).map_err(|_| SigError::BadPubkey)?;

    let compressed = pk.serialize();
    let sha = Sha256::digest(compressed);
    let hash160: [u8; 20] = Ripemd160::digest(sha).into();

    Ok(WalletAddress::from_pubkey_hash(&hash160, hrp))
}

#[cfg(test)]
mod test {
    use secp256k1::SecretKey;

    use super::*;

    fn test_keypair() -> (SecretKey, PublicKey) {
        let secp = Secp256k1::new();
        let sk = SecretKey::from_slice(&[0x42u8; 32]).unwrap();
        let pk = PublicKey::from_secret_key(&secp, &sk);
        (sk, pk)
    }

    fn sign(canonical: &str, sk: &SecretKey) -> String {
        let secp = Secp256k1::new();
        let digest: [u8; 32] = Sha256::digest(canonical.as_bytes()).into();
        let msg = Message::from_digest(digest);
        let sig = secp.sign_ecdsa(&msg, sk);
        hex::encode(sig.serialize_compact())
    }

    #[test]
    fn verify_happy_path() {
        let (sk, pk) = test_keypair();
        let canonical = "POST|/pin|nonce1|1700000000000|abcd";
        let sig_hex = sign(canonical, &sk);
        let pk_hex = hex::encode(pk.serialize());

        verify_canonical_signature(canonical, &sig_hex, &pk_hex).unwrap();
    }

    #[test]
    fn verify_rejects_changed_message() {
        let (sk, pk) = test_keypair();
        let sig_hex = sign("POST|/pin|n|1|h", &sk);
        let pk_hex = hex::encode(pk.serialize());

        assert_eq!(
            verify_canonical_signature("POST|/unpin|n|1|h", &sig_hex, &pk_hex),
            Err(SigError::VerifyFailed)
        );
    }

    #[test]
    fn verify_rejects_garbage_inputs() {
        let (_sk, pk) = test_keypair();
        let pk_hex = hex::encode(pk.serialize());
        assert_eq!(
            verify_canonical_signature("m", "zz-not-decodable-!!", &pk_hex),
            Err(SigError::BadSignature)
        );
        assert_eq!(
            verify_canonical_signature("m", "00ff", "not-a-key-!!"),
            Err(SigError::BadPubkey)
        );
    }

    #[test]
    fn derive_address_is_stable_and_hrp_scoped() {
        let (_sk, pk) = test_keypair();
        let pk_hex = hex::encode(pk.serialize());

        let a1 = derive_wallet_address(&pk_hex, "lmn").unwrap();
        let a2 = derive_wallet_address(&pk_hex, "lmn").unwrap();
        assert_eq!(a1, a2);
        assert!(a1.as_str().starts_with("lmn1"));

        let other = derive_wallet_address(&pk_hex, "tlmn").unwrap();
        assert!(other.as_str().starts_with("tlmn1"));
        assert_ne!(a1, other);
    }

    #[test]
    fn base64_pubkey_also_accepted() {
        use base64::Engine;
        let (_sk, pk) = test_keypair();
        let pk_b64 = base64::engine::general_purpose::STANDARD
            .encode(pk.serialize());
        derive_wallet_address(&pk_b64, "lmn").unwrap();
    }
}
