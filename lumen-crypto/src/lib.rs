//! Post-quantum transport crypto for the gateway control plane.
//!
//! - [`kem`]: the Kyber-768 key context loaded once at startup.
//! - [`envelope`]: HKDF-SHA256 key derivation and AES-256-GCM open/seal of
//!   the PQ envelope, plus canonical payload hashing.
//! - [`sig`]: secp256k1 wallet signature verification and bech32 address
//!   derivation from the supplied pubkey.
//! - [`replay`]: the in-memory nonce cache backing replay suppression.

pub mod envelope;
pub mod kem;
pub mod replay;
pub mod sig;
