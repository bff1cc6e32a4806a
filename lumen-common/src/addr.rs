//! Wallet addresses.
//!
//! A wallet is a bech32-shaped address: human-readable prefix (default
//! `lmn`), the separator `1`, then a lowercase base32 body. Validation here
//! is purely syntactic; authenticity comes from signature verification in
//! `lumen-crypto`.

use std::fmt;

use bech32::{Bech32, Hrp};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Bech32 limits the overall address length.
const MAX_ADDR_LEN: usize = 90;
/// hrp + separator + some data + checksum
const MIN_ADDR_LEN: usize = 8;

#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WalletAddress(String);

#[derive(Clone, Debug, Error, PartialEq)]
pub enum AddrError {
    #[error("wallet address has invalid length")]
    BadLength,
    #[error("wallet address has wrong prefix (expected {expected})")]
    WrongHrp { expected: String },
    #[error("wallet address contains invalid characters")]
    BadCharset,
}

impl WalletAddress {
    /// Syntactic validation of an address string against the configured HRP.
    pub fn parse(s: &str, hrp: &str) -> Result<Self, AddrError> {
        if s.len() < MIN_ADDR_LEN || s.len() > MAX_ADDR_LEN {
            return Err(AddrError::BadLength);
        }

        let prefix = format!("{hrp}1");
        let body = s.strip_prefix(&prefix).ok_or_else(|| {
            AddrError::WrongHrp {
                expected: hrp.to_owned(),
            }
        })?;

        // bech32 data charset: lowercase base32 minus '1', 'b', 'i', 'o'
        let charset_ok = !body.is_empty()
            && body.bytes().all(|b| {
                matches!(b, b'0' | b'2'..=b'9' | b'a'..=b'z')
                    && !matches!(b, b'b' | b'i' | b'o')
            });
        if !charset_ok {
            return Err(AddrError::BadCharset);
        }

        Ok(Self(s.to_owned()))
    }

    /// Derive the address for a 20-byte pubkey hash under the given HRP.
    /// Used to check the envelope wallet against the supplied pubkey.
    pub fn from_pubkey_hash(hash160: &[u8; 20], hrp: &str) -> Self {
        let hrp = Hrp::parse(hrp).expect("Configured HRP must be valid");
        let encoded = bech32::encode::<Bech32>(hrp, hash160)
            .expect("20 bytes always fit in a bech32 string");
        Self(encoded)
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WalletAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
