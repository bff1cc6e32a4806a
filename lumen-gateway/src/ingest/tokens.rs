//! Single-use upload tokens.
//!
//! `/ingest/init` issues a 32-byte hex token after plan validation;
//! `/ingest/car` consumes it atomically (get-and-delete under the mutex).
//! Unused tokens expire after 10 minutes and are swept on issue.

use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, Instant},
};

use rand::RngCore;

pub const TOKEN_TTL: Duration = Duration::from_secs(10 * 60);

#[derive(Clone, Debug)]
pub struct UploadToken {
    pub wallet: String,
    pub plan_id: String,
    pub est_bytes: Option<u64>,
    pub display_name: Option<String>,
    pub created_at: Instant,
}

pub struct TokenRegistry {
    ttl: Duration,
    tokens: Mutex<HashMap<String, UploadToken>>,
}

impl TokenRegistry {
    pub fn new() -> Self {
        Self::with_ttl(TOKEN_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Issue a fresh token for an authenticated, plan-validated wallet.
    pub fn issue(
        &self,
        wallet: String,
        plan_id: String,
        est_bytes: Option<u64>,
        display_name: Option<String>,
    ) -> String {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        let token = hex::encode(bytes);

        let mut tokens = self.tokens.lock().expect("Token map poisoned");
        // Opportunistic sweep keeps the map bounded without a janitor.
        let ttl = self.ttl;
        tokens.retain(|_, t| t.created_at.elapsed() < ttl);
        tokens.insert(
            token.clone(),
            UploadToken {
                wallet,
                plan_id,
                est_bytes,
                display_name,
                created_at: Instant::now(),
            },
        );
        token
    }

    /// Atomically take the token. Returns `None` for unknown, already-used,
    /// or expired tokens; all three present identically to the caller.
    pub fn consume(&self, token: &str) -> Option<UploadToken> {
        let mut tokens = self.tokens.lock().expect("Token map poisoned");
        let entry = tokens.remove(token)?;
        (entry.created_at.elapsed() < self.ttl).then_some(entry)
    }
}

impl Default for TokenRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn issue_and_consume_once() {
        let registry = TokenRegistry::new();
        let token = registry.issue(
            "lmn1aaaa".to_owned(),
            "basic".to_owned(),
            Some(42),
            None,
        );
        assert_eq!(token.len(), 64);
        assert!(token.bytes().all(|b| b.is_ascii_hexdigit()));

        let entry = registry.consume(&token).expect("First consume");
        assert_eq!(entry.wallet, "lmn1aaaa");
        assert_eq!(entry.plan_id, "basic");

        // Second consume fails: delete-on-get.
        assert!(registry.consume(&token).is_none());
    }

    #[test]
    fn expired_tokens_dont_consume() {
        let registry = TokenRegistry::with_ttl(Duration::ZERO);
        let token = registry.issue(
            "lmn1aaaa".to_owned(),
            "basic".to_owned(),
            None,
            None,
        );
        assert!(registry.consume(&token).is_none());
    }

    #[test]
    fn unknown_token_is_none() {
        let registry = TokenRegistry::new();
        assert!(registry.consume("deadbeef").is_none());
    }
}
