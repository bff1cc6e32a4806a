//! Retry schedule for the thin external clients.

use std::time::Duration;

const CLIENT_RETRY_WAIT_MS: u64 = 150;

/// The wait schedule between external-client attempts. Clients make two
/// attempts total, so in practice only the first item is observed, but the
/// iterator is infinite so callers never need to handle exhaustion.
pub fn client_retry_iter() -> impl Iterator<Item = Duration> {
    std::iter::repeat(Duration::from_millis(CLIENT_RETRY_WAIT_MS))
}
