//! Usage DB queries: per-(cid, wallet) view bookkeeping.

use std::time::Duration;

use rusqlite::{Connection, params, params_from_iter};

use lumen_common::{cid::expand_variants, time::TimestampMs};

use crate::types::CidUsageStats;

/// Usage rows older than this are purged.
pub const USAGE_RETENTION: Duration = Duration::from_secs(90 * 24 * 3600);

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(",")
}

/// Upsert a view event for an authenticated wallet.
pub fn record_view(
    conn: &Connection,
    cid: &str,
    wallet: &str,
    status: u16,
    ok: bool,
    now: TimestampMs,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO cid_wallet_usage
             (cid, wallet, last_access_at, last_status, last_ok)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(cid, wallet) DO UPDATE SET
             last_access_at = excluded.last_access_at,
             last_status = excluded.last_status,
             last_ok = excluded.last_ok",
        params![cid, wallet, now.as_i64(), status as i64, ok as i64],
    )?;
    Ok(())
}

/// Delete rows whose last access predates the retention window.
pub fn purge_stale(
    conn: &Connection,
    now: TimestampMs,
) -> rusqlite::Result<usize> {
    let cutoff = now.saturating_sub(USAGE_RETENTION);
    conn.execute(
        "DELETE FROM cid_wallet_usage WHERE last_access_at < ?1",
        params![cutoff.as_i64()],
    )
}

/// Distinct wallets that successfully accessed this CID since `since`.
/// Feeds the popularity usage signal.
pub fn ok_wallets_since(
    conn: &Connection,
    cid: &str,
    since: TimestampMs,
) -> rusqlite::Result<u64> {
    let variants = expand_variants(cid);
    let marks = placeholders(variants.len());
    let sql = format!(
        "SELECT COUNT(DISTINCT wallet) FROM cid_wallet_usage
          WHERE last_ok = 1 AND last_access_at >= ? AND cid IN ({marks})"
    );
    let mut stmt = conn.prepare(&sql)?;
    stmt.query_row(
        params_from_iter(
            std::iter::once(rusqlite::types::Value::from(since.as_i64()))
                .chain(variants.into_iter().map(rusqlite::types::Value::from)),
        ),
        |row| row.get::<_, i64>(0).map(|n| n as u64),
    )
}

/// Wallet-scoped availability stats: how many wallets have touched this CID
/// and how many of those last saw it succeed.
pub fn usage_stats(
    conn: &Connection,
    cid: &str,
) -> rusqlite::Result<CidUsageStats> {
    let variants = expand_variants(cid);
    let marks = placeholders(variants.len());
    let sql = format!(
        "SELECT COUNT(DISTINCT wallet),
                COUNT(DISTINCT CASE WHEN last_ok = 1 THEN wallet END)
           FROM cid_wallet_usage WHERE cid IN ({marks})"
    );
    let mut stmt = conn.prepare(&sql)?;
    stmt.query_row(params_from_iter(variants), |row| {
        Ok(CidUsageStats {
            total_wallets: row.get::<_, i64>(0)? as u64,
            ok_wallets: row.get::<_, i64>(1)? as u64,
        })
    })
}

#[cfg(test)]
mod test {
    use crate::schema::open_usage_db_in_memory;

    use super::*;

    #[test]
    fn record_and_count() {
        let conn = open_usage_db_in_memory().unwrap();
        let t0 = TimestampMs(1_000_000);
        record_view(&conn, "c1", "lmn1aaaa", 200, true, t0).unwrap();
        record_view(&conn, "c1", "lmn1cccc", 502, false, t0).unwrap();
        // repeat view overwrites rather than duplicating
        record_view(&conn, "c1", "lmn1aaaa", 200, true, t0).unwrap();

        assert_eq!(ok_wallets_since(&conn, "c1", TimestampMs(0)).unwrap(), 1);
        let stats = usage_stats(&conn, "c1").unwrap();
        assert_eq!(stats.total_wallets, 2);
        assert_eq!(stats.ok_wallets, 1);
    }

    #[test]
    fn window_excludes_old_views() {
        let conn = open_usage_db_in_memory().unwrap();
        record_view(&conn, "c1", "lmn1aaaa", 200, true, TimestampMs(1_000))
            .unwrap();
        assert_eq!(
            ok_wallets_since(&conn, "c1", TimestampMs(2_000)).unwrap(),
            0
        );
    }

    #[test]
    fn purge_respects_retention() {
        let conn = open_usage_db_in_memory().unwrap();
        let now = TimestampMs(USAGE_RETENTION.as_millis() as i64 + 10_000);
        record_view(&conn, "old", "lmn1aaaa", 200, true, TimestampMs(1_000))
            .unwrap();
        record_view(&conn, "new", "lmn1aaaa", 200, true, now).unwrap();

        assert_eq!(purge_stale(&conn, now).unwrap(), 1);
        assert_eq!(usage_stats(&conn, "old").unwrap().total_wallets, 0);
        assert_eq!(usage_stats(&conn, "new").unwrap().total_wallets, 1);
    }
}
