//! Wallet DB queries.
//!
//! Every function takes a `&Connection` so callers can run it standalone or
//! inside an open transaction (`Transaction` derefs to `Connection`); a
//! composite operation wraps these in one `BEGIN IMMEDIATE` scope via
//! [`WalletStore::with_txn`](crate::WalletStore::with_txn).
//!
//! All CID-keyed lookups fan over [`expand_variants`] so ownership never
//! depends on how a CID was spelled.

use rusqlite::{Connection, OptionalExtension, params, params_from_iter};

use lumen_common::{cid::expand_variants, time::TimestampMs};

use crate::types::{CidListEntry, RootsSummary, WalletRow};

/// Page size for the wallet CID listing.
pub const CIDS_PAGE_SIZE: u32 = 200;

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(",")
}

/// Create the wallet row if it doesn't exist yet. Wallets are created
/// lazily on first authenticated action and never deleted in the hot path.
pub fn upsert_wallet(
    conn: &Connection,
    wallet: &str,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO wallets (wallet) VALUES (?1)
         ON CONFLICT(wallet) DO NOTHING",
        params![wallet],
    )?;
    Ok(())
}

pub fn get_wallet(
    conn: &Connection,
    wallet: &str,
) -> rusqlite::Result<Option<WalletRow>> {
    conn.query_row(
        "SELECT wallet, plan_id, plan_expires_at, last_chain_check_at
           FROM wallets WHERE wallet = ?1",
        params![wallet],
        |row| {
            Ok(WalletRow {
                wallet: row.get(0)?,
                plan_id: row.get(1)?,
                plan_expires_at: row.get(2)?,
                last_chain_check_at: TimestampMs(row.get(3)?),
            })
        },
    )
    .optional()
}

pub fn touch_chain_check(
    conn: &Connection,
    wallet: &str,
    now: TimestampMs,
) -> rusqlite::Result<()> {
    upsert_wallet(conn, wallet)?;
    conn.execute(
        "UPDATE wallets SET last_chain_check_at = ?2 WHERE wallet = ?1",
        params![wallet, now.as_i64()],
    )?;
    Ok(())
}

/// Cache the resolved plan tuple onto the wallet row.
pub fn update_plan(
    conn: &Connection,
    wallet: &str,
    plan_id: Option<&str>,
    plan_expires_at: Option<i64>,
    now: TimestampMs,
) -> rusqlite::Result<()> {
    upsert_wallet(conn, wallet)?;
    conn.execute(
        "UPDATE wallets
            SET plan_id = ?2, plan_expires_at = ?3, last_chain_check_at = ?4
          WHERE wallet = ?1",
        params![wallet, plan_id, plan_expires_at, now.as_i64()],
    )?;
    Ok(())
}

/// Record the roots of a successful CAR import. Per-root cost is the upload
/// total split evenly; re-importing a root reactivates it.
pub fn add_or_update_wallet_roots(
    conn: &Connection,
    wallet: &str,
    roots: &[String],
    total_bytes: u64,
    now: TimestampMs,
) -> rusqlite::Result<()> {
    if roots.is_empty() {
        return Ok(());
    }
    let per_root = total_bytes / roots.len() as u64;
    for root in roots {
        conn.execute(
            "INSERT INTO wallet_roots
                 (wallet, root_cid, created_at, bytes_estimated, status)
             VALUES (?1, ?2, ?3, ?4, 'active')
             ON CONFLICT(wallet, root_cid) DO UPDATE SET
                 bytes_estimated = excluded.bytes_estimated,
                 status = 'active'",
            params![wallet, root, now.as_i64(), per_root as i64],
        )?;
    }
    Ok(())
}

pub fn roots_summary(
    conn: &Connection,
    wallet: &str,
) -> rusqlite::Result<RootsSummary> {
    conn.query_row(
        "SELECT COUNT(*),
                COALESCE(SUM(status = 'active'), 0),
                COALESCE(SUM(CASE WHEN status = 'active'
                                  THEN COALESCE(bytes_estimated, 0)
                                  ELSE 0 END), 0)
           FROM wallet_roots WHERE wallet = ?1",
        params![wallet],
        |row| {
            Ok(RootsSummary {
                total: row.get::<_, i64>(0)? as u64,
                active: row.get::<_, i64>(1)? as u64,
                bytes_estimated: row.get::<_, i64>(2)? as u64,
            })
        },
    )
}

/// Distinct wallets holding any logical reference (active root or explicit
/// pin) to this CID, under variant expansion. The cardinality of this set
/// is what decides last-owner teardown.
pub fn logical_owners(
    conn: &Connection,
    cid: &str,
) -> rusqlite::Result<Vec<String>> {
    let variants = expand_variants(cid);
    let marks = placeholders(variants.len());
    let sql = format!(
        "SELECT DISTINCT wallet FROM (
             SELECT wallet FROM wallet_roots
              WHERE status = 'active' AND root_cid IN ({marks})
             UNION
             SELECT wallet FROM wallet_pins WHERE cid IN ({marks})
         ) ORDER BY wallet"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        params_from_iter(variants.iter().chain(variants.iter())),
        |row| row.get::<_, String>(0),
    )?;
    rows.collect()
}

pub fn has_wallet_root(
    conn: &Connection,
    wallet: &str,
    cid: &str,
) -> rusqlite::Result<bool> {
    let variants = expand_variants(cid);
    let marks = placeholders(variants.len());
    let sql = format!(
        "SELECT EXISTS(
             SELECT 1 FROM wallet_roots
              WHERE wallet = ? AND status = 'active'
                AND root_cid IN ({marks}))"
    );
    let mut stmt = conn.prepare(&sql)?;
    stmt.query_row(
        params_from_iter(
            std::iter::once(wallet.to_owned()).chain(variants),
        ),
        |row| row.get(0),
    )
}

pub fn has_wallet_pin(
    conn: &Connection,
    wallet: &str,
    cid: &str,
) -> rusqlite::Result<bool> {
    let variants = expand_variants(cid);
    let marks = placeholders(variants.len());
    let sql = format!(
        "SELECT EXISTS(
             SELECT 1 FROM wallet_pins
              WHERE wallet = ? AND cid IN ({marks}))"
    );
    let mut stmt = conn.prepare(&sql)?;
    stmt.query_row(
        params_from_iter(
            std::iter::once(wallet.to_owned()).chain(variants),
        ),
        |row| row.get(0),
    )
}

/// Distinct wallets with an explicit pin on this CID.
pub fn count_pins_for_cid(
    conn: &Connection,
    cid: &str,
) -> rusqlite::Result<u64> {
    let variants = expand_variants(cid);
    let marks = placeholders(variants.len());
    let sql = format!(
        "SELECT COUNT(DISTINCT wallet) FROM wallet_pins
          WHERE cid IN ({marks})"
    );
    let mut stmt = conn.prepare(&sql)?;
    stmt.query_row(params_from_iter(variants), |row| {
        row.get::<_, i64>(0).map(|n| n as u64)
    })
}

pub fn add_wallet_pin(
    conn: &Connection,
    wallet: &str,
    cid: &str,
    now: TimestampMs,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO wallet_pins (wallet, cid, created_at)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(wallet, cid) DO NOTHING",
        params![wallet, cid, now.as_i64()],
    )?;
    Ok(())
}

pub fn count_wallet_pins(
    conn: &Connection,
    wallet: &str,
) -> rusqlite::Result<u64> {
    conn.query_row(
        "SELECT COUNT(*) FROM wallet_pins WHERE wallet = ?1",
        params![wallet],
        |row| row.get::<_, i64>(0).map(|n| n as u64),
    )
}

/// Drop every logical reference `wallet` holds on `cid`: pins deleted,
/// roots marked removed, display-name metadata cleared. Returns whether
/// anything changed. Run inside a transaction scope so the teardown is
/// atomic.
pub fn remove_wallet_refs(
    conn: &Connection,
    wallet: &str,
    cid: &str,
) -> rusqlite::Result<bool> {
    let variants = expand_variants(cid);
    let marks = placeholders(variants.len());

    let sql = format!(
        "UPDATE wallet_roots SET status = 'removed'
          WHERE wallet = ? AND status = 'active' AND root_cid IN ({marks})"
    );
    let roots_changed = conn.prepare(&sql)?.execute(params_from_iter(
        std::iter::once(wallet.to_owned()).chain(variants.clone()),
    ))?;

    let sql = format!(
        "DELETE FROM wallet_pins WHERE wallet = ? AND cid IN ({marks})"
    );
    let pins_changed = conn.prepare(&sql)?.execute(params_from_iter(
        std::iter::once(wallet.to_owned()).chain(variants.clone()),
    ))?;

    let sql = format!(
        "DELETE FROM wallet_cid_metadata
          WHERE wallet = ? AND cid IN ({marks})"
    );
    conn.prepare(&sql)?.execute(params_from_iter(
        std::iter::once(wallet.to_owned()).chain(variants),
    ))?;

    Ok(roots_changed + pins_changed > 0)
}

/// One page (200 rows) of the wallet's CIDs: active roots and explicit
/// pins, newest first, with display names joined in.
pub fn list_wallet_cids(
    conn: &Connection,
    wallet: &str,
    page: u32,
) -> rusqlite::Result<Vec<CidListEntry>> {
    let mut stmt = conn.prepare(
        "SELECT refs.cid, refs.source, refs.created_at,
                refs.bytes_estimated, meta.display_name
           FROM (
               SELECT root_cid AS cid, 'root' AS source, created_at,
                      bytes_estimated
                 FROM wallet_roots
                WHERE wallet = ?1 AND status = 'active'
               UNION ALL
               SELECT cid, 'pin' AS source, created_at, NULL
                 FROM wallet_pins
                WHERE wallet = ?1
           ) AS refs
           LEFT JOIN wallet_cid_metadata AS meta
             ON meta.wallet = ?1 AND meta.cid = refs.cid
          ORDER BY refs.created_at DESC, refs.cid ASC
          LIMIT ?2 OFFSET ?3",
    )?;
    let rows = stmt.query_map(
        params![
            wallet,
            CIDS_PAGE_SIZE as i64,
            (page as i64) * CIDS_PAGE_SIZE as i64
        ],
        |row| {
            Ok(CidListEntry {
                cid: row.get(0)?,
                source: row.get(1)?,
                created_at: TimestampMs(row.get(2)?),
                bytes_estimated: row
                    .get::<_, Option<i64>>(3)?
                    .map(|b| b as u64),
                display_name: row.get(4)?,
            })
        },
    )?;
    rows.collect()
}

pub fn set_display_name(
    conn: &Connection,
    wallet: &str,
    cid: &str,
    display_name: &str,
    now: TimestampMs,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO wallet_cid_metadata
             (wallet, cid, display_name, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?4)
         ON CONFLICT(wallet, cid) DO UPDATE SET
             display_name = excluded.display_name,
             updated_at = excluded.updated_at",
        params![wallet, cid, display_name, now.as_i64()],
    )?;
    Ok(())
}

pub fn clear_display_name(
    conn: &Connection,
    wallet: &str,
    cid: &str,
) -> rusqlite::Result<()> {
    let variants = expand_variants(cid);
    let marks = placeholders(variants.len());
    let sql = format!(
        "DELETE FROM wallet_cid_metadata
          WHERE wallet = ? AND cid IN ({marks})"
    );
    conn.prepare(&sql)?.execute(params_from_iter(
        std::iter::once(wallet.to_owned()).chain(variants),
    ))?;
    Ok(())
}

pub fn get_display_name(
    conn: &Connection,
    wallet: &str,
    cid: &str,
) -> rusqlite::Result<Option<String>> {
    let variants = expand_variants(cid);
    let marks = placeholders(variants.len());
    let sql = format!(
        "SELECT display_name FROM wallet_cid_metadata
          WHERE wallet = ? AND cid IN ({marks})
          ORDER BY updated_at DESC LIMIT 1"
    );
    let mut stmt = conn.prepare(&sql)?;
    stmt.query_row(
        params_from_iter(
            std::iter::once(wallet.to_owned()).chain(variants),
        ),
        |row| row.get::<_, Option<String>>(0),
    )
    .optional()
    .map(Option::flatten)
}

/// Count distinct wallets holding a logical reference to any CID in `cids`,
/// optionally restricted to references created after `since`.
pub fn count_wallets_replicating(
    conn: &Connection,
    cids: &[String],
    since: Option<TimestampMs>,
) -> rusqlite::Result<u64> {
    if cids.is_empty() {
        return Ok(0);
    }
    let variants: Vec<String> = cids
        .iter()
        .flat_map(|c| expand_variants(c))
        .collect();
    let marks = placeholders(variants.len());
    let since_ms = since.map(|t| t.as_i64()).unwrap_or(i64::MIN);

    let sql = format!(
        "SELECT COUNT(DISTINCT wallet) FROM (
             SELECT wallet, created_at FROM wallet_roots
              WHERE status = 'active' AND root_cid IN ({marks})
             UNION ALL
             SELECT wallet, created_at FROM wallet_pins
              WHERE cid IN ({marks})
         ) WHERE created_at >= ?"
    );
    let mut stmt = conn.prepare(&sql)?;
    stmt.query_row(
        params_from_iter(
            variants
                .iter()
                .cloned()
                .chain(variants.iter().cloned())
                .map(rusqlite::types::Value::from)
                .chain(std::iter::once(rusqlite::types::Value::from(
                    since_ms,
                ))),
        ),
        |row| row.get::<_, i64>(0).map(|n| n as u64),
    )
}

#[cfg(test)]
mod test {
    use crate::schema::open_wallet_db_in_memory;

    use super::*;

    const W1: &str = "lmn1aaaa";
    const W2: &str = "lmn1cccc";
    const CID: &str = "some-cid";

    fn now() -> TimestampMs {
        TimestampMs(1_700_000_000_000)
    }

    #[test]
    fn wallet_upsert_and_plan() {
        let conn = open_wallet_db_in_memory().unwrap();
        upsert_wallet(&conn, W1).unwrap();
        upsert_wallet(&conn, W1).unwrap();

        update_plan(&conn, W1, Some("basic"), Some(123), now()).unwrap();
        let row = get_wallet(&conn, W1).unwrap().unwrap();
        assert_eq!(row.plan_id.as_deref(), Some("basic"));
        assert_eq!(row.plan_expires_at, Some(123));
        assert_eq!(row.last_chain_check_at, now());

        assert!(get_wallet(&conn, W2).unwrap().is_none());
    }

    #[test]
    fn roots_bookkeeping() {
        let conn = open_wallet_db_in_memory().unwrap();
        let roots = vec!["r1".to_owned(), "r2".to_owned()];
        add_or_update_wallet_roots(&conn, W1, &roots, 1000, now()).unwrap();

        let summary = roots_summary(&conn, W1).unwrap();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.active, 2);
        assert_eq!(summary.bytes_estimated, 1000);

        assert!(has_wallet_root(&conn, W1, "r1").unwrap());
        assert!(!has_wallet_root(&conn, W2, "r1").unwrap());

        // re-import reactivates a removed root
        remove_wallet_refs(&conn, W1, "r1").unwrap();
        assert!(!has_wallet_root(&conn, W1, "r1").unwrap());
        add_or_update_wallet_roots(
            &conn,
            W1,
            &vec!["r1".to_owned()],
            500,
            now(),
        )
        .unwrap();
        assert!(has_wallet_root(&conn, W1, "r1").unwrap());
    }

    #[test]
    fn logical_owners_unions_roots_and_pins() {
        let conn = open_wallet_db_in_memory().unwrap();
        add_or_update_wallet_roots(
            &conn,
            W1,
            &vec![CID.to_owned()],
            10,
            now(),
        )
        .unwrap();
        add_wallet_pin(&conn, W2, CID, now()).unwrap();
        // W1 also pins its own root; still one wallet, counted once
        add_wallet_pin(&conn, W1, CID, now()).unwrap();

        let owners = logical_owners(&conn, CID).unwrap();
        assert_eq!(owners, vec![W1.to_owned(), W2.to_owned()]);
        assert_eq!(count_pins_for_cid(&conn, CID).unwrap(), 2);
    }

    #[test]
    fn double_pin_leaves_one_row() {
        let conn = open_wallet_db_in_memory().unwrap();
        add_wallet_pin(&conn, W1, CID, now()).unwrap();
        add_wallet_pin(&conn, W1, CID, now()).unwrap();
        assert_eq!(count_wallet_pins(&conn, W1).unwrap(), 1);
        assert_eq!(count_pins_for_cid(&conn, CID).unwrap(), 1);
    }

    #[test]
    fn remove_refs_is_complete_and_idempotent() {
        let conn = open_wallet_db_in_memory().unwrap();
        add_or_update_wallet_roots(
            &conn,
            W1,
            &vec![CID.to_owned()],
            10,
            now(),
        )
        .unwrap();
        add_wallet_pin(&conn, W1, CID, now()).unwrap();
        set_display_name(&conn, W1, CID, "my thing", now()).unwrap();

        assert!(remove_wallet_refs(&conn, W1, CID).unwrap());
        assert!(!has_wallet_root(&conn, W1, CID).unwrap());
        assert!(!has_wallet_pin(&conn, W1, CID).unwrap());
        assert_eq!(get_display_name(&conn, W1, CID).unwrap(), None);

        // second teardown is a no-op
        assert!(!remove_wallet_refs(&conn, W1, CID).unwrap());
    }

    #[test]
    fn cid_listing_pages_and_joins_names() {
        let conn = open_wallet_db_in_memory().unwrap();
        add_or_update_wallet_roots(
            &conn,
            W1,
            &vec!["r1".to_owned()],
            10,
            TimestampMs(2_000),
        )
        .unwrap();
        add_wallet_pin(&conn, W1, "p1", TimestampMs(1_000)).unwrap();
        set_display_name(&conn, W1, "r1", "site", now()).unwrap();

        let page = list_wallet_cids(&conn, W1, 0).unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].cid, "r1");
        assert_eq!(page[0].source, "root");
        assert_eq!(page[0].display_name.as_deref(), Some("site"));
        assert_eq!(page[1].cid, "p1");
        assert_eq!(page[1].source, "pin");

        assert!(list_wallet_cids(&conn, W1, 1).unwrap().is_empty());
    }

    #[test]
    fn replication_counting_with_window() {
        let conn = open_wallet_db_in_memory().unwrap();
        add_or_update_wallet_roots(
            &conn,
            W1,
            &vec![CID.to_owned()],
            10,
            TimestampMs(1_000),
        )
        .unwrap();
        add_wallet_pin(&conn, W2, CID, TimestampMs(5_000)).unwrap();

        let cids = vec![CID.to_owned()];
        assert_eq!(
            count_wallets_replicating(&conn, &cids, None).unwrap(),
            2
        );
        assert_eq!(
            count_wallets_replicating(
                &conn,
                &cids,
                Some(TimestampMs(2_000))
            )
            .unwrap(),
            1
        );
        assert_eq!(count_wallets_replicating(&conn, &[], None).unwrap(), 0);
    }
}
