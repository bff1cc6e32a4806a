//! SQLite schema and connection setup.

use std::{path::Path, time::Duration};

use rusqlite::Connection;

/// Wallet DB: ownership, plans, display names.
const WALLET_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS wallets (
    wallet              TEXT PRIMARY KEY,
    plan_id             TEXT,
    plan_expires_at     INTEGER,
    last_chain_check_at INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS wallet_roots (
    wallet          TEXT NOT NULL,
    root_cid        TEXT NOT NULL,
    created_at      INTEGER NOT NULL,
    bytes_estimated INTEGER,
    status          TEXT NOT NULL DEFAULT 'active',
    PRIMARY KEY (wallet, root_cid)
);
CREATE INDEX IF NOT EXISTS idx_wallet_roots_cid
    ON wallet_roots (root_cid);

CREATE TABLE IF NOT EXISTS wallet_pins (
    wallet     TEXT NOT NULL,
    cid        TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    PRIMARY KEY (wallet, cid)
);
CREATE INDEX IF NOT EXISTS idx_wallet_pins_cid
    ON wallet_pins (cid);

CREATE TABLE IF NOT EXISTS wallet_cid_metadata (
    wallet       TEXT NOT NULL,
    cid          TEXT NOT NULL,
    display_name TEXT,
    created_at   INTEGER NOT NULL,
    updated_at   INTEGER NOT NULL,
    PRIMARY KEY (wallet, cid)
);
";

/// Usage DB: per-(cid, wallet) view bookkeeping, purged after 90 days.
const USAGE_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS cid_wallet_usage (
    cid            TEXT NOT NULL,
    wallet         TEXT NOT NULL,
    last_access_at INTEGER NOT NULL,
    last_status    INTEGER,
    last_ok        INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (cid, wallet)
);
CREATE INDEX IF NOT EXISTS idx_cid_wallet_usage_access
    ON cid_wallet_usage (last_access_at);
";

fn configure(
    conn: &Connection,
    busy_timeout: Duration,
) -> rusqlite::Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.busy_timeout(busy_timeout)?;
    Ok(())
}

pub fn open_wallet_db(
    path: &Path,
    busy_timeout: Duration,
) -> rusqlite::Result<Connection> {
    let conn = Connection::open(path)?;
    configure(&conn, busy_timeout)?;
    conn.execute_batch(WALLET_SCHEMA)?;
    Ok(conn)
}

pub fn open_usage_db(
    path: &Path,
    busy_timeout: Duration,
) -> rusqlite::Result<Connection> {
    let conn = Connection::open(path)?;
    configure(&conn, busy_timeout)?;
    conn.execute_batch(USAGE_SCHEMA)?;
    Ok(conn)
}

/// In-memory wallet DB for tests.
pub fn open_wallet_db_in_memory() -> rusqlite::Result<Connection> {
    let conn = Connection::open_in_memory()?;
    conn.execute_batch(WALLET_SCHEMA)?;
    Ok(conn)
}

/// In-memory usage DB for tests.
pub fn open_usage_db_in_memory() -> rusqlite::Result<Connection> {
    let conn = Connection::open_in_memory()?;
    conn.execute_batch(USAGE_SCHEMA)?;
    Ok(conn)
}
