//! SQLite-backed wallet ownership and usage stores.
//!
//! Both stores follow the same shape: a sync query core over plain
//! [`rusqlite::Connection`]s ([`queries`], [`usage`]) and an async facade
//! that routes every write through a single-writer operation queue
//! ([`worker::SqliteWorker`]) and reads through a second connection on its
//! own worker. Composite writes run inside [`WalletStore::with_txn`], one
//! `BEGIN IMMEDIATE` transaction; the sync helpers take `&Connection`, so a
//! nested call simply participates in the enclosing scope.

use std::path::Path;
use std::time::Duration;

use rusqlite::TransactionBehavior;

pub mod queries;
pub mod schema;
pub mod types;
pub mod usage;
mod worker;

pub use types::{CidListEntry, CidUsageStats, RootsSummary, WalletRow};
pub use worker::StoreError;

use lumen_common::time::TimestampMs;
use worker::SqliteWorker;

// --- WalletStore --- //

#[derive(Clone)]
pub struct WalletStore {
    writer: SqliteWorker,
    reader: SqliteWorker,
}

impl WalletStore {
    /// Open (creating if needed) the wallet DB at `path` in WAL mode.
    pub fn open(
        path: &Path,
        busy_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let write_conn = schema::open_wallet_db(path, busy_timeout)?;
        let read_conn = schema::open_wallet_db(path, busy_timeout)?;
        Ok(Self {
            writer: SqliteWorker::spawn("wallet-writer", write_conn),
            reader: SqliteWorker::spawn("wallet-reader", read_conn),
        })
    }

    /// Run a read-only query on the reader connection.
    pub async fn read<R, F>(&self, f: F) -> Result<R, StoreError>
    where
        R: Send + 'static,
        F: FnOnce(&rusqlite::Connection) -> rusqlite::Result<R>
            + Send
            + 'static,
    {
        self.reader.call(move |conn| f(conn)).await
    }

    /// Run a write on the writer queue (implicit single-statement scope).
    pub async fn write<R, F>(&self, f: F) -> Result<R, StoreError>
    where
        R: Send + 'static,
        F: FnOnce(&rusqlite::Connection) -> rusqlite::Result<R>
            + Send
            + 'static,
    {
        self.writer.call(move |conn| f(conn)).await
    }

    /// Ambient transaction scope: everything inside `f` commits or rolls
    /// back as one `BEGIN IMMEDIATE` transaction.
    pub async fn with_txn<R, F>(&self, f: F) -> Result<R, StoreError>
    where
        R: Send + 'static,
        F: FnOnce(&rusqlite::Transaction<'_>) -> rusqlite::Result<R>
            + Send
            + 'static,
    {
        self.writer
            .call(move |conn| {
                let txn = conn.transaction_with_behavior(
                    TransactionBehavior::Immediate,
                )?;
                let result = f(&txn)?;
                txn.commit()?;
                Ok(result)
            })
            .await
    }

    // --- typed operations --- //

    pub async fn upsert_wallet(
        &self,
        wallet: String,
    ) -> Result<(), StoreError> {
        self.write(move |conn| queries::upsert_wallet(conn, &wallet)).await
    }

    pub async fn get_wallet(
        &self,
        wallet: String,
    ) -> Result<Option<WalletRow>, StoreError> {
        self.read(move |conn| queries::get_wallet(conn, &wallet)).await
    }

    pub async fn touch_chain_check(
        &self,
        wallet: String,
        now: TimestampMs,
    ) -> Result<(), StoreError> {
        self.write(move |conn| queries::touch_chain_check(conn, &wallet, now))
            .await
    }

    pub async fn update_plan(
        &self,
        wallet: String,
        plan_id: Option<String>,
        plan_expires_at: Option<i64>,
        now: TimestampMs,
    ) -> Result<(), StoreError> {
        self.write(move |conn| {
            queries::update_plan(
                conn,
                &wallet,
                plan_id.as_deref(),
                plan_expires_at,
                now,
            )
        })
        .await
    }

    /// Transactional: all roots of one import land atomically.
    pub async fn add_or_update_wallet_roots(
        &self,
        wallet: String,
        roots: Vec<String>,
        total_bytes: u64,
        now: TimestampMs,
    ) -> Result<(), StoreError> {
        self.with_txn(move |txn| {
            queries::add_or_update_wallet_roots(
                txn,
                &wallet,
                &roots,
                total_bytes,
                now,
            )
        })
        .await
    }

    pub async fn roots_summary(
        &self,
        wallet: String,
    ) -> Result<RootsSummary, StoreError> {
        self.read(move |conn| queries::roots_summary(conn, &wallet)).await
    }

    pub async fn logical_owners(
        &self,
        cid: String,
    ) -> Result<Vec<String>, StoreError> {
        self.read(move |conn| queries::logical_owners(conn, &cid)).await
    }

    pub async fn has_wallet_root(
        &self,
        wallet: String,
        cid: String,
    ) -> Result<bool, StoreError> {
        self.read(move |conn| queries::has_wallet_root(conn, &wallet, &cid))
            .await
    }

    pub async fn has_wallet_pin(
        &self,
        wallet: String,
        cid: String,
    ) -> Result<bool, StoreError> {
        self.read(move |conn| queries::has_wallet_pin(conn, &wallet, &cid))
            .await
    }

    pub async fn count_pins_for_cid(
        &self,
        cid: String,
    ) -> Result<u64, StoreError> {
        self.read(move |conn| queries::count_pins_for_cid(conn, &cid)).await
    }

    pub async fn add_wallet_pin(
        &self,
        wallet: String,
        cid: String,
        now: TimestampMs,
    ) -> Result<(), StoreError> {
        self.write(move |conn| {
            queries::add_wallet_pin(conn, &wallet, &cid, now)
        })
        .await
    }

    pub async fn count_wallet_pins(
        &self,
        wallet: String,
    ) -> Result<u64, StoreError> {
        self.read(move |conn| queries::count_wallet_pins(conn, &wallet)).await
    }

    /// Atomic teardown of every reference `wallet` holds on `cid`.
    pub async fn remove_wallet_refs(
        &self,
        wallet: String,
        cid: String,
    ) -> Result<bool, StoreError> {
        self.with_txn(move |txn| {
            queries::remove_wallet_refs(txn, &wallet, &cid)
        })
        .await
    }

    pub async fn list_wallet_cids(
        &self,
        wallet: String,
        page: u32,
    ) -> Result<Vec<CidListEntry>, StoreError> {
        self.read(move |conn| queries::list_wallet_cids(conn, &wallet, page))
            .await
    }

    pub async fn set_display_name(
        &self,
        wallet: String,
        cid: String,
        display_name: String,
        now: TimestampMs,
    ) -> Result<(), StoreError> {
        self.write(move |conn| {
            queries::set_display_name(conn, &wallet, &cid, &display_name, now)
        })
        .await
    }

    pub async fn clear_display_name(
        &self,
        wallet: String,
        cid: String,
    ) -> Result<(), StoreError> {
        self.write(move |conn| {
            queries::clear_display_name(conn, &wallet, &cid)
        })
        .await
    }

    pub async fn get_display_name(
        &self,
        wallet: String,
        cid: String,
    ) -> Result<Option<String>, StoreError> {
        self.read(move |conn| queries::get_display_name(conn, &wallet, &cid))
            .await
    }

    pub async fn count_wallets_replicating(
        &self,
        cids: Vec<String>,
        since: Option<TimestampMs>,
    ) -> Result<u64, StoreError> {
        self.read(move |conn| {
            queries::count_wallets_replicating(conn, &cids, since)
        })
        .await
    }
}

// --- UsageStore --- //

#[derive(Clone)]
pub struct UsageStore {
    writer: SqliteWorker,
    reader: SqliteWorker,
}

impl UsageStore {
    pub fn open(
        path: &Path,
        busy_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let write_conn = schema::open_usage_db(path, busy_timeout)?;
        let read_conn = schema::open_usage_db(path, busy_timeout)?;
        Ok(Self {
            writer: SqliteWorker::spawn("usage-writer", write_conn),
            reader: SqliteWorker::spawn("usage-reader", read_conn),
        })
    }

    pub async fn record_view(
        &self,
        cid: String,
        wallet: String,
        status: u16,
        ok: bool,
        now: TimestampMs,
    ) -> Result<(), StoreError> {
        self.writer
            .call(move |conn| {
                usage::record_view(conn, &cid, &wallet, status, ok, now)
            })
            .await
    }

    pub async fn purge_stale(
        &self,
        now: TimestampMs,
    ) -> Result<usize, StoreError> {
        self.writer.call(move |conn| usage::purge_stale(conn, now)).await
    }

    pub async fn ok_wallets_since(
        &self,
        cid: String,
        since: TimestampMs,
    ) -> Result<u64, StoreError> {
        self.reader
            .call(move |conn| usage::ok_wallets_since(conn, &cid, since))
            .await
    }

    pub async fn usage_stats(
        &self,
        cid: String,
    ) -> Result<CidUsageStats, StoreError> {
        self.reader.call(move |conn| usage::usage_stats(conn, &cid)).await
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn now() -> TimestampMs {
        TimestampMs(1_700_000_000_000)
    }

    #[tokio::test]
    async fn wallet_store_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let store = WalletStore::open(
            &dir.path().join("wallets.sqlite3"),
            Duration::from_millis(500),
        )
        .unwrap();

        let w = "lmn1aaaa".to_owned();
        store.upsert_wallet(w.clone()).await.unwrap();
        store
            .add_or_update_wallet_roots(
                w.clone(),
                vec!["r1".to_owned(), "r2".to_owned()],
                1_000,
                now(),
            )
            .await
            .unwrap();

        let summary = store.roots_summary(w.clone()).await.unwrap();
        assert_eq!(summary.active, 2);
        assert!(store
            .has_wallet_root(w.clone(), "r1".to_owned())
            .await
            .unwrap());

        // teardown is atomic and observable from the read connection
        assert!(store
            .remove_wallet_refs(w.clone(), "r1".to_owned())
            .await
            .unwrap());
        assert!(!store
            .has_wallet_root(w.clone(), "r1".to_owned())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn with_txn_rolls_back_on_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = WalletStore::open(
            &dir.path().join("wallets.sqlite3"),
            Duration::from_millis(500),
        )
        .unwrap();

        let w = "lmn1aaaa".to_owned();
        let result = store
            .with_txn({
                let w = w.clone();
                move |txn| -> rusqlite::Result<()> {
                    queries::add_wallet_pin(txn, &w, "c1", now())?;
                    // force a failure after the first statement
                    Err(rusqlite::Error::QueryReturnedNoRows)
                }
            })
            .await;
        assert!(matches!(result, Err(StoreError::Sqlite(_))));

        // nothing committed
        assert!(!store
            .has_wallet_pin(w, "c1".to_owned())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn usage_store_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let store = UsageStore::open(
            &dir.path().join("usage.sqlite3"),
            Duration::from_millis(500),
        )
        .unwrap();

        store
            .record_view(
                "c1".to_owned(),
                "lmn1aaaa".to_owned(),
                200,
                true,
                now(),
            )
            .await
            .unwrap();
        let stats = store.usage_stats("c1".to_owned()).await.unwrap();
        assert_eq!(stats.ok_wallets, 1);
        assert_eq!(stats.total_wallets, 1);
    }
}
