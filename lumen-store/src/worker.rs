//! The single-writer operation queue.
//!
//! Each SQLite connection is owned by one dedicated OS thread; callers send
//! closures over a channel and await the result on a oneshot. The wallet
//! and usage stores each run one writer worker (serializing all writes) and
//! one reader worker on a second connection, so reads never queue behind a
//! long write.

use std::thread;

use rusqlite::Connection;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("store worker has shut down")]
    Closed,
}

type Job = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

pub(crate) struct SqliteWorker {
    tx: mpsc::UnboundedSender<Job>,
}

impl SqliteWorker {
    /// Move `conn` onto a dedicated thread and start draining jobs FIFO.
    /// The thread exits when the last handle is dropped.
    pub fn spawn(name: &str, mut conn: Connection) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let thread_name = format!("sqlite-{name}");
        thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                while let Some(job) = rx.blocking_recv() {
                    job(&mut conn);
                }
                debug!("{thread_name} worker exiting");
            })
            .expect("Failed to spawn sqlite worker thread");
        Self { tx }
    }

    /// Run `f` on the worker thread and await its result.
    pub async fn call<R, F>(&self, f: F) -> Result<R, StoreError>
    where
        R: Send + 'static,
        F: FnOnce(&mut Connection) -> rusqlite::Result<R> + Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let job: Job = Box::new(move |conn| {
            let _ = reply_tx.send(f(conn));
        });
        self.tx.send(job).map_err(|_| StoreError::Closed)?;
        reply_rx
            .await
            .map_err(|_| StoreError::Closed)?
            .map_err(StoreError::from)
    }
}

impl Clone for SqliteWorker {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}
