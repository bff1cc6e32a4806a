//! The CAR ingest pipeline: single-use upload tokens, spool files, and the
//! delayed background import worker.

mod tokens;
mod worker;

pub use tokens::{TOKEN_TTL, TokenRegistry, UploadToken};
pub use worker::{IngestDeps, IngestJob, IngestQueue, spawn_ingest_worker};

use std::path::{Path, PathBuf};

use rand::RngCore;

/// Spool file path for one upload: `INGEST_TMP_DIR/upload-<ts>-<hex>.car`.
pub fn spool_path(tmp_dir: &Path, now_ms: i64) -> PathBuf {
    let mut random = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut random);
    tmp_dir.join(format!("upload-{now_ms}-{}.car", hex::encode(random)))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn spool_paths_are_unique() {
        let dir = std::path::Path::new("/tmp");
        let a = spool_path(dir, 1_000);
        let b = spool_path(dir, 1_000);
        assert_ne!(a, b);
        let name = a.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("upload-1000-"));
        assert!(name.ends_with(".car"));
    }
}
