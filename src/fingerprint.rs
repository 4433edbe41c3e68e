//! Archive change tracking.
//!
//! Every archive file is fingerprinted with a whole-file SHA-256. A re-scan
//! compares the current hash against the stored one and skips unchanged
//! archives without ever opening their container structure. Fingerprints
//! are committed in the same transaction as the archive's index rows, so a
//! partially scanned archive is never marked as processed.

use anyhow::Result;
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

/// Streaming SHA-256 of a whole file, hex encoded.
pub fn hash_file(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Load all recorded fingerprints: relative archive path -> content hash.
pub async fn load_all(pool: &SqlitePool) -> Result<HashMap<String, String>> {
    let rows = sqlx::query("SELECT file_path, content_hash FROM archive_files")
        .fetch_all(pool)
        .await?;

    Ok(rows
        .into_iter()
        .map(|row| (row.get("file_path"), row.get("content_hash")))
        .collect())
}
