//! Bounded on-disk LRU cache of served payloads.
//!
//! Keyed by canonical identifier, one file per entry. The byte budget is
//! enforced by evicting entries in strict least-recently-used order (by
//! last access, not insertion) before admitting a new one. Accounting is
//! kept in memory under one lock and rebuilt from the directory contents on
//! startup, so a stale sidecar record can never misreport the resident
//! size.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tokio::sync::Mutex;
use tracing::{debug, warn};

struct CacheState {
    /// key -> (size in bytes, last-access sequence number).
    entries: HashMap<String, (u64, u64)>,
    total_bytes: u64,
    counter: u64,
}

/// Disk-backed LRU byte cache.
pub struct DiskCache {
    dir: PathBuf,
    budget_bytes: u64,
    state: Mutex<CacheState>,
}

/// Point-in-time cache usage, for the stats command.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CacheStats {
    pub dir: PathBuf,
    pub budget_bytes: u64,
    pub resident_bytes: u64,
    pub entries: usize,
}

fn sanitize_key(key: &str) -> String {
    key.replace(['/', '\\', ':'], "_")
}

impl DiskCache {
    /// Open the cache, creating the directory if needed and reconciling the
    /// accounting against the files actually present. Pre-existing files
    /// get their access order from modification time.
    pub fn open(dir: &Path, budget_bytes: u64) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating cache directory {}", dir.display()))?;

        let mut found: Vec<(String, u64, u64)> = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let meta = entry.metadata()?;
            if !meta.is_file() {
                continue;
            }
            let mtime = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_secs())
                .unwrap_or(0);
            found.push((
                entry.file_name().to_string_lossy().into_owned(),
                meta.len(),
                mtime,
            ));
        }
        // Oldest first, so sequence numbers reflect access order.
        found.sort_by_key(|(_, _, mtime)| *mtime);

        let mut entries = HashMap::new();
        let mut total_bytes = 0u64;
        let mut counter = 0u64;
        for (name, size, _) in found {
            counter += 1;
            total_bytes += size;
            entries.insert(name, (size, counter));
        }

        debug!(
            dir = %dir.display(),
            resident = total_bytes,
            entries = entries.len(),
            "cache opened"
        );

        Ok(Self {
            dir: dir.to_path_buf(),
            budget_bytes,
            state: Mutex::new(CacheState {
                entries,
                total_bytes,
                counter,
            }),
        })
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(sanitize_key(key))
    }

    /// Fetch a payload, refreshing its access order on hit.
    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        let name = sanitize_key(key);
        {
            let mut state = self.state.lock().await;
            match state.entries.get(&name) {
                Some(_) => {
                    state.counter += 1;
                    let seq = state.counter;
                    if let Some(entry) = state.entries.get_mut(&name) {
                        entry.1 = seq;
                    }
                }
                None => return None,
            }
        }

        match tokio::fs::read(self.entry_path(key)).await {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                // File vanished underneath us; drop it from the accounting.
                warn!(key, error = %e, "cached entry unreadable, evicting");
                let mut state = self.state.lock().await;
                if let Some((size, _)) = state.entries.remove(&name) {
                    state.total_bytes = state.total_bytes.saturating_sub(size);
                }
                None
            }
        }
    }

    /// Store a payload, evicting least-recently-used entries first so the
    /// resident size stays within budget. Payloads larger than the whole
    /// budget are not admitted.
    pub async fn put(&self, key: &str, content: &[u8]) -> Result<bool> {
        let size = content.len() as u64;
        if size > self.budget_bytes {
            warn!(
                key,
                size,
                budget = self.budget_bytes,
                "payload exceeds cache budget, not caching"
            );
            return Ok(false);
        }

        let name = sanitize_key(key);
        let evicted: Vec<String> = {
            let mut state = self.state.lock().await;

            // Replacing an existing entry: retire its old size first.
            if let Some((old_size, _)) = state.entries.remove(&name) {
                state.total_bytes = state.total_bytes.saturating_sub(old_size);
            }

            let mut evicted = Vec::new();
            while state.total_bytes + size > self.budget_bytes {
                let Some(oldest) = state
                    .entries
                    .iter()
                    .min_by_key(|(_, (_, seq))| *seq)
                    .map(|(name, _)| name.clone())
                else {
                    break;
                };
                if let Some((old_size, _)) = state.entries.remove(&oldest) {
                    state.total_bytes = state.total_bytes.saturating_sub(old_size);
                }
                evicted.push(oldest);
            }

            state.counter += 1;
            let seq = state.counter;
            state.entries.insert(name, (size, seq));
            state.total_bytes += size;
            evicted
        };

        for victim in &evicted {
            debug!(entry = %victim, "evicting cached payload");
            let _ = tokio::fs::remove_file(self.dir.join(victim)).await;
        }

        tokio::fs::write(self.entry_path(key), content)
            .await
            .with_context(|| format!("writing cache entry for {}", key))?;
        Ok(true)
    }

    pub async fn stats(&self) -> CacheStats {
        let state = self.state.lock().await;
        CacheStats {
            dir: self.dir.clone(),
            budget_bytes: self.budget_bytes,
            resident_bytes: state.total_bytes,
            entries: state.entries.len(),
        }
    }

    /// Remove every entry. Returns the number removed.
    pub async fn clear(&self) -> Result<usize> {
        let mut state = self.state.lock().await;
        let names: Vec<String> = state.entries.keys().cloned().collect();
        for name in &names {
            let _ = tokio::fs::remove_file(self.dir.join(name)).await;
        }
        let removed = names.len();
        state.entries.clear();
        state.total_bytes = 0;
        Ok(removed)
    }
}
