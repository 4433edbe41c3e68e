//! Shared runtime resources for the retrieval hot path.
//!
//! [`ArchivePool`] keeps a bounded LRU set of open archive file handles so
//! repeated reads against a hot archive amortize the open. Each read dups
//! the pooled handle (`try_clone`), so concurrent reads never share a file
//! cursor and a cancelled request cannot leave the pool inconsistent.
//!
//! [`XmlStreamCache`] holds a small LRU set of fully decompressed patent
//! XML streams. Decompressing a multi-hundred-megabyte inner stream is the
//! dominant cost on the patent path, so pulling several documents from the
//! same archive in quick succession must decompress once, not per document.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

struct PooledFile {
    file: std::fs::File,
    last_used: u64,
}

/// Bounded LRU pool of open archive handles, keyed by absolute path.
pub struct ArchivePool {
    max_open: usize,
    inner: Mutex<PoolState>,
}

struct PoolState {
    files: HashMap<PathBuf, PooledFile>,
    counter: u64,
}

impl ArchivePool {
    pub fn new(max_open: usize) -> Self {
        Self {
            max_open: max_open.max(1),
            inner: Mutex::new(PoolState {
                files: HashMap::new(),
                counter: 0,
            }),
        }
    }

    // Returns an independent handle (own cursor) onto the archive,
    // opening and pooling it on first use. The pool lock is only held for
    // map operations, never across the open or any I/O on the handle, so a
    // slow open cannot stall unrelated checkouts.
    fn checkout(&self, path: &Path) -> Result<std::fs::File> {
        if let Some(handle) = self.checkout_pooled(path)? {
            return Ok(handle);
        }

        let file = std::fs::File::open(path)
            .with_context(|| format!("opening archive {}", path.display()))?;
        let handle = file
            .try_clone()
            .with_context(|| format!("duplicating handle for {}", path.display()))?;

        let mut state = self
            .inner
            .lock()
            .map_err(|_| anyhow::anyhow!("archive pool lock poisoned"))?;
        state.counter += 1;
        let seq = state.counter;
        if state.files.len() >= self.max_open && !state.files.contains_key(path) {
            if let Some(oldest) = state
                .files
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(path, _)| path.clone())
            {
                state.files.remove(&oldest);
            }
        }

        // A racing checkout may have pooled its own handle for this path in
        // the meantime; replacing it is fine, outstanding clones stay valid.
        state.files.insert(
            path.to_path_buf(),
            PooledFile {
                file,
                last_used: seq,
            },
        );

        Ok(handle)
    }

    fn checkout_pooled(&self, path: &Path) -> Result<Option<std::fs::File>> {
        let mut state = self
            .inner
            .lock()
            .map_err(|_| anyhow::anyhow!("archive pool lock poisoned"))?;
        state.counter += 1;
        let seq = state.counter;
        if let Some(entry) = state.files.get_mut(path) {
            entry.last_used = seq;
            let handle = entry
                .file
                .try_clone()
                .with_context(|| format!("duplicating handle for {}", path.display()))?;
            return Ok(Some(handle));
        }
        Ok(None)
    }

    /// Read exactly `size` bytes at `offset`. A short read means the
    /// archive shrank since indexing and surfaces as an error.
    pub async fn read_slice(&self, path: &Path, offset: u64, size: usize) -> Result<Vec<u8>> {
        let mut file = self.checkout(path)?;
        let path = path.to_path_buf();

        tokio::task::spawn_blocking(move || {
            file.seek(SeekFrom::Start(offset))
                .with_context(|| format!("seeking in {}", path.display()))?;
            let mut buf = vec![0u8; size];
            file.read_exact(&mut buf).with_context(|| {
                format!(
                    "reading {} bytes at offset {} from {} (archive modified since indexing?)",
                    size,
                    offset,
                    path.display()
                )
            })?;
            Ok(buf)
        })
        .await
        .map_err(|e| anyhow::anyhow!("archive read task failed: {}", e))?
    }

    /// Drop a pooled handle, e.g. after the file went missing.
    pub fn evict(&self, path: &Path) {
        if let Ok(mut state) = self.inner.lock() {
            state.files.remove(path);
        }
    }
}

/// Bounded LRU cache of decompressed inner XML streams, keyed by archive
/// path. Streams are shared as `Arc` so concurrent requests slice the same
/// buffer without copying it.
pub struct XmlStreamCache {
    max_streams: usize,
    inner: Mutex<StreamState>,
    // Per-path single-flight gates: concurrent first requests for the same
    // archive wait on one decompression instead of each running their own.
    loading: tokio::sync::Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
}

struct StreamState {
    streams: HashMap<PathBuf, (Arc<Vec<u8>>, u64)>,
    counter: u64,
}

impl XmlStreamCache {
    pub fn new(max_streams: usize) -> Self {
        Self {
            max_streams: max_streams.max(1),
            inner: Mutex::new(StreamState {
                streams: HashMap::new(),
                counter: 0,
            }),
            loading: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    /// The cached stream for this archive, decompressing it on first use.
    pub async fn get_or_load(&self, path: &Path) -> Result<Arc<Vec<u8>>> {
        if let Some(stream) = self.lookup(path)? {
            return Ok(stream);
        }

        let gate = {
            let mut loading = self.loading.lock().await;
            loading.entry(path.to_path_buf()).or_default().clone()
        };
        let _flight = gate.lock().await;

        // Another request may have finished the load while we waited.
        if let Some(stream) = self.lookup(path)? {
            return Ok(stream);
        }

        let owned = path.to_path_buf();
        let loaded = tokio::task::spawn_blocking(move || read_inner_xml(&owned))
            .await
            .map_err(|e| anyhow::anyhow!("xml decompression task failed: {}", e))?;

        // Failures are not cached: the next request retries the load.
        self.loading.lock().await.remove(path);

        let stream = Arc::new(loaded?);
        self.insert(path, stream.clone())?;
        Ok(stream)
    }

    fn lookup(&self, path: &Path) -> Result<Option<Arc<Vec<u8>>>> {
        let mut state = self
            .inner
            .lock()
            .map_err(|_| anyhow::anyhow!("xml stream cache lock poisoned"))?;
        state.counter += 1;
        let seq = state.counter;
        if let Some((stream, last_used)) = state.streams.get_mut(path) {
            *last_used = seq;
            return Ok(Some(stream.clone()));
        }
        Ok(None)
    }

    fn insert(&self, path: &Path, stream: Arc<Vec<u8>>) -> Result<()> {
        let mut state = self
            .inner
            .lock()
            .map_err(|_| anyhow::anyhow!("xml stream cache lock poisoned"))?;
        state.counter += 1;
        let seq = state.counter;
        if state.streams.len() >= self.max_streams && !state.streams.contains_key(path) {
            if let Some(oldest) = state
                .streams
                .iter()
                .min_by_key(|(_, (_, last_used))| *last_used)
                .map(|(path, _)| path.clone())
            {
                state.streams.remove(&oldest);
            }
        }
        state.streams.insert(path.to_path_buf(), (stream, seq));
        Ok(())
    }

    pub fn evict(&self, path: &Path) {
        if let Ok(mut state) = self.inner.lock() {
            state.streams.remove(path);
        }
    }
}

/// Fully decompress the single inner XML member of a bulk patent zip.
pub fn read_inner_xml(path: &Path) -> Result<Vec<u8>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("opening archive {}", path.display()))?;
    let mut archive = zip::ZipArchive::new(file)
        .with_context(|| format!("reading zip structure of {}", path.display()))?;

    let xml_name = archive
        .file_names()
        .find(|name| name.to_ascii_lowercase().ends_with(".xml"))
        .map(|name| name.to_string())
        .ok_or_else(|| anyhow::anyhow!("no inner XML file in {}", path.display()))?;

    let mut inner = archive
        .by_name(&xml_name)
        .with_context(|| format!("opening inner {} of {}", xml_name, path.display()))?;
    let mut content = Vec::with_capacity(inner.size() as usize);
    inner
        .read_to_end(&mut content)
        .with_context(|| format!("decompressing inner {} of {}", xml_name, path.display()))?;

    Ok(content)
}
