//! Request-path retrieval of paper payloads.
//!
//! One lookup against the slice index, then one seek+read against the
//! archive; the archive is never scanned or decompressed at request time.
//! Every expected miss (unknown id, version not held, format filtered out,
//! archive gone) is an ordinary [`Outcome::Miss`] value; only a broken
//! index store surfaces as an error.

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::cache::DiskCache;
use crate::fallback::{first_hit, ByteSource};
use crate::models::{
    DocumentBytes, FormatFilter, Miss, Outcome, PaperLocation, PaperMetadata, SourceTier,
};
use crate::paper_id;
use crate::paper_index;
use crate::pool::ArchivePool;
use crate::sniff;

/// Shared, concurrently callable retrieval handle for the paper family.
pub struct PaperRetriever {
    pool: SqlitePool,
    archive_root: PathBuf,
    handles: Arc<ArchivePool>,
    cache: Option<Arc<DiskCache>>,
}

/// Index-only view of a paper, served without any byte read.
#[derive(Debug, Serialize)]
pub struct PaperInfo {
    pub paper_id: String,
    pub archive_file: String,
    pub offset: i64,
    pub size: i64,
    pub payload_kind: String,
    pub year: i64,
    pub latest_version: Option<String>,
    /// Whether the referenced archive is currently present under the root.
    pub archive_present: bool,
    #[serde(flatten)]
    pub metadata: PaperMetadata,
}

struct CacheSource<'a> {
    cache: &'a DiskCache,
}

#[async_trait]
impl ByteSource for CacheSource<'_> {
    fn tier(&self) -> SourceTier {
        SourceTier::Cache
    }

    async fn fetch(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.cache.get(key).await)
    }
}

struct ArchiveSliceSource<'a> {
    handles: &'a ArchivePool,
    path: PathBuf,
    offset: u64,
    size: usize,
}

#[async_trait]
impl ByteSource for ArchiveSliceSource<'_> {
    fn tier(&self) -> SourceTier {
        SourceTier::Archive
    }

    async fn fetch(&self, _key: &str) -> Result<Option<Vec<u8>>> {
        match self.handles.read_slice(&self.path, self.offset, self.size).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) => {
                // Drop the pooled handle so a replaced file is reopened.
                self.handles.evict(&self.path);
                Err(e)
            }
        }
    }
}

fn unavailable_reason(path: &Path) -> String {
    match std::fs::metadata(path) {
        Ok(_) => format!("failed to read slice from {}", path.display()),
        Err(e) => format!("{}: {}", path.display(), e),
    }
}

impl PaperRetriever {
    pub fn new(
        pool: SqlitePool,
        archive_root: PathBuf,
        handles: Arc<ArchivePool>,
        cache: Option<Arc<DiskCache>>,
    ) -> Self {
        Self {
            pool,
            archive_root,
            handles,
            cache,
        }
    }

    /// Retrieve one paper's payload. A version or format argument is a hard
    /// constraint checked against the index before any byte read.
    pub async fn retrieve(
        &self,
        raw_id: &str,
        version: Option<&str>,
        format: Option<FormatFilter>,
    ) -> Result<Outcome> {
        let parsed = paper_id::parse(raw_id);
        // A version can ride in on the id itself; an explicit argument wins.
        let requested_version = version.map(str::to_string).or(parsed.version);
        let key = parsed.key;

        let Some(location) = paper_index::lookup(&self.pool, &key).await? else {
            return Ok(Outcome::Miss(Miss::NotIndexed {
                hint: paper_id::expected_archive_pattern(&key),
            }));
        };

        if let Some(requested) = requested_version {
            if location.latest_version.as_deref() != Some(requested.as_str()) {
                return Ok(Outcome::Miss(Miss::VersionNotHeld {
                    requested,
                    held: location.latest_version,
                }));
            }
        }

        if let Some(filter) = format {
            if !filter.matches(&location.payload_kind) {
                return Ok(Outcome::Miss(Miss::FormatUnavailable {
                    requested: filter.as_str().to_string(),
                    held: location.payload_kind,
                }));
            }
        }

        self.fetch_bytes(&key, &location).await
    }

    async fn fetch_bytes(&self, key: &str, location: &PaperLocation) -> Result<Outcome> {
        let archive_path = self.archive_root.join(&location.archive_file);
        let archive = ArchiveSliceSource {
            handles: self.handles.as_ref(),
            path: archive_path.clone(),
            offset: location.offset as u64,
            size: location.size as usize,
        };

        let cache_source = self.cache.as_deref().map(|cache| CacheSource { cache });
        let mut sources: Vec<&dyn ByteSource> = Vec::with_capacity(2);
        if let Some(source) = &cache_source {
            sources.push(source);
        }
        sources.push(&archive);

        let Some((tier, content)) = first_hit(&sources, key).await else {
            // The index says this paper exists, so an all-tier miss means
            // the archive itself cannot be read.
            return Ok(Outcome::Miss(Miss::ArchiveUnavailable {
                reason: unavailable_reason(&archive_path),
            }));
        };

        if tier == SourceTier::Archive {
            if let Some(cache) = &self.cache {
                cache.put(key, &content).await?;
            }
        }

        // Independent double-check of the coarse payload_kind column.
        let format = sniff::classify(&content);
        debug!(
            paper_id = key,
            size = content.len(),
            source = tier.as_str(),
            format = format.content_type(),
            "serving paper"
        );

        Ok(Outcome::Found(DocumentBytes {
            content_type: format.content_type(),
            format,
            content,
            normalized_id: key.to_string(),
            year: Some(location.year),
            version: location.latest_version.clone(),
            kind_code: None,
            doc_type: None,
            source: tier,
        }))
    }

    /// Index-only record: location plus imported metadata, no byte read.
    pub async fn get_info(&self, raw_id: &str) -> Result<Option<PaperInfo>> {
        let key = paper_id::normalize(raw_id);
        let Some((location, metadata)) =
            paper_index::lookup_with_metadata(&self.pool, &key).await?
        else {
            return Ok(None);
        };

        let archive_present = self.archive_root.join(&location.archive_file).is_file();
        Ok(Some(PaperInfo {
            paper_id: location.paper_id,
            archive_file: location.archive_file,
            offset: location.offset,
            size: location.size,
            payload_kind: location.payload_kind,
            year: location.year,
            latest_version: location.latest_version,
            archive_present,
            metadata,
        }))
    }
}
