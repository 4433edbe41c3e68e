//! Request-path retrieval of patent XML documents.
//!
//! Patent offsets index into the decompressed inner stream of a bulk zip,
//! so a byte read here goes through the stream cache: decompress the inner
//! XML once, slice each requested block out of the shared buffer.

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::cache::DiskCache;
use crate::fallback::{first_hit, ByteSource};
use crate::models::{DocumentBytes, Miss, Outcome, PatentLocation, SourceTier};
use crate::patent_id;
use crate::patent_index;
use crate::pool::XmlStreamCache;
use crate::sniff;

/// Shared, concurrently callable retrieval handle for the patent family.
pub struct PatentRetriever {
    pool: SqlitePool,
    archive_root: PathBuf,
    streams: Arc<XmlStreamCache>,
    cache: Option<Arc<DiskCache>>,
}

/// Index-only view of a patent, served without any byte read.
#[derive(Debug, Serialize)]
pub struct PatentInfo {
    pub patent_id: String,
    pub archive_file: String,
    pub offset: i64,
    pub size: i64,
    pub doc_type: String,
    pub kind_code: Option<String>,
    pub year: Option<i64>,
    /// Whether the referenced archive is currently present under the root.
    pub archive_present: bool,
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

struct StreamSliceSource<'a> {
    streams: &'a XmlStreamCache,
    path: PathBuf,
    offset: usize,
    size: usize,
}

#[async_trait]
impl ByteSource for StreamSliceSource<'_> {
    fn tier(&self) -> SourceTier {
        SourceTier::Archive
    }

    async fn fetch(&self, _key: &str) -> Result<Option<Vec<u8>>> {
        let stream = match self.streams.get_or_load(&self.path).await {
            Ok(stream) => stream,
            Err(e) => {
                self.streams.evict(&self.path);
                return Err(e);
            }
        };

        let end = self.offset.checked_add(self.size);
        let Some(end) = end.filter(|end| *end <= stream.len()) else {
            // The recorded slice no longer fits the stream, so the archive
            // was replaced since indexing. Drop the cached stream.
            self.streams.evict(&self.path);
            anyhow::bail!(
                "slice {}..{} exceeds decompressed stream of {} ({} bytes); archive modified since indexing?",
                self.offset,
                self.offset + self.size,
                self.path.display(),
                stream.len()
            );
        };

        Ok(Some(stream[self.offset..end].to_vec()))
    }
}

fn unavailable_reason(path: &Path) -> String {
    match std::fs::metadata(path) {
        Ok(_) => format!("failed to slice decompressed stream of {}", path.display()),
        Err(e) => format!("{}: {}", path.display(), e),
    }
}

impl PatentRetriever {
    pub fn new(
        pool: SqlitePool,
        archive_root: PathBuf,
        streams: Arc<XmlStreamCache>,
        cache: Option<Arc<DiskCache>>,
    ) -> Self {
        Self {
            pool,
            archive_root,
            streams,
            cache,
        }
    }

    /// Retrieve one patent's XML block by any accepted identifier spelling.
    pub async fn retrieve(&self, raw_id: &str) -> Result<Outcome> {
        let (key, _kind) = patent_id::parse(raw_id);

        let Some(location) = patent_index::lookup(&self.pool, &key).await? else {
            return Ok(Outcome::Miss(Miss::NotIndexed { hint: None }));
        };

        self.fetch_bytes(&key, &location).await
    }

    async fn fetch_bytes(&self, key: &str, location: &PatentLocation) -> Result<Outcome> {
        let archive_path = self.archive_root.join(&location.archive_file);
        let stream_source = StreamSliceSource {
            streams: self.streams.as_ref(),
            path: archive_path.clone(),
            offset: location.offset as usize,
            size: location.size as usize,
        };

        let cache_source = self.cache.as_deref().map(|cache| CacheSource { cache });
        let mut sources: Vec<&dyn ByteSource> = Vec::with_capacity(2);
        if let Some(source) = &cache_source {
            sources.push(source);
        }
        sources.push(&stream_source);

        let Some((tier, content)) = first_hit(&sources, key).await else {
            return Ok(Outcome::Miss(Miss::ArchiveUnavailable {
                reason: unavailable_reason(&archive_path),
            }));
        };

        if tier == SourceTier::Archive {
            if let Some(cache) = &self.cache {
                cache.put(key, &content).await?;
            }
        }

        let format = sniff::classify(&content);
        debug!(
            patent_id = key,
            size = content.len(),
            source = tier.as_str(),
            "serving patent"
        );

        Ok(Outcome::Found(DocumentBytes {
            content_type: format.content_type(),
            format,
            content,
            normalized_id: key.to_string(),
            year: location.year,
            version: None,
            kind_code: location.kind_code.clone(),
            doc_type: Some(location.doc_type.clone()),
            source: tier,
        }))
    }

    /// Index-only record, no byte read.
    pub async fn get_info(&self, raw_id: &str) -> Result<Option<PatentInfo>> {
        let (key, _kind) = patent_id::parse(raw_id);
        let Some(location) = patent_index::lookup(&self.pool, &key).await? else {
            return Ok(None);
        };

        let archive_present = self.archive_root.join(&location.archive_file).is_file();
        Ok(Some(PatentInfo {
            patent_id: location.patent_id,
            archive_file: location.archive_file,
            offset: location.offset,
            size: location.size,
            doc_type: location.doc_type,
            kind_code: location.kind_code,
            year: location.year,
            archive_present,
        }))
    }
}
