//! Offline scanner for bulk USPTO zip archives.
//!
//! Each zip holds one large inner XML file of thousands of concatenated
//! patent documents. The scanner decompresses that stream once, splits it
//! into blocks on the `<?xml` declaration marker, and records each block's
//! offset and length within the decompressed stream. Identification reads
//! only a small header region of each block with light text matching, never
//! a structured parse of the body.

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use once_cell::sync::Lazy;
use regex::bytes::Regex;
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};
use walkdir::WalkDir;

use crate::config::{Config, PatentsConfig};
use crate::db;
use crate::fingerprint;
use crate::models::{PatentLocation, ScanReport};
use crate::pool::read_inner_xml;

// Publication-reference fields live within the first few KB of each block,
// so matching is bounded regardless of document size.
static PUB_REF_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?s)<publication-reference\b[^>]*>.*?<doc-number>\s*([A-Z]*\d+)\s*</doc-number>.*?</publication-reference>",
    )
    .expect("publication reference regex")
});

static KIND_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?s)<publication-reference\b[^>]*>.*?<kind>\s*([A-Z]\d?)\s*</kind>.*?</publication-reference>",
    )
    .expect("kind regex")
});

static DATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?s)<publication-reference\b[^>]*>.*?<date>\s*(\d{4,8})\s*</date>.*?</publication-reference>",
    )
    .expect("date regex")
});

static GRANT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<us-patent-grant\b").expect("grant regex"));
static APP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<us-patent-application\b").expect("application regex"));

struct Candidate {
    path: PathBuf,
    relative: String,
}

enum WorkerOutcome {
    Unchanged {
        relative: String,
    },
    Scanned {
        relative: String,
        hash: String,
        rows: Vec<PatentLocation>,
        skipped_blocks: usize,
    },
    Failed {
        relative: String,
        error: String,
    },
}

/// Scan the configured patents root (or one specific archive) and bring the
/// slice index up to date. Same skip/retry contract as the paper scanner.
pub async fn run_scan(config: &Config, single: Option<&Path>) -> Result<ScanReport> {
    let patents = config
        .patents
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("[patents] not configured"))?;

    if !patents.archive_root.exists() {
        bail!(
            "patents archive root does not exist: {}",
            patents.archive_root.display()
        );
    }

    let pool = db::connect(&patents.db_path).await?;
    let known = fingerprint::load_all(&pool).await?;

    let candidates = match single {
        Some(path) => vec![resolve_single(patents, path)?],
        None => enumerate(patents)?,
    };

    let report = scan_candidates(
        &pool,
        candidates,
        known,
        config.scanner.effective_workers(),
    )
    .await?;

    pool.close().await;
    Ok(report)
}

async fn scan_candidates(
    pool: &SqlitePool,
    candidates: Vec<Candidate>,
    known: std::collections::HashMap<String, String>,
    workers: usize,
) -> Result<ScanReport> {
    let mut report = ScanReport {
        archives_seen: candidates.len(),
        ..Default::default()
    };

    let semaphore = Arc::new(tokio::sync::Semaphore::new(workers.max(1)));
    let (tx, mut rx) = tokio::sync::mpsc::channel::<WorkerOutcome>(workers.max(1) * 2);
    let known = Arc::new(known);

    for candidate in candidates {
        let tx = tx.clone();
        let semaphore = semaphore.clone();
        let known = known.clone();
        tokio::spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };
            let relative = candidate.relative.clone();
            let outcome = tokio::task::spawn_blocking(move || scan_one(&candidate, &known))
                .await
                .unwrap_or_else(|e| WorkerOutcome::Failed {
                    relative,
                    error: format!("worker panicked: {}", e),
                });
            let _ = tx.send(outcome).await;
        });
    }
    drop(tx);

    while let Some(outcome) = rx.recv().await {
        match outcome {
            WorkerOutcome::Unchanged { relative } => {
                info!(archive = %relative, "unchanged, skipped");
                report.archives_skipped += 1;
            }
            WorkerOutcome::Scanned {
                relative,
                hash,
                rows,
                skipped_blocks,
            } => {
                let written =
                    crate::patent_index::replace_archive_rows(pool, &relative, &hash, &rows)
                        .await?;
                info!(
                    archive = %relative,
                    rows = written,
                    skipped_blocks,
                    "indexed"
                );
                report.archives_scanned += 1;
                report.rows_written += written;
            }
            WorkerOutcome::Failed { relative, error } => {
                error!(archive = %relative, error = %error, "failed to scan, skipping");
                report.archives_failed += 1;
            }
        }
    }

    Ok(report)
}

/// Candidate archives live under `PTGRXML/` (grants), `APPXML/`
/// (applications), or directly under the root.
fn enumerate(patents: &PatentsConfig) -> Result<Vec<Candidate>> {
    let include = build_globset(&patents.include_globs)?;
    let mut out = Vec::new();

    for entry in WalkDir::new(&patents.archive_root).min_depth(1).max_depth(2) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let name = entry.file_name().to_string_lossy();
        if !include.is_match(name.as_ref()) {
            continue;
        }
        let relative = path
            .strip_prefix(&patents.archive_root)
            .unwrap_or(path)
            .to_string_lossy()
            .into_owned();
        out.push(Candidate {
            path: path.to_path_buf(),
            relative,
        });
    }

    out.sort_by(|a, b| a.relative.cmp(&b.relative));
    Ok(out)
}

fn resolve_single(patents: &PatentsConfig, path: &Path) -> Result<Candidate> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        patents.archive_root.join(path)
    };
    if !absolute.exists() {
        bail!("archive not found: {}", absolute.display());
    }
    let relative = absolute
        .strip_prefix(&patents.archive_root)
        .with_context(|| {
            format!(
                "archive {} is outside the patents root",
                absolute.display()
            )
        })?
        .to_string_lossy()
        .into_owned();
    Ok(Candidate {
        path: absolute,
        relative,
    })
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

fn scan_one(
    candidate: &Candidate,
    known: &std::collections::HashMap<String, String>,
) -> WorkerOutcome {
    let hash = match fingerprint::hash_file(&candidate.path) {
        Ok(hash) => hash,
        Err(e) => {
            return WorkerOutcome::Failed {
                relative: candidate.relative.clone(),
                error: e.to_string(),
            }
        }
    };

    if known.get(&candidate.relative) == Some(&hash) {
        return WorkerOutcome::Unchanged {
            relative: candidate.relative.clone(),
        };
    }

    let content = match read_inner_xml(&candidate.path) {
        Ok(content) => content,
        Err(e) => {
            return WorkerOutcome::Failed {
                relative: candidate.relative.clone(),
                error: e.to_string(),
            }
        }
    };

    let mut rows = Vec::new();
    let mut skipped_blocks = 0usize;
    for (offset, size) in split_blocks(&content) {
        let block = &content[offset..offset + size];
        match extract_patent_info(block) {
            Some(info) => rows.push(PatentLocation {
                patent_id: info.doc_number,
                archive_file: candidate.relative.clone(),
                offset: offset as i64,
                size: size as i64,
                doc_type: info.doc_type.to_string(),
                kind_code: info.kind_code,
                year: info.year,
            }),
            None => {
                skipped_blocks += 1;
                warn!(
                    archive = %candidate.relative,
                    offset,
                    "no doc-number in block header, skipping"
                );
            }
        }
    }

    WorkerOutcome::Scanned {
        relative: candidate.relative.clone(),
        hash,
        rows,
        skipped_blocks,
    }
}

/// Split the concatenated stream into `(offset, size)` blocks, each starting
/// at a `<?xml` declaration and running to the next one (or end of stream).
/// Bytes before the first marker are not part of any block.
pub fn split_blocks(content: &[u8]) -> Vec<(usize, usize)> {
    const MARKER: &[u8] = b"<?xml";

    let mut starts = Vec::new();
    let mut from = 0;
    while let Some(pos) = find(content, MARKER, from) {
        starts.push(pos);
        from = pos + MARKER.len();
    }

    let mut blocks = Vec::with_capacity(starts.len());
    for (i, &start) in starts.iter().enumerate() {
        let end = starts.get(i + 1).copied().unwrap_or(content.len());
        blocks.push((start, end - start));
    }
    blocks
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from >= haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|pos| from + pos)
}

struct PatentInfo {
    doc_number: String,
    kind_code: Option<String>,
    doc_type: &'static str,
    year: Option<i64>,
}

/// Identify one block from its header region: root element for the document
/// type, publication-reference for number, kind and year. Returns `None`
/// when no doc-number can be found.
fn extract_patent_info(block: &[u8]) -> Option<PatentInfo> {
    // DTD declarations can be long, so the type check looks further than
    // the reference fields.
    let type_region = &block[..block.len().min(2000)];
    let doc_type = if GRANT_RE.is_match(type_region) {
        "grant"
    } else if APP_RE.is_match(type_region) {
        "application"
    } else {
        "unknown"
    };

    let head = &block[..block.len().min(4096)];
    let doc_number = String::from_utf8(PUB_REF_RE.captures(head)?[1].to_vec()).ok()?;

    let kind_code = KIND_RE
        .captures(head)
        .and_then(|c| String::from_utf8(c[1].to_vec()).ok());

    let year = DATE_RE.captures(head).and_then(|c| {
        let date = std::str::from_utf8(&c[1]).ok()?;
        date.get(..4)?.parse::<i64>().ok()
    });

    Some(PatentInfo {
        doc_number,
        kind_code,
        doc_type,
        year,
    })
}
