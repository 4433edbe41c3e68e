//! Offline scanner for bulk paper tar archives.
//!
//! Walks the year directories under the papers root, fingerprints every
//! candidate archive, and for changed or new archives iterates the tar
//! table of contents (no payload extraction), recording each member's
//! identifier, byte offset and length. Parallel workers hash and parse
//! archives; all index writes funnel through this task's single writer
//! loop, one transaction per archive.

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use sqlx::SqlitePool;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};
use walkdir::WalkDir;

use crate::config::{Config, PapersConfig};
use crate::db;
use crate::fingerprint;
use crate::models::{PaperLocation, ScanReport};
use crate::paper_id;
use crate::paper_index;
use crate::sniff;

struct Candidate {
    path: PathBuf,
    relative: String,
    year: i64,
}

enum WorkerOutcome {
    Unchanged {
        relative: String,
    },
    Scanned {
        relative: String,
        hash: String,
        rows: Vec<PaperLocation>,
    },
    Failed {
        relative: String,
        error: String,
    },
}

/// Scan the configured papers root (or one specific archive) and bring the
/// slice index up to date. Restartable and idempotent: unchanged archives
/// are skipped without opening their contents, and a failed archive is
/// reported, skipped, and left unfingerprinted for the next run.
pub async fn run_scan(config: &Config, single: Option<&Path>) -> Result<ScanReport> {
    let papers = config
        .papers
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("[papers] not configured"))?;

    if !papers.archive_root.exists() {
        bail!(
            "papers archive root does not exist: {}",
            papers.archive_root.display()
        );
    }

    let pool = db::connect(&papers.db_path).await?;
    let known = fingerprint::load_all(&pool).await?;

    let candidates = match single {
        Some(path) => vec![resolve_single(papers, path)?],
        None => enumerate(papers)?,
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

    // Single writer: workers compute, this loop is the only thing that
    // touches the index.
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
            } => {
                let written =
                    paper_index::replace_archive_rows(pool, &relative, &hash, &rows).await?;
                info!(archive = %relative, rows = written, "indexed");
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

/// Candidate archives: `<root>/<year>/<glob match>`, year directories being
/// all-digit names. Sorted for deterministic ordering.
fn enumerate(papers: &PapersConfig) -> Result<Vec<Candidate>> {
    let include = build_globset(&papers.include_globs)?;
    let mut out = Vec::new();

    for entry in WalkDir::new(&papers.archive_root).min_depth(2).max_depth(2) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let Some(year) = year_of(path, &papers.archive_root) else {
            continue;
        };
        let name = entry.file_name().to_string_lossy();
        if !include.is_match(name.as_ref()) {
            continue;
        }
        let relative = path
            .strip_prefix(&papers.archive_root)
            .unwrap_or(path)
            .to_string_lossy()
            .into_owned();
        out.push(Candidate {
            path: path.to_path_buf(),
            relative,
            year,
        });
    }

    out.sort_by(|a, b| a.relative.cmp(&b.relative));
    Ok(out)
}

fn resolve_single(papers: &PapersConfig, path: &Path) -> Result<Candidate> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        papers.archive_root.join(path)
    };
    if !absolute.exists() {
        bail!("archive not found: {}", absolute.display());
    }
    let year = year_of(&absolute, &papers.archive_root)
        .ok_or_else(|| anyhow::anyhow!("cannot derive year directory for {}", absolute.display()))?;
    let relative = absolute
        .strip_prefix(&papers.archive_root)
        .with_context(|| {
            format!(
                "archive {} is outside the papers root",
                absolute.display()
            )
        })?
        .to_string_lossy()
        .into_owned();
    Ok(Candidate {
        path: absolute,
        relative,
        year,
    })
}

fn year_of(path: &Path, root: &Path) -> Option<i64> {
    let relative = path.strip_prefix(root).ok()?;
    let first = relative.components().next()?;
    let name = first.as_os_str().to_str()?;
    if name.chars().all(|c| c.is_ascii_digit()) {
        name.parse().ok()
    } else {
        None
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

// Blocking worker: hash the archive, bail out early if unchanged, otherwise
// walk the tar table of contents.
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

    match read_toc(candidate) {
        Ok(rows) => WorkerOutcome::Scanned {
            relative: candidate.relative.clone(),
            hash,
            rows,
        },
        Err(e) => WorkerOutcome::Failed {
            relative: candidate.relative.clone(),
            error: e.to_string(),
        },
    }
}

/// Iterate the tar's table of contents, recording each file member's exact
/// data offset and size plus enough leading bytes to classify the payload.
fn read_toc(candidate: &Candidate) -> Result<Vec<PaperLocation>> {
    let file = std::fs::File::open(&candidate.path)
        .with_context(|| format!("opening {}", candidate.path.display()))?;
    let mut archive = tar::Archive::new(file);
    let mut rows = Vec::new();

    for entry in archive
        .entries()
        .with_context(|| format!("reading tar structure of {}", candidate.path.display()))?
    {
        let mut entry =
            entry.with_context(|| format!("corrupt entry in {}", candidate.path.display()))?;
        if !entry.header().entry_type().is_file() {
            continue;
        }

        let size = entry.size() as i64;
        if size == 0 {
            continue;
        }
        let offset = entry.raw_file_position() as i64;

        let name = entry.path()?.to_string_lossy().into_owned();
        let Some(parsed) = paper_id::parse_member_name(&name) else {
            continue;
        };

        // Sniff the member's leading bytes; the iterator skips the rest.
        let mut leading = Vec::with_capacity(512);
        (&mut entry)
            .take(512)
            .read_to_end(&mut leading)
            .with_context(|| format!("reading member {} of {}", name, candidate.path.display()))?;
        let payload_kind = sniff::classify_member(&name, &leading);

        rows.push(PaperLocation {
            paper_id: parsed.key,
            archive_file: candidate.relative.clone(),
            offset,
            size,
            payload_kind: payload_kind.to_string(),
            year: candidate.year,
            latest_version: parsed.version,
        });
    }

    Ok(rows)
}
