//! Bulk metadata import for the paper index.
//!
//! Reads a JSON-lines metadata dump (one record per line, as published in
//! the arXiv metadata snapshot) and attaches title, authors, abstract,
//! categories and DOI to already-indexed rows. Location fields are never
//! touched, and records for papers not in the index are counted but never
//! create rows.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::io::BufRead;
use std::path::Path;
use tracing::{info, warn};

use crate::config::Config;
use crate::db;
use crate::models::PaperMetadata;
use crate::paper_id;
use crate::paper_index;

#[derive(Debug, Deserialize)]
struct MetadataRecord {
    id: String,
    title: Option<String>,
    authors: Option<String>,
    #[serde(rename = "abstract")]
    abstract_text: Option<String>,
    categories: Option<String>,
    doi: Option<String>,
}

/// Counters for one import run.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ImportReport {
    pub lines_read: u64,
    pub updated: u64,
    /// Well-formed records whose id is not in the index.
    pub not_indexed: u64,
    /// Lines that could not be parsed.
    pub malformed: u64,
}

fn clean(field: Option<String>) -> Option<String> {
    field
        .map(|s| s.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|s| !s.is_empty())
}

/// Import metadata from a JSON-lines file, stopping after `limit` records
/// when given. Restartable: the update is idempotent per record.
pub async fn run_import(config: &Config, path: &Path, limit: Option<u64>) -> Result<ImportReport> {
    let papers = config
        .papers
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("[papers] not configured"))?;
    let pool = db::connect(&papers.db_path).await?;

    let file = std::fs::File::open(path)
        .with_context(|| format!("opening metadata file {}", path.display()))?;
    let reader = std::io::BufReader::new(file);

    let mut report = ImportReport::default();
    for line in reader.lines() {
        if let Some(limit) = limit {
            if report.lines_read >= limit {
                break;
            }
        }
        let line = line.with_context(|| format!("reading {}", path.display()))?;
        report.lines_read += 1;
        if line.trim().is_empty() {
            continue;
        }

        let record: MetadataRecord = match serde_json::from_str(&line) {
            Ok(record) => record,
            Err(e) => {
                warn!(line = report.lines_read, error = %e, "malformed metadata record");
                report.malformed += 1;
                continue;
            }
        };

        let key = paper_id::normalize(&record.id);
        let metadata = PaperMetadata {
            title: clean(record.title),
            authors: clean(record.authors),
            abstract_text: clean(record.abstract_text),
            categories: clean(record.categories),
            doi: clean(record.doi),
        };

        if paper_index::apply_metadata(&pool, &key, &metadata).await? {
            report.updated += 1;
        } else {
            report.not_indexed += 1;
        }

        if report.lines_read % 100_000 == 0 {
            info!(
                lines = report.lines_read,
                updated = report.updated,
                "metadata import progress"
            );
        }
    }

    pool.close().await;
    info!(
        lines = report.lines_read,
        updated = report.updated,
        not_indexed = report.not_indexed,
        malformed = report.malformed,
        "metadata import finished"
    );
    Ok(report)
}
