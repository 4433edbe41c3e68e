//! Query surface over the paper slice index.
//!
//! Lookups are exact-match on the canonical key. The scanner's writer goes
//! through [`replace_archive_rows`], which supersedes all previous rows for
//! one archive and commits the archive's fingerprint in the same
//! transaction. The metadata import goes through [`apply_metadata`], which
//! only ever touches descriptive columns on existing rows.

use anyhow::Result;
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use std::collections::BTreeSet;

use crate::models::{FormatFilter, PaperLocation, PaperMetadata};

const LOCATION_COLUMNS: &str =
    "paper_id, archive_file, offset, size, payload_kind, year, latest_version";

fn row_to_location(row: &sqlx::sqlite::SqliteRow) -> PaperLocation {
    PaperLocation {
        paper_id: row.get("paper_id"),
        archive_file: row.get("archive_file"),
        offset: row.get("offset"),
        size: row.get("size"),
        payload_kind: row.get("payload_kind"),
        year: row.get("year"),
        latest_version: row.get("latest_version"),
    }
}

/// Exact-match lookup by canonical key.
pub async fn lookup(pool: &SqlitePool, paper_id: &str) -> Result<Option<PaperLocation>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM paper_index WHERE paper_id = ?",
        LOCATION_COLUMNS
    ))
    .bind(paper_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.as_ref().map(row_to_location))
}

/// Lookup returning the location plus whatever descriptive metadata has
/// been imported. Metadata absence never affects the location.
pub async fn lookup_with_metadata(
    pool: &SqlitePool,
    paper_id: &str,
) -> Result<Option<(PaperLocation, PaperMetadata)>> {
    let row = sqlx::query(&format!(
        "SELECT {}, title, authors, abstract, categories, doi FROM paper_index WHERE paper_id = ?",
        LOCATION_COLUMNS
    ))
    .bind(paper_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|row| {
        let location = row_to_location(&row);
        let metadata = PaperMetadata {
            title: row.get("title"),
            authors: row.get("authors"),
            abstract_text: row.get("abstract"),
            categories: row.get("categories"),
            doi: row.get("doi"),
        };
        (location, metadata)
    }))
}

/// Filters for [`sample_random`]. All fields are conjunctive.
#[derive(Debug, Clone, Default)]
pub struct PaperFilter {
    pub format: Option<FormatFilter>,
    pub year_min: Option<i64>,
    pub year_max: Option<i64>,
    /// Category prefix: matches legacy ids ("astro-ph...") and imported
    /// category labels.
    pub category: Option<String>,
}

/// Uniform-at-random row over the filtered subset. Sampling is pushed down
/// to the store (`ORDER BY RANDOM()`), so the subset is never materialized
/// in the process.
pub async fn sample_random(pool: &SqlitePool, filter: &PaperFilter) -> Result<Option<PaperLocation>> {
    let mut sql = format!("SELECT {} FROM paper_index WHERE 1=1", LOCATION_COLUMNS);
    let mut binds: Vec<String> = Vec::new();

    match filter.format {
        Some(FormatFilter::Pdf) => sql.push_str(" AND payload_kind = 'pdf'"),
        Some(FormatFilter::Source) => sql.push_str(" AND payload_kind IN ('gzip', 'tar')"),
        None => {}
    }
    if let Some(min) = filter.year_min {
        sql.push_str(" AND year >= ?");
        binds.push(min.to_string());
    }
    if let Some(max) = filter.year_max {
        sql.push_str(" AND year <= ?");
        binds.push(max.to_string());
    }
    if let Some(cat) = &filter.category {
        sql.push_str(" AND (paper_id LIKE ? || '%' OR IFNULL(categories, '') LIKE '%' || ? || '%')");
        binds.push(cat.clone());
        binds.push(cat.clone());
    }
    sql.push_str(" ORDER BY RANDOM() LIMIT 1");

    let mut query = sqlx::query(&sql);
    for bind in &binds {
        query = query.bind(bind);
    }

    let row = query.fetch_optional(pool).await?;
    Ok(row.as_ref().map(row_to_location))
}

/// Distinct category values: legacy prefixes from old-format ids plus
/// labels from imported metadata. Off the request hot path.
pub async fn list_categories(pool: &SqlitePool) -> Result<Vec<String>> {
    let mut out: BTreeSet<String> = BTreeSet::new();

    // Legacy ids start with the category itself, e.g. "astro-ph0412561".
    let legacy: Vec<String> =
        sqlx::query_scalar("SELECT DISTINCT paper_id FROM paper_index WHERE paper_id GLOB '[a-z]*'")
            .fetch_all(pool)
            .await?;
    for id in legacy {
        let prefix: String = id
            .chars()
            .take_while(|c| c.is_ascii_alphabetic() || *c == '-')
            .collect();
        let prefix = prefix.trim_end_matches('-').to_string();
        if !prefix.is_empty() {
            out.insert(prefix);
        }
    }

    let imported: Vec<String> = sqlx::query_scalar(
        "SELECT DISTINCT categories FROM paper_index WHERE categories IS NOT NULL AND categories != ''",
    )
    .fetch_all(pool)
    .await?;
    for line in imported {
        for label in line.split_whitespace() {
            out.insert(label.to_string());
        }
    }

    Ok(out.into_iter().collect())
}

/// Replace all rows for one archive and record its fingerprint, atomically.
///
/// Rows are applied in container iteration order with last-write-wins on
/// duplicate ids. An id that moved here from another archive keeps its
/// imported metadata (the upsert only overwrites location fields); rows of
/// a re-scanned archive are rebuilt and need a metadata re-import.
/// Returns the number of rows written.
pub async fn replace_archive_rows(
    pool: &SqlitePool,
    archive_file: &str,
    content_hash: &str,
    rows: &[PaperLocation],
) -> Result<u64> {
    let now = Utc::now().timestamp();
    let mut tx = pool.begin().await?;

    // Supersede stale entries from a previous scan of this archive.
    sqlx::query("DELETE FROM paper_index WHERE archive_file = ?")
        .bind(archive_file)
        .execute(&mut *tx)
        .await?;

    for row in rows {
        sqlx::query(
            r#"
            INSERT INTO paper_index (paper_id, archive_file, offset, size, payload_kind, year, latest_version, record_created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(paper_id) DO UPDATE SET
                archive_file = excluded.archive_file,
                offset = excluded.offset,
                size = excluded.size,
                payload_kind = excluded.payload_kind,
                year = excluded.year,
                latest_version = excluded.latest_version
            "#,
        )
        .bind(&row.paper_id)
        .bind(&row.archive_file)
        .bind(row.offset)
        .bind(row.size)
        .bind(&row.payload_kind)
        .bind(row.year)
        .bind(&row.latest_version)
        .bind(now)
        .execute(&mut *tx)
        .await?;
    }

    // Fingerprint last, inside the same transaction: a crash before commit
    // leaves the archive unfingerprinted and a retry re-scans it.
    sqlx::query(
        r#"
        INSERT INTO archive_files (file_path, content_hash, scanned_at) VALUES (?, ?, ?)
        ON CONFLICT(file_path) DO UPDATE SET
            content_hash = excluded.content_hash,
            scanned_at = excluded.scanned_at
        "#,
    )
    .bind(archive_file)
    .bind(content_hash)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(rows.len() as u64)
}

/// Update descriptive columns on an existing row. Never creates rows and
/// never touches location fields. Returns false when no row matched.
pub async fn apply_metadata(
    pool: &SqlitePool,
    paper_id: &str,
    metadata: &PaperMetadata,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE paper_index
        SET title = ?, authors = ?, abstract = ?, categories = ?, doi = ?
        WHERE paper_id = ?
        "#,
    )
    .bind(&metadata.title)
    .bind(&metadata.authors)
    .bind(&metadata.abstract_text)
    .bind(&metadata.categories)
    .bind(&metadata.doi)
    .bind(paper_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Summary counts for the stats command.
#[derive(Debug, Clone)]
pub struct PaperStats {
    pub total_papers: i64,
    pub distinct_archives: i64,
    pub distinct_years: i64,
    pub with_metadata: i64,
}

pub async fn stats(pool: &SqlitePool) -> Result<PaperStats> {
    let total_papers: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM paper_index")
        .fetch_one(pool)
        .await?;
    let distinct_archives: i64 =
        sqlx::query_scalar("SELECT COUNT(DISTINCT archive_file) FROM paper_index")
            .fetch_one(pool)
            .await?;
    let distinct_years: i64 = sqlx::query_scalar("SELECT COUNT(DISTINCT year) FROM paper_index")
        .fetch_one(pool)
        .await?;
    let with_metadata: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM paper_index WHERE title IS NOT NULL")
            .fetch_one(pool)
            .await?;

    Ok(PaperStats {
        total_papers,
        distinct_archives,
        distinct_years,
        with_metadata,
    })
}
