//! Query surface over the patent slice index.
//!
//! Same shape as the paper index but deliberately not abstracted over it:
//! the two families have different identifier grammars, archive containers
//! and row schemas, and share only the cache and pool utilities.

use anyhow::Result;
use chrono::Utc;
use sqlx::{Row, SqlitePool};

use crate::models::PatentLocation;

const COLUMNS: &str = "patent_id, archive_file, offset, size, doc_type, kind_code, year";

fn row_to_location(row: &sqlx::sqlite::SqliteRow) -> PatentLocation {
    PatentLocation {
        patent_id: row.get("patent_id"),
        archive_file: row.get("archive_file"),
        offset: row.get("offset"),
        size: row.get("size"),
        doc_type: row.get("doc_type"),
        kind_code: row.get("kind_code"),
        year: row.get("year"),
    }
}

/// Exact-match lookup by bare document number.
pub async fn lookup(pool: &SqlitePool, patent_id: &str) -> Result<Option<PatentLocation>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM patent_index WHERE patent_id = ?",
        COLUMNS
    ))
    .bind(patent_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.as_ref().map(row_to_location))
}

/// Filters for [`sample_random`].
#[derive(Debug, Clone, Default)]
pub struct PatentFilter {
    /// "grant" or "application".
    pub doc_type: Option<String>,
    pub kind_code: Option<String>,
    pub year_min: Option<i64>,
    pub year_max: Option<i64>,
}

/// Uniform-at-random row over the filtered subset, sampled in the store.
pub async fn sample_random(
    pool: &SqlitePool,
    filter: &PatentFilter,
) -> Result<Option<PatentLocation>> {
    let mut sql = format!("SELECT {} FROM patent_index WHERE 1=1", COLUMNS);
    let mut binds: Vec<String> = Vec::new();

    if let Some(doc_type) = &filter.doc_type {
        sql.push_str(" AND doc_type = ?");
        binds.push(doc_type.clone());
    }
    if let Some(kind) = &filter.kind_code {
        sql.push_str(" AND kind_code = ?");
        binds.push(kind.clone());
    }
    if let Some(min) = filter.year_min {
        sql.push_str(" AND year >= ?");
        binds.push(min.to_string());
    }
    if let Some(max) = filter.year_max {
        sql.push_str(" AND year <= ?");
        binds.push(max.to_string());
    }
    sql.push_str(" ORDER BY RANDOM() LIMIT 1");

    let mut query = sqlx::query(&sql);
    for bind in &binds {
        query = query.bind(bind);
    }

    let row = query.fetch_optional(pool).await?;
    Ok(row.as_ref().map(row_to_location))
}

/// Distinct values of a facet column ("doc_type" or "kind_code").
pub async fn list_distinct(pool: &SqlitePool, facet: &str) -> Result<Vec<String>> {
    let column = match facet {
        "doc_type" => "doc_type",
        "kind_code" => "kind_code",
        other => anyhow::bail!("unknown patent facet: '{}' (expected doc_type or kind_code)", other),
    };

    let values: Vec<String> = sqlx::query_scalar(&format!(
        "SELECT DISTINCT {col} FROM patent_index WHERE {col} IS NOT NULL ORDER BY {col}",
        col = column
    ))
    .fetch_all(pool)
    .await?;

    Ok(values)
}

/// Replace all rows for one archive and record its fingerprint, atomically.
/// Same crash-safety contract as the paper writer.
pub async fn replace_archive_rows(
    pool: &SqlitePool,
    archive_file: &str,
    content_hash: &str,
    rows: &[PatentLocation],
) -> Result<u64> {
    let now = Utc::now().timestamp();
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM patent_index WHERE archive_file = ?")
        .bind(archive_file)
        .execute(&mut *tx)
        .await?;

    for row in rows {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO patent_index
                (patent_id, archive_file, offset, size, doc_type, kind_code, year, record_created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&row.patent_id)
        .bind(&row.archive_file)
        .bind(row.offset)
        .bind(row.size)
        .bind(&row.doc_type)
        .bind(&row.kind_code)
        .bind(row.year)
        .bind(now)
        .execute(&mut *tx)
        .await?;
    }

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

/// Summary counts for the stats command.
#[derive(Debug, Clone)]
pub struct PatentStats {
    pub total_patents: i64,
    pub grants: i64,
    pub applications: i64,
    pub distinct_archives: i64,
}

pub async fn stats(pool: &SqlitePool) -> Result<PatentStats> {
    let total_patents: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM patent_index")
        .fetch_one(pool)
        .await?;
    let grants: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM patent_index WHERE doc_type = 'grant'")
            .fetch_one(pool)
            .await?;
    let applications: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM patent_index WHERE doc_type = 'application'")
            .fetch_one(pool)
            .await?;
    let distinct_archives: i64 =
        sqlx::query_scalar("SELECT COUNT(DISTINCT archive_file) FROM patent_index")
            .fetch_one(pool)
            .await?;

    Ok(PatentStats {
        total_patents,
        grants,
        applications,
        distinct_archives,
    })
}
