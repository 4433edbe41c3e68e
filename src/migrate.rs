use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Create the schema for every configured document family. Idempotent.
pub async fn run_migrations(config: &Config) -> Result<()> {
    if let Some(papers) = &config.papers {
        let pool = db::connect(&papers.db_path).await?;
        migrate_papers(&pool).await?;
        pool.close().await;
    }

    if let Some(patents) = &config.patents {
        let pool = db::connect(&patents.db_path).await?;
        migrate_patents(&pool).await?;
        pool.close().await;
    }

    Ok(())
}

/// Paper slice index: one row per canonical paper id. Location fields are
/// written only by the scanner; descriptive fields only by the metadata
/// import.
pub async fn migrate_papers(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS paper_index (
            paper_id TEXT PRIMARY KEY,
            archive_file TEXT NOT NULL,
            offset INTEGER NOT NULL,
            size INTEGER NOT NULL,
            payload_kind TEXT NOT NULL DEFAULT 'unknown',
            year INTEGER NOT NULL,
            latest_version TEXT,
            title TEXT,
            authors TEXT,
            abstract TEXT,
            categories TEXT,
            doi TEXT,
            record_created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    create_fingerprint_table(pool).await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_paper_year ON paper_index(year)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_paper_archive ON paper_index(archive_file)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_paper_kind ON paper_index(payload_kind)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Patent slice index: offsets recorded against the decompressed inner XML
/// stream of each bulk zip.
pub async fn migrate_patents(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS patent_index (
            patent_id TEXT PRIMARY KEY,
            archive_file TEXT NOT NULL,
            offset INTEGER NOT NULL,
            size INTEGER NOT NULL,
            doc_type TEXT NOT NULL DEFAULT 'grant',
            kind_code TEXT,
            year INTEGER,
            record_created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    create_fingerprint_table(pool).await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_patent_year ON patent_index(year)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_patent_archive ON patent_index(archive_file)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_patent_doc_type ON patent_index(doc_type)")
        .execute(pool)
        .await?;

    Ok(())
}

// Both families track scanned archives the same way; the table lives in
// each family's own database so the namespaces stay disjoint.
async fn create_fingerprint_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS archive_files (
            file_path TEXT PRIMARY KEY,
            content_hash TEXT NOT NULL,
            scanned_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
