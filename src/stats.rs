//! Index statistics and health overview.
//!
//! Quick summary of what's indexed per family: row counts, archive counts,
//! last scan times, database sizes, and cache usage. Used by `pstack stats`
//! to confirm that scans and imports are doing what they should.

use anyhow::Result;

use crate::cache::DiskCache;
use crate::config::Config;
use crate::db;
use crate::paper_index;
use crate::patent_index;

/// Run the stats command: query each configured index and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    println!("Paperstack — Index Stats");
    println!("========================");

    if let Some(papers) = &config.papers {
        let pool = db::connect(&papers.db_path).await?;
        let stats = paper_index::stats(&pool).await?;
        let (archives, last_scan) = fingerprint_summary(&pool).await?;
        let db_size = std::fs::metadata(&papers.db_path).map(|m| m.len()).unwrap_or(0);

        println!();
        println!("  Papers");
        println!("    Database:        {}", papers.db_path.display());
        println!("    Size:            {}", format_bytes(db_size));
        println!("    Indexed papers:  {}", stats.total_papers);
        println!(
            "    With metadata:   {} / {} ({}%)",
            stats.with_metadata,
            stats.total_papers,
            percent(stats.with_metadata, stats.total_papers)
        );
        println!(
            "    Archives:        {} indexed, {} fingerprinted",
            stats.distinct_archives, archives
        );
        println!("    Years covered:   {}", stats.distinct_years);
        println!("    Last scan:       {}", scan_display(last_scan));

        pool.close().await;
    }

    if let Some(patents) = &config.patents {
        let pool = db::connect(&patents.db_path).await?;
        let stats = patent_index::stats(&pool).await?;
        let (archives, last_scan) = fingerprint_summary(&pool).await?;
        let db_size = std::fs::metadata(&patents.db_path).map(|m| m.len()).unwrap_or(0);

        println!();
        println!("  Patents");
        println!("    Database:        {}", patents.db_path.display());
        println!("    Size:            {}", format_bytes(db_size));
        println!("    Indexed patents: {}", stats.total_patents);
        println!("    Grants:          {}", stats.grants);
        println!("    Applications:    {}", stats.applications);
        println!(
            "    Archives:        {} indexed, {} fingerprinted",
            stats.distinct_archives, archives
        );
        println!("    Last scan:       {}", scan_display(last_scan));

        pool.close().await;
    }

    if config.cache.enabled {
        let cache = DiskCache::open(&config.cache.dir, config.cache.budget_bytes())?;
        let stats = cache.stats().await;
        println!();
        println!("  Cache");
        println!("    Directory:       {}", stats.dir.display());
        println!(
            "    Resident:        {} / {} ({} entries)",
            format_bytes(stats.resident_bytes),
            format_bytes(stats.budget_bytes),
            stats.entries
        );
    }

    println!();
    Ok(())
}

async fn fingerprint_summary(pool: &sqlx::SqlitePool) -> Result<(i64, Option<i64>)> {
    let archives: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM archive_files")
        .fetch_one(pool)
        .await?;
    let last_scan: Option<i64> = sqlx::query_scalar("SELECT MAX(scanned_at) FROM archive_files")
        .fetch_one(pool)
        .await?;
    Ok((archives, last_scan))
}

fn scan_display(ts: Option<i64>) -> String {
    match ts {
        Some(ts) => format_ts_relative(ts),
        None => "never".to_string(),
    }
}

fn percent(part: i64, whole: i64) -> i64 {
    if whole > 0 {
        (part * 100) / whole
    } else {
        0
    }
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let now = chrono::Utc::now().timestamp();
    let delta = now - ts;

    if delta < 0 {
        return chrono::DateTime::from_timestamp(ts, 0)
            .map(|dt| dt.format("%Y-%m-%d %H:%M UTC").to_string())
            .unwrap_or_else(|| ts.to_string());
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    }
}
