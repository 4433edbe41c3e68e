//! # Paperstack CLI (`pstack`)
//!
//! The `pstack` binary drives the whole system: schema initialization,
//! offline archive scans, metadata import, and document retrieval.
//!
//! ## Usage
//!
//! ```bash
//! pstack --config ./config/paperstack.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `pstack init` | Create the SQLite databases and run schema migrations |
//! | `pstack scan papers` | Index paper tar archives under the papers root |
//! | `pstack scan patents` | Index patent zip archives under the patents root |
//! | `pstack get paper <id>` | Slice one paper's payload out of its archive |
//! | `pstack get patent <id>` | Slice one patent's XML block |
//! | `pstack info <family> <id>` | Print a document's index record, no byte read |
//! | `pstack sample <family>` | Pick a random indexed document |
//! | `pstack list <facet>` | List categories / doc types / kind codes |
//! | `pstack import-metadata <file>` | Attach titles and authors from a JSONL dump |
//! | `pstack stats` | Index and cache statistics |
//! | `pstack cache stats\|clear` | Inspect or empty the payload cache |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use paperstack::cache::DiskCache;
use paperstack::config::{self, Config};
use paperstack::migrate;
use paperstack::models::{FormatFilter, Miss, Outcome};
use paperstack::paper_index::PaperFilter;
use paperstack::patent_index::{self, PatentFilter};
use paperstack::pool::{ArchivePool, XmlStreamCache};
use paperstack::retrieve_paper::PaperRetriever;
use paperstack::retrieve_patent::PatentRetriever;
use paperstack::{db, import_metadata, paper_index, scan_papers, scan_patents, stats};

/// Paperstack CLI — serve papers and patents out of bulk archives by
/// indexed byte range.
#[derive(Parser)]
#[command(
    name = "pstack",
    about = "Paperstack — indexed archive-slice retrieval for bulk paper and patent archives",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/paperstack.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the index databases.
    ///
    /// Creates the SQLite files and all tables for every configured family.
    /// Idempotent.
    Init,

    /// Scan bulk archives and bring the slice index up to date.
    ///
    /// Unchanged archives (by content hash) are skipped without reading
    /// their contents. Corrupt archives are logged and skipped.
    Scan {
        /// Document family: `papers` or `patents`.
        family: Family,

        /// Scan only this archive (path relative to the family's root).
        #[arg(long)]
        archive: Option<PathBuf>,
    },

    /// Retrieve one document's payload.
    Get {
        #[command(subcommand)]
        target: GetTarget,
    },

    /// Print a document's index record without reading any payload bytes.
    Info {
        /// Document family: `papers` or `patents`.
        family: Family,

        /// Document identifier, in any accepted spelling.
        id: String,
    },

    /// Pick a uniformly random indexed document.
    Sample {
        #[command(subcommand)]
        target: SampleTarget,
    },

    /// List distinct facet values held in the index.
    List {
        /// `categories` (papers), `doc-types` or `kind-codes` (patents).
        facet: Facet,
    },

    /// Attach descriptive metadata to indexed papers from a JSON-lines dump.
    ImportMetadata {
        /// Path to the metadata snapshot (one JSON record per line).
        path: PathBuf,

        /// Stop after this many lines.
        #[arg(long)]
        limit: Option<u64>,
    },

    /// Print index and cache statistics.
    Stats,

    /// Inspect or empty the payload cache.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum Family {
    Papers,
    Patents,
}

#[derive(Subcommand)]
enum GetTarget {
    /// Retrieve a paper's payload (PDF or source archive).
    Paper {
        /// Paper id: `2103.06497`, `arXiv:2103.06497v2`, an arxiv.org URL, ...
        id: String,

        /// Require a payload kind: `pdf` or `source`. A mismatch is a miss,
        /// not a fallback.
        #[arg(long)]
        format: Option<FormatFilter>,

        /// Require this exact version (e.g. `v2`). Bulk archives retain one
        /// version per paper; any other request is a miss.
        #[arg(long)]
        version: Option<String>,

        /// Write the payload here instead of `<id>.<ext>`.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Retrieve a patent's XML document.
    Patent {
        /// Patent id: `US11123456B2`, `11123456`, `D0987654S`, ...
        id: String,

        /// Write the document here instead of `<id>.xml`.
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum SampleTarget {
    /// Sample a random paper.
    Paper {
        /// Restrict to a payload kind: `pdf` or `source`.
        #[arg(long)]
        format: Option<FormatFilter>,

        #[arg(long)]
        year_min: Option<i64>,

        #[arg(long)]
        year_max: Option<i64>,

        /// Category prefix, e.g. `astro-ph` or `cs.DB`.
        #[arg(long)]
        category: Option<String>,
    },

    /// Sample a random patent.
    Patent {
        /// `grant` or `application`.
        #[arg(long)]
        doc_type: Option<String>,

        #[arg(long)]
        kind_code: Option<String>,

        #[arg(long)]
        year_min: Option<i64>,

        #[arg(long)]
        year_max: Option<i64>,
    },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum Facet {
    Categories,
    DocTypes,
    KindCodes,
}

#[derive(Subcommand)]
enum CacheAction {
    /// Print cache directory, budget, and resident size.
    Stats,

    /// Remove every cached payload.
    Clear,
}

fn open_cache(cfg: &Config) -> anyhow::Result<Option<Arc<DiskCache>>> {
    if !cfg.cache.enabled {
        return Ok(None);
    }
    Ok(Some(Arc::new(DiskCache::open(
        &cfg.cache.dir,
        cfg.cache.budget_bytes(),
    )?)))
}

async fn paper_retriever(cfg: &Config) -> anyhow::Result<PaperRetriever> {
    let papers = cfg
        .papers
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("[papers] not configured"))?;
    let pool = db::connect(&papers.db_path).await?;
    Ok(PaperRetriever::new(
        pool,
        papers.archive_root.clone(),
        Arc::new(ArchivePool::new(cfg.retrieval.max_open_archives)),
        open_cache(cfg)?,
    ))
}

async fn patent_retriever(cfg: &Config) -> anyhow::Result<PatentRetriever> {
    let patents = cfg
        .patents
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("[patents] not configured"))?;
    let pool = db::connect(&patents.db_path).await?;
    Ok(PatentRetriever::new(
        pool,
        patents.archive_root.clone(),
        Arc::new(XmlStreamCache::new(cfg.retrieval.max_xml_streams)),
        open_cache(cfg)?,
    ))
}

fn report_miss(miss: &Miss) -> ! {
    eprintln!("{}: {}", miss.kind(), miss);
    std::process::exit(1)
}

fn print_scan_report(report: &paperstack::models::ScanReport) {
    println!(
        "Scan finished: {} archives seen, {} scanned, {} unchanged, {} failed, {} rows written.",
        report.archives_seen,
        report.archives_scanned,
        report.archives_skipped,
        report.archives_failed,
        report.rows_written
    );
}

fn write_payload(path: &std::path::Path, content: &[u8]) -> anyhow::Result<()> {
    std::fs::write(path, content)
        .map_err(|e| anyhow::anyhow!("writing {}: {}", path.display(), e))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("paperstack=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Databases initialized successfully.");
        }
        Commands::Scan { family, archive } => {
            let report = match family {
                Family::Papers => scan_papers::run_scan(&cfg, archive.as_deref()).await?,
                Family::Patents => scan_patents::run_scan(&cfg, archive.as_deref()).await?,
            };
            print_scan_report(&report);
            if report.archives_failed > 0 {
                std::process::exit(1);
            }
        }
        Commands::Get { target } => match target {
            GetTarget::Paper {
                id,
                format,
                version,
                output,
            } => {
                let retriever = paper_retriever(&cfg).await?;
                match retriever.retrieve(&id, version.as_deref(), format).await? {
                    Outcome::Found(doc) => {
                        let path = output.unwrap_or_else(|| {
                            PathBuf::from(format!(
                                "{}.{}",
                                doc.normalized_id,
                                doc.format.extension()
                            ))
                        });
                        write_payload(&path, &doc.content)?;
                        println!(
                            "{} -> {} ({} bytes, {}, from {})",
                            doc.normalized_id,
                            path.display(),
                            doc.content.len(),
                            doc.content_type,
                            doc.source.as_str()
                        );
                    }
                    Outcome::Miss(miss) => report_miss(&miss),
                }
            }
            GetTarget::Patent { id, output } => {
                let retriever = patent_retriever(&cfg).await?;
                match retriever.retrieve(&id).await? {
                    Outcome::Found(doc) => {
                        let path = output
                            .unwrap_or_else(|| PathBuf::from(format!("{}.xml", doc.normalized_id)));
                        write_payload(&path, &doc.content)?;
                        println!(
                            "{} -> {} ({} bytes, {}, from {})",
                            doc.normalized_id,
                            path.display(),
                            doc.content.len(),
                            doc.doc_type.as_deref().unwrap_or("unknown"),
                            doc.source.as_str()
                        );
                    }
                    Outcome::Miss(miss) => report_miss(&miss),
                }
            }
        },
        Commands::Info { family, id } => match family {
            Family::Papers => {
                let retriever = paper_retriever(&cfg).await?;
                match retriever.get_info(&id).await? {
                    Some(info) => println!("{}", serde_json::to_string_pretty(&info)?),
                    None => report_miss(&Miss::NotIndexed { hint: None }),
                }
            }
            Family::Patents => {
                let retriever = patent_retriever(&cfg).await?;
                match retriever.get_info(&id).await? {
                    Some(info) => println!("{}", serde_json::to_string_pretty(&info)?),
                    None => report_miss(&Miss::NotIndexed { hint: None }),
                }
            }
        },
        Commands::Sample { target } => match target {
            SampleTarget::Paper {
                format,
                year_min,
                year_max,
                category,
            } => {
                let papers = cfg
                    .papers
                    .as_ref()
                    .ok_or_else(|| anyhow::anyhow!("[papers] not configured"))?;
                let pool = db::connect(&papers.db_path).await?;
                let filter = PaperFilter {
                    format,
                    year_min,
                    year_max,
                    category,
                };
                match paper_index::sample_random(&pool, &filter).await? {
                    Some(row) => println!(
                        "{} ({}, {} bytes in {})",
                        row.paper_id, row.payload_kind, row.size, row.archive_file
                    ),
                    None => report_miss(&Miss::NotIndexed { hint: None }),
                }
            }
            SampleTarget::Patent {
                doc_type,
                kind_code,
                year_min,
                year_max,
            } => {
                let patents = cfg
                    .patents
                    .as_ref()
                    .ok_or_else(|| anyhow::anyhow!("[patents] not configured"))?;
                let pool = db::connect(&patents.db_path).await?;
                let filter = PatentFilter {
                    doc_type,
                    kind_code,
                    year_min,
                    year_max,
                };
                match patent_index::sample_random(&pool, &filter).await? {
                    Some(row) => println!(
                        "{} ({} {}, {} bytes in {})",
                        row.patent_id,
                        row.doc_type,
                        row.kind_code.as_deref().unwrap_or("-"),
                        row.size,
                        row.archive_file
                    ),
                    None => report_miss(&Miss::NotIndexed { hint: None }),
                }
            }
        },
        Commands::List { facet } => match facet {
            Facet::Categories => {
                let papers = cfg
                    .papers
                    .as_ref()
                    .ok_or_else(|| anyhow::anyhow!("[papers] not configured"))?;
                let pool = db::connect(&papers.db_path).await?;
                for category in paper_index::list_categories(&pool).await? {
                    println!("{}", category);
                }
            }
            Facet::DocTypes | Facet::KindCodes => {
                let patents = cfg
                    .patents
                    .as_ref()
                    .ok_or_else(|| anyhow::anyhow!("[patents] not configured"))?;
                let pool = db::connect(&patents.db_path).await?;
                let column = match facet {
                    Facet::DocTypes => "doc_type",
                    _ => "kind_code",
                };
                for value in patent_index::list_distinct(&pool, column).await? {
                    println!("{}", value);
                }
            }
        },
        Commands::ImportMetadata { path, limit } => {
            let report = import_metadata::run_import(&cfg, &path, limit).await?;
            println!(
                "Import finished: {} lines read, {} rows updated, {} not indexed, {} malformed.",
                report.lines_read, report.updated, report.not_indexed, report.malformed
            );
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Cache { action } => {
            let Some(cache) = open_cache(&cfg)? else {
                anyhow::bail!("cache is not enabled in the configuration");
            };
            match action {
                CacheAction::Stats => {
                    let stats = cache.stats().await;
                    println!("Directory: {}", stats.dir.display());
                    println!(
                        "Resident:  {} / {} bytes ({} entries)",
                        stats.resident_bytes, stats.budget_bytes, stats.entries
                    );
                }
                CacheAction::Clear => {
                    let removed = cache.clear().await?;
                    println!("Removed {} cached payloads.", removed);
                }
            }
        }
    }

    Ok(())
}
