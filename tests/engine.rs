//! End-to-end tests over the scan -> index -> retrieve pipeline, built on
//! synthetic archives in temporary directories.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use paperstack::cache::DiskCache;
use paperstack::config::{CacheConfig, Config, PapersConfig, PatentsConfig, ScannerConfig};
use paperstack::db;
use paperstack::migrate;
use paperstack::models::{FormatFilter, Miss, Outcome, SourceTier};
use paperstack::paper_index;
use paperstack::pool::{ArchivePool, XmlStreamCache};
use paperstack::retrieve_paper::PaperRetriever;
use paperstack::retrieve_patent::PatentRetriever;
use paperstack::{import_metadata, scan_papers, scan_patents};
use tempfile::TempDir;

const PDF_A: &[u8] = b"%PDF-1.4\npaper A body bytes\n%%EOF";
const PDF_B: &[u8] = b"%PDF-1.5\npaper B body, somewhat longer than A\n%%EOF";
const GZ_C: &[u8] = &[0x1f, 0x8b, 0x08, 0x00, 0xde, 0xad, 0xbe, 0xef, 0x00, 0x03, 0x42];

struct PaperEnv {
    _tmp: TempDir,
    config: Config,
    root: PathBuf,
    db_path: PathBuf,
}

fn paper_env() -> PaperEnv {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("arxiv");
    let db_path = tmp.path().join("data/papers.sqlite");
    fs::create_dir_all(root.join("2021")).unwrap();

    let config = Config {
        papers: Some(PapersConfig {
            db_path: db_path.clone(),
            archive_root: root.clone(),
            include_globs: vec!["*.tar".to_string()],
        }),
        patents: None,
        cache: CacheConfig::default(),
        scanner: ScannerConfig { workers: 2 },
        retrieval: Default::default(),
    };

    PaperEnv {
        _tmp: tmp,
        config,
        root,
        db_path,
    }
}

fn write_tar(path: &Path, members: &[(&str, &[u8])]) {
    let file = fs::File::create(path).unwrap();
    let mut builder = tar::Builder::new(file);
    for (name, data) in members {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        builder.append_data(&mut header, name, *data).unwrap();
    }
    builder.finish().unwrap();
}

async fn paper_retriever(env: &PaperEnv, cache: Option<Arc<DiskCache>>) -> PaperRetriever {
    let pool = db::connect(&env.db_path).await.unwrap();
    PaperRetriever::new(pool, env.root.clone(), Arc::new(ArchivePool::new(4)), cache)
}

fn found(outcome: Outcome) -> paperstack::models::DocumentBytes {
    match outcome {
        Outcome::Found(doc) => doc,
        Outcome::Miss(miss) => panic!("expected a hit, got miss: {}", miss),
    }
}

fn missed(outcome: Outcome) -> Miss {
    match outcome {
        Outcome::Miss(miss) => miss,
        Outcome::Found(doc) => panic!("expected a miss, got {} bytes", doc.content.len()),
    }
}

#[tokio::test]
async fn paper_round_trip_returns_exact_bytes() {
    let env = paper_env();
    write_tar(
        &env.root.join("2021/arXiv_pdf_2103_001.tar"),
        &[
            ("2103/2103.06497v1.pdf", PDF_A),
            ("2103/2103.11111v2.pdf", PDF_B),
            ("2103/astro-ph0412561.gz", GZ_C),
        ],
    );

    migrate::run_migrations(&env.config).await.unwrap();
    let report = scan_papers::run_scan(&env.config, None).await.unwrap();
    assert_eq!(report.archives_scanned, 1);
    assert_eq!(report.rows_written, 3);

    let retriever = paper_retriever(&env, None).await;

    let doc = found(retriever.retrieve("2103.06497", None, None).await.unwrap());
    assert_eq!(doc.content, PDF_A);
    assert_eq!(doc.content_type, "application/pdf");
    assert_eq!(doc.source, SourceTier::Archive);
    assert_eq!(doc.version.as_deref(), Some("v1"));
    assert_eq!(doc.year, Some(2021));

    // Every accepted spelling resolves to the same payload.
    for spelling in [
        "arXiv:2103.06497",
        "https://arxiv.org/abs/2103.06497",
        "https://arxiv.org/pdf/2103.06497.pdf",
    ] {
        let doc = found(retriever.retrieve(spelling, None, None).await.unwrap());
        assert_eq!(doc.content, PDF_A);
    }

    let doc = found(retriever.retrieve("astro-ph/0412561", None, None).await.unwrap());
    assert_eq!(doc.content, GZ_C);
    assert_eq!(doc.content_type, "application/gzip");
}

#[tokio::test]
async fn rescan_of_unchanged_archives_reads_no_contents() {
    let env = paper_env();
    write_tar(
        &env.root.join("2021/arXiv_pdf_2103_001.tar"),
        &[("2103.06497v1.pdf", PDF_A)],
    );

    migrate::run_migrations(&env.config).await.unwrap();
    let first = scan_papers::run_scan(&env.config, None).await.unwrap();
    assert_eq!(first.archives_scanned, 1);

    let second = scan_papers::run_scan(&env.config, None).await.unwrap();
    assert_eq!(second.archives_seen, 1);
    assert_eq!(second.archives_scanned, 0);
    assert_eq!(second.archives_skipped, 1);
    assert_eq!(second.rows_written, 0);
}

#[tokio::test]
async fn incremental_rescan_touches_only_the_changed_archive() {
    let env = paper_env();
    write_tar(
        &env.root.join("2021/arXiv_pdf_2103_001.tar"),
        &[("2103.06497v1.pdf", PDF_A)],
    );
    write_tar(
        &env.root.join("2021/arXiv_pdf_2103_002.tar"),
        &[("2103.11111v1.pdf", PDF_B)],
    );

    migrate::run_migrations(&env.config).await.unwrap();
    scan_papers::run_scan(&env.config, None).await.unwrap();

    let pool = db::connect(&env.db_path).await.unwrap();
    let untouched_before = paper_index::lookup(&pool, "2103.11111").await.unwrap().unwrap();

    // Grow the first archive; the second stays byte-identical.
    write_tar(
        &env.root.join("2021/arXiv_pdf_2103_001.tar"),
        &[
            ("2103.06497v1.pdf", PDF_A),
            ("2103.22222v1.pdf", b"%PDF-1.4 new paper"),
        ],
    );

    let report = scan_papers::run_scan(&env.config, None).await.unwrap();
    assert_eq!(report.archives_seen, 2);
    assert_eq!(report.archives_scanned, 1);
    assert_eq!(report.archives_skipped, 1);

    let untouched_after = paper_index::lookup(&pool, "2103.11111").await.unwrap().unwrap();
    assert_eq!(untouched_before, untouched_after);
    assert!(paper_index::lookup(&pool, "2103.22222").await.unwrap().is_some());
}

#[tokio::test]
async fn version_miss_and_lookup_miss_are_distinct() {
    let env = paper_env();
    write_tar(
        &env.root.join("2021/arXiv_pdf_2103_001.tar"),
        &[("2103.06497v1.pdf", PDF_A)],
    );
    migrate::run_migrations(&env.config).await.unwrap();
    scan_papers::run_scan(&env.config, None).await.unwrap();

    let retriever = paper_retriever(&env, None).await;

    // Present, but only v1 is retained.
    let miss = missed(retriever.retrieve("2103.06497", Some("v2"), None).await.unwrap());
    assert_eq!(miss.kind(), "version_not_found");
    match miss {
        Miss::VersionNotHeld { requested, held } => {
            assert_eq!(requested, "v2");
            assert_eq!(held.as_deref(), Some("v1"));
        }
        other => panic!("unexpected miss: {:?}", other),
    }

    // The retained version is served.
    let doc = found(retriever.retrieve("2103.06497v1", None, None).await.unwrap());
    assert_eq!(doc.content, PDF_A);

    // Wholly absent id.
    let miss = missed(retriever.retrieve("9999.99999", None, None).await.unwrap());
    assert_eq!(miss.kind(), "not_found");
    match miss {
        Miss::NotIndexed { hint } => assert!(hint.unwrap().contains("arXiv_pdf_9999")),
        other => panic!("unexpected miss: {:?}", other),
    }
}

#[tokio::test]
async fn format_filter_is_a_hard_constraint() {
    let env = paper_env();
    write_tar(
        &env.root.join("2021/arXiv_pdf_2103_001.tar"),
        &[("2103.06497v1.pdf", PDF_A)],
    );
    migrate::run_migrations(&env.config).await.unwrap();
    scan_papers::run_scan(&env.config, None).await.unwrap();

    let retriever = paper_retriever(&env, None).await;

    let miss = missed(
        retriever
            .retrieve("2103.06497", None, Some(FormatFilter::Source))
            .await
            .unwrap(),
    );
    assert_eq!(miss.kind(), "format_unavailable");

    let doc = found(
        retriever
            .retrieve("2103.06497", None, Some(FormatFilter::Pdf))
            .await
            .unwrap(),
    );
    assert_eq!(doc.content, PDF_A);
}

#[tokio::test]
async fn missing_archive_is_unavailable_not_a_lookup_miss() {
    let env = paper_env();
    let archive = env.root.join("2021/arXiv_pdf_2103_001.tar");
    write_tar(&archive, &[("2103.06497v1.pdf", PDF_A)]);
    migrate::run_migrations(&env.config).await.unwrap();
    scan_papers::run_scan(&env.config, None).await.unwrap();

    fs::remove_file(&archive).unwrap();

    let retriever = paper_retriever(&env, None).await;
    let miss = missed(retriever.retrieve("2103.06497", None, None).await.unwrap());
    assert_eq!(miss.kind(), "archive_unavailable");
}

#[tokio::test]
async fn cache_serves_payloads_after_archive_loss() {
    let env = paper_env();
    let archive = env.root.join("2021/arXiv_pdf_2103_001.tar");
    write_tar(&archive, &[("2103.06497v1.pdf", PDF_A)]);
    migrate::run_migrations(&env.config).await.unwrap();
    scan_papers::run_scan(&env.config, None).await.unwrap();

    let cache_dir = env.root.join("cache");
    let cache = Arc::new(DiskCache::open(&cache_dir, 1024 * 1024).unwrap());
    let retriever = paper_retriever(&env, Some(cache)).await;

    let doc = found(retriever.retrieve("2103.06497", None, None).await.unwrap());
    assert_eq!(doc.source, SourceTier::Archive);

    fs::remove_file(&archive).unwrap();

    let doc = found(retriever.retrieve("2103.06497", None, None).await.unwrap());
    assert_eq!(doc.source, SourceTier::Cache);
    assert_eq!(doc.content, PDF_A);
}

#[tokio::test]
async fn concurrent_retrievals_are_consistent() {
    let env = paper_env();
    let members: Vec<(String, Vec<u8>)> = (0..10)
        .map(|i| {
            (
                format!("2103.{:05}v1.pdf", 10000 + i),
                format!("%PDF-1.4 body of paper number {}", i).into_bytes(),
            )
        })
        .collect();
    let refs: Vec<(&str, &[u8])> = members
        .iter()
        .map(|(name, data)| (name.as_str(), data.as_slice()))
        .collect();
    write_tar(&env.root.join("2021/arXiv_pdf_2103_001.tar"), &refs);

    migrate::run_migrations(&env.config).await.unwrap();
    scan_papers::run_scan(&env.config, None).await.unwrap();

    let retriever = Arc::new(paper_retriever(&env, None).await);

    let mut tasks = Vec::new();
    for round in 0..100 {
        let retriever = retriever.clone();
        let i = round % 10;
        let expected = members[i].1.clone();
        tasks.push(tokio::spawn(async move {
            let id = format!("2103.{:05}", 10000 + i);
            let doc = match retriever.retrieve(&id, None, None).await.unwrap() {
                Outcome::Found(doc) => doc,
                Outcome::Miss(miss) => panic!("{}: unexpected miss {}", id, miss),
            };
            assert_eq!(doc.content, expected);
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
}

#[tokio::test]
async fn metadata_import_updates_only_indexed_rows() {
    let env = paper_env();
    write_tar(
        &env.root.join("2021/arXiv_pdf_2103_001.tar"),
        &[("2103.06497v1.pdf", PDF_A)],
    );
    migrate::run_migrations(&env.config).await.unwrap();
    scan_papers::run_scan(&env.config, None).await.unwrap();

    let snapshot = env.root.join("snapshot.jsonl");
    fs::write(
        &snapshot,
        concat!(
            r#"{"id":"2103.06497","title":"Indexed  Paper","authors":"A. Author","abstract":"Words.","categories":"cs.DB","doi":null}"#,
            "\n",
            r#"{"id":"1801.00001","title":"Absent Paper","authors":null,"abstract":null,"categories":null,"doi":null}"#,
            "\n",
            "not json at all\n",
        ),
    )
    .unwrap();

    let report = import_metadata::run_import(&env.config, &snapshot, None)
        .await
        .unwrap();
    assert_eq!(report.updated, 1);
    assert_eq!(report.not_indexed, 1);
    assert_eq!(report.malformed, 1);

    let retriever = paper_retriever(&env, None).await;
    let info = retriever.get_info("2103.06497").await.unwrap().unwrap();
    assert_eq!(info.metadata.title.as_deref(), Some("Indexed Paper"));
    assert_eq!(info.metadata.categories.as_deref(), Some("cs.DB"));
    // Location fields are untouched by the import.
    assert_eq!(info.size, PDF_A.len() as i64);
}

// Patent family.

fn patent_block(root: &str, doc_number: &str, kind: &str, date: &str) -> Vec<u8> {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <{root}>\n\
         <publication-reference>\n\
         <document-id><country>US</country>\n\
         <doc-number>{doc_number}</doc-number>\n\
         <kind>{kind}</kind>\n\
         <date>{date}</date>\n\
         </document-id>\n\
         </publication-reference>\n\
         <abstract>body of {doc_number}</abstract>\n\
         </{root}>\n"
    )
    .into_bytes()
}

struct PatentEnv {
    _tmp: TempDir,
    config: Config,
    root: PathBuf,
    db_path: PathBuf,
}

fn patent_env() -> PatentEnv {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("uspto");
    let db_path = tmp.path().join("data/patents.sqlite");
    fs::create_dir_all(root.join("PTGRXML")).unwrap();
    fs::create_dir_all(root.join("APPXML")).unwrap();

    let config = Config {
        papers: None,
        patents: Some(PatentsConfig {
            db_path: db_path.clone(),
            archive_root: root.clone(),
            include_globs: vec!["*.zip".to_string()],
        }),
        cache: CacheConfig::default(),
        scanner: ScannerConfig { workers: 2 },
        retrieval: Default::default(),
    };

    PatentEnv {
        _tmp: tmp,
        config,
        root,
        db_path,
    }
}

fn write_patent_zip(path: &Path, inner_name: &str, blocks: &[Vec<u8>]) {
    use std::io::Write;
    let file = fs::File::create(path).unwrap();
    let mut zw = zip::ZipWriter::new(file);
    zw.start_file(inner_name, zip::write::SimpleFileOptions::default())
        .unwrap();
    for block in blocks {
        zw.write_all(block).unwrap();
    }
    zw.finish().unwrap();
}

async fn patent_retriever(env: &PatentEnv) -> PatentRetriever {
    let pool = db::connect(&env.db_path).await.unwrap();
    PatentRetriever::new(
        pool,
        env.root.clone(),
        Arc::new(XmlStreamCache::new(2)),
        None,
    )
}

#[tokio::test]
async fn patent_round_trip_returns_exact_blocks() {
    let env = patent_env();
    let blocks = vec![
        patent_block("us-patent-grant", "11123456", "B2", "20210615"),
        patent_block("us-patent-grant", "D0987654", "S", "20210615"),
    ];
    write_patent_zip(
        &env.root.join("PTGRXML/ipg210615.zip"),
        "ipg210615.xml",
        &blocks,
    );
    write_patent_zip(
        &env.root.join("APPXML/ipa200507.zip"),
        "ipa200507.xml",
        &[patent_block(
            "us-patent-application",
            "20200123456",
            "A1",
            "20200507",
        )],
    );

    migrate::run_migrations(&env.config).await.unwrap();
    let report = scan_patents::run_scan(&env.config, None).await.unwrap();
    assert_eq!(report.archives_scanned, 2);
    assert_eq!(report.rows_written, 3);

    let retriever = patent_retriever(&env).await;

    // Full publication number, bare number, and design prefix all resolve.
    let doc = found(retriever.retrieve("US11123456B2").await.unwrap());
    assert_eq!(doc.content, blocks[0]);
    assert_eq!(doc.content_type, "application/xml");
    assert_eq!(doc.doc_type.as_deref(), Some("grant"));
    assert_eq!(doc.kind_code.as_deref(), Some("B2"));
    assert_eq!(doc.year, Some(2021));

    let doc = found(retriever.retrieve("11123456").await.unwrap());
    assert_eq!(doc.content, blocks[0]);

    let doc = found(retriever.retrieve("D0987654S").await.unwrap());
    assert_eq!(doc.content, blocks[1]);

    let doc = found(retriever.retrieve("US20200123456A1").await.unwrap());
    assert_eq!(doc.doc_type.as_deref(), Some("application"));

    // Prefix stripping is case insensitive, but a lowercase trailing "a1" is
    // not a kind code, so the bare number is the lowercase-friendly spelling.
    let doc = found(retriever.retrieve("us20200123456").await.unwrap());
    assert_eq!(doc.doc_type.as_deref(), Some("application"));

    let miss = missed(retriever.retrieve("99999999").await.unwrap());
    assert_eq!(miss.kind(), "not_found");
}

#[tokio::test]
async fn replaced_patent_archive_is_unavailable_until_rescanned() {
    let env = patent_env();
    let archive = env.root.join("PTGRXML/ipg210615.zip");
    write_patent_zip(
        &archive,
        "ipg210615.xml",
        &[patent_block("us-patent-grant", "11123456", "B2", "20210615")],
    );

    migrate::run_migrations(&env.config).await.unwrap();
    scan_patents::run_scan(&env.config, None).await.unwrap();

    // Replace with a much smaller stream: recorded slices no longer fit.
    write_patent_zip(&archive, "ipg210615.xml", &[b"<?xml?>".to_vec()]);

    let retriever = patent_retriever(&env).await;
    let miss = missed(retriever.retrieve("11123456").await.unwrap());
    assert_eq!(miss.kind(), "archive_unavailable");
}

#[tokio::test]
async fn single_archive_scan_leaves_other_archives_alone() {
    let env = patent_env();
    write_patent_zip(
        &env.root.join("PTGRXML/ipg210615.zip"),
        "ipg210615.xml",
        &[patent_block("us-patent-grant", "11123456", "B2", "20210615")],
    );
    write_patent_zip(
        &env.root.join("PTGRXML/ipg210622.zip"),
        "ipg210622.xml",
        &[patent_block("us-patent-grant", "11200000", "B1", "20210622")],
    );

    migrate::run_migrations(&env.config).await.unwrap();
    let report = scan_patents::run_scan(&env.config, Some(Path::new("PTGRXML/ipg210615.zip")))
        .await
        .unwrap();
    assert_eq!(report.archives_seen, 1);
    assert_eq!(report.archives_scanned, 1);

    let retriever = patent_retriever(&env).await;
    assert!(matches!(
        retriever.retrieve("11123456").await.unwrap(),
        Outcome::Found(_)
    ));
    // The other archive was never scanned.
    let miss = missed(retriever.retrieve("11200000").await.unwrap());
    assert_eq!(miss.kind(), "not_found");
}

#[tokio::test]
async fn corrupt_archive_is_skipped_and_reported() {
    let env = patent_env();
    fs::write(env.root.join("PTGRXML/broken.zip"), b"this is not a zip").unwrap();
    write_patent_zip(
        &env.root.join("PTGRXML/ipg210615.zip"),
        "ipg210615.xml",
        &[patent_block("us-patent-grant", "11123456", "B2", "20210615")],
    );

    migrate::run_migrations(&env.config).await.unwrap();
    let report = scan_patents::run_scan(&env.config, None).await.unwrap();
    assert_eq!(report.archives_seen, 2);
    assert_eq!(report.archives_scanned, 1);
    assert_eq!(report.archives_failed, 1);

    // The good archive's rows landed despite the bad one.
    let retriever = patent_retriever(&env).await;
    assert!(matches!(
        retriever.retrieve("11123456").await.unwrap(),
        Outcome::Found(_)
    ));

    // A failed archive is not fingerprinted, so a retry re-attempts it.
    let report = scan_patents::run_scan(&env.config, None).await.unwrap();
    assert_eq!(report.archives_failed, 1);
    assert_eq!(report.archives_skipped, 1);
}
