//! CLI-level tests driving the `pstack` binary against a synthetic archive
//! tree in a temporary directory.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn pstack_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("pstack");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let arxiv_dir = root.join("arxiv/2021");
    fs::create_dir_all(&arxiv_dir).unwrap();
    write_tar(
        &arxiv_dir.join("arXiv_pdf_2103_001.tar"),
        &[
            ("2103.06497v1.pdf", b"%PDF-1.4\nfirst paper\n%%EOF"),
            ("2103.11111v1.pdf", b"%PDF-1.5\nsecond paper\n%%EOF"),
        ],
    );

    let config_content = format!(
        r#"[papers]
db_path = "{root}/data/papers.sqlite"
archive_root = "{root}/arxiv"

[cache]
enabled = true
dir = "{root}/data/cache"
max_size_mb = 16

[scanner]
workers = 2
"#,
        root = root.display()
    );

    let config_path = root.join("paperstack.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
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

fn run_pstack(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = pstack_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .current_dir(config_path.parent().unwrap())
        .output()
        .unwrap_or_else(|e| panic!("Failed to run pstack binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

#[test]
fn test_init_creates_database() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_pstack(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_pstack(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_pstack(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_scan_and_rescan() {
    let (_tmp, config_path) = setup_test_env();

    run_pstack(&config_path, &["init"]);
    let (stdout, stderr, success) = run_pstack(&config_path, &["scan", "papers"]);
    assert!(success, "scan failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("1 scanned"));
    assert!(stdout.contains("2 rows written"));

    // Nothing changed, so nothing is scanned.
    let (stdout, _, success) = run_pstack(&config_path, &["scan", "papers"]);
    assert!(success);
    assert!(stdout.contains("0 scanned"));
    assert!(stdout.contains("1 unchanged"));
}

#[test]
fn test_get_writes_payload() {
    let (tmp, config_path) = setup_test_env();

    run_pstack(&config_path, &["init"]);
    run_pstack(&config_path, &["scan", "papers"]);

    let out = tmp.path().join("paper.pdf");
    let (stdout, stderr, success) = run_pstack(
        &config_path,
        &["get", "paper", "arXiv:2103.06497", "--output", out.to_str().unwrap()],
    );
    assert!(success, "get failed: stdout={}, stderr={}", stdout, stderr);
    assert_eq!(
        fs::read(&out).unwrap(),
        b"%PDF-1.4\nfirst paper\n%%EOF".to_vec()
    );
    assert!(stdout.contains("application/pdf"));
}

#[test]
fn test_get_miss_is_reported_by_kind() {
    let (_tmp, config_path) = setup_test_env();

    run_pstack(&config_path, &["init"]);
    run_pstack(&config_path, &["scan", "papers"]);

    let (_, stderr, success) = run_pstack(&config_path, &["get", "paper", "9999.99999"]);
    assert!(!success);
    assert!(stderr.contains("not_found"));

    let (_, stderr, success) = run_pstack(
        &config_path,
        &["get", "paper", "2103.06497", "--version", "v7"],
    );
    assert!(!success);
    assert!(stderr.contains("version_not_found"));
}

#[test]
fn test_info_and_sample() {
    let (_tmp, config_path) = setup_test_env();

    run_pstack(&config_path, &["init"]);
    run_pstack(&config_path, &["scan", "papers"]);

    let (stdout, _, success) = run_pstack(&config_path, &["info", "papers", "2103.06497"]);
    assert!(success);
    assert!(stdout.contains("\"paper_id\": \"2103.06497\""));
    assert!(stdout.contains("arXiv_pdf_2103_001.tar"));

    let (stdout, _, success) = run_pstack(&config_path, &["sample", "paper", "--format", "pdf"]);
    assert!(success);
    assert!(stdout.contains("2103."));
}

#[test]
fn test_stats_and_cache() {
    let (_tmp, config_path) = setup_test_env();

    run_pstack(&config_path, &["init"]);
    run_pstack(&config_path, &["scan", "papers"]);
    run_pstack(&config_path, &["get", "paper", "2103.06497"]);

    let (stdout, _, success) = run_pstack(&config_path, &["stats"]);
    assert!(success);
    assert!(stdout.contains("Indexed papers:  2"));

    let (stdout, _, success) = run_pstack(&config_path, &["cache", "stats"]);
    assert!(success);
    assert!(stdout.contains("1 entries"));

    let (stdout, _, success) = run_pstack(&config_path, &["cache", "clear"]);
    assert!(success);
    assert!(stdout.contains("Removed 1"));
}
