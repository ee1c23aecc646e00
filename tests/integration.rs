use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn kb_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("kb");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let files_dir = root.join("files");
    fs::create_dir_all(&files_dir).unwrap();
    fs::write(
        files_dir.join("alpha.md"),
        "# Alpha Document\n\nThis is the alpha document about Rust programming.",
    )
    .unwrap();
    fs::write(files_dir.join("image.png"), [0x89, b'P', b'N', b'G']).unwrap();

    let config_content = format!(
        r#"[storage]
vector_store_dir = "{root}/data/vector_store"
upload_dir = "{root}/data/uploads"

[chunking]
chunk_size = 200
overlap = 20

[retrieval]
top_k = 4

[embedding]
provider = "disabled"

[generation]
provider = "disabled"

[server]
bind = "127.0.0.1:7341"
"#,
        root = root.display()
    );

    let config_path = config_dir.join("kb.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_kb(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = kb_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run kb binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_files_empty_for_new_owner() {
    let (_tmp, config) = setup_test_env();
    let (stdout, stderr, success) = run_kb(&config, &["files", "--owner", "u1"]);
    assert!(success, "files failed: {}", stderr);
    assert!(stdout.contains("No files indexed for owner 'u1'"));
}

#[test]
fn test_ask_without_documents_returns_sentinel() {
    let (_tmp, config) = setup_test_env();
    let (stdout, stderr, success) = run_kb(
        &config,
        &["ask", "What is in my notes?", "--owner", "u1", "--session", "s-1"],
    );
    assert!(success, "ask failed: {}", stderr);
    assert_eq!(stdout.trim(), "No documents indexed");
}

#[test]
fn test_delete_unknown_file_reports_not_found() {
    let (_tmp, config) = setup_test_env();
    let (stdout, stderr, success) = run_kb(&config, &["delete", "ghost.txt", "--owner", "u1"]);
    assert!(success, "delete failed: {}", stderr);
    assert!(stdout.contains("'ghost.txt' not found for owner 'u1'"));
}

#[test]
fn test_ingest_fails_when_embeddings_disabled() {
    let (tmp, config) = setup_test_env();
    let doc = tmp.path().join("files/alpha.md");
    let (_stdout, stderr, success) =
        run_kb(&config, &["ingest", doc.to_str().unwrap(), "--owner", "u1"]);
    assert!(!success);
    assert!(stderr.contains("embedding"), "unexpected stderr: {}", stderr);

    // Nothing was recorded.
    let (stdout, _, success) = run_kb(&config, &["files", "--owner", "u1"]);
    assert!(success);
    assert!(stdout.contains("No files indexed"));
    assert!(!tmp.path().join("data/vector_store/u1").exists());
}

#[test]
fn test_upload_failure_discards_stored_copy() {
    let (tmp, config) = setup_test_env();
    let doc = tmp.path().join("files/alpha.md");
    let (_stdout, _stderr, success) =
        run_kb(&config, &["upload", doc.to_str().unwrap(), "--owner", "u1"]);
    assert!(!success);
    assert!(!tmp.path().join("data/uploads/u1/alpha.md").exists());
}

#[test]
fn test_ingest_unsupported_format() {
    let (tmp, config) = setup_test_env();
    let doc = tmp.path().join("files/image.png");
    let (_stdout, stderr, success) =
        run_kb(&config, &["ingest", doc.to_str().unwrap(), "--owner", "u1"]);
    assert!(!success);
    assert!(stderr.contains("unsupported document format"), "stderr: {}", stderr);
}

#[test]
fn test_invalid_owner_rejected() {
    let (_tmp, config) = setup_test_env();
    let (_stdout, stderr, success) = run_kb(&config, &["files", "--owner", "../etc"]);
    assert!(!success);
    assert!(stderr.contains("invalid owner"), "stderr: {}", stderr);
}

#[test]
fn test_rebuild_with_nothing_cataloged() {
    let (_tmp, config) = setup_test_env();
    let (stdout, stderr, success) = run_kb(&config, &["rebuild", "--owner", "u1"]);
    assert!(success, "rebuild failed: {}", stderr);
    assert!(stdout.contains("0 files, 0 chunks, 0 skipped"));
}

#[test]
fn test_missing_config_file_errors() {
    let tmp = TempDir::new().unwrap();
    let (_stdout, stderr, success) = run_kb(&tmp.path().join("nope.toml"), &["files", "--owner", "u1"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}

#[test]
fn test_invalid_chunking_config_errors() {
    let (_tmp, config) = setup_test_env();
    let content = fs::read_to_string(&config)
        .unwrap()
        .replace("overlap = 20", "overlap = 500");
    fs::write(&config, content).unwrap();
    let (_stdout, stderr, success) = run_kb(&config, &["files", "--owner", "u1"]);
    assert!(!success);
    assert!(stderr.contains("overlap"));
}
