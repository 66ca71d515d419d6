//! End-to-end coverage over the ingest -> search -> verify pipeline, run
//! against `MemoryStore` since there's no live Redis/Valkey in this
//! environment.

use manifold_core::config::ManifoldConfig;
use manifold_core::ingest::ingest_repo;
use manifold_core::search;
use manifold_core::store::MemoryStore;
use manifold_core::verify::verify_snippet;
use std::fs;
use std::path::Path;

fn write(dir: &Path, rel: &str, contents: &str) {
    let path = dir.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, contents).unwrap();
}

fn padded(marker: &str) -> String {
    // Pad well past the default 512-byte window so encode_text produces more
    // than one window per file.
    let filler = "# filler line to pad this file out past one window\n".repeat(20);
    format!("{marker}\n{filler}")
}

#[test]
fn ingest_then_search_finds_the_needle() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "src/needle.py",
        &padded("def handle_request(req):\n    return req.method"),
    );
    write(
        dir.path(),
        "src/other.py",
        &padded("def unrelated():\n    return 42"),
    );

    let cfg = ManifoldConfig::default();
    let mut store = MemoryStore::new();
    let report = ingest_repo(&mut store, dir.path(), &cfg).unwrap();
    assert_eq!(report.metadata.text_files, 2);
    assert_eq!(report.metadata.errors, 0);

    let results = search::search_code(&mut store, "handle_request", None, 20, true).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].path, "src/needle.py");
}

#[test]
fn ingest_then_get_file_returns_numbered_lines() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a.py", &padded("line one\nline two"));

    let cfg = ManifoldConfig::default();
    let mut store = MemoryStore::new();
    ingest_repo(&mut store, dir.path(), &cfg).unwrap();

    let body = search::get_file(&mut store, "a.py").unwrap();
    assert_eq!(body.lines[0].0, 1);
    assert_eq!(body.lines[0].1, "line one");
}

#[test]
fn get_file_suggests_basename_matches_on_miss() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "pkg/sub/widget.py", &padded("class Widget: pass"));

    let cfg = ManifoldConfig::default();
    let mut store = MemoryStore::new();
    ingest_repo(&mut store, dir.path(), &cfg).unwrap();

    let err = search::get_file(&mut store, "widget.py").unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("not found"));
}

#[test]
fn ingest_then_verify_snippet_that_was_indexed() {
    let dir = tempfile::tempdir().unwrap();
    let body = padded("def handle_request(req):\n    return req.method");
    write(dir.path(), "src/needle.py", &body);

    let cfg = ManifoldConfig::default();
    let mut store = MemoryStore::new();
    ingest_repo(&mut store, dir.path(), &cfg).unwrap();

    let result = verify_snippet(&mut store, &body, None, cfg.coverage_threshold, &cfg).unwrap();
    assert!(result.coverage > 0.0);
    assert!(result.matched_documents.contains(&"src/needle.py".to_string()));
}

#[test]
fn verify_rejects_text_shorter_than_window() {
    let cfg = ManifoldConfig::default();
    let mut store = MemoryStore::new();
    let err = verify_snippet(&mut store, "short", None, cfg.coverage_threshold, &cfg).unwrap_err();
    assert!(err.to_string().contains("shorter than"));
}

#[test]
fn reingesting_after_file_removal_drops_it_from_the_index() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "keep.py", &padded("KEEP = 1"));
    write(dir.path(), "drop.py", &padded("DROP = 1"));

    let cfg = ManifoldConfig::default();
    let mut store = MemoryStore::new();
    ingest_repo(&mut store, dir.path(), &cfg).unwrap();

    fs::remove_file(dir.path().join("drop.py")).unwrap();
    let mut cfg2 = cfg.clone();
    cfg2.clear_first = true;
    ingest_repo(&mut store, dir.path(), &cfg2).unwrap();

    let files = search::list_files(&mut store, None, 100).unwrap();
    assert!(files.contains(&"keep.py".to_string()));
    assert!(!files.contains(&"drop.py".to_string()));
}
