//! Repo Ingestor (C4): walk a directory tree in sorted, deterministic order,
//! classify files, cap bytes read, run the signature encoder and chaos
//! analytics, and pipeline the results into the index store.

use crate::chaos::ChaosBlob;
use crate::compress::compress_to_b64;
use crate::config::ManifoldConfig;
use crate::error::{ManifoldError, Result};
use crate::signature::encode_text;
use crate::store::KvStore;
use ignore::overrides::{Override, OverrideBuilder};
use ignore::WalkBuilder;
use rayon::prelude::*;
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Directory basenames pruned entirely at the parent level.
const EXCLUDE_DIRS: &[&str] = &[
    ".git",
    "__pycache__",
    "node_modules",
    ".venv",
    "venv",
    "env",
    ".tox",
    ".mypy_cache",
    ".pytest_cache",
    ".ruff_cache",
    ".idea",
    ".vscode",
    "target",
    ".cache",
    "dist",
    "build",
    ".eggs",
    "htmlcov",
    ".next",
    ".nuxt",
];

/// Filenames matching these globs are pruned entirely (never get a
/// `FileRecord`, unlike ordinary binaries which still get a sentinel).
const EXCLUDE_PATTERNS: &[&str] = &[
    "*.pyc",
    "*.pyo",
    "*.lock",
    "*.log",
    "*.tmp",
    "*.swp",
    ".DS_Store",
    "*.min.js",
    "*.min.css",
];

const TEXT_EXTENSIONS: &[&str] = &[
    "rs", "py", "js", "jsx", "ts", "tsx", "go", "java", "kt", "c", "h", "cpp", "hpp", "cc", "rb",
    "php", "html", "htm", "css", "scss", "json", "yaml", "yml", "toml", "md", "rst", "txt", "sh",
    "bash", "zsh", "sql", "proto", "xml", "ini", "cfg", "conf", "env",
];

const BINARY_EXTENSIONS: &[&str] = &[
    "bin", "dat", "exe", "dll", "so", "dylib", "o", "a", "class", "jar", "zip", "tar", "gz",
    "tgz", "rar", "7z", "png", "jpg", "jpeg", "gif", "bmp", "ico", "pdf", "mp3", "mp4", "avi",
    "mov", "woff", "woff2", "ttf", "eot", "db", "sqlite", "sqlite3",
];

const TEXT_FILENAMES: &[&str] = &[
    "Makefile",
    "Dockerfile",
    "README",
    "LICENSE",
    "CHANGELOG",
    ".gitignore",
    ".dockerignore",
];

fn is_text_file(name: &str) -> bool {
    if TEXT_FILENAMES.contains(&name) {
        return true;
    }
    match Path::new(name).extension().and_then(|e| e.to_str()) {
        Some(ext) => {
            let ext = ext.to_ascii_lowercase();
            if TEXT_EXTENSIONS.contains(&ext.as_str()) {
                true
            } else {
                !BINARY_EXTENSIONS.contains(&ext.as_str())
            }
        }
        None => true,
    }
}

fn is_docs_or_test(rel: &Path) -> bool {
    let in_named_dir = rel.components().any(|c| {
        matches!(
            c.as_os_str().to_str(),
            Some("tests") | Some("test") | Some("docs") | Some("doc") | Some("__tests__")
        )
    });
    if in_named_dir {
        return true;
    }
    match rel.file_stem().and_then(|s| s.to_str()) {
        Some(stem) => stem.starts_with("test_") || stem.ends_with("_test"),
        None => false,
    }
}

/// Override patterns pruning [`EXCLUDE_DIRS`] and [`EXCLUDE_PATTERNS`] on top
/// of whatever `.gitignore`/`.ignore` already hides, mirroring the teacher's
/// own `repomix_default_overrides`: a directory name gets both `**/name` and
/// `**/name/**` so the walker never descends into it.
fn ingest_overrides(root: &Path) -> Result<Override> {
    let mut ob = OverrideBuilder::new(root);
    for d in EXCLUDE_DIRS {
        ob.add(&format!("**/{d}"))
            .and_then(|b| b.add(&format!("**/{d}/**")))
            .map_err(|e| ManifoldError::ParseFailure {
                path: root.to_path_buf(),
                reason: e.to_string(),
            })?;
    }
    for pattern in EXCLUDE_PATTERNS {
        ob.add(&format!("**/{pattern}"))
            .map_err(|e| ManifoldError::ParseFailure {
                path: root.to_path_buf(),
                reason: e.to_string(),
            })?;
    }
    ob.build().map_err(|e| ManifoldError::ParseFailure {
        path: root.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Deterministic, sorted, pruned listing of every file under `root` that
/// survives the exclude rules. Paths are returned relative to `root`.
/// Walks with `ignore::WalkBuilder`, honoring `.gitignore`/`.ignore`/hidden
/// files the same way the teacher's `scanner.rs` does, layered with the
/// project's own hard skip list via an `Override`.
fn walk_sorted(root: &Path) -> Result<Vec<PathBuf>> {
    let overrides = ingest_overrides(root)?;
    let mut out = Vec::new();
    let walker = WalkBuilder::new(root)
        .standard_filters(true)
        .overrides(overrides)
        .build();

    for item in walker {
        let Ok(dent) = item else { continue };
        if !dent.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
            continue;
        }
        let abs = dent.into_path();
        if let Ok(rel) = abs.strip_prefix(root) {
            out.push(rel.to_path_buf());
        }
    }
    out.sort();
    Ok(out)
}

fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Per-file failure accumulated during ingest rather than aborting the run.
#[derive(Debug, Clone)]
pub struct IngestError {
    pub path: PathBuf,
    pub message: String,
}

/// Singleton summary of one ingest run.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct IngestMetadata {
    pub text_files: u64,
    pub binary_files: u64,
    pub total_bytes: u64,
    pub signatures: u64,
    pub skipped: u64,
    pub errors: u64,
    pub elapsed_s: f64,
    pub root: String,
    pub timestamp: String,
    pub avg_chaos: f64,
    pub high_risk_files: u64,
}

#[derive(Debug)]
pub struct IngestReport {
    pub metadata: IngestMetadata,
    pub errors: Vec<IngestError>,
}

/// Outcome of running the per-file ingest recipe on a single file. Shared
/// by [`ingest_repo`] (full walk) and the watcher (single path), so both
/// apply the exact same classify/encode/chaos rules.
#[derive(Debug, Clone)]
pub struct FileIngestOutcome {
    pub fields: Vec<(String, String)>,
    pub byte_len: u64,
    pub is_binary: bool,
    pub chaos: Option<ChaosBlob>,
    pub has_signature: bool,
}

/// Apply the per-file ingest recipe to one file, already read from disk.
/// Returns `None` for empty files, which are skipped entirely.
pub fn build_file_record(
    abs: &Path,
    rel: &Path,
    bytes: &[u8],
    cfg: &ManifoldConfig,
) -> Result<Option<FileIngestOutcome>> {
    if bytes.is_empty() {
        return Ok(None);
    }

    let name = rel.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    let mut fields: Vec<(String, String)> = Vec::new();
    let mut has_signature = false;
    let mut chaos = None;
    let is_binary = !is_text_file(name);

    if !is_binary {
        let text = String::from_utf8_lossy(bytes).into_owned();
        let doc_b64 = compress_to_b64(text.as_bytes()).map_err(|e| ManifoldError::ParseFailure {
            path: abs.to_path_buf(),
            reason: e.to_string(),
        })?;
        fields.push(("doc".to_string(), doc_b64));

        if bytes.len() as u64 >= cfg.window_bytes as u64 {
            let enc = encode_text(
                &text,
                cfg.window_bytes,
                cfg.stride_bytes,
                cfg.precision,
                cfg.hazard_percentile,
            );
            if let Some(first) = enc.windows.first() {
                fields.push(("sig".to_string(), first.signature.clone()));
                has_signature = true;
            }
        }

        let skip_chaos = cfg.lite && is_docs_or_test(rel);
        if cfg.compute_chaos && !skip_chaos {
            if let Some(blob) = crate::chaos::compute_chaos_from_text(&text, cfg, 4096) {
                let json = serde_json::to_vec(&blob)?;
                let chaos_b64 = compress_to_b64(&json).map_err(|e| ManifoldError::ParseFailure {
                    path: abs.to_path_buf(),
                    reason: e.to_string(),
                })?;
                fields.push(("chaos".to_string(), chaos_b64));
                chaos = Some(blob);
            }
        }
    } else {
        let doc = format!("[BINARY sha256={} bytes={}]", sha256_hex(bytes), bytes.len());
        fields.push(("doc".to_string(), doc));
    }

    Ok(Some(FileIngestOutcome {
        fields,
        byte_len: bytes.len() as u64,
        is_binary,
        chaos,
        has_signature,
    }))
}

/// Outcome of running [`process_one_file`] on a single path, ready to be
/// folded into `ingest_repo`'s running totals on the serial side.
enum ProcessedFile {
    Outcome(String, FileIngestOutcome),
    Skipped,
    Error(PathBuf, String),
}

/// Read and encode one file; pure function of the filesystem, safe to call
/// from any rayon worker thread.
fn process_one_file(root: &Path, rel: &Path, cfg: &ManifoldConfig) -> ProcessedFile {
    let abs = root.join(rel);
    let rel_str = rel.to_string_lossy().replace('\\', "/");

    let bytes = match read_capped(&abs, cfg.max_bytes_per_file) {
        Ok(bytes) => bytes,
        Err(e) => return ProcessedFile::Error(rel.to_path_buf(), e.to_string()),
    };

    match build_file_record(&abs, rel, &bytes, cfg) {
        Ok(Some(outcome)) => ProcessedFile::Outcome(rel_str, outcome),
        Ok(None) => ProcessedFile::Skipped,
        Err(e) => ProcessedFile::Error(rel.to_path_buf(), e.to_string()),
    }
}

/// Ingest `root` into `store` per the configured parameters.
pub fn ingest_repo(store: &mut dyn KvStore, root: &Path, cfg: &ManifoldConfig) -> Result<IngestReport> {
    if !root.exists() {
        return Err(ManifoldError::PathNotFound {
            path: root.display().to_string(),
            suggestions: Vec::new(),
        });
    }

    let started = Instant::now();
    if cfg.clear_first {
        store.clear_namespace()?;
    }

    let files = walk_sorted(root)?;

    // Parallel read + encode phase, mirroring the teacher's own
    // "read + hash" fan-out: disk I/O and the per-file signature/chaos
    // recipe are independent of the store, so they run on rayon's pool; the
    // store writes below stay serial since `KvStore` takes `&mut self`.
    // `par_iter` over a slice is an indexed iterator, so `collect` preserves
    // `files`' order regardless of which thread finishes first.
    let processed: Vec<ProcessedFile> = files
        .par_iter()
        .map(|rel| process_one_file(root, rel, cfg))
        .collect();

    let mut text_files = 0u64;
    let mut binary_files = 0u64;
    let mut total_bytes = 0u64;
    let mut signatures = 0u64;
    let mut skipped = 0u64;
    let mut high_risk_files = 0u64;
    let mut chaos_sum = 0.0f64;
    let mut chaos_count = 0u64;
    let mut errors = Vec::new();

    let mut batch: Vec<(String, Vec<(String, String)>, u64)> = Vec::new();

    for item in processed {
        let (rel_str, outcome) = match item {
            ProcessedFile::Outcome(rel_str, outcome) => (rel_str, outcome),
            ProcessedFile::Skipped => {
                skipped += 1;
                continue;
            }
            ProcessedFile::Error(path, message) => {
                debug_log(&format!("ingest: skip {}: {message}", path.display()));
                errors.push(IngestError { path, message });
                skipped += 1;
                continue;
            }
        };

        total_bytes += outcome.byte_len;
        if outcome.is_binary {
            binary_files += 1;
        } else {
            text_files += 1;
            if outcome.has_signature {
                signatures += 1;
            }
            if let Some(blob) = &outcome.chaos {
                if matches!(blob.collapse_risk, crate::chaos::CollapseRisk::High) {
                    high_risk_files += 1;
                }
                chaos_sum += blob.chaos_score;
                chaos_count += 1;
            }
        }

        batch.push((rel_str, outcome.fields, outcome.byte_len));
        if batch.len() >= crate::store::INGEST_BATCH_SIZE {
            store.put_files_batch(&batch)?;
            batch.clear();
        }
    }

    if !batch.is_empty() {
        store.put_files_batch(&batch)?;
    }

    store.invalidate_cached_index("active_index")?;

    let metadata = IngestMetadata {
        text_files,
        binary_files,
        total_bytes,
        signatures,
        skipped,
        errors: errors.len() as u64,
        elapsed_s: started.elapsed().as_secs_f64(),
        root: root.display().to_string(),
        timestamp: crate::util::now_iso8601(),
        avg_chaos: if chaos_count > 0 {
            chaos_sum / chaos_count as f64
        } else {
            0.0
        },
        high_risk_files,
    };
    store.put_meta("ingest", &serde_json::to_string(&metadata)?)?;

    Ok(IngestReport { metadata, errors })
}

fn read_capped(path: &Path, cap: u64) -> std::io::Result<Vec<u8>> {
    let file = std::fs::File::open(path)?;
    let mut limited = file.take(cap);
    let mut buf = Vec::new();
    limited.read_to_end(&mut buf)?;
    Ok(buf)
}

#[cfg(debug_assertions)]
fn debug_log(msg: &str) {
    eprintln!("[manifold-core] {msg}");
}

#[cfg(not(debug_assertions))]
fn debug_log(_msg: &str) {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn write(dir: &Path, rel: &str, contents: &str) {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    #[test]
    fn empty_directory_yields_zero_counts() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = MemoryStore::new();
        let report = ingest_repo(&mut store, dir.path(), &ManifoldConfig::default()).unwrap();
        assert_eq!(report.metadata.text_files, 0);
        assert_eq!(report.metadata.binary_files, 0);
        assert_eq!(store.list_files().unwrap().len(), 0);
    }

    #[test]
    fn single_text_file_gets_doc_and_sig() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path(), "hello.txt", &"Hello".repeat(205));
        let mut store = MemoryStore::new();
        let report = ingest_repo(&mut store, dir.path(), &ManifoldConfig::default()).unwrap();
        assert_eq!(report.metadata.text_files, 1);
        let all = store.get_file_all("hello.txt").unwrap().unwrap();
        assert!(all.contains_key("doc"));
        assert!(all.contains_key("sig"));
    }

    #[test]
    fn binary_file_gets_sentinel_and_no_sig() {
        let dir = tempfile::tempdir().unwrap();
        let random_bytes: Vec<u8> = (0..600_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(dir.path().join("blob.bin"), &random_bytes).unwrap();
        let mut store = MemoryStore::new();
        let cfg = ManifoldConfig {
            max_bytes_per_file: 524_288,
            ..ManifoldConfig::default()
        };
        ingest_repo(&mut store, dir.path(), &cfg).unwrap();
        let all = store.get_file_all("blob.bin").unwrap().unwrap();
        let doc = all.get("doc").unwrap();
        assert!(doc.starts_with("[BINARY sha256="));
        assert!(doc.ends_with("bytes=524288]"));
        assert!(!all.contains_key("sig"));
    }

    #[test]
    fn excluded_directories_are_pruned() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path(), "src/main.rs", "fn main() {}");
        write(&dir.path(), "node_modules/pkg/index.js", "module.exports = {}");
        write(&dir.path(), ".git/HEAD", "ref: refs/heads/main");
        let mut store = MemoryStore::new();
        ingest_repo(&mut store, dir.path(), &ManifoldConfig::default()).unwrap();
        let files = store.list_files().unwrap();
        assert!(files.contains(&"src/main.rs".to_string()));
        assert!(!files.iter().any(|f| f.contains("node_modules")));
        assert!(!files.iter().any(|f| f.contains(".git")));
    }

    #[test]
    fn reingest_is_idempotent_modulo_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path(), "a.py", "def f():\n    return 1\n");
        let mut store = MemoryStore::new();
        let cfg = ManifoldConfig::default();
        let first = ingest_repo(&mut store, dir.path(), &cfg).unwrap();
        let doc1 = store.get_file_all("a.py").unwrap().unwrap();
        let second = ingest_repo(&mut store, dir.path(), &cfg).unwrap();
        let doc2 = store.get_file_all("a.py").unwrap().unwrap();
        assert_eq!(doc1, doc2);
        assert_eq!(first.metadata.text_files, second.metadata.text_files);
        assert_eq!(first.metadata.total_bytes, second.metadata.total_bytes);
    }
}
