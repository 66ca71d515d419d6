//! Search & Retrieval (C6): keyword/regex search over document bodies, file
//! read with suggestions, file listing, signature lookup, signature
//! proximity search, and signature-sequence search.

use crate::compress::decompress_from_b64;
use crate::config::ManifoldConfig;
use crate::error::{ManifoldError, Result};
use crate::index::{DocId, ManifoldIndex};
use crate::signature::{encode_text, parse_signature, SignatureComponents};
use crate::store::KvStore;
use regex::{escape, Regex};
use serde::Serialize;

const MAX_MATCHES_PER_FILE: usize = 5;
const CONTEXT_LINES: usize = 2;
const SUGGESTION_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchedLine {
    pub line_number: usize,
    pub text: String,
    pub is_match: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileSearchResult {
    pub path: String,
    pub match_count: usize,
    pub matches: Vec<Vec<MatchedLine>>,
}

fn compile_query(query: &str, case_sensitive: bool) -> Regex {
    let built = Regex::new(query).or_else(|_| Regex::new(&escape(query)));
    // Falls back to a literal-escaped search on a bad regex; the
    // escaped form is always valid, so this never panics.
    let pattern = built.unwrap_or_else(|_| Regex::new(&escape(query)).expect("escaped literal is valid regex"));
    if case_sensitive {
        return pattern;
    }
    Regex::new(&format!("(?i){}", pattern.as_str())).unwrap_or(pattern)
}

fn load_text(store: &mut dyn KvStore, path: &str) -> Result<Option<String>> {
    let Some(doc_b64) = store.get_file_field(path, "doc")? else {
        return Ok(None);
    };
    if doc_b64.starts_with("[BINARY") {
        return Ok(None);
    }
    let bytes = decompress_from_b64(&doc_b64).unwrap_or_else(|_| doc_b64.into_bytes());
    Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
}

/// Keyword/regex search over every (glob-filtered) non-binary document body
///.
pub fn search_code(
    store: &mut dyn KvStore,
    query: &str,
    file_glob: Option<&str>,
    max_results: usize,
    case_sensitive: bool,
) -> Result<Vec<FileSearchResult>> {
    let re = compile_query(query, case_sensitive);
    let files = match file_glob {
        Some(pattern) => store.scan_files(pattern)?,
        None => store.list_files()?,
    };

    let mut results = Vec::new();
    for path in files {
        let Some(text) = load_text(store, &path)? else {
            continue;
        };
        let lines: Vec<&str> = text.lines().collect();
        let mut match_lines = Vec::new();
        for (i, line) in lines.iter().enumerate() {
            if re.is_match(line) {
                match_lines.push(i);
            }
        }
        if match_lines.is_empty() {
            continue;
        }

        let mut snippets = Vec::new();
        for &idx in match_lines.iter().take(MAX_MATCHES_PER_FILE) {
            let start = idx.saturating_sub(CONTEXT_LINES);
            let end = (idx + CONTEXT_LINES + 1).min(lines.len());
            let snippet = (start..end)
                .map(|i| MatchedLine {
                    line_number: i + 1,
                    text: lines[i].to_string(),
                    is_match: i == idx,
                })
                .collect();
            snippets.push(snippet);
        }

        results.push(FileSearchResult {
            path,
            match_count: match_lines.len(),
            matches: snippets,
        });
        if results.len() >= max_results {
            break;
        }
    }
    Ok(results)
}

#[derive(Debug, Clone, PartialEq)]
pub struct FileBody {
    pub path: String,
    pub lines: Vec<(usize, String)>,
}

/// File read with 1-based line numbering. On a
/// missing path, suggests up to [`SUGGESTION_LIMIT`] basename-matching
/// candidates from the file list.
pub fn get_file(store: &mut dyn KvStore, rel: &str) -> Result<FileBody> {
    match load_text(store, rel)? {
        Some(text) => {
            let lines = text
                .lines()
                .enumerate()
                .map(|(i, line)| (i + 1, line.to_string()))
                .collect();
            Ok(FileBody {
                path: rel.to_string(),
                lines,
            })
        }
        None => {
            if store.get_file_field(rel, "doc")?.is_some() {
                // It exists but is a binary sentinel, not missing.
                return Ok(FileBody {
                    path: rel.to_string(),
                    lines: Vec::new(),
                });
            }
            Err(ManifoldError::PathNotFound {
                path: rel.to_string(),
                suggestions: basename_suggestions(store, rel)?,
            })
        }
    }
}

fn basename_suggestions(store: &mut dyn KvStore, rel: &str) -> Result<Vec<String>> {
    let needle = std::path::Path::new(rel)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(rel)
        .to_ascii_lowercase();
    let all = store.list_files()?;
    Ok(all
        .into_iter()
        .filter(|path| {
            let basename = std::path::Path::new(path)
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or(path)
                .to_ascii_lowercase();
            basename.contains(&needle) || needle.contains(&basename)
        })
        .take(SUGGESTION_LIMIT)
        .collect())
}

/// List files, optionally glob-filtered and capped.
pub fn list_files(store: &mut dyn KvStore, glob_pattern: Option<&str>, limit: usize) -> Result<Vec<String>> {
    let mut files = match glob_pattern {
        Some(pattern) => store.scan_files(pattern)?,
        None => store.list_files()?,
    };
    files.truncate(limit);
    Ok(files)
}

/// The stored `sig` field, computed and persisted on demand if absent.
pub fn signature_of(store: &mut dyn KvStore, rel: &str, cfg: &ManifoldConfig) -> Result<Option<String>> {
    if let Some(sig) = store.get_file_field(rel, "sig")? {
        return Ok(Some(sig));
    }
    let Some(text) = load_text(store, rel)? else {
        return Ok(None);
    };
    if text.len() < cfg.window_bytes {
        return Ok(None);
    }
    let enc = encode_text(
        &text,
        cfg.window_bytes,
        cfg.stride_bytes,
        cfg.precision,
        cfg.hazard_percentile,
    );
    let Some(first) = enc.windows.first() else {
        return Ok(None);
    };
    store.put_file_field(rel, "sig", &first.signature)?;
    Ok(Some(first.signature.clone()))
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProximityMatch {
    pub path: String,
    pub signature: String,
    pub deviation: f64,
}

fn max_abs_deviation(a: &SignatureComponents, b: &SignatureComponents) -> f64 {
    (a.coherence - b.coherence)
        .abs()
        .max((a.stability - b.stability).abs())
        .max((a.entropy - b.entropy).abs())
}

/// Signature proximity search: enumerate every stored `sig`,
/// keep files within `tolerance` (max per-component absolute deviation) of
/// `target`, sorted ascending by deviation.
pub fn search_by_structure(
    store: &mut dyn KvStore,
    target: &str,
    tolerance: f64,
    max_results: usize,
) -> Result<Vec<ProximityMatch>> {
    let target_components =
        parse_signature(target).ok_or_else(|| ManifoldError::InvalidSignature(target.to_string()))?;

    let files = store.list_files()?;
    let mut matches = Vec::new();
    for path in files {
        let Some(sig) = store.get_file_field(&path, "sig")? else {
            continue;
        };
        let Some(components) = parse_signature(&sig) else {
            continue;
        };
        let deviation = max_abs_deviation(&target_components, &components);
        if deviation <= tolerance {
            matches.push(ProximityMatch {
                path,
                signature: sig,
                deviation,
            });
        }
    }
    matches.sort_by(|a, b| a.deviation.partial_cmp(&b.deviation).unwrap());
    matches.truncate(max_results);
    Ok(matches)
}

#[derive(Debug, Clone, PartialEq)]
pub struct SequenceMatch {
    pub doc_id: DocId,
    pub path: String,
    pub signatures: Vec<String>,
    pub start_byte: usize,
    pub end_byte: usize,
}

/// Signature-sequence search: encode `candidate`, then walk the
/// index's occurrences per signature to find contiguous multi-signature
/// runs belonging to the same `doc_id` (used for provenance lookup).
pub fn search_by_signature_sequence(
    store: &mut dyn KvStore,
    candidate: &str,
    cfg: &ManifoldConfig,
) -> Result<Vec<SequenceMatch>> {
    let index = ManifoldIndex::build(store, None, cfg)?;
    let enc = encode_text(
        candidate,
        cfg.window_bytes,
        cfg.stride_bytes,
        cfg.precision,
        cfg.hazard_percentile,
    );
    if enc.windows.len() < 2 {
        return Ok(Vec::new());
    }

    // For each doc_id, the set of (window_index, byte_range) that matched
    // consecutively against that document's own occurrence stream.
    let mut runs: Vec<SequenceMatch> = Vec::new();
    let mut current: Option<(DocId, Vec<String>, usize, usize)> = None;

    for w in &enc.windows {
        let doc_for_this_window = index
            .signature_entry(&w.signature)
            .and_then(|entry| entry.occurrences.first().map(|o| o.doc_id));

        match (doc_for_this_window, &mut current) {
            (Some(doc_id), Some((cur_doc, sigs, _start, end))) if doc_id == *cur_doc => {
                sigs.push(w.signature.clone());
                *end = w.byte_end;
            }
            (Some(doc_id), _) => {
                if let Some((doc_id, sigs, start, end)) = current.take() {
                    if sigs.len() >= 2 {
                        if let Some(path) = index.document_path(doc_id) {
                            runs.push(SequenceMatch {
                                doc_id,
                                path: path.to_string(),
                                signatures: sigs,
                                start_byte: start,
                                end_byte: end,
                            });
                        }
                    }
                }
                current = Some((doc_id, vec![w.signature.clone()], w.byte_start, w.byte_end));
            }
            (None, _) => {
                if let Some((doc_id, sigs, start, end)) = current.take() {
                    if sigs.len() >= 2 {
                        if let Some(path) = index.document_path(doc_id) {
                            runs.push(SequenceMatch {
                                doc_id,
                                path: path.to_string(),
                                signatures: sigs,
                                start_byte: start,
                                end_byte: end,
                            });
                        }
                    }
                }
            }
        }
    }
    if let Some((doc_id, sigs, start, end)) = current {
        if sigs.len() >= 2 {
            if let Some(path) = index.document_path(doc_id) {
                runs.push(SequenceMatch {
                    doc_id,
                    path: path.to_string(),
                    signatures: sigs,
                    start_byte: start,
                    end_byte: end,
                });
            }
        }
    }
    Ok(runs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compress::compress_to_b64;
    use crate::store::MemoryStore;

    fn seed(store: &mut MemoryStore, path: &str, text: &str) {
        let doc = compress_to_b64(text.as_bytes()).unwrap();
        store.put_file(path, &[("doc".to_string(), doc)], text.len() as u64).unwrap();
    }

    #[test]
    fn search_finds_literal_substring() {
        let mut store = MemoryStore::new();
        seed(&mut store, "a.py", "def handler():\n    pass\n");
        let results = search_code(&mut store, "def handler", None, 10, true).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].match_count, 1);
    }

    #[test]
    fn invalid_regex_falls_back_to_literal_search() {
        let mut store = MemoryStore::new();
        seed(&mut store, "a.py", "value = def (x)\n");
        // "def (" is an invalid regex (unbalanced group) but a valid literal.
        let results = search_code(&mut store, "def (", None, 10, true).unwrap();
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn binary_records_are_skipped() {
        let mut store = MemoryStore::new();
        store
            .put_file("blob.bin", &[("doc".to_string(), "[BINARY sha256=ab bytes=1]".to_string())], 1)
            .unwrap();
        let results = search_code(&mut store, "BINARY", None, 10, true).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn get_file_returns_1_based_line_numbers() {
        let mut store = MemoryStore::new();
        seed(&mut store, "a.py", "one\ntwo\nthree\n");
        let body = get_file(&mut store, "a.py").unwrap();
        assert_eq!(body.lines[0], (1, "one".to_string()));
        assert_eq!(body.lines[2], (3, "three".to_string()));
    }

    #[test]
    fn get_file_missing_path_suggests_basename_matches() {
        let mut store = MemoryStore::new();
        seed(&mut store, "src/handler.py", "pass\n");
        let err = get_file(&mut store, "handler.py").unwrap_err();
        match err {
            ManifoldError::PathNotFound { suggestions, .. } => {
                assert!(suggestions.contains(&"src/handler.py".to_string()));
            }
            other => panic!("expected PathNotFound, got {other:?}"),
        }
    }

    #[test]
    fn search_by_structure_zero_tolerance_matches_only_self() {
        let mut store = MemoryStore::new();
        store
            .put_file("a.rs", &[("sig".to_string(), "c0.500_s0.500_e0.500".to_string())], 1)
            .unwrap();
        store
            .put_file("b.rs", &[("sig".to_string(), "c0.900_s0.100_e0.900".to_string())], 1)
            .unwrap();
        let matches = search_by_structure(&mut store, "c0.500_s0.500_e0.500", 0.0, 10).unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].path, "a.rs");
    }

    #[test]
    fn search_by_structure_full_tolerance_matches_everything() {
        let mut store = MemoryStore::new();
        store
            .put_file("a.rs", &[("sig".to_string(), "c0.500_s0.500_e0.500".to_string())], 1)
            .unwrap();
        store
            .put_file("b.rs", &[("sig".to_string(), "c0.900_s0.100_e0.900".to_string())], 1)
            .unwrap();
        let matches = search_by_structure(&mut store, "c0.500_s0.500_e0.500", 1.0, 10).unwrap();
        assert_eq!(matches.len(), 2);
    }

    #[test]
    fn signature_of_computes_and_persists_on_demand() {
        let mut store = MemoryStore::new();
        let cfg = ManifoldConfig::default();
        seed(&mut store, "a.py", &"def f(): pass\n".repeat(100));
        assert!(store.get_file_field("a.py", "sig").unwrap().is_none());
        let sig = signature_of(&mut store, "a.py", &cfg).unwrap();
        assert!(sig.is_some());
        assert_eq!(store.get_file_field("a.py", "sig").unwrap(), sig);
    }
}
