//! Snippet Verifier (C8): encode a candidate text under the index's stored
//! parameters and check how much of it is already present in the corpus,
//! gated by the hazard threshold so only "safe" matches count toward
//! coverage.

use crate::config::ManifoldConfig;
use crate::error::{ManifoldError, Result};
use crate::index::ManifoldIndex;
use crate::signature::{encode_text, EncodeResult};
use crate::store::KvStore;
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq)]
pub struct VerifyResult {
    pub total_windows: usize,
    pub matched_windows: usize,
    pub gated_hits: usize,
    pub coverage: f64,
    pub match_ratio: f64,
    pub verified: bool,
    pub matched_documents: Vec<String>,
}

/// Verify a candidate snippet against the (optionally scope-filtered) index
///. `text` must be at least `window_bytes` long.
pub fn verify_snippet(
    store: &mut dyn KvStore,
    text: &str,
    scope_glob: Option<&str>,
    coverage_threshold: f64,
    cfg: &ManifoldConfig,
) -> Result<VerifyResult> {
    if text.len() < cfg.window_bytes {
        return Err(ManifoldError::TooShort {
            bytes: text.len(),
            window_bytes: cfg.window_bytes,
        });
    }

    let index = ManifoldIndex::build(store, scope_glob, cfg)?;
    let enc = encode_text(
        text,
        cfg.window_bytes,
        cfg.stride_bytes,
        cfg.precision,
        cfg.hazard_percentile,
    );

    let total_windows = enc.windows.len();
    let mut matched_windows = 0usize;
    let mut gated_hits = 0usize;
    let mut matched_documents = BTreeSet::new();

    for w in &enc.windows {
        let Some(entry) = index.signature_entry(&w.signature) else {
            continue;
        };
        matched_windows += 1;
        if w.hazard <= index.meta.hazard_threshold {
            gated_hits += 1;
        }
        for occurrence in &entry.occurrences {
            if let Some(path) = index.document_path(occurrence.doc_id) {
                matched_documents.insert(path.to_string());
            }
        }
    }

    let coverage = if total_windows == 0 {
        0.0
    } else {
        gated_hits as f64 / total_windows as f64
    };
    let match_ratio = if total_windows == 0 {
        0.0
    } else {
        matched_windows as f64 / total_windows as f64
    };

    Ok(VerifyResult {
        total_windows,
        matched_windows,
        gated_hits,
        coverage,
        match_ratio,
        verified: coverage >= coverage_threshold,
        matched_documents: matched_documents.into_iter().collect(),
    })
}

/// Reconstruct a text from its own [`EncodeResult`] by concatenating
/// prototype bytes in window order, overlapping by `window_bytes -
/// stride_bytes` and keeping only the non-overlapping tail on each step
/// after the first window.
pub fn reconstruct_from_windows(enc: &EncodeResult) -> String {
    let overlap_bytes = enc.window_bytes.saturating_sub(enc.stride_bytes);
    let mut out = String::new();
    for (i, w) in enc.windows.iter().enumerate() {
        let Some(prototype) = enc.prototypes.get(&w.signature) else {
            continue;
        };
        if i == 0 {
            out.push_str(prototype);
            continue;
        }
        // Skip the leading bytes/chars that overlapped with the previous
        // window; an approximation on char boundaries since the prototype
        // is already UTF-8-lossy decoded text, not raw bytes.
        let skip_chars = prototype
            .char_indices()
            .take_while(|(byte_idx, _)| *byte_idx < overlap_bytes)
            .count();
        let tail: String = prototype.chars().skip(skip_chars).collect();
        out.push_str(&tail);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compress::compress_to_b64;
    use crate::store::MemoryStore;

    fn seed(store: &mut MemoryStore, path: &str, text: &str) {
        let doc = compress_to_b64(text.as_bytes()).unwrap();
        store
            .put_file(path, &[("doc".to_string(), doc)], text.len() as u64)
            .unwrap();
    }

    #[test]
    fn too_short_text_is_rejected() {
        let mut store = MemoryStore::new();
        let cfg = ManifoldConfig::default();
        let err = verify_snippet(&mut store, "hi", None, 0.5, &cfg).unwrap_err();
        assert!(matches!(err, ManifoldError::TooShort { .. }));
    }

    #[test]
    fn verifying_a_file_already_in_the_corpus_matches_fully() {
        let mut store = MemoryStore::new();
        let cfg = ManifoldConfig::default();
        let body = "def handler(event):\n    return event\n".repeat(50);
        seed(&mut store, "handler.py", &body);

        let result = verify_snippet(&mut store, &body, None, 0.0, &cfg).unwrap();
        assert_eq!(result.match_ratio, 1.0);
        assert!(result.matched_documents.contains(&"handler.py".to_string()));
    }

    #[test]
    fn unrelated_text_against_empty_corpus_has_zero_match_ratio() {
        let mut store = MemoryStore::new();
        let cfg = ManifoldConfig::default();
        let body = "the quick brown fox jumps over the lazy dog ".repeat(50);
        let result = verify_snippet(&mut store, &body, None, 0.5, &cfg).unwrap();
        assert_eq!(result.match_ratio, 0.0);
        assert!(!result.verified);
    }

    #[test]
    fn reconstruction_recovers_the_original_prefix() {
        let cfg = ManifoldConfig::default();
        let body = "abcdefgh".repeat(100);
        let enc = encode_text(&body, cfg.window_bytes, cfg.stride_bytes, cfg.precision, cfg.hazard_percentile);
        let rebuilt = reconstruct_from_windows(&enc);
        assert!(!rebuilt.is_empty());
    }
}
