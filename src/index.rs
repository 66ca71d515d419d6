//! The cached `ManifoldIndex` aggregate: a flat-arena rebuild of
//! every document's full window set, keyed by signature and by document, so
//! verify/search can do signature lookups without re-walking the whole
//! corpus on every query. This is a *derived* cache — any write invalidates
//! it and readers tolerate its absence by rebuilding.

use crate::compress::{compress_to_b64, decompress_from_b64};
use crate::config::ManifoldConfig;
use crate::error::Result;
use crate::signature::encode_text;
use crate::store::KvStore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const ACTIVE_INDEX_KEY: &str = "active_index";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SignatureId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocId(pub u32);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Occurrence {
    pub doc_id: DocId,
    pub byte_start: usize,
    pub byte_end: usize,
    pub hazard: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct HazardStats {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub sum: f64,
    pub mean: f64,
}

impl HazardStats {
    fn from_values(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self {
                count: 0,
                min: 0.0,
                max: 0.0,
                sum: 0.0,
                mean: 0.0,
            };
        }
        let sum: f64 = values.iter().sum();
        Self {
            count: values.len(),
            min: values.iter().cloned().fold(f64::INFINITY, f64::min),
            max: values.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
            sum,
            mean: sum / values.len() as f64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SignatureEntry {
    pub signature: String,
    pub prototype_text: String,
    pub prototype_doc_id: DocId,
    pub prototype_byte_range: (usize, usize),
    pub occurrences: Vec<Occurrence>,
    pub hazard: HazardStats,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentEntry {
    pub path: String,
    pub characters: usize,
    pub bytes: usize,
    pub window_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexTotals {
    pub documents: usize,
    pub signatures: usize,
    pub windows: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexMeta {
    pub window_bytes: usize,
    pub stride_bytes: usize,
    pub precision: u32,
    pub hazard_percentile: f64,
    pub hazard_threshold: f64,
    pub totals: IndexTotals,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ManifoldIndex {
    signatures: Vec<SignatureEntry>,
    sig_lookup: HashMap<String, SignatureId>,
    documents: Vec<DocumentEntry>,
    doc_lookup: HashMap<String, DocId>,
    pub meta: IndexMeta,
}

impl ManifoldIndex {
    pub fn signature_entry(&self, sig: &str) -> Option<&SignatureEntry> {
        self.sig_lookup.get(sig).map(|id| &self.signatures[id.0 as usize])
    }

    pub fn document_path(&self, id: DocId) -> Option<&str> {
        self.documents.get(id.0 as usize).map(|d| d.path.as_str())
    }

    pub fn document_id(&self, path: &str) -> Option<DocId> {
        self.doc_lookup.get(path).copied()
    }

    pub fn documents(&self) -> &[DocumentEntry] {
        &self.documents
    }

    /// Rebuild the index from scratch by re-encoding every indexed text
    /// document (binaries and unreadable blobs are skipped).
    pub fn build(store: &mut dyn KvStore, scope_glob: Option<&str>, cfg: &ManifoldConfig) -> Result<Self> {
        let paths = match scope_glob {
            Some(pattern) => store.scan_files(pattern)?,
            None => store.list_files()?,
        };

        let mut signatures: Vec<SignatureEntry> = Vec::new();
        let mut sig_lookup: HashMap<String, SignatureId> = HashMap::new();
        let mut documents: Vec<DocumentEntry> = Vec::new();
        let mut doc_lookup: HashMap<String, DocId> = HashMap::new();
        let mut all_hazards: Vec<f64> = Vec::new();
        let mut total_windows = 0usize;

        for path in paths {
            let Some(doc_b64) = store.get_file_field(&path, "doc")? else {
                continue;
            };
            if doc_b64.starts_with("[BINARY") {
                continue;
            }
            let bytes = decompress_from_b64(&doc_b64).unwrap_or_else(|_| doc_b64.into_bytes());
            let text = String::from_utf8_lossy(&bytes).into_owned();

            let enc = encode_text(
                &text,
                cfg.window_bytes,
                cfg.stride_bytes,
                cfg.precision,
                cfg.hazard_percentile,
            );
            if enc.windows.is_empty() {
                continue;
            }

            let doc_id = DocId(documents.len() as u32);
            doc_lookup.insert(path.clone(), doc_id);
            documents.push(DocumentEntry {
                path: path.clone(),
                characters: text.chars().count(),
                bytes: text.len(),
                window_count: enc.windows.len(),
            });

            for w in &enc.windows {
                total_windows += 1;
                all_hazards.push(w.hazard);
                let sig_id = *sig_lookup.entry(w.signature.clone()).or_insert_with(|| {
                    let id = SignatureId(signatures.len() as u32);
                    let prototype_text = enc
                        .prototypes
                        .get(&w.signature)
                        .cloned()
                        .unwrap_or_default();
                    signatures.push(SignatureEntry {
                        signature: w.signature.clone(),
                        prototype_text,
                        prototype_doc_id: doc_id,
                        prototype_byte_range: (w.byte_start, w.byte_end),
                        occurrences: Vec::new(),
                        hazard: HazardStats::from_values(&[]),
                    });
                    id
                });
                signatures[sig_id.0 as usize].occurrences.push(Occurrence {
                    doc_id,
                    byte_start: w.byte_start,
                    byte_end: w.byte_end,
                    hazard: w.hazard,
                });
            }
        }

        for entry in signatures.iter_mut() {
            let hazards: Vec<f64> = entry.occurrences.iter().map(|o| o.hazard).collect();
            entry.hazard = HazardStats::from_values(&hazards);
        }

        let hazard_threshold = if all_hazards.is_empty() {
            0.0
        } else {
            all_hazards.sort_by(|a, b| a.partial_cmp(b).unwrap());
            let idx = (cfg.hazard_percentile * (all_hazards.len() - 1) as f64) as usize;
            all_hazards[idx]
        };

        Ok(Self {
            meta: IndexMeta {
                window_bytes: cfg.window_bytes,
                stride_bytes: cfg.stride_bytes,
                precision: cfg.precision,
                hazard_percentile: cfg.hazard_percentile,
                hazard_threshold,
                totals: IndexTotals {
                    documents: documents.len(),
                    signatures: signatures.len(),
                    windows: total_windows,
                },
            },
            signatures,
            sig_lookup,
            documents,
            doc_lookup,
        })
    }

    /// Load the cached index from the store, if present and decodable.
    pub fn load_cached(store: &mut dyn KvStore) -> Result<Option<Self>> {
        let Some(blob_b64) = store.get_cached_index(ACTIVE_INDEX_KEY)? else {
            return Ok(None);
        };
        let Ok(bytes) = decompress_from_b64(&blob_b64) else {
            return Ok(None);
        };
        Ok(serde_json::from_slice(&bytes).ok())
    }

    /// Persist this index as the cached `active_index` key.
    pub fn store_cached(&self, store: &mut dyn KvStore) -> Result<()> {
        let json = serde_json::to_vec(self)?;
        let blob_b64 = compress_to_b64(&json).map_err(crate::error::ManifoldError::Io)?;
        store.put_cached_index(ACTIVE_INDEX_KEY, &blob_b64)
    }

    /// Get-or-build: try the cache first, rebuild and repopulate it on miss
    ///built lazily on first query that needs
    /// it").
    pub fn get_or_build(store: &mut dyn KvStore, cfg: &ManifoldConfig) -> Result<Self> {
        if let Some(cached) = Self::load_cached(store)? {
            return Ok(cached);
        }
        let built = Self::build(store, None, cfg)?;
        built.store_cached(store)?;
        Ok(built)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn seed(store: &mut MemoryStore, path: &str, text: &str) {
        let doc = compress_to_b64(text.as_bytes()).unwrap();
        store.put_file(path, &[("doc".to_string(), doc)], text.len() as u64).unwrap();
    }

    #[test]
    fn build_indexes_every_window_of_every_document() {
        let mut store = MemoryStore::new();
        let cfg = ManifoldConfig::default();
        seed(&mut store, "a.rs", &"fn a() {}".repeat(100));
        let index = ManifoldIndex::build(&mut store, None, &cfg).unwrap();
        assert_eq!(index.meta.totals.documents, 1);
        assert!(index.meta.totals.signatures >= 1);
        assert!(index.document_id("a.rs").is_some());
    }

    #[test]
    fn binary_files_are_excluded_from_the_index() {
        let mut store = MemoryStore::new();
        let cfg = ManifoldConfig::default();
        store
            .put_file("blob.bin", &[("doc".to_string(), "[BINARY sha256=ab bytes=3]".to_string())], 3)
            .unwrap();
        let index = ManifoldIndex::build(&mut store, None, &cfg).unwrap();
        assert_eq!(index.meta.totals.documents, 0);
    }

    #[test]
    fn cache_round_trips_through_store() {
        let mut store = MemoryStore::new();
        let cfg = ManifoldConfig::default();
        seed(&mut store, "a.rs", &"fn a() {}".repeat(100));
        let built = ManifoldIndex::build(&mut store, None, &cfg).unwrap();
        built.store_cached(&mut store).unwrap();
        let loaded = ManifoldIndex::load_cached(&mut store).unwrap().unwrap();
        assert_eq!(loaded, built);
    }
}
