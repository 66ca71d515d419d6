//! Chaos Analytics (C7): single-file chaos, batch ranking, dynamic
//! percentile thresholds, ejection prediction, and 2-D structural
//! clustering over the corpus's `(coherence, entropy)` space.

use crate::compress::decompress_from_b64;
use crate::config::ManifoldConfig;
use crate::error::Result;
use crate::signature::encode_text;
use crate::store::KvStore;
use serde::{Deserialize, Serialize};

/// Static collapse-risk bands used at ingest time.
pub const STATIC_HIGH: f64 = 0.35;
pub const STATIC_MODERATE: f64 = 0.15;

/// Fallback dynamic-threshold constants for an empty corpus.
const EMPTY_CHAOS_LOW: f64 = 0.15;
const EMPTY_CHAOS_HIGH: f64 = 0.35;
const EMPTY_COHERENCE_LOW: f64 = 0.30;
const EMPTY_COHERENCE_HIGH: f64 = 0.60;
const EMPTY_ENTROPY_LOW: f64 = 0.60;
const EMPTY_ENTROPY_HIGH: f64 = 0.85;

const CHAOS_HEAD_BYTES: usize = 4096;
const TRAJECTORY_HEAD_BYTES: usize = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CollapseRisk {
    Low,
    Moderate,
    High,
}

/// Deterministic mapping from average hazard to a collapse-risk band using
/// the hard ingest-time constants.
pub fn collapse_risk_static(avg_hazard: f64) -> CollapseRisk {
    if avg_hazard >= STATIC_HIGH {
        CollapseRisk::High
    } else if avg_hazard >= STATIC_MODERATE {
        CollapseRisk::Moderate
    } else {
        CollapseRisk::Low
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChaosBlob {
    pub chaos_score: f64,
    pub entropy: f64,
    pub coherence: f64,
    pub collapse_risk: CollapseRisk,
    pub windows_analyzed: usize,
}

fn floor_char_boundary(text: &str, index: usize) -> usize {
    let mut i = index.min(text.len());
    while i > 0 && !text.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn load_doc_text(store: &mut dyn KvStore, path: &str) -> Result<Option<String>> {
    let Some(doc_b64) = store.get_file_field(path, "doc")? else {
        return Ok(None);
    };
    if doc_b64.starts_with("[BINARY") {
        return Ok(None);
    }
    let bytes = decompress_from_b64(&doc_b64).unwrap_or_else(|_| doc_b64.into_bytes());
    Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
}

/// Compute a chaos blob from raw text over its leading `head_bytes`,
/// averaging per-window metrics.
pub fn compute_chaos_from_text(
    text: &str,
    cfg: &ManifoldConfig,
    head_bytes: usize,
) -> Option<ChaosBlob> {
    let head = floor_char_boundary(text, head_bytes.min(text.len()));
    let enc = encode_text(
        &text[..head],
        cfg.window_bytes,
        cfg.stride_bytes,
        cfg.precision,
        cfg.hazard_percentile,
    );
    if enc.windows.is_empty() {
        return None;
    }
    let n = enc.windows.len() as f64;
    let chaos_score = enc.windows.iter().map(|w| w.hazard).sum::<f64>() / n;
    let entropy = enc.windows.iter().map(|w| w.entropy).sum::<f64>() / n;
    let coherence = enc.windows.iter().map(|w| w.coherence).sum::<f64>() / n;
    Some(ChaosBlob {
        chaos_score,
        entropy,
        coherence,
        collapse_risk: collapse_risk_static(chaos_score),
        windows_analyzed: enc.windows.len(),
    })
}

/// Single-file chaos: load the stored
/// `chaos` blob, or compute it on demand from `doc` and persist it back.
pub fn file_chaos(store: &mut dyn KvStore, path: &str, cfg: &ManifoldConfig) -> Result<Option<ChaosBlob>> {
    if let Some(chaos_b64) = store.get_file_field(path, "chaos")? {
        let bytes = decompress_from_b64(&chaos_b64).unwrap_or_else(|_| chaos_b64.into_bytes());
        if let Ok(blob) = serde_json::from_slice::<ChaosBlob>(&bytes) {
            return Ok(Some(blob));
        }
    }

    let Some(text) = load_doc_text(store, path)? else {
        return Ok(None);
    };
    let Some(blob) = compute_chaos_from_text(&text, cfg, CHAOS_HEAD_BYTES) else {
        return Ok(None);
    };

    let json = serde_json::to_vec(&blob)?;
    let b64 = crate::compress::compress_to_b64(&json).unwrap_or_else(|_| String::new());
    if !b64.is_empty() {
        store.put_file_field(path, "chaos", &b64)?;
    }
    Ok(Some(blob))
}

/// Batch ranking: scan matching files, sort descending by chaos
/// score, return the top `max_files`.
pub fn batch_rank(
    store: &mut dyn KvStore,
    glob_pattern: Option<&str>,
    max_files: usize,
    cfg: &ManifoldConfig,
) -> Result<Vec<(String, ChaosBlob)>> {
    let files = match glob_pattern {
        Some(pattern) => store.scan_files(pattern)?,
        None => store.list_files()?,
    };

    let mut ranked = Vec::with_capacity(files.len());
    for path in files {
        if let Some(blob) = file_chaos(store, &path, cfg)? {
            ranked.push((path, blob));
        }
    }
    ranked.sort_by(|a, b| {
        b.1.chaos_score
            .partial_cmp(&a.1.chaos_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    ranked.truncate(max_files);
    Ok(ranked)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DynamicThresholds {
    pub chaos_low: f64,
    pub chaos_high: f64,
    pub coherence_low: f64,
    pub coherence_high: f64,
    pub entropy_low: f64,
    pub entropy_high: f64,
}

impl Default for DynamicThresholds {
    fn default() -> Self {
        Self {
            chaos_low: EMPTY_CHAOS_LOW,
            chaos_high: EMPTY_CHAOS_HIGH,
            coherence_low: EMPTY_COHERENCE_LOW,
            coherence_high: EMPTY_COHERENCE_HIGH,
            entropy_low: EMPTY_ENTROPY_LOW,
            entropy_high: EMPTY_ENTROPY_HIGH,
        }
    }
}

fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = (p * (sorted.len() - 1) as f64) as usize;
    sorted[idx]
}

/// Dynamic percentile thresholds over the current corpus.
pub fn dynamic_thresholds(store: &mut dyn KvStore, cfg: &ManifoldConfig) -> Result<DynamicThresholds> {
    let files = store.list_files()?;
    let mut chaos_vals = Vec::new();
    let mut coherence_vals = Vec::new();
    let mut entropy_vals = Vec::new();

    for path in &files {
        if let Some(blob) = file_chaos(store, path, cfg)? {
            chaos_vals.push(blob.chaos_score);
            coherence_vals.push(blob.coherence);
            entropy_vals.push(blob.entropy);
        }
    }

    if chaos_vals.is_empty() {
        return Ok(DynamicThresholds::default());
    }

    chaos_vals.sort_by(|a, b| a.partial_cmp(b).unwrap());
    coherence_vals.sort_by(|a, b| a.partial_cmp(b).unwrap());
    entropy_vals.sort_by(|a, b| a.partial_cmp(b).unwrap());

    Ok(DynamicThresholds {
        chaos_low: percentile(&chaos_vals, 0.333),
        chaos_high: percentile(&chaos_vals, 0.666),
        coherence_low: percentile(&coherence_vals, 0.333),
        coherence_high: percentile(&coherence_vals, 0.666),
        entropy_low: percentile(&entropy_vals, 0.333),
        entropy_high: percentile(&entropy_vals, 0.666),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EjectionState {
    PersistentHigh,
    Oscillation,
    LowFluctuation,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EjectionPrediction {
    pub state: EjectionState,
    pub projected_days: Option<u32>,
    pub within_horizon: bool,
}

/// Ejection prediction: project days-to-ejection for files
/// already in the high band, classify everything else as oscillating or
/// stable relative to the dynamic thresholds.
pub fn predict_ejection(
    chaos_score: f64,
    thresholds: &DynamicThresholds,
    horizon_days: u32,
) -> EjectionPrediction {
    if chaos_score >= thresholds.chaos_high {
        let days = (((1.0 - chaos_score) * 100.0).floor() as i64).max(1) as u32;
        EjectionPrediction {
            state: EjectionState::PersistentHigh,
            projected_days: Some(days),
            within_horizon: days <= horizon_days,
        }
    } else if chaos_score >= thresholds.chaos_low {
        EjectionPrediction {
            state: EjectionState::Oscillation,
            projected_days: None,
            within_horizon: false,
        }
    } else {
        EjectionPrediction {
            state: EjectionState::LowFluctuation,
            projected_days: None,
            within_horizon: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cluster {
    pub label: String,
    pub centroid: (f64, f64),
    pub members: Vec<String>,
}

fn label_for_centroid(coherence: f64, entropy: f64, th: &DynamicThresholds) -> &'static str {
    if coherence <= th.coherence_low && entropy >= th.entropy_high {
        "HIGH-CHAOS"
    } else if entropy >= th.entropy_high {
        "DENSE/ENTROPIC"
    } else if coherence <= th.coherence_low {
        "SPARSE"
    } else if coherence >= th.coherence_high {
        "HIGH-COHERENCE"
    } else {
        "MIXED-FLUCTUATION"
    }
}

const KMEANS_MAX_ITERATIONS: usize = 50;

/// Deterministic 2-D k-means over `(coherence, entropy)`. `k` is clamped to the corpus size.
pub fn cluster_corpus(
    store: &mut dyn KvStore,
    requested_k: usize,
    cfg: &ManifoldConfig,
) -> Result<Vec<Cluster>> {
    let files = store.list_files()?;
    let mut points: Vec<(String, f64, f64)> = Vec::new();
    for path in &files {
        if let Some(blob) = file_chaos(store, path, cfg)? {
            points.push((path.clone(), blob.coherence, blob.entropy));
        }
    }

    if points.is_empty() {
        return Ok(Vec::new());
    }

    let k = requested_k.min(points.len()).max(1);

    let mut by_coherence = points.clone();
    by_coherence.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
    let mut centroids: Vec<(f64, f64)> = if k == 1 {
        vec![(by_coherence[0].1, by_coherence[0].2)]
    } else {
        (0..k)
            .map(|i| {
                let idx = i * (by_coherence.len() - 1) / (k - 1);
                (by_coherence[idx].1, by_coherence[idx].2)
            })
            .collect()
    };

    let mut assignments = vec![0usize; points.len()];
    for _ in 0..KMEANS_MAX_ITERATIONS {
        let mut changed = false;
        for (i, (_, coh, ent)) in points.iter().enumerate() {
            let mut best = 0usize;
            let mut best_dist = f64::INFINITY;
            for (c, centroid) in centroids.iter().enumerate() {
                let dist = (coh - centroid.0).powi(2) + (ent - centroid.1).powi(2);
                if dist < best_dist {
                    best_dist = dist;
                    best = c;
                }
            }
            if assignments[i] != best {
                assignments[i] = best;
                changed = true;
            }
        }

        let mut sums = vec![(0.0f64, 0.0f64, 0usize); k];
        for (i, (_, coh, ent)) in points.iter().enumerate() {
            let cluster = assignments[i];
            sums[cluster].0 += coh;
            sums[cluster].1 += ent;
            sums[cluster].2 += 1;
        }
        for (c, (sum_coh, sum_ent, count)) in sums.into_iter().enumerate() {
            if count > 0 {
                centroids[c] = (sum_coh / count as f64, sum_ent / count as f64);
            }
        }

        if !changed {
            break;
        }
    }

    let thresholds = dynamic_thresholds(store, cfg)?;
    let mut clusters: Vec<Cluster> = (0..k)
        .map(|c| Cluster {
            label: label_for_centroid(centroids[c].0, centroids[c].1, &thresholds).to_string(),
            centroid: centroids[c],
            members: Vec::new(),
        })
        .collect();
    for (i, (path, _, _)) in points.iter().enumerate() {
        clusters[assignments[i]].members.push(path.clone());
    }
    Ok(clusters)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrajectoryPoint {
    pub byte_start: usize,
    pub hazard: f64,
    pub entropy: f64,
    pub coherence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SymbolicStateCounts {
    pub persistent_high: usize,
    pub transitional: usize,
    pub low: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trajectory {
    pub points: Vec<TrajectoryPoint>,
    pub state_counts: SymbolicStateCounts,
    pub mean_hazard: f64,
    pub mean_entropy: f64,
    pub mean_coherence: f64,
}

/// Trajectory data product for visualization; rendering itself
/// is out of scope, only the per-window arrays and aggregate stats.
pub fn trajectory_for_file(
    store: &mut dyn KvStore,
    path: &str,
    cfg: &ManifoldConfig,
) -> Result<Option<Trajectory>> {
    let Some(text) = load_doc_text(store, path)? else {
        return Ok(None);
    };
    let head = floor_char_boundary(&text, TRAJECTORY_HEAD_BYTES.min(text.len()));
    let enc = encode_text(
        &text[..head],
        cfg.window_bytes,
        cfg.stride_bytes,
        cfg.precision,
        cfg.hazard_percentile,
    );
    if enc.windows.is_empty() {
        return Ok(None);
    }

    let mut state_counts = SymbolicStateCounts::default();
    let mut points = Vec::with_capacity(enc.windows.len());
    for w in &enc.windows {
        if w.hazard >= 0.66 {
            state_counts.persistent_high += 1;
        } else if w.hazard >= 0.33 {
            state_counts.transitional += 1;
        } else {
            state_counts.low += 1;
        }
        points.push(TrajectoryPoint {
            byte_start: w.byte_start,
            hazard: w.hazard,
            entropy: w.entropy,
            coherence: w.coherence,
        });
    }

    let n = points.len() as f64;
    Ok(Some(Trajectory {
        mean_hazard: points.iter().map(|p| p.hazard).sum::<f64>() / n,
        mean_entropy: points.iter().map(|p| p.entropy).sum::<f64>() / n,
        mean_coherence: points.iter().map(|p| p.coherence).sum::<f64>() / n,
        points,
        state_counts,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn seed(store: &mut MemoryStore, path: &str, text: &str, cfg: &ManifoldConfig) {
        let doc = crate::compress::compress_to_b64(text.as_bytes()).unwrap();
        store.put_file(path, &[("doc".to_string(), doc)], text.len() as u64).unwrap();
        let _ = cfg;
    }

    #[test]
    fn collapse_risk_bands_use_fixed_hazard_cutoffs() {
        assert_eq!(collapse_risk_static(0.4), CollapseRisk::High);
        assert_eq!(collapse_risk_static(0.2), CollapseRisk::Moderate);
        assert_eq!(collapse_risk_static(0.05), CollapseRisk::Low);
    }

    #[test]
    fn file_chaos_computes_on_demand_and_caches() {
        let mut store = MemoryStore::new();
        let cfg = ManifoldConfig::default();
        seed(&mut store, "a.py", &"def f(): pass\n".repeat(100), &cfg);
        let blob = file_chaos(&mut store, "a.py", &cfg).unwrap().unwrap();
        assert!((0.0..=1.0).contains(&blob.chaos_score));
        assert!(store.get_file_field("a.py", "chaos").unwrap().is_some());
    }

    #[test]
    fn dynamic_thresholds_fall_back_when_corpus_empty() {
        let mut store = MemoryStore::new();
        let cfg = ManifoldConfig::default();
        let th = dynamic_thresholds(&mut store, &cfg).unwrap();
        assert_eq!(th, DynamicThresholds::default());
    }

    #[test]
    fn ejection_prediction_reports_persistent_high() {
        let th = DynamicThresholds::default();
        let pred = predict_ejection(0.9, &th, 10);
        assert_eq!(pred.state, EjectionState::PersistentHigh);
        assert_eq!(pred.projected_days, Some(10));
    }

    #[test]
    fn ejection_prediction_low_fluctuation_below_chaos_low() {
        let th = DynamicThresholds::default();
        let pred = predict_ejection(0.01, &th, 10);
        assert_eq!(pred.state, EjectionState::LowFluctuation);
    }

    #[test]
    fn cluster_corpus_respects_k_clamp_and_is_deterministic() {
        let mut store = MemoryStore::new();
        let cfg = ManifoldConfig::default();
        seed(&mut store, "a.py", &"aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa".repeat(20), &cfg);
        seed(&mut store, "b.py", &"the quick brown fox jumps over the lazy dog 123 !@# xyz".repeat(20), &cfg);
        let first = cluster_corpus(&mut store, 5, &cfg).unwrap();
        let second = cluster_corpus(&mut store, 5, &cfg).unwrap();
        assert_eq!(first.len(), 2); // k clamped to corpus size
        assert_eq!(first, second);
    }

    #[test]
    fn trajectory_reports_per_window_arrays() {
        let mut store = MemoryStore::new();
        let cfg = ManifoldConfig::default();
        seed(&mut store, "a.py", &"def f(): return 1\n".repeat(200), &cfg);
        let traj = trajectory_for_file(&mut store, "a.py", &cfg).unwrap().unwrap();
        assert!(!traj.points.is_empty());
        assert!((0.0..=1.0).contains(&traj.mean_hazard));
    }
}
