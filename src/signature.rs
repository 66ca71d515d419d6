//! Byte-stream manifold encoder (C1): slide a fixed byte window over a byte
//! stream, compute a coherence/entropy/hazard triple per window, and emit a
//! quantized structural signature `c{coh}_s{stab}_e{ent}`.
//!
//! The exact coherence/hazard recipe is a frozen implementation choice; this
//! module picks one deterministic recipe and keeps it fixed so that
//! signatures are stable across runs and hosts.

use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Metadata + metrics for a single window over a byte stream.
#[derive(Debug, Clone, PartialEq)]
pub struct ByteWindow {
    pub window_index: usize,
    pub byte_start: usize,
    pub byte_end: usize,
    pub char_start: usize,
    pub char_end: usize,
    pub coherence: f64,
    pub entropy: f64,
    pub hazard: f64,
    pub signature: String,
}

/// Result of encoding a single text span.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeResult {
    pub windows: Vec<ByteWindow>,
    pub prototypes: HashMap<String, String>,
    pub hazards: Vec<f64>,
    pub window_bytes: usize,
    pub stride_bytes: usize,
    pub precision: u32,
    pub hazard_percentile: f64,
    pub hazard_threshold: f64,
    pub original_bytes: usize,
}

fn signature_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^c(\d+\.\d+)_s(\d+\.\d+)_e(\d+\.\d+)$").expect("static regex is valid")
    })
}

/// Round `value` (assumed in `[0, 1]`) to `precision` decimals, half away from
/// zero, and format it without re-introducing binary-float rounding noise.
fn format_component(value: f64, precision: u32) -> String {
    let factor = 10i64.pow(precision);
    let scaled = (value * factor as f64).round() as i64;
    let whole = scaled / factor;
    let frac = (scaled % factor).abs();
    format!("{whole}.{frac:0width$}", width = precision as usize)
}

/// Build the `c{coh}_s{stab}_e{ent}` signature string at the given precision.
pub fn signature_string(coherence: f64, entropy: f64, precision: u32) -> String {
    let stability = 1.0 - entropy;
    format!(
        "c{}_s{}_e{}",
        format_component(coherence, precision),
        format_component(stability, precision),
        format_component(entropy, precision)
    )
}

/// Parsed `(coherence, stability, entropy)` components of a signature string.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignatureComponents {
    pub coherence: f64,
    pub stability: f64,
    pub entropy: f64,
}

/// Parse a signature string against the fixed `c{..}_s{..}_e{..}` pattern.
/// Returns `None` (mapped to `ManifoldError::InvalidSignature` by callers)
/// rather than panicking.
pub fn parse_signature(sig: &str) -> Option<SignatureComponents> {
    let caps = signature_regex().captures(sig)?;
    let coherence: f64 = caps.get(1)?.as_str().parse().ok()?;
    let stability: f64 = caps.get(2)?.as_str().parse().ok()?;
    let entropy: f64 = caps.get(3)?.as_str().parse().ok()?;
    if !(0.0..=1.0).contains(&coherence)
        || !(0.0..=1.0).contains(&stability)
        || !(0.0..=1.0).contains(&entropy)
    {
        return None;
    }
    Some(SignatureComponents {
        coherence,
        stability,
        entropy,
    })
}

fn build_byte_index(text: &str) -> Vec<usize> {
    let mut offsets = Vec::with_capacity(text.len() + 1);
    offsets.push(0usize);
    let mut acc = 0usize;
    for ch in text.chars() {
        acc += ch.len_utf8();
        offsets.push(acc);
    }
    offsets
}

fn byte_to_char(byte_offset: usize, byte_index: &[usize]) -> usize {
    let idx = byte_index.partition_point(|&x| x <= byte_offset);
    idx.saturating_sub(1)
}

/// Offsets of each window: fixed stride with full coverage, plus a
/// mandatory tail window so the final bytes are never dropped.
fn sliding_offsets(len: usize, window_bytes: usize, stride_bytes: usize) -> Vec<usize> {
    if len == 0 {
        return Vec::new();
    }
    if len <= window_bytes {
        return vec![0];
    }
    let mut offsets = Vec::new();
    let mut offset = 0usize;
    while offset + window_bytes <= len {
        offsets.push(offset);
        offset += stride_bytes;
    }
    let tail_start = len - window_bytes;
    if offsets.last().copied() != Some(tail_start) {
        offsets.push(tail_start);
    }
    offsets
}

/// Shannon entropy of the byte histogram, normalized to `[0, 1]`.
fn shannon_entropy(bytes: &[u8]) -> f64 {
    if bytes.is_empty() {
        return 0.0;
    }
    let mut counts = [0u32; 256];
    for &b in bytes {
        counts[b as usize] += 1;
    }
    let n = bytes.len() as f64;
    let mut h = 0.0;
    for &c in counts.iter() {
        if c == 0 {
            continue;
        }
        let p = c as f64 / n;
        h -= p * p.log2();
    }
    h / 8.0 // log2(256) = 8
}

/// Coherence (local order, inverted rolling variance of the "kinetic" signal)
/// plus the raw kinetic-variance measure used downstream by the hazard gate.
fn coherence_and_kinetic_mean(bytes: &[u8]) -> (f64, f64) {
    if bytes.len() < 2 {
        return (1.0, 0.0);
    }
    let kinetic: Vec<f64> = bytes
        .windows(2)
        .map(|pair| {
            let diff = pair[1] as i32 - pair[0] as i32;
            (diff * diff) as f64
        })
        .collect();
    let kinetic_mean = kinetic.iter().sum::<f64>() / kinetic.len() as f64;

    // Trailing running mean over at most the last 8 samples.
    let m = kinetic.len();
    let mut running = Vec::with_capacity(m);
    for j in 0..m {
        let start = j.saturating_sub(7);
        let slice = &kinetic[start..=j];
        running.push(slice.iter().sum::<f64>() / slice.len() as f64);
    }

    let ln1p: Vec<f64> = running.iter().map(|v| v.ln_1p()).collect();
    let min = ln1p.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = ln1p.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let normalized: Vec<f64> = if (max - min).abs() < 1e-12 {
        vec![0.0; ln1p.len()]
    } else {
        ln1p.iter().map(|v| (v - min) / (max - min)).collect()
    };
    let mean_norm = normalized.iter().sum::<f64>() / normalized.len() as f64;
    (1.0 - mean_norm, kinetic_mean)
}

fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).expect("metrics are never NaN"));
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

/// Encode `text` into manifold signatures with hazard stats.
///
/// Empty input yields an `EncodeResult` with no windows and `hazard_threshold
/// == 0.0`. Non-UTF-8 byte sequences cannot occur here since the input is
/// already a `&str`; callers decode with `String::from_utf8_lossy` upstream
/// so decoding never fails.
pub fn encode_text(
    text: &str,
    window_bytes: usize,
    stride_bytes: usize,
    precision: u32,
    hazard_percentile: f64,
) -> EncodeResult {
    let bytes = text.as_bytes();
    let original_bytes = bytes.len();

    if bytes.is_empty() {
        return EncodeResult {
            windows: Vec::new(),
            prototypes: HashMap::new(),
            hazards: Vec::new(),
            window_bytes,
            stride_bytes,
            precision,
            hazard_percentile,
            hazard_threshold: 0.0,
            original_bytes: 0,
        };
    }

    let byte_index = build_byte_index(text);
    let offsets = sliding_offsets(original_bytes, window_bytes, stride_bytes);

    struct Raw {
        byte_start: usize,
        byte_end: usize,
        entropy: f64,
        coherence: f64,
        kinetic_mean: f64,
    }

    let raws: Vec<Raw> = offsets
        .iter()
        .map(|&byte_start| {
            let byte_end = (byte_start + window_bytes).min(original_bytes);
            let slice = &bytes[byte_start..byte_end];
            let entropy = shannon_entropy(slice);
            let (coherence, kinetic_mean) = coherence_and_kinetic_mean(slice);
            Raw {
                byte_start,
                byte_end,
                entropy,
                coherence,
                kinetic_mean,
            }
        })
        .collect();

    let kinetic_median = median(&raws.iter().map(|r| r.kinetic_mean).collect::<Vec<_>>());

    let mut windows = Vec::with_capacity(raws.len());
    let mut prototypes: HashMap<String, String> = HashMap::new();
    let mut hazards = Vec::with_capacity(raws.len());
    let mut persistent_high_count = 0usize;

    for (window_index, raw) in raws.into_iter().enumerate() {
        let is_persistent_high = raw.kinetic_mean >= kinetic_median;
        if is_persistent_high {
            persistent_high_count += 1;
        }
        let hazard = persistent_high_count as f64 / (window_index + 1) as f64;

        let signature = signature_string(raw.coherence, raw.entropy, precision);

        prototypes.entry(signature.clone()).or_insert_with(|| {
            String::from_utf8_lossy(&bytes[raw.byte_start..raw.byte_end]).into_owned()
        });

        hazards.push(hazard);
        windows.push(ByteWindow {
            window_index,
            byte_start: raw.byte_start,
            byte_end: raw.byte_end,
            char_start: byte_to_char(raw.byte_start, &byte_index),
            char_end: byte_to_char(raw.byte_end, &byte_index),
            coherence: raw.coherence,
            entropy: raw.entropy,
            hazard,
            signature,
        });
    }

    let mut sorted_hazards = hazards.clone();
    sorted_hazards.sort_by(|a, b| a.partial_cmp(b).expect("hazards are never NaN"));
    let hazard_threshold = if sorted_hazards.is_empty() {
        0.0
    } else {
        let idx = (hazard_percentile * (sorted_hazards.len() - 1) as f64) as usize;
        sorted_hazards[idx]
    };

    EncodeResult {
        windows,
        prototypes,
        hazards: sorted_hazards,
        window_bytes,
        stride_bytes,
        precision,
        hazard_percentile,
        hazard_threshold,
        original_bytes,
    }
}
