use serde::{Deserialize, Serialize};
use std::path::Path;

/// Recognized options and effects.
///
/// Loaded from a best-effort JSON file read from the ingest root, falling
/// back silently to defaults when the file is missing or fails to parse.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ManifoldConfig {
    pub window_bytes: usize,
    pub stride_bytes: usize,
    pub precision: u32,
    pub hazard_percentile: f64,
    pub max_bytes_per_file: u64,
    pub compute_chaos: bool,
    pub lite: bool,
    pub coverage_threshold: f64,
    pub clear_first: bool,
    /// Redis/Valkey connection string, e.g. `redis://127.0.0.1:6379/0`.
    pub redis_url: String,
}

impl Default for ManifoldConfig {
    fn default() -> Self {
        Self {
            window_bytes: 512,
            stride_bytes: 384,
            precision: 3,
            hazard_percentile: 0.8,
            max_bytes_per_file: 524_288,
            compute_chaos: true,
            lite: false,
            coverage_threshold: 0.5,
            clear_first: false,
            redis_url: "redis://127.0.0.1:6379/0".to_string(),
        }
    }
}

pub fn load_config(ingest_root: &Path) -> ManifoldConfig {
    let primary = ingest_root.join(".manifold.json");

    let text = std::fs::read_to_string(&primary);
    let Ok(text) = text else {
        return ManifoldConfig::default();
    };

    serde_json::from_str::<ManifoldConfig>(&text).unwrap_or_else(|_| ManifoldConfig::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = ManifoldConfig::default();
        assert_eq!(cfg.window_bytes, 512);
        assert_eq!(cfg.stride_bytes, 384);
        assert_eq!(cfg.precision, 3);
        assert!((cfg.hazard_percentile - 0.8).abs() < 1e-9);
        assert_eq!(cfg.max_bytes_per_file, 524_288);
        assert!(cfg.compute_chaos);
        assert!(!cfg.lite);
        assert!((cfg.coverage_threshold - 0.5).abs() < 1e-9);
        assert!(!cfg.clear_first);
    }

    #[test]
    fn missing_file_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config(dir.path());
        assert_eq!(cfg, ManifoldConfig::default());
    }

    #[test]
    fn partial_overrides_merge_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(".manifold.json"),
            r#"{"window_bytes": 256, "lite": true}"#,
        )
        .unwrap();
        let cfg = load_config(dir.path());
        assert_eq!(cfg.window_bytes, 256);
        assert!(cfg.lite);
        assert_eq!(cfg.stride_bytes, 384);
    }
}
