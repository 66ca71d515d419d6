//! Git churn as an optional third input to risk fusion. Shells out to
//! `git log` over a bounded window and normalizes commit counts against the
//! corpus's own 95th percentile, mirroring the dynamic-percentile approach
//! used for hazard/coherence/entropy elsewhere in the chaos analytics.

use std::path::Path;
use std::process::Command;

/// Default lookback window for commit counting.
pub const DEFAULT_WINDOW_DAYS: u32 = 90;

/// Number of commits touching `path` (via `--follow`, so renames count)
/// within the last `window_days`. Returns `None` if `root` is not a git
/// repository or `git` is not available — churn is an optional signal, not
/// a required one.
fn commit_count(root: &Path, path: &str, window_days: u32) -> Option<u64> {
    let since = format!("--since={window_days}.days");
    let output = Command::new("git")
        .arg("-C")
        .arg(root)
        .arg("log")
        .arg("--follow")
        .arg("--format=%H")
        .arg(&since)
        .arg("--")
        .arg(path)
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout);
    Some(text.lines().filter(|l| !l.trim().is_empty()).count() as u64)
}

fn percentile_u64(sorted: &[u64], p: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let idx = (p * (sorted.len() - 1) as f64) as usize;
    sorted[idx]
}

/// Compute a churn score in `[0, 1]` for every path in `paths`, normalized
/// against the corpus's own 95th-percentile commit count. Returns an empty
/// map (not an error) if `root` is not a git repository.
pub fn compute_churn_scores(root: &Path, paths: &[String], window_days: u32) -> std::collections::HashMap<String, f64> {
    let mut counts: Vec<(String, u64)> = Vec::with_capacity(paths.len());
    for path in paths {
        if let Some(count) = commit_count(root, path, window_days) {
            counts.push((path.clone(), count));
        }
    }
    if counts.is_empty() {
        return std::collections::HashMap::new();
    }

    let mut sorted: Vec<u64> = counts.iter().map(|(_, c)| *c).collect();
    sorted.sort_unstable();
    let p95 = percentile_u64(&sorted, 0.95).max(1);

    counts
        .into_iter()
        .map(|(path, count)| (path, (count as f64 / p95 as f64).min(1.0)))
        .collect()
}

/// Churn score for a single path, or `None` if churn cannot be computed
/// (non-git root, missing `git` binary, or the path has no history).
pub fn churn_score_for(root: &Path, path: &str, window_days: u32, p95_reference: u64) -> Option<f64> {
    let count = commit_count(root, path, window_days)?;
    let reference = p95_reference.max(1);
    Some((count as f64 / reference as f64).min(1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_git_root_yields_empty_scores() {
        let dir = tempfile::tempdir().unwrap();
        let scores = compute_churn_scores(dir.path(), &["a.py".to_string()], DEFAULT_WINDOW_DAYS);
        assert!(scores.is_empty());
    }

    #[test]
    fn non_git_root_yields_none_for_single_path() {
        let dir = tempfile::tempdir().unwrap();
        assert!(churn_score_for(dir.path(), "a.py", DEFAULT_WINDOW_DAYS, 10).is_none());
    }
}
