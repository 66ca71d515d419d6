//! Blast-radius-over-a-synthetic-Python-tree scenarios, and risk fusion on
//! top of the resulting dependency graph.

use manifold_core::depgraph::DepGraph;
use manifold_core::risk::{combine_risk, RiskBand};
use std::fs;
use std::path::Path;

fn write(dir: &Path, rel: &str, contents: &str) {
    let path = dir.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, contents).unwrap();
}

#[test]
fn diamond_dependency_shape_yields_expected_blast_radius() {
    // core <- mid_a, mid_b <- top (top imports both mids, both import core)
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "core.py", "VALUE = 1\n");
    write(dir.path(), "mid_a.py", "import core\n");
    write(dir.path(), "mid_b.py", "import core\n");
    write(dir.path(), "top.py", "import mid_a\nimport mid_b\n");

    let graph = DepGraph::build(dir.path());

    let core = graph.get("core.py").unwrap();
    assert_eq!(core.blast_radius, 3); // mid_a, mid_b, top
    assert_eq!(core.depth, 2); // core -> mid_* -> top

    let top = graph.get("top.py").unwrap();
    assert_eq!(top.blast_radius, 0);
    assert!(top.imports.contains("mid_a"));
    assert!(top.imports.contains("mid_b"));
}

#[test]
fn bare_submodule_name_resolves_via_suffix_match() {
    // "import helper" has no dotted path of its own; it should resolve
    // against the one known module whose dotted name ends with "helper".
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "pkg/__init__.py", "");
    write(dir.path(), "pkg/helper.py", "VALUE = 1\n");
    write(dir.path(), "pkg/caller.py", "import helper\n");

    let graph = DepGraph::build(dir.path());
    let helper = graph.get("pkg/helper.py").unwrap();
    assert_eq!(helper.blast_radius, 1);
    assert_eq!(helper.imported_by.len(), 1);
}

#[test]
fn high_chaos_and_wide_blast_radius_fuses_to_critical_without_churn() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "hot.py", "VALUE = 1\n");
    for i in 0..60 {
        write(dir.path(), &format!("dep{i}.py"), "import hot\n");
    }

    let graph = DepGraph::build(dir.path());
    let hot = graph.get("hot.py").unwrap();
    assert!(hot.is_core);

    let risk = combine_risk(0.8, hot.blast_radius, None);
    assert_eq!(risk.normalized_blast, 1.0); // clamped, 60 > 50 normalizer
    assert_eq!(risk.band, RiskBand::Critical);
}

#[test]
fn leaf_module_with_low_chaos_is_low_risk() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "leaf.py", "import os\n");

    let graph = DepGraph::build(dir.path());
    let leaf = graph.get("leaf.py").unwrap();
    assert_eq!(leaf.blast_radius, 0);

    let risk = combine_risk(0.05, leaf.blast_radius, None);
    assert_eq!(risk.band, RiskBand::Low);
}
