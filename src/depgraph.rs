//! AST Dependency Graph (C9): extract Python `import`/`from ... import`
//! statements, resolve them against a dotted-module table built from file
//! paths, and compute transitive blast radius / depth.
//!
//! Import extraction is a line-oriented tokenizer rather than a full Python
//! parser: it recognizes
//! `import X[, Y...]`, `import X as Y`, and `from X import ...`, including
//! multi-line parenthesized import lists and backslash continuations, and
//! skips lines inside triple-quoted strings so a docstring containing the
//! word `import` is never mistaken for a real one.

use ignore::overrides::{Override, OverrideBuilder};
use ignore::WalkBuilder;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};

const SKIP_DIRS: &[&str] = &[
    ".git",
    "__pycache__",
    ".venv",
    "venv",
    "env",
    "node_modules",
    ".tox",
    ".mypy_cache",
    ".pytest_cache",
];

/// Blast-radius threshold above which a file is considered structurally
/// load-bearing.
pub const CORE_BLAST_RADIUS: usize = 5;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DependencyInfo {
    pub imports: BTreeSet<String>,
    pub imported_by: BTreeSet<String>,
    pub blast_radius: usize,
    pub depth: usize,
    pub is_core: bool,
}

/// Same hard-skip-list-as-`Override` approach the ingestor uses: directory
/// names in [`SKIP_DIRS`] and any `*.egg-info` package metadata directory
/// are pruned on top of whatever `.gitignore` already hides.
fn depgraph_overrides(root: &Path) -> Override {
    let mut ob = OverrideBuilder::new(root);
    for d in SKIP_DIRS {
        let _ = ob.add(&format!("**/{d}"));
        let _ = ob.add(&format!("**/{d}/**"));
    }
    let _ = ob.add("**/*.egg-info");
    let _ = ob.add("**/*.egg-info/**");
    ob.build().unwrap_or_else(|_| OverrideBuilder::new(root).build().unwrap())
}

fn walk_python_files(root: &Path) -> Vec<PathBuf> {
    let overrides = depgraph_overrides(root);
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
        if abs.extension().and_then(|e| e.to_str()) != Some("py") {
            continue;
        }
        if let Ok(rel) = abs.strip_prefix(root) {
            out.push(rel.to_path_buf());
        }
    }
    out.sort();
    out
}

/// Derive a dotted module name from a relative `.py` path, e.g.
/// `src/manifold/sidecar.py` -> `src.manifold.sidecar`; `__init__.py` drops
/// its own basename so the package directory is addressable by its own name
///.
fn module_name_for_path(rel: &Path) -> String {
    let mut components: Vec<String> = rel
        .with_extension("")
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if components.last().map(|s| s.as_str()) == Some("__init__") {
        components.pop();
    }
    components.join(".")
}

/// Strip triple-quoted string spans from a source text so their contents
/// never get mistaken for import statements. Deliberately simple: it does
/// not distinguish `'''`/`"""`, which is sufficient for the line-oriented
/// scan below.
fn strip_triple_quoted(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut chars = source.chars().peekable();
    let mut in_string = false;
    while let Some(c) = chars.next() {
        if c == '\'' || c == '"' {
            let mut run = String::new();
            run.push(c);
            while chars.peek() == Some(&c) && run.len() < 3 {
                run.push(chars.next().unwrap());
            }
            if run.len() == 3 {
                in_string = !in_string;
                out.push('\n');
                continue;
            } else {
                if !in_string {
                    out.push_str(&run);
                }
                continue;
            }
        }
        if in_string {
            if c == '\n' {
                out.push('\n');
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Join backslash-continued and parenthesized-import logical lines into
/// single physical lines for the regex-free scanner below.
fn logical_lines(source: &str) -> Vec<String> {
    let cleaned = strip_triple_quoted(source);
    let mut lines = Vec::new();
    let mut pending = String::new();
    let mut paren_depth = 0i32;

    for raw_line in cleaned.lines() {
        let line = raw_line.trim_end_matches('\\');
        let continued_by_backslash = raw_line.ends_with('\\');

        if paren_depth > 0 {
            pending.push(' ');
            pending.push_str(line.trim());
        } else {
            pending = line.to_string();
        }

        paren_depth += line.matches('(').count() as i32 - line.matches(')').count() as i32;
        paren_depth = paren_depth.max(0);

        if continued_by_backslash || paren_depth > 0 {
            continue;
        }
        lines.push(std::mem::take(&mut pending));
    }
    if !pending.trim().is_empty() {
        lines.push(pending);
    }
    lines
}

/// Extract imported module names from Python source.
/// Relative imports keep their leading dots as written.
pub fn extract_imports(source: &str) -> BTreeSet<String> {
    let mut imports = BTreeSet::new();
    for line in logical_lines(source) {
        let trimmed = line.trim();
        if let Some(rest) = trimmed.strip_prefix("from ") {
            if let Some((module, _)) = rest.split_once(" import ") {
                let module = module.trim();
                if !module.is_empty() {
                    imports.insert(module.to_string());
                }
            }
        } else if let Some(rest) = trimmed.strip_prefix("import ") {
            for part in rest.split(',') {
                let name = part.split(" as ").next().unwrap_or(part).trim();
                if !name.is_empty() {
                    imports.insert(name.to_string());
                }
            }
        }
    }
    imports
}

/// The built dependency graph over a Python source tree. Built
/// once and reused; [`DepGraph::invalidate`] discards a stale instance so
/// the next reader rebuilds.
#[derive(Debug, Clone, Default)]
pub struct DepGraph {
    nodes: HashMap<String, DependencyInfo>,
}

impl DepGraph {
    /// Build the graph by parsing every `.py` file under `root`.
    /// Per-file parse failures are skipped, not fatal.
    pub fn build(root: &Path) -> Self {
        let files = walk_python_files(root);

        let mut module_table: HashMap<String, String> = HashMap::new();
        for rel in &files {
            let module = module_name_for_path(rel);
            if !module.is_empty() {
                module_table.insert(module, rel.to_string_lossy().replace('\\', "/"));
            }
        }

        let mut nodes: HashMap<String, DependencyInfo> = HashMap::new();
        let mut forward: HashMap<String, BTreeSet<String>> = HashMap::new();

        for rel in &files {
            let rel_str = rel.to_string_lossy().replace('\\', "/");
            nodes.entry(rel_str.clone()).or_default();

            let source = match std::fs::read_to_string(root.join(rel)) {
                Ok(s) => s,
                Err(_) => continue, // PerFileIO/ParseFailure: skip, keep building.
            };
            let raw_imports = extract_imports(&source);

            let mut resolved = BTreeSet::new();
            for target in &raw_imports {
                if let Some(owner) = resolve_module(target, &module_table) {
                    resolved.insert(owner);
                }
            }
            forward.insert(rel_str.clone(), resolved.clone());
            nodes.get_mut(&rel_str).unwrap().imports = raw_imports;
        }

        for (source, targets) in &forward {
            for target in targets {
                nodes
                    .entry(target.clone())
                    .or_default()
                    .imported_by
                    .insert(source.clone());
            }
        }

        let paths: Vec<String> = nodes.keys().cloned().collect();
        for path in &paths {
            let (blast_radius, depth) = transitive_reverse_closure(path, &nodes);
            let entry = nodes.get_mut(path).unwrap();
            entry.blast_radius = blast_radius;
            entry.depth = depth;
            entry.is_core = blast_radius > CORE_BLAST_RADIUS;
        }

        Self { nodes }
    }

    pub fn invalidate(&mut self) {
        self.nodes.clear();
    }

    pub fn get(&self, rel: &str) -> Option<&DependencyInfo> {
        self.nodes.get(rel)
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }
}

/// Try a full dotted-path lookup first; otherwise fall back to a
/// suffix/prefix match against every known module.
fn resolve_module(target: &str, table: &HashMap<String, String>) -> Option<String> {
    let normalized = target.trim_start_matches('.');
    if let Some(path) = table.get(normalized) {
        return Some(path.clone());
    }
    // Suffix match: target is a shorter suffix of a known module
    // (`from . import sidecar` inside `src.manifold` resolving to
    // `src.manifold.sidecar`), or a known module is a suffix of target
    // (an absolute import one level too deep, e.g. a re-exported symbol).
    table
        .iter()
        .find(|(module, _)| {
            module.ends_with(normalized) || normalized.ends_with(module.as_str())
        })
        .map(|(_, path)| path.clone())
}

/// `blast_radius(f)` = |transitive closure of reverse-edges from f| - 1;
/// `depth` = longest reverse-edge path length.
fn transitive_reverse_closure(start: &str, nodes: &HashMap<String, DependencyInfo>) -> (usize, usize) {
    let mut visited: HashSet<String> = HashSet::new();
    visited.insert(start.to_string());
    let mut queue: VecDeque<(String, usize)> = VecDeque::new();
    queue.push_back((start.to_string(), 0));
    let mut max_depth = 0usize;

    while let Some((current, depth)) = queue.pop_front() {
        let Some(info) = nodes.get(&current) else {
            continue;
        };
        for importer in &info.imported_by {
            if visited.insert(importer.clone()) {
                max_depth = max_depth.max(depth + 1);
                queue.push_back((importer.clone(), depth + 1));
            }
        }
    }

    (visited.len() - 1, max_depth)
}
