//! Filesystem Watcher (C5): a single recursive watcher over a directory that
//! keeps the index live under concurrent edits. Runs as a cooperative
//! background thread consuming `notify` events over an `mpsc` channel and
//! writing back into the same [`crate::store::KvStore`] foreground queries
//! use.

use crate::config::ManifoldConfig;
use crate::error::Result;
use crate::ingest::build_file_record;
use crate::store::KvStore;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};
use xxhash_rust::xxh3::xxh3_64;

/// Events for the same path arriving within this window MAY be coalesced
///; this is the only timing knob the watcher exposes.
pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Upsert,
    Remove,
}

/// A single coalesced filesystem change, ready to be applied to the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    pub rel_path: PathBuf,
    pub kind: ChangeKind,
}

/// Apply one coalesced change to `store`: re-run the per-file ingest recipe
/// on create/modify, delete the record and its file-list entry on delete
///. Per-event failures never abort the watcher — callers are expected to swallow the `Err` and keep
/// the loop alive; this function itself still returns `Result` so the
/// synchronous single-path API stays composable with `?`.
pub fn apply_change(
    store: &mut dyn KvStore,
    root: &Path,
    change: &FileChange,
    cfg: &ManifoldConfig,
) -> Result<()> {
    let rel_str = change.rel_path.to_string_lossy().replace('\\', "/");
    match change.kind {
        ChangeKind::Remove => {
            store.delete_file(&rel_str)?;
            store.invalidate_cached_index("active_index")?;
        }
        ChangeKind::Upsert => {
            let abs = root.join(&change.rel_path);
            let bytes = match std::fs::read(&abs) {
                Ok(b) => b,
                // The file may have been removed again between the event
                // firing and us reading it; treat as a delete.
                Err(_) => {
                    store.delete_file(&rel_str)?;
                    store.invalidate_cached_index("active_index")?;
                    return Ok(());
                }
            };
            let capped: Vec<u8> = bytes
                .into_iter()
                .take(cfg.max_bytes_per_file as usize)
                .collect();
            if let Some(outcome) = build_file_record(&abs, &change.rel_path, &capped, cfg)? {
                store.put_file(&rel_str, &outcome.fields, outcome.byte_len)?;
                store.invalidate_cached_index("active_index")?;
            }
        }
    }
    Ok(())
}

fn classify_event(event: &Event) -> Option<ChangeKind> {
    match event.kind {
        EventKind::Create(_) | EventKind::Modify(_) => Some(ChangeKind::Upsert),
        EventKind::Remove(_) => Some(ChangeKind::Remove),
        _ => None,
    }
}

/// Debounce raw `notify::Event`s into coalesced [`FileChange`]s: events for
/// the same path arriving within [`DEBOUNCE_WINDOW`] of each other collapse
/// into the latest one. Distinct paths are always independent.
///
/// Upserts are additionally pre-screened against an xxh3 content hash of the
/// last change actually dispatched for that path: editors that touch a file
/// without changing its bytes (a save-without-edit, `touch`, a `git
/// checkout` that restores identical content) fire `notify` events that
/// would otherwise still trip a full re-ingest.
pub struct Debouncer {
    pending: HashMap<PathBuf, (ChangeKind, Instant, Option<u64>)>,
    last_dispatched_hash: HashMap<PathBuf, u64>,
}

impl Debouncer {
    pub fn new() -> Self {
        Self {
            pending: HashMap::new(),
            last_dispatched_hash: HashMap::new(),
        }
    }

    /// Record a raw event. Returns the previous pending change for the path
    /// if it is now considered final and flushable (i.e. dropped before the
    /// debounce window so an even older event doesn't get lost), but in
    /// practice callers simply overwrite and let `drain_ready` decide.
    pub fn record(&mut self, root: &Path, event: &Event) {
        let Some(kind) = classify_event(event) else {
            return;
        };
        for abs in &event.paths {
            let Ok(rel) = abs.strip_prefix(root) else {
                continue;
            };
            let rel = rel.to_path_buf();

            if kind == ChangeKind::Upsert {
                if let Some(hash) = std::fs::read(&abs).ok().map(|bytes| xxh3_64(&bytes)) {
                    if self.last_dispatched_hash.get(&rel) == Some(&hash) {
                        self.pending.remove(&rel);
                        continue;
                    }
                    self.pending.insert(rel, (kind, Instant::now(), Some(hash)));
                    continue;
                }
            } else {
                self.last_dispatched_hash.remove(&rel);
            }
            self.pending.insert(rel, (kind, Instant::now(), None));
        }
    }

    /// Drain every pending change whose debounce window has elapsed.
    pub fn drain_ready(&mut self) -> Vec<FileChange> {
        let now = Instant::now();
        let mut ready = Vec::new();
        let last_dispatched_hash = &mut self.last_dispatched_hash;
        self.pending.retain(|path, (kind, seen, hash)| {
            if now.duration_since(*seen) >= DEBOUNCE_WINDOW {
                match (*kind, *hash) {
                    (ChangeKind::Upsert, Some(hash)) => {
                        last_dispatched_hash.insert(path.clone(), hash);
                    }
                    (ChangeKind::Remove, _) => {
                        last_dispatched_hash.remove(path);
                    }
                    _ => {}
                }
                ready.push(FileChange {
                    rel_path: path.clone(),
                    kind: *kind,
                });
                false
            } else {
                true
            }
        });
        ready
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl Default for Debouncer {
    fn default() -> Self {
        Self::new()
    }
}

/// A handle to a running watcher background thread. Dropping it stops the
/// underlying `notify` watcher; the thread itself exits once its channel
/// closes.
pub struct WatcherHandle {
    _watcher: RecommendedWatcher,
    stop: Sender<()>,
    join: Option<std::thread::JoinHandle<()>>,
}

impl WatcherHandle {
    pub fn stop(mut self) {
        let _ = self.stop.send(());
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

/// Start a recursive watcher over `root`, applying every coalesced change to
/// `store` on a dedicated background thread. The store must
/// be `Send` since it moves onto the background thread.
pub fn watch_repo<S>(root: PathBuf, mut store: S, cfg: ManifoldConfig) -> notify::Result<WatcherHandle>
where
    S: KvStore + Send + 'static,
{
    let (event_tx, event_rx): (Sender<notify::Result<Event>>, Receiver<notify::Result<Event>>) =
        channel();
    let mut watcher = notify::recommended_watcher(move |res| {
        let _ = event_tx.send(res);
    })?;
    watcher.watch(&root, RecursiveMode::Recursive)?;

    let (stop_tx, stop_rx) = channel::<()>();
    let join = std::thread::spawn(move || {
        let mut debouncer = Debouncer::new();
        loop {
            if stop_rx.try_recv().is_ok() {
                break;
            }
            match event_rx.recv_timeout(Duration::from_millis(50)) {
                Ok(Ok(event)) => debouncer.record(&root, &event),
                Ok(Err(_)) => {
                    // Transient watcher backend error: swallow and keep observing.
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }

            for change in debouncer.drain_ready() {
                if let Err(e) = apply_change(&mut store, &root, &change, &cfg) {
                    crate::debug_log!("watcher: failed to apply {:?}: {e}", change.rel_path);
                }
            }
        }
    });

    Ok(WatcherHandle {
        _watcher: watcher,
        stop: stop_tx,
        join: Some(join),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::path::Path;

    #[test]
    fn upsert_writes_a_file_record() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "def f():\n    return 1\n".repeat(50)).unwrap();
        let mut store = MemoryStore::new();
        let cfg = ManifoldConfig::default();
        let change = FileChange {
            rel_path: PathBuf::from("a.py"),
            kind: ChangeKind::Upsert,
        };
        apply_change(&mut store, dir.path(), &change, &cfg).unwrap();
        assert!(store.get_file_all("a.py").unwrap().is_some());
    }

    #[test]
    fn remove_deletes_the_file_record() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = MemoryStore::new();
        store
            .put_file("gone.py", &[("doc".to_string(), "x".to_string())], 1)
            .unwrap();
        let change = FileChange {
            rel_path: PathBuf::from("gone.py"),
            kind: ChangeKind::Remove,
        };
        apply_change(&mut store, dir.path(), &change, &ManifoldConfig::default()).unwrap();
        assert!(store.get_file_all("gone.py").unwrap().is_none());
    }

    #[test]
    fn upsert_of_a_deleted_file_is_treated_as_remove() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = MemoryStore::new();
        store
            .put_file("ghost.py", &[("doc".to_string(), "x".to_string())], 1)
            .unwrap();
        let change = FileChange {
            rel_path: PathBuf::from("ghost.py"),
            kind: ChangeKind::Upsert,
        };
        apply_change(&mut store, dir.path(), &change, &ManifoldConfig::default()).unwrap();
        assert!(store.get_file_all("ghost.py").unwrap().is_none());
    }

    #[test]
    fn debouncer_coalesces_rapid_events_for_the_same_path() {
        let dir = tempfile::tempdir().unwrap();
        let mut debouncer = Debouncer::new();
        let abs = dir.path().join("a.py");
        let ev = Event::new(EventKind::Modify(notify::event::ModifyKind::Any)).add_path(abs);
        debouncer.record(dir.path(), &ev);
        debouncer.record(dir.path(), &ev);
        assert_eq!(debouncer.pending.len(), 1);
        // Not ready yet: debounce window hasn't elapsed.
        assert!(debouncer.drain_ready().is_empty());
    }

    #[test]
    fn debouncer_flushes_after_the_window_elapses() {
        let dir = tempfile::tempdir().unwrap();
        let mut debouncer = Debouncer::new();
        let abs = dir.path().join("a.py");
        let ev = Event::new(EventKind::Modify(notify::event::ModifyKind::Any)).add_path(abs);
        debouncer.record(dir.path(), &ev);
        std::thread::sleep(DEBOUNCE_WINDOW + Duration::from_millis(20));
        let ready = debouncer.drain_ready();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].rel_path, Path::new("a.py"));
    }
}
