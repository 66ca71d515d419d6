//! Index store (C3): a thin key/value abstraction over a Redis/Valkey-wire
//! compatible backend, plus an in-memory fake used by tests and by any
//! caller that wants to exercise the rest of the pipeline without a live
//! server.
//!
//! Key layout (namespaced, all under `manifold:`):
//!
//! - `manifold:file:{relpath}`   hash of per-file fields (doc, sig, chaos)
//! - `manifold:file_list`        sorted set, member=relpath, score=byte length
//! - `manifold:meta:{key}`       string, free-form ingest/run metadata
//! - `manifold:active_index`     string, base64(zstd(JSON(ManifoldIndex)))
//! - `manifold:docs:{fact_id}`   string, injected out-of-band fact payload

use crate::error::{ManifoldError, Result};
use redis::Commands;
use std::collections::HashMap;

const FILE_HASH_PREFIX: &str = "manifold:file:";
const FILE_LIST_KEY: &str = "manifold:file_list";
const META_PREFIX: &str = "manifold:meta:";
const FACTS_PREFIX: &str = "manifold:docs:";

/// Records are flushed to the backend in pipelines of roughly this many
/// hashes at a time.
pub const INGEST_BATCH_SIZE: usize = 200;
/// Bulk reads (e.g. batch chaos scans) group `HGET`s in batches of roughly
/// this size to amortize round-trips.
pub const SCAN_BATCH_SIZE: usize = 500;

fn file_key(path: &str) -> String {
    format!("{FILE_HASH_PREFIX}{path}")
}

fn meta_key(key: &str) -> String {
    format!("{META_PREFIX}{key}")
}

fn cache_key(key: &str) -> String {
    format!("manifold:{key}")
}

fn fact_key(id: &str) -> String {
    format!("{FACTS_PREFIX}{id}")
}

/// Cursor-based `SCAN MATCH` over the whole keyspace, collected to a `Vec`.
/// Prefer this to `KEYS`, which is O(n) against the full keyspace and blocks
/// the server's single event loop while it runs.
fn scan_keys(conn: &mut redis::Connection, pattern: &str) -> Result<Vec<String>> {
    let iter: redis::Iter<'_, String> = conn.scan_match(pattern)?;
    Ok(iter.collect())
}

/// Operations every backend (real or fake) must support.
pub trait KvStore {
    fn ping(&mut self) -> Result<bool>;

    fn put_file(&mut self, path: &str, fields: &[(String, String)], byte_len: u64) -> Result<()>;

    /// Batch form used by the ingestor; the default falls back to
    /// one-call-per-file, `RedisStore` overrides it with a real pipeline.
    fn put_files_batch(
        &mut self,
        records: &[(String, Vec<(String, String)>, u64)],
    ) -> Result<()> {
        for (path, fields, byte_len) in records {
            self.put_file(path, fields, *byte_len)?;
        }
        Ok(())
    }

    fn get_file_field(&mut self, path: &str, field: &str) -> Result<Option<String>>;
    fn get_file_all(&mut self, path: &str) -> Result<Option<HashMap<String, String>>>;

    /// Patch a single field on an existing file record without touching its
    /// recorded byte length (used by on-demand cache-back writes, e.g. a
    /// lazily computed `chaos` or `sig` field).
    fn put_file_field(&mut self, path: &str, field: &str, value: &str) -> Result<()>;

    fn delete_file(&mut self, path: &str) -> Result<bool>;

    /// All indexed paths, sorted lexicographically.
    fn list_files(&mut self) -> Result<Vec<String>>;

    /// Paths whose recorded byte length falls in `[min, max]` (`ZRANGEBYSCORE`).
    fn list_files_by_size(&mut self, min: u64, max: u64) -> Result<Vec<String>>;

    /// Glob-filtered subset of [`KvStore::list_files`].
    fn scan_files(&mut self, pattern: &str) -> Result<Vec<String>> {
        let all = self.list_files()?;
        let Ok(pat) = glob::Pattern::new(pattern) else {
            return Ok(all.into_iter().filter(|p| p.contains(pattern)).collect());
        };
        Ok(all.into_iter().filter(|p| pat.matches(p)).collect())
    }

    /// Deletes every key in the namespace; returns the number of file
    /// records removed.
    fn clear_namespace(&mut self) -> Result<u64>;

    fn put_meta(&mut self, key: &str, value: &str) -> Result<()>;
    fn get_meta(&mut self, key: &str) -> Result<Option<String>>;

    fn put_cached_index(&mut self, key: &str, blob_b64: &str) -> Result<()>;
    fn get_cached_index(&mut self, key: &str) -> Result<Option<String>>;
    fn invalidate_cached_index(&mut self, key: &str) -> Result<()>;

    fn inject_fact(&mut self, id: &str, text: &str) -> Result<()>;
    fn remove_fact(&mut self, id: &str) -> Result<bool>;
    fn list_facts(&mut self) -> Result<Vec<(String, String)>>;
}

/// Sync Redis/Valkey-backed store. Ingest and the watcher both run on plain
/// threads, so a blocking connection (rather than the async client) keeps
/// this module's concurrency story simple.
pub struct RedisStore {
    conn: redis::Connection,
}

impl RedisStore {
    pub fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| ManifoldError::KvUnavailable(e.to_string()))?;
        let conn = client
            .get_connection()
            .map_err(|e| ManifoldError::KvUnavailable(e.to_string()))?;
        Ok(Self { conn })
    }
}

impl KvStore for RedisStore {
    fn ping(&mut self) -> Result<bool> {
        let pong: String = redis::cmd("PING").query(&mut self.conn)?;
        Ok(pong == "PONG")
    }

    fn put_file(&mut self, path: &str, fields: &[(String, String)], byte_len: u64) -> Result<()> {
        let mut pipe = redis::pipe();
        pipe.atomic()
            .hset_multiple(file_key(path), fields)
            .ignore()
            .zadd(FILE_LIST_KEY, path, byte_len)
            .ignore();
        pipe.query(&mut self.conn)?;
        Ok(())
    }

    fn put_files_batch(
        &mut self,
        records: &[(String, Vec<(String, String)>, u64)],
    ) -> Result<()> {
        for chunk in records.chunks(INGEST_BATCH_SIZE) {
            let mut pipe = redis::pipe();
            pipe.atomic();
            for (path, fields, byte_len) in chunk {
                pipe.hset_multiple(file_key(path), fields).ignore();
                pipe.zadd(FILE_LIST_KEY, path, *byte_len).ignore();
            }
            pipe.query(&mut self.conn)?;
        }
        Ok(())
    }

    fn get_file_field(&mut self, path: &str, field: &str) -> Result<Option<String>> {
        let value: Option<String> = self.conn.hget(file_key(path), field)?;
        Ok(value)
    }

    fn get_file_all(&mut self, path: &str) -> Result<Option<HashMap<String, String>>> {
        let map: HashMap<String, String> = self.conn.hgetall(file_key(path))?;
        if map.is_empty() {
            Ok(None)
        } else {
            Ok(Some(map))
        }
    }

    fn put_file_field(&mut self, path: &str, field: &str, value: &str) -> Result<()> {
        let _: () = self.conn.hset(file_key(path), field, value)?;
        Ok(())
    }

    fn delete_file(&mut self, path: &str) -> Result<bool> {
        let mut pipe = redis::pipe();
        pipe.atomic().del(file_key(path)).zrem(FILE_LIST_KEY, path);
        let (removed, _): (i64, i64) = pipe.query(&mut self.conn)?;
        Ok(removed > 0)
    }

    fn list_files(&mut self) -> Result<Vec<String>> {
        let mut files: Vec<String> = self.conn.zrange(FILE_LIST_KEY, 0, -1)?;
        files.sort();
        Ok(files)
    }

    fn list_files_by_size(&mut self, min: u64, max: u64) -> Result<Vec<String>> {
        let files: Vec<String> = self.conn.zrangebyscore(FILE_LIST_KEY, min, max)?;
        Ok(files)
    }

    fn clear_namespace(&mut self) -> Result<u64> {
        let files: Vec<String> = self.conn.zrange(FILE_LIST_KEY, 0, -1)?;
        let count = files.len() as u64;
        let mut pipe = redis::pipe();
        pipe.atomic();
        for path in &files {
            pipe.del(file_key(path)).ignore();
        }
        pipe.del(FILE_LIST_KEY).ignore();
        pipe.query(&mut self.conn)?;

        for prefix in [META_PREFIX, FACTS_PREFIX, "manifold:active_index"] {
            let keys = scan_keys(&mut self.conn, &format!("{prefix}*"))?;
            if !keys.is_empty() {
                let _: () = self.conn.del(keys)?;
            }
        }
        Ok(count)
    }

    fn put_meta(&mut self, key: &str, value: &str) -> Result<()> {
        let _: () = self.conn.set(meta_key(key), value)?;
        Ok(())
    }

    fn get_meta(&mut self, key: &str) -> Result<Option<String>> {
        let value: Option<String> = self.conn.get(meta_key(key))?;
        Ok(value)
    }

    fn put_cached_index(&mut self, key: &str, blob_b64: &str) -> Result<()> {
        let _: () = self.conn.set(cache_key(key), blob_b64)?;
        Ok(())
    }

    fn get_cached_index(&mut self, key: &str) -> Result<Option<String>> {
        let value: Option<String> = self.conn.get(cache_key(key))?;
        Ok(value)
    }

    fn invalidate_cached_index(&mut self, key: &str) -> Result<()> {
        let _: () = self.conn.del(cache_key(key))?;
        Ok(())
    }

    fn inject_fact(&mut self, id: &str, text: &str) -> Result<()> {
        let _: () = self.conn.set(fact_key(id), text)?;
        Ok(())
    }

    fn remove_fact(&mut self, id: &str) -> Result<bool> {
        let removed: i64 = self.conn.del(fact_key(id))?;
        Ok(removed > 0)
    }

    fn list_facts(&mut self) -> Result<Vec<(String, String)>> {
        let keys = scan_keys(&mut self.conn, &format!("{FACTS_PREFIX}*"))?;
        let mut facts = Vec::with_capacity(keys.len());
        for key in keys {
            let id = key.trim_start_matches(FACTS_PREFIX).to_string();
            let text: String = self.conn.get(&key)?;
            facts.push((id, text));
        }
        facts.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(facts)
    }
}

/// In-memory fake for tests and offline exercising of the pipeline; mirrors
/// [`RedisStore`]'s semantics exactly (sorted listing order, size-range
/// queries, namespace-wide clear).
#[derive(Debug, Default)]
pub struct MemoryStore {
    files: HashMap<String, HashMap<String, String>>,
    sizes: HashMap<String, u64>,
    meta: HashMap<String, String>,
    cache: HashMap<String, String>,
    facts: HashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryStore {
    fn ping(&mut self) -> Result<bool> {
        Ok(true)
    }

    fn put_file(&mut self, path: &str, fields: &[(String, String)], byte_len: u64) -> Result<()> {
        let entry = self.files.entry(path.to_string()).or_default();
        for (k, v) in fields {
            entry.insert(k.clone(), v.clone());
        }
        self.sizes.insert(path.to_string(), byte_len);
        Ok(())
    }

    fn get_file_field(&mut self, path: &str, field: &str) -> Result<Option<String>> {
        Ok(self.files.get(path).and_then(|m| m.get(field).cloned()))
    }

    fn get_file_all(&mut self, path: &str) -> Result<Option<HashMap<String, String>>> {
        Ok(self.files.get(path).cloned())
    }

    fn put_file_field(&mut self, path: &str, field: &str, value: &str) -> Result<()> {
        self.files
            .entry(path.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    fn delete_file(&mut self, path: &str) -> Result<bool> {
        self.sizes.remove(path);
        Ok(self.files.remove(path).is_some())
    }

    fn list_files(&mut self) -> Result<Vec<String>> {
        let mut paths: Vec<String> = self.files.keys().cloned().collect();
        paths.sort();
        Ok(paths)
    }

    fn list_files_by_size(&mut self, min: u64, max: u64) -> Result<Vec<String>> {
        let mut paths: Vec<String> = self
            .sizes
            .iter()
            .filter(|(_, &len)| len >= min && len <= max)
            .map(|(path, _)| path.clone())
            .collect();
        paths.sort();
        Ok(paths)
    }

    fn clear_namespace(&mut self) -> Result<u64> {
        let count = self.files.len() as u64;
        self.files.clear();
        self.sizes.clear();
        self.meta.clear();
        self.cache.clear();
        self.facts.clear();
        Ok(count)
    }

    fn put_meta(&mut self, key: &str, value: &str) -> Result<()> {
        self.meta.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn get_meta(&mut self, key: &str) -> Result<Option<String>> {
        Ok(self.meta.get(key).cloned())
    }

    fn put_cached_index(&mut self, key: &str, blob_b64: &str) -> Result<()> {
        self.cache.insert(key.to_string(), blob_b64.to_string());
        Ok(())
    }

    fn get_cached_index(&mut self, key: &str) -> Result<Option<String>> {
        Ok(self.cache.get(key).cloned())
    }

    fn invalidate_cached_index(&mut self, key: &str) -> Result<()> {
        self.cache.remove(key);
        Ok(())
    }

    fn inject_fact(&mut self, id: &str, text: &str) -> Result<()> {
        self.facts.insert(id.to_string(), text.to_string());
        Ok(())
    }

    fn remove_fact(&mut self, id: &str) -> Result<bool> {
        Ok(self.facts.remove(id).is_some())
    }

    fn list_facts(&mut self) -> Result<Vec<(String, String)>> {
        let mut facts: Vec<(String, String)> = self.facts.clone().into_iter().collect();
        facts.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(facts)
    }
}
