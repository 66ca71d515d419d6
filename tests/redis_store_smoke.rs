//! Smoke test against a real Redis/Valkey instance. Ignored by default since
//! there's no server to connect to in this environment; run with
//! `cargo test --test redis_store_smoke -- --ignored` against a local
//! `redis-server` on the default port.

use manifold_core::config::ManifoldConfig;
use manifold_core::ingest::ingest_repo;
use manifold_core::store::{KvStore, RedisStore};

#[test]
#[ignore]
fn ingest_round_trips_through_a_live_redis() {
    let mut store = RedisStore::connect("redis://127.0.0.1:6379/15")
        .expect("local redis-server reachable on db 15");
    store.clear_namespace().unwrap();

    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("a.py"),
        "def f():\n    return 1\n".repeat(40),
    )
    .unwrap();

    let mut cfg = ManifoldConfig::default();
    cfg.redis_url = "redis://127.0.0.1:6379/15".to_string();

    let report = ingest_repo(&mut store, dir.path(), &cfg).unwrap();
    assert_eq!(report.metadata.text_files, 1);

    let files = store.list_files().unwrap();
    assert_eq!(files, vec!["a.py".to_string()]);

    store.clear_namespace().unwrap();
}
