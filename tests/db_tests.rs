//! Store tests: SQLite round trip, metastore timestamps and regional lookup, stage markers.

use grantmap::store::{
    KvStore, MemoryStore, Metastore, Record, SqliteDb, StageStore, Tables,
};
use grantmap::{Arn, Phase, StageKey};
use serde_json::json;
use anyhow::Result;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn record(value: serde_json::Value) -> Record {
    serde_json::from_value(value).unwrap()
}

// --- SqliteStore ---

#[test]
fn test_sqlite_put_get_delete() {
    let db = SqliteDb::open_in_memory().unwrap();
    let store = db.table(Tables::METASTORE).unwrap();
    assert_eq!(store.get("dynamodb/orders").unwrap(), None);

    store
        .put("dynamodb/orders", &record(json!({ "observed": 10 })))
        .unwrap();
    assert!(store.exists("dynamodb/orders").unwrap());
    assert_eq!(
        store.get("dynamodb/orders").unwrap(),
        Some(record(json!({ "observed": 10 })))
    );

    store.delete("dynamodb/orders").unwrap();
    assert!(!store.exists("dynamodb/orders").unwrap());
}

#[test]
fn test_sqlite_tables_are_separate() {
    let db = SqliteDb::open_in_memory().unwrap();
    let meta = db.table(Tables::METASTORE).unwrap();
    let stages = db.table(Tables::STAGES).unwrap();
    meta.put("k", &record(json!({ "a": 1 }))).unwrap();
    assert_eq!(stages.get("k").unwrap(), None);
    assert_eq!(meta.keys().unwrap(), vec!["k".to_string()]);
}

#[test]
fn test_sqlite_unknown_table() {
    let db = SqliteDb::open_in_memory().unwrap();
    assert!(db.table("paths").is_err());
}

#[test]
fn test_sqlite_file_persists_across_opens() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(".grantmap.db");
    {
        let db = SqliteDb::open(&path).unwrap();
        db.table(Tables::ACCESS_CACHE)
            .unwrap()
            .put("arn:aws:sqs:us-east-1:1:q", &record(json!({ "expire": 5 })))
            .unwrap();
    }
    let db = SqliteDb::open(&path).unwrap();
    let got = db
        .table(Tables::ACCESS_CACHE)
        .unwrap()
        .get("arn:aws:sqs:us-east-1:1:q")
        .unwrap();
    assert_eq!(got, Some(record(json!({ "expire": 5 }))));
}

// --- Metastore ---

#[test]
fn test_metastore_keys() {
    let arn = Arn::parse("arn:aws:dynamodb:us-east-1:1:table/orders").unwrap();
    assert_eq!(Metastore::key(&arn), "dynamodb/orders");
    assert_eq!(Metastore::regional_key(&arn), "us-east-1/dynamodb/orders");
}

#[test]
fn test_metastore_set_timestamp_writes_init_once() {
    let store = Arc::new(MemoryStore::new());
    let meta = Metastore::new(store.clone(), false);
    meta.set_timestamp("sqs/q", "registered", Some(100)).unwrap();
    meta.set_timestamp("sqs/q", "registered", Some(200)).unwrap();
    assert_eq!(
        meta.get("sqs/q").unwrap(),
        Some(record(json!({ "registered": 200, "init_registered": 100 })))
    );
}

#[test]
fn test_metastore_observed_after_registered_has_no_init() {
    let store = Arc::new(MemoryStore::new());
    let meta = Metastore::new(store, false);
    meta.set_timestamp("sqs/q", "registered", Some(100)).unwrap();
    meta.set_timestamp("sqs/q", "observed", Some(150)).unwrap();
    meta.set_created_at("sqs/q", 50).unwrap();
    assert_eq!(
        meta.get("sqs/q").unwrap(),
        Some(record(json!({
            "registered": 100,
            "init_registered": 100,
            "observed": 150,
            "created_at": 50
        })))
    );
}

#[test]
fn test_metastore_dry_run_writes_nothing() {
    let store = Arc::new(MemoryStore::new());
    let meta = Metastore::new(store.clone(), true);
    meta.set_observed("sqs/q").unwrap();
    meta.set_registered("sqs/q").unwrap();
    assert!(store.is_empty());
}

#[test]
fn test_metastore_regional_record_with_supplemental_field_wins() {
    let store = Arc::new(MemoryStore::new());
    let arn = Arn::parse("arn:aws:dynamodb:eu-west-1:1:table/orders").unwrap();
    store
        .put("dynamodb/orders", &record(json!({ "project": "global" })))
        .unwrap();
    store
        .put(
            "eu-west-1/dynamodb/orders",
            &record(json!({ "project": "regional" })),
        )
        .unwrap();
    let meta = Metastore::new(store, false);
    assert_eq!(
        meta.get_regional_or_global(&arn).unwrap(),
        Some(record(json!({ "project": "regional" })))
    );
}

#[test]
fn test_metastore_regional_record_without_supplemental_field_ignored() {
    let store = Arc::new(MemoryStore::new());
    let arn = Arn::parse("arn:aws:dynamodb:eu-west-1:1:table/orders").unwrap();
    store
        .put("dynamodb/orders", &record(json!({ "schema": "v1" })))
        .unwrap();
    store
        .put(
            "eu-west-1/dynamodb/orders",
            &record(json!({ "observed": 1 })),
        )
        .unwrap();
    let meta = Metastore::new(store, false);
    assert_eq!(
        meta.get_regional_or_global(&arn).unwrap(),
        Some(record(json!({ "schema": "v1" })))
    );
}

/// Widens the gap between a record's read and its write.
struct SlowStore(MemoryStore);

impl KvStore for SlowStore {
    fn get(&self, key: &str) -> Result<Option<Record>> {
        let record = self.0.get(key)?;
        thread::sleep(Duration::from_millis(50));
        Ok(record)
    }

    fn put(&self, key: &str, record: &Record) -> Result<()> {
        self.0.put(key, record)
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.0.delete(key)
    }

    fn keys(&self) -> Result<Vec<String>> {
        self.0.keys()
    }
}

#[test]
fn test_metastore_concurrent_writes_keep_both_fields() {
    let meta = Metastore::new(Arc::new(SlowStore(MemoryStore::new())), false);
    let observer = meta.clone();
    let registrar = meta.clone();
    thread::scope(|scope| {
        scope.spawn(|| observer.set_observed("sqs/orders").unwrap());
        scope.spawn(|| registrar.set_registered("sqs/orders").unwrap());
    });

    let record = meta.get("sqs/orders").unwrap().unwrap();
    for field in ["observed", "registered", "init_registered"] {
        assert!(record.contains_key(field), "missing {field}: {record:?}");
    }
}

// --- StageStore ---

#[test]
fn test_stage_store_last_completed() {
    let store = StageStore::new(Arc::new(MemoryStore::new()));
    let key = StageKey::new("123", Phase::Scan);
    store.put_completed_at(&key, 1_000).unwrap();

    let rec = store.last_completed_at("123", "scan", 2_000).unwrap().unwrap();
    assert_eq!(rec.ts, 1_000);
    assert_eq!(rec.expire, 1_000 + 1_209_600);
    assert_eq!(rec.stage, "scan");

    assert!(
        store
            .last_completed_at("123", "scan", 1_000 + 1_209_601)
            .unwrap()
            .is_none()
    );
    assert!(store.last_completed_at("123", "filter", 2_000).unwrap().is_none());
}

#[test]
fn test_stage_store_accounts() {
    let store = StageStore::new(Arc::new(MemoryStore::new()));
    store
        .put_completed_at(&StageKey::new("222", Phase::Registration), 1)
        .unwrap();
    store
        .put_completed_at(&StageKey::new("111", Phase::Scan), 1)
        .unwrap();
    store
        .put_completed_at(&StageKey::new("111", Phase::Filter), 1)
        .unwrap();
    assert_eq!(
        store.accounts().unwrap(),
        vec!["111".to_string(), "222".to_string()]
    );
}
