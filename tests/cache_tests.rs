//! Access cache expiry, first-write-wins, and TTL jitter.

use grantmap::access::{AccessCache, jitter_ttl};
use grantmap::store::{KvStore, MemoryStore};
use grantmap::{AccessGrant, Capability};
use std::collections::BTreeSet;
use std::sync::Arc;

const NOW: i64 = 1_700_000_000;
const RES: &str = "arn:aws:s3:::bucket-a";

fn grant(principal: &str, caps: &[Capability]) -> AccessGrant {
    AccessGrant {
        principal_id: principal.to_string(),
        resource_id: RES.to_string(),
        capabilities: caps.iter().copied().collect::<BTreeSet<_>>(),
    }
}

fn cache(ttl: i64, ratio: f64) -> (Arc<MemoryStore>, AccessCache) {
    let store = Arc::new(MemoryStore::new());
    let cache = AccessCache::new(store.clone(), ttl, ratio);
    (store, cache)
}

// --- get / put ---

#[test]
fn test_miss_on_empty_cache() {
    let (_, cache) = cache(3600, 0.0);
    assert_eq!(cache.get_at(RES, NOW).unwrap(), None);
}

#[test]
fn test_put_then_hit() {
    let (store, cache) = cache(3600, 0.0);
    let grants = vec![grant("arn:aws:iam::123:role/r", &[Capability::Read])];
    assert!(cache.put_at(RES, &grants, NOW).unwrap());
    assert_eq!(store.len(), 1);
    assert_eq!(cache.get_at(RES, NOW + 10).unwrap(), Some(grants));
}

#[test]
fn test_first_write_wins_while_valid() {
    let (_, cache) = cache(3600, 0.0);
    let first = vec![grant("arn:aws:iam::123:role/a", &[Capability::Read])];
    let second = vec![grant(
        "arn:aws:iam::123:role/b",
        &[Capability::Read, Capability::Write],
    )];
    assert!(cache.put_at(RES, &first, NOW).unwrap());
    assert!(!cache.put_at(RES, &second, NOW + 1).unwrap());
    assert_eq!(cache.get_at(RES, NOW + 2).unwrap(), Some(first));
}

#[test]
fn test_expired_record_is_a_miss_and_can_be_replaced() {
    let (_, cache) = cache(100, 0.0);
    let first = vec![grant("arn:aws:iam::123:role/a", &[Capability::Read])];
    let second = vec![grant("arn:aws:iam::123:role/b", &[Capability::Write])];
    cache.put_at(RES, &first, NOW).unwrap();

    assert_eq!(cache.get_at(RES, NOW + 100).unwrap(), Some(first));
    assert_eq!(cache.get_at(RES, NOW + 101).unwrap(), None);

    assert!(cache.put_at(RES, &second, NOW + 101).unwrap());
    assert_eq!(cache.get_at(RES, NOW + 102).unwrap(), Some(second));
}

#[test]
fn test_empty_grants_not_stored() {
    let (store, cache) = cache(3600, 0.0);
    assert!(!cache.put_at(RES, &[], NOW).unwrap());
    assert!(store.is_empty());
}

#[test]
fn test_stored_empty_list_reads_as_miss() {
    let (store, cache) = cache(3600, 0.0);
    let raw = serde_json::json!({ "grants": [], "expire": NOW + 3600 });
    let serde_json::Value::Object(map) = raw else {
        unreachable!()
    };
    store.put(RES, &map).unwrap();
    assert_eq!(cache.get_at(RES, NOW).unwrap(), None);
}

#[test]
fn test_corrupt_record_is_error() {
    let (store, cache) = cache(3600, 0.0);
    let raw = serde_json::json!({ "grants": "nope" });
    let serde_json::Value::Object(map) = raw else {
        unreachable!()
    };
    store.put(RES, &map).unwrap();
    assert!(cache.get_at(RES, NOW).is_err());
}

#[test]
fn test_jittered_expiry_within_window() {
    let (store, cache) = cache(1000, 0.25);
    let grants = vec![grant("arn:aws:iam::123:role/a", &[Capability::Read])];
    cache.put_at(RES, &grants, NOW).unwrap();
    let expire = store.get(RES).unwrap().unwrap()["expire"].as_i64().unwrap();
    assert!((NOW + 750..=NOW + 1000).contains(&expire), "expire {expire}");
}

// --- jitter_ttl ---

#[test]
fn test_jitter_ttl_zero_ratio_is_exact() {
    assert_eq!(jitter_ttl(86_400, 0.0), 86_400);
}

#[test]
fn test_jitter_ttl_non_positive_ttl_passthrough() {
    assert_eq!(jitter_ttl(0, 0.5), 0);
    assert_eq!(jitter_ttl(-5, 0.5), -5);
}

#[test]
fn test_jitter_ttl_ratio_clamped_to_one() {
    for _ in 0..200 {
        let t = jitter_ttl(10, 3.0);
        assert!((0..=10).contains(&t));
    }
}
