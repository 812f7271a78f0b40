//! Tests for fixture loading
//!
//! These tests verify:
//! - Documents are stored verbatim (strings) or as JSON text
//! - Locked documents keep their CAS for unlocking
//! - Routes honor type/method/status defaults
//! - Malformed files surface fixture errors

use std::fs;

use couchlink::native::Fixture;
use couchlink::{Bucket, Config, CouchError, HttpOptions, HttpType, KeyBatch, MockCluster, Outcome};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

const FIXTURE: &str = r#"{
    "documents": {
        "foo": { "value": "bar" },
        "counter": { "value": {"n": 1} },
        "held": { "value": "x", "locked": true, "cas": 42 }
    },
    "routes": [
        { "path": "/_design/docs/_view/all", "chunks": ["{\"rows\":[", "]}"],
          "headers": {"Content-Type": "application/json"} },
        { "type": "management", "method": "delete", "path": "/pools/default/buckets/old",
          "status": 404, "chunks": ["missing"] }
    ]
}"#;

fn write_fixture(text: &str) -> (TempDir, std::path::PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("fixture.json");
    fs::write(&path, text).unwrap();
    (temp_dir, path)
}

fn loaded_cluster() -> MockCluster {
    let (_temp, path) = write_fixture(FIXTURE);
    let cluster = MockCluster::new();
    Fixture::load(&path).unwrap().apply(&cluster).unwrap();
    cluster
}

// =============================================================================
// Document Tests
// =============================================================================

#[test]
fn test_documents_are_loaded() {
    let cluster = loaded_cluster();

    assert_eq!(cluster.len(), 3);
    assert_eq!(cluster.get(b"foo").unwrap(), "bar");
    assert_eq!(cluster.get(b"counter").unwrap(), r#"{"n":1}"#);
}

#[test]
fn test_locked_document_unlocks_with_its_cas() {
    let cluster = loaded_cluster();
    assert!(cluster.is_locked(b"held"));
    assert_eq!(cluster.cas(b"held"), Some(42));

    let bucket = Bucket::connect(Config::default(), cluster.transport());
    let reply = bucket.unlock(&KeyBatch::with_cas([("held", 42u64)]), None).unwrap();

    assert_eq!(reply.outcome(), Some(Outcome::Single(true)));
    assert!(!cluster.is_locked(b"held"));
}

#[test]
fn test_max_cas_fixture_then_plain_document() {
    let fixture = Fixture::from_json(
        r#"{"documents": {"a": {"value": "x", "cas": 18446744073709551615}, "b": {"value": "y"}}}"#,
    )
    .unwrap();
    let cluster = MockCluster::new();
    fixture.apply(&cluster).unwrap();

    assert_eq!(cluster.cas(b"a"), Some(u64::MAX));
    assert_eq!(cluster.cas(b"b"), Some(1));
}

#[test]
fn test_fresh_cas_does_not_collide_with_fixture_cas() {
    let cluster = loaded_cluster();
    let cas = cluster.insert("new", "v");
    assert!(cas > 42);
}

// =============================================================================
// Route Tests
// =============================================================================

#[test]
fn test_view_route_defaults() {
    let cluster = loaded_cluster();
    let bucket = Bucket::connect(Config::default(), cluster.transport());

    let mut request = bucket.make_http_request("/_design/docs/_view/all", HttpOptions::new(), None);
    let reply = request.perform().unwrap().unwrap();

    assert_eq!(reply.body().unwrap(), "{\"rows\":[]}");
}

#[test]
fn test_management_route_status() {
    let cluster = loaded_cluster();
    let bucket = Bucket::connect(Config::default(), cluster.transport());

    let options = HttpOptions::new()
        .kind(HttpType::Management)
        .method("DELETE".parse().unwrap());
    let mut request = bucket.make_http_request("/pools/default/buckets/old", options, None);
    let err = request.perform().unwrap_err();

    match err {
        CouchError::Library(e) => assert_eq!(e.http_status, Some(404)),
        other => panic!("unexpected error: {:?}", other),
    }
}

// =============================================================================
// Error Tests
// =============================================================================

#[test]
fn test_missing_file() {
    let temp_dir = TempDir::new().unwrap();
    let err = Fixture::load(&temp_dir.path().join("absent.json")).unwrap_err();
    assert!(matches!(err, CouchError::Fixture(_)));
}

#[test]
fn test_malformed_json() {
    let (_temp, path) = write_fixture("{ not json");
    let err = Fixture::load(&path).unwrap_err();
    assert!(matches!(err, CouchError::Fixture(_)));
}

#[test]
fn test_unknown_route_method() {
    let fixture = Fixture::from_json(r#"{"routes": [{"method": "PATCH", "path": "/x"}]}"#).unwrap();
    let err = fixture.apply(&MockCluster::new()).unwrap_err();

    assert!(matches!(err, CouchError::Argument(_)));
    assert_eq!(err.to_string(), "unsupported HTTP method");
}

#[test]
fn test_empty_fixture() {
    let fixture = Fixture::from_json("{}").unwrap();
    let cluster = MockCluster::new();
    fixture.apply(&cluster).unwrap();
    assert!(cluster.is_empty());
}
