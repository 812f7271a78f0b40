//! Tests for status codes and error mapping
//!
//! These tests verify:
//! - Numeric codes round-trip through `from_code`
//! - Library errors render message, key and status
//! - HTTP responses fail on a non-2xx status even when transport succeeded

use bytes::Bytes;
use couchlink::error::{check_http_status, check_status};
use couchlink::{CouchError, StatusCode};

// =============================================================================
// Status Code Tests
// =============================================================================

#[test]
fn test_known_codes_are_mapped() {
    assert_eq!(StatusCode::from_code(0x00), Some(StatusCode::Success));
    assert_eq!(StatusCode::from_code(0x0c), Some(StatusCode::KeyExists));
    assert_eq!(StatusCode::from_code(0x0d), Some(StatusCode::KeyNotFound));
    assert_eq!(StatusCode::from_code(0x21), Some(StatusCode::HttpError));
}

#[test]
fn test_unknown_codes_are_rejected() {
    assert_eq!(StatusCode::from_code(0x01), None);
    assert_eq!(StatusCode::from_code(0xff), None);
}

#[test]
fn test_status_display_includes_code() {
    assert_eq!(StatusCode::KeyNotFound.to_string(), "No such key (0x0d)");
}

// =============================================================================
// Error Mapping Tests
// =============================================================================

#[test]
fn test_success_is_not_an_error() {
    assert!(check_status(StatusCode::Success, "failed to remove value", None).is_none());
}

#[test]
fn test_library_error_display() {
    let key = Bytes::from_static(b"missing");
    let err = check_status(StatusCode::KeyNotFound, "failed to remove value", Some(&key)).unwrap();

    assert!(err.is_not_found());
    assert_eq!(
        err.to_string(),
        "failed to remove value: key=\"missing\" (No such key (0x0d))"
    );
}

#[test]
fn test_http_error_on_non_2xx() {
    let err = check_http_status(StatusCode::Success, "failed to execute HTTP request", None, 404)
        .unwrap();

    assert_eq!(err.status(), Some(StatusCode::HttpError));
    match err {
        CouchError::Library(e) => assert_eq!(e.http_status, Some(404)),
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
fn test_http_success_statuses() {
    for status in [0u16, 200, 201, 204] {
        assert!(check_http_status(StatusCode::Success, "m", None, status).is_none());
    }
}

#[test]
fn test_transport_status_wins_over_http_status() {
    let err = check_http_status(StatusCode::NetworkError, "m", None, 200).unwrap();
    assert_eq!(err.status(), Some(StatusCode::NetworkError));
}

#[test]
fn test_closed_connection_error() {
    let err = CouchError::closed();
    assert!(matches!(err, CouchError::Connect(_)));
    assert_eq!(err.to_string(), "closed connection");
    assert_eq!(err.status(), None);
}
