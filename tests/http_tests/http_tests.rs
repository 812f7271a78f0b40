//! Tests for plain (non-chunked) HTTP requests
//!
//! These tests verify:
//! - One callback with the whole body, and the same reply from `perform`
//! - Extended replies carry status, path and folded headers
//! - Non-2xx responses become HTTP errors
//! - Request defaults, scheduling failures and asynchronous performs

use std::cell::RefCell;
use std::rc::Rc;

use couchlink::http::BodyCallback;
use couchlink::{
    Bucket, Config, CouchError, HttpMethod, HttpOptions, HttpReply, HttpRequest, HttpType,
    MockCluster, MockRoute, OperationKind, StatusCode,
};

// =============================================================================
// Helper Functions
// =============================================================================

const VIEW: &str = "/_design/docs/_view/all";

fn setup(config: Config) -> (MockCluster, Bucket) {
    let cluster = MockCluster::new();
    cluster.add_route(
        HttpType::View,
        HttpMethod::Get,
        VIEW,
        MockRoute::ok(r#"{"total_rows":0,"rows":[]}"#)
            .with_header("Content-Type", "application/json")
            .with_header("Set-Cookie", "a=1")
            .with_header("Set-Cookie", "b=2"),
    );
    let bucket = Bucket::connect(config, cluster.transport());
    (cluster, bucket)
}

fn recorder() -> (Rc<RefCell<Vec<HttpReply>>>, BodyCallback) {
    let replies = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&replies);
    let callback: BodyCallback = Box::new(move |reply| sink.borrow_mut().push(reply));
    (replies, callback)
}

// =============================================================================
// Body Tests
// =============================================================================

#[test]
fn test_plain_request_returns_body() {
    let (_cluster, bucket) = setup(Config::default());
    let mut request = HttpRequest::new(&bucket, VIEW, HttpOptions::new());

    let reply = request.perform().unwrap().unwrap();

    assert_eq!(reply.body().unwrap(), r#"{"total_rows":0,"rows":[]}"#);
    assert!(reply.as_extended().is_none());
    assert!(request.is_completed());
    assert!(!request.is_running());
    assert_eq!(bucket.in_flight(), 0);
}

#[test]
fn test_body_callback_invoked_once() {
    let (_cluster, bucket) = setup(Config::default());
    let (replies, callback) = recorder();
    let mut request = bucket.make_http_request(VIEW, HttpOptions::new(), Some(callback));

    request.perform().unwrap();

    let replies = replies.borrow();
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].body().unwrap(), r#"{"total_rows":0,"rows":[]}"#);
}

#[test]
fn test_extended_reply() {
    let (_cluster, bucket) = setup(Config::default());
    let mut request = HttpRequest::new(&bucket, VIEW, HttpOptions::new().extended(true));

    let reply = request.perform().unwrap().unwrap();
    let result = reply.as_extended().unwrap();

    assert_eq!(result.status, 200);
    assert_eq!(result.path, VIEW);
    assert!(result.completed);
    assert!(result.is_success());
    assert_eq!(result.headers["Set-Cookie"], vec!["a=1", "b=2"]);
    assert_eq!(result.headers["Content-Type"], vec!["application/json"]);
}

#[test]
fn test_perform_again_after_completion() {
    let (_cluster, bucket) = setup(Config::default());
    let (replies, callback) = recorder();
    let mut request = bucket.make_http_request(VIEW, HttpOptions::new(), Some(callback));

    request.perform().unwrap();
    request.perform().unwrap();

    assert_eq!(replies.borrow().len(), 2);
}

#[test]
fn test_perform_with_overrides_once() {
    let (_cluster, bucket) = setup(Config::default());
    let (registered, callback) = recorder();
    let (once, override_callback) = recorder();
    let mut request = bucket.make_http_request(VIEW, HttpOptions::new(), Some(callback));

    request.perform_with(override_callback).unwrap();
    assert_eq!(once.borrow().len(), 1);
    assert!(registered.borrow().is_empty());

    request.perform().unwrap();
    assert_eq!(once.borrow().len(), 1);
    assert_eq!(registered.borrow().len(), 1);
}

#[test]
fn test_on_body_replaces_callback() {
    let (_cluster, bucket) = setup(Config::default());
    let (first, callback) = recorder();
    let mut request = bucket.make_http_request(VIEW, HttpOptions::new(), Some(callback));

    let second = Rc::new(RefCell::new(0));
    let counter = Rc::clone(&second);
    let previous = request.on_body(move |_| *counter.borrow_mut() += 1);
    assert!(previous.is_some());

    request.perform().unwrap();

    assert!(first.borrow().is_empty());
    assert_eq!(*second.borrow(), 1);
}

// =============================================================================
// Error Tests
// =============================================================================

#[test]
fn test_missing_route_is_http_error() {
    let (_cluster, bucket) = setup(Config::default());
    let (replies, callback) = recorder();
    let options = HttpOptions::new().extended(true);
    let mut request = bucket.make_http_request("/_design/none/_view/x", options, Some(callback));

    let err = request.perform().unwrap_err();

    assert_eq!(err.status(), Some(StatusCode::HttpError));
    match &err {
        CouchError::Library(e) => {
            assert_eq!(e.http_status, Some(404));
            assert_eq!(e.operation, Some(OperationKind::HttpRequest));
            assert_eq!(e.key.as_deref(), Some(&b"/_design/none/_view/x"[..]));
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(err.to_string().starts_with("failed to execute HTTP request"));

    // The callback still saw the failed reply
    let replies = replies.borrow();
    let result = replies[0].as_extended().unwrap();
    assert_eq!(result.status, 404);
    assert!(result.completed);
    assert!(!result.is_success());
    assert!(request.is_completed());
}

#[test]
fn test_schedule_failure() {
    let (cluster, bucket) = setup(Config::default());
    cluster.reject_next_schedule(StatusCode::NetworkError);
    let mut request = HttpRequest::new(&bucket, VIEW, HttpOptions::new());

    let err = request.perform().unwrap_err();

    assert_eq!(err.status(), Some(StatusCode::NetworkError));
    assert!(err
        .to_string()
        .starts_with(&format!("failed to schedule document request: key=\"{}\"", VIEW)));
    assert!(!request.is_running());
    assert_eq!(bucket.in_flight(), 0);
}

#[test]
fn test_unsupported_method_and_type() {
    let err = "PATCH".parse::<HttpMethod>().unwrap_err();
    assert_eq!(err.to_string(), "unsupported HTTP method");

    let err = "spatial".parse::<HttpType>().unwrap_err();
    assert_eq!(err.to_string(), "unsupported request type");
}

#[test]
fn test_disconnected_bucket() {
    let (_cluster, bucket) = setup(Config::default());
    let mut request = HttpRequest::new(&bucket, VIEW, HttpOptions::new());
    bucket.disconnect().unwrap();

    let err = request.perform().unwrap_err();
    assert_eq!(err.to_string(), "closed connection");
}

#[test]
fn test_disconnect_while_running() {
    let (_cluster, bucket) = setup(Config::builder().async_mode(true).build());
    let (replies, callback) = recorder();
    let mut request = bucket.make_http_request(VIEW, HttpOptions::new(), Some(callback));

    request.perform().unwrap();
    assert!(request.is_running());
    bucket.disconnect().unwrap();

    assert!(!request.is_running());
    assert!(request.is_canceled());
    assert_eq!(Rc::strong_count(&replies), 1);

    let err = request.perform().unwrap_err();
    assert!(matches!(err, CouchError::Connect(_)));
    assert_eq!(err.to_string(), "closed connection");
    assert!(matches!(request.resume().unwrap_err(), CouchError::Connect(_)));
    assert!(replies.borrow().is_empty());
}

#[test]
fn test_dropped_bucket() {
    let (_cluster, bucket) = setup(Config::default());
    let mut request = HttpRequest::new(&bucket, VIEW, HttpOptions::new());
    drop(bucket);

    assert!(matches!(request.perform().unwrap_err(), CouchError::Connect(_)));
}

// =============================================================================
// Request Option Tests
// =============================================================================

#[test]
fn test_defaults_from_bucket_config() {
    let config = Config::builder()
        .default_content_type("text/plain")
        .default_http_type(HttpType::Management)
        .build();
    let (_cluster, bucket) = setup(config);

    let request = HttpRequest::new(&bucket, "/pools", HttpOptions::new());

    assert_eq!(request.command().content_type, "text/plain");
    assert_eq!(request.kind(), HttpType::Management);
    assert_eq!(request.method(), HttpMethod::Get);
    assert!(!request.is_chunked());
    assert!(!request.is_extended());
}

#[test]
fn test_options_override_defaults() {
    let (_cluster, bucket) = setup(Config::default());
    let options = HttpOptions::new()
        .method(HttpMethod::Post)
        .kind(HttpType::Management)
        .content_type("application/x-www-form-urlencoded")
        .body("name=docs");

    let request = HttpRequest::new(&bucket, "/pools/default/buckets", options);

    assert_eq!(request.command().content_type, "application/x-www-form-urlencoded");
    assert_eq!(request.command().body.as_deref(), Some(&b"name=docs"[..]));
    assert_eq!(request.method(), HttpMethod::Post);
    assert_eq!(request.path(), "/pools/default/buckets");
}

#[test]
fn test_default_content_type_is_json() {
    let (_cluster, bucket) = setup(Config::default());
    let request = HttpRequest::new(&bucket, VIEW, HttpOptions::new());
    assert_eq!(request.command().content_type, "application/json");
}

#[test]
fn test_management_post_route() {
    let (cluster, bucket) = setup(Config::default());
    cluster.add_route(
        HttpType::Management,
        HttpMethod::Post,
        "/pools/default/buckets",
        MockRoute::ok("").with_status(202),
    );
    let options = HttpOptions::new()
        .method(HttpMethod::Post)
        .kind(HttpType::Management)
        .extended(true);
    let mut request = HttpRequest::new(&bucket, "/pools/default/buckets", options);

    let reply = request.perform().unwrap().unwrap();
    assert_eq!(reply.as_extended().unwrap().status, 202);
}

#[test]
fn test_inspect() {
    let (_cluster, bucket) = setup(Config::default());
    let request = HttpRequest::new(&bucket, VIEW, HttpOptions::new());

    let text = request.inspect();
    assert!(text.starts_with("#<CouchRequest:0x"));
    assert!(text.ends_with(&format!("\"{}\" chunked:false>", VIEW)));
    assert_eq!(format!("{:?}", request), text);
}

// =============================================================================
// Asynchronous Tests
// =============================================================================

#[test]
fn test_async_perform_returns_immediately() {
    let (_cluster, bucket) = setup(Config::builder().async_mode(true).build());
    let (replies, callback) = recorder();
    let mut request = bucket.make_http_request(VIEW, HttpOptions::new(), Some(callback));

    assert!(request.perform().unwrap().is_none());
    assert!(request.is_running());
    assert!(replies.borrow().is_empty());

    let err = request.perform().unwrap_err();
    assert_eq!(err.to_string(), "request is already running");

    bucket.wait().unwrap();

    assert_eq!(replies.borrow().len(), 1);
    assert!(request.is_completed());
    assert!(request.resume().unwrap().unwrap().body().is_some());
}

#[test]
fn test_http_inside_run() {
    let (_cluster, bucket) = setup(Config::default());
    let (replies, callback) = recorder();
    let mut request = bucket.make_http_request(VIEW, HttpOptions::new(), Some(callback));

    bucket.run(|_| request.perform().map(|_| ())).unwrap();

    assert_eq!(replies.borrow().len(), 1);
    assert!(request.is_completed());
}
