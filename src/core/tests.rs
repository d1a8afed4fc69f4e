//! Tests for the core module
//!
//! Key construction has to be deterministic and order-independent, and the
//! error type has to keep transport failures apart from cancellations.

use std::{collections::BTreeMap, time::Duration};

use http::Method;
use serde_json::json;

use super::*;

/// Identical requests share a key
#[test]
fn test_key_is_deterministic() {
    let a = FetchOptions::get().header("Accept", "application/json");
    let b = FetchOptions::get().header("Accept", "application/json");
    assert_eq!(a.key("/api/items"), b.key("/api/items"));
}

/// Header insertion order and name case do not change the key
#[test]
fn test_key_ignores_header_order_and_case() {
    let a = FetchOptions::get()
        .header("X-Trace", "1")
        .header("Accept", "text/plain");
    let b = FetchOptions::get()
        .header("accept", "text/plain")
        .header("x-trace", "1");
    assert_eq!(a.key("/x"), b.key("/x"));

    let mut raw = BTreeMap::new();
    raw.insert("X-Trace".to_string(), "1".to_string());
    raw.insert("Accept".to_string(), "text/plain".to_string());
    assert_eq!(RequestKey::new(&Method::GET, "/x", None, &raw), a.key("/x"));
}

/// JSON bodies are compared by content, not member order
#[test]
fn test_key_canonicalizes_json_body() {
    let a = FetchOptions::post(r#"{"b":2,"a":1}"#);
    let b = FetchOptions::post(r#"{ "a": 1, "b": 2 }"#);
    assert_eq!(a.key("/q"), b.key("/q"));

    let c = FetchOptions::post(r#"{"a":1,"b":3}"#);
    assert_ne!(a.key("/q"), c.key("/q"));
}

/// Non-JSON bodies are used verbatim
#[test]
fn test_key_keeps_raw_body() {
    let a = FetchOptions::post("name=a&id=1");
    let b = FetchOptions::post("id=1&name=a");
    assert_ne!(a.key("/form"), b.key("/form"));
}

/// A `:` inside the url or body cannot move a field boundary
#[test]
fn test_key_components_do_not_run_together() {
    let a = FetchOptions::post("b:c").key("http://h/a");
    let b = FetchOptions::post("c").key("http://h/a:b");
    assert_eq!(a.as_str(), b.as_str());
    assert_ne!(a, b);

    // an empty body is not the same as no body
    let empty = FetchOptions::get().body("").key("/x");
    assert_ne!(empty, FetchOptions::get().key("/x"));
}

/// Numbers serde_json cannot hold exactly keep the body verbatim
#[test]
fn test_key_keeps_wide_numbers_apart() {
    let a = FetchOptions::post(r#"{"id":100000000000000000001}"#);
    let b = FetchOptions::post(r#"{"id":100000000000000000002}"#);
    assert_ne!(a.key("/q"), b.key("/q"));
    assert!(a.key("/q").contains("100000000000000000001"));

    let c = FetchOptions::post(r#"{"ratio":0.1}"#);
    let d = FetchOptions::post(r#"{"ratio":0.10000000000000000001}"#);
    assert_ne!(c.key("/q"), d.key("/q"));

    // integers that fit still canonicalize
    let e = FetchOptions::post(r#"{"b":-2,"a":18446744073709551615}"#);
    let f = FetchOptions::post(r#"{"a":18446744073709551615,"b":-2}"#);
    assert_eq!(e.key("/q"), f.key("/q"));
}

#[test]
fn test_key_distinguishes_method_and_url() {
    let get = FetchOptions::get();
    let delete = FetchOptions::get().method(Method::DELETE);
    assert_ne!(get.key("/x"), delete.key("/x"));
    assert_ne!(get.key("/x"), get.key("/y"));
    assert!(get.key("/users/42").contains("/users/"));
    assert!(get.key("/users/42").as_str().starts_with("GET:/users/42:"));
}

#[test]
fn test_json_options() {
    let options = FetchOptions::post("")
        .json(&json!({"query": "select 1"}))
        .unwrap();
    assert_eq!(options.body.as_deref(), Some(r#"{"query":"select 1"}"#));
    assert_eq!(
        options.headers.get("content-type").map(String::as_str),
        Some("application/json")
    );
}

/// The fingerprint tells batch items apart on everything including ttl
#[test]
fn test_fingerprint() {
    let a = FetchOptions::get().ttl(Duration::from_secs(1));
    let b = FetchOptions::get().ttl(Duration::from_secs(1));
    let c = FetchOptions::get().ttl(Duration::from_secs(2));
    assert_eq!(a.fingerprint("/x"), b.fingerprint("/x"));
    assert_ne!(a.fingerprint("/x"), c.fingerprint("/x"));
    assert_ne!(a.fingerprint("/x"), FetchOptions::get().fingerprint("/x"));
}

/// Test error handling and conversion
#[test]
fn test_error_handling() {
    let status = FetchError::Status {
        status: 503,
        status_text: "Service Unavailable".to_string(),
    };
    assert_eq!(
        status.to_string(),
        "HTTP error! status: 503 Service Unavailable"
    );
    assert_eq!(status.status(), Some(503));
    assert!(!status.is_cancelled());
    assert!(FetchError::Cancelled.is_cancelled());

    let decode: FetchError = serde_json::from_str::<serde_json::Value>("{")
        .unwrap_err()
        .into();
    assert!(matches!(decode, FetchError::Decode(_)));

    let result: Result<(), &str> = Err("boom");
    let err = result.with_context("sweeping").unwrap_err();
    assert_eq!(err, FetchError::Internal("sweeping: boom".to_string()));

    let config = crate::config_error!("delay must be at least {} ms", 1);
    assert!(config.to_string().contains("Configuration error"));
}
