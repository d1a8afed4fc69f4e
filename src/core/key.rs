//! Request identity used for deduplication and caching

use std::{
    cmp::Ordering,
    collections::BTreeMap,
    fmt,
    hash::{Hash, Hasher},
    sync::Arc,
};

use http::Method;
use serde_json::Value as JsonValue;

#[derive(PartialEq, Eq, Hash, PartialOrd, Ord)]
struct KeyParts {
    method: String,
    url: String,
    body: Option<String>,
    headers: BTreeMap<String, String>,
}

/// Canonical identity of a request.
///
/// Equality and hashing work on the separate components (method, url, body,
/// headers), so a `:` inside a url or body never shifts a field boundary.
/// Headers are held with lowercased names, and a body that parses as JSON is
/// re-serialized so object member order does not matter. A JSON body holding
/// a number that does not fit `i64`/`u64` is kept verbatim, as is any other
/// body, so callers sending non-JSON bodies must pass a stable serialization
/// themselves.
///
/// The rendered form `METHOD:url:body:headers` is only for display and for
/// pattern-based invalidation.
#[derive(Clone)]
pub struct RequestKey {
    parts: Arc<KeyParts>,
    rendered: Arc<str>,
}

impl RequestKey {
    pub fn new(
        method: &Method,
        url: &str,
        body: Option<&str>,
        headers: &BTreeMap<String, String>,
    ) -> Self {
        let parts = KeyParts {
            method: method.as_str().to_string(),
            url: url.to_string(),
            body: body.map(canonical_body),
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_ascii_lowercase(), v.clone()))
                .collect(),
        };
        let rendered = format!(
            "{}:{}:{}:{}",
            parts.method,
            parts.url,
            parts.body.as_deref().unwrap_or_default(),
            render_headers(&parts.headers)
        );
        Self {
            parts: Arc::new(parts),
            rendered: Arc::from(rendered),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.rendered
    }

    pub fn contains(&self, pattern: &str) -> bool {
        self.rendered.contains(pattern)
    }
}

fn canonical_body(body: &str) -> String {
    // serde_json keeps object members in a BTreeMap, so a round trip sorts them
    match serde_json::from_str::<JsonValue>(body) {
        Ok(value) if !has_float(&value) => {
            serde_json::to_string(&value).unwrap_or_else(|_| body.to_string())
        }
        _ => body.to_string(),
    }
}

/// Floats, and integers too wide for 64 bits, do not survive a round trip.
fn has_float(value: &JsonValue) -> bool {
    match value {
        JsonValue::Number(n) => n.is_f64(),
        JsonValue::Array(items) => items.iter().any(has_float),
        JsonValue::Object(members) => members.values().any(has_float),
        _ => false,
    }
}

fn render_headers(headers: &BTreeMap<String, String>) -> String {
    if headers.is_empty() {
        return "{}".to_string();
    }
    serde_json::to_string(headers).unwrap_or_default()
}

impl PartialEq for RequestKey {
    fn eq(&self, other: &Self) -> bool {
        self.parts == other.parts
    }
}

impl Eq for RequestKey {}

impl Hash for RequestKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.parts.hash(state);
    }
}

impl PartialOrd for RequestKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RequestKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.parts.cmp(&other.parts)
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.rendered)
    }
}

impl fmt::Debug for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RequestKey({})", self.rendered)
    }
}
