//! Fetch-shaped request options

use std::{collections::BTreeMap, time::Duration};

use http::{header, Method};
use serde::Serialize;

use super::{error::FetchResult, key::RequestKey};

/// Options accepted by every entry point of the orchestration layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOptions {
    pub method: Method,
    /// Header names are stored lowercased.
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
    /// Cache lifetime; falls back to the configured default when unset.
    pub ttl: Option<Duration>,
    /// Route through the batch scheduler instead of dispatching directly.
    pub batch: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            method: Method::GET,
            headers: BTreeMap::new(),
            body: None,
            ttl: None,
            batch: false,
        }
    }
}

impl FetchOptions {
    pub fn get() -> Self {
        Self::default()
    }

    pub fn post(body: impl Into<String>) -> Self {
        Self::default().method(Method::POST).body(body)
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serialize `value` as the body and mark it as JSON.
    pub fn json<T: Serialize>(self, value: &T) -> FetchResult<Self> {
        let body = serde_json::to_string(value)?;
        Ok(self
            .header(header::CONTENT_TYPE.as_str(), "application/json")
            .body(body))
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn batch(mut self, batch: bool) -> Self {
        self.batch = batch;
        self
    }

    /// Identity of this request against `url`.
    pub fn key(&self, url: &str) -> RequestKey {
        RequestKey::new(&self.method, url, self.body.as_deref(), &self.headers)
    }

    /// Identity used to decide whether batched items are interchangeable.
    pub fn fingerprint(&self, url: &str) -> (RequestKey, Option<Duration>) {
        (self.key(url), self.ttl)
    }
}
