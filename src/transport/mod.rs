//! Outbound network primitive
//!
//! The orchestration layer sees the network through the [`Transport`] trait
//! only. Retries, backoff and timeouts belong to implementations of it.

pub mod http;

#[cfg(test)]
pub(crate) mod mock;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value as JsonValue;

use crate::core::{FetchError, FetchOptions, FetchResult};

pub use self::http::HttpTransport;

/// Asynchronous request function the cache dispatches through.
///
/// Resolves with whatever the server answered, including non-2xx responses;
/// it only fails when no response was obtained at all.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn request(&self, url: &str, options: &FetchOptions) -> FetchResult<TransportResponse>;
}

/// Raw response handed back by a [`Transport`].
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub status_text: String,
    pub body: Bytes,
}

impl TransportResponse {
    pub fn new(status: u16, status_text: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            status_text: status_text.into(),
            body: body.into(),
        }
    }

    /// 200 OK carrying `value` as JSON.
    pub fn json_ok(value: &JsonValue) -> Self {
        Self::new(200, "OK", value.to_string())
    }

    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Parse the body as JSON. An empty body (e.g. 204) parses as `null`.
    pub fn json(&self) -> FetchResult<JsonValue> {
        if self.body.iter().all(u8::is_ascii_whitespace) {
            return Ok(JsonValue::Null);
        }
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Turn the response into the value handed to callers.
    ///
    /// Non-2xx is an error carrying status code and status text.
    pub fn into_result(self) -> FetchResult<JsonValue> {
        if !self.ok() {
            return Err(FetchError::Status {
                status: self.status,
                status_text: self.status_text,
            });
        }
        self.json()
    }
}
