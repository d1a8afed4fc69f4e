use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use log::trace;

use super::{Transport, TransportResponse};
use crate::{
    config,
    core::{FetchOptions, FetchResult},
};

/// [`Transport`] backed by a pooled `reqwest` client.
pub struct HttpTransport {
    client: reqwest::Client,
    default_headers: HashMap<String, String>,
}

impl HttpTransport {
    pub fn new(cfg: &config::Transport) -> FetchResult<Self> {
        let mut builder = reqwest::Client::builder();
        if cfg.timeout == Some(0) {
            return Err(crate::config_error!("Transport timeout must be at least 1 ms"));
        }
        if let Some(timeout) = cfg.timeout {
            builder = builder.timeout(Duration::from_millis(timeout));
        }
        let client = builder
            .build()
            .map_err(|e| crate::config_error!("Unable to build http client: {e}"))?;

        Ok(Self {
            client,
            default_headers: cfg
                .headers
                .iter()
                .map(|(k, v)| (k.to_ascii_lowercase(), v.clone()))
                .collect(),
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request(&self, url: &str, options: &FetchOptions) -> FetchResult<TransportResponse> {
        let method = reqwest::Method::from_bytes(options.method.as_str().as_bytes())
            .map_err(|e| crate::internal_error!("Invalid method {}: {e}", options.method))?;

        let mut req = self.client.request(method, url);
        for (name, value) in &self.default_headers {
            if !options.headers.contains_key(name) {
                req = req.header(name.as_str(), value.as_str());
            }
        }
        for (name, value) in &options.headers {
            req = req.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &options.body {
            req = req.body(body.clone());
        }

        trace!("Sending {} {url}", options.method);
        let resp = req.send().await?;
        let status = resp.status();
        let status_text = status.canonical_reason().unwrap_or_default().to_string();
        let body = resp.bytes().await?;

        Ok(TransportResponse {
            status: status.as_u16(),
            status_text,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::FetchError;

    #[test]
    fn test_default_headers_are_lowercased() {
        let mut cfg = config::Transport::default();
        cfg.headers
            .insert("X-Client".to_string(), "pingfetch".to_string());
        let transport = HttpTransport::new(&cfg).unwrap();
        assert_eq!(
            Some("pingfetch"),
            transport.default_headers.get("x-client").map(String::as_str)
        );
    }

    #[test]
    fn test_zero_timeout_is_rejected() {
        let cfg = config::Transport {
            timeout: Some(0),
            ..Default::default()
        };
        assert!(matches!(
            HttpTransport::new(&cfg),
            Err(FetchError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_transport_error() {
        let cfg = config::Transport {
            timeout: Some(500),
            ..Default::default()
        };
        let transport = HttpTransport::new(&cfg).unwrap();
        let err = transport
            .request("http://127.0.0.1:1/unreachable", &FetchOptions::get())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Transport(_)));
    }
}
