use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client as HttpClient;
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends one JSON document and hands back whatever the server answered.
///
/// Non-success statuses are returned, not raised; `Err` means the exchange
/// itself failed (DNS, TLS, timeout, unreadable body).
pub trait EditTransport: Send + Sync {
    fn post_json(&self, endpoint: &str, api_key: &str, payload: &Value)
        -> Result<TransportResponse>;
}

impl<T: EditTransport + ?Sized> EditTransport for Arc<T> {
    fn post_json(
        &self,
        endpoint: &str,
        api_key: &str,
        payload: &Value,
    ) -> Result<TransportResponse> {
        (**self).post_json(endpoint, api_key, payload)
    }
}

pub struct HttpTransport {
    http: HttpClient,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Self {
        Self {
            http: HttpClient::new(),
            timeout,
        }
    }
}

impl EditTransport for HttpTransport {
    fn post_json(
        &self,
        endpoint: &str,
        api_key: &str,
        payload: &Value,
    ) -> Result<TransportResponse> {
        let response = self
            .http
            .post(endpoint)
            .query(&[("key", api_key)])
            .header(CONTENT_TYPE, "application/json")
            .timeout(self.timeout)
            .json(payload)
            .send()
            .with_context(|| format!("request to {endpoint} failed"))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .with_context(|| format!("reading response body from {endpoint} failed"))?;
        Ok(TransportResponse { status, body })
    }
}
