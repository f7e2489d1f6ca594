//! The HTTP-connector service task's network-I/O seam. Resolving variables
//! into a request is the engine's job (`crate::executors::http_connector`);
//! actually sending it is delegated to this collaborator so the engine
//! itself never depends on a concrete HTTP stack.

use crate::executors::HttpRequestConfig;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;

/// A completed HTTP response, shaped the way it is written back into
/// process variables under the `response` key (spec §4.2).
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
    pub headers: BTreeMap<String, String>,
}

#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn send(&self, request: &HttpRequestConfig) -> Result<HttpResponse>;
}

/// A loopback client for tests and the demo binary: echoes the request back
/// as the response body instead of making a real network call.
#[derive(Default)]
pub struct LoopbackHttpClient;

#[async_trait]
impl HttpClient for LoopbackHttpClient {
    async fn send(&self, request: &HttpRequestConfig) -> Result<HttpResponse> {
        Ok(HttpResponse {
            status: 200,
            body: request.body.clone().unwrap_or_default(),
            headers: request.headers.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn loopback_echoes_body() {
        let client = LoopbackHttpClient;
        let req = HttpRequestConfig {
            method: "POST".into(),
            url: "https://example.test".into(),
            headers: BTreeMap::new(),
            query: BTreeMap::new(),
            body: Some("hello".into()),
            auth: None,
            connect_timeout_ms: None,
            read_timeout_ms: None,
        };
        let resp = client.send(&req).await.unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body, "hello");
    }
}
