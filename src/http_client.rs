//! HTTP Client: thin `reqwest` wrapper recording full request/response
//! detail and a timing split.

use crate::error::CoreError;
use crate::model::Request;
use crate::result::{RequestInfo, ResponseInfo};
use chrono::Utc;
use std::collections::HashMap;
use std::time::Instant;
use tracing::instrument;

#[derive(Clone)]
pub struct HttpClient {
    client: reqwest::Client,
}

impl HttpClient {
    pub fn new(timeout: std::time::Duration) -> Result<Self, CoreError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CoreError::Configuration(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn resolve_url(&self, base_url: Option<&str>, url: &str) -> Result<reqwest::Url, CoreError> {
        if let Ok(absolute) = reqwest::Url::parse(url) {
            return Ok(absolute);
        }
        let base = base_url.ok_or_else(|| {
            CoreError::Request(format!("relative URL '{url}' but no base_url configured"))
        })?;
        let base = reqwest::Url::parse(base)
            .map_err(|e| CoreError::Request(format!("invalid base_url '{base}': {e}")))?;
        base.join(url)
            .map_err(|e| CoreError::Request(format!("failed to join URL '{url}': {e}")))
    }

    /// Issue the request and fully buffer the response, recording
    /// timing split into time-to-first-byte / content-download / total.
    #[instrument(skip(self, request), fields(method = ?request.method, url = %request.url))]
    pub async fn send(
        &self,
        request: &Request,
        base_url: Option<&str>,
    ) -> Result<(RequestInfo, ResponseInfo), CoreError> {
        let url = self.resolve_url(base_url, &request.url)?;
        let mut url = url;
        {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in &request.query {
                pairs.append_pair(k, v);
            }
        }

        let mut builder = self.client.request(request.method.as_reqwest(), url.clone());
        for (key, value) in &request.headers {
            builder = builder.header(key, value);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let request_info = RequestInfo {
            method: format!("{:?}", request.method).to_uppercase(),
            url: url.to_string(),
            headers: request.headers.clone(),
            body: request.body.clone(),
        };

        let started_at = Utc::now();
        let start = Instant::now();

        let response = builder
            .send()
            .await
            .map_err(|e| CoreError::Request(format!("request to {url} failed: {e}")))?;

        let time_to_first_byte_ms = start.elapsed().as_millis() as u64;
        let status_code = response.status().as_u16();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or_default().to_string()))
            .collect();
        let content_type = headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("content-type"))
            .map(|(_, v)| v.clone())
            .unwrap_or_default();

        let bytes = response
            .bytes()
            .await
            .map_err(|e| CoreError::Request(format!("failed to read response body: {e}")))?;
        let total_ms = start.elapsed().as_millis() as u64;
        let content_download_ms = total_ms.saturating_sub(time_to_first_byte_ms);
        let completed_at = Utc::now();
        let size_bytes = bytes.len();

        let body = if content_type.contains("json") && !bytes.is_empty() {
            serde_json::from_slice(&bytes).ok()
        } else if !bytes.is_empty() {
            Some(serde_json::Value::String(
                String::from_utf8_lossy(&bytes).to_string(),
            ))
        } else {
            None
        };

        let response_info = ResponseInfo {
            status_code,
            headers,
            body,
            time_to_first_byte_ms,
            content_download_ms,
            total_ms,
            started_at,
            completed_at,
            size_bytes,
        };

        Ok((request_info, response_info))
    }
}
