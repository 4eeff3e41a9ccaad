use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use reqwest::header::{CONTENT_LENGTH, RANGE};

use crate::diagnostics::Diagnostics;
use crate::event_logger::LogEvent;
use crate::spec_types::{DownloadedSpecs, IDListMetadata};

/// Raw result of a byte-range ID-list fetch. The `content_length` field is
/// the response header value, which is what the sync cursor advances by —
/// not the parsed byte count.
#[derive(Debug, Clone)]
pub struct ChunkResponse {
    pub status: u16,
    pub content_length: Option<i64>,
    pub sdk_region: Option<String>,
    pub body: String,
}

impl ChunkResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Everything the sync machinery needs from the wire. Retry and backoff live
/// behind this seam, not in front of it.
#[async_trait]
pub trait SpecTransport: Send + Sync {
    /// Fetch the spec payload. `Ok(None)` means the server had nothing for
    /// us (no body); transport-level failures are `Err`.
    async fn fetch_config_specs(&self, since_time: i64) -> Result<Option<DownloadedSpecs>, String>;

    /// Fetch the server's view of every ID list.
    async fn fetch_id_list_manifest(
        &self,
    ) -> Result<Option<HashMap<String, IDListMetadata>>, String>;

    /// Byte-range fetch of one ID list's append-only log, starting at
    /// `from_byte`.
    async fn fetch_id_list_chunk(&self, url: &str, from_byte: i64)
        -> Result<ChunkResponse, String>;

    /// Deliver a batch of outbound events, best-effort.
    async fn post_events(&self, events: &[LogEvent]) -> Result<(), String>;

    /// Release transport resources. Called once, after event delivery has
    /// been drained.
    async fn shutdown(&self) {}
}

const REGION_HEADER: &str = "x-flagsync-region";

/// reqwest-backed transport talking to the flagsync API with bearer auth.
pub struct HttpTransport {
    client: reqwest::Client,
    api_url: String,
    sdk_key: String,
    diagnostics: OnceLock<Arc<Diagnostics>>,
}

impl HttpTransport {
    pub fn new(api_url: &str, sdk_key: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: api_url.trim_end_matches('/').to_string(),
            sdk_key: sdk_key.to_string(),
            diagnostics: OnceLock::new(),
        }
    }

    /// Wire up marker recording for requests against the main API. Set once
    /// during client construction; requests made before this are simply not
    /// instrumented.
    pub fn attach_diagnostics(&self, diagnostics: Arc<Diagnostics>) {
        let _ = self.diagnostics.set(diagnostics);
    }

    async fn get_api(&self, url: &str) -> Result<reqwest::Response, String> {
        let key = Diagnostics::key_from_url(url);
        if let Some(diagnostics) = self.diagnostics.get() {
            diagnostics.start_network_request_diagnostics(key);
        }
        let result = self.client.get(url).bearer_auth(&self.sdk_key).send().await;
        match result {
            Ok(response) => {
                if let Some(diagnostics) = self.diagnostics.get() {
                    diagnostics.end_network_request_diagnostics(
                        key,
                        response.status().is_success(),
                        Some(response.status().as_u16()),
                        header_string(&response, REGION_HEADER),
                    );
                }
                Ok(response)
            }
            Err(e) => {
                if let Some(diagnostics) = self.diagnostics.get() {
                    diagnostics.end_network_request_diagnostics(key, false, None, None);
                }
                Err(format!("request to {} failed: {}", url, e))
            }
        }
    }
}

fn header_string(response: &reqwest::Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}

#[async_trait]
impl SpecTransport for HttpTransport {
    async fn fetch_config_specs(&self, since_time: i64) -> Result<Option<DownloadedSpecs>, String> {
        let url = format!(
            "{}/v1/download_config_specs?sinceTime={}",
            self.api_url, since_time
        );
        let response = self.get_api(&url).await?;
        let status = response.status();
        if status == reqwest::StatusCode::NO_CONTENT {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(format!("spec fetch returned {}", status));
        }
        let specs = response
            .json::<DownloadedSpecs>()
            .await
            .map_err(|e| format!("failed to decode spec payload: {}", e))?;
        Ok(Some(specs))
    }

    async fn fetch_id_list_manifest(
        &self,
    ) -> Result<Option<HashMap<String, IDListMetadata>>, String> {
        let url = format!("{}/v1/get_id_lists", self.api_url);
        let response = self.get_api(&url).await?;
        let status = response.status();
        if status == reqwest::StatusCode::NO_CONTENT {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(format!("id list manifest fetch returned {}", status));
        }
        let manifest = response
            .json::<HashMap<String, IDListMetadata>>()
            .await
            .map_err(|e| format!("failed to decode id list manifest: {}", e))?;
        Ok(Some(manifest))
    }

    async fn fetch_id_list_chunk(
        &self,
        url: &str,
        from_byte: i64,
    ) -> Result<ChunkResponse, String> {
        // List content is served from a CDN URL advertised in the manifest,
        // outside the authenticated API surface.
        let response = self
            .client
            .get(url)
            .header(RANGE, format!("bytes={}-", from_byte))
            .send()
            .await
            .map_err(|e| format!("id list fetch from {} failed: {}", url, e))?;
        let status = response.status().as_u16();
        let content_length = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<i64>().ok());
        let sdk_region = header_string(&response, REGION_HEADER);
        let body = response
            .text()
            .await
            .map_err(|e| format!("failed to read id list body: {}", e))?;
        Ok(ChunkResponse {
            status,
            content_length,
            sdk_region,
            body,
        })
    }

    async fn post_events(&self, events: &[LogEvent]) -> Result<(), String> {
        let url = format!("{}/v1/events", self.api_url);
        self.client
            .post(&url)
            .bearer_auth(&self.sdk_key)
            .json(&serde_json::json!({ "events": events }))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| format!("event delivery failed: {}", e))?;
        Ok(())
    }
}
