//! REST client for the renderer's HTTP endpoints.
//!
//! Wraps workflow submission, history polling, image fetch/upload, node
//! introspection, and the optional adapter-metadata endpoints. The client
//! never retries; callers own the retry/deadline policy.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::triggers::split_joined_words;

/// Connect timeout for every request.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default whole-request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Tight timeout for the reachability probe.
const PING_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout for best-effort metadata lookups.
const METADATA_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors from the renderer client, classified for the caller.
#[derive(Debug, thiserror::Error)]
pub enum RendererError {
    /// Could not reach the renderer at all (connect, DNS, timeout).
    #[error("renderer unreachable: {0}")]
    Unreachable(String),

    /// The renderer answered with a non-2xx status.
    #[error("renderer API error ({status}): {body}")]
    Protocol { status: u16, body: String },

    /// The response arrived but did not have the expected shape.
    #[error("unexpected renderer response: {0}")]
    Shape(String),
}

impl RendererError {
    fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_decode() {
            RendererError::Shape(e.to_string())
        } else {
            RendererError::Unreachable(e.to_string())
        }
    }
}

/// Response from the submit endpoint.
#[derive(Debug, Deserialize)]
struct SubmitResponse {
    prompt_id: String,
}

/// Identity of an uploaded image on the renderer side. `name` may differ
/// from the requested filename and is what graph injection must use.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadedImage {
    pub name: String,
    #[serde(default)]
    pub subfolder: String,
    #[serde(rename = "type", default)]
    pub kind: String,
}

/// One image reference inside a history entry.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ImageRef {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    #[serde(rename = "type", default)]
    pub kind: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeOutput {
    #[serde(default)]
    pub images: Vec<ImageRef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryStatus {
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub status_str: String,
}

/// Execution record for one prompt, as served by `/history/{prompt_id}`.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryEntry {
    pub status: HistoryStatus,
    /// Outputs keyed by node id; BTreeMap keeps iteration deterministic.
    #[serde(default)]
    pub outputs: BTreeMap<String, NodeOutput>,
}

impl HistoryEntry {
    /// Every output filename, in node-id order.
    pub fn collect_filenames(&self) -> Vec<String> {
        self.outputs
            .values()
            .flat_map(|node| node.images.iter().map(|img| img.filename.clone()))
            .collect()
    }

    /// Locate the full reference (subfolder, type) for a filename.
    pub fn find_image(&self, filename: &str) -> Option<&ImageRef> {
        self.outputs
            .values()
            .flat_map(|node| node.images.iter())
            .find(|img| img.filename == filename)
    }
}

/// HTTP client for a single renderer instance.
pub struct RendererApi {
    client: reqwest::Client,
    base_url: String,
}

impl RendererApi {
    /// Create a client for the renderer at `base_url` (no trailing slash).
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("reqwest client construction cannot fail with static options");
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Reachability probe. Any transport failure reads as "down".
    pub async fn ping(&self) -> bool {
        let result = self
            .client
            .get(format!("{}/system_stats", self.base_url))
            .timeout(PING_TIMEOUT)
            .send()
            .await;
        match result {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!(error = %e, "Renderer ping failed");
                false
            }
        }
    }

    /// Node introspection document, fetched once at boot.
    pub async fn object_info(&self) -> Result<Value, RendererError> {
        let response = self
            .client
            .get(format!("{}/object_info", self.base_url))
            .send()
            .await
            .map_err(RendererError::from_reqwest)?;
        Self::parse_json(response).await
    }

    /// Submit a bound graph. Returns the backend prompt id.
    pub async fn submit(&self, graph: &Value) -> Result<String, RendererError> {
        let body = serde_json::json!({ "prompt": graph });
        let response = self
            .client
            .post(format!("{}/prompt", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(RendererError::from_reqwest)?;
        let parsed: SubmitResponse = Self::parse_json(response).await?;
        Ok(parsed.prompt_id)
    }

    /// Fetch the history entry for a prompt. `None` means "not ready":
    /// missing entries, 404s, and transport failures all read the same to
    /// the polling caller.
    pub async fn history(&self, prompt_id: &str) -> Option<HistoryEntry> {
        let response = self
            .client
            .get(format!("{}/history/{}", self.base_url, prompt_id))
            .send()
            .await;
        let response = match response {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                tracing::debug!(prompt_id, status = r.status().as_u16(), "History not ready");
                return None;
            }
            Err(e) => {
                tracing::debug!(prompt_id, error = %e, "History fetch failed");
                return None;
            }
        };

        let mut body: BTreeMap<String, HistoryEntry> = match response.json().await {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(prompt_id, error = %e, "History entry failed to parse");
                return None;
            }
        };
        body.remove(prompt_id)
    }

    /// Fetch raw image bytes from the renderer's file store.
    pub async fn fetch_image(
        &self,
        filename: &str,
        subfolder: &str,
        kind: &str,
    ) -> Result<Vec<u8>, RendererError> {
        let response = self
            .client
            .get(format!("{}/view", self.base_url))
            .query(&[("filename", filename), ("subfolder", subfolder), ("type", kind)])
            .send()
            .await
            .map_err(RendererError::from_reqwest)?;
        let response = Self::ensure_success(response).await?;
        let bytes = response.bytes().await.map_err(RendererError::from_reqwest)?;
        Ok(bytes.to_vec())
    }

    /// Upload image bytes into the renderer's input folder. The returned
    /// name is authoritative for subsequent graph injection.
    pub async fn upload_image(
        &self,
        bytes: Vec<u8>,
        filename: &str,
    ) -> Result<UploadedImage, RendererError> {
        let part = reqwest::multipart::Part::bytes(bytes).file_name(filename.to_string());
        let form = reqwest::multipart::Form::new()
            .part("image", part)
            .text("overwrite", "true");
        let response = self
            .client
            .post(format!("{}/upload/image", self.base_url))
            .multipart(form)
            .send()
            .await
            .map_err(RendererError::from_reqwest)?;
        Self::parse_json(response).await
    }

    /// Read the adapter file's embedded SHA-256 hash, if the renderer's
    /// metadata endpoint is present. Best-effort: every failure is `None`.
    pub async fn adapter_metadata(&self, filename: &str) -> Option<String> {
        let response = self
            .client
            .get(format!("{}/view_metadata/loras", self.base_url))
            .query(&[("filename", filename)])
            .timeout(METADATA_TIMEOUT)
            .send()
            .await
            .ok()?;
        if !response.status().is_success() {
            return None;
        }
        let body: Value = response.json().await.ok()?;
        extract_hash(&body)
    }

    /// Best-effort trigger-word query against an optional renderer-side
    /// plugin. `None` covers "plugin absent" and every failure mode.
    pub async fn adapter_trigger_words_local(&self, stem: &str) -> Option<Vec<String>> {
        let response = self
            .client
            .get(format!("{}/api/lm/loras/get-trigger-words", self.base_url))
            .query(&[("name", stem)])
            .timeout(METADATA_TIMEOUT)
            .send()
            .await
            .ok()?;
        if !response.status().is_success() {
            return None;
        }
        let body: Value = response.json().await.ok()?;
        if body.get("success").and_then(Value::as_bool) != Some(true) {
            return None;
        }
        let raw: Vec<String> = body
            .get("trigger_words")?
            .as_array()?
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect();
        Some(split_joined_words(&raw))
    }

    // ---- private helpers ----

    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, RendererError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(RendererError::Protocol {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn parse_json<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, RendererError> {
        let response = Self::ensure_success(response).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| RendererError::Shape(e.to_string()))
    }
}

/// The renderer operations the job pipeline depends on. Implemented by
/// [`RendererApi`]; test harnesses provide scripted implementations.
#[async_trait::async_trait]
pub trait RendererTransport: Send + Sync {
    async fn ping(&self) -> bool;
    async fn object_info(&self) -> Result<Value, RendererError>;
    async fn submit(&self, graph: &Value) -> Result<String, RendererError>;
    async fn history(&self, prompt_id: &str) -> Option<HistoryEntry>;
    async fn fetch_image(
        &self,
        filename: &str,
        subfolder: &str,
        kind: &str,
    ) -> Result<Vec<u8>, RendererError>;
    async fn upload_image(
        &self,
        bytes: Vec<u8>,
        filename: &str,
    ) -> Result<UploadedImage, RendererError>;
}

#[async_trait::async_trait]
impl RendererTransport for RendererApi {
    async fn ping(&self) -> bool {
        RendererApi::ping(self).await
    }

    async fn object_info(&self) -> Result<Value, RendererError> {
        RendererApi::object_info(self).await
    }

    async fn submit(&self, graph: &Value) -> Result<String, RendererError> {
        RendererApi::submit(self, graph).await
    }

    async fn history(&self, prompt_id: &str) -> Option<HistoryEntry> {
        RendererApi::history(self, prompt_id).await
    }

    async fn fetch_image(
        &self,
        filename: &str,
        subfolder: &str,
        kind: &str,
    ) -> Result<Vec<u8>, RendererError> {
        RendererApi::fetch_image(self, filename, subfolder, kind).await
    }

    async fn upload_image(
        &self,
        bytes: Vec<u8>,
        filename: &str,
    ) -> Result<UploadedImage, RendererError> {
        RendererApi::upload_image(self, bytes, filename).await
    }
}

/// Pull a SHA-256 hash out of a metadata document, checking the known key
/// spellings in order.
fn extract_hash(body: &Value) -> Option<String> {
    for key in ["sha256", "sshs_model_hash", "modelspec.hash.sha256"] {
        if let Some(hash) = body.get(key).and_then(Value::as_str) {
            let trimmed = hash.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(value: Value) -> HistoryEntry {
        serde_json::from_value(value).unwrap()
    }

    // -- History decoding --

    #[test]
    fn history_entry_decodes_full_shape() {
        let e = entry(json!({
            "status": { "completed": true, "status_str": "success" },
            "outputs": {
                "320": { "images": [
                    { "filename": "a.png", "subfolder": "sub", "type": "output" }
                ]}
            }
        }));
        assert!(e.status.completed);
        assert_eq!(e.status.status_str, "success");
        assert_eq!(e.collect_filenames(), vec!["a.png"]);
    }

    #[test]
    fn history_entry_tolerates_missing_outputs() {
        let e = entry(json!({ "status": { "completed": false } }));
        assert!(!e.status.completed);
        assert!(e.collect_filenames().is_empty());
    }

    #[test]
    fn filenames_collected_in_node_id_order() {
        let e = entry(json!({
            "status": { "completed": true },
            "outputs": {
                "9": { "images": [{ "filename": "late.png" }] },
                "10": { "images": [{ "filename": "a.png" }, { "filename": "b.png" }] }
            }
        }));
        // BTreeMap orders lexicographically: "10" before "9".
        assert_eq!(e.collect_filenames(), vec!["a.png", "b.png", "late.png"]);
    }

    #[test]
    fn find_image_returns_subfolder_and_kind() {
        let e = entry(json!({
            "status": { "completed": true },
            "outputs": {
                "320": { "images": [
                    { "filename": "a.png", "subfolder": "batch", "type": "output" }
                ]}
            }
        }));
        let image = e.find_image("a.png").unwrap();
        assert_eq!(image.subfolder, "batch");
        assert_eq!(image.kind, "output");
        assert!(e.find_image("missing.png").is_none());
    }

    // -- Hash extraction --

    #[test]
    fn hash_key_spellings_checked_in_order() {
        assert_eq!(
            extract_hash(&json!({ "sha256": "abc123" })).as_deref(),
            Some("abc123")
        );
        assert_eq!(
            extract_hash(&json!({ "sshs_model_hash": "def456" })).as_deref(),
            Some("def456")
        );
        assert_eq!(
            extract_hash(&json!({ "modelspec.hash.sha256": "aa55" })).as_deref(),
            Some("aa55")
        );
        assert_eq!(
            extract_hash(&json!({ "sha256": "first", "sshs_model_hash": "second" })).as_deref(),
            Some("first")
        );
    }

    #[test]
    fn empty_or_missing_hash_is_none() {
        assert!(extract_hash(&json!({})).is_none());
        assert!(extract_hash(&json!({ "sha256": "  " })).is_none());
        assert!(extract_hash(&json!({ "sha256": 42 })).is_none());
    }
}
