//! Client for the remote adapter-metadata service.
//!
//! Lookups distinguish a definitive "not indexed" (404, or a search with
//! no usable results) from transient failures (rate limiting, network),
//! because the cache layer must only persist the former.

use std::time::Duration;

use serde::Deserialize;

use crate::triggers::split_joined_words;

/// Production base URL of the metadata service.
pub const DEFAULT_BASE_URL: &str = "https://civitai.com";

/// Timeout for every metadata request.
const LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Search result page size.
const SEARCH_LIMIT: u32 = 5;

/// Outcome of a remote lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteLookup {
    /// The service answered; these are the trained words (possibly none).
    Found(Vec<String>),
    /// The service definitively does not know this adapter.
    NotIndexed,
    /// Rate limited or unreachable; ask again later.
    Transient,
}

#[derive(Debug, Deserialize)]
struct ModelVersion {
    #[serde(rename = "trainedWords", default)]
    trained_words: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    #[serde(rename = "modelVersions", default)]
    model_versions: Vec<ModelVersion>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

/// HTTP client for the metadata service. An API key is optional; when
/// present it is sent as a bearer token.
pub struct CivitaiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl CivitaiClient {
    pub fn new(api_key: Option<String>) -> Self {
        Self::with_base_url(DEFAULT_BASE_URL, api_key)
    }

    pub fn with_base_url(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key,
        }
    }

    /// Look up a model version by its file hash.
    pub async fn trigger_words_by_hash(&self, hash: &str) -> RemoteLookup {
        let url = format!("{}/api/v1/model-versions/by-hash/{hash}", self.base_url);
        let response = match self.get(&url).send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!(error = %e, "Metadata by-hash lookup failed");
                return RemoteLookup::Transient;
            }
        };

        match response.status().as_u16() {
            404 => RemoteLookup::NotIndexed,
            429 => {
                tracing::warn!("Metadata service rate limited the by-hash lookup");
                RemoteLookup::Transient
            }
            status if status < 200 || status >= 300 => {
                tracing::debug!(status, "Metadata by-hash lookup returned an error status");
                RemoteLookup::Transient
            }
            _ => match response.json::<ModelVersion>().await {
                Ok(version) => RemoteLookup::Found(split_joined_words(&version.trained_words)),
                Err(e) => {
                    tracing::debug!(error = %e, "Metadata by-hash response failed to parse");
                    RemoteLookup::Transient
                }
            },
        }
    }

    /// Free-text search fallback. Returns the first version with trained
    /// words among the top results.
    pub async fn trigger_words_by_search(&self, query: &str) -> RemoteLookup {
        let url = format!("{}/api/v1/models", self.base_url);
        let limit = SEARCH_LIMIT.to_string();
        let response = match self
            .get(&url)
            .query(&[
                ("query", query),
                ("types", "LORA"),
                ("limit", limit.as_str()),
            ])
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!(error = %e, "Metadata search failed");
                return RemoteLookup::Transient;
            }
        };

        match response.status().as_u16() {
            429 => RemoteLookup::Transient,
            status if status < 200 || status >= 300 => RemoteLookup::Transient,
            _ => match response.json::<SearchResponse>().await {
                Ok(body) => {
                    let words = body
                        .items
                        .iter()
                        .flat_map(|item| item.model_versions.iter())
                        .map(|version| split_joined_words(&version.trained_words))
                        .find(|words| !words.is_empty());
                    match words {
                        Some(words) => RemoteLookup::Found(words),
                        None => RemoteLookup::NotIndexed,
                    }
                }
                Err(e) => {
                    tracing::debug!(error = %e, "Metadata search response failed to parse");
                    RemoteLookup::Transient
                }
            },
        }
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        let mut builder = self.client.get(url).timeout(LOOKUP_TIMEOUT);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        builder
    }
}
