//! Trigger-word lookup and caching for adapters.
//!
//! Resolution is layered: the renderer-side plugin first, then the remote
//! service by file hash, then by name search (raw stem, then normalised
//! stem). Outcomes are three-valued: a found list and a definitive empty
//! are cached for 24 hours; a transient failure is surfaced as an empty
//! list for the current interaction but never cached, so the next lookup
//! retries.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::api::RendererApi;
use crate::civitai::{CivitaiClient, RemoteLookup};

/// How long positive results (including definitive empties) stay cached.
pub const CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Outcome of one resolution attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Trigger words were found.
    Found(Vec<String>),
    /// Every layer agreed there are none. Cacheable.
    DefinitelyEmpty,
    /// At least one layer failed transiently and none succeeded. Not
    /// cacheable.
    Transient,
}

/// Where trigger words come from. The production source chains the
/// renderer plugin and the remote service; tests script their own.
#[async_trait]
pub trait TriggerSource: Send + Sync {
    async fn resolve(&self, filename: &str) -> Resolution;
}

/// The production lookup chain.
pub struct ChainedSource {
    renderer: Arc<RendererApi>,
    civitai: CivitaiClient,
}

impl ChainedSource {
    pub fn new(renderer: Arc<RendererApi>, civitai: CivitaiClient) -> Self {
        Self { renderer, civitai }
    }
}

#[async_trait]
impl TriggerSource for ChainedSource {
    async fn resolve(&self, filename: &str) -> Resolution {
        // 1. Renderer-side plugin. Only a non-empty answer is conclusive;
        //    an empty list or a missing plugin falls through.
        if let Some(words) = self.renderer.adapter_trigger_words_local(stem(filename)).await {
            if !words.is_empty() {
                return Resolution::Found(words);
            }
        }

        // 2. Remote lookup by embedded hash. A 404 here is the service
        //    saying it has never indexed this file: definitive.
        let mut transient_seen = false;
        if let Some(hash) = self.renderer.adapter_metadata(filename).await {
            match self.civitai.trigger_words_by_hash(&hash).await {
                RemoteLookup::Found(words) if !words.is_empty() => {
                    return Resolution::Found(words);
                }
                RemoteLookup::Found(_) => return Resolution::DefinitelyEmpty,
                RemoteLookup::NotIndexed => return Resolution::DefinitelyEmpty,
                RemoteLookup::Transient => transient_seen = true,
            }
        }

        // 3. Name search: the raw stem, then a normalised form with the
        //    version suffix stripped and separators spaced.
        let raw = stem(filename).to_string();
        let queries = [raw.clone(), normalise_stem(&raw)];
        for query in queries.iter().filter(|q| !q.is_empty()) {
            match self.civitai.trigger_words_by_search(query).await {
                RemoteLookup::Found(words) if !words.is_empty() => {
                    return Resolution::Found(words);
                }
                RemoteLookup::Found(_) | RemoteLookup::NotIndexed => {}
                RemoteLookup::Transient => transient_seen = true,
            }
        }

        if transient_seen {
            Resolution::Transient
        } else {
            Resolution::DefinitelyEmpty
        }
    }
}

struct CacheEntry {
    words: Vec<String>,
    cached_at: Instant,
}

/// 24-hour positive cache over a [`TriggerSource`].
pub struct TriggerWordCache<S = ChainedSource> {
    source: S,
    cache: Mutex<HashMap<String, CacheEntry>>,
}

impl TriggerWordCache<ChainedSource> {
    pub fn new(renderer: Arc<RendererApi>, civitai: CivitaiClient) -> Self {
        Self::with_source(ChainedSource::new(renderer, civitai))
    }
}

impl<S: TriggerSource> TriggerWordCache<S> {
    pub fn with_source(source: S) -> Self {
        Self {
            source,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Trigger words for an adapter file. Transient failures read as an
    /// empty list but leave no cache entry behind.
    pub async fn lookup(&self, filename: &str) -> Vec<String> {
        {
            let cache = self.cache.lock().await;
            if let Some(entry) = cache.get(filename) {
                if entry.cached_at.elapsed() < CACHE_TTL {
                    return entry.words.clone();
                }
            }
        }

        match self.source.resolve(filename).await {
            Resolution::Found(words) => {
                self.store(filename, words.clone()).await;
                words
            }
            Resolution::DefinitelyEmpty => {
                self.store(filename, Vec::new()).await;
                Vec::new()
            }
            Resolution::Transient => {
                tracing::debug!(filename, "Trigger-word lookup failed transiently");
                Vec::new()
            }
        }
    }

    async fn store(&self, filename: &str, words: Vec<String>) {
        let mut cache = self.cache.lock().await;
        cache.insert(
            filename.to_string(),
            CacheEntry {
                words,
                cached_at: Instant::now(),
            },
        );
    }

    /// Number of cached entries (expired or not).
    pub async fn len(&self) -> usize {
        self.cache.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.cache.lock().await.is_empty()
    }
}

/// Object-safe lookup view of the cache, for callers that do not care
/// which [`TriggerSource`] backs it.
#[async_trait]
pub trait TriggerLookup: Send + Sync {
    async fn lookup(&self, filename: &str) -> Vec<String>;
}

#[async_trait]
impl<S: TriggerSource> TriggerLookup for TriggerWordCache<S> {
    async fn lookup(&self, filename: &str) -> Vec<String> {
        TriggerWordCache::lookup(self, filename).await
    }
}

// ---------------------------------------------------------------------------
// Name helpers
// ---------------------------------------------------------------------------

/// Filename without its final extension.
pub fn stem(filename: &str) -> &str {
    filename.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(filename)
}

/// Normalise a stem for searching: drop a trailing version suffix and
/// replace separator characters with spaces.
pub fn normalise_stem(stem: &str) -> String {
    static VERSION_SUFFIX: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    let re = VERSION_SUFFIX.get_or_init(|| {
        regex::Regex::new(r"(?i)[\s._-]*v?\d+(?:\.\d+)*$").expect("static pattern compiles")
    });
    let without_version = re.replace(stem, "");
    let spaced: String = without_version
        .chars()
        .map(|c| if matches!(c, '_' | '-' | '.') { ' ' } else { c })
        .collect();
    spaced.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Flatten a word list whose entries may themselves be comma-joined.
pub(crate) fn split_joined_words(raw: &[String]) -> Vec<String> {
    raw.iter()
        .flat_map(|entry| entry.split(','))
        .map(str::trim)
        .filter(|word| !word.is_empty())
        .map(str::to_string)
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
