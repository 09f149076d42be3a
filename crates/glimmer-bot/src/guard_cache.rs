//! Cached view of the banned-word list.
//!
//! The table is small but consulted on every submission; a 30-second TTL
//! keeps reads off the database without letting moderation lag. Any
//! add/remove invalidates immediately.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use glimmer_core::guard::{find_matches, BannedEntry};
use glimmer_db::repositories::BannedWordRepo;
use glimmer_db::DbPool;

/// How long a fetched list stays fresh.
pub const GUARD_CACHE_TTL: Duration = Duration::from_secs(30);

struct CachedList {
    entries: Vec<BannedEntry>,
    fetched_at: Instant,
}

/// TTL-cached banned-word list with invalidate-on-write.
pub struct BannedListCache {
    pool: DbPool,
    inner: Mutex<Option<CachedList>>,
}

impl BannedListCache {
    pub fn new(pool: DbPool) -> Self {
        Self {
            pool,
            inner: Mutex::new(None),
        }
    }

    /// Banned entries that match `text`. A database failure logs and
    /// matches nothing rather than blocking submissions.
    pub async fn check(&self, text: &str) -> Vec<BannedEntry> {
        let entries = self.entries().await;
        find_matches(&entries, text).into_iter().cloned().collect()
    }

    /// The current list, served from cache while fresh.
    pub async fn entries(&self) -> Vec<BannedEntry> {
        let mut inner = self.inner.lock().await;
        if let Some(cached) = inner.as_ref() {
            if cached.fetched_at.elapsed() < GUARD_CACHE_TTL {
                return cached.entries.clone();
            }
        }

        match BannedWordRepo::list(&self.pool).await {
            Ok(words) => {
                let entries: Vec<BannedEntry> = words.iter().map(|w| w.to_entry()).collect();
                *inner = Some(CachedList {
                    entries: entries.clone(),
                    fetched_at: Instant::now(),
                });
                entries
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to load banned words; matching nothing");
                inner.take().map(|c| c.entries).unwrap_or_default()
            }
        }
    }

    /// Drop the cached list; the next check re-reads the table.
    pub async fn invalidate(&self) {
        self.inner.lock().await.take();
    }
}
