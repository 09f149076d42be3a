//! Periodic retention purge.
//!
//! First run 60 seconds after boot, then every configured interval. The
//! store's purge is a single transaction, so a crash mid-tick leaves the
//! database consistent and the next tick simply retries.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use glimmer_core::types::now_ms;
use glimmer_db::repositories::PurgeRepo;
use glimmer_db::DbPool;

/// Delay before the first purge after boot.
const FIRST_RUN_DELAY: Duration = Duration::from_secs(60);

const HOUR_MS: i64 = 3_600_000;

/// Scheduler state. Cheap to construct; `run` is the long-lived task.
pub struct PurgeScheduler {
    pool: DbPool,
    interval: Duration,
    max_age_hours: u64,
    running: AtomicBool,
}

impl PurgeScheduler {
    pub fn new(pool: DbPool, interval_hours: u64, max_age_hours: u64) -> Self {
        Self {
            pool,
            interval: Duration::from_secs(interval_hours * 3600),
            max_age_hours,
            running: AtomicBool::new(false),
        }
    }

    /// Run until cancelled: first tick after 60 s, then on the interval.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            max_age_hours = self.max_age_hours,
            "Purge scheduler started",
        );

        let start = tokio::time::Instant::now() + FIRST_RUN_DELAY;
        let mut ticker = tokio::time::interval_at(start, self.interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Purge scheduler stopping");
                    return;
                }
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }
    }

    /// One purge pass. Overlapping ticks are dropped.
    pub async fn tick(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::debug!("Purge tick skipped; previous run still in progress");
            return;
        }

        let cutoff = now_ms() - self.max_age_hours as i64 * HOUR_MS;
        match PurgeRepo::purge_old(&self.pool, cutoff).await {
            Ok((jobs_deleted, upscale_deleted)) => {
                tracing::info!(jobs_deleted, upscale_deleted, "Purge completed");
            }
            Err(e) => {
                tracing::error!(error = %e, "Purge failed");
            }
        }

        self.running.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glimmer_core::params::{GenerationRequest, SizePreset};
    use glimmer_db::models::NewJob;
    use glimmer_db::repositories::JobRepo;
    use uuid::Uuid;

    async fn seeded_pool() -> DbPool {
        let pool = glimmer_db::open_memory().await.unwrap();
        let request = GenerationRequest {
            model: "m.safetensors".to_string(),
            sampler: "euler".to_string(),
            scheduler: "normal".to_string(),
            steps: 20,
            cfg: 7.0,
            seed: 1,
            size: SizePreset::Square,
            positive_prompt: "a cat".to_string(),
            negative_prompt: String::new(),
            adapters: Vec::new(),
        };
        let new = NewJob::from_request(Uuid::new_v4(), "u", "s", "c", &request);
        let job = JobRepo::insert(&pool, &new).await.unwrap();
        JobRepo::mark_running(&pool, job.id, "p").await.unwrap();
        JobRepo::mark_completed(&pool, job.id, &[]).await.unwrap();
        sqlx::query("UPDATE jobs SET created_at = 0 WHERE id = ?")
            .bind(job.id)
            .execute(&pool)
            .await
            .unwrap();
        pool
    }

    #[tokio::test]
    async fn tick_purges_aged_rows() {
        let pool = seeded_pool().await;
        let scheduler = PurgeScheduler::new(pool.clone(), 6, 48);
        scheduler.tick().await;

        let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(remaining, 0);
    }

    #[tokio::test]
    async fn overlapping_tick_is_dropped() {
        let pool = seeded_pool().await;
        let scheduler = PurgeScheduler::new(pool.clone(), 6, 48);

        // Simulate an in-flight run; the tick must bail out without
        // touching the table.
        scheduler.running.store(true, Ordering::SeqCst);
        scheduler.tick().await;

        let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(remaining, 1);
        // The suppressed tick must not clear the foreign flag.
        assert!(scheduler.running.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn run_fires_first_purge_after_initial_delay() {
        let pool = seeded_pool().await;
        let scheduler = std::sync::Arc::new(PurgeScheduler::new(pool.clone(), 6, 48));
        let cancel = CancellationToken::new();

        let task = {
            let scheduler = scheduler.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { scheduler.run(cancel).await })
        };

        // Cross the first-run delay, then wait for the tick's database
        // work to land.
        tokio::time::advance(FIRST_RUN_DELAY + Duration::from_secs(1)).await;
        let mut remaining: i64 = 1;
        for _ in 0..200 {
            remaining = sqlx::query_scalar("SELECT COUNT(*) FROM jobs")
                .fetch_one(&pool)
                .await
                .unwrap();
            if remaining == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(remaining, 0);

        cancel.cancel();
        let _ = task.await;
    }
}
