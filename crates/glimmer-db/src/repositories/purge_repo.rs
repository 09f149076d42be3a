//! Transactional retention purge.

use glimmer_core::types::TimestampMs;

use crate::models::job::JobStatus;
use crate::DbPool;

/// Deletion of aged terminal rows across both job tables.
pub struct PurgeRepo;

impl PurgeRepo {
    /// Delete terminal (`completed` / `failed`) rows older than `cutoff_ms`
    /// in a single transaction: eligible upscale rows first, then job rows.
    ///
    /// A job row is kept, even when eligible, while any surviving upscale
    /// row still references it; foreign-key enforcement would reject the
    /// delete otherwise. Returns `(jobs_deleted, upscale_deleted)`.
    /// Running the same purge twice deletes nothing the second time.
    pub async fn purge_old(
        pool: &DbPool,
        cutoff_ms: TimestampMs,
    ) -> Result<(u64, u64), sqlx::Error> {
        let mut tx = pool.begin().await?;

        let upscale_deleted = sqlx::query(
            "DELETE FROM upscale_jobs \
             WHERE status IN (?, ?) AND created_at < ?",
        )
        .bind(JobStatus::Completed)
        .bind(JobStatus::Failed)
        .bind(cutoff_ms)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let jobs_deleted = sqlx::query(
            "DELETE FROM jobs \
             WHERE status IN (?, ?) AND created_at < ? \
               AND id NOT IN (SELECT source_job_id FROM upscale_jobs)",
        )
        .bind(JobStatus::Completed)
        .bind(JobStatus::Failed)
        .bind(cutoff_ms)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;
        Ok((jobs_deleted, upscale_deleted))
    }
}
