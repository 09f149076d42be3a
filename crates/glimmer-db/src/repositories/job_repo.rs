//! Repository for the `jobs` table.
//!
//! Status transitions always stamp the matching timestamp in the same
//! statement, keeping the row invariants (`started_at` set iff the job
//! left `queued`, `completed_at` set iff terminal) true at every commit.

use sqlx::types::Json;

use glimmer_core::types::{now_ms, JobId};

use crate::models::job::{Job, JobStatus, NewJob};
use crate::DbPool;

/// Column list for `jobs` queries.
const COLUMNS: &str = "\
    id, requester_id, origin_scope_id, origin_channel_id, status, \
    model, sampler, scheduler, steps, cfg, seed, size, \
    positive_prompt, negative_prompt, adapters, \
    backend_prompt_id, output_images, error_message, \
    created_at, started_at, completed_at";

/// CRUD and lifecycle operations for generation jobs.
pub struct JobRepo;

impl JobRepo {
    /// Insert a new job with `status = queued` and `created_at = now`.
    pub async fn insert(pool: &DbPool, new: &NewJob) -> Result<Job, sqlx::Error> {
        let query = format!(
            "INSERT INTO jobs \
                 (id, requester_id, origin_scope_id, origin_channel_id, status, \
                  model, sampler, scheduler, steps, cfg, seed, size, \
                  positive_prompt, negative_prompt, adapters, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(new.id)
            .bind(&new.requester_id)
            .bind(&new.origin_scope_id)
            .bind(&new.origin_channel_id)
            .bind(JobStatus::Queued)
            .bind(&new.model)
            .bind(&new.sampler)
            .bind(&new.scheduler)
            .bind(new.steps)
            .bind(new.cfg)
            .bind(new.seed)
            .bind(&new.size)
            .bind(&new.positive_prompt)
            .bind(&new.negative_prompt)
            .bind(Json(&new.adapters))
            .bind(now_ms())
            .fetch_one(pool)
            .await
    }

    /// Find a job by id.
    pub async fn find_by_id(pool: &DbPool, id: JobId) -> Result<Option<Job>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE id = ?");
        sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Fetch a job by id, failing with `RowNotFound` if absent.
    pub async fn get(pool: &DbPool, id: JobId) -> Result<Job, sqlx::Error> {
        Self::find_by_id(pool, id)
            .await?
            .ok_or(sqlx::Error::RowNotFound)
    }

    /// Transition to `running`, recording the backend prompt id and
    /// stamping `started_at`.
    pub async fn mark_running(
        pool: &DbPool,
        id: JobId,
        backend_prompt_id: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE jobs SET status = ?, backend_prompt_id = ?, started_at = ? WHERE id = ?",
        )
        .bind(JobStatus::Running)
        .bind(backend_prompt_id)
        .bind(now_ms())
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Transition to `completed` with the collected output filenames.
    pub async fn mark_completed(
        pool: &DbPool,
        id: JobId,
        filenames: &[String],
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE jobs SET status = ?, output_images = ?, completed_at = ? WHERE id = ?")
            .bind(JobStatus::Completed)
            .bind(Json(filenames))
            .bind(now_ms())
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Transition to `failed` with a reason. Jobs can fail before ever
    /// running (bind errors), so `started_at` is backfilled when unset to
    /// keep the timestamp invariant.
    pub async fn mark_failed(pool: &DbPool, id: JobId, message: &str) -> Result<(), sqlx::Error> {
        let now = now_ms();
        sqlx::query(
            "UPDATE jobs SET status = ?, error_message = ?, \
                 started_at = COALESCE(started_at, ?), completed_at = ? \
             WHERE id = ?",
        )
        .bind(JobStatus::Failed)
        .bind(message)
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Count all queued jobs.
    pub async fn count_queued(pool: &DbPool) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE status = ?")
            .bind(JobStatus::Queued)
            .fetch_one(pool)
            .await
    }

    /// Count queued jobs created strictly before the given job. Used to
    /// show a requester their queue position.
    pub async fn count_queued_before(pool: &DbPool, id: JobId) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM jobs \
             WHERE status = ? \
               AND created_at < (SELECT created_at FROM jobs WHERE id = ?)",
        )
        .bind(JobStatus::Queued)
        .bind(id)
        .fetch_one(pool)
        .await
    }

    /// All queued jobs in submission order. The boot recovery sweep feeds
    /// these back into the in-memory queue.
    pub async fn list_queued(pool: &DbPool) -> Result<Vec<Job>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM jobs WHERE status = ? ORDER BY created_at ASC"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(JobStatus::Queued)
            .fetch_all(pool)
            .await
    }
}
