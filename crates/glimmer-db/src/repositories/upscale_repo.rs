//! Repository for the `upscale_jobs` table.

use sqlx::types::Json;

use glimmer_core::types::{now_ms, JobId};

use crate::models::job::JobStatus;
use crate::models::upscale::{NewUpscaleJob, UpscaleJob};
use crate::DbPool;

const COLUMNS: &str = "\
    id, source_job_id, requester_id, origin_scope_id, origin_channel_id, status, \
    source_image_filename, upscale_model, positive_prompt, negative_prompt, \
    backend_prompt_id, output_images, error_message, \
    created_at, started_at, completed_at";

/// CRUD and lifecycle operations for upscale jobs.
pub struct UpscaleJobRepo;

impl UpscaleJobRepo {
    /// Insert a new upscale job with `status = queued`.
    pub async fn insert(pool: &DbPool, new: &NewUpscaleJob) -> Result<UpscaleJob, sqlx::Error> {
        let query = format!(
            "INSERT INTO upscale_jobs \
                 (id, source_job_id, requester_id, origin_scope_id, origin_channel_id, \
                  status, source_image_filename, upscale_model, \
                  positive_prompt, negative_prompt, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, UpscaleJob>(&query)
            .bind(new.id)
            .bind(new.source_job_id)
            .bind(&new.requester_id)
            .bind(&new.origin_scope_id)
            .bind(&new.origin_channel_id)
            .bind(JobStatus::Queued)
            .bind(&new.source_image_filename)
            .bind(&new.upscale_model)
            .bind(&new.positive_prompt)
            .bind(&new.negative_prompt)
            .bind(now_ms())
            .fetch_one(pool)
            .await
    }

    pub async fn find_by_id(pool: &DbPool, id: JobId) -> Result<Option<UpscaleJob>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM upscale_jobs WHERE id = ?");
        sqlx::query_as::<_, UpscaleJob>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn mark_running(
        pool: &DbPool,
        id: JobId,
        backend_prompt_id: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE upscale_jobs SET status = ?, backend_prompt_id = ?, started_at = ? WHERE id = ?",
        )
        .bind(JobStatus::Running)
        .bind(backend_prompt_id)
        .bind(now_ms())
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn mark_completed(
        pool: &DbPool,
        id: JobId,
        filenames: &[String],
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE upscale_jobs SET status = ?, output_images = ?, completed_at = ? WHERE id = ?",
        )
        .bind(JobStatus::Completed)
        .bind(Json(filenames))
        .bind(now_ms())
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn mark_failed(pool: &DbPool, id: JobId, message: &str) -> Result<(), sqlx::Error> {
        let now = now_ms();
        sqlx::query(
            "UPDATE upscale_jobs SET status = ?, error_message = ?, \
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

    /// All queued upscale jobs in submission order, for the boot recovery
    /// sweep.
    pub async fn list_queued(pool: &DbPool) -> Result<Vec<UpscaleJob>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM upscale_jobs WHERE status = ? ORDER BY created_at ASC"
        );
        sqlx::query_as::<_, UpscaleJob>(&query)
            .bind(JobStatus::Queued)
            .fetch_all(pool)
            .await
    }
}
