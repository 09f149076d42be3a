//! Upscale-job entity and DTO.

use serde::Serialize;
use sqlx::types::Json;
use sqlx::FromRow;

use glimmer_core::types::{JobId, TimestampMs};

use super::job::JobStatus;

/// A row from the `upscale_jobs` table. Same lifecycle as a job, minus
/// the sampling parameters, plus the source image reference.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct UpscaleJob {
    pub id: JobId,
    pub source_job_id: JobId,
    pub requester_id: String,
    pub origin_scope_id: String,
    pub origin_channel_id: String,
    pub status: JobStatus,
    pub source_image_filename: String,
    pub upscale_model: String,
    pub positive_prompt: String,
    pub negative_prompt: String,
    pub backend_prompt_id: Option<String>,
    pub output_images: Option<Json<Vec<String>>>,
    pub error_message: Option<String>,
    pub created_at: TimestampMs,
    pub started_at: Option<TimestampMs>,
    pub completed_at: Option<TimestampMs>,
}

impl UpscaleJob {
    pub fn output_filenames(&self) -> &[String] {
        self.output_images.as_ref().map(|j| j.0.as_slice()).unwrap_or(&[])
    }
}

/// DTO for inserting a new upscale job.
#[derive(Debug, Clone)]
pub struct NewUpscaleJob {
    pub id: JobId,
    pub source_job_id: JobId,
    pub requester_id: String,
    pub origin_scope_id: String,
    pub origin_channel_id: String,
    pub source_image_filename: String,
    pub upscale_model: String,
    pub positive_prompt: String,
    pub negative_prompt: String,
}
