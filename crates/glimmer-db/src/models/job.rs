//! Job entity and DTOs.

use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;

use glimmer_core::params::{AdapterSelection, GenerationRequest, SizePreset};
use glimmer_core::types::{JobId, TimestampMs};

/// Job lifecycle states. `Cancelled` is representable but never written
/// by the runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Completed, failed, and cancelled rows are terminal.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The persisted form of an adapter slot. Trigger words are deliberately
/// absent: they exist only in memory for the lifetime of a submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredAdapter {
    pub name: String,
    pub strength: f64,
}

impl From<&AdapterSelection> for StoredAdapter {
    fn from(selection: &AdapterSelection) -> Self {
        Self {
            name: selection.name.clone(),
            strength: selection.strength,
        }
    }
}

/// A row from the `jobs` table.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct Job {
    pub id: JobId,
    pub requester_id: String,
    pub origin_scope_id: String,
    pub origin_channel_id: String,
    pub status: JobStatus,
    pub model: String,
    pub sampler: String,
    pub scheduler: String,
    pub steps: i64,
    pub cfg: f64,
    pub seed: i64,
    pub size: String,
    pub positive_prompt: String,
    pub negative_prompt: String,
    pub adapters: Json<Vec<StoredAdapter>>,
    pub backend_prompt_id: Option<String>,
    pub output_images: Option<Json<Vec<String>>>,
    pub error_message: Option<String>,
    pub created_at: TimestampMs,
    pub started_at: Option<TimestampMs>,
    pub completed_at: Option<TimestampMs>,
}

impl Job {
    pub fn size_preset(&self) -> SizePreset {
        SizePreset::from_str_lossy(&self.size)
    }

    /// Output filenames, empty when the job has not completed.
    pub fn output_filenames(&self) -> &[String] {
        self.output_images.as_ref().map(|j| j.0.as_slice()).unwrap_or(&[])
    }

    /// Rebuild a bindable request from this row.
    ///
    /// `trigger_words` is indexed parallel to the stored adapters and comes
    /// from the in-memory snapshot taken at submission; rows replayed
    /// without one (re-rolls, restarts) bind without trigger words.
    pub fn to_request(&self, trigger_words: Option<&[Vec<String>]>) -> GenerationRequest {
        let adapters = self
            .adapters
            .0
            .iter()
            .enumerate()
            .map(|(i, stored)| AdapterSelection {
                name: stored.name.clone(),
                strength: stored.strength,
                trigger_words: trigger_words
                    .and_then(|words| words.get(i).cloned())
                    .unwrap_or_default(),
            })
            .collect();
        GenerationRequest {
            model: self.model.clone(),
            sampler: self.sampler.clone(),
            scheduler: self.scheduler.clone(),
            steps: self.steps,
            cfg: self.cfg,
            seed: self.seed,
            size: self.size_preset(),
            positive_prompt: self.positive_prompt.clone(),
            negative_prompt: self.negative_prompt.clone(),
            adapters,
        }
    }
}

/// DTO for inserting a new job. Status and timestamps are stamped by the
/// repository.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub id: JobId,
    pub requester_id: String,
    pub origin_scope_id: String,
    pub origin_channel_id: String,
    pub model: String,
    pub sampler: String,
    pub scheduler: String,
    pub steps: i64,
    pub cfg: f64,
    pub seed: i64,
    pub size: String,
    pub positive_prompt: String,
    pub negative_prompt: String,
    pub adapters: Vec<StoredAdapter>,
}

impl NewJob {
    /// Build an insert DTO from a validated request.
    pub fn from_request(
        id: JobId,
        requester_id: &str,
        origin_scope_id: &str,
        origin_channel_id: &str,
        request: &GenerationRequest,
    ) -> Self {
        Self {
            id,
            requester_id: requester_id.to_string(),
            origin_scope_id: origin_scope_id.to_string(),
            origin_channel_id: origin_channel_id.to_string(),
            model: request.model.clone(),
            sampler: request.sampler.clone(),
            scheduler: request.scheduler.clone(),
            steps: request.steps,
            cfg: request.cfg,
            seed: request.seed,
            size: request.size.as_str().to_string(),
            positive_prompt: request.positive_prompt.clone(),
            negative_prompt: request.negative_prompt.clone(),
            adapters: request.adapters.iter().map(StoredAdapter::from).collect(),
        }
    }
}
