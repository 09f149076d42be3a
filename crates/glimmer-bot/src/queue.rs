//! The job queue and its single-slot runner.
//!
//! The queue is a process-local FIFO of job ids; the store remains the
//! source of truth for job state. Exactly one job runs at a time: the
//! runner is a single task that drains the queue sequentially and parks
//! on a wake-up when it is empty. Ephemeral reply tokens and trigger-word
//! snapshots ride alongside in take-once maps keyed by job id.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use glimmer_core::types::JobId;
use glimmer_core::workflow::{bind_generation, bind_upscale, TemplateStore, UpscaleBind};
use glimmer_db::models::{Job, UpscaleJob};
use glimmer_db::repositories::{JobRepo, UpscaleJobRepo};
use glimmer_db::DbPool;
use glimmer_renderer::api::{HistoryEntry, RendererTransport};

use crate::gateway::{Attachment, ChatGateway, EphemeralReplyToken, OutboundMessage};
use crate::replies;

/// How often the runner polls the renderer's history endpoint.
pub const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Which table a queue entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Generation,
    Upscale,
}

#[derive(Debug, Clone)]
struct QueueEntry {
    job_id: JobId,
    kind: JobKind,
}

#[derive(Default)]
struct QueueInner {
    entries: VecDeque<QueueEntry>,
    tokens: HashMap<JobId, EphemeralReplyToken>,
    triggers: HashMap<JobId, Vec<Vec<String>>>,
}

/// The FIFO plus its side tables. Shared between the router (enqueue) and
/// the runner (drain).
pub struct JobQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
    running: AtomicBool,
}

impl JobQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(QueueInner::default()),
            notify: Notify::new(),
            running: AtomicBool::new(false),
        })
    }

    /// Append a generation job and arm a wake-up. `trigger_words` is the
    /// in-memory snapshot taken from the draft, indexed parallel to the
    /// row's stored adapters.
    pub fn enqueue_generation(
        &self,
        job_id: JobId,
        token: Option<EphemeralReplyToken>,
        trigger_words: Vec<Vec<String>>,
    ) {
        {
            let mut inner = self.inner.lock().expect("queue mutex poisoned");
            inner.entries.push_back(QueueEntry {
                job_id,
                kind: JobKind::Generation,
            });
            if let Some(token) = token {
                inner.tokens.insert(job_id, token);
            }
            if !trigger_words.is_empty() {
                inner.triggers.insert(job_id, trigger_words);
            }
        }
        self.notify.notify_one();
    }

    /// Append an upscale job and arm a wake-up.
    pub fn enqueue_upscale(&self, job_id: JobId, token: Option<EphemeralReplyToken>) {
        {
            let mut inner = self.inner.lock().expect("queue mutex poisoned");
            inner.entries.push_back(QueueEntry {
                job_id,
                kind: JobKind::Upscale,
            });
            if let Some(token) = token {
                inner.tokens.insert(job_id, token);
            }
        }
        self.notify.notify_one();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("queue mutex poisoned").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a job is being processed right now.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Consume the ephemeral token for a job. One-shot: a second taker
    /// sees `None`.
    pub fn take_token(&self, job_id: JobId) -> Option<EphemeralReplyToken> {
        self.inner.lock().expect("queue mutex poisoned").tokens.remove(&job_id)
    }

    fn take_triggers(&self, job_id: JobId) -> Option<Vec<Vec<String>>> {
        self.inner.lock().expect("queue mutex poisoned").triggers.remove(&job_id)
    }

    fn pop(&self) -> Option<QueueEntry> {
        self.inner.lock().expect("queue mutex poisoned").entries.pop_front()
    }
}

/// Re-enqueue rows a previous process left `queued`, oldest first across
/// both tables. Tokens and trigger snapshots are gone with that process;
/// recovered jobs run without them.
pub async fn recover_queued(pool: &DbPool, queue: &JobQueue) -> Result<usize, sqlx::Error> {
    let jobs = JobRepo::list_queued(pool).await?;
    let upscales = UpscaleJobRepo::list_queued(pool).await?;

    let mut entries: Vec<(i64, JobId, JobKind)> = jobs
        .iter()
        .map(|j| (j.created_at, j.id, JobKind::Generation))
        .chain(upscales.iter().map(|u| (u.created_at, u.id, JobKind::Upscale)))
        .collect();
    entries.sort_by_key(|&(created_at, _, _)| created_at);

    let count = entries.len();
    for (_, job_id, kind) in entries {
        match kind {
            JobKind::Generation => queue.enqueue_generation(job_id, None, Vec::new()),
            JobKind::Upscale => queue.enqueue_upscale(job_id, None),
        }
    }
    if count > 0 {
        tracing::info!(count, "Recovered queued jobs from a previous run");
    }
    Ok(count)
}

/// The single-slot runner: binds, submits, polls, records, notifies.
pub struct JobRunner {
    pool: DbPool,
    renderer: Arc<dyn RendererTransport>,
    gateway: Arc<dyn ChatGateway>,
    templates: Arc<TemplateStore>,
    queue: Arc<JobQueue>,
    poll_deadline: Duration,
    upscale_enabled: bool,
}

impl JobRunner {
    pub fn new(
        pool: DbPool,
        renderer: Arc<dyn RendererTransport>,
        gateway: Arc<dyn ChatGateway>,
        templates: Arc<TemplateStore>,
        queue: Arc<JobQueue>,
        poll_deadline: Duration,
        upscale_enabled: bool,
    ) -> Self {
        Self {
            pool,
            renderer,
            gateway,
            templates,
            queue,
            poll_deadline,
            upscale_enabled,
        }
    }

    /// Drain the queue until cancelled. Strict FIFO; one job at a time;
    /// a job's failure never stops the loop.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!("Job runner started");
        loop {
            while let Some(entry) = self.queue.pop() {
                self.queue.running.store(true, Ordering::SeqCst);
                match entry.kind {
                    JobKind::Generation => self.run_generation(entry.job_id).await,
                    JobKind::Upscale => self.run_upscale(entry.job_id).await,
                }
                self.queue.running.store(false, Ordering::SeqCst);

                if cancel.is_cancelled() {
                    tracing::info!("Job runner stopping");
                    return;
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Job runner stopping");
                    return;
                }
                _ = self.queue.notify.notified() => {}
            }
        }
    }

    // ---- generation jobs ----

    async fn run_generation(&self, job_id: JobId) {
        let job = match JobRepo::find_by_id(&self.pool, job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                tracing::warn!(%job_id, "Queued job row no longer exists; dropping");
                return;
            }
            Err(e) => {
                tracing::error!(%job_id, error = %e, "Failed to load job row; advancing");
                return;
            }
        };
        let token = self.queue.take_token(job_id);
        let triggers = self.queue.take_triggers(job_id);

        let request = job.to_request(triggers.as_deref());
        let graph = match self
            .templates
            .base_graph()
            .and_then(|template| bind_generation(&template, &request))
        {
            Ok(graph) => graph,
            Err(e) => {
                self.fail_generation(&job, &token, &format!("Could not prepare the workflow: {e}"))
                    .await;
                return;
            }
        };

        let prompt_id = match self.renderer.submit(&graph).await {
            Ok(prompt_id) => prompt_id,
            Err(e) => {
                self.fail_generation(&job, &token, &format!("Renderer rejected the job: {e}"))
                    .await;
                return;
            }
        };

        if let Err(e) = JobRepo::mark_running(&self.pool, job.id, &prompt_id).await {
            tracing::error!(job_id = %job.id, error = %e, "Failed to record running status; advancing");
            return;
        }
        tracing::info!(job_id = %job.id, prompt_id = %prompt_id, "Job submitted to renderer");
        self.ephemeral(&token, replies::running_notice()).await;

        let entry = match self.poll_until_complete(&prompt_id).await {
            Some(entry) => entry,
            None => {
                self.fail_generation(
                    &job,
                    &token,
                    &format!("Timed out waiting for backend prompt {prompt_id}"),
                )
                .await;
                return;
            }
        };

        let filenames = entry.collect_filenames();
        if filenames.is_empty() {
            tracing::warn!(job_id = %job.id, prompt_id = %prompt_id, "Job completed with no output images");
        }

        if let Err(e) = JobRepo::mark_completed(&self.pool, job.id, &filenames).await {
            tracing::error!(job_id = %job.id, error = %e, "Failed to record completion; advancing");
            return;
        }
        tracing::info!(job_id = %job.id, images = filenames.len(), "Job completed");

        self.post_generation_result(&job, &prompt_id, &filenames, entry).await;
    }

    async fn fail_generation(
        &self,
        job: &Job,
        token: &Option<EphemeralReplyToken>,
        reason: &str,
    ) {
        tracing::warn!(job_id = %job.id, reason, "Job failed");
        if let Err(e) = JobRepo::mark_failed(&self.pool, job.id, reason).await {
            tracing::error!(job_id = %job.id, error = %e, "Failed to record failure");
        }
        self.post(
            &job.origin_channel_id,
            replies::failure_notice(&job.requester_id, reason),
        )
        .await;
        self.ephemeral(token, replies::failed_notice_ephemeral(reason)).await;
    }

    async fn post_generation_result(
        &self,
        job: &Job,
        prompt_id: &str,
        filenames: &[String],
        held_entry: HistoryEntry,
    ) {
        // Re-read the history entry so attachment subfolders and types
        // reflect what the renderer finally wrote.
        let entry = self.renderer.history(prompt_id).await.unwrap_or(held_entry);

        let mut message = replies::result_message(job, self.upscale_enabled);
        message.attachments = self.fetch_attachments(&entry, filenames).await;
        self.post(&job.origin_channel_id, message).await;
    }

    // ---- upscale jobs ----

    async fn run_upscale(&self, job_id: JobId) {
        let job = match UpscaleJobRepo::find_by_id(&self.pool, job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                tracing::warn!(%job_id, "Queued upscale row no longer exists; dropping");
                return;
            }
            Err(e) => {
                tracing::error!(%job_id, error = %e, "Failed to load upscale row; advancing");
                return;
            }
        };
        let token = self.queue.take_token(job_id);

        let params = UpscaleBind {
            source_image: job.source_image_filename.clone(),
            upscale_model: job.upscale_model.clone(),
            positive_prompt: job.positive_prompt.clone(),
            negative_prompt: job.negative_prompt.clone(),
        };
        let graph = match self.templates.upscale_graph().and_then(|template| {
            bind_upscale(self.templates.upscale_kind(), &template, &params)
        }) {
            Ok(graph) => graph,
            Err(e) => {
                self.fail_upscale(&job, &token, &format!("Could not prepare the workflow: {e}"))
                    .await;
                return;
            }
        };

        let prompt_id = match self.renderer.submit(&graph).await {
            Ok(prompt_id) => prompt_id,
            Err(e) => {
                self.fail_upscale(&job, &token, &format!("Renderer rejected the job: {e}"))
                    .await;
                return;
            }
        };

        if let Err(e) = UpscaleJobRepo::mark_running(&self.pool, job.id, &prompt_id).await {
            tracing::error!(job_id = %job.id, error = %e, "Failed to record running status; advancing");
            return;
        }
        self.ephemeral(&token, replies::running_notice()).await;

        let entry = match self.poll_until_complete(&prompt_id).await {
            Some(entry) => entry,
            None => {
                self.fail_upscale(
                    &job,
                    &token,
                    &format!("Timed out waiting for backend prompt {prompt_id}"),
                )
                .await;
                return;
            }
        };

        let filenames = entry.collect_filenames();
        if let Err(e) = UpscaleJobRepo::mark_completed(&self.pool, job.id, &filenames).await {
            tracing::error!(job_id = %job.id, error = %e, "Failed to record completion; advancing");
            return;
        }
        tracing::info!(job_id = %job.id, images = filenames.len(), "Upscale completed");

        let entry = match self.renderer.history(&prompt_id).await {
            Some(fresh) => fresh,
            None => entry,
        };
        let mut message = replies::upscale_result_message(&job);
        message.attachments = self.fetch_attachments(&entry, &filenames).await;
        self.post(&job.origin_channel_id, message).await;
    }

    async fn fail_upscale(
        &self,
        job: &UpscaleJob,
        token: &Option<EphemeralReplyToken>,
        reason: &str,
    ) {
        tracing::warn!(job_id = %job.id, reason, "Upscale failed");
        if let Err(e) = UpscaleJobRepo::mark_failed(&self.pool, job.id, reason).await {
            tracing::error!(job_id = %job.id, error = %e, "Failed to record failure");
        }
        self.post(
            &job.origin_channel_id,
            replies::failure_notice(&job.requester_id, reason),
        )
        .await;
        self.ephemeral(token, replies::failed_notice_ephemeral(reason)).await;
    }

    // ---- shared pieces ----

    /// Poll the history endpoint every [`POLL_INTERVAL`] until the entry
    /// reports completion or the deadline elapses. `None` is a timeout.
    async fn poll_until_complete(&self, prompt_id: &str) -> Option<HistoryEntry> {
        let started = tokio::time::Instant::now();
        loop {
            if started.elapsed() >= self.poll_deadline {
                return None;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
            if let Some(entry) = self.renderer.history(prompt_id).await {
                if entry.status.completed {
                    return Some(entry);
                }
            }
        }
    }

    async fn fetch_attachments(
        &self,
        entry: &HistoryEntry,
        filenames: &[String],
    ) -> Vec<Attachment> {
        let mut attachments = Vec::with_capacity(filenames.len());
        for filename in filenames {
            let (subfolder, kind) = entry
                .find_image(filename)
                .map(|img| (img.subfolder.clone(), img.kind.clone()))
                .unwrap_or_default();
            match self.renderer.fetch_image(filename, &subfolder, &kind).await {
                Ok(bytes) => attachments.push(Attachment {
                    filename: filename.clone(),
                    bytes,
                }),
                Err(e) => {
                    tracing::warn!(filename = %filename, error = %e, "Failed to fetch output image");
                }
            }
        }
        attachments
    }

    async fn post(&self, channel_id: &str, message: OutboundMessage) {
        if let Err(e) = self.gateway.post_message(channel_id, message).await {
            tracing::warn!(channel_id, error = %e, "Failed to post channel message");
        }
    }

    async fn ephemeral(&self, token: &Option<EphemeralReplyToken>, message: OutboundMessage) {
        if let Some(token) = token {
            if let Err(e) = self.gateway.update_ephemeral(token, message).await {
                tracing::debug!(error = %e, "Ephemeral update failed (token may have expired)");
            }
        }
    }
}
