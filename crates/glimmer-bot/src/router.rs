//! Interaction dispatch.
//!
//! Every inbound event maps to a draft mutation, a validation pass, a
//! guard check, or a queue submission. User-visible failures (expired
//! sessions, bad values, policy matches, missing rows, permission
//! denials) are answered ephemerally and never propagate; the handler
//! itself is infallible.

use std::sync::Arc;

use tokio::sync::Mutex;
use uuid::Uuid;

use glimmer_core::catalog::NodeCatalog;
use glimmer_core::draft::{Draft, DraftStore};
use glimmer_core::params::{
    self, AdapterSelection, GenerationRequest, SizePreset, MAX_ADAPTERS,
};
use glimmer_core::types::{now_ms, JobId};
use glimmer_core::workflow::{validate_base_template, TemplateStore};
use glimmer_db::models::{Job, JobStatus, NewJob, NewUpscaleJob};
use glimmer_db::repositories::{BannedWordRepo, JobRepo, PurgeRepo, UpscaleJobRepo};
use glimmer_db::DbPool;
use glimmer_renderer::api::RendererTransport;
use glimmer_renderer::triggers::TriggerLookup;

use crate::config::Config;
use crate::gateway::{
    BannedAction, ChatGateway, Interaction, InteractionContext, InteractionEvent,
    OutboundMessage, SelectField,
};
use crate::guard_cache::BannedListCache;
use crate::queue::JobQueue;
use crate::replies;

const HOUR_MS: i64 = 3_600_000;

/// Dispatches typed interaction events. One instance serves the process.
pub struct Router {
    pool: DbPool,
    catalog: Arc<NodeCatalog>,
    templates: Arc<TemplateStore>,
    gateway: Arc<dyn ChatGateway>,
    renderer: Arc<dyn RendererTransport>,
    triggers: Arc<dyn TriggerLookup>,
    guard: Arc<BannedListCache>,
    queue: Arc<JobQueue>,
    drafts: Mutex<DraftStore>,
    config: Config,
}

impl Router {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: DbPool,
        catalog: Arc<NodeCatalog>,
        templates: Arc<TemplateStore>,
        gateway: Arc<dyn ChatGateway>,
        renderer: Arc<dyn RendererTransport>,
        triggers: Arc<dyn TriggerLookup>,
        guard: Arc<BannedListCache>,
        queue: Arc<JobQueue>,
        config: Config,
    ) -> Self {
        Self {
            pool,
            catalog,
            templates,
            gateway,
            renderer,
            triggers,
            guard,
            queue,
            drafts: Mutex::new(DraftStore::new()),
            config,
        }
    }

    /// Handle one interaction. Never fails; every outcome is a reply.
    pub async fn handle(&self, interaction: Interaction) {
        let Interaction { ctx, event } = interaction;
        match event {
            InteractionEvent::EntryCommand => self.on_entry(&ctx).await,
            InteractionEvent::SelectChanged { field, value } => {
                self.on_select(&ctx, field, &value).await
            }
            InteractionEvent::AdapterSlotChanged { slot, name, strength } => {
                self.on_adapter_slot(&ctx, slot, name, strength).await
            }
            InteractionEvent::EditPromptsButton => self.on_edit_prompts(&ctx).await,
            InteractionEvent::PromptsModal { positive, negative, steps, cfg, seed } => {
                self.on_prompts_modal(&ctx, positive, negative, &steps, &cfg, &seed).await
            }
            InteractionEvent::GenerateButton => self.on_generate(&ctx).await,
            InteractionEvent::SharePromptButton { job_id } => self.on_share(&ctx, job_id).await,
            InteractionEvent::RerollButton { job_id } => self.on_reroll(&ctx, job_id).await,
            InteractionEvent::EditButton { job_id } => self.on_edit(&ctx, job_id).await,
            InteractionEvent::DeleteButton { job_id } => self.on_delete(&ctx, job_id).await,
            InteractionEvent::UpscaleButton { job_id } => self.on_upscale(&ctx, job_id).await,
            InteractionEvent::BannedCommand(action) => self.on_banned(&ctx, action).await,
            InteractionEvent::PurgeCommand { max_age_hours } => {
                self.on_purge(&ctx, max_age_hours).await
            }
        }
    }

    // ---- form lifecycle ----

    async fn on_entry(&self, ctx: &InteractionContext) {
        if !self.config.is_channel_allowed(&ctx.channel_id) {
            self.ephemeral(ctx, replies::channel_refusal()).await;
            return;
        }

        let message = {
            let mut drafts = self.drafts.lock().await;
            let draft = drafts.init(
                &ctx.requester_id,
                &self.catalog,
                &self.config.default_negative_prompt,
            );
            replies::draft_embed(draft)
        };
        self.ephemeral(ctx, message).await;
    }

    async fn on_select(&self, ctx: &InteractionContext, field: SelectField, value: &str) {
        let reply = {
            let mut drafts = self.drafts.lock().await;
            let Some(draft) = drafts.get_mut(&ctx.requester_id) else {
                self.ephemeral(ctx, replies::session_expired()).await;
                return;
            };
            match field {
                SelectField::Model if self.catalog.has_model(value) => {
                    draft.model = value.to_string();
                }
                SelectField::Sampler if self.catalog.has_sampler(value) => {
                    draft.sampler = value.to_string();
                }
                SelectField::Scheduler if self.catalog.has_scheduler(value) => {
                    draft.scheduler = value.to_string();
                }
                SelectField::Size => match SizePreset::from_str_opt(value) {
                    Some(size) => draft.size = size,
                    None => {
                        self.ephemeral(ctx, replies::validation_error("unknown size preset"))
                            .await;
                        return;
                    }
                },
                _ => {
                    self.ephemeral(
                        ctx,
                        replies::validation_error(&format!(
                            "'{value}' is not an available option"
                        )),
                    )
                    .await;
                    return;
                }
            }
            replies::draft_embed(draft)
        };
        self.ephemeral(ctx, reply).await;
    }

    async fn on_adapter_slot(
        &self,
        ctx: &InteractionContext,
        slot: usize,
        name: Option<String>,
        strength: Option<f64>,
    ) {
        if slot >= MAX_ADAPTERS {
            self.ephemeral(ctx, replies::validation_error("invalid adapter slot")).await;
            return;
        }

        // Resolve the selection fully before touching the draft: catalog
        // membership, strength range, then trigger words (cached, served
        // as empty on transient failure).
        let selection = match name {
            None => None,
            Some(name) => {
                if !self.catalog.has_adapter(&name) {
                    self.ephemeral(
                        ctx,
                        replies::validation_error(&format!("'{name}' is not an available adapter")),
                    )
                    .await;
                    return;
                }
                let strength = strength.unwrap_or(1.0);
                if let Err(e) = params::validate_adapter_strength(strength) {
                    self.ephemeral(ctx, replies::validation_error(&e.to_string())).await;
                    return;
                }
                let trigger_words = self.triggers.lookup(&name).await;
                Some(AdapterSelection { name, strength, trigger_words })
            }
        };

        let reply = {
            let mut drafts = self.drafts.lock().await;
            let Some(draft) = drafts.get_mut(&ctx.requester_id) else {
                self.ephemeral(ctx, replies::session_expired()).await;
                return;
            };
            draft.adapters[slot] = selection;
            replies::draft_embed(draft)
        };
        self.ephemeral(ctx, reply).await;
    }

    async fn on_edit_prompts(&self, ctx: &InteractionContext) {
        let reply = {
            let drafts = self.drafts.lock().await;
            match drafts.get(&ctx.requester_id) {
                Some(draft) => replies::draft_embed(draft),
                None => replies::session_expired(),
            }
        };
        self.ephemeral(ctx, reply).await;
    }

    async fn on_prompts_modal(
        &self,
        ctx: &InteractionContext,
        positive: String,
        negative: String,
        steps: &str,
        cfg: &str,
        seed: &str,
    ) {
        let steps = match parse_steps(steps) {
            Ok(steps) => steps,
            Err(message) => {
                self.ephemeral(ctx, replies::validation_error(&message)).await;
                return;
            }
        };
        let cfg = match parse_cfg(cfg) {
            Ok(cfg) => cfg,
            Err(message) => {
                self.ephemeral(ctx, replies::validation_error(&message)).await;
                return;
            }
        };
        let seed = match params::resolve_seed(seed) {
            Ok(seed) => seed,
            Err(e) => {
                self.ephemeral(ctx, replies::validation_error(&e.to_string())).await;
                return;
            }
        };

        let reply = {
            let mut drafts = self.drafts.lock().await;
            let Some(draft) = drafts.get_mut(&ctx.requester_id) else {
                self.ephemeral(ctx, replies::session_expired()).await;
                return;
            };
            draft.positive_prompt = positive.trim().to_string();
            draft.negative_prompt = negative.trim().to_string();
            draft.steps = steps;
            draft.cfg = cfg;
            draft.seed = seed;
            replies::draft_embed(draft)
        };
        self.ephemeral(ctx, reply).await;
    }

    // ---- submission ----

    async fn on_generate(&self, ctx: &InteractionContext) {
        let request = {
            let drafts = self.drafts.lock().await;
            drafts.get(&ctx.requester_id).map(Draft::to_request)
        };
        let Some(request) = request else {
            self.ephemeral(ctx, replies::session_expired()).await;
            return;
        };

        if request.positive_prompt.trim().is_empty() {
            self.ephemeral(
                ctx,
                replies::validation_error("positive prompt must not be empty"),
            )
            .await;
            return;
        }

        let combined = format!("{} {}", request.positive_prompt, request.negative_prompt);
        let matches = self.guard.check(&combined).await;
        if !matches.is_empty() {
            self.ephemeral(ctx, replies::policy_warning(&matches)).await;
            return;
        }

        // Re-validate the template so a drifted file is caught at
        // submission rather than mid-run.
        if let Err(e) = self
            .templates
            .base_graph()
            .and_then(|graph| validate_base_template(&graph))
        {
            self.ephemeral(ctx, replies::submission_error(&e.to_string())).await;
            return;
        }

        if let Err(e) = params::validate_request(&request) {
            self.ephemeral(ctx, replies::validation_error(&e.to_string())).await;
            return;
        }

        if self.submit_request(ctx, &request).await {
            self.drafts.lock().await.delete(&ctx.requester_id);
        }
    }

    /// Persist and enqueue a validated request. Returns whether it was
    /// accepted.
    async fn submit_request(&self, ctx: &InteractionContext, request: &GenerationRequest) -> bool {
        let new = NewJob::from_request(
            Uuid::new_v4(),
            &ctx.requester_id,
            &ctx.scope_id,
            &ctx.channel_id,
            request,
        );
        let job = match JobRepo::insert(&self.pool, &new).await {
            Ok(job) => job,
            Err(e) => {
                tracing::error!(error = %e, "Failed to persist job");
                self.ephemeral(ctx, replies::submission_error("storage failure, try again"))
                    .await;
                return false;
            }
        };

        let position = match JobRepo::count_queued_before(&self.pool, job.id).await {
            Ok(position) => position,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to compute queue position");
                0
            }
        };
        self.ephemeral(ctx, replies::queued_notice(position)).await;

        let trigger_words = request
            .adapters
            .iter()
            .map(|a| a.trigger_words.clone())
            .collect();
        self.queue.enqueue_generation(
            job.id,
            Some(ctx.ephemeral_token.clone()),
            trigger_words,
        );
        tracing::info!(job_id = %job.id, requester = %ctx.requester_id, "Job enqueued");
        true
    }

    // ---- result actions ----

    async fn on_share(&self, ctx: &InteractionContext, job_id: JobId) {
        let Some(job) = self.load_job(ctx, job_id).await else { return };
        if job.requester_id != ctx.requester_id {
            self.ephemeral(ctx, replies::permission_refusal("share")).await;
            return;
        }
        let Some(message_id) = &ctx.message_id else {
            self.ephemeral(ctx, replies::job_not_found()).await;
            return;
        };

        let revealed = replies::revealed_result_message(&job, self.config.upscale_enabled);
        if let Err(e) = self
            .gateway
            .edit_message(&ctx.channel_id, message_id, revealed)
            .await
        {
            tracing::warn!(error = %e, "Failed to reveal prompt in place");
        }
    }

    async fn on_reroll(&self, ctx: &InteractionContext, job_id: JobId) {
        let Some(job) = self.load_job(ctx, job_id).await else { return };
        if job.requester_id != ctx.requester_id {
            self.ephemeral(ctx, replies::permission_refusal("re-roll")).await;
            return;
        }

        let mut request = job.to_request(None);
        request.seed = params::random_seed();
        self.submit_request(ctx, &request).await;
    }

    async fn on_edit(&self, ctx: &InteractionContext, job_id: JobId) {
        let Some(job) = self.load_job(ctx, job_id).await else { return };
        if job.requester_id != ctx.requester_id {
            self.ephemeral(ctx, replies::permission_refusal("edit")).await;
            return;
        }

        let reply = {
            let mut drafts = self.drafts.lock().await;
            let draft = drafts.init_from(&ctx.requester_id, draft_from_job(&job));
            replies::draft_embed(draft)
        };
        self.ephemeral(ctx, reply).await;
    }

    async fn on_delete(&self, ctx: &InteractionContext, job_id: JobId) {
        let requester = match JobRepo::find_by_id(&self.pool, job_id).await {
            Ok(Some(job)) => Some(job.requester_id),
            Ok(None) => match UpscaleJobRepo::find_by_id(&self.pool, job_id).await {
                Ok(row) => row.map(|u| u.requester_id),
                Err(e) => {
                    tracing::error!(error = %e, "Failed to load upscale row for delete");
                    None
                }
            },
            Err(e) => {
                tracing::error!(error = %e, "Failed to load job row for delete");
                None
            }
        };

        let authorized = match requester {
            Some(requester) => requester == ctx.requester_id || ctx.is_moderator,
            // The row may have been purged; moderators may still clean up.
            None => ctx.is_moderator,
        };
        if !authorized {
            self.ephemeral(ctx, replies::permission_refusal("delete")).await;
            return;
        }
        let Some(message_id) = &ctx.message_id else {
            self.ephemeral(ctx, replies::job_not_found()).await;
            return;
        };

        if let Err(e) = self.gateway.delete_message(&ctx.channel_id, message_id).await {
            tracing::warn!(error = %e, "Failed to delete result message");
        }
    }

    async fn on_upscale(&self, ctx: &InteractionContext, job_id: JobId) {
        if !self.config.upscale_enabled {
            self.ephemeral(ctx, replies::submission_error("upscaling is disabled")).await;
            return;
        }
        let Some(job) = self.load_job(ctx, job_id).await else { return };
        if job.requester_id != ctx.requester_id {
            self.ephemeral(ctx, replies::permission_refusal("upscale")).await;
            return;
        }
        if job.status != JobStatus::Completed {
            self.ephemeral(ctx, replies::submission_error("that job has no finished images"))
                .await;
            return;
        }
        let Some(filename) = job.output_filenames().first().cloned() else {
            self.ephemeral(ctx, replies::submission_error("that job produced no images"))
                .await;
            return;
        };

        // Rediscover where the renderer stored the image, pull the bytes,
        // and push them back into its input folder. The renderer may
        // rename on upload; the returned name is what the bind must use.
        let (subfolder, kind) = match &job.backend_prompt_id {
            Some(prompt_id) => self
                .renderer
                .history(prompt_id)
                .await
                .and_then(|entry| {
                    entry
                        .find_image(&filename)
                        .map(|img| (img.subfolder.clone(), img.kind.clone()))
                })
                .unwrap_or_default(),
            None => Default::default(),
        };

        let bytes = match self.renderer.fetch_image(&filename, &subfolder, &kind).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(error = %e, filename = %filename, "Failed to fetch source image for upscale");
                self.ephemeral(ctx, replies::submission_error("could not fetch the source image"))
                    .await;
                return;
            }
        };
        let uploaded = match self.renderer.upload_image(bytes, &filename).await {
            Ok(uploaded) => uploaded,
            Err(e) => {
                tracing::warn!(error = %e, filename = %filename, "Failed to upload source image for upscale");
                self.ephemeral(ctx, replies::submission_error("could not upload the source image"))
                    .await;
                return;
            }
        };

        let new = NewUpscaleJob {
            id: Uuid::new_v4(),
            source_job_id: job.id,
            requester_id: ctx.requester_id.clone(),
            origin_scope_id: ctx.scope_id.clone(),
            origin_channel_id: ctx.channel_id.clone(),
            source_image_filename: uploaded.name,
            upscale_model: self.config.upscale_model.clone(),
            positive_prompt: job.positive_prompt.clone(),
            negative_prompt: job.negative_prompt.clone(),
        };
        let upscale = match UpscaleJobRepo::insert(&self.pool, &new).await {
            Ok(upscale) => upscale,
            Err(e) => {
                tracing::error!(error = %e, "Failed to persist upscale job");
                self.ephemeral(ctx, replies::submission_error("storage failure, try again"))
                    .await;
                return;
            }
        };

        self.ephemeral(ctx, replies::queued_notice(self.queue.len() as i64)).await;
        self.queue.enqueue_upscale(upscale.id, Some(ctx.ephemeral_token.clone()));
        tracing::info!(job_id = %upscale.id, source = %job.id, "Upscale enqueued");
    }

    // ---- owner commands ----

    async fn on_banned(&self, ctx: &InteractionContext, action: BannedAction) {
        if !self.config.is_owner(&ctx.requester_id) {
            self.ephemeral(ctx, replies::owner_only()).await;
            return;
        }

        let reply = match action {
            BannedAction::Add { word, partial } => {
                let word = word.trim().to_string();
                if word.is_empty() {
                    replies::validation_error("banned word must not be empty")
                } else {
                    match BannedWordRepo::add(&self.pool, &word, partial, &ctx.requester_id).await {
                        Ok(added) => {
                            self.guard.invalidate().await;
                            replies::banned_word_added(&word, !added)
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to add banned word");
                            replies::submission_error("storage failure")
                        }
                    }
                }
            }
            BannedAction::Remove { word } => {
                match BannedWordRepo::remove(&self.pool, word.trim()).await {
                    Ok(found) => {
                        self.guard.invalidate().await;
                        replies::banned_word_removed(word.trim(), found)
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to remove banned word");
                        replies::submission_error("storage failure")
                    }
                }
            }
            BannedAction::List => match BannedWordRepo::list(&self.pool).await {
                Ok(words) => replies::banned_word_list(&words),
                Err(e) => {
                    tracing::error!(error = %e, "Failed to list banned words");
                    replies::submission_error("storage failure")
                }
            },
        };
        self.ephemeral(ctx, reply).await;
    }

    async fn on_purge(&self, ctx: &InteractionContext, max_age_hours: Option<u64>) {
        if !self.config.is_owner(&ctx.requester_id) {
            self.ephemeral(ctx, replies::owner_only()).await;
            return;
        }

        let hours = max_age_hours.unwrap_or(self.config.purge_max_age_hours);
        let cutoff = now_ms() - hours as i64 * HOUR_MS;
        let reply = match PurgeRepo::purge_old(&self.pool, cutoff).await {
            Ok((jobs_deleted, upscale_deleted)) => {
                tracing::info!(jobs_deleted, upscale_deleted, hours, "Manual purge completed");
                replies::purge_report(jobs_deleted, upscale_deleted)
            }
            Err(e) => {
                tracing::error!(error = %e, "Manual purge failed");
                replies::submission_error("purge failed, see logs")
            }
        };
        self.ephemeral(ctx, reply).await;
    }

    // ---- helpers ----

    /// Load a job row, answering ephemerally when it is gone.
    async fn load_job(&self, ctx: &InteractionContext, job_id: JobId) -> Option<Job> {
        match JobRepo::find_by_id(&self.pool, job_id).await {
            Ok(Some(job)) => Some(job),
            Ok(None) => {
                self.ephemeral(ctx, replies::job_not_found()).await;
                None
            }
            Err(e) => {
                tracing::error!(error = %e, %job_id, "Failed to load job row");
                self.ephemeral(ctx, replies::submission_error("storage failure")).await;
                None
            }
        }
    }

    async fn ephemeral(&self, ctx: &InteractionContext, message: OutboundMessage) {
        if let Err(e) = self
            .gateway
            .update_ephemeral(&ctx.ephemeral_token, message)
            .await
        {
            tracing::debug!(error = %e, "Ephemeral update failed (token may have expired)");
        }
    }
}

/// Seed a draft from a completed job for the edit flow. Trigger words are
/// memory-only and therefore start empty; re-selecting an adapter
/// re-resolves them.
fn draft_from_job(job: &Job) -> Draft {
    let mut adapters: [Option<AdapterSelection>; MAX_ADAPTERS] = Default::default();
    for (slot, stored) in job.adapters.0.iter().take(MAX_ADAPTERS).enumerate() {
        adapters[slot] = Some(AdapterSelection {
            name: stored.name.clone(),
            strength: stored.strength,
            trigger_words: Vec::new(),
        });
    }
    Draft {
        model: job.model.clone(),
        sampler: job.sampler.clone(),
        scheduler: job.scheduler.clone(),
        steps: job.steps,
        cfg: job.cfg,
        seed: job.seed,
        size: job.size_preset(),
        positive_prompt: job.positive_prompt.clone(),
        negative_prompt: job.negative_prompt.clone(),
        adapters,
    }
}

fn parse_steps(raw: &str) -> Result<i64, String> {
    let steps: i64 = raw
        .trim()
        .parse()
        .map_err(|_| format!("steps must be an integer, got '{}'", raw.trim()))?;
    params::validate_steps(steps).map_err(|e| e.to_string())?;
    Ok(steps)
}

fn parse_cfg(raw: &str) -> Result<f64, String> {
    let cfg: f64 = raw
        .trim()
        .parse()
        .map_err(|_| format!("cfg must be a number, got '{}'", raw.trim()))?;
    params::validate_cfg(cfg).map_err(|e| e.to_string())?;
    Ok(cfg)
}
