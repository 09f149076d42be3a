//! Boot wiring and process lifecycle.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use glimmer_core::catalog::resolve_catalog;
use glimmer_core::workflow::TemplateStore;
use glimmer_renderer::api::{RendererApi, RendererTransport};
use glimmer_renderer::civitai::CivitaiClient;
use glimmer_renderer::triggers::{TriggerLookup, TriggerWordCache};

use crate::config::{Config, ConfigError};
use crate::gateway::ChatGateway;
use crate::guard_cache::BannedListCache;
use crate::purge::PurgeScheduler;
use crate::queue::{recover_queued, JobQueue, JobRunner};
use crate::router::Router;

/// Fatal boot failures, per the startup contract: configuration, store,
/// renderer reachability, catalog resolution, and template validation
/// all abort the process.
#[derive(Debug, thiserror::Error)]
pub enum BootError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("renderer unreachable at {0}")]
    RendererDown(String),

    #[error("renderer error: {0}")]
    Renderer(#[from] glimmer_renderer::api::RendererError),

    #[error(transparent)]
    Core(#[from] glimmer_core::CoreError),
}

/// The running application: the router for the platform adapter to feed,
/// plus the background tasks' lifecycle.
pub struct App {
    pub router: Arc<Router>,
    pub queue: Arc<JobQueue>,
    cancel: CancellationToken,
    runner_handle: tokio::task::JoinHandle<()>,
    purge_handle: tokio::task::JoinHandle<()>,
}

impl App {
    /// Boot the full stack. Order matters: store, renderer probe, node
    /// catalog, template validation, then background tasks and the
    /// recovery sweep that re-enqueues rows left `queued` by a previous
    /// run.
    pub async fn boot(config: Config, gateway: Arc<dyn ChatGateway>) -> Result<App, BootError> {
        let pool = glimmer_db::open(&config.db_path).await?;
        glimmer_db::health_check(&pool).await?;
        tracing::info!(path = %config.db_path, "Database ready");

        let renderer = Arc::new(RendererApi::new(config.backend_base_url.clone()));
        if !renderer.ping().await {
            return Err(BootError::RendererDown(config.backend_base_url.clone()));
        }
        let object_info = renderer.object_info().await?;
        let catalog = Arc::new(resolve_catalog(&object_info)?);
        tracing::info!(
            checkpoint_class = %catalog.checkpoint_class,
            sampler_class = %catalog.sampler_class,
            models = catalog.models.len(),
            samplers = catalog.samplers.len(),
            schedulers = catalog.schedulers.len(),
            adapters = catalog.adapters.len(),
            "Node catalog resolved",
        );

        let templates = Arc::new(TemplateStore::new(
            &config.workflows_dir,
            config.upscale_workflow,
        ));
        templates.validate_all()?;
        tracing::info!(dir = %config.workflows_dir, "Workflow templates validated");

        let civitai = CivitaiClient::new(config.civitai_api_key.clone());
        let triggers: Arc<dyn TriggerLookup> =
            Arc::new(TriggerWordCache::new(renderer.clone(), civitai));
        let guard = Arc::new(BannedListCache::new(pool.clone()));
        let queue = JobQueue::new();
        let cancel = CancellationToken::new();
        let renderer: Arc<dyn RendererTransport> = renderer;

        let runner = Arc::new(JobRunner::new(
            pool.clone(),
            renderer.clone(),
            gateway.clone(),
            templates.clone(),
            queue.clone(),
            Duration::from_millis(config.backend_timeout_ms),
            config.upscale_enabled,
        ));
        let runner_handle = {
            let cancel = cancel.clone();
            tokio::spawn(async move { runner.run(cancel).await })
        };

        let purge = PurgeScheduler::new(
            pool.clone(),
            config.purge_interval_hours,
            config.purge_max_age_hours,
        );
        let purge_handle = {
            let cancel = cancel.clone();
            tokio::spawn(async move { purge.run(cancel).await })
        };

        recover_queued(&pool, &queue).await?;

        let router = Arc::new(Router::new(
            pool,
            catalog,
            templates,
            gateway,
            renderer,
            triggers,
            guard,
            queue.clone(),
            config,
        ));

        Ok(App {
            router,
            queue,
            cancel,
            runner_handle,
            purge_handle,
        })
    }

    /// Cancel background work and wait briefly for clean exits. The
    /// runner finishes its in-flight job or is abandoned after the
    /// timeout.
    pub async fn shutdown(self) {
        tracing::info!("Shutting down");
        self.cancel.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(5), self.runner_handle).await;
        let _ = tokio::time::timeout(Duration::from_secs(5), self.purge_handle).await;
        tracing::info!("Shutdown complete");
    }
}
