//! Orchestration engine.
//!
//! Drives image generation across a task's pages: resolves the provider
//! through the registry, wraps every call in the retry policy, threads
//! reference images through the compressor, records progress in the
//! state store and emits a typed event stream.

use crate::config::ProviderConfig;
use crate::error::{EngineError, ProviderError, Result};
use crate::event::{GenerationEvent, PageOutcome};
use crate::generator::{ImageGenerator, ImageRequest};
use crate::ports::{ImageStore, ReferenceCompressor};
use crate::registry::ProviderRegistry;
use crate::retry::RetryPolicy;
use crate::state::{TaskStateStore, TaskStateView};
use crate::task::{GenerationTask, Page};
use std::sync::Arc;
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Reference images are bounded to this size before dispatch.
const REFERENCE_IMAGE_MAX_KB: u32 = 200;
const EVENT_CHANNEL_CAPACITY: usize = 32;
const DEFAULT_MAX_IN_FLIGHT: usize = 4;

/// How a successful page interacts with the task's cover image.
#[derive(Debug, Clone, Copy)]
enum CoverPolicy {
    /// Become the cover only if none exists yet (first success wins).
    SetIfAbsent,
    /// Overwrite the cover (regenerating the first page).
    Refresh,
}

/// The image generation orchestrator.
///
/// Cheap to clone; clones share the registry, stores and task state.
#[derive(Clone)]
pub struct Engine {
    registry: Arc<ProviderRegistry>,
    compressor: Arc<dyn ReferenceCompressor>,
    images: Arc<dyn ImageStore>,
    state: TaskStateStore,
    policy: RetryPolicy,
    max_in_flight: usize,
}

impl Engine {
    /// Creates an engine with the image-call retry profile and the
    /// default worker pool bound.
    pub fn new(
        registry: Arc<ProviderRegistry>,
        compressor: Arc<dyn ReferenceCompressor>,
        images: Arc<dyn ImageStore>,
    ) -> Self {
        Self {
            registry,
            compressor,
            images,
            state: TaskStateStore::new(),
            policy: RetryPolicy::image(),
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }

    /// Overrides the retry policy applied to provider calls.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Overrides the worker pool bound for high-concurrency tasks.
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }

    /// The task state store shared by all runs of this engine.
    pub fn state(&self) -> &TaskStateStore {
        &self.state
    }

    /// Pull-style progress query. Never includes raw image bytes.
    pub async fn task_state(&self, task_id: &str) -> Option<TaskStateView> {
        self.state.snapshot(task_id).await
    }

    /// Runs generation for a whole task, returning the event stream.
    ///
    /// Configuration and factory errors abort here, before any event is
    /// emitted. Once the stream starts it never errors: per-page
    /// failures become `PageFailed` events and the run always ends with
    /// exactly one `TaskComplete`.
    pub async fn generate(
        &self,
        task: GenerationTask,
        config: ProviderConfig,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<GenerationEvent>> {
        if task.pages.is_empty() {
            return Err(EngineError::config("task has no pages"));
        }
        let generator = self.resolve_generator(&config)?;
        self.state.init(&task).await;
        info!(
            task_id = %task.task_id,
            pages = task.pages.len(),
            provider = %config.provider,
            high_concurrency = task.high_concurrency,
            "starting generation task"
        );

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let engine = self.clone();
        tokio::spawn(async move {
            if task.high_concurrency {
                engine
                    .run_concurrent(task, config, generator, tx, cancel)
                    .await;
            } else {
                engine
                    .run_sequential(task, config, generator, tx, cancel)
                    .await;
            }
        });
        Ok(rx)
    }

    /// Retries a single page, reusing the per-page pipeline. The page
    /// may currently be failed or pending; its prior terminal entry is
    /// superseded.
    pub async fn retry_single(
        &self,
        task_id: &str,
        page: u32,
        config: &ProviderConfig,
        use_reference: bool,
    ) -> Result<PageOutcome> {
        let (generator, spec) = self.prepare_page(task_id, page, config).await?;
        Ok(self
            .run_page(
                task_id,
                &spec,
                config,
                &generator,
                None,
                use_reference,
                CoverPolicy::SetIfAbsent,
            )
            .await)
    }

    /// Forces a fresh attempt for a page even if it previously
    /// succeeded, overwriting the prior terminal entry. Regenerating the
    /// task's first page also refreshes the cover image.
    pub async fn regenerate(
        &self,
        task_id: &str,
        page: u32,
        config: &ProviderConfig,
        use_reference: bool,
    ) -> Result<PageOutcome> {
        let (generator, spec) = self.prepare_page(task_id, page, config).await?;
        let cover = if self.state.first_page_index(task_id).await == Some(page) {
            CoverPolicy::Refresh
        } else {
            CoverPolicy::SetIfAbsent
        };
        Ok(self
            .run_page(task_id, &spec, config, &generator, None, use_reference, cover)
            .await)
    }

    /// Batch retry over a subset of pages, streamed with the same event
    /// vocabulary as a full run. `TaskComplete` counts cover only this
    /// subset.
    pub async fn retry_failed(
        &self,
        task_id: &str,
        pages: Vec<u32>,
        config: ProviderConfig,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<GenerationEvent>> {
        let generator = self.resolve_generator(&config)?;
        if !self.state.contains(task_id).await {
            return Err(EngineError::TaskNotFound(task_id.to_string()));
        }
        let mut specs = Vec::with_capacity(pages.len());
        for page in pages {
            let spec = self
                .state
                .page_spec(task_id, page)
                .await
                .ok_or(EngineError::UnknownPage {
                    task_id: task_id.to_string(),
                    page,
                })?;
            specs.push(spec);
        }

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let engine = self.clone();
        let task_id = task_id.to_string();
        tokio::spawn(async move {
            let mut success_count = 0u32;
            let mut failed_count = 0u32;
            for spec in &specs {
                if cancel.is_cancelled() {
                    info!(task_id = %task_id, "retry batch cancelled");
                    break;
                }
                let outcome = engine
                    .run_page(
                        &task_id,
                        spec,
                        &config,
                        &generator,
                        Some(&tx),
                        true,
                        CoverPolicy::SetIfAbsent,
                    )
                    .await;
                match outcome {
                    PageOutcome::Success { .. } => success_count += 1,
                    PageOutcome::Failed { .. } => failed_count += 1,
                }
            }
            let _ = tx
                .send(GenerationEvent::TaskComplete {
                    success_count,
                    failed_count,
                })
                .await;
        });
        Ok(rx)
    }

    fn resolve_generator(&self, config: &ProviderConfig) -> Result<Arc<dyn ImageGenerator>> {
        let generator = self.registry.create(&config.provider, config)?;
        generator
            .validate_config()
            .map_err(|err| EngineError::Config(err.to_string()))?;
        Ok(generator)
    }

    async fn prepare_page(
        &self,
        task_id: &str,
        page: u32,
        config: &ProviderConfig,
    ) -> Result<(Arc<dyn ImageGenerator>, Page)> {
        let generator = self.resolve_generator(config)?;
        if !self.state.contains(task_id).await {
            return Err(EngineError::TaskNotFound(task_id.to_string()));
        }
        let spec = self
            .state
            .page_spec(task_id, page)
            .await
            .ok_or(EngineError::UnknownPage {
                task_id: task_id.to_string(),
                page,
            })?;
        Ok((generator, spec))
    }

    async fn run_sequential(
        &self,
        task: GenerationTask,
        config: ProviderConfig,
        generator: Arc<dyn ImageGenerator>,
        tx: mpsc::Sender<GenerationEvent>,
        cancel: CancellationToken,
    ) {
        let mut success_count = 0u32;
        let mut failed_count = 0u32;
        for page in &task.pages {
            if cancel.is_cancelled() {
                info!(task_id = %task.task_id, "generation cancelled between pages");
                break;
            }
            let outcome = self
                .run_page(
                    &task.task_id,
                    page,
                    &config,
                    &generator,
                    Some(&tx),
                    true,
                    CoverPolicy::SetIfAbsent,
                )
                .await;
            match outcome {
                PageOutcome::Success { .. } => success_count += 1,
                PageOutcome::Failed { .. } => failed_count += 1,
            }
        }
        let _ = tx
            .send(GenerationEvent::TaskComplete {
                success_count,
                failed_count,
            })
            .await;
    }

    async fn run_concurrent(
        &self,
        task: GenerationTask,
        config: ProviderConfig,
        generator: Arc<dyn ImageGenerator>,
        tx: mpsc::Sender<GenerationEvent>,
        cancel: CancellationToken,
    ) {
        let mut success_count = 0u32;
        let mut failed_count = 0u32;

        // The first page runs synchronously to establish the cover;
        // user-supplied references make that round unnecessary.
        let mut remaining: &[Page] = &task.pages;
        if task.user_images.is_empty() && !cancel.is_cancelled() {
            if let Some((first, rest)) = task.pages.split_first() {
                let outcome = self
                    .run_page(
                        &task.task_id,
                        first,
                        &config,
                        &generator,
                        Some(&tx),
                        true,
                        CoverPolicy::SetIfAbsent,
                    )
                    .await;
                match outcome {
                    PageOutcome::Success { .. } => success_count += 1,
                    PageOutcome::Failed { .. } => failed_count += 1,
                }
                remaining = rest;
            }
        }

        let semaphore = Arc::new(Semaphore::new(self.max_in_flight));
        let mut handles = Vec::with_capacity(remaining.len());
        for page in remaining {
            if cancel.is_cancelled() {
                info!(task_id = %task.task_id, "generation cancelled between dispatches");
                break;
            }
            let engine = self.clone();
            let task_id = task.task_id.clone();
            let page = page.clone();
            let config = config.clone();
            let generator = Arc::clone(&generator);
            let tx = tx.clone();
            let semaphore = Arc::clone(&semaphore);
            let page_index = page.index;
            handles.push((page_index, tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                engine
                    .run_page(
                        &task_id,
                        &page,
                        &config,
                        &generator,
                        Some(&tx),
                        true,
                        CoverPolicy::SetIfAbsent,
                    )
                    .await
            })));
        }

        for (page, handle) in handles {
            match handle.await {
                Ok(PageOutcome::Success { .. }) => success_count += 1,
                Ok(PageOutcome::Failed { .. }) => failed_count += 1,
                Err(err) => {
                    // The worker died before reaching a terminal
                    // transition; record one so the state store agrees
                    // with the event stream.
                    self.fail_page(
                        &task.task_id,
                        page,
                        format!("page worker panicked: {err}"),
                        Some(&tx),
                    )
                    .await;
                    failed_count += 1;
                }
            }
        }
        let _ = tx
            .send(GenerationEvent::TaskComplete {
                success_count,
                failed_count,
            })
            .await;
    }

    /// Runs one page through mark → dispatch → terminal transition.
    ///
    /// Errors never escape the page boundary: every outcome is recorded
    /// in the state store and (when a channel is attached) mirrored as
    /// an event.
    async fn run_page(
        &self,
        task_id: &str,
        page: &Page,
        config: &ProviderConfig,
        generator: &Arc<dyn ImageGenerator>,
        events: Option<&mpsc::Sender<GenerationEvent>>,
        use_reference: bool,
        cover: CoverPolicy,
    ) -> PageOutcome {
        self.state.mark_generating(task_id, page.index).await;
        Self::emit(events, GenerationEvent::PageStart { page: page.index }).await;

        let reference_images = self.references_for(task_id, use_reference).await;
        let request = ImageRequest {
            prompt: page.prompt.clone(),
            aspect_ratio: page
                .aspect_ratio
                .clone()
                .or_else(|| config.aspect_ratio.clone()),
            size: config.size.clone(),
            temperature: 1.0,
            model: config.model.clone(),
            reference_images,
        };
        debug!(
            task_id,
            page = page.index,
            references = request.reference_images.len(),
            "dispatching page to provider"
        );

        let result = self
            .policy
            .run(|| generator.generate_image(&request), ProviderError::kind)
            .await;

        match result {
            Ok(bytes) => match self.images.save(task_id, page.index, &bytes).await {
                Ok(image_ref) => {
                    self.state
                        .mark_success(task_id, page.index, image_ref.clone())
                        .await;
                    match cover {
                        CoverPolicy::SetIfAbsent => {
                            self.state.set_cover(task_id, bytes).await;
                        }
                        CoverPolicy::Refresh => self.state.replace_cover(task_id, bytes).await,
                    }
                    info!(task_id, page = page.index, image_ref = %image_ref, "page generated");
                    Self::emit(
                        events,
                        GenerationEvent::PageSuccess {
                            page: page.index,
                            image_ref: image_ref.clone(),
                        },
                    )
                    .await;
                    PageOutcome::Success { image_ref }
                }
                Err(err) => {
                    let error = format!("failed to persist image: {err}");
                    self.fail_page(task_id, page.index, error, events).await
                }
            },
            Err(err) => {
                let error = err.to_string();
                self.fail_page(task_id, page.index, error, events).await
            }
        }
    }

    async fn fail_page(
        &self,
        task_id: &str,
        page: u32,
        error: String,
        events: Option<&mpsc::Sender<GenerationEvent>>,
    ) -> PageOutcome {
        warn!(task_id, page, error = %error, "page failed");
        self.state.mark_failed(task_id, page, error.clone()).await;
        Self::emit(
            events,
            GenerationEvent::PageFailed {
                page,
                error: error.clone(),
            },
        )
        .await;
        PageOutcome::Failed { error }
    }

    /// Resolves the reference images for a page: user-supplied images
    /// first, then the task cover, then none. Each reference is
    /// compressed to the payload bound before dispatch.
    async fn references_for(&self, task_id: &str, use_reference: bool) -> Vec<Vec<u8>> {
        if !use_reference {
            return Vec::new();
        }
        let user_images = self.state.user_images(task_id).await;
        let raw = if !user_images.is_empty() {
            user_images
        } else if let Some(cover) = self.state.cover(task_id).await {
            vec![cover]
        } else {
            Vec::new()
        };
        raw.iter()
            .map(|image| self.compressor.compress(image, REFERENCE_IMAGE_MAX_KB))
            .collect()
    }

    async fn emit(events: Option<&mpsc::Sender<GenerationEvent>>, event: GenerationEvent) {
        if let Some(tx) = events {
            // A dropped receiver only means nobody is listening anymore;
            // state transitions already happened.
            let _ = tx.send(event).await;
        }
    }
}
