//! Session orchestration.
//!
//! [`SessionOrchestrator`] owns the scene store and runs the generation
//! state machine:
//!
//! `Idle -> Submitting -> Polling -> (Completed | Failed) -> Idle`
//!
//! At most one generation (batch or single scene) is in flight per
//! session. Observers follow the session through [`EventBus`] events and
//! the state/progress `watch` channels; the orchestrator has no knowledge
//! of how they render.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, MutexGuard, PoisonError};
use std::time::Duration;

use madsea_backend::api::{AutosaveHook, GenerationBackend};
use madsea_backend::messages::AutosaveRequest;
use madsea_backend::poller::{JobStatusPoller, WatchOutcome};
use madsea_backend::submission::{BatchOptions, JobSubmissionClient};
use madsea_core::broadcast::OverridePolicy;
use madsea_core::catalog::{CatalogEntry, ModelCatalog};
use madsea_core::job::{GenerationJob, JobState, JobStatusSnapshot, SessionProgress};
use madsea_core::scene::{SceneOutput, SceneParamsPatch, SceneRecord, Transition};
use madsea_core::state::SessionState;
use madsea_core::store::{InMemorySceneStore, SceneStore};
use madsea_core::types::SceneId;
use madsea_events::{EventBus, Notification, SessionEvent, SessionEventKind};
use tokio::sync::{mpsc, oneshot, watch, Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::config::SessionConfig;
use crate::document::{parse_session, SessionDocument};
use crate::error::{SelectionError, SessionError};
use crate::resolver::GenerationParameterResolver;

/// What a generation run covers.
#[derive(Debug, Clone)]
enum RunScope {
    /// "Generate all": aggregate progress is tracked in [`SessionProgress`].
    Batch,
    /// A single scene: progress is reported per scene only.
    Scene(SceneId),
}

/// The run currently holding the session.
struct ActiveRun {
    id: u64,
    token: CancellationToken,
}

/// How the watch of a submitted job ended, from the orchestrator's view.
enum RunEnd {
    Finished(WatchOutcome),
    Cancelled,
    /// The watch task went away without reporting.
    Lost,
}

pub struct SessionOrchestrator<S: SceneStore = InMemorySceneStore> {
    store: RwLock<S>,
    resolver: Mutex<GenerationParameterResolver>,
    catalog: ModelCatalog,
    backend: Arc<dyn GenerationBackend>,
    submitter: JobSubmissionClient,
    poller: JobStatusPoller,
    autosave: Arc<dyn AutosaveHook>,
    events: Arc<EventBus>,
    state: watch::Sender<SessionState>,
    progress: watch::Sender<SessionProgress>,
    /// Cancels the run in flight, if any. Never held across an await.
    active_run: std::sync::Mutex<Option<ActiveRun>>,
    next_run_id: AtomicU64,
    styles: RwLock<Vec<CatalogEntry>>,
    lora_models: RwLock<Vec<CatalogEntry>>,
    poll_interval: Duration,
    project_id: Option<String>,
    episode_id: Option<String>,
}

impl SessionOrchestrator<InMemorySceneStore> {
    /// Create an orchestrator over an empty in-memory store.
    pub fn new(
        backend: Arc<dyn GenerationBackend>,
        autosave: Arc<dyn AutosaveHook>,
        events: Arc<EventBus>,
        config: &SessionConfig,
    ) -> Self {
        Self::with_store(InMemorySceneStore::new(), backend, autosave, events, config)
    }
}

impl<S: SceneStore + 'static> SessionOrchestrator<S> {
    /// Create an orchestrator over an existing scene store.
    pub fn with_store(
        store: S,
        backend: Arc<dyn GenerationBackend>,
        autosave: Arc<dyn AutosaveHook>,
        events: Arc<EventBus>,
        config: &SessionConfig,
    ) -> Self {
        Self {
            store: RwLock::new(store),
            resolver: Mutex::new(GenerationParameterResolver::new(config.override_policy)),
            catalog: ModelCatalog::builtin(),
            submitter: JobSubmissionClient::new(Arc::clone(&backend)),
            poller: JobStatusPoller::new(Arc::clone(&backend), config.poll_config()),
            backend,
            autosave,
            events,
            state: watch::channel(SessionState::Idle).0,
            progress: watch::channel(SessionProgress::default()).0,
            active_run: std::sync::Mutex::new(None),
            next_run_id: AtomicU64::new(0),
            styles: RwLock::new(Vec::new()),
            lora_models: RwLock::new(Vec::new()),
            poll_interval: config.poll_interval,
            project_id: config.project_id.clone(),
            episode_id: None,
        }
    }

    /// Episode sent with generation requests.
    pub fn with_episode_id(mut self, episode_id: impl Into<String>) -> Self {
        self.episode_id = Some(episode_id.into());
        self
    }

    /// Replace the built-in model catalog used for scene defaults.
    pub fn with_catalog(mut self, catalog: ModelCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    // ---- observation ----

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn progress(&self) -> SessionProgress {
        *self.progress.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn subscribe_progress(&self) -> watch::Receiver<SessionProgress> {
        self.progress.subscribe()
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn model_catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    pub async fn scenes(&self) -> Vec<SceneRecord> {
        self.store.read().await.snapshot()
    }

    pub async fn scene(&self, scene_id: &str) -> Option<SceneRecord> {
        self.store.read().await.get(scene_id).cloned()
    }

    /// Ids of scenes that have no generated output yet, in episode order.
    ///
    /// Video assembly needs this list to be empty.
    pub async fn scenes_missing_output(&self) -> Vec<SceneId> {
        self.store
            .read()
            .await
            .snapshot()
            .into_iter()
            .filter(|s| s.output.is_none())
            .map(|s| s.id)
            .collect()
    }

    // ---- catalogs ----

    /// Fetch the style and LoRA catalogs from the backend.
    ///
    /// A failed fetch leaves that catalog empty and warns the user.
    pub async fn load_catalogs(&self) {
        match self.backend.styles().await {
            Ok(styles) => {
                tracing::info!(count = styles.len(), "Loaded styles");
                *self.styles.write().await = styles;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load styles");
                self.events
                    .notify(Notification::warning(format!("Could not load styles: {e}")));
            }
        }

        match self.backend.lora_models().await {
            Ok(models) => {
                tracing::info!(count = models.len(), "Loaded LoRA models");
                *self.lora_models.write().await = models;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load LoRA models");
                self.events
                    .notify(Notification::warning(format!("Could not load LoRA models: {e}")));
            }
        }
    }

    pub async fn styles(&self) -> Vec<CatalogEntry> {
        self.styles.read().await.clone()
    }

    pub async fn lora_models(&self) -> Vec<CatalogEntry> {
        self.lora_models.read().await.clone()
    }

    // ---- global selections ----

    pub async fn apply_global_style(&self, style_id: &str, strength: f64) -> usize {
        let mut resolver = self.resolver.lock().await;
        let mut store = self.store.write().await;
        resolver.apply_global_style(&mut *store, style_id, strength)
    }

    pub async fn apply_global_model(&self, base_model: &str, controlnet_model: &str) -> usize {
        let mut resolver = self.resolver.lock().await;
        let mut store = self.store.write().await;
        resolver.apply_global_model(&mut *store, base_model, controlnet_model)
    }

    pub async fn apply_cloud_fallback(&self, enabled: bool, provider: &str) -> usize {
        let mut resolver = self.resolver.lock().await;
        let mut store = self.store.write().await;
        resolver.apply_cloud_fallback(&mut *store, enabled, provider)
    }

    pub async fn apply_animation_settings(
        &self,
        local_enabled: bool,
        cloud_providers: BTreeSet<String>,
        transition: Transition,
    ) -> usize {
        let mut resolver = self.resolver.lock().await;
        let mut store = self.store.write().await;
        resolver.apply_animation_settings(&mut *store, local_enabled, cloud_providers, transition)
    }

    pub async fn selected_style(&self) -> Option<String> {
        self.resolver.lock().await.selected_style().map(str::to_string)
    }

    // ---- per-scene edits ----

    /// Merge `patch` into one scene.
    ///
    /// Under [`OverridePolicy::PreserveOverrides`] the touched groups are
    /// pinned, so later broadcasts leave them alone for this scene.
    pub async fn update_scene_params(
        &self,
        scene_id: &str,
        patch: &SceneParamsPatch,
    ) -> Result<SceneRecord, SessionError> {
        let pin = self.resolver.lock().await.policy() == OverridePolicy::PreserveOverrides;

        let mut store = self.store.write().await;
        let scene = store
            .get_mut(scene_id)
            .ok_or_else(|| SessionError::SceneNotFound(scene_id.to_string()))?;

        let mut updated = scene.clone();
        updated.apply_patch(patch, pin);
        updated.validate_for_submission()?;
        *scene = updated.clone();

        tracing::debug!(scene_id, pinned = pin, "Updated scene parameters");
        Ok(updated)
    }

    // ---- export / import ----

    pub async fn export_session(&self) -> SessionDocument {
        SessionDocument::new(self.store.read().await.snapshot())
    }

    /// Replace the scene set from a session or extraction document.
    ///
    /// Returns the number of scenes imported. Refused while a generation
    /// is in flight.
    pub async fn import_session(&self, json: &str) -> Result<usize, SessionError> {
        if !self.state().is_idle() {
            return Err(SessionError::AlreadyInProgress);
        }
        let scenes = parse_session(json, &self.catalog)?;
        let count = scenes.len();
        self.store.write().await.replace_all(scenes);

        tracing::info!(scene_count = count, "Imported session");
        Ok(count)
    }

    // ---- generation ----

    /// Generate every scene as one backend task.
    ///
    /// Requires at least one scene and a globally selected style; a missing
    /// selection is reported as a warning without any state change.
    pub async fn generate_all(&self) -> Result<SessionProgress, SessionError> {
        if !self.state().is_idle() {
            return Err(SessionError::AlreadyInProgress);
        }

        let (scenes, options) = {
            let resolver = self.resolver.lock().await;
            let store = self.store.read().await;

            let selection = if store.is_empty() {
                Err(SelectionError::NoScenes)
            } else {
                resolver
                    .selected_style()
                    .map(str::to_string)
                    .ok_or(SelectionError::StyleRequired)
            };
            let style = match selection {
                Ok(style) => style,
                Err(e) => {
                    tracing::warn!(error = %e, "Generation blocked on selection");
                    self.events.notify(Notification::warning(e.to_string()));
                    return Err(e.into());
                }
            };

            let options = BatchOptions {
                project_id: self.project_id.clone(),
                episode_id: self.episode_id.clone(),
                style: Some(style),
                strength: resolver.selection().style_strength,
                seed: None,
            };
            (store.snapshot(), options)
        };

        let guard = self
            .try_claim(&RunScope::Batch)
            .ok_or(SessionError::AlreadyInProgress)?;
        self.run(guard, scenes, options, RunScope::Batch).await
    }

    /// Generate a single scene, sharing the in-flight guard with
    /// [`generate_all`](Self::generate_all).
    pub async fn generate_scene(&self, scene_id: &str) -> Result<SessionProgress, SessionError> {
        if !self.state().is_idle() {
            return Err(SessionError::AlreadyInProgress);
        }

        let scene = self
            .scene(scene_id)
            .await
            .ok_or_else(|| SessionError::SceneNotFound(scene_id.to_string()))?;

        let style = Some(scene.generation.style.style_id.clone()).filter(|s| !s.is_empty());
        let options = BatchOptions {
            project_id: self.project_id.clone(),
            episode_id: self.episode_id.clone(),
            style,
            strength: Some(scene.generation.style.strength),
            seed: None,
        };

        let scope = RunScope::Scene(scene_id.to_string());
        let guard = self
            .try_claim(&scope)
            .ok_or(SessionError::AlreadyInProgress)?;
        self.run(guard, vec![scene], options, scope).await
    }

    /// Cancel the generation in flight.
    ///
    /// The backend job is not aborted; the session stops tracking it and
    /// returns to `Idle` without autosave. Returns `false` when nothing
    /// was running.
    pub async fn cancel(&self) -> bool {
        match self.active_run().as_ref() {
            Some(run) => {
                tracing::info!(run_id = run.id, "Cancelling generation");
                run.token.cancel();
                true
            }
            None => false,
        }
    }

    // ---- private helpers ----

    fn active_run(&self) -> MutexGuard<'_, Option<ActiveRun>> {
        self.active_run.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Atomically move `Idle -> Submitting` and register the run's
    /// cancellation token. Returns `None` if another run holds the session.
    fn try_claim(&self, scope: &RunScope) -> Option<RunGuard<'_, S>> {
        let token = CancellationToken::new();
        let id = {
            let mut active = self.active_run();
            let claimed = self.state.send_if_modified(|state| {
                if state.is_idle() {
                    *state = SessionState::Submitting;
                    true
                } else {
                    false
                }
            });
            if !claimed {
                return None;
            }
            let id = self.next_run_id.fetch_add(1, Ordering::Relaxed);
            *active = Some(ActiveRun {
                id,
                token: token.clone(),
            });
            id
        };

        tracing::info!(from = %SessionState::Idle, to = %SessionState::Submitting, "Session state changed");
        self.events.publish(SessionEvent::state_changed(
            SessionState::Idle,
            SessionState::Submitting,
        ));
        Some(RunGuard {
            session: self,
            id,
            token,
            batch: matches!(scope, RunScope::Batch),
            settled: false,
        })
    }

    fn transition(&self, to: SessionState) {
        let from = self.state.send_replace(to);
        if !from.can_transition(to) {
            tracing::warn!(%from, %to, "Unexpected session state transition");
        }
        tracing::info!(%from, %to, "Session state changed");
        self.events.publish(SessionEvent::state_changed(from, to));
    }

    /// Publish one status observation.
    ///
    /// Batch runs fold it into the shared [`SessionProgress`], which never
    /// moves backwards; single-scene runs report the job's own progress
    /// for that scene.
    fn report_progress(&self, scope: &RunScope, job: &GenerationJob, snapshot: &JobStatusSnapshot) {
        match scope {
            RunScope::Batch => {
                let mut changed = None;
                self.progress.send_if_modified(|p| {
                    let before = *p;
                    p.apply(snapshot);
                    if *p != before {
                        changed = Some(*p);
                        true
                    } else {
                        false
                    }
                });
                if let Some(p) = changed {
                    self.events.publish(SessionEvent::progress(p));
                }
            }
            RunScope::Scene(scene_id) => {
                self.events.publish(SessionEvent::new(SessionEventKind::SceneProgress {
                    scene_id: scene_id.clone(),
                    percent: job.progress_percent,
                }));
            }
        }
    }

    /// Submit, watch, and settle one claimed run.
    async fn run(
        &self,
        mut guard: RunGuard<'_, S>,
        scenes: Vec<SceneRecord>,
        options: BatchOptions,
        scope: RunScope,
    ) -> Result<SessionProgress, SessionError> {
        let run_token = guard.token.clone();
        let result = self.submit_and_watch(scenes, options, scope, &run_token).await;
        guard.settled = true;
        result
    }

    async fn submit_and_watch(
        &self,
        scenes: Vec<SceneRecord>,
        options: BatchOptions,
        scope: RunScope,
        run_token: &CancellationToken,
    ) -> Result<SessionProgress, SessionError> {
        if let RunScope::Batch = scope {
            let started = SessionProgress::started(scenes.len());
            self.progress.send_replace(started);
            self.events.publish(SessionEvent::progress(started));
        }

        let handle = match self.submitter.submit_batch(&scenes, &options).await {
            Ok(handle) => handle,
            Err(e) => {
                self.settle_failure(&scope, e.to_string());
                return Err(e.into());
            }
        };

        let styles = scenes.iter().map(|s| {
            let style = options
                .style
                .clone()
                .unwrap_or_else(|| s.generation.style.style_id.clone());
            (s.id.clone(), style)
        });
        let mut job = GenerationJob::new(
            handle.clone(),
            scenes.iter().map(|s| s.id.clone()).collect(),
        )
        .with_styles(styles);

        if run_token.is_cancelled() {
            return Err(self.settle_cancelled(&scope, &mut job));
        }
        self.transition(SessionState::Polling);

        let (update_tx, mut updates) = mpsc::unbounded_channel();
        let (tx, mut rx) = oneshot::channel();
        let watcher = self.poller.watch(
            handle,
            self.poll_interval,
            move |snapshot: &JobStatusSnapshot| {
                let _ = update_tx.send(snapshot.clone());
            },
            move |outcome| {
                let _ = tx.send(outcome);
            },
        );

        // Updates are sent before the outcome, so draining them first keeps
        // every snapshot ahead of settlement.
        let end = loop {
            tokio::select! {
                biased;
                _ = run_token.cancelled() => {
                    watcher.cancel();
                    break RunEnd::Cancelled;
                }
                Some(snapshot) = updates.recv() => {
                    job.observe(&snapshot);
                    self.report_progress(&scope, &job, &snapshot);
                }
                outcome = &mut rx => break match outcome {
                    Ok(outcome) => RunEnd::Finished(outcome),
                    Err(_) => RunEnd::Lost,
                },
            }
        };

        match end {
            RunEnd::Finished(WatchOutcome::Terminal(snapshot)) => {
                job.observe(&snapshot);
                match snapshot.state {
                    JobState::Completed => Ok(self.settle_success(&scope, &job, &snapshot).await),
                    JobState::Cancelled => Err(self.settle_cancelled(&scope, &mut job)),
                    _ => {
                        let reason = snapshot
                            .error
                            .clone()
                            .unwrap_or_else(|| "backend reported failure".to_string());
                        self.settle_failure(&scope, reason.clone());
                        Err(SessionError::JobFailed(reason))
                    }
                }
            }
            RunEnd::Finished(WatchOutcome::Abandoned(e)) => {
                self.settle_failure(&scope, e.to_string());
                Err(SessionError::JobFailed(e.to_string()))
            }
            RunEnd::Cancelled => Err(self.settle_cancelled(&scope, &mut job)),
            RunEnd::Lost => {
                let reason = "status tracking stopped unexpectedly".to_string();
                self.settle_failure(&scope, reason.clone());
                Err(SessionError::JobFailed(reason))
            }
        }
    }

    /// Record outputs, autosave once, and return to `Idle`.
    async fn settle_success(
        &self,
        scope: &RunScope,
        job: &GenerationJob,
        snapshot: &JobStatusSnapshot,
    ) -> SessionProgress {
        let generated_at = chrono::Utc::now();
        {
            let mut store = self.store.write().await;
            for scene_id in &job.scene_ids {
                let Some(scene) = store.get_mut(scene_id) else {
                    tracing::warn!(scene_id = %scene_id, "Scene removed during generation");
                    continue;
                };
                let image = snapshot.image_for(scene_id).map(str::to_string);
                scene.output = Some(SceneOutput {
                    final_image: image.clone(),
                    generated_at,
                    style_id: job.style_for(scene_id).unwrap_or_default().to_string(),
                    task_id: job.handle.task_id.clone(),
                });
                self.events.publish(SessionEvent::new(SessionEventKind::SceneGenerated {
                    scene_id: scene_id.clone(),
                    image,
                }));
            }
        }

        if let RunScope::Batch = scope {
            self.progress.send_modify(|p| p.complete());
            self.events.publish(SessionEvent::progress(self.progress()));
        }

        self.transition(SessionState::Completed);
        self.autosave_after(job).await;

        let message = match scope {
            RunScope::Batch => format!("Generated {} scenes", job.scene_ids.len()),
            RunScope::Scene(id) => format!("Scene {id} generated"),
        };
        tracing::info!(task_id = %job.handle, scene_count = job.scene_ids.len(), "Generation completed");
        self.events.notify(Notification::success(message));

        self.transition(SessionState::Idle);
        self.progress()
    }

    /// Surface the failure and return to `Idle`. No retry.
    fn settle_failure(&self, scope: &RunScope, reason: String) {
        if let RunScope::Batch = scope {
            self.progress.send_modify(|p| p.stop());
            self.events.publish(SessionEvent::progress(self.progress()));
        }
        tracing::error!(error = %reason, "Generation failed");
        self.transition(SessionState::Failed);
        self.events
            .notify(Notification::error(format!("Generation failed: {reason}")));
        self.transition(SessionState::Idle);
    }

    fn settle_cancelled(&self, scope: &RunScope, job: &mut GenerationJob) -> SessionError {
        job.cancel();
        if let RunScope::Batch = scope {
            self.progress.send_modify(|p| p.stop());
            self.events.publish(SessionEvent::progress(self.progress()));
        }
        tracing::info!(
            task_id = %job.handle,
            progress = job.progress_percent,
            "Generation cancelled",
        );
        self.events.notify(Notification::info("Generation cancelled"));
        self.transition(SessionState::Idle);
        SessionError::Cancelled
    }

    /// Best-effort autosave; failures are logged only.
    async fn autosave_after(&self, job: &GenerationJob) {
        let request = AutosaveRequest::generation_complete(
            self.project_id.clone(),
            format!("Generated {} scene(s)", job.scene_ids.len()),
            job.scene_ids.clone(),
        );
        if let Err(e) = self.autosave.autosave(&request).await {
            tracing::warn!(task_id = %job.handle, error = %e, "Autosave failed");
        }
    }
}

/// Holds the session for one claimed run.
///
/// If it is dropped before the run settled, for example because the caller
/// gave up on the future, the watch is cancelled and the session returns
/// to `Idle`.
struct RunGuard<'a, S: SceneStore> {
    session: &'a SessionOrchestrator<S>,
    id: u64,
    token: CancellationToken,
    batch: bool,
    settled: bool,
}

impl<S: SceneStore> Drop for RunGuard<'_, S> {
    fn drop(&mut self) {
        {
            let mut active = self
                .session
                .active_run
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if active.as_ref().is_some_and(|run| run.id == self.id) {
                *active = None;
            }
        }
        if self.settled {
            return;
        }

        self.token.cancel();
        tracing::warn!(run_id = self.id, "Generation abandoned before it finished");
        if self.batch {
            self.session.progress.send_modify(|p| p.stop());
            self.session
                .events
                .publish(SessionEvent::progress(*self.session.progress.borrow()));
        }
        let from = self.session.state.send_replace(SessionState::Idle);
        if !from.is_idle() {
            self.session
                .events
                .publish(SessionEvent::state_changed(from, SessionState::Idle));
        }
    }
}
