//! Shared fixtures for session integration tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use madsea_backend::api::{AutosaveHook, GenerationBackend};
use madsea_backend::error::{AutosaveError, CatalogError, PollError, SubmissionError};
use madsea_backend::messages::{AutosaveRequest, GenerateRequest};
use madsea_core::broadcast::OverridePolicy;
use madsea_core::catalog::CatalogEntry;
use madsea_core::job::{JobHandle, JobState, JobStatusSnapshot, SceneResult};
use madsea_events::{EventBus, SessionEvent};
use madsea_session::{SessionConfig, SessionOrchestrator};
use tokio::sync::{broadcast, Notify};

// ---------------------------------------------------------------------------
// Scripted generation backend
// ---------------------------------------------------------------------------

/// Answers submissions with a fixed result and replays a status script.
/// The last scripted status repeats once the script is drained.
pub struct ScriptedBackend {
    submit_result: Result<JobHandle, SubmissionError>,
    script: Mutex<VecDeque<Result<JobStatusSnapshot, PollError>>>,
    catalogs: Result<Vec<CatalogEntry>, CatalogError>,
    pub requests: Mutex<Vec<GenerateRequest>>,
    status_calls: AtomicU32,
    /// When set, each submission waits for a permit first.
    submit_gate: Option<Arc<Notify>>,
    /// When set, each status call waits for a permit first.
    status_gate: Option<Arc<Notify>>,
}

impl ScriptedBackend {
    fn build(
        submit_result: Result<JobHandle, SubmissionError>,
        script: Vec<Result<JobStatusSnapshot, PollError>>,
        catalogs: Result<Vec<CatalogEntry>, CatalogError>,
    ) -> Self {
        Self {
            submit_result,
            script: Mutex::new(script.into()),
            catalogs,
            requests: Mutex::new(Vec::new()),
            status_calls: AtomicU32::new(0),
            submit_gate: None,
            status_gate: None,
        }
    }

    pub fn accepting(
        task_id: &str,
        script: Vec<Result<JobStatusSnapshot, PollError>>,
    ) -> Arc<Self> {
        Arc::new(Self::build(Ok(JobHandle::new(task_id)), script, Ok(Vec::new())))
    }

    /// Like [`accepting`](Self::accepting), but submissions block on
    /// `submit_gate` and status calls on `status_gate`.
    pub fn gated(
        task_id: &str,
        script: Vec<Result<JobStatusSnapshot, PollError>>,
        submit_gate: Option<Arc<Notify>>,
        status_gate: Option<Arc<Notify>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            submit_gate,
            status_gate,
            ..Self::build(Ok(JobHandle::new(task_id)), script, Ok(Vec::new()))
        })
    }

    pub fn rejecting(error: SubmissionError) -> Arc<Self> {
        Arc::new(Self::build(Err(error), Vec::new(), Ok(Vec::new())))
    }

    pub fn with_catalogs(catalogs: Result<Vec<CatalogEntry>, CatalogError>) -> Arc<Self> {
        Arc::new(Self::build(Ok(JobHandle::new("unused")), Vec::new(), catalogs))
    }

    pub fn submit_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn status_calls(&self) -> u32 {
        self.status_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerationBackend for ScriptedBackend {
    async fn submit(&self, request: &GenerateRequest) -> Result<JobHandle, SubmissionError> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(gate) = &self.submit_gate {
            gate.notified().await;
        }
        self.submit_result.clone()
    }

    async fn fetch_status(&self, _job: &JobHandle) -> Result<JobStatusSnapshot, PollError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.status_gate {
            gate.notified().await;
        }
        let mut script = self.script.lock().unwrap();
        if script.len() > 1 {
            script.pop_front().unwrap()
        } else {
            script
                .front()
                .cloned()
                .unwrap_or_else(|| Err(PollError::Transport("no script".into())))
        }
    }

    async fn styles(&self) -> Result<Vec<CatalogEntry>, CatalogError> {
        self.catalogs.clone()
    }

    async fn lora_models(&self) -> Result<Vec<CatalogEntry>, CatalogError> {
        self.catalogs.clone()
    }
}

// ---------------------------------------------------------------------------
// Autosave collaborator
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct CountingAutosave {
    pub requests: Mutex<Vec<AutosaveRequest>>,
    fail: bool,
}

impl CountingAutosave {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            fail: true,
        })
    }

    pub fn count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl AutosaveHook for CountingAutosave {
    async fn autosave(&self, request: &AutosaveRequest) -> Result<(), AutosaveError> {
        self.requests.lock().unwrap().push(request.clone());
        if self.fail {
            Err(AutosaveError("disk full".into()))
        } else {
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

pub fn test_config(policy: OverridePolicy) -> SessionConfig {
    SessionConfig {
        poll_interval: Duration::from_millis(1),
        poll_max_failures: 3,
        poll_max_backoff: Duration::from_millis(4),
        project_id: Some("proj-1".into()),
        override_policy: policy,
        ..SessionConfig::default()
    }
}

pub fn orchestrator(
    backend: Arc<ScriptedBackend>,
    autosave: Arc<CountingAutosave>,
) -> Arc<SessionOrchestrator> {
    orchestrator_with_policy(backend, autosave, OverridePolicy::BroadcastWins)
}

pub fn orchestrator_with_policy(
    backend: Arc<ScriptedBackend>,
    autosave: Arc<CountingAutosave>,
    policy: OverridePolicy,
) -> Arc<SessionOrchestrator> {
    Arc::new(SessionOrchestrator::new(
        backend,
        autosave,
        Arc::new(EventBus::default()),
        &test_config(policy),
    ))
}

/// Extraction document with scenes `1..=n`.
pub fn storyboard(n: usize) -> String {
    let scenes: Vec<serde_json::Value> = (1..=n)
        .map(|i| {
            serde_json::json!({
                "scene_id": i.to_string(),
                "input": {
                    "reference_image": format!("uploads/panel_{i}.png"),
                    "prompt_text": format!("panel {i}"),
                }
            })
        })
        .collect();
    serde_json::json!({ "scenes": scenes }).to_string()
}

// ---------------------------------------------------------------------------
// Status snapshots
// ---------------------------------------------------------------------------

pub fn running(progress: u8, completed: usize) -> Result<JobStatusSnapshot, PollError> {
    Ok(JobStatusSnapshot::new(JobState::Running, progress, completed))
}

pub fn completed(scene_count: usize) -> Result<JobStatusSnapshot, PollError> {
    let results = (1..=scene_count)
        .map(|i| SceneResult {
            scene_id: i.to_string(),
            image_url: Some(format!("/outputs/t1/{i}.png")),
        })
        .collect();
    Ok(JobStatusSnapshot::new(JobState::Completed, 100, scene_count).with_results(results))
}

pub fn failed(reason: &str) -> Result<JobStatusSnapshot, PollError> {
    Ok(JobStatusSnapshot::new(JobState::Failed, 40, 0).with_error(reason))
}

pub fn transport() -> Result<JobStatusSnapshot, PollError> {
    Err(PollError::Transport("connection reset".into()))
}

/// Every event currently buffered on `rx`.
pub fn drain(rx: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
