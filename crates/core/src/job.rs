//! Generation job tracking and session progress.
//!
//! The backend owns the real job; the types here are the client-side view
//! of it. Progress reported by the backend is not guaranteed to be
//! monotonic, so both [`GenerationJob`] and [`SessionProgress`] clamp
//! incoming values to never move backwards.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{SceneId, Timestamp};

// ---------------------------------------------------------------------------
// Job state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Accepted by the backend, not started yet.
    #[serde(alias = "pending", alias = "queued")]
    Submitted,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    /// No further transition occurs from a terminal state.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Submitted => "submitted",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Handles and snapshots
// ---------------------------------------------------------------------------

/// Opaque task identifier returned by the backend on submission.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobHandle {
    pub task_id: String,
}

impl JobHandle {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
        }
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.task_id)
    }
}

/// Generated artifact for one scene of a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneResult {
    pub scene_id: SceneId,
    pub image_url: Option<String>,
}

/// One status observation of a backend job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusSnapshot {
    pub state: JobState,
    /// 0-100, as reported by the backend.
    pub progress_percent: u8,
    pub completed_scenes: usize,
    pub error: Option<String>,
    #[serde(default)]
    pub results: Vec<SceneResult>,
}

impl JobStatusSnapshot {
    pub fn new(state: JobState, progress_percent: u8, completed_scenes: usize) -> Self {
        Self {
            state,
            progress_percent: progress_percent.min(100),
            completed_scenes,
            error: None,
            results: Vec::new(),
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_results(mut self, results: Vec<SceneResult>) -> Self {
        self.results = results;
        self
    }

    /// Image reported for `scene_id`, if any.
    pub fn image_for(&self, scene_id: &str) -> Option<&str> {
        self.results
            .iter()
            .find(|r| r.scene_id == scene_id)
            .and_then(|r| r.image_url.as_deref())
    }
}

// ---------------------------------------------------------------------------
// GenerationJob
// ---------------------------------------------------------------------------

/// Client-side record of one submitted job.
///
/// Dropped once its terminal state has been propagated to the scenes.
#[derive(Debug, Clone)]
pub struct GenerationJob {
    pub handle: JobHandle,
    /// Scenes covered by this job. The job does not own them.
    pub scene_ids: Vec<SceneId>,
    /// Style each scene was submitted with.
    pub styles: BTreeMap<SceneId, String>,
    pub state: JobState,
    pub progress_percent: u8,
    pub submitted_at: Timestamp,
}

impl GenerationJob {
    pub fn new(handle: JobHandle, scene_ids: Vec<SceneId>) -> Self {
        Self {
            handle,
            scene_ids,
            styles: BTreeMap::new(),
            state: JobState::Submitted,
            progress_percent: 0,
            submitted_at: chrono::Utc::now(),
        }
    }

    pub fn with_styles(mut self, styles: impl IntoIterator<Item = (SceneId, String)>) -> Self {
        self.styles = styles.into_iter().collect();
        self
    }

    /// Style `scene_id` was submitted with, if it is part of this job.
    pub fn style_for(&self, scene_id: &str) -> Option<&str> {
        self.styles.get(scene_id).map(String::as_str)
    }

    /// Record a status observation.
    ///
    /// Observations after a terminal state are ignored. Progress never
    /// decreases.
    pub fn observe(&mut self, snapshot: &JobStatusSnapshot) {
        if self.state.is_terminal() {
            return;
        }
        self.state = snapshot.state;
        self.progress_percent = self
            .progress_percent
            .max(snapshot.progress_percent.min(100));
        if self.state == JobState::Completed {
            self.progress_percent = 100;
        }
    }

    /// Mark the job cancelled locally, unless it already finished.
    pub fn cancel(&mut self) {
        if !self.state.is_terminal() {
            self.state = JobState::Cancelled;
        }
    }
}

// ---------------------------------------------------------------------------
// SessionProgress
// ---------------------------------------------------------------------------

/// Aggregate progress of one "generate all" run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionProgress {
    pub total_scenes: usize,
    pub completed_scenes: usize,
    pub is_generating: bool,
    pub progress_percent: u8,
}

impl SessionProgress {
    /// Fresh progress for a run over `total_scenes`.
    pub fn started(total_scenes: usize) -> Self {
        Self {
            total_scenes,
            completed_scenes: 0,
            is_generating: true,
            progress_percent: 0,
        }
    }

    /// Fold in a status observation, clamping so that neither counter
    /// moves backwards nor past its ceiling.
    pub fn apply(&mut self, snapshot: &JobStatusSnapshot) {
        let completed = snapshot.completed_scenes.min(self.total_scenes);
        self.completed_scenes = self.completed_scenes.max(completed);
        self.progress_percent = self
            .progress_percent
            .max(snapshot.progress_percent.min(100));
    }

    /// The run finished successfully.
    pub fn complete(&mut self) {
        self.completed_scenes = self.total_scenes;
        self.progress_percent = 100;
        self.is_generating = false;
    }

    /// The run ended without success; counters keep their last value.
    pub fn stop(&mut self) {
        self.is_generating = false;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
