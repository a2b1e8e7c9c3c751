//! Wire types for the generation backend.
//!
//! Task-level documents use camelCase keys (`taskId`, `completedScenes`);
//! scene parameter blocks keep the snake_case layout of [`SceneRecord`].

use madsea_core::job::{JobState, JobStatusSnapshot, SceneResult};
use madsea_core::scene::{AnimationParams, GenerationParams, SceneRecord};
use madsea_core::types::SceneId;
use serde::{Deserialize, Serialize};

/// Seed value asking the backend to pick a random seed.
pub const RANDOM_SEED: i64 = -1;

// ---------------------------------------------------------------------------
// POST /generate
// ---------------------------------------------------------------------------

/// Parameter snapshot of one scene inside a generation request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SceneSnapshot {
    pub scene_id: SceneId,
    pub prompt_text: String,
    pub reference_image: Option<String>,
    pub camera_movement: Option<String>,
    pub generation: GenerationParams,
    pub animation: AnimationParams,
}

impl From<&SceneRecord> for SceneSnapshot {
    fn from(scene: &SceneRecord) -> Self {
        Self {
            scene_id: scene.id.clone(),
            prompt_text: scene.input.prompt_text.clone(),
            reference_image: scene.input.reference_image.clone(),
            camera_movement: scene.input.camera_movement.clone(),
            generation: scene.generation.clone(),
            animation: scene.animation.clone(),
        }
    }
}

/// Body of `POST /generate`. One request covers the whole batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    /// Identifies this client session to the backend.
    pub client_id: String,
    pub project_id: Option<String>,
    pub episode_id: Option<String>,
    /// Globally selected style, if any.
    pub style: Option<String>,
    pub strength: Option<f64>,
    pub seed: i64,
    pub scenes: Vec<SceneSnapshot>,
}

/// Response of `POST /generate`: either a task id or an error string.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum GenerateResponse {
    Accepted {
        #[serde(rename = "taskId", alias = "task_id", alias = "prompt_id")]
        task_id: String,
    },
    Rejected {
        error: String,
    },
}

// ---------------------------------------------------------------------------
// GET /tasks/{task_id}/status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireSceneResult {
    #[serde(alias = "scene_id")]
    pub scene_id: SceneId,
    #[serde(default, alias = "image_url", alias = "url")]
    pub image_url: Option<String>,
}

/// Body of the task status endpoint.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub status: JobState,
    /// Percentage, 0-100. Some backends send fractional values.
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub completed_scenes: usize,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub results: Vec<WireSceneResult>,
}

impl From<StatusResponse> for JobStatusSnapshot {
    fn from(wire: StatusResponse) -> Self {
        // NaN saturates to 0.
        let percent = wire.progress.clamp(0.0, 100.0).round() as u8;
        let results = wire
            .results
            .into_iter()
            .map(|r| SceneResult {
                scene_id: r.scene_id,
                image_url: r.image_url,
            })
            .collect();

        let snapshot =
            JobStatusSnapshot::new(wire.status, percent, wire.completed_scenes).with_results(results);
        match wire.error {
            Some(error) => snapshot.with_error(error),
            None => snapshot,
        }
    }
}

// ---------------------------------------------------------------------------
// POST /autosave
// ---------------------------------------------------------------------------

/// Trigger value sent when a generation run completes.
pub const AUTOSAVE_TRIGGER_GENERATION_COMPLETE: &str = "generation_complete";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AutosaveRequest {
    pub project_id: Option<String>,
    pub description: String,
    pub trigger: String,
    pub changes: Vec<String>,
}

impl AutosaveRequest {
    /// Autosave issued after a successful generation run.
    pub fn generation_complete(
        project_id: Option<String>,
        description: impl Into<String>,
        changes: Vec<String>,
    ) -> Self {
        Self {
            project_id,
            description: description.into(),
            trigger: AUTOSAVE_TRIGGER_GENERATION_COMPLETE.to_string(),
            changes,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepted_response() {
        let msg: GenerateResponse = serde_json::from_str(r#"{"taskId":"t1"}"#).unwrap();
        assert_eq!(
            msg,
            GenerateResponse::Accepted {
                task_id: "t1".into()
            }
        );
    }

    #[test]
    fn parse_rejected_response() {
        let msg: GenerateResponse =
            serde_json::from_str(r#"{"success":false,"error":"no GPU"}"#).unwrap();
        assert_eq!(
            msg,
            GenerateResponse::Rejected {
                error: "no GPU".into()
            }
        );
    }

    #[test]
    fn parse_response_without_either_key_fails() {
        assert!(serde_json::from_str::<GenerateResponse>(r#"{"ok":true}"#).is_err());
    }

    #[test]
    fn status_running_converts_to_snapshot() {
        let wire: StatusResponse =
            serde_json::from_str(r#"{"status":"running","progress":33.4,"completedScenes":1}"#)
                .unwrap();
        let snapshot = JobStatusSnapshot::from(wire);
        assert_eq!(snapshot.state, JobState::Running);
        assert_eq!(snapshot.progress_percent, 33);
        assert_eq!(snapshot.completed_scenes, 1);
        assert!(snapshot.error.is_none());
    }

    #[test]
    fn status_pending_maps_to_submitted() {
        let wire: StatusResponse = serde_json::from_str(r#"{"status":"pending"}"#).unwrap();
        let snapshot = JobStatusSnapshot::from(wire);
        assert_eq!(snapshot.state, JobState::Submitted);
        assert_eq!(snapshot.progress_percent, 0);
    }

    #[test]
    fn status_failed_carries_error() {
        let wire: StatusResponse =
            serde_json::from_str(r#"{"status":"failed","progress":50,"error":"OOM"}"#).unwrap();
        let snapshot = JobStatusSnapshot::from(wire);
        assert_eq!(snapshot.state, JobState::Failed);
        assert_eq!(snapshot.error.as_deref(), Some("OOM"));
    }

    #[test]
    fn status_results_are_mapped() {
        let wire: StatusResponse = serde_json::from_str(
            r#"{"status":"completed","progress":100,"completedScenes":1,
                "results":[{"sceneId":"s1","imageUrl":"/out/s1.png"}]}"#,
        )
        .unwrap();
        let snapshot = JobStatusSnapshot::from(wire);
        assert_eq!(snapshot.image_for("s1"), Some("/out/s1.png"));
    }

    #[test]
    fn progress_out_of_range_is_clamped() {
        let wire: StatusResponse =
            serde_json::from_str(r#"{"status":"running","progress":140}"#).unwrap();
        assert_eq!(JobStatusSnapshot::from(wire).progress_percent, 100);
    }

    #[test]
    fn unknown_status_is_rejected() {
        assert!(serde_json::from_str::<StatusResponse>(r#"{"status":"exploded"}"#).is_err());
    }

    #[test]
    fn autosave_request_uses_generation_trigger() {
        let req = AutosaveRequest::generation_complete(Some("p1".into()), "after run", vec![]);
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["trigger"], "generation_complete");
        assert_eq!(json["projectId"], "p1");
    }
}
