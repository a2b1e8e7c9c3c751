//! Generation request submission.
//!
//! [`JobSubmissionClient`] turns scene records into a
//! [`GenerateRequest`] and hands it to the backend. It performs exactly
//! one outbound call per invocation and never retries.

use std::sync::Arc;

use madsea_core::job::JobHandle;
use madsea_core::scene::SceneRecord;

use crate::api::GenerationBackend;
use crate::error::SubmissionError;
use crate::messages::{GenerateRequest, SceneSnapshot, RANDOM_SEED};

/// Batch-wide options sent alongside the scene snapshots.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchOptions {
    pub project_id: Option<String>,
    pub episode_id: Option<String>,
    pub style: Option<String>,
    pub strength: Option<f64>,
    /// `None` lets the backend pick a random seed.
    pub seed: Option<i64>,
}

pub struct JobSubmissionClient {
    backend: Arc<dyn GenerationBackend>,
    client_id: String,
}

impl JobSubmissionClient {
    /// Create a client with a fresh session `client_id` (UUID v4).
    pub fn new(backend: Arc<dyn GenerationBackend>) -> Self {
        Self {
            backend,
            client_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Identifier sent with every request from this client.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Submit a single scene.
    pub async fn submit(&self, scene: &SceneRecord) -> Result<JobHandle, SubmissionError> {
        let options = BatchOptions {
            style: Some(scene.generation.style.style_id.clone()).filter(|s| !s.is_empty()),
            strength: Some(scene.generation.style.strength),
            ..Default::default()
        };
        self.submit_batch(std::slice::from_ref(scene), &options)
            .await
    }

    /// Submit every scene in `scenes` as one backend task.
    pub async fn submit_batch(
        &self,
        scenes: &[SceneRecord],
        options: &BatchOptions,
    ) -> Result<JobHandle, SubmissionError> {
        let request = self.build_request(scenes, options)?;

        tracing::info!(
            client_id = %self.client_id,
            scene_count = scenes.len(),
            style = options.style.as_deref().unwrap_or(""),
            "Submitting generation request",
        );

        match self.backend.submit(&request).await {
            Ok(handle) => {
                tracing::info!(task_id = %handle, "Generation request accepted");
                Ok(handle)
            }
            Err(e) => {
                tracing::error!(error = %e, "Generation request failed");
                Err(e)
            }
        }
    }

    /// Validate `scenes` and serialize them into a request body.
    pub fn build_request(
        &self,
        scenes: &[SceneRecord],
        options: &BatchOptions,
    ) -> Result<GenerateRequest, SubmissionError> {
        if scenes.is_empty() {
            return Err(SubmissionError::InvalidParams(
                "no scenes to generate".to_string(),
            ));
        }
        for scene in scenes {
            scene
                .validate_for_submission()
                .map_err(|e| SubmissionError::InvalidParams(format!("scene {}: {e}", scene.id)))?;
        }

        Ok(GenerateRequest {
            client_id: self.client_id.clone(),
            project_id: options.project_id.clone(),
            episode_id: options.episode_id.clone(),
            style: options.style.clone(),
            strength: options.strength,
            seed: options.seed.unwrap_or(RANDOM_SEED),
            scenes: scenes.iter().map(SceneSnapshot::from).collect(),
        })
    }
}
