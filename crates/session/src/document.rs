//! Session export and import documents.

use chrono::{DateTime, Utc};
use madsea_core::catalog::ModelCatalog;
use madsea_core::scene::{ExtractedScene, SceneRecord};
use serde::{Deserialize, Serialize};

use crate::error::SessionError;

/// Exported session: every scene with its parameters and outputs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionDocument {
    pub scenes: Vec<SceneRecord>,
    pub timestamp: DateTime<Utc>,
}

impl SessionDocument {
    pub fn new(scenes: Vec<SceneRecord>) -> Self {
        Self {
            scenes,
            timestamp: Utc::now(),
        }
    }

    pub fn to_json(&self) -> Result<String, SessionError> {
        serde_json::to_string_pretty(self).map_err(|e| SessionError::Import(e.to_string()))
    }
}

/// Incoming document. Scenes may come straight from extraction, without
/// parameter blocks.
#[derive(Debug, Deserialize)]
struct IncomingDocument {
    scenes: Vec<ExtractedScene>,
}

/// Parse a session document and fill missing parameters from `catalog`.
pub fn parse_session(json: &str, catalog: &ModelCatalog) -> Result<Vec<SceneRecord>, SessionError> {
    let doc: IncomingDocument =
        serde_json::from_str(json).map_err(|e| SessionError::Import(e.to_string()))?;

    doc.scenes
        .into_iter()
        .map(|scene| SceneRecord::from_extracted(scene, catalog).map_err(SessionError::from))
        .collect()
}
