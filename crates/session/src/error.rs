use madsea_backend::error::SubmissionError;
use madsea_core::error::CoreError;

/// The user must complete a selection before generating.
///
/// Recovered locally: surfaced as a warning notification, no state change.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SelectionError {
    #[error("No scenes to generate. Import a storyboard first.")]
    NoScenes,

    #[error("Please select a style before generating.")]
    StyleRequired,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Selection(#[from] SelectionError),

    /// Another generation is in flight. Nothing was submitted.
    #[error("Generation already in progress")]
    AlreadyInProgress,

    #[error("Scene not found: {0}")]
    SceneNotFound(String),

    #[error(transparent)]
    Submission(#[from] SubmissionError),

    /// The backend reported failure, or the job could no longer be tracked.
    #[error("Generation failed: {0}")]
    JobFailed(String),

    /// The run was cancelled before it finished.
    #[error("Generation cancelled")]
    Cancelled,

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Invalid session document: {0}")]
    Import(String),
}
