//! Errors raised by the backend client layer.

/// Submitting a generation request failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmissionError {
    /// The backend answered but refused the request.
    #[error("Generation rejected by backend: {0}")]
    BackendRejected(String),

    /// The request never produced a usable answer (network, DNS, timeout).
    #[error("Transport error: {0}")]
    Transport(String),

    /// The scenes were not submittable as given.
    #[error("Invalid generation parameters: {0}")]
    InvalidParams(String),
}

/// A status check failed.
///
/// Every variant except [`PollError::Exhausted`] is transient: the poller
/// keeps polling.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PollError {
    /// The HTTP request itself failed.
    #[error("Status request failed: {0}")]
    Transport(String),

    /// The backend returned a non-2xx status code.
    #[error("Status endpoint error ({status}): {body}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// The response body was not a valid status document.
    #[error("Malformed status response: {0}")]
    Decode(String),

    /// Too many consecutive failures; the job is treated as lost.
    #[error("Gave up after {attempts} consecutive failed status checks: {last_error}")]
    Exhausted { attempts: u32, last_error: String },
}

/// The autosave side effect failed. Never fatal to a session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Autosave failed: {0}")]
pub struct AutosaveError(pub String);

/// Fetching a style or LoRA catalog failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
    #[error("Catalog request failed: {0}")]
    Transport(String),

    #[error("Catalog endpoint error ({status}): {body}")]
    Http { status: u16, body: String },
}
