//! Client for the Madsea generation backend.
//!
//! Provides the wire types for batch submission and task status, the
//! [`GenerationBackend`](api::GenerationBackend) and
//! [`AutosaveHook`](api::AutosaveHook) seams with a `reqwest`
//! implementation, the submission client, and the cancellable status
//! poller.

pub mod api;
pub mod error;
pub mod messages;
pub mod poller;
pub mod submission;
