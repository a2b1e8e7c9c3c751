//! Madsea scene generation session.
//!
//! [`SessionOrchestrator`](orchestrator::SessionOrchestrator) drives the
//! "generate one" and "generate all" workflows over a scene store;
//! [`GenerationParameterResolver`](resolver::GenerationParameterResolver)
//! broadcasts global selections into that store.

pub mod config;
pub mod document;
pub mod error;
pub mod orchestrator;
pub mod resolver;

pub use config::{ConfigError, SessionConfig};
pub use document::SessionDocument;
pub use error::{SelectionError, SessionError};
pub use orchestrator::SessionOrchestrator;
pub use resolver::GenerationParameterResolver;
