//! Domain types for the Madsea scene generation session.
//!
//! This crate has no internal dependencies so the backend client, the
//! session orchestrator, and any presentation adapter can share it.

pub mod broadcast;
pub mod catalog;
pub mod error;
pub mod job;
pub mod scene;
pub mod state;
pub mod store;
pub mod types;
