//! Madsea session event bus.
//!
//! - [`EventBus`]: in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`SessionEvent`]: state transitions, progress, and user-facing
//!   notifications emitted by the session orchestrator. A presentation
//!   layer renders purely from these.

pub mod bus;
pub mod notification;

pub use bus::{EventBus, SessionEvent, SessionEventKind};
pub use notification::{Notification, NotificationLevel};
