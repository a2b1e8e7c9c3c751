//! Global parameter selection.
//!
//! [`GenerationParameterResolver`] remembers the global selections and
//! broadcasts each one into every tracked scene as a [`BroadcastCommand`].
//! It never touches the network.

use std::collections::BTreeSet;

use madsea_core::broadcast::{BroadcastCommand, OverridePolicy};
use madsea_core::scene::Transition;
use madsea_core::store::SceneStore;

/// The most recent global selections.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GlobalSelection {
    /// Selected style or LoRA; `None` until the user picks one.
    pub style_id: Option<String>,
    pub style_strength: Option<f64>,
    pub base_model: Option<String>,
    pub controlnet_model: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct GenerationParameterResolver {
    selection: GlobalSelection,
    policy: OverridePolicy,
}

impl GenerationParameterResolver {
    pub fn new(policy: OverridePolicy) -> Self {
        Self {
            selection: GlobalSelection::default(),
            policy,
        }
    }

    pub fn policy(&self) -> OverridePolicy {
        self.policy
    }

    pub fn selection(&self) -> &GlobalSelection {
        &self.selection
    }

    /// The globally selected style, if any.
    pub fn selected_style(&self) -> Option<&str> {
        self.selection.style_id.as_deref()
    }

    /// Broadcast a style and its strength. Strength is clamped to `0.0..=1.0`.
    /// An empty `style_id` clears the global selection.
    pub fn apply_global_style(
        &mut self,
        store: &mut dyn SceneStore,
        style_id: &str,
        strength: f64,
    ) -> usize {
        let strength = if strength.is_finite() {
            strength.clamp(0.0, 1.0)
        } else {
            madsea_core::scene::DEFAULT_STYLE_STRENGTH
        };
        self.selection.style_id = Some(style_id.to_string()).filter(|s| !s.is_empty());
        self.selection.style_strength = Some(strength);
        self.broadcast(
            store,
            BroadcastCommand::Style {
                style_id: style_id.to_string(),
                strength,
            },
        )
    }

    /// Broadcast the base model and ControlNet model.
    pub fn apply_global_model(
        &mut self,
        store: &mut dyn SceneStore,
        base_model: &str,
        controlnet_model: &str,
    ) -> usize {
        self.selection.base_model = Some(base_model.to_string());
        self.selection.controlnet_model = Some(controlnet_model.to_string());
        self.broadcast(
            store,
            BroadcastCommand::Model {
                base_model: base_model.to_string(),
                controlnet_model: controlnet_model.to_string(),
            },
        )
    }

    pub fn apply_cloud_fallback(
        &mut self,
        store: &mut dyn SceneStore,
        enabled: bool,
        provider: &str,
    ) -> usize {
        self.broadcast(
            store,
            BroadcastCommand::CloudFallback {
                enabled,
                provider: provider.to_string(),
            },
        )
    }

    /// Broadcast animation settings. Per-scene clip durations are kept.
    pub fn apply_animation_settings(
        &mut self,
        store: &mut dyn SceneStore,
        local_enabled: bool,
        cloud_providers: BTreeSet<String>,
        transition: Transition,
    ) -> usize {
        self.broadcast(
            store,
            BroadcastCommand::Animation {
                local_enabled,
                cloud_providers,
                transition,
            },
        )
    }

    fn broadcast(&self, store: &mut dyn SceneStore, command: BroadcastCommand) -> usize {
        let updated = command.apply(store, self.policy);
        tracing::debug!(
            group = ?command.group(),
            updated,
            total = store.len(),
            "Applied global parameter broadcast",
        );
        updated
    }
}
