//! Global parameter broadcasts.
//!
//! A [`BroadcastCommand`] captures one global UI selection and writes it
//! into the matching parameter group of every scene in a [`SceneStore`].
//! Fields outside that group are left untouched.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::scene::{ParamGroup, SceneRecord, Transition};
use crate::store::SceneStore;

/// How a broadcast treats scenes the user customised individually.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverridePolicy {
    /// Every scene receives the broadcast value.
    #[default]
    BroadcastWins,
    /// Scenes with a pinned group keep their own value for that group.
    PreserveOverrides,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BroadcastCommand {
    Style {
        style_id: String,
        strength: f64,
    },
    Model {
        base_model: String,
        controlnet_model: String,
    },
    CloudFallback {
        enabled: bool,
        provider: String,
    },
    Animation {
        local_enabled: bool,
        cloud_providers: BTreeSet<String>,
        transition: Transition,
    },
}

impl BroadcastCommand {
    /// Parameter group this command overwrites.
    pub fn group(&self) -> ParamGroup {
        match self {
            BroadcastCommand::Style { .. } => ParamGroup::Style,
            BroadcastCommand::Model { .. } => ParamGroup::Model,
            BroadcastCommand::CloudFallback { .. } => ParamGroup::CloudFallback,
            BroadcastCommand::Animation { .. } => ParamGroup::Animation,
        }
    }

    /// Write this command's values into a single scene.
    pub fn apply_to(&self, scene: &mut SceneRecord) {
        match self {
            BroadcastCommand::Style { style_id, strength } => {
                scene.generation.style.style_id = style_id.clone();
                scene.generation.style.strength = *strength;
            }
            BroadcastCommand::Model {
                base_model,
                controlnet_model,
            } => {
                scene.generation.model = base_model.clone();
                scene.generation.controlnet.model = controlnet_model.clone();
            }
            BroadcastCommand::CloudFallback { enabled, provider } => {
                scene.generation.fallback_cloud.enabled = *enabled;
                scene.generation.fallback_cloud.provider = provider.clone();
            }
            BroadcastCommand::Animation {
                local_enabled,
                cloud_providers,
                transition,
            } => {
                // Clip duration stays per-scene.
                scene.animation.animate_diff = *local_enabled;
                scene.animation.cloud_providers = cloud_providers.clone();
                scene.animation.transition = *transition;
            }
        }
    }

    /// Apply to every scene in `store`. Returns the number of scenes updated.
    pub fn apply(&self, store: &mut dyn SceneStore, policy: OverridePolicy) -> usize {
        let group = self.group();
        let mut updated = 0;
        store.for_each_mut(&mut |scene: &mut SceneRecord| {
            if policy == OverridePolicy::PreserveOverrides && scene.overrides.is_pinned(group) {
                return;
            }
            self.apply_to(scene);
            updated += 1;
        });
        updated
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::tests::scene;
    use crate::store::InMemorySceneStore;

    fn store_of(n: usize) -> InMemorySceneStore {
        InMemorySceneStore::with_scenes((0..n).map(|i| scene(&i.to_string())).collect())
    }

    #[test]
    fn style_broadcast_touches_only_style() {
        let mut store = store_of(4);
        let before = store.snapshot();

        let cmd = BroadcastCommand::Style {
            style_id: "noir".into(),
            strength: 0.7,
        };
        let updated = cmd.apply(&mut store, OverridePolicy::BroadcastWins);

        assert_eq!(updated, 4);
        for (old, new) in before.iter().zip(store.snapshot()) {
            assert_eq!(new.generation.style.style_id, "noir");
            assert_eq!(new.generation.style.strength, 0.7);
            assert_eq!(new.generation.model, old.generation.model);
            assert_eq!(new.generation.controlnet, old.generation.controlnet);
            assert_eq!(new.animation, old.animation);
        }
    }

    #[test]
    fn model_broadcast_keeps_controlnet_reference() {
        let mut store = store_of(1);
        BroadcastCommand::Model {
            base_model: "sdxl".into(),
            controlnet_model: "lineart".into(),
        }
        .apply(&mut store, OverridePolicy::BroadcastWins);

        let s = store.get("0").unwrap();
        assert_eq!(s.generation.model, "sdxl");
        assert_eq!(s.generation.controlnet.model, "lineart");
        assert_eq!(
            s.generation.controlnet.reference_image.as_deref(),
            Some("uploads/0.png")
        );
    }

    #[test]
    fn animation_broadcast_keeps_clip_duration() {
        let mut store = store_of(1);
        store.get_mut("0").unwrap().animation.clip_duration_secs = 9.0;

        BroadcastCommand::Animation {
            local_enabled: false,
            cloud_providers: BTreeSet::from(["kling".to_string()]),
            transition: Transition::Zoom,
        }
        .apply(&mut store, OverridePolicy::BroadcastWins);

        let a = &store.get("0").unwrap().animation;
        assert!(!a.animate_diff);
        assert!(a.cloud_providers.contains("kling"));
        assert_eq!(a.transition, Transition::Zoom);
        assert_eq!(a.clip_duration_secs, 9.0);
    }

    #[test]
    fn broadcast_wins_overwrites_pinned_scenes() {
        let mut store = store_of(2);
        store.get_mut("1").unwrap().overrides.style = true;

        let updated = BroadcastCommand::Style {
            style_id: "ink".into(),
            strength: 0.5,
        }
        .apply(&mut store, OverridePolicy::BroadcastWins);

        assert_eq!(updated, 2);
        assert_eq!(store.get("1").unwrap().generation.style.style_id, "ink");
    }

    #[test]
    fn preserve_overrides_skips_pinned_group_only() {
        let mut store = store_of(2);
        {
            let pinned = store.get_mut("1").unwrap();
            pinned.overrides.style = true;
            pinned.generation.style.style_id = "custom".into();
        }

        let updated = BroadcastCommand::Style {
            style_id: "ink".into(),
            strength: 0.5,
        }
        .apply(&mut store, OverridePolicy::PreserveOverrides);
        assert_eq!(updated, 1);
        assert_eq!(store.get("0").unwrap().generation.style.style_id, "ink");
        assert_eq!(store.get("1").unwrap().generation.style.style_id, "custom");

        // A different group still reaches the pinned scene.
        let updated = BroadcastCommand::CloudFallback {
            enabled: true,
            provider: "dalle".into(),
        }
        .apply(&mut store, OverridePolicy::PreserveOverrides);
        assert_eq!(updated, 2);
    }

    #[test]
    fn empty_store_is_a_noop() {
        let mut store = InMemorySceneStore::new();
        let updated = BroadcastCommand::CloudFallback {
            enabled: true,
            provider: "dalle".into(),
        }
        .apply(&mut store, OverridePolicy::BroadcastWins);
        assert_eq!(updated, 0);
    }
}
