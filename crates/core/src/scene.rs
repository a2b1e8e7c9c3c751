//! Scene records and their parameter sub-objects.
//!
//! A [`SceneRecord`] is one storyboard panel: the immutable extraction
//! input, the mutable generation and animation parameters, and the output
//! artifact once a generation job has succeeded.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::catalog::{ModelCatalog, ModelCategory};
use crate::error::CoreError;
use crate::types::{SceneId, Timestamp};

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// Style strength applied to freshly imported scenes.
pub const DEFAULT_STYLE_STRENGTH: f64 = 0.8;

/// Clip duration used when extraction did not provide one.
pub const DEFAULT_CLIP_DURATION_SECS: f64 = 5.0;

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

/// Fields produced by storyboard extraction. Never modified afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneInput {
    /// Path of the extracted panel image.
    #[serde(default)]
    pub reference_image: Option<String>,
    #[serde(default)]
    pub prompt_text: String,
    /// Camera movement hint, e.g. `static` or `pan-left`.
    #[serde(default)]
    pub camera_movement: Option<String>,
    #[serde(default)]
    pub duration_seconds: Option<f64>,
}

// ---------------------------------------------------------------------------
// Generation parameters
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct StyleParams {
    /// Style or LoRA identifier. Empty until a style is selected.
    pub style_id: String,
    #[validate(range(min = 0.0, max = 1.0))]
    pub strength: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct ControlNetParams {
    #[validate(length(min = 1))]
    pub model: String,
    #[serde(default)]
    pub reference_image: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CloudFallback {
    pub enabled: bool,
    #[serde(default)]
    pub provider: String,
}

/// Snapshot of everything the image backend needs for one scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct GenerationParams {
    /// Base model identifier, e.g. `sd15`.
    #[validate(length(min = 1))]
    pub model: String,
    #[validate(nested)]
    pub controlnet: ControlNetParams,
    #[validate(nested)]
    pub style: StyleParams,
    pub fallback_cloud: CloudFallback,
}

// ---------------------------------------------------------------------------
// Animation parameters
// ---------------------------------------------------------------------------

/// Transition into the next clip during video assembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transition {
    #[default]
    Crossfade,
    Fade,
    Wipe,
    Zoom,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnimationParams {
    /// Local AnimateDiff pass enabled.
    pub animate_diff: bool,
    /// Cloud animation providers enabled as fallbacks (e.g. `runway`, `kling`).
    #[serde(default)]
    pub cloud_providers: BTreeSet<String>,
    #[serde(default)]
    pub transition: Transition,
    pub clip_duration_secs: f64,
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneOutput {
    /// URL or path of the generated frame, when the backend reported one.
    #[serde(default)]
    pub final_image: Option<String>,
    pub generated_at: Timestamp,
    /// Style the scene was submitted with.
    pub style_id: String,
    /// Backend task that produced this output.
    pub task_id: String,
}

// ---------------------------------------------------------------------------
// Overrides
// ---------------------------------------------------------------------------

/// Parameter groups a global broadcast can overwrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamGroup {
    Style,
    Model,
    CloudFallback,
    Animation,
}

/// Groups the user customised on this scene individually.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ParamOverrides {
    #[serde(default)]
    pub style: bool,
    #[serde(default)]
    pub model: bool,
    #[serde(default)]
    pub cloud_fallback: bool,
    #[serde(default)]
    pub animation: bool,
}

impl ParamOverrides {
    pub fn is_pinned(&self, group: ParamGroup) -> bool {
        match group {
            ParamGroup::Style => self.style,
            ParamGroup::Model => self.model,
            ParamGroup::CloudFallback => self.cloud_fallback,
            ParamGroup::Animation => self.animation,
        }
    }

    pub fn pin(&mut self, group: ParamGroup) {
        match group {
            ParamGroup::Style => self.style = true,
            ParamGroup::Model => self.model = true,
            ParamGroup::CloudFallback => self.cloud_fallback = true,
            ParamGroup::Animation => self.animation = true,
        }
    }
}

// ---------------------------------------------------------------------------
// SceneRecord
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneRecord {
    #[serde(rename = "scene_id")]
    pub id: SceneId,
    pub input: SceneInput,
    pub generation: GenerationParams,
    pub animation: AnimationParams,
    /// `None` until a job for this scene completes successfully.
    #[serde(default)]
    pub output: Option<SceneOutput>,
    #[serde(default)]
    pub overrides: ParamOverrides,
}

/// A scene as delivered by extraction or read back from an exported
/// session: parameter blocks may be missing and are filled with defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractedScene {
    pub scene_id: SceneId,
    pub input: SceneInput,
    #[serde(default)]
    pub generation: Option<GenerationParams>,
    #[serde(default)]
    pub animation: Option<AnimationParams>,
    #[serde(default)]
    pub output: Option<SceneOutput>,
    #[serde(default)]
    pub overrides: ParamOverrides,
}

impl SceneRecord {
    /// Build a record from extraction output, filling absent parameter
    /// blocks from the catalog defaults.
    pub fn from_extracted(
        scene: ExtractedScene,
        catalog: &ModelCatalog,
    ) -> Result<Self, CoreError> {
        let generation = match scene.generation {
            Some(g) => g,
            None => GenerationParams {
                model: catalog
                    .default_model(ModelCategory::StableDiffusion)?
                    .id
                    .clone(),
                controlnet: ControlNetParams {
                    model: catalog.default_model(ModelCategory::ControlNet)?.id.clone(),
                    reference_image: scene.input.reference_image.clone(),
                },
                style: StyleParams {
                    style_id: String::new(),
                    strength: DEFAULT_STYLE_STRENGTH,
                },
                fallback_cloud: CloudFallback::default(),
            },
        };

        let animation = scene.animation.unwrap_or_else(|| AnimationParams {
            animate_diff: true,
            cloud_providers: BTreeSet::new(),
            transition: Transition::Crossfade,
            clip_duration_secs: scene
                .input
                .duration_seconds
                .unwrap_or(DEFAULT_CLIP_DURATION_SECS),
        });

        Ok(Self {
            id: scene.scene_id,
            input: scene.input,
            generation,
            animation,
            output: scene.output,
            overrides: scene.overrides,
        })
    }

    /// Merge a per-scene edit. Only fields present in `patch` change.
    ///
    /// When `pin` is set, every group the patch touches is marked as a
    /// per-scene override.
    pub fn apply_patch(&mut self, patch: &SceneParamsPatch, pin: bool) {
        let mut touched = Vec::new();

        if let Some(g) = &patch.generation {
            if let Some(model) = &g.model {
                self.generation.model = model.clone();
                touched.push(ParamGroup::Model);
            }
            if let Some(model) = &g.controlnet_model {
                self.generation.controlnet.model = model.clone();
                touched.push(ParamGroup::Model);
            }
            if let Some(reference) = &g.controlnet_reference {
                self.generation.controlnet.reference_image = Some(reference.clone());
            }
            if let Some(style_id) = &g.style_id {
                self.generation.style.style_id = style_id.clone();
                touched.push(ParamGroup::Style);
            }
            if let Some(strength) = g.style_strength {
                self.generation.style.strength = strength;
                touched.push(ParamGroup::Style);
            }
            if let Some(enabled) = g.fallback_enabled {
                self.generation.fallback_cloud.enabled = enabled;
                touched.push(ParamGroup::CloudFallback);
            }
            if let Some(provider) = &g.fallback_provider {
                self.generation.fallback_cloud.provider = provider.clone();
                touched.push(ParamGroup::CloudFallback);
            }
        }

        if let Some(a) = &patch.animation {
            if let Some(enabled) = a.animate_diff {
                self.animation.animate_diff = enabled;
            }
            if let Some(providers) = &a.cloud_providers {
                self.animation.cloud_providers = providers.clone();
            }
            if let Some(transition) = a.transition {
                self.animation.transition = transition;
            }
            if let Some(duration) = a.clip_duration_secs {
                self.animation.clip_duration_secs = duration;
            }
            if a.animate_diff.is_some()
                || a.cloud_providers.is_some()
                || a.transition.is_some()
                || a.clip_duration_secs.is_some()
            {
                touched.push(ParamGroup::Animation);
            }
        }

        if pin {
            for group in touched {
                self.overrides.pin(group);
            }
        }
    }

    /// Check the generation parameters are complete enough to submit.
    pub fn validate_for_submission(&self) -> Result<(), CoreError> {
        self.generation.validate()?;
        if self.animation.clip_duration_secs <= 0.0 || !self.animation.clip_duration_secs.is_finite()
        {
            return Err(CoreError::Validation(format!(
                "clip duration for scene {} must be positive",
                self.id
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Patches
// ---------------------------------------------------------------------------

/// Partial update for a single scene's parameters.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SceneParamsPatch {
    #[serde(default)]
    pub generation: Option<GenerationPatch>,
    #[serde(default)]
    pub animation: Option<AnimationPatch>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenerationPatch {
    pub model: Option<String>,
    pub controlnet_model: Option<String>,
    pub controlnet_reference: Option<String>,
    pub style_id: Option<String>,
    pub style_strength: Option<f64>,
    pub fallback_enabled: Option<bool>,
    pub fallback_provider: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnimationPatch {
    pub animate_diff: Option<bool>,
    pub cloud_providers: Option<BTreeSet<String>>,
    pub transition: Option<Transition>,
    pub clip_duration_secs: Option<f64>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
