//! Selectable generation options: base models, ControlNet models,
//! animation providers, and cloud image fallbacks.
//!
//! The built-in catalog mirrors the options the generation backend
//! understands. Styles and LoRA models are fetched from the backend at
//! session start and are represented by [`CatalogEntry`].

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Categories
// ---------------------------------------------------------------------------

/// A family of interchangeable options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelCategory {
    /// Stable Diffusion checkpoints.
    StableDiffusion,
    /// ControlNet conditioning models.
    ControlNet,
    /// Local and cloud animation providers.
    Animation,
    /// Cloud image-generation APIs used as a fallback.
    CloudApi,
}

impl ModelCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            ModelCategory::StableDiffusion => "stable_diffusion",
            ModelCategory::ControlNet => "control_net",
            ModelCategory::Animation => "animation",
            ModelCategory::CloudApi => "cloud_api",
        }
    }
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// One selectable option within a [`ModelCategory`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelOption {
    pub id: String,
    pub name: String,
    /// Whether this option is pre-selected for new scenes.
    #[serde(default)]
    pub default: bool,
    /// Runs on the local ComfyUI instance rather than a cloud API.
    #[serde(default)]
    pub local: bool,
}

impl ModelOption {
    fn new(id: &str, name: &str, default: bool, local: bool) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            default,
            local,
        }
    }
}

/// A style or LoRA model offered by the backend (`GET /styles`,
/// `GET /lora_models`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    #[serde(alias = "name")]
    pub id: String,
    #[serde(default, alias = "display_name")]
    pub display_name: String,
    #[serde(default)]
    pub is_custom: bool,
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

/// Default identifiers, exposed for callers that only need the id.
pub const DEFAULT_BASE_MODEL: &str = "sd15";
pub const DEFAULT_CONTROLNET_MODEL: &str = "scribble";
pub const DEFAULT_ANIMATION_MODEL: &str = "animatediff";

/// The set of selectable options, grouped by category.
#[derive(Debug, Clone)]
pub struct ModelCatalog {
    stable_diffusion: Vec<ModelOption>,
    control_net: Vec<ModelOption>,
    animation: Vec<ModelOption>,
    cloud_api: Vec<ModelOption>,
}

impl ModelCatalog {
    /// The options shipped with the application.
    pub fn builtin() -> Self {
        Self {
            stable_diffusion: vec![
                ModelOption::new(DEFAULT_BASE_MODEL, "Stable Diffusion 1.5", true, true),
                ModelOption::new("sdxl", "Stable Diffusion XL", false, true),
            ],
            control_net: vec![
                ModelOption::new(DEFAULT_CONTROLNET_MODEL, "Scribble", true, true),
                ModelOption::new("lineart", "Lineart", false, true),
            ],
            animation: vec![
                ModelOption::new(DEFAULT_ANIMATION_MODEL, "AnimateDiff", true, true),
                ModelOption::new("runway", "RunwayML Gen-2", false, false),
                ModelOption::new("kling", "Kling AI", false, false),
                ModelOption::new("veo2", "Veo2", false, false),
            ],
            cloud_api: vec![
                ModelOption::new("midjourney", "Midjourney API", false, false),
                ModelOption::new("dalle", "DALL-E API", false, false),
                ModelOption::new("tencent", "Tencent API", false, false),
                ModelOption::new("alibaba", "Alibaba API", false, false),
                ModelOption::new("google", "Google Studio API", false, false),
            ],
        }
    }

    /// Build a catalog from explicit option lists.
    pub fn new(
        stable_diffusion: Vec<ModelOption>,
        control_net: Vec<ModelOption>,
        animation: Vec<ModelOption>,
        cloud_api: Vec<ModelOption>,
    ) -> Self {
        Self {
            stable_diffusion,
            control_net,
            animation,
            cloud_api,
        }
    }

    /// All options in `category`, in display order.
    pub fn available_models(&self, category: ModelCategory) -> &[ModelOption] {
        match category {
            ModelCategory::StableDiffusion => &self.stable_diffusion,
            ModelCategory::ControlNet => &self.control_net,
            ModelCategory::Animation => &self.animation,
            ModelCategory::CloudApi => &self.cloud_api,
        }
    }

    /// The option flagged as default, or the first option when none is.
    ///
    /// Errors when the category has no options at all.
    pub fn default_model(&self, category: ModelCategory) -> Result<&ModelOption, CoreError> {
        let models = self.available_models(category);
        models
            .iter()
            .find(|m| m.default)
            .or_else(|| models.first())
            .ok_or_else(|| {
                CoreError::Validation(format!(
                    "No models available for category: {}",
                    category.as_str()
                ))
            })
    }

    /// Whether `id` is a known option in `category`.
    pub fn contains(&self, category: ModelCategory, id: &str) -> bool {
        self.available_models(category).iter().any(|m| m.id == id)
    }

    /// Ids of animation providers that run in the cloud.
    pub fn cloud_animation_providers(&self) -> impl Iterator<Item = &str> {
        self.animation
            .iter()
            .filter(|m| !m.local)
            .map(|m| m.id.as_str())
    }
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
