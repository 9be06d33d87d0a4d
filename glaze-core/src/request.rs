use std::sync::Arc;

use image::DynamicImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Enum of supported generation models
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ModelId {
    /// SDXL base model
    #[default]
    Sdxl,
    /// Latent-consistency fast-sampling variant
    Lcm,
}

serde_plain::derive_display_from_serialize!(ModelId);
serde_plain::derive_fromstr_from_deserialize!(ModelId);

impl ModelId {
    /// Hub repository the model's weights live under.
    pub fn repo_id(self) -> &'static str {
        match self {
            ModelId::Sdxl => "stabilityai/stable-diffusion-xl-base-1.0",
            ModelId::Lcm => "latent-consistency/lcm-sdxl",
        }
    }
}

/// Hub repository of the shared refiner model.
pub const REFINER_REPO_ID: &str = "stabilityai/stable-diffusion-xl-refiner-1.0";

fn default_steps() -> usize {
    25
}

fn default_image_count() -> usize {
    1
}

/// Raw, unvalidated request parameters as they arrive on the wire.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct GenerationParams {
    /// The main text prompt that describes the desired image.
    pub prompt: String,
    /// The generation model to use, ex: 'sdxl' or 'lcm'.
    #[serde(default)]
    pub model: ModelId,
    /// The number of diffusion steps to run.
    #[serde(default = "default_steps")]
    pub steps: usize,
    /// The number of images to generate.
    #[serde(default = "default_image_count")]
    pub image_count: usize,
    /// A comma-separated list of terms to exclude from the image.
    #[serde(default)]
    pub negative_prompt: Option<String>,
    /// The guidance scale for the diffusion model.
    #[serde(default)]
    pub guidance_scale: Option<f64>,
    /// The influence of the input image in image-to-image generation (0.0 to 1.0).
    #[serde(default)]
    pub strength: Option<f64>,
    /// Where to split denoising work between the base and refiner stages (0.0 to 1.0).
    #[serde(default)]
    pub denoising: Option<f64>,
    /// Whether to run the refiner stage to improve image details.
    #[serde(default)]
    pub use_refiner: bool,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("prompt: must not be empty")]
    EmptyPrompt,
    #[error("steps: must be a positive integer")]
    ZeroSteps,
    #[error("image_count: must be a positive integer")]
    ZeroImageCount,
    #[error("use_refiner: the refiner cannot be used with the {0} model")]
    RefinerWithFastModel(ModelId),
    #[error("image_count: batch generation is not supported for image-conditioned requests")]
    BatchWithInputImage,
    #[error("strength: only applicable when an input image is provided")]
    StrengthWithoutImage,
    #[error("strength: must be within [0, 1]")]
    StrengthOutOfRange,
    #[error("denoising: must be within [0, 1]")]
    DenoisingOutOfRange,
}

/// A fully validated generation request.
///
/// Constructed only through [`GenerationRequest::validate`] and treated as
/// immutable afterwards; every stage of the job reads from the same value.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    pub model: ModelId,
    pub steps: usize,
    pub image_count: usize,
    pub negative_prompt: Option<String>,
    pub guidance_scale: Option<f64>,
    pub strength: Option<f64>,
    pub denoising: Option<f64>,
    pub use_refiner: bool,
    pub input_image: Option<Arc<DynamicImage>>,
}

impl GenerationRequest {
    /// Checks the cross-field constraints and produces an immutable request.
    ///
    /// Pure: no I/O, no pipeline work, and a rejected request leaves nothing
    /// behind. Constraints are applied in a fixed order and the first
    /// violation is reported.
    pub fn validate(
        params: GenerationParams,
        input_image: Option<DynamicImage>,
    ) -> Result<Self, ValidationError> {
        if params.prompt.trim().is_empty() {
            return Err(ValidationError::EmptyPrompt);
        }
        if params.steps == 0 {
            return Err(ValidationError::ZeroSteps);
        }
        if params.image_count == 0 {
            return Err(ValidationError::ZeroImageCount);
        }
        if params.model == ModelId::Lcm && params.use_refiner {
            return Err(ValidationError::RefinerWithFastModel(params.model));
        }
        if input_image.is_some() && params.image_count > 1 {
            return Err(ValidationError::BatchWithInputImage);
        }
        if input_image.is_none() && params.strength.is_some() {
            return Err(ValidationError::StrengthWithoutImage);
        }
        if let Some(strength) = params.strength {
            if !(0.0..=1.0).contains(&strength) {
                return Err(ValidationError::StrengthOutOfRange);
            }
        }
        if let Some(denoising) = params.denoising {
            if !(0.0..=1.0).contains(&denoising) {
                return Err(ValidationError::DenoisingOutOfRange);
            }
        }

        Ok(Self {
            prompt: params.prompt,
            model: params.model,
            steps: params.steps,
            image_count: params.image_count,
            negative_prompt: params.negative_prompt,
            guidance_scale: params.guidance_scale,
            strength: params.strength,
            denoising: params.denoising,
            use_refiner: params.use_refiner,
            input_image: input_image.map(Arc::new),
        })
    }
}
