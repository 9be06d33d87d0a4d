use crate::{GenerationRequest, ProgressHook, StageOutput};

/// Keyword arguments for one pipeline stage invocation.
///
/// `None` on an optional field means "use the backend's default", not "pass
/// null" — backends must only apply fields that are present.
#[derive(Clone)]
pub struct StageArgs {
    pub prompt: String,
    pub steps: usize,
    /// Images produced by this invocation. The orchestrator emits events per
    /// logical image and runs one invocation per image, so this is 1.
    pub num_images: usize,
    /// Invoked once per completed inference step; enqueue-only, never blocks.
    pub progress_hook: ProgressHook,
    pub guidance_scale: Option<f64>,
    pub negative_prompt: Option<String>,
    /// Ask the stage to stop early and return intermediate latent output
    /// instead of finished images (set when a refiner stage follows).
    pub output_latent: bool,
    /// Fraction of denoising work at which the base stage hands off.
    pub denoising_end: Option<f64>,
    /// Fraction of denoising work at which the refiner stage picks up.
    pub denoising_start: Option<f64>,
    /// Conditioning input: the caller's input image for image-to-image, or
    /// the base stage's output for the refiner stage.
    pub image: Option<StageOutput>,
    pub strength: Option<f64>,
}

/// Builds the base stage's arguments from a validated request.
pub fn base_stage_args(req: &GenerationRequest, progress_hook: ProgressHook) -> StageArgs {
    let mut args = StageArgs {
        prompt: req.prompt.clone(),
        steps: req.steps,
        num_images: 1,
        progress_hook,
        guidance_scale: req.guidance_scale,
        negative_prompt: req.negative_prompt.clone(),
        output_latent: false,
        denoising_end: None,
        denoising_start: None,
        image: None,
        strength: None,
    };

    if req.use_refiner {
        args.output_latent = true;
        args.denoising_end = req.denoising;
    }

    if let Some(input) = &req.input_image {
        args.image = Some(StageOutput::Image(input.clone()));
        args.strength = req.strength;
    }

    args
}

/// Builds the refiner stage's arguments, chaining the base stage's output as
/// its conditioning input. The denoising split point, when present, becomes
/// the refiner's start point (complementary to the base stage's end point).
pub fn refiner_stage_args(
    req: &GenerationRequest,
    base_output: StageOutput,
    progress_hook: ProgressHook,
) -> StageArgs {
    StageArgs {
        prompt: req.prompt.clone(),
        steps: req.steps,
        num_images: 1,
        progress_hook,
        guidance_scale: None,
        negative_prompt: None,
        output_latent: false,
        denoising_end: None,
        denoising_start: req.denoising,
        image: Some(base_output),
        strength: None,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use image::DynamicImage;

    use super::*;
    use crate::{GenerationParams, Latent, ModelId};

    fn noop_hook() -> ProgressHook {
        Arc::new(|_, _| {})
    }

    fn request() -> GenerationRequest {
        GenerationRequest::validate(
            GenerationParams {
                prompt: "an orchard in spring".to_string(),
                model: ModelId::Sdxl,
                steps: 30,
                image_count: 1,
                negative_prompt: None,
                guidance_scale: None,
                strength: None,
                denoising: None,
                use_refiner: false,
            },
            None,
        )
        .unwrap()
    }

    #[test]
    fn optional_fields_are_omitted_not_nulled() {
        let args = base_stage_args(&request(), noop_hook());
        assert_eq!(args.prompt, "an orchard in spring");
        assert_eq!(args.steps, 30);
        assert_eq!(args.num_images, 1);
        assert!(args.guidance_scale.is_none());
        assert!(args.negative_prompt.is_none());
        assert!(!args.output_latent);
        assert!(args.image.is_none());
    }

    #[test]
    fn present_fields_are_forwarded() {
        let mut req = request();
        req.guidance_scale = Some(7.5);
        req.negative_prompt = Some("blurry".to_string());
        let args = base_stage_args(&req, noop_hook());
        assert_eq!(args.guidance_scale, Some(7.5));
        assert_eq!(args.negative_prompt.as_deref(), Some("blurry"));
    }

    #[test]
    fn refiner_flag_requests_latent_output_and_split_end() {
        let mut req = request();
        req.use_refiner = true;
        req.denoising = Some(0.8);
        let args = base_stage_args(&req, noop_hook());
        assert!(args.output_latent);
        assert_eq!(args.denoising_end, Some(0.8));
        assert!(args.denoising_start.is_none());
    }

    #[test]
    fn input_image_carries_optional_strength() {
        let mut req = request();
        req.input_image = Some(Arc::new(DynamicImage::new_rgb8(8, 8)));
        req.strength = Some(0.4);
        let args = base_stage_args(&req, noop_hook());
        assert!(matches!(args.image, Some(StageOutput::Image(_))));
        assert_eq!(args.strength, Some(0.4));
    }

    #[test]
    fn refiner_args_chain_base_output_and_split_start() {
        let mut req = request();
        req.use_refiner = true;
        req.denoising = Some(0.8);
        let latent = Latent(Arc::new(42usize));
        let inner = latent.0.clone();
        let args = refiner_stage_args(&req, StageOutput::Latent(latent), noop_hook());
        assert_eq!(args.denoising_start, Some(0.8));
        assert!(args.denoising_end.is_none());
        assert!(!args.output_latent);
        match args.image {
            Some(StageOutput::Latent(l)) => assert!(Arc::ptr_eq(&l.0, &inner)),
            other => panic!("expected latent conditioning input, got {other:?}"),
        }
    }
}
