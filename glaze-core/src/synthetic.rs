//! A weights-free backend for development and tests.
//!
//! Renders deterministic procedural images while honoring the full backend
//! contract: per-step hook calls, latent handoff to the refiner, and the
//! scheduler-substitution rules. Real deployments implement
//! [`SynthesisBackend`] over an actual diffusion runtime instead.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use image::{DynamicImage, Rgb, RgbImage};

use crate::{
    Latent, ModelId, Pipeline, SchedulerConfig, StageArgs, StageOutput, SynthesisBackend, TaskKind,
    SKIP_PRK_STEPS,
};

const IMAGE_SIZE: u32 = 64;

#[derive(Default)]
pub struct SyntheticBackend;

impl SynthesisBackend for SyntheticBackend {
    fn build_pipeline(&self, model: ModelId, task: TaskKind) -> Result<Arc<dyn Pipeline>> {
        Ok(Arc::new(SyntheticPipeline {
            model,
            task,
            refiner: false,
            scheduler: Mutex::new(stock_scheduler_config()),
        }))
    }

    fn build_refiner(&self, base: &Arc<dyn Pipeline>) -> Result<Arc<dyn Pipeline>> {
        // A real backend borrows the base pipeline's text encoder and latent
        // decoder here; this one only needs to exist.
        let _ = base;
        Ok(Arc::new(SyntheticPipeline {
            model: ModelId::Sdxl,
            task: TaskKind::ImageToImage,
            refiner: true,
            scheduler: Mutex::new(stock_scheduler_config()),
        }))
    }
}

struct SyntheticPipeline {
    model: ModelId,
    task: TaskKind,
    refiner: bool,
    scheduler: Mutex<SchedulerConfig>,
}

fn stock_scheduler_config() -> SchedulerConfig {
    let mut config = SchedulerConfig::new();
    config.insert("num_train_timesteps".to_string(), 1000.into());
    config.insert("beta_schedule".to_string(), "scaled_linear".into());
    config.insert(SKIP_PRK_STEPS.to_string(), true.into());
    config
}

impl Pipeline for SyntheticPipeline {
    fn scheduler_config(&self) -> SchedulerConfig {
        self.scheduler.lock().expect("scheduler lock").clone()
    }

    fn replace_scheduler(&self, config: SchedulerConfig) -> Result<()> {
        // Mirrors the real fast-sampling scheduler's constructor, which
        // rejects this field.
        if config.contains_key(SKIP_PRK_STEPS) {
            bail!("scheduler config field `{SKIP_PRK_STEPS}` is not supported");
        }
        *self.scheduler.lock().expect("scheduler lock") = config;
        Ok(())
    }

    fn run(&self, args: StageArgs) -> Result<Vec<StageOutput>> {
        for step in 1..=args.steps {
            (args.progress_hook)(step, args.steps);
        }

        let image = match &args.image {
            // Refine or transform whatever we were conditioned on.
            Some(StageOutput::Latent(latent)) => match latent.0.downcast_ref::<DynamicImage>() {
                Some(image) => image.brighten(12),
                None => bail!("unrecognized latent handed to the {} pipeline", self.model),
            },
            Some(StageOutput::Image(image)) => {
                let strength = args.strength.unwrap_or(0.6);
                image.brighten((strength * 40.0) as i32)
            }
            None => render(&args.prompt, self.task),
        };

        if args.output_latent {
            // Hand the half-finished raster over as the opaque latent.
            Ok(vec![StageOutput::Latent(Latent(Arc::new(image)))])
        } else {
            let image = if self.refiner { image.unsharpen(1.5, 2) } else { image };
            Ok(vec![StageOutput::Image(Arc::new(image))])
        }
    }
}

/// Deterministic gradient keyed on the prompt text.
fn render(prompt: &str, task: TaskKind) -> DynamicImage {
    let mut hasher = DefaultHasher::new();
    prompt.hash(&mut hasher);
    task.hash(&mut hasher);
    let seed = hasher.finish();
    let base = [(seed >> 16) as u8, (seed >> 8) as u8, seed as u8];

    let buffer = RgbImage::from_fn(IMAGE_SIZE, IMAGE_SIZE, |x, y| {
        Rgb([
            base[0].wrapping_add((x * 3) as u8),
            base[1].wrapping_add((y * 3) as u8),
            base[2].wrapping_add((x + y) as u8),
        ])
    });
    DynamicImage::ImageRgb8(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counting_hook() -> (crate::ProgressHook, Arc<Mutex<Vec<(usize, usize)>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let recorded = calls.clone();
        let hook: crate::ProgressHook = Arc::new(move |step, total| {
            recorded.lock().unwrap().push((step, total));
        });
        (hook, calls)
    }

    fn args(steps: usize, hook: crate::ProgressHook) -> StageArgs {
        StageArgs {
            prompt: "test".to_string(),
            steps,
            num_images: 1,
            progress_hook: hook,
            guidance_scale: None,
            negative_prompt: None,
            output_latent: false,
            denoising_end: None,
            denoising_start: None,
            image: None,
            strength: None,
        }
    }

    #[test]
    fn drives_the_hook_once_per_step() {
        let backend = SyntheticBackend;
        let pipeline = backend
            .build_pipeline(ModelId::Sdxl, TaskKind::TextToImage)
            .unwrap();
        let (hook, calls) = counting_hook();
        pipeline.run(args(4, hook)).unwrap();
        assert_eq!(
            *calls.lock().unwrap(),
            vec![(1, 4), (2, 4), (3, 4), (4, 4)]
        );
    }

    #[test]
    fn same_prompt_renders_identically() {
        let backend = SyntheticBackend;
        let pipeline = backend
            .build_pipeline(ModelId::Sdxl, TaskKind::TextToImage)
            .unwrap();
        let (hook, _) = counting_hook();
        let a = pipeline.run(args(1, hook.clone())).unwrap();
        let b = pipeline.run(args(1, hook)).unwrap();
        match (&a[0], &b[0]) {
            (StageOutput::Image(a), StageOutput::Image(b)) => {
                assert_eq!(a.as_bytes(), b.as_bytes());
            }
            other => panic!("expected images, got {other:?}"),
        }
    }

    #[test]
    fn latent_round_trips_through_the_refiner() {
        let backend = SyntheticBackend;
        let pipeline = backend
            .build_pipeline(ModelId::Sdxl, TaskKind::TextToImage)
            .unwrap();
        let refiner = backend.build_refiner(&pipeline).unwrap();
        let (hook, _) = counting_hook();

        let mut base_args = args(2, hook.clone());
        base_args.output_latent = true;
        let latent = pipeline.run(base_args).unwrap().remove(0);

        let mut refiner_args = args(2, hook);
        refiner_args.image = Some(latent);
        let finished = refiner.run(refiner_args).unwrap().remove(0);
        assert!(matches!(finished, StageOutput::Image(_)));
    }

    #[test]
    fn scheduler_swap_rejects_the_incompatible_field() {
        let backend = SyntheticBackend;
        let pipeline = backend
            .build_pipeline(ModelId::Lcm, TaskKind::TextToImage)
            .unwrap();
        let err = pipeline
            .replace_scheduler(stock_scheduler_config())
            .unwrap_err();
        assert!(err.to_string().contains(SKIP_PRK_STEPS));

        let mut config = pipeline.scheduler_config();
        config.remove(SKIP_PRK_STEPS);
        pipeline.replace_scheduler(config).unwrap();
    }
}
