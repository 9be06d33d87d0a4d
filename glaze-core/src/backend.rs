use std::any::Any;
use std::sync::Arc;

use anyhow::Result;
use image::DynamicImage;

use crate::{ModelId, StageArgs};

/// Whether a pipeline is wired for text-conditioned or image-conditioned
/// generation. The two need structurally different pipelines, so this is
/// part of the cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    TextToImage,
    ImageToImage,
}

/// Cache key for a loaded base pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineKey {
    pub model: ModelId,
    pub task: TaskKind,
}

/// Step-scheduler configuration, as an open key/value map so the core never
/// has to know individual scheduler fields.
pub type SchedulerConfig = serde_json::Map<String, serde_json::Value>;

/// Scheduler config field that the fast-sampling scheduler rejects; removed
/// from the derived config before substitution.
pub const SKIP_PRK_STEPS: &str = "skip_prk_steps";

/// Invoked by the backend once per completed inference step with
/// `(step, total_steps)`, `step` starting at 1. Called from the worker
/// thread in the middle of a stage invocation, so it must only enqueue a
/// progress event and return; it must never block.
pub type ProgressHook = Arc<dyn Fn(usize, usize) + Send + Sync>;

/// Opaque intermediate (non-finalized) output handed from the base stage to
/// the refiner when the base stage is asked to stop early.
#[derive(Clone)]
pub struct Latent(pub Arc<dyn Any + Send + Sync>);

impl std::fmt::Debug for Latent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Latent(..)")
    }
}

/// What one stage invocation produced, one entry per image in the call.
#[derive(Debug, Clone)]
pub enum StageOutput {
    /// A finished, encodable raster image.
    Image(Arc<DynamicImage>),
    /// Intermediate output for the refiner to finish.
    Latent(Latent),
}

/// One loaded, ready-to-run model pipeline.
///
/// Handles are expensive to construct, live for the whole process, and are
/// shared read-only across concurrent jobs: `run` must be safe to call from
/// several workers at once. `replace_scheduler` is the one mutation a
/// handle supports and the cache performs it exactly once, during
/// construction, before the handle is published.
pub trait Pipeline: Send + Sync + 'static {
    /// Snapshot of the currently installed scheduler's configuration.
    fn scheduler_config(&self) -> SchedulerConfig;

    /// Swaps in the fast-sampling step scheduler, rebuilt from `config`.
    fn replace_scheduler(&self, config: SchedulerConfig) -> Result<()>;

    /// Runs one stage invocation synchronously, driving the per-step hook
    /// embedded in `args`.
    fn run(&self, args: StageArgs) -> Result<Vec<StageOutput>>;
}

/// The opaque image synthesis backend that owns the actual numerical model.
///
/// Construction may take seconds to minutes (weights loading); the cache
/// makes sure each (model, task) pair is only built once.
pub trait SynthesisBackend: Send + Sync + 'static {
    /// Builds a base pipeline for the given model and task kind.
    fn build_pipeline(&self, model: ModelId, task: TaskKind) -> Result<Arc<dyn Pipeline>>;

    /// Builds the refiner pipeline, borrowing its heavy shared components
    /// (text encoder, latent decoder) from `base`.
    fn build_refiner(&self, base: &Arc<dyn Pipeline>) -> Result<Arc<dyn Pipeline>>;
}
