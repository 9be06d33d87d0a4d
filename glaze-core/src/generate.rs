//! End-to-end generation jobs.
//!
//! One job = one validated request, one worker, one progress channel. The
//! worker runs every stage synchronously on a blocking thread so the
//! cooperative request-handling side never stalls; events cross back over
//! the progress channel.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, info};

use crate::{
    base_stage_args, image_to_base64_png, progress_channel, refiner_stage_args, GenerationError,
    GenerationRequest, PipelineCache, ProgressEvent, ProgressHook, ProgressSender, ProgressStream,
    StageOutput, SynthesisBackend, TaskKind,
};

/// Submits one generation job and returns its live event stream.
///
/// The stream yields events in production order and always terminates: a
/// success sequence or exactly one error event, then the end-of-stream
/// marker. Dropping the stream early aborts the job quietly at its next
/// emit; no error event is produced for a consumer that went away.
pub fn submit(
    backend: Arc<dyn SynthesisBackend>,
    cache: Arc<PipelineCache>,
    request: GenerationRequest,
) -> ProgressStream {
    let (events, stream) = progress_channel();
    tokio::task::spawn_blocking(move || run_job(backend.as_ref(), &cache, &request, events));
    stream
}

/// Enqueues the end-of-stream marker when dropped, whatever path the worker
/// took to get there.
struct FinishGuard(ProgressSender);

impl Drop for FinishGuard {
    fn drop(&mut self) {
        self.0.finish();
    }
}

fn run_job(
    backend: &dyn SynthesisBackend,
    cache: &PipelineCache,
    request: &GenerationRequest,
    events: ProgressSender,
) {
    let _guard = FinishGuard(events.clone());

    // A backend that panics mid-stage must not orphan the channel; the
    // panic is converted into the job's single error event.
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        run_stages(backend, cache, request, &events)
    }));

    match outcome {
        Ok(Ok(())) => info!(model = %request.model, "generation job finished"),
        Ok(Err(GenerationError::ChannelClosed)) => {
            debug!("consumer dropped the stream, job aborted");
        }
        Ok(Err(err)) => {
            info!(model = %request.model, "generation job failed: {err}");
            let _ = events.emit(ProgressEvent::Error {
                message: err.to_string(),
            });
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            let _ = events.emit(ProgressEvent::Error { message });
        }
    }
}

/// The per-job state machine: loading_model, then per image
/// starting_image/generating/progress*, optionally refining, then one
/// success per produced image. Any error aborts the remaining stages.
fn run_stages(
    backend: &dyn SynthesisBackend,
    cache: &PipelineCache,
    request: &GenerationRequest,
    events: &ProgressSender,
) -> Result<(), GenerationError> {
    events.emit(ProgressEvent::LoadingModel {
        model: request.model,
    })?;

    let task = if request.input_image.is_some() {
        TaskKind::ImageToImage
    } else {
        TaskKind::TextToImage
    };
    let pipeline = cache.get_pipeline(backend, request.model, task)?;
    let hook = step_hook(events.clone());

    for image_number in 1..=request.image_count {
        events.emit(ProgressEvent::StartingImage {
            image_number,
            total_images: request.image_count,
        })?;

        let args = base_stage_args(request, hook.clone());
        events.emit(ProgressEvent::Generating)?;
        let mut output = run_stage(&*pipeline, args)?;

        if request.use_refiner {
            events.emit(ProgressEvent::Refining)?;
            let refiner = cache.get_refiner(backend, &pipeline)?;
            let args = refiner_stage_args(request, output, hook.clone());
            output = run_stage(&*refiner, args)?;
        }

        let image = match output {
            StageOutput::Image(image) => image,
            StageOutput::Latent(_) => {
                return Err(GenerationError::StageExecution(
                    "final stage returned latent output instead of an image".to_string(),
                ))
            }
        };
        let image_data = image_to_base64_png(&image)
            .map_err(|err| GenerationError::StageExecution(format!("encoding failed: {err}")))?;
        events.emit(ProgressEvent::Success { image_data })?;
    }

    Ok(())
}

fn run_stage(
    pipeline: &dyn crate::Pipeline,
    args: crate::StageArgs,
) -> Result<StageOutput, GenerationError> {
    let outputs = pipeline
        .run(args)
        .map_err(|err| GenerationError::StageExecution(format!("{err:#}")))?;
    outputs.into_iter().next().ok_or_else(|| {
        GenerationError::StageExecution("stage invocation produced no output".to_string())
    })
}

/// Hook handed to the backend: enqueue one progress event per completed
/// step and return immediately. A closed channel is ignored here; the next
/// explicit emit aborts the job instead.
fn step_hook(events: ProgressSender) -> ProgressHook {
    Arc::new(move |step, total_steps| {
        let _ = events.emit(ProgressEvent::Progress { step, total_steps });
    })
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("stage execution panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("stage execution panicked: {message}")
    } else {
        "stage execution panicked".to_string()
    }
}
