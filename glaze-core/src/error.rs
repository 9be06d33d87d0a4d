use thiserror::Error;

use crate::ValidationError;

/// Errors a generation job can run into once it has been accepted.
///
/// Everything except `Validation` happens inside a worker and is converted
/// into a single `error` event on the job's stream rather than escaping the
/// worker thread.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A cache miss failed to build a pipeline handle. The cache is left
    /// clean so a later job can retry the construction.
    #[error("failed to construct pipeline: {0}")]
    PipelineConstruction(String),

    /// The backend raised while running the base or refiner stage.
    #[error("stage execution failed: {0}")]
    StageExecution(String),

    /// The consumer dropped the event stream; there is nobody left to
    /// deliver events to, so the job aborts.
    #[error("progress channel closed by consumer")]
    ChannelClosed,
}
