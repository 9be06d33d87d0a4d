use serde::Serialize;

use crate::ModelId;

/// A single progress report emitted by a running generation job.
///
/// The variant set is closed on purpose: consumers match exhaustively and a
/// stream for one job contains nothing but these, in production order,
/// followed by the end-of-stream marker (which is a channel-level item, not
/// an event).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// The job is resolving its pipeline; may take minutes on a cold cache.
    LoadingModel { model: ModelId },
    /// Work on one logical image is about to begin.
    StartingImage {
        image_number: usize,
        total_images: usize,
    },
    /// The base stage is running.
    Generating,
    /// One inference step finished. `step` starts at 1 and reaches
    /// `total_steps`; consumers count these to measure completion, so none
    /// may be dropped.
    Progress { step: usize, total_steps: usize },
    /// The refiner stage is running.
    Refining,
    /// One finished image, encoded as a base64 PNG payload.
    Success { image_data: String },
    /// The job failed; this is the last event before the stream ends.
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_status_tag() {
        let ev = ProgressEvent::Progress {
            step: 3,
            total_steps: 25,
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["status"], "progress");
        assert_eq!(json["step"], 3);
        assert_eq!(json["total_steps"], 25);

        let ev = ProgressEvent::LoadingModel {
            model: ModelId::Sdxl,
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["status"], "loading_model");
        assert_eq!(json["model"], "sdxl");
    }
}
