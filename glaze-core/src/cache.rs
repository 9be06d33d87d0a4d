//! Process-wide registry of loaded pipelines.
//!
//! Construction of a pipeline can take minutes, so each (model, task) key is
//! resolved at most once and the handle is shared read-only by every job
//! after that. The cache is an explicitly injected value owned by the
//! service state; there are no module-level singletons.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Instant;

use tracing::{info, warn};

use crate::{
    GenerationError, ModelId, Pipeline, PipelineKey, SynthesisBackend, TaskKind, SKIP_PRK_STEPS,
};

enum SlotState {
    Empty,
    /// One caller is constructing; everyone else waits on the condvar.
    Building,
    Ready(Arc<dyn Pipeline>),
    /// The last attempt failed. Reported to the callers that were waiting on
    /// it; the next caller to arrive clears it and retries.
    Failed(String),
}

#[derive(Default)]
struct Slot {
    state: Mutex<SlotState>,
    changed: Condvar,
}

impl Default for SlotState {
    fn default() -> Self {
        SlotState::Empty
    }
}

impl Slot {
    /// Resolves the slot, running `build` if this caller wins the race.
    ///
    /// Callers that arrive while a construction is in flight block until it
    /// settles and then share its outcome; the slot map's lock is never held
    /// here, so unrelated keys resolve without contention.
    fn resolve<F>(&self, build: F) -> Result<Arc<dyn Pipeline>, GenerationError>
    where
        F: FnOnce() -> Result<Arc<dyn Pipeline>, GenerationError>,
    {
        let mut state = self.state.lock().expect("slot lock poisoned");
        // A failure left by an earlier attempt does not poison the slot.
        if matches!(*state, SlotState::Failed(_)) {
            *state = SlotState::Empty;
        }
        loop {
            match &*state {
                SlotState::Ready(pipeline) => return Ok(pipeline.clone()),
                SlotState::Failed(message) => {
                    return Err(GenerationError::PipelineConstruction(message.clone()))
                }
                SlotState::Building => {
                    state = self.changed.wait(state).expect("slot lock poisoned");
                }
                SlotState::Empty => break,
            }
        }

        *state = SlotState::Building;
        drop(state);

        let result = build();

        let mut state = self.state.lock().expect("slot lock poisoned");
        match result {
            Ok(pipeline) => {
                *state = SlotState::Ready(pipeline.clone());
                self.changed.notify_all();
                Ok(pipeline)
            }
            Err(err) => {
                let message = err.to_string();
                *state = SlotState::Failed(message);
                self.changed.notify_all();
                Err(err)
            }
        }
    }

    fn ready(&self) -> bool {
        matches!(
            *self.state.lock().expect("slot lock poisoned"),
            SlotState::Ready(_)
        )
    }
}

/// Lazily populated cache of base pipelines plus the single shared refiner.
///
/// Entries live for the whole process; there is no eviction.
#[derive(Default)]
pub struct PipelineCache {
    slots: Mutex<HashMap<PipelineKey, Arc<Slot>>>,
    refiner: Slot,
}

impl PipelineCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the pipeline for `(model, task)`, constructing it on first
    /// use. Concurrent callers for the same key observe a single
    /// construction; lookups for other keys proceed independently.
    pub fn get_pipeline(
        &self,
        backend: &dyn SynthesisBackend,
        model: ModelId,
        task: TaskKind,
    ) -> Result<Arc<dyn Pipeline>, GenerationError> {
        let key = PipelineKey { model, task };
        let slot = {
            let mut slots = self.slots.lock().expect("cache lock poisoned");
            slots.entry(key).or_default().clone()
        };
        slot.resolve(|| build_base(backend, model, task))
    }

    /// Returns the shared refiner pipeline, constructing it at most once per
    /// process. The refiner borrows heavy components from whichever base
    /// pipeline first requested it and is not rebuilt if more base models
    /// load later.
    pub fn get_refiner(
        &self,
        backend: &dyn SynthesisBackend,
        base: &Arc<dyn Pipeline>,
    ) -> Result<Arc<dyn Pipeline>, GenerationError> {
        self.refiner.resolve(|| {
            let started = Instant::now();
            info!("constructing refiner pipeline");
            let refiner = backend.build_refiner(base).map_err(|err| {
                warn!("refiner construction failed: {err:#}");
                GenerationError::PipelineConstruction(format!("{err:#}"))
            })?;
            info!(elapsed = ?started.elapsed(), "refiner pipeline ready");
            Ok(refiner)
        })
    }

    /// Whether any ready pipeline exists for `model`, regardless of task
    /// kind. Consumed read-only by the model catalog.
    pub fn loaded(&self, model: ModelId) -> bool {
        let slots = self.slots.lock().expect("cache lock poisoned");
        slots
            .iter()
            .any(|(key, slot)| key.model == model && slot.ready())
    }
}

fn build_base(
    backend: &dyn SynthesisBackend,
    model: ModelId,
    task: TaskKind,
) -> Result<Arc<dyn Pipeline>, GenerationError> {
    let started = Instant::now();
    info!(%model, ?task, "constructing pipeline");
    let pipeline = backend.build_pipeline(model, task).map_err(|err| {
        warn!(%model, ?task, "pipeline construction failed: {err:#}");
        GenerationError::PipelineConstruction(format!("{err:#}"))
    })?;

    // The fast-sampling model needs its own step scheduler, derived from the
    // stock scheduler's configuration minus the one field the replacement
    // rejects. Done here, before the handle is shared, never again.
    if model == ModelId::Lcm {
        let mut config = pipeline.scheduler_config();
        config.remove(SKIP_PRK_STEPS);
        pipeline
            .replace_scheduler(config)
            .map_err(|err| GenerationError::PipelineConstruction(format!("{err:#}")))?;
    }

    info!(%model, ?task, elapsed = ?started.elapsed(), "pipeline ready");
    Ok(pipeline)
}
