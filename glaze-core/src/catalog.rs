use std::path::PathBuf;

use serde::Serialize;
use tracing::debug;

use crate::{ModelId, PipelineCache};

/// One row of the "list available models" operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelInfo {
    pub model_id: String,
    pub name: ModelId,
    pub loaded: bool,
}

/// Read-only view over the local model weights directory.
///
/// Availability means the weights exist under the hub cache layout
/// (`models--{org}--{name}`); loaded status is asked of the pipeline cache.
pub struct ModelCatalog {
    root: PathBuf,
}

impl ModelCatalog {
    /// Uses the standard hub cache location (honoring the usual environment
    /// overrides).
    pub fn new() -> Self {
        Self {
            root: hf_hub::Cache::default().path().clone(),
        }
    }

    pub fn with_root(root: PathBuf) -> Self {
        Self { root }
    }

    /// Lists models whose weights are locally available, with their loaded
    /// status.
    pub fn available(&self, pipelines: &PipelineCache) -> Vec<ModelInfo> {
        [ModelId::Sdxl, ModelId::Lcm]
            .into_iter()
            .filter(|model| self.is_downloaded(*model))
            .map(|model| ModelInfo {
                model_id: model.repo_id().to_string(),
                name: model,
                loaded: pipelines.loaded(model),
            })
            .collect()
    }

    fn is_downloaded(&self, model: ModelId) -> bool {
        let dir = format!("models--{}", model.repo_id().replace('/', "--"));
        let present = self.root.join(dir).exists();
        debug!(%model, present, "catalog scan");
        present
    }
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self::new()
    }
}
