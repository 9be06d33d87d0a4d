pub mod args;
pub mod backend;
pub mod cache;
pub mod catalog;
pub mod channel;
pub mod error;
pub mod event;
pub mod generate;
pub mod request;
pub mod synthetic;
mod util;

pub use args::*;
pub use backend::*;
pub use cache::PipelineCache;
pub use catalog::{ModelCatalog, ModelInfo};
pub use channel::{progress_channel, ProgressSender, ProgressStream};
pub use error::GenerationError;
pub use event::ProgressEvent;
pub use generate::submit;
pub use request::*;
pub use synthetic::SyntheticBackend;
pub use util::image_to_base64_png;
