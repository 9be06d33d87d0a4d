use anyhow::Result;
use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use base64::{prelude::BASE64_STANDARD, Engine};
use clap::Parser;
use glaze_core::{
    GenerationParams, GenerationRequest, ModelCatalog, PipelineCache, SynthesisBackend,
    SyntheticBackend,
};
use image::DynamicImage;
use serde::Deserialize;
use std::{path::PathBuf, sync::Arc};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

// Define command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about = "Glaze image generation server")]
struct Args {
    /// Host address to bind the server to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to bind the server to
    #[arg(long, default_value_t = 8000)]
    port: u16,

    /// Model weights directory (defaults to the standard hub cache)
    #[arg(long)]
    models_path: Option<PathBuf>,
}

// Application state containing the backend, the pipeline cache and the
// model catalog. The cache starts empty and fills lazily per (model, task).
#[derive(Clone)]
struct AppState {
    backend: Arc<dyn SynthesisBackend>,
    pipelines: Arc<PipelineCache>,
    catalog: Arc<ModelCatalog>,
}

#[derive(Deserialize)]
struct GenerateBody {
    #[serde(flatten)]
    params: GenerationParams,
    /// Optional conditioning image for image-to-image, base64 PNG/JPEG.
    #[serde(default)]
    input_image: Option<String>,
}

fn decode_input_image(encoded: &str) -> Result<DynamicImage> {
    let bytes = BASE64_STANDARD.decode(encoded)?;
    Ok(image::load_from_memory(&bytes)?)
}

/// Submits a generation job and relays its live event stream to the client,
/// one SSE event per progress event, closing when the job's stream ends.
async fn generate_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<GenerateBody>,
) -> impl IntoResponse {
    let input_image = match body.input_image.as_deref().map(decode_input_image) {
        Some(Ok(image)) => Some(image),
        Some(Err(err)) => {
            return (
                StatusCode::UNPROCESSABLE_ENTITY,
                format!("input_image: {err}"),
            )
                .into_response();
        }
        None => None,
    };

    // Rejections happen here, before any job or pipeline work exists.
    let request = match GenerationRequest::validate(body.params, input_image) {
        Ok(request) => request,
        Err(err) => return (StatusCode::UNPROCESSABLE_ENTITY, err.to_string()).into_response(),
    };

    let events = glaze_core::submit(state.backend.clone(), state.pipelines.clone(), request);
    let stream = futures::stream::unfold(events, |mut events| async move {
        let event = events.next().await?;
        Some((Event::default().json_data(&event), events))
    });

    Sse::new(stream).keep_alive(KeepAlive::default()).into_response()
}

/// Lists locally available models and whether a pipeline for them is loaded.
async fn models_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.catalog.available(&state.pipelines))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();

    let catalog = match args.models_path {
        Some(path) => ModelCatalog::with_root(path),
        None => ModelCatalog::new(),
    };

    // The synthetic backend renders procedural images without weights; swap
    // in a weights-backed `SynthesisBackend` implementation for real output.
    let app_state = AppState {
        backend: Arc::new(SyntheticBackend),
        pipelines: Arc::new(PipelineCache::new()),
        catalog: Arc::new(catalog),
    };
    let shared_state = Arc::new(app_state);

    // --- Build axum router with shared state ---
    let app = Router::new()
        .route("/v1/images/generations", post(generate_handler))
        .route("/v1/models", get(models_handler))
        .with_state(shared_state);

    // --- Start the server ---
    let bind_address = format!("{}:{}", args.host, args.port);
    let listener = TcpListener::bind(&bind_address).await?;
    info!("started server on {}", listener.local_addr()?);
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}
