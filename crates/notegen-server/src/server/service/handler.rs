//! HTTP surface of the generation server.
//!
//! This module defines [`AppState`] and [`router`], which wires every endpoint
//! onto an axum [`Router`]:
//!
//! - `POST /api/generate/`: upload a MIDI file plus parameters and receive the
//!   generated notes as a stream of newline-delimited JSON records.
//! - `GET /api/default_assets/` and `/api/default_assets/{file}`: bundled
//!   example MIDI files.
//! - `GET /api/resource/{*path}`, `/api/resource_ls[/{*path}]` and
//!   `/api/resource_index`: read-only access to the resource tree.
//! - `GET /api/health`: liveness probe.
//! - Everything else: the static frontend.

use super::files::{Listing, index_tree, list_dir, list_midi_files, serve_confined};
use crate::server::{
    config::ServerConfig,
    session::{coordinator::SessionCoordinator, registry::CancellationRegistry},
};
use axum::{
    Json, Router,
    body::{Body, Bytes},
    extract::{
        DefaultBodyLimit, Multipart, Path, Request, State,
        multipart::{MultipartError, MultipartRejection},
    },
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use notegen_core::{
    Error, Result,
    model::{GenerationRequest, Model},
    params::GenerateParams,
    pianoroll::Pianoroll,
    types::ClientId,
};
use std::{collections::BTreeMap, sync::Arc};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// Content type of the generation response. The body is newline-delimited
/// JSON, but existing clients key off this value.
pub const GENERATE_CONTENT_TYPE: &str = "audio/midi";

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub registry: Arc<CancellationRegistry>,
    pub coordinator: Arc<SessionCoordinator>,
}

impl AppState {
    /// Builds the registry and coordinator around `model`.
    pub fn new(config: ServerConfig, model: Arc<dyn Model>) -> Self {
        let registry = Arc::new(CancellationRegistry::new());
        let coordinator = Arc::new(SessionCoordinator::new(
            Arc::clone(&registry),
            model,
            config.failure_policy,
        ));
        Self {
            config: Arc::new(config),
            registry,
            coordinator,
        }
    }
}

/// Builds the full application router.
pub fn router(state: AppState) -> Router {
    let max_upload_bytes = state.config.max_upload_bytes;

    Router::new()
        .route("/api/generate", post(generate))
        .route("/api/generate/", post(generate))
        .route("/api/default_assets", get(default_assets))
        .route("/api/default_assets/", get(default_assets))
        .route("/api/default_assets/{*file}", get(default_asset))
        .route("/api/resource/{*path}", get(resource))
        .route("/api/resource_ls", get(resource_ls_root))
        .route("/api/resource_ls/", get(resource_ls_root))
        .route("/api/resource_ls/{*path}", get(resource_ls))
        .route("/api/resource_index", get(resource_index))
        .route("/api/health", get(health))
        .route("/", get(frontend_index))
        .route("/{*path}", get(frontend))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// The three form fields of a generation upload.
struct GenerateUpload {
    midi_file: Bytes,
    params: String,
    client_id: ClientId,
}

impl GenerateUpload {
    async fn read(multipart: &mut Multipart, limit: usize) -> Result<Self> {
        let reject = |e: MultipartError| {
            if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
                Error::PayloadTooLarge { limit }
            } else {
                Error::invalid(e.body_text())
            }
        };

        let mut midi_file = None;
        let mut params = None;
        let mut client_id = None;

        while let Some(field) = multipart.next_field().await.map_err(reject)? {
            let name = field.name().map(str::to_owned);
            match name.as_deref() {
                Some("midi_file") => midi_file = Some(field.bytes().await.map_err(reject)?),
                Some("params") => params = Some(field.text().await.map_err(reject)?),
                Some("client_id") => client_id = Some(field.text().await.map_err(reject)?),
                _ => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!("Ignoring unexpected form field {name:?}");
                }
            }
        }

        let missing = |field: &str| Error::invalid(format!("missing form field `{field}`"));
        Ok(Self {
            midi_file: midi_file.ok_or_else(|| missing("midi_file"))?,
            params: params.ok_or_else(|| missing("params"))?,
            client_id: ClientId::try_from(client_id.ok_or_else(|| missing("client_id"))?)?,
        })
    }
}

/// Starts a generation session and streams its notes back.
///
/// Everything that can be rejected is checked before the session starts, so a
/// `400` never leaves a registry entry or a worker behind.
#[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
async fn generate(
    State(state): State<AppState>,
    multipart: core::result::Result<Multipart, MultipartRejection>,
) -> Result<Response> {
    let mut multipart = multipart.map_err(|e| Error::invalid(e.body_text()))?;
    let upload = GenerateUpload::read(&mut multipart, state.config.max_upload_bytes).await?;

    let params = GenerateParams::from_json(&upload.params)?;
    let pianoroll = Pianoroll::from_midi(
        &upload.midi_file,
        state.config.frames_per_beat,
        state.config.beats_per_bar,
    )?;
    let request = GenerationRequest::from_params(&params, pianoroll);

    let stream = state.coordinator.start(upload.client_id, request)?;

    Ok((
        [(header::CONTENT_TYPE, GENERATE_CONTENT_TYPE)],
        Body::from_stream(stream),
    )
        .into_response())
}

async fn default_assets(State(state): State<AppState>) -> Result<Json<Vec<String>>> {
    Ok(Json(list_midi_files(&state.config.assets_dir).await?))
}

async fn default_asset(
    State(state): State<AppState>,
    Path(file): Path<String>,
    request: Request,
) -> Result<Response> {
    serve_confined(&state.config.assets_dir, &file, request).await
}

async fn resource(
    State(state): State<AppState>,
    Path(path): Path<String>,
    request: Request,
) -> Result<Response> {
    serve_confined(&state.config.resource_dir, &path, request).await
}

async fn resource_ls_root(State(state): State<AppState>) -> Result<Json<Listing>> {
    Ok(Json(list_dir(&state.config.resource_dir, "").await?))
}

async fn resource_ls(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<Json<Listing>> {
    Ok(Json(list_dir(&state.config.resource_dir, &path).await?))
}

async fn resource_index(
    State(state): State<AppState>,
) -> Result<Json<BTreeMap<String, Listing>>> {
    let root = state.config.resource_dir.clone();
    let index = tokio::task::spawn_blocking(move || index_tree(&root))
        .await
        .map_err(|e| Error::Io {
            context: format!("indexing task failed: {e}"),
        })??;
    Ok(Json(index))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn frontend_index(State(state): State<AppState>, request: Request) -> Result<Response> {
    serve_frontend(&state, "", request).await
}

async fn frontend(
    State(state): State<AppState>,
    Path(path): Path<String>,
    request: Request,
) -> Result<Response> {
    serve_frontend(&state, &path, request).await
}

/// Serves a frontend file, falling back to `index.html` for directories.
async fn serve_frontend(state: &AppState, path: &str, request: Request) -> Result<Response> {
    let root = &state.config.frontend_dir;
    let is_dir = super::files::resolve_confined(root, path)?.is_dir();
    if is_dir {
        let index = std::path::Path::new(path).join("index.html");
        serve_confined(root, &index.to_string_lossy(), request).await
    } else {
        serve_confined(root, path, request).await
    }
}
