//! API HTTP de control del bot.
//!
//! Superficie REST mínima para el dashboard: estado, cola, canales y los
//! controles de reproducción. Las rutas y formas de respuesta siguen el
//! contrato `{success, message}` / `{error}` que consume el frontend.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::audio::player::PlaybackController;
use crate::error::ResolveError;
use crate::sources::Song;
use crate::voice::ServerQueryClient;

#[derive(Clone)]
pub struct AppState {
    pub player: Arc<PlaybackController>,
    pub voice: Arc<ServerQueryClient>,
}

struct AppError(StatusCode, String);

impl AppError {
    fn internal(message: impl ToString) -> Self {
        Self(StatusCode::INTERNAL_SERVER_ERROR, message.to_string())
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self(StatusCode::BAD_REQUEST, message.into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "error": self.1 }));
        (self.0, body).into_response()
    }
}

impl From<ResolveError> for AppError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::UnsupportedUrl(_) => Self(StatusCode::BAD_REQUEST, err.to_string()),
            _ => Self::internal(err),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/status", get(status))
        .route("/api/channels", get(channels))
        .route("/api/play", post(play))
        .route("/api/pause", post(pause))
        .route("/api/resume", post(resume))
        .route("/api/skip", post(skip))
        .route("/api/stop", post(stop))
        .route("/api/volume", post(volume))
        .route("/api/channel", post(channel))
        .route("/api/clear", post(clear))
        .with_state(state)
}

#[derive(Serialize)]
struct ActionResponse {
    success: bool,
    message: String,
}

impl ActionResponse {
    fn new(success: bool, message: impl Into<String>) -> Json<Self> {
        Json(Self {
            success,
            message: message.into(),
        })
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn status(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "bot": state.voice.status(),
        "player": state.player.status().await,
    }))
}

async fn channels(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    let channels = state
        .voice
        .channels()
        .await
        .map_err(AppError::internal)?;
    Ok(Json(serde_json::json!({ "channels": channels })))
}

#[derive(Deserialize)]
struct PlayRequest {
    url: Option<String>,
}

#[derive(Serialize)]
struct PlayResponse {
    success: bool,
    message: String,
    song: Song,
}

async fn play(
    State(state): State<AppState>,
    Json(request): Json<PlayRequest>,
) -> Result<Json<PlayResponse>, AppError> {
    let url = request
        .url
        .filter(|u| !u.trim().is_empty())
        .ok_or_else(|| AppError::bad_request("se requiere una URL"))?;

    let song = state.player.enqueue(&url).await?;
    Ok(Json(PlayResponse {
        success: true,
        message: "Agregado a la cola".to_string(),
        song,
    }))
}

async fn pause(State(state): State<AppState>) -> Json<ActionResponse> {
    let success = state.player.pause().await;
    ActionResponse::new(
        success,
        if success {
            "Reproducción pausada"
        } else {
            "Nada que pausar"
        },
    )
}

async fn resume(State(state): State<AppState>) -> Json<ActionResponse> {
    let success = state.player.resume().await;
    ActionResponse::new(
        success,
        if success {
            "Reproducción reanudada"
        } else {
            "Nada que reanudar"
        },
    )
}

async fn skip(State(state): State<AppState>) -> Json<ActionResponse> {
    let success = state.player.skip().await;
    ActionResponse::new(
        success,
        if success {
            "Canción saltada"
        } else {
            "Nada que saltar"
        },
    )
}

async fn stop(State(state): State<AppState>) -> Json<ActionResponse> {
    state.player.stop().await;
    ActionResponse::new(true, "Reproducción detenida y cola limpiada")
}

#[derive(Deserialize)]
struct VolumeRequest {
    volume: Option<i64>,
}

async fn volume(
    State(state): State<AppState>,
    Json(request): Json<VolumeRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let level = request
        .volume
        .ok_or_else(|| AppError::bad_request("el volumen debe estar entre 0 y 100"))?;
    if !(0..=100).contains(&level) {
        return Err(AppError::bad_request("el volumen debe estar entre 0 y 100"));
    }

    let volume = state.player.set_volume(level).await;
    Ok(Json(serde_json::json!({ "success": true, "volume": volume })))
}

#[derive(Deserialize)]
struct ChannelRequest {
    channel_id: Option<u64>,
    channel_name: Option<String>,
}

async fn channel(
    State(state): State<AppState>,
    Json(request): Json<ChannelRequest>,
) -> Result<Json<ActionResponse>, AppError> {
    if let Some(id) = request.channel_id {
        state
            .voice
            .join_channel(id)
            .await
            .map_err(AppError::internal)?;
        return Ok(ActionResponse::new(true, format!("Canal {} ocupado", id)));
    }

    if let Some(name) = request.channel_name {
        state
            .voice
            .join_channel_by_name(&name)
            .await
            .map_err(AppError::internal)?;
        return Ok(ActionResponse::new(
            true,
            format!("Canal \"{}\" ocupado", name),
        ));
    }

    Err(AppError::bad_request(
        "se requiere channel_id o channel_name",
    ))
}

async fn clear(State(state): State<AppState>) -> Json<ActionResponse> {
    let removed = state.player.clear_queue().await;
    ActionResponse::new(true, format!("Cola limpiada ({} canciones)", removed))
}
