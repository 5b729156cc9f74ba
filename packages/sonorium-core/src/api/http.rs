//! REST control surface.
//!
//! Handlers stay thin: parse, delegate to a service, serialize. Errors
//! convert to JSON responses through `SonoriumError::into_response`.

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::{SonoriumError, SonoriumResult};
use crate::theme::library::TrackField;
use crate::theme::Theme;

use super::{stream, AppState};

// ─────────────────────────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────────────────────────

/// Creates the Axum router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/themes", get(list_themes))
        .route("/api/themes/refresh", post(refresh_themes))
        .route("/api/themes/{theme_id}", get(get_theme))
        .route(
            "/api/themes/{theme_id}/tracks/{track_name}",
            put(set_track_field),
        )
        .route("/api/themes/{theme_id}/presets", post(create_preset))
        .route(
            "/api/themes/{theme_id}/presets/{preset_id}/apply",
            post(apply_preset),
        )
        .route(
            "/api/themes/{theme_id}/presets/{preset_id}/default",
            put(set_default_preset),
        )
        .route(
            "/api/themes/{theme_id}/presets/{preset_id}",
            delete(delete_preset),
        )
        .route("/api/sessions", get(list_sessions).post(create_session))
        .route("/api/sessions/stop_all", post(stop_all_sessions))
        .route(
            "/api/sessions/{session_id}",
            get(get_session).put(update_session).delete(delete_session),
        )
        .route("/api/sessions/{session_id}/play", post(play_session))
        .route("/api/sessions/{session_id}/pause", post(pause_session))
        .route("/api/sessions/{session_id}/stop", post(stop_session))
        .route("/api/sessions/{session_id}/volume", post(set_session_volume))
        .route("/api/sessions/{session_id}/cycle", put(update_cycle_config))
        .route("/api/volume/master", post(set_master_volume))
        .route("/api/channels", get(channel_status))
        .route("/stream/{target}", get(stream::stream_audio))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "sonorium",
        "channels": state.channels.all().len(),
        "themes": state.library.list().len(),
    }))
}

/// Serializes one theme with its live track settings and presets.
fn theme_json(theme: &Theme) -> serde_json::Value {
    let metadata = theme.metadata();
    let tracks: serde_json::Map<String, serde_json::Value> = theme
        .tracks()
        .iter()
        .map(|t| {
            (
                t.name().to_string(),
                serde_json::to_value(t.settings()).unwrap_or_default(),
            )
        })
        .collect();
    json!({
        "id": theme.id(),
        "name": metadata.name,
        "description": metadata.description,
        "icon": metadata.icon,
        "categories": metadata.categories,
        "is_favorite": metadata.is_favorite,
        "short_file_threshold": metadata.short_file_threshold,
        "tracks": tracks,
        "presets": metadata.presets,
        "default_preset": theme.default_preset_id(),
    })
}

async fn list_themes(State(state): State<AppState>) -> impl IntoResponse {
    let themes: Vec<serde_json::Value> =
        state.library.list().iter().map(|t| theme_json(t)).collect();
    Json(themes)
}

async fn refresh_themes(State(state): State<AppState>) -> impl IntoResponse {
    state.library.refresh();
    Json(json!({ "themes": state.library.list().len() }))
}

async fn get_theme(
    Path(theme_id): Path<String>,
    State(state): State<AppState>,
) -> SonoriumResult<impl IntoResponse> {
    let theme = state.library.require(&theme_id)?;
    Ok(Json(theme_json(&theme)))
}

async fn set_track_field(
    Path((theme_id, track_name)): Path<(String, String)>,
    State(state): State<AppState>,
    Json(field): Json<TrackField>,
) -> SonoriumResult<impl IntoResponse> {
    state.library.set_track_field(&theme_id, &track_name, field)?;
    let theme = state.library.require(&theme_id)?;
    let settings = theme
        .track(&track_name)
        .map(|t| t.settings())
        .ok_or_else(|| SonoriumError::NotFound(format!("track {track_name}")))?;
    Ok(Json(settings))
}

#[derive(Deserialize)]
struct CreatePresetBody {
    name: String,
}

async fn create_preset(
    Path(theme_id): Path<String>,
    State(state): State<AppState>,
    Json(body): Json<CreatePresetBody>,
) -> SonoriumResult<impl IntoResponse> {
    let preset_id = state.library.create_preset(&theme_id, &body.name)?;
    Ok(Json(json!({ "preset_id": preset_id })))
}

async fn apply_preset(
    Path((theme_id, preset_id)): Path<(String, String)>,
    State(state): State<AppState>,
) -> SonoriumResult<impl IntoResponse> {
    state.library.apply_preset(&theme_id, &preset_id)?;
    Ok(Json(json!({ "applied": preset_id })))
}

async fn set_default_preset(
    Path((theme_id, preset_id)): Path<(String, String)>,
    State(state): State<AppState>,
) -> SonoriumResult<impl IntoResponse> {
    state.library.set_default_preset(&theme_id, &preset_id)?;
    Ok(Json(json!({ "default": preset_id })))
}

async fn delete_preset(
    Path((theme_id, preset_id)): Path<(String, String)>,
    State(state): State<AppState>,
) -> SonoriumResult<impl IntoResponse> {
    state.library.delete_preset(&theme_id, &preset_id)?;
    Ok(Json(json!({ "deleted": preset_id })))
}

fn session_json(state: &AppState, session: &crate::session::Session) -> serde_json::Value {
    let mut value = serde_json::to_value(session).unwrap_or_default();
    if let Some(object) = value.as_object_mut() {
        object.insert(
            "speaker_summary".into(),
            json!(state.sessions.speaker_summary(session)),
        );
        object.insert(
            "channel_id".into(),
            json!(state.sessions.session_channel(&session.id)),
        );
        object.insert("stream_url".into(), json!(state.sessions.stream_url(session)));
    }
    value
}

async fn list_sessions(State(state): State<AppState>) -> impl IntoResponse {
    let sessions: Vec<serde_json::Value> = state
        .sessions
        .list()
        .iter()
        .map(|s| session_json(&state, s))
        .collect();
    Json(sessions)
}

async fn create_session(
    State(state): State<AppState>,
    Json(request): Json<crate::session::manager::CreateSessionRequest>,
) -> SonoriumResult<impl IntoResponse> {
    let session = state.sessions.create(request)?;
    Ok(Json(session_json(&state, &session)))
}

async fn get_session(
    Path(session_id): Path<String>,
    State(state): State<AppState>,
) -> SonoriumResult<impl IntoResponse> {
    let session = state
        .sessions
        .get(&session_id)
        .ok_or_else(|| SonoriumError::NotFound(format!("session {session_id}")))?;
    Ok(Json(session_json(&state, &session)))
}

async fn update_session(
    Path(session_id): Path<String>,
    State(state): State<AppState>,
    Json(update): Json<crate::session::manager::SessionUpdate>,
) -> SonoriumResult<impl IntoResponse> {
    let outcome = state.sessions.update(&session_id, update).await?;
    Ok(Json(outcome))
}

async fn delete_session(
    Path(session_id): Path<String>,
    State(state): State<AppState>,
) -> SonoriumResult<impl IntoResponse> {
    state.sessions.delete(&session_id)?;
    Ok(Json(json!({ "deleted": session_id })))
}

async fn play_session(
    Path(session_id): Path<String>,
    State(state): State<AppState>,
) -> SonoriumResult<impl IntoResponse> {
    let session = state.sessions.play(&session_id).await?;
    Ok(Json(session_json(&state, &session)))
}

async fn pause_session(
    Path(session_id): Path<String>,
    State(state): State<AppState>,
) -> SonoriumResult<impl IntoResponse> {
    let session = state.sessions.pause(&session_id).await?;
    Ok(Json(session_json(&state, &session)))
}

async fn stop_session(
    Path(session_id): Path<String>,
    State(state): State<AppState>,
) -> SonoriumResult<impl IntoResponse> {
    let session = state.sessions.stop(&session_id).await?;
    Ok(Json(session_json(&state, &session)))
}

async fn stop_all_sessions(State(state): State<AppState>) -> impl IntoResponse {
    let stopped = state.sessions.stop_all().await;
    Json(json!({ "stopped": stopped }))
}

#[derive(Deserialize)]
struct VolumeBody {
    volume: u8,
}

async fn set_session_volume(
    Path(session_id): Path<String>,
    State(state): State<AppState>,
    Json(body): Json<VolumeBody>,
) -> SonoriumResult<impl IntoResponse> {
    let session = state.sessions.set_volume(&session_id, body.volume).await?;
    Ok(Json(session_json(&state, &session)))
}

#[derive(Deserialize)]
struct CycleBody {
    enabled: Option<bool>,
    interval_minutes: Option<u32>,
    randomize: Option<bool>,
    theme_ids: Option<Vec<String>>,
}

async fn update_cycle_config(
    Path(session_id): Path<String>,
    State(state): State<AppState>,
    Json(body): Json<CycleBody>,
) -> SonoriumResult<impl IntoResponse> {
    let session = state.sessions.update_cycle_config(
        &session_id,
        body.enabled,
        body.interval_minutes,
        body.randomize,
        body.theme_ids,
    )?;
    Ok(Json(session_json(&state, &session)))
}

#[derive(Deserialize)]
struct MasterVolumeBody {
    level: f32,
}

async fn set_master_volume(
    State(state): State<AppState>,
    Json(body): Json<MasterVolumeBody>,
) -> SonoriumResult<impl IntoResponse> {
    state.sessions.set_master_volume(body.level)?;
    Ok(Json(json!({ "master_volume": body.level.clamp(0.0, 1.0) })))
}

async fn channel_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.channels.status())
}
