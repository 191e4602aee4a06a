//! HTTP status and administration API.
//!
//! Reads are served from the snapshots the control loop leaves in
//! [`SharedState`]; writes are forwarded to the loop as [`Command`]s and the
//! handler waits for its reply.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};

use crate::actuator::ActuatorKind;
use crate::calibration::{LiquidCalibration, PhCalibration};
use crate::cycle::GrowthCycle;
use crate::error::AdminError;
use crate::profile::ProfileDraft;
use crate::scheduler::{Command, Reply};
use crate::state::SharedState;

#[derive(Clone)]
pub struct AppState {
    pub shared: SharedState,
    pub commands: mpsc::Sender<Command>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum ApiError {
    Admin(AdminError),
    UnknownActuator(String),
    /// The control loop is not running or has not produced a snapshot yet.
    Unavailable(&'static str),
}

impl From<AdminError> for ApiError {
    fn from(e: AdminError) -> Self {
        Self::Admin(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Admin(AdminError::ProfileNotFound(_)) => StatusCode::NOT_FOUND,
            Self::Admin(AdminError::CapacityExceeded { .. }) => StatusCode::CONFLICT,
            Self::Admin(AdminError::ClockNotSynchronized) => StatusCode::CONFLICT,
            Self::Admin(AdminError::InvalidCalibration(_) | AdminError::InvalidProfile(_)) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Self::Admin(AdminError::Persistence(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::UnknownActuator(_) => StatusCode::NOT_FOUND,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (code, message) = match &self {
            Self::Admin(e) => (e.code(), e.to_string()),
            Self::UnknownActuator(name) => ("unknown_actuator", format!("unknown actuator '{name}'")),
            Self::Unavailable(what) => ("unavailable", what.to_string()),
        };
        if status.is_server_error() {
            tracing::error!(code, %message, "api request failed");
        }
        (status, Json(json!({ "error": code, "message": message }))).into_response()
    }
}

/// Send a command built around a fresh reply channel and wait for the
/// control loop's answer.
async fn request<T>(
    commands: &mpsc::Sender<Command>,
    build: impl FnOnce(Reply<T>) -> Command,
) -> Result<T, ApiError> {
    let (tx, rx) = oneshot::channel();
    commands
        .send(build(tx))
        .await
        .map_err(|_| ApiError::Unavailable("control loop is not running"))?;
    let result = rx
        .await
        .map_err(|_| ApiError::Unavailable("control loop dropped the request"))?;
    Ok(result?)
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/status", get(api_status))
        .route("/api/profiles", get(list_profiles).post(save_profile))
        .route("/api/cycle/start", post(start_cycle))
        .route("/api/cycle/stop", post(stop_cycle))
        .route("/api/calibration", get(get_calibration))
        .route("/api/calibration/liquid", post(set_liquid_calibration))
        .route("/api/calibration/ph", post(set_ph_calibration))
        .route("/api/relay/{actuator}/toggle", post(toggle_relay))
        .with_state(state)
}

async fn api_status(State(state): State<AppState>) -> impl IntoResponse {
    let st = state.shared.read().await;
    Json(st.to_status())
}

async fn list_profiles(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let st = state.shared.read().await;
    st.profiles
        .clone()
        .map(Json)
        .ok_or(ApiError::Unavailable("no profile snapshot yet"))
}

#[derive(Serialize)]
struct Saved {
    status: &'static str,
    id: String,
}

async fn save_profile(
    State(state): State<AppState>,
    Json(draft): Json<ProfileDraft>,
) -> Result<impl IntoResponse, ApiError> {
    let profile = draft.into_profile();
    let id = profile.id.clone();
    request(&state.commands, |reply| Command::SaveProfile { profile, reply }).await?;
    Ok(Json(Saved { status: "ok", id }))
}

#[derive(Debug, Deserialize)]
struct StartRequest {
    profile_id: String,
    /// Unix seconds; defaults to now.
    #[serde(default)]
    start_timestamp: Option<i64>,
}

async fn start_cycle(
    State(state): State<AppState>,
    Json(req): Json<StartRequest>,
) -> Result<Json<GrowthCycle>, ApiError> {
    let cycle = request(&state.commands, |reply| Command::StartCycle {
        profile_id: req.profile_id,
        start_timestamp: req.start_timestamp,
        reply,
    })
    .await?;
    Ok(Json(cycle))
}

async fn stop_cycle(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    request(&state.commands, |reply| Command::StopCycle { reply }).await?;
    Ok(Json(json!({ "status": "ok" })))
}

async fn get_calibration(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let st = state.shared.read().await;
    st.calibration
        .clone()
        .map(Json)
        .ok_or(ApiError::Unavailable("no calibration snapshot yet"))
}

async fn set_liquid_calibration(
    State(state): State<AppState>,
    Json(calibration): Json<LiquidCalibration>,
) -> Result<impl IntoResponse, ApiError> {
    request(&state.commands, |reply| Command::SetLiquidCalibration {
        calibration,
        reply,
    })
    .await?;
    Ok(Json(json!({ "status": "ok" })))
}

async fn set_ph_calibration(
    State(state): State<AppState>,
    Json(calibration): Json<PhCalibration>,
) -> Result<impl IntoResponse, ApiError> {
    request(&state.commands, |reply| Command::SetPhCalibration { calibration, reply }).await?;
    Ok(Json(json!({ "status": "ok" })))
}

async fn toggle_relay(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let actuator: ActuatorKind = name
        .parse()
        .map_err(|_| ApiError::UnknownActuator(name.clone()))?;
    let (tx, rx) = oneshot::channel();
    state
        .commands
        .send(Command::Toggle { actuator, reply: tx })
        .await
        .map_err(|_| ApiError::Unavailable("control loop is not running"))?;
    let on = rx
        .await
        .map_err(|_| ApiError::Unavailable("control loop dropped the request"))?;
    Ok(Json(json!({ "actuator": actuator, "on": on })))
}

// ---------------------------------------------------------------------------
// Server entry-point
// ---------------------------------------------------------------------------

pub async fn serve(state: AppState, port: u16) {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await.expect("failed to bind web port");

    tracing::info!(%addr, "web api listening");

    if let Err(e) = axum::serve(listener, router(state)).await {
        tracing::error!(error = %e, "web server error");
    }
}

// ===========================================================================
// Tests
// ===========================================================================
