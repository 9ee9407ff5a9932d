//! Axum routes and handlers backing the companion UI.
//!
//! Handlers read the shared job for their precondition checks and propose
//! status changes over the transition channel; they never wait for the
//! tick loop to apply them. Precondition failures come back as 400 with a
//! human-readable body.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tokio::sync::{mpsc, RwLock};
use tracing::{error, info};

use crate::daemon::{request_transition, FeederSlot};
use crate::job::{Job, JobStatus};
use crate::web::control_headers;
use crate::web::models::JobInfo;

pub struct AppState {
    pub job: Arc<RwLock<Job>>,
    pub feeder: FeederSlot,
    pub transitions: mpsc::Sender<JobStatus>,
}

pub type SharedState = Arc<AppState>;

pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/info", get(info_handler))
        .route("/start", get(start_handler))
        .route("/pause", get(pause_handler))
        .route("/reschedule", get(reschedule_handler))
        .route("/cancel", get(cancel_handler))
        .route("/version", get(version_handler))
        .with_state(state)
}

async fn info_handler(State(state): State<SharedState>) -> impl IntoResponse {
    info!("received info handler request");
    let info = JobInfo::from(&*state.job.read().await);
    match serde_json::to_string(&info) {
        Ok(body) => (StatusCode::OK, control_headers(), body),
        Err(err) => {
            error!("failed to respond on /info request: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                control_headers(),
                err.to_string(),
            )
        }
    }
}

/// `/start` acknowledges the button press, or resumes a paused print.
async fn start_handler(State(state): State<SharedState>) -> impl IntoResponse {
    info!("received start handler request");
    let status = state.job.read().await.status;
    match status {
        JobStatus::WaitingButton => {
            request_transition(&state.transitions, JobStatus::Sending);
            (StatusCode::OK, control_headers(), String::new())
        }
        JobStatus::Paused => {
            if let Some(feeder) = state.feeder.read().await.clone() {
                feeder.start();
            }
            request_transition(&state.transitions, JobStatus::Printing);
            (StatusCode::OK, control_headers(), String::new())
        }
        other => {
            let message = format!("Ignore buttonpress in '{other}' status");
            info!("{message}");
            (StatusCode::BAD_REQUEST, control_headers(), message)
        }
    }
}

async fn pause_handler(State(state): State<SharedState>) -> impl IntoResponse {
    info!("received pause handler request");
    let status = state.job.read().await.status;
    if status != JobStatus::Printing {
        let message = "Ignore pause, not printing".to_string();
        info!("{message}");
        return (StatusCode::BAD_REQUEST, control_headers(), message);
    }
    if let Some(feeder) = state.feeder.read().await.clone() {
        feeder.pause();
    }
    request_transition(&state.transitions, JobStatus::Paused);
    (StatusCode::OK, control_headers(), String::new())
}

/// `/reschedule` restarts the button-press window.
async fn reschedule_handler(State(state): State<SharedState>) -> impl IntoResponse {
    info!("received reschedule handler request");
    let mut job = state.job.write().await;
    if job.status != JobStatus::WaitingButton {
        let message = format!("Ignore reschedule in '{}' status", job.status);
        info!("{message}");
        return (StatusCode::BAD_REQUEST, control_headers(), message);
    }
    job.arm_button_window();
    (StatusCode::OK, control_headers(), String::new())
}

async fn cancel_handler(State(state): State<SharedState>) -> impl IntoResponse {
    info!("received cancel handler request");
    let mut job = state.job.write().await;
    if job.id == 0 {
        let message = "Ignore cancel, no job scheduled".to_string();
        info!("{message}");
        return (StatusCode::BAD_REQUEST, control_headers(), message);
    }
    job.scheduled = None;
    request_transition(&state.transitions, JobStatus::Cancelling);
    (StatusCode::OK, control_headers(), String::new())
}

async fn version_handler() -> impl IntoResponse {
    info!("received version handler request");
    (
        StatusCode::OK,
        control_headers(),
        env!("CARGO_PKG_VERSION").to_string(),
    )
}
