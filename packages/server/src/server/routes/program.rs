//! Flow-control endpoints.
//!
//! POST /api/program/pause
//! POST /api/program/resume
//! POST /api/program/delay        { "delayMs": 500 }
//! POST /api/program/auto-pause   { "enabled": true, "threshold": 10 }
//! GET  /api/program/status

use std::time::Duration;

use axum::{extract::Extension, Json};
use serde::{Deserialize, Serialize};

use crate::domains::agents::FlowStatus;
use crate::server::app::AppState;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelayRequest {
    pub delay_ms: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoPauseRequest {
    pub enabled: bool,
    #[serde(default)]
    pub threshold: Option<u32>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeResponse {
    pub resumed: usize,
    pub status: FlowStatus,
}

pub async fn status_handler(Extension(state): Extension<AppState>) -> Json<FlowStatus> {
    Json(state.orchestrator.status())
}

pub async fn pause_handler(Extension(state): Extension<AppState>) -> Json<FlowStatus> {
    state.orchestrator.pause().await;
    Json(state.orchestrator.status())
}

pub async fn resume_handler(Extension(state): Extension<AppState>) -> Json<ResumeResponse> {
    let resumed = state.orchestrator.resume().await;
    Json(ResumeResponse {
        resumed,
        status: state.orchestrator.status(),
    })
}

pub async fn delay_handler(
    Extension(state): Extension<AppState>,
    Json(body): Json<DelayRequest>,
) -> Json<FlowStatus> {
    state
        .orchestrator
        .set_delay(Duration::from_millis(body.delay_ms));
    Json(state.orchestrator.status())
}

pub async fn auto_pause_handler(
    Extension(state): Extension<AppState>,
    Json(body): Json<AutoPauseRequest>,
) -> Json<FlowStatus> {
    state
        .orchestrator
        .set_auto_pause(body.enabled, body.threshold);
    Json(state.orchestrator.status())
}
