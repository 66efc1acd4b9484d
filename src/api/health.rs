// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{extract::State, Json};
use chrono::Utc;
use serde::Serialize;
use utoipa::ToSchema;

use crate::providers::HealthStatus;
use crate::resilience::{BreakerStatus, SystemMode};
use crate::state::AppState;

/// Health check response. `status` is "ok" in NORMAL mode, "degraded" otherwise.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub mode: SystemMode,
    pub providers: Vec<BreakerStatus>,
}

/// Health check endpoint handler.
///
/// Always 200 while the process serves requests; degraded operation is
/// reported in the body.
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses((status = 200, description = "Service health", body = HealthResponse))
)]
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let mode = state.modes.current_mode();
    Json(HealthResponse {
        status: if mode == SystemMode::Normal { "ok" } else { "degraded" }.to_string(),
        mode,
        providers: state.breakers.statuses_at(Utc::now()),
    })
}

/// Live health check of every configured provider gateway.
#[utoipa::path(
    get,
    path = "/health/providers",
    tag = "Health",
    responses((status = 200, description = "Provider health", body = [HealthStatus]))
)]
pub async fn provider_health(State(state): State<AppState>) -> Json<Vec<HealthStatus>> {
    Json(state.dispatcher.health_report().await)
}
