// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Operator endpoints: system mode overrides, breaker controls, the recovery
//! pass and the Prometheus scrape.

use axum::{
    extract::{Path, State},
    http::header,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use tracing::{error, info};
use utoipa::ToSchema;

use crate::{
    domain::ProviderType,
    error::ApiError,
    resilience::{BreakerStatus, CircuitTransition, ModeStatus, RecoveryReport},
    state::AppState,
};

// ============================================================================
// Request Types
// ============================================================================

#[derive(Debug, Deserialize, ToSchema)]
pub struct ModeOverrideRequest {
    /// Recorded with the transition and shown in the mode status.
    pub reason: String,
}

// ============================================================================
// System Mode
// ============================================================================

#[utoipa::path(
    get,
    path = "/admin/system-mode",
    tag = "Admin",
    responses((status = 200, description = "Current system mode", body = ModeStatus))
)]
pub async fn get_system_mode(State(state): State<AppState>) -> Json<ModeStatus> {
    Json(state.modes.status())
}

/// Force DEGRADED. Entering again only replaces the reason.
#[utoipa::path(
    post,
    path = "/admin/system-mode/degraded",
    tag = "Admin",
    request_body = ModeOverrideRequest,
    responses(
        (status = 200, description = "System degraded", body = ModeStatus),
        (status = 400, description = "Missing reason")
    )
)]
pub async fn enter_degraded_mode(
    State(state): State<AppState>,
    Json(body): Json<ModeOverrideRequest>,
) -> Result<Json<ModeStatus>, ApiError> {
    let reason = required_reason(body)?;
    info!(reason = %reason, "Operator forcing degraded mode");
    state.modes.enter_degraded_mode(reason);
    Ok(Json(state.modes.status()))
}

/// Back to NORMAL. Parked requests are drained by the recovery poller.
#[utoipa::path(
    delete,
    path = "/admin/system-mode/degraded",
    tag = "Admin",
    responses((status = 200, description = "System normal", body = ModeStatus))
)]
pub async fn exit_degraded_mode(State(state): State<AppState>) -> Json<ModeStatus> {
    if state.modes.exit_degraded_mode().is_some() {
        info!("Operator restored normal mode");
    }
    Json(state.modes.status())
}

#[utoipa::path(
    post,
    path = "/admin/system-mode/maintenance",
    tag = "Admin",
    request_body = ModeOverrideRequest,
    responses(
        (status = 200, description = "System in maintenance", body = ModeStatus),
        (status = 400, description = "Missing reason")
    )
)]
pub async fn enter_maintenance(
    State(state): State<AppState>,
    Json(body): Json<ModeOverrideRequest>,
) -> Result<Json<ModeStatus>, ApiError> {
    let reason = required_reason(body)?;
    info!(reason = %reason, "Operator entering maintenance mode");
    state.modes.enter_maintenance(reason);
    Ok(Json(state.modes.status()))
}

// ============================================================================
// Circuit Breakers
// ============================================================================

#[utoipa::path(
    get,
    path = "/admin/providers",
    tag = "Admin",
    responses((status = 200, description = "Breaker state per provider", body = [BreakerStatus]))
)]
pub async fn list_breakers(State(state): State<AppState>) -> Json<Vec<BreakerStatus>> {
    Json(state.breakers.statuses_at(Utc::now()))
}

/// OPEN or FORCED_OPEN -> HALF_OPEN without waiting for the open timeout.
#[utoipa::path(
    post,
    path = "/admin/providers/{provider}/probe",
    tag = "Admin",
    params(("provider" = String, Path, description = "Provider type, e.g. SMS")),
    responses(
        (status = 200, description = "Breaker status after the probe", body = BreakerStatus),
        (status = 400, description = "Unknown provider")
    )
)]
pub async fn probe_breaker(
    State(state): State<AppState>,
    Path(provider): Path<String>,
) -> Result<Json<BreakerStatus>, ApiError> {
    let provider = parse_provider(&provider)?;
    let transition = state.breakers.probe(provider);
    breaker_response(&state, provider, transition)
}

#[utoipa::path(
    post,
    path = "/admin/providers/{provider}/force-open",
    tag = "Admin",
    params(("provider" = String, Path, description = "Provider type, e.g. SMS")),
    responses(
        (status = 200, description = "Breaker status after forcing open", body = BreakerStatus),
        (status = 400, description = "Unknown provider")
    )
)]
pub async fn force_open_breaker(
    State(state): State<AppState>,
    Path(provider): Path<String>,
) -> Result<Json<BreakerStatus>, ApiError> {
    let provider = parse_provider(&provider)?;
    let transition = state.breakers.force_open(provider);
    breaker_response(&state, provider, transition)
}

#[utoipa::path(
    post,
    path = "/admin/providers/{provider}/reset",
    tag = "Admin",
    params(("provider" = String, Path, description = "Provider type, e.g. SMS")),
    responses(
        (status = 200, description = "Breaker status after reset", body = BreakerStatus),
        (status = 400, description = "Unknown provider")
    )
)]
pub async fn reset_breaker(
    State(state): State<AppState>,
    Path(provider): Path<String>,
) -> Result<Json<BreakerStatus>, ApiError> {
    let provider = parse_provider(&provider)?;
    let transition = state.breakers.reset(provider);
    breaker_response(&state, provider, transition)
}

// ============================================================================
// Recovery and Metrics
// ============================================================================

/// Run one recovery pass now. A no-op unless the system is NORMAL.
#[utoipa::path(
    post,
    path = "/admin/recovery/drain",
    tag = "Admin",
    responses((status = 200, description = "Recovery pass summary", body = RecoveryReport))
)]
pub async fn drain_recovery(State(state): State<AppState>) -> Json<RecoveryReport> {
    Json(state.recovery.drain().await)
}

/// Prometheus text exposition.
#[utoipa::path(
    get,
    path = "/metrics",
    tag = "Admin",
    responses((status = 200, description = "Prometheus metrics", body = String, content_type = "text/plain"))
)]
pub async fn metrics(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let body = state.metrics.encode_text().map_err(|e| {
        error!(error = %e, "Failed to encode metrics");
        ApiError::internal("metrics unavailable")
    })?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    ))
}

// ============================================================================
// Helpers
// ============================================================================

fn required_reason(body: ModeOverrideRequest) -> Result<String, ApiError> {
    let reason = body.reason.trim();
    if reason.is_empty() {
        return Err(ApiError::bad_request("reason is required"));
    }
    Ok(reason.to_string())
}

fn parse_provider(raw: &str) -> Result<ProviderType, ApiError> {
    raw.parse().map_err(ApiError::bad_request)
}

fn breaker_response(
    state: &AppState,
    provider: ProviderType,
    transition: Option<CircuitTransition>,
) -> Result<Json<BreakerStatus>, ApiError> {
    if let Some(t) = transition {
        info!(provider = %provider, from = %t.from.as_str(), to = %t.to.as_str(), "Operator changed breaker state");
    }
    state
        .breakers
        .statuses_at(Utc::now())
        .into_iter()
        .find(|status| status.provider == provider)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("no breaker for {provider}")))
}
