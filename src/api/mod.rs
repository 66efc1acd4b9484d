// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    domain::{
        AbortReason, ChallengeStatus, ChannelType, ProviderType, RoutingEvent, RoutingEventType,
        SignatureStatus,
    },
    providers::{HealthState, HealthStatus},
    resilience::{BreakerStatus, CircuitState, ModeStatus, RecoveryReport, SystemMode},
    state::AppState,
};

pub mod admin;
pub mod health;
pub mod signatures;

pub fn router(state: AppState) -> Router {
    let v1_routes = Router::new()
        .route(
            "/signatures",
            get(signatures::list_signatures).post(signatures::create_signature),
        )
        .route("/signatures/{id}", get(signatures::get_signature))
        .route(
            "/signatures/{id}/complete",
            post(signatures::complete_signature),
        )
        .route("/signatures/{id}/abort", post(signatures::abort_signature));

    let admin_routes = Router::new()
        .route("/system-mode", get(admin::get_system_mode))
        .route(
            "/system-mode/degraded",
            post(admin::enter_degraded_mode).delete(admin::exit_degraded_mode),
        )
        .route("/system-mode/maintenance", post(admin::enter_maintenance))
        .route("/providers", get(admin::list_breakers))
        .route("/providers/{provider}/probe", post(admin::probe_breaker))
        .route(
            "/providers/{provider}/force-open",
            post(admin::force_open_breaker),
        )
        .route("/providers/{provider}/reset", post(admin::reset_breaker))
        .route("/recovery/drain", post(admin::drain_recovery));

    Router::new()
        .route("/health", get(health::health))
        .route("/health/providers", get(health::provider_health))
        .route("/metrics", get(admin::metrics))
        .nest("/v1", v1_routes)
        .nest("/admin", admin_routes)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(CorsLayer::permissive())
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        health::provider_health,
        signatures::create_signature,
        signatures::get_signature,
        signatures::list_signatures,
        signatures::complete_signature,
        signatures::abort_signature,
        admin::get_system_mode,
        admin::enter_degraded_mode,
        admin::exit_degraded_mode,
        admin::enter_maintenance,
        admin::list_breakers,
        admin::probe_breaker,
        admin::force_open_breaker,
        admin::reset_breaker,
        admin::drain_recovery,
        admin::metrics
    ),
    components(
        schemas(
            health::HealthResponse,
            HealthStatus,
            HealthState,
            signatures::CreateSignatureBody,
            signatures::CompleteSignatureBody,
            signatures::AbortSignatureBody,
            signatures::SignatureRequestView,
            signatures::ChallengeView,
            signatures::TransactionView,
            admin::ModeOverrideRequest,
            ChannelType,
            ProviderType,
            SignatureStatus,
            ChallengeStatus,
            AbortReason,
            RoutingEvent,
            RoutingEventType,
            BreakerStatus,
            CircuitState,
            ModeStatus,
            SystemMode,
            RecoveryReport
        )
    ),
    tags(
        (name = "Health", description = "Liveness and provider health"),
        (name = "Signatures", description = "Signature request lifecycle"),
        (name = "Admin", description = "System mode, circuit breakers and recovery")
    )
)]
struct ApiDoc;

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::domain::ProviderResult;
    use crate::providers::testing::ScriptedProvider;
    use crate::resilience::DegradedModeRecoveryService;
    use crate::signature::testing::Harness;

    fn app_state(h: &Harness) -> AppState {
        AppState {
            signatures: h.service.clone(),
            modes: h.modes.clone(),
            breakers: h.breakers.clone(),
            dispatcher: h.dispatcher.clone(),
            recovery: Arc::new(DegradedModeRecoveryService::new(
                h.db.clone(),
                h.service.clone(),
                h.modes.clone(),
                100,
            )),
            metrics: h.metrics.clone(),
        }
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let response = app
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::String(String::from_utf8_lossy(&bytes).into()))
        };
        (status, value)
    }

    fn create_body() -> Value {
        json!({
            "customerId": "cust-7f3a",
            "amount": "100.00",
            "currency": "EUR",
            "merchantId": "merchant-42",
            "orderId": "order-1001",
            "description": "Card payment"
        })
    }

    #[tokio::test]
    async fn router_builds_with_all_routes() {
        let h = Harness::new();
        let app = router(app_state(&h));
        let _ = app.into_make_service();
    }

    #[tokio::test]
    async fn create_then_complete_over_http() {
        let h = Harness::new();
        let app = router(app_state(&h));

        let (status, created) = send(&app, "POST", "/v1/signatures", Some(create_body())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["status"], "CHALLENGED");
        assert_eq!(created["challenges"][0]["channel"], "SMS");
        assert!(created["challenges"][0].get("challengeCode").is_none());
        assert_eq!(created["transaction"]["amount"], "100.00");

        let id = created["id"].as_str().unwrap().to_string();
        let stored = h.service.get(id.parse().unwrap()).unwrap();
        let challenge = &stored.challenges()[0];

        let (status, signed) = send(
            &app,
            "POST",
            &format!("/v1/signatures/{id}/complete"),
            Some(json!({ "challengeId": challenge.id(), "code": challenge.challenge_code() })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(signed["status"], "SIGNED");

        let (status, listed) = send(&app, "GET", "/v1/signatures?customerId=cust-7f3a", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listed.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn wrong_code_is_unprocessable() {
        let h = Harness::new();
        let app = router(app_state(&h));
        let (_, created) = send(&app, "POST", "/v1/signatures", Some(create_body())).await;
        let id = created["id"].as_str().unwrap();
        let challenge_id = created["challenges"][0]["id"].as_str().unwrap();

        let (status, body) = send(
            &app,
            "POST",
            &format!("/v1/signatures/{id}/complete"),
            Some(json!({ "challengeId": challenge_id, "code": "not-a-code" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn bad_integrity_hash_is_rejected() {
        let h = Harness::new();
        let app = router(app_state(&h));
        let mut body = create_body();
        body["integrityHash"] = json!("abc");

        let (status, _) = send(&app, "POST", "/v1/signatures", Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn abort_twice_conflicts() {
        let h = Harness::new();
        let app = router(app_state(&h));
        let (_, created) = send(&app, "POST", "/v1/signatures", Some(create_body())).await;
        let uri = format!("/v1/signatures/{}/abort", created["id"].as_str().unwrap());

        let (status, aborted) = send(&app, "POST", &uri, Some(json!({ "reason": "USER_CANCELLED" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(aborted["abortReason"], "USER_CANCELLED");

        let (status, _) = send(&app, "POST", &uri, Some(json!({ "reason": "USER_CANCELLED" }))).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = send(&app, "POST", &uri, Some(json!({ "reason": "FALLBACK_EXHAUSTED" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_request_is_not_found() {
        let h = Harness::new();
        let app = router(app_state(&h));
        let (status, _) = send(
            &app,
            "GET",
            &format!("/v1/signatures/{}", uuid::Uuid::now_v7()),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn degraded_override_parks_and_exit_restores_health() {
        let h = Harness::new();
        let app = router(app_state(&h));

        let (status, mode) = send(
            &app,
            "POST",
            "/admin/system-mode/degraded",
            Some(json!({ "reason": "SMS gateway incident" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(mode["mode"], "DEGRADED");
        assert_eq!(mode["reason"], "SMS gateway incident");

        let (_, health) = send(&app, "GET", "/health", None).await;
        assert_eq!(health["status"], "degraded");

        let (_, created) = send(&app, "POST", "/v1/signatures", Some(create_body())).await;
        assert_eq!(created["status"], "PENDING_DEGRADED");

        let (status, mode) = send(&app, "DELETE", "/admin/system-mode/degraded", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(mode["mode"], "NORMAL");

        let (_, report) = send(&app, "POST", "/admin/recovery/drain", None).await;
        assert_eq!(report["recovered"], 1);

        let (_, health) = send(&app, "GET", "/health", None).await;
        assert_eq!(health["status"], "ok");
        assert_eq!(health["providers"].as_array().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn blank_reason_is_rejected() {
        let h = Harness::new();
        let app = router(app_state(&h));
        let (status, _) = send(
            &app,
            "POST",
            "/admin/system-mode/degraded",
            Some(json!({ "reason": "  " })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn breaker_controls_round_trip() {
        let h = Harness::new();
        let app = router(app_state(&h));

        let (status, breaker) = send(&app, "POST", "/admin/providers/sms/force-open", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(breaker["provider"], "SMS");
        assert_eq!(breaker["circuitState"], "FORCED_OPEN");

        let (_, breaker) = send(&app, "POST", "/admin/providers/SMS/probe", None).await;
        assert_eq!(breaker["circuitState"], "HALF_OPEN");

        let (_, breaker) = send(&app, "POST", "/admin/providers/SMS/reset", None).await;
        assert_eq!(breaker["circuitState"], "CLOSED");

        let (status, _) = send(&app, "POST", "/admin/providers/fax/reset", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn provider_health_reports_each_gateway() {
        let h = Harness::with_providers(vec![
            ScriptedProvider::ok(ProviderType::Sms),
            ScriptedProvider::always(ProviderType::Voice, ProviderResult::failure("X", "x")).unhealthy(),
        ]);
        let app = router(app_state(&h));

        let (status, report) = send(&app, "GET", "/health/providers", None).await;
        assert_eq!(status, StatusCode::OK);
        let report = report.as_array().unwrap();
        assert_eq!(report.len(), 2);
        assert!(report.iter().any(|s| s["provider"] == "VOICE" && s["status"] == "DOWN"));
    }

    #[tokio::test]
    async fn metrics_are_exposed_as_text() {
        let h = Harness::new();
        let app = router(app_state(&h));
        send(&app, "POST", "/v1/signatures", Some(create_body())).await;

        let (status, body) = send(&app, "GET", "/metrics", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.as_str().unwrap().contains("signature_requests_created_total 1"));
    }
}
