// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Signature request endpoints. Views never carry the challenge code.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::domain::{
    AbortReason, ChallengeStatus, ChannelType, Money, ProviderType, RoutingEvent,
    SignatureChallenge, SignatureRequest, SignatureStatus, TransactionContext,
};
use crate::error::ApiError;
use crate::signature::CreateSignature;
use crate::state::AppState;

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateSignatureBody {
    /// Pseudonymized customer reference.
    pub customer_id: String,
    /// Decimal amount, e.g. `"100.00"`.
    pub amount: String,
    pub currency: String,
    pub merchant_id: String,
    pub order_id: String,
    #[serde(default)]
    pub description: String,
    /// Caller-computed SHA-256; computed server-side when absent.
    #[serde(default)]
    pub integrity_hash: Option<String>,
    #[serde(default)]
    pub channel: Option<ChannelType>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CompleteSignatureBody {
    pub challenge_id: Uuid,
    pub code: String,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AbortSignatureBody {
    /// One of USER_CANCELLED, FRAUD_DETECTED, SYSTEM_ERROR, ADMIN_INTERVENTION.
    pub reason: String,
}

#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query, rename_all = "camelCase")]
pub struct ListSignaturesQuery {
    pub customer_id: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TransactionView {
    pub amount: String,
    pub currency: String,
    pub merchant_id: String,
    pub order_id: String,
    pub description: String,
    pub integrity_hash: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeView {
    pub id: Uuid,
    pub channel: ChannelType,
    pub provider: ProviderType,
    pub status: ChallengeStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SignatureRequestView {
    pub id: Uuid,
    pub customer_id: String,
    pub status: SignatureStatus,
    pub transaction: TransactionView,
    pub challenges: Vec<ChallengeView>,
    pub routing_timeline: Vec<RoutingEvent>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Negative once expired.
    pub remaining_ttl_seconds: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aborted_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abort_reason: Option<AbortReason>,
}

impl From<&SignatureChallenge> for ChallengeView {
    fn from(c: &SignatureChallenge) -> Self {
        Self {
            id: c.id(),
            channel: c.channel_type(),
            provider: c.provider(),
            status: c.status(),
            created_at: c.created_at(),
            sent_at: c.sent_at(),
            completed_at: c.completed_at(),
            expires_at: c.expires_at(),
            error_code: c.error_code().map(str::to_string),
        }
    }
}

impl From<&SignatureRequest> for SignatureRequestView {
    fn from(r: &SignatureRequest) -> Self {
        let ctx = r.transaction_context();
        Self {
            id: r.id(),
            customer_id: r.customer_id().to_string(),
            status: r.status(),
            transaction: TransactionView {
                amount: ctx.amount().amount_string(),
                currency: ctx.amount().currency().to_string(),
                merchant_id: ctx.merchant_id().to_string(),
                order_id: ctx.order_id().to_string(),
                description: ctx.description().to_string(),
                integrity_hash: ctx.integrity_hash().to_string(),
            },
            challenges: r.challenges().iter().map(ChallengeView::from).collect(),
            routing_timeline: r.routing_timeline().to_vec(),
            created_at: r.created_at(),
            expires_at: r.expires_at(),
            remaining_ttl_seconds: r.remaining_ttl(Utc::now()).num_seconds(),
            signed_at: r.signed_at(),
            aborted_at: r.aborted_at(),
            abort_reason: r.abort_reason(),
        }
    }
}

/// Create a signature request and dispatch its first challenge.
#[utoipa::path(
    post,
    path = "/v1/signatures",
    tag = "Signatures",
    request_body = CreateSignatureBody,
    responses(
        (status = 201, description = "Request created", body = SignatureRequestView),
        (status = 400, description = "Invalid transaction context")
    )
)]
pub async fn create_signature(
    State(state): State<AppState>,
    Json(body): Json<CreateSignatureBody>,
) -> Result<(StatusCode, Json<SignatureRequestView>), ApiError> {
    let amount = Money::parse(&body.amount, &body.currency)?;
    let transaction_context = match body.integrity_hash {
        Some(hash) => TransactionContext::new(
            amount,
            body.merchant_id,
            body.order_id,
            body.description,
            hash,
        )?,
        None => TransactionContext::sealed(amount, body.merchant_id, body.order_id, body.description)?,
    };

    let request = state
        .signatures
        .create_request(CreateSignature {
            customer_id: body.customer_id,
            transaction_context,
            preferred_channel: body.channel,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(SignatureRequestView::from(&request))))
}

#[utoipa::path(
    get,
    path = "/v1/signatures/{id}",
    tag = "Signatures",
    params(("id" = Uuid, Path, description = "Signature request id")),
    responses(
        (status = 200, description = "Signature request", body = SignatureRequestView),
        (status = 404, description = "Not found")
    )
)]
pub async fn get_signature(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SignatureRequestView>, ApiError> {
    let request = state.signatures.get(id)?;
    Ok(Json(SignatureRequestView::from(&request)))
}

/// Requests of one customer, newest first.
#[utoipa::path(
    get,
    path = "/v1/signatures",
    tag = "Signatures",
    params(ListSignaturesQuery),
    responses((status = 200, description = "Signature requests", body = [SignatureRequestView]))
)]
pub async fn list_signatures(
    State(state): State<AppState>,
    Query(query): Query<ListSignaturesQuery>,
) -> Result<Json<Vec<SignatureRequestView>>, ApiError> {
    let requests = state.signatures.find_by_customer(&query.customer_id)?;
    Ok(Json(requests.iter().map(SignatureRequestView::from).collect()))
}

#[utoipa::path(
    post,
    path = "/v1/signatures/{id}/complete",
    tag = "Signatures",
    params(("id" = Uuid, Path, description = "Signature request id")),
    request_body = CompleteSignatureBody,
    responses(
        (status = 200, description = "Request signed", body = SignatureRequestView),
        (status = 409, description = "Request not awaiting a code"),
        (status = 410, description = "Challenge expired"),
        (status = 422, description = "Wrong code")
    )
)]
pub async fn complete_signature(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<CompleteSignatureBody>,
) -> Result<Json<SignatureRequestView>, ApiError> {
    let request = state
        .signatures
        .complete_signature(id, body.challenge_id, &body.code)?;
    Ok(Json(SignatureRequestView::from(&request)))
}

#[utoipa::path(
    post,
    path = "/v1/signatures/{id}/abort",
    tag = "Signatures",
    params(("id" = Uuid, Path, description = "Signature request id")),
    request_body = AbortSignatureBody,
    responses(
        (status = 200, description = "Request aborted", body = SignatureRequestView),
        (status = 400, description = "Unknown reason"),
        (status = 409, description = "Request already settled")
    )
)]
pub async fn abort_signature(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<AbortSignatureBody>,
) -> Result<Json<SignatureRequestView>, ApiError> {
    let reason: AbortReason = body.reason.parse().map_err(ApiError::bad_request)?;
    if reason == AbortReason::FallbackExhausted {
        return Err(ApiError::bad_request("FALLBACK_EXHAUSTED is set by routing only"));
    }
    let request = state.signatures.abort_signature(id, reason)?;
    Ok(Json(SignatureRequestView::from(&request)))
}
