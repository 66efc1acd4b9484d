// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;

use crate::domain::SignatureError;
use crate::signature::ServiceError;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    pub fn unprocessable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl From<SignatureError> for ApiError {
    fn from(err: SignatureError) -> Self {
        let message = err.to_string();
        match err {
            SignatureError::ChallengeAlreadyActive { .. } | SignatureError::InvalidTransition { .. } => {
                Self::conflict(message)
            }
            SignatureError::ChallengeNotFound(_) | SignatureError::RequestNotFound(_) => {
                Self::not_found(message)
            }
            SignatureError::ChallengeExpired(_) => Self::new(StatusCode::GONE, message),
            SignatureError::InvalidCode => Self::unprocessable(message),
            SignatureError::ChallengeNotOwned { .. } | SignatureError::InvalidTransactionContext(_) => {
                Self::bad_request(message)
            }
            SignatureError::EntropyUnavailable => {
                error!(error = %message, "Challenge code generation failed");
                Self::internal("challenge generation unavailable")
            }
        }
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Signature(e) => e.into(),
            ServiceError::NotFound(id) => Self::not_found(format!("signature request {id} not found")),
            ServiceError::Storage(_) | ServiceError::Outbox(_) => {
                error!(error = %err, "Signature operation failed");
                Self::internal("storage failure")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.message,
        });
        (self.status, body).into_response()
    }
}
