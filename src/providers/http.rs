// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! JSON-over-HTTP gateway used for every channel.
//!
//! `POST {base}/challenges` delivers a code, `GET {base}/health` reports
//! gateway liveness. A 4xx answer carrying `errorCode` becomes a failure
//! with that code; anything else unexpected is `PROVIDER_ERROR`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::{HealthStatus, ProviderError, SignatureProvider};
use crate::domain::{ProviderResult, ProviderType, SignatureChallenge};

const PROVIDER_ERROR_CODE: &str = "PROVIDER_ERROR";

#[derive(Debug, Clone)]
pub struct HttpChannelProvider {
    provider: ProviderType,
    base_url: String,
    timeout: Duration,
    http: Client,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeliveryResponse {
    provider_challenge_id: String,
    #[serde(default)]
    proof: Option<String>,
}

impl HttpChannelProvider {
    pub fn new(
        provider: ProviderType,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(ProviderError::Config(format!(
                "{provider} provider has no base URL"
            )));
        }

        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            provider,
            base_url,
            timeout,
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post_challenge(&self, payload: &Value) -> Result<DeliveryResponse, ProviderFailure> {
        let response = self
            .http
            .post(format!("{}/challenges", self.base_url))
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderFailure::TimedOut
                } else {
                    ProviderFailure::Coded(
                        PROVIDER_ERROR_CODE.to_string(),
                        format!("POST /challenges failed: {e}"),
                    )
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let code = if status.is_client_error() {
                error_code_from_body(&body)
            } else {
                None
            };
            return Err(ProviderFailure::Coded(
                code.unwrap_or_else(|| PROVIDER_ERROR_CODE.to_string()),
                format!("POST /challenges returned {status}: {body}"),
            ));
        }

        response.json().await.map_err(|e| {
            ProviderFailure::Coded(
                PROVIDER_ERROR_CODE.to_string(),
                ProviderError::InvalidResponse(format!("POST /challenges invalid JSON: {e}"))
                    .to_string(),
            )
        })
    }
}

enum ProviderFailure {
    TimedOut,
    Coded(String, String),
}

/// Reads `errorCode` from a provider error body, if it is JSON.
pub fn error_code_from_body(body: &str) -> Option<String> {
    serde_json::from_str::<Value>(body)
        .ok()?
        .get("errorCode")
        .and_then(Value::as_str)
        .map(|code| code.trim().to_ascii_uppercase())
        .filter(|code| !code.is_empty())
}

#[async_trait]
impl SignatureProvider for HttpChannelProvider {
    fn provider_type(&self) -> ProviderType {
        self.provider
    }

    async fn send_challenge(&self, challenge: &SignatureChallenge, recipient: &str) -> ProviderResult {
        let payload = json!({
            "challengeId": challenge.id(),
            "requestId": challenge.signature_request_id(),
            "channel": challenge.channel_type().as_str(),
            "recipient": recipient,
            "code": challenge.challenge_code(),
        });

        match self.post_challenge(&payload).await {
            Ok(delivery) => {
                debug!(
                    provider = %self.provider,
                    provider_challenge_id = %delivery.provider_challenge_id,
                    "Challenge accepted by provider"
                );
                let proof = delivery
                    .proof
                    .unwrap_or_else(|| delivery.provider_challenge_id.clone());
                ProviderResult::success(delivery.provider_challenge_id, proof)
            }
            Err(ProviderFailure::TimedOut) => ProviderResult::timeout(self.timeout),
            Err(ProviderFailure::Coded(code, message)) => ProviderResult::failure(code, message),
        }
    }

    async fn health_check(&self) -> HealthStatus {
        match self.http.get(format!("{}/health", self.base_url)).send().await {
            Ok(response) if response.status().is_success() => {
                HealthStatus::up(self.provider, format!("{} reachable", self.base_url))
            }
            Ok(response) => HealthStatus::down(
                self.provider,
                format!("GET /health returned {}", response.status()),
            ),
            Err(e) => HealthStatus::down(self.provider, format!("GET /health failed: {e}")),
        }
    }
}
