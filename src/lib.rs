// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Signature Router - resilient delivery of transaction signature challenges
//!
//! A customer authorizes a transaction by echoing a one-time code sent over
//! SMS, push, voice or biometric channels. This crate keeps that flow alive
//! when provider gateways misbehave: calls are retried and time-boxed, each
//! provider sits behind a circuit breaker, routing falls back across
//! channels, and a system-wide degraded mode parks new requests until
//! providers recover.
//!
//! ## Modules
//!
//! - `domain` - `SignatureRequest` aggregate, challenges and domain events
//! - `resilience` - Health windows, circuit breakers, degraded mode, recovery
//! - `routing` - Channel selection with fallback
//! - `providers` - Provider trait, HTTP gateways and the retrying dispatcher
//! - `signature` - Application service tying the above together
//! - `outbox` - Transactional outbox written with each state change
//! - `storage` - redb persistence
//! - `api` - HTTP API handlers (Axum)

pub mod api;
pub mod config;
pub mod domain;
pub mod error;
pub mod metrics;
pub mod outbox;
pub mod providers;
pub mod resilience;
pub mod routing;
pub mod scheduler;
pub mod signature;
pub mod state;
pub mod storage;
