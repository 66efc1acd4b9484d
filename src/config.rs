// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Loaded once from the environment at startup. Every variable has a
//! default; malformed values are rejected rather than silently replaced.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `DATA_DIR` | Directory holding the redb database | `./data` |
//! | `LOG_FORMAT` | `json` or `pretty` | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,signature_router=debug` |
//! | `SIGNATURE_TTL_SECS` | Request lifetime; challenges expire with their request | `180` |
//! | `DEFAULT_CHANNEL` | First channel tried | `SMS` |
//! | `DEGRADED_ERROR_RATE_THRESHOLD` | Error rate that starts the degraded timer | `0.80` |
//! | `DEGRADED_MIN_DURATION_SECS` | How long it must hold | `120` |
//! | `DEGRADED_RECOVERY_THRESHOLD` | Error rate that starts the recovery timer | `0.50` |
//! | `DEGRADED_RECOVERY_DURATION_SECS` | How long it must hold | `300` |
//! | `DEGRADED_CIRCUIT_OPEN_THRESHOLD` | Open breakers that degrade immediately | `3` |
//! | `DEGRADED_EVALUATION_INTERVAL_SECS` | Evaluation period | `30` |
//! | `RECOVERY_BATCH_SIZE` | Parked requests per recovery pass | `100` |
//! | `RECOVERY_INTERVAL_SECS` | Recovery pass period | `60` |
//! | `CB_FAILURE_RATE_THRESHOLD` | Breaker opening failure rate | `0.50` |
//! | `CB_MINIMUM_CALLS` | Calls before the rate counts | `10` |
//! | `CB_WAIT_IN_OPEN_SECS` | OPEN before a trial is allowed | `30` |
//! | `CB_HALF_OPEN_PERMITTED_CALLS` | Trial calls in HALF_OPEN | `3` |
//! | `HEALTH_WINDOW_SECS` | Rolling error-rate window | `60` |
//! | `PROVIDER_TIMEOUT_MS` | Per-call timeout | `5000` |
//! | `PROVIDER_MAX_ATTEMPTS` | Attempts per challenge | `3` |
//! | `PROVIDER_RETRY_BASE_DELAY_MS` | First backoff delay | `200` |
//! | `PROVIDER_MAX_CONCURRENCY` | In-flight provider calls | `32` |
//! | `PROVIDER_SMS_URL` etc. | Gateway base URL per channel; unset disables it | unset |
//! | `EXPIRY_SWEEP_INTERVAL_SECS` | Expiry sweep period | `15` |

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::domain::{ChannelType, ProviderType};
use crate::providers::{DispatcherConfig, RetryPolicy};
use crate::resilience::{CircuitBreakerConfig, DegradedModeConfig};

pub const DATA_DIR_ENV: &str = "DATA_DIR";
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";
pub const DEFAULT_LOG_FILTER: &str = "info,signature_router=debug";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },

    #[error("cannot parse {name}={value:?}: {reason}")]
    Parse {
        name: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub log_format: LogFormat,
    pub signature_ttl: Duration,
    pub default_channel: ChannelType,
    pub degraded: DegradedModeConfig,
    pub recovery_batch_size: usize,
    pub recovery_interval: Duration,
    pub circuit_breaker: CircuitBreakerConfig,
    pub health_window: Duration,
    pub dispatcher: DispatcherConfig,
    /// Gateway URL per provider; providers without one are disabled.
    pub provider_urls: Vec<(ProviderType, String)>,
    pub expiry_sweep_interval: Duration,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source; `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env(&lookup);

        let degraded = DegradedModeConfig {
            error_rate_threshold: env.parse("DEGRADED_ERROR_RATE_THRESHOLD", 0.80)?,
            min_duration: env.secs("DEGRADED_MIN_DURATION_SECS", 120)?,
            recovery_threshold: env.parse("DEGRADED_RECOVERY_THRESHOLD", 0.50)?,
            recovery_duration: env.secs("DEGRADED_RECOVERY_DURATION_SECS", 300)?,
            circuit_open_threshold: env.parse("DEGRADED_CIRCUIT_OPEN_THRESHOLD", 3)?,
            evaluation_interval: env.secs("DEGRADED_EVALUATION_INTERVAL_SECS", 30)?,
        };

        let circuit_breaker = CircuitBreakerConfig {
            failure_rate_threshold: env.parse("CB_FAILURE_RATE_THRESHOLD", 0.50)?,
            minimum_calls: env.parse("CB_MINIMUM_CALLS", 10)?,
            wait_in_open: env.secs("CB_WAIT_IN_OPEN_SECS", 30)?,
            permitted_calls_in_half_open: env.parse("CB_HALF_OPEN_PERMITTED_CALLS", 3)?,
        };

        let dispatcher = DispatcherConfig {
            call_timeout: Duration::from_millis(env.parse("PROVIDER_TIMEOUT_MS", 5000)?),
            retry: RetryPolicy::exponential(
                env.parse("PROVIDER_MAX_ATTEMPTS", 3)?,
                Duration::from_millis(env.parse("PROVIDER_RETRY_BASE_DELAY_MS", 200)?),
            )
            .with_max_delay(Duration::from_secs(2)),
            max_concurrency: env.parse("PROVIDER_MAX_CONCURRENCY", 32)?,
        };

        let provider_urls = ProviderType::ALL
            .into_iter()
            .filter_map(|provider| {
                let name = provider_url_var(provider);
                env.optional(name).map(|url| (provider, url))
            })
            .collect();

        let log_format = match env.string(LOG_FORMAT_ENV, "pretty").to_ascii_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        let config = Self {
            host: env.string("HOST", "0.0.0.0"),
            port: env.parse("PORT", 8080)?,
            data_dir: PathBuf::from(env.string(DATA_DIR_ENV, "./data")),
            log_format,
            signature_ttl: env.secs("SIGNATURE_TTL_SECS", 180)?,
            default_channel: env.parse("DEFAULT_CHANNEL", ChannelType::Sms)?,
            degraded,
            recovery_batch_size: env.parse("RECOVERY_BATCH_SIZE", 100)?,
            recovery_interval: env.secs("RECOVERY_INTERVAL_SECS", 60)?,
            circuit_breaker,
            health_window: env.secs("HEALTH_WINDOW_SECS", 60)?,
            dispatcher,
            provider_urls,
            expiry_sweep_interval: env.secs("EXPIRY_SWEEP_INTERVAL_SECS", 15)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.degraded.validate()?;

        let rate = self.circuit_breaker.failure_rate_threshold;
        if !(rate > 0.0 && rate <= 1.0) {
            return Err(ConfigError::Invalid {
                name: "CB_FAILURE_RATE_THRESHOLD",
                reason: format!("{rate} is outside (0, 1]"),
            });
        }
        for (name, value) in [
            ("SIGNATURE_TTL_SECS", self.signature_ttl),
            ("RECOVERY_INTERVAL_SECS", self.recovery_interval),
            ("HEALTH_WINDOW_SECS", self.health_window),
            ("PROVIDER_TIMEOUT_MS", self.dispatcher.call_timeout),
            ("EXPIRY_SWEEP_INTERVAL_SECS", self.expiry_sweep_interval),
        ] {
            if value.is_zero() {
                return Err(ConfigError::Invalid {
                    name,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        for (name, value) in [
            ("RECOVERY_BATCH_SIZE", self.recovery_batch_size),
            ("PROVIDER_MAX_CONCURRENCY", self.dispatcher.max_concurrency),
            (
                "CB_HALF_OPEN_PERMITTED_CALLS",
                self.circuit_breaker.permitted_calls_in_half_open as usize,
            ),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    name,
                    reason: "must be at least 1".to_string(),
                });
            }
        }
        for (provider, url) in &self.provider_urls {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::Invalid {
                    name: provider_url_var(*provider),
                    reason: format!("`{url}` is not an http(s) URL"),
                });
            }
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Channels that have a gateway configured.
    pub fn enabled_channels(&self) -> Vec<ChannelType> {
        self.provider_urls.iter().map(|(p, _)| p.channel()).collect()
    }
}

fn provider_url_var(provider: ProviderType) -> &'static str {
    match provider {
        ProviderType::Sms => "PROVIDER_SMS_URL",
        ProviderType::Push => "PROVIDER_PUSH_URL",
        ProviderType::Voice => "PROVIDER_VOICE_URL",
        ProviderType::Biometric => "PROVIDER_BIOMETRIC_URL",
    }
}

struct Env<'a, F: Fn(&str) -> Option<String>>(&'a F);

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    fn optional(&self, name: &str) -> Option<String> {
        (self.0)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn string(&self, name: &str, default: &str) -> String {
        self.optional(name).unwrap_or_else(|| default.to_string())
    }

    fn parse<T>(&self, name: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.optional(name) {
            None => Ok(default),
            Some(value) => value.parse().map_err(|e: T::Err| ConfigError::Parse {
                name,
                reason: e.to_string(),
                value,
            }),
        }
    }

    fn secs(&self, name: &'static str, default: u64) -> Result<Duration, ConfigError> {
        self.parse(name, default).map(Duration::from_secs)
    }
}
