// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Delivery channels and the provider family serving each one.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Channel over which a challenge reaches the customer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelType {
    Sms,
    Push,
    Voice,
    Biometric,
}

impl ChannelType {
    pub const ALL: [ChannelType; 4] = [
        ChannelType::Sms,
        ChannelType::Push,
        ChannelType::Voice,
        ChannelType::Biometric,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelType::Sms => "SMS",
            ChannelType::Push => "PUSH",
            ChannelType::Voice => "VOICE",
            ChannelType::Biometric => "BIOMETRIC",
        }
    }

    /// Provider family that delivers this channel.
    pub fn provider(&self) -> ProviderType {
        match self {
            ChannelType::Sms => ProviderType::Sms,
            ChannelType::Push => ProviderType::Push,
            ChannelType::Voice => ProviderType::Voice,
            ChannelType::Biometric => ProviderType::Biometric,
        }
    }
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SMS" => Ok(ChannelType::Sms),
            "PUSH" => Ok(ChannelType::Push),
            "VOICE" => Ok(ChannelType::Voice),
            "BIOMETRIC" => Ok(ChannelType::Biometric),
            other => Err(format!("unknown channel `{other}`")),
        }
    }
}

/// Provider family. One circuit breaker and one health window exist per value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProviderType {
    Sms,
    Push,
    Voice,
    Biometric,
}

impl ProviderType {
    pub const ALL: [ProviderType; 4] = [
        ProviderType::Sms,
        ProviderType::Push,
        ProviderType::Voice,
        ProviderType::Biometric,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderType::Sms => "SMS",
            ProviderType::Push => "PUSH",
            ProviderType::Voice => "VOICE",
            ProviderType::Biometric => "BIOMETRIC",
        }
    }

    pub fn channel(&self) -> ChannelType {
        match self {
            ProviderType::Sms => ChannelType::Sms,
            ProviderType::Push => ChannelType::Push,
            ProviderType::Voice => ChannelType::Voice,
            ProviderType::Biometric => ChannelType::Biometric,
        }
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<ChannelType>()
            .map(|channel| channel.provider())
            .map_err(|_| format!("unknown provider `{}`", s.trim()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_and_provider_map_one_to_one() {
        for channel in ChannelType::ALL {
            assert_eq!(channel.provider().channel(), channel);
        }
    }

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!("sms".parse::<ChannelType>().unwrap(), ChannelType::Sms);
        assert_eq!(" Voice ".parse::<ProviderType>().unwrap(), ProviderType::Voice);
        assert!("fax".parse::<ChannelType>().is_err());
    }

    #[test]
    fn serializes_screaming_case() {
        let json = serde_json::to_string(&ChannelType::Biometric).unwrap();
        assert_eq!(json, "\"BIOMETRIC\"");
    }
}
