// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Monetary amounts and the immutable transaction context being signed.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use utoipa::ToSchema;

use super::error::{SignatureError, SignatureResult};

/// Non-negative amount held in the currency's minor units plus an ISO-4217
/// currency code. The number of decimals follows [`minor_unit_scale`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Money {
    amount_in_minor: u64,
    currency: String,
}

impl Money {
    /// Parse a decimal string such as `"100.00"` or `"25.5"`.
    ///
    /// Zero is accepted; negative values, more decimals than the currency
    /// has and malformed currency codes are rejected.
    pub fn parse(amount: &str, currency: &str) -> SignatureResult<Self> {
        let currency = currency.trim();
        let amount_in_minor = parse_amount_to_minor(amount, minor_unit_scale(currency))?;
        Self::from_minor(amount_in_minor, currency)
    }

    pub fn from_minor(amount_in_minor: u64, currency: &str) -> SignatureResult<Self> {
        let currency = currency.trim();
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(SignatureError::InvalidTransactionContext(format!(
                "currency `{currency}` is not an ISO-4217 code"
            )));
        }
        Ok(Self {
            amount_in_minor,
            currency: currency.to_string(),
        })
    }

    pub fn amount_in_minor(&self) -> u64 {
        self.amount_in_minor
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    /// Amount with exactly the currency's decimals, without the currency.
    pub fn amount_string(&self) -> String {
        let scale = minor_unit_scale(&self.currency);
        if scale == 0 {
            return self.amount_in_minor.to_string();
        }
        let factor = 10u64.pow(scale);
        format!(
            "{}.{:0width$}",
            self.amount_in_minor / factor,
            self.amount_in_minor % factor,
            width = scale as usize
        )
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount_string(), self.currency)
    }
}

/// ISO-4217 minor-unit exponent of a currency; two when not listed.
pub fn minor_unit_scale(currency: &str) -> u32 {
    match currency {
        "BIF" | "CLP" | "DJF" | "GNF" | "ISK" | "JPY" | "KMF" | "KRW" | "PYG" | "RWF"
        | "UGX" | "UYI" | "VND" | "VUV" | "XAF" | "XOF" | "XPF" => 0,
        "BHD" | "IQD" | "JOD" | "KWD" | "LYD" | "OMR" | "TND" => 3,
        "CLF" | "UYW" => 4,
        _ => 2,
    }
}

fn parse_amount_to_minor(amount: &str, scale: u32) -> SignatureResult<u64> {
    let invalid = || {
        SignatureError::InvalidTransactionContext(format!(
            "amount `{amount}` must be a non-negative decimal number"
        ))
    };

    let trimmed = amount.trim();
    let (whole_part, fraction_part) = match trimmed.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (trimmed, ""),
    };

    if whole_part.is_empty() || !whole_part.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    if !fraction_part.chars().all(|c| c.is_ascii_digit()) || fraction_part.len() > scale as usize {
        return Err(SignatureError::InvalidTransactionContext(format!(
            "amount `{amount}` must have at most {scale} decimal places"
        )));
    }

    let whole = whole_part.parse::<u64>().map_err(|_| invalid())?;
    let fraction = if fraction_part.is_empty() {
        0
    } else {
        // Right-pad: "5" with scale 2 is 50 minor units.
        let padding = 10u64.pow(scale - fraction_part.len() as u32);
        fraction_part.parse::<u64>().map_err(|_| invalid())? * padding
    };

    whole
        .checked_mul(10u64.pow(scale))
        .and_then(|base| base.checked_add(fraction))
        .ok_or_else(invalid)
}

/// What the customer is asked to sign. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TransactionContext {
    amount: Money,
    merchant_id: String,
    order_id: String,
    description: String,
    /// Lowercase hex SHA-256, 64 characters.
    integrity_hash: String,
}

impl TransactionContext {
    pub fn new(
        amount: Money,
        merchant_id: impl Into<String>,
        order_id: impl Into<String>,
        description: impl Into<String>,
        integrity_hash: impl Into<String>,
    ) -> SignatureResult<Self> {
        let integrity_hash = integrity_hash.into();
        if !is_sha256_hex(&integrity_hash) {
            return Err(SignatureError::InvalidTransactionContext(
                "integrity hash must be 64 lowercase hex characters".to_string(),
            ));
        }

        let merchant_id = merchant_id.into();
        if merchant_id.trim().is_empty() {
            return Err(SignatureError::InvalidTransactionContext(
                "merchant id is required".to_string(),
            ));
        }

        Ok(Self {
            amount,
            merchant_id,
            order_id: order_id.into(),
            description: description.into(),
            integrity_hash,
        })
    }

    /// Build a context whose integrity hash is computed from its own fields.
    pub fn sealed(
        amount: Money,
        merchant_id: impl Into<String>,
        order_id: impl Into<String>,
        description: impl Into<String>,
    ) -> SignatureResult<Self> {
        let merchant_id = merchant_id.into();
        let order_id = order_id.into();
        let description = description.into();
        let hash = compute_integrity_hash(&amount, &merchant_id, &order_id, &description);
        Self::new(amount, merchant_id, order_id, description, hash)
    }

    pub fn amount(&self) -> &Money {
        &self.amount
    }

    pub fn merchant_id(&self) -> &str {
        &self.merchant_id
    }

    pub fn order_id(&self) -> &str {
        &self.order_id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn integrity_hash(&self) -> &str {
        &self.integrity_hash
    }
}

/// SHA-256 over `amount|currency|merchant|order|description`.
pub fn compute_integrity_hash(
    amount: &Money,
    merchant_id: &str,
    order_id: &str,
    description: &str,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(amount.amount_string().as_bytes());
    hasher.update(b"|");
    hasher.update(amount.currency().as_bytes());
    hasher.update(b"|");
    hasher.update(merchant_id.as_bytes());
    hasher.update(b"|");
    hasher.update(order_id.as_bytes());
    hasher.update(b"|");
    hasher.update(description.as_bytes());
    hex::encode(hasher.finalize())
}

fn is_sha256_hex(value: &str) -> bool {
    value.len() == 64 && value.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_converts_to_minor_units() {
        let money = Money::parse("25.5", "EUR").unwrap();
        assert_eq!(money.amount_in_minor(), 2550);
        assert_eq!(money.to_string(), "25.50 EUR");
    }

    #[test]
    fn parse_accepts_zero() {
        let money = Money::parse("0", "USD").unwrap();
        assert_eq!(money.amount_in_minor(), 0);
    }

    #[test]
    fn parse_rejects_negative_and_too_precise() {
        assert!(Money::parse("-1.00", "EUR").is_err());
        assert!(Money::parse("1.234", "EUR").is_err());
        assert!(Money::parse("abc", "EUR").is_err());
    }

    #[test]
    fn zero_decimal_currencies_have_no_fraction() {
        let yen = Money::parse("1500", "JPY").unwrap();
        assert_eq!(yen.amount_in_minor(), 1500);
        assert_eq!(yen.to_string(), "1500 JPY");
        assert!(Money::parse("1500.5", "JPY").is_err());
    }

    #[test]
    fn three_decimal_currencies_keep_fils() {
        let dinar = Money::parse("1.234", "KWD").unwrap();
        assert_eq!(dinar.amount_in_minor(), 1234);
        assert_eq!(dinar.to_string(), "1.234 KWD");

        let padded = Money::parse("2.5", "BHD").unwrap();
        assert_eq!(padded.amount_in_minor(), 2500);
        assert_eq!(padded.amount_string(), "2.500");
        assert!(Money::parse("1.2345", "KWD").is_err());
    }

    #[test]
    fn currency_must_be_iso_code() {
        assert!(Money::parse("1.00", "eur").is_err());
        assert!(Money::parse("1.00", "EURO").is_err());
    }

    #[test]
    fn context_rejects_malformed_hash() {
        let amount = Money::parse("100.00", "EUR").unwrap();
        let upper = "A".repeat(64);
        let err = TransactionContext::new(amount.clone(), "m-1", "o-1", "desc", upper).unwrap_err();
        assert!(matches!(err, SignatureError::InvalidTransactionContext(_)));

        let short = "a".repeat(63);
        assert!(TransactionContext::new(amount, "m-1", "o-1", "desc", short).is_err());
    }

    #[test]
    fn sealed_context_carries_valid_hash() {
        let amount = Money::parse("100.00", "EUR").unwrap();
        let ctx = TransactionContext::sealed(amount, "merchant-1", "order-1", "Groceries").unwrap();
        assert_eq!(ctx.integrity_hash().len(), 64);
        assert_eq!(
            ctx.integrity_hash(),
            compute_integrity_hash(ctx.amount(), "merchant-1", "order-1", "Groceries")
        );
    }
}
