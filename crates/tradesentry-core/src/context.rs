// Copyright (c) 2026 TradeSentry Contributors
// SPDX-License-Identifier: Apache-2.0

//! Normalisation of raw upstream signals into the immutable [`RiskContext`]
//! every scoring stage consumes.
//!
//! Upstream data that could not be fetched is carried as an explicit
//! `Unavailable` state. Nothing in this module may coerce missing data into
//! "no risk"; the conservative mappings happen in the rule evaluator.

use crate::error::{SentryError, SentryResult};
use crate::fixed::PriceFixed;
use crate::hexbytes::hex32;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Fixed entropy constant used when the randomness beacon is unreachable.
/// Still unique per verdict once mixed with the request tuple in
/// [`crate::verdict::derive_salt`].
pub const FALLBACK_ENTROPY: [u8; 32] = *b"tradesentry:entropy:fallback:v1\0";

/// A checksummed-agnostic EVM-style address: `0x` + 40 hex digits, stored
/// lowercase so canonical encodings are byte-stable across nodes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    /// The all-zero address, used when a request carries no user identity.
    pub fn zero() -> Self {
        Self(format!("0x{}", "0".repeat(40)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Address {
    type Err = SentryError;

    fn from_str(raw: &str) -> SentryResult<Self> {
        let hex_part = raw
            .strip_prefix("0x")
            .or_else(|| raw.strip_prefix("0X"))
            .ok_or_else(|| {
                SentryError::InvalidInput(format!("address must start with 0x: {raw:?}"))
            })?;
        if hex_part.len() != 40 || !hex_part.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(SentryError::InvalidInput(format!(
                "address must be 40 hex digits: {raw:?}"
            )));
        }
        Ok(Self(format!("0x{}", hex_part.to_ascii_lowercase())))
    }
}

impl TryFrom<String> for Address {
    type Error = SentryError;

    fn try_from(value: String) -> SentryResult<Self> {
        value.parse()
    }
}

impl From<Address> for String {
    fn from(value: Address) -> String {
        value.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-token security scan result, as reported by the upstream scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SecurityMetadata {
    pub is_honeypot: bool,
    pub buy_tax_pct: PriceFixed,
    pub sell_tax_pct: PriceFixed,
    pub cannot_buy: bool,
    pub cannot_sell: bool,
    pub is_proxy: bool,
    pub is_mintable: bool,
    pub owner_changeable: bool,
    pub is_trust_listed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "report", rename_all = "snake_case")]
pub enum SecurityReport {
    Available(SecurityMetadata),
    Unavailable,
}

impl SecurityReport {
    pub const fn is_available(&self) -> bool {
        matches!(self, Self::Available(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "usd", rename_all = "snake_case")]
pub enum PriceSignal {
    Available(PriceFixed),
    Unavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntropySource {
    Beacon,
    FallbackConstant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntropySample {
    #[serde(with = "hex32")]
    pub bytes: [u8; 32],
    pub source: EntropySource,
}

impl EntropySample {
    pub const fn fallback() -> Self {
        Self {
            bytes: FALLBACK_ENTROPY,
            source: EntropySource::FallbackConstant,
        }
    }
}

/// Everything fetched from upstream for one request, frozen before scoring.
/// Consensus runs share one snapshot so only the pipeline itself is
/// re-verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamSnapshot {
    pub market_price: PriceSignal,
    pub security: SecurityReport,
    pub entropy: EntropySample,
}

/// A validated trade request. Construction is the input-validation boundary:
/// a `TradeRequest` that exists has well-formed addresses and non-negative
/// finite prices by construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeRequest {
    pub token_address: Address,
    pub chain_id: u64,
    pub asking_price: PriceFixed,
    pub amount: PriceFixed,
    pub user_address: Address,
}

/// Immutable scoring input. All derived fields are computed once, in integer
/// arithmetic, by [`normalize`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskContext {
    pub market_price: PriceSignal,
    pub asking_price: PriceFixed,
    pub price_deviation_bps: u64,
    pub is_price_comparison_valid: bool,
    pub trade_value_usd: PriceFixed,
    pub is_high_value: bool,
    pub security: SecurityReport,
    #[serde(with = "hex32")]
    pub entropy: [u8; 32],
}

/// Builds the scoring context from a validated request and a frozen upstream
/// snapshot. The only error path is arithmetic overflow of the trade value,
/// which is an input problem (absurd amounts), not an upstream one.
pub fn normalize(
    request: &TradeRequest,
    snapshot: &UpstreamSnapshot,
    high_value_threshold_usd: PriceFixed,
) -> SentryResult<RiskContext> {
    let (price_deviation_bps, is_price_comparison_valid) = match snapshot.market_price {
        PriceSignal::Available(market) if !market.is_zero() => {
            (PriceFixed::deviation_bps(market, request.asking_price), true)
        }
        // A zero quote is as unusable as a missing one: comparing against it
        // would read every asking price as infinite deviation.
        PriceSignal::Available(_) | PriceSignal::Unavailable => (0, false),
    };

    let trade_value_usd = request
        .asking_price
        .checked_mul(request.amount)
        .ok_or_else(|| {
            SentryError::InvalidInput("trade value overflows fixed-point range".to_string())
        })?;

    Ok(RiskContext {
        market_price: snapshot.market_price,
        asking_price: request.asking_price,
        price_deviation_bps,
        is_price_comparison_valid,
        trade_value_usd,
        is_high_value: trade_value_usd > high_value_threshold_usd,
        security: snapshot.security,
        entropy: snapshot.entropy.bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> TradeRequest {
        TradeRequest {
            token_address: "0x00000000000000000000000000000000000000a1".parse().unwrap(),
            chain_id: 1,
            asking_price: "2100.00".parse().unwrap(),
            amount: "1".parse().unwrap(),
            user_address: Address::zero(),
        }
    }

    fn snapshot(market: PriceSignal) -> UpstreamSnapshot {
        UpstreamSnapshot {
            market_price: market,
            security: SecurityReport::Available(SecurityMetadata::default()),
            entropy: EntropySample::fallback(),
        }
    }

    #[test]
    fn address_parsing_normalises_case() {
        let a: Address = "0xDeAdBeef00000000000000000000000000000001".parse().unwrap();
        assert_eq!(a.as_str(), "0xdeadbeef00000000000000000000000000000001");
        assert!("deadbeef".parse::<Address>().is_err());
        assert!("0x1234".parse::<Address>().is_err());
        assert!("0xzz000000000000000000000000000000000000zz".parse::<Address>().is_err());
    }

    #[test]
    fn missing_market_price_invalidates_comparison() {
        let ctx = normalize(
            &request(),
            &snapshot(PriceSignal::Unavailable),
            PriceFixed::whole(10_000),
        )
        .unwrap();
        assert!(!ctx.is_price_comparison_valid);
        assert_eq!(ctx.price_deviation_bps, 0);
    }

    #[test]
    fn zero_market_price_invalidates_comparison() {
        let ctx = normalize(
            &request(),
            &snapshot(PriceSignal::Available(PriceFixed::ZERO)),
            PriceFixed::whole(10_000),
        )
        .unwrap();
        assert!(!ctx.is_price_comparison_valid);
    }

    #[test]
    fn high_value_is_strictly_above_threshold() {
        let at_threshold = normalize(
            &request(),
            &snapshot(PriceSignal::Unavailable),
            PriceFixed::whole(2100),
        )
        .unwrap();
        assert!(!at_threshold.is_high_value);

        let above = normalize(
            &request(),
            &snapshot(PriceSignal::Unavailable),
            PriceFixed::whole(2099),
        )
        .unwrap();
        assert!(above.is_high_value);
    }

    #[test]
    fn trade_value_is_price_times_amount() {
        let mut req = request();
        req.amount = "2.5".parse().unwrap();
        let ctx = normalize(
            &req,
            &snapshot(PriceSignal::Unavailable),
            PriceFixed::whole(10_000),
        )
        .unwrap();
        assert_eq!(ctx.trade_value_usd, PriceFixed::whole(5250));
    }
}
