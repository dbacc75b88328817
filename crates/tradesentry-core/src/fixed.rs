// Copyright (c) 2026 TradeSentry Contributors
// SPDX-License-Identifier: Apache-2.0

//! Non-negative fixed-point decimal values with 8 fractional digits.
//!
//! Every price, tax percentage and USD amount in the scoring pipeline is one
//! of these. All arithmetic is integer arithmetic over the scaled
//! representation so that independent nodes compute bit-identical results;
//! floating point never touches the risk code.

use crate::error::{SentryError, SentryResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Fractional digits carried by [`PriceFixed`].
pub const PRICE_DECIMALS: u32 = 8;

/// Scale factor: one whole unit in scaled representation.
pub const PRICE_UNIT: u128 = 100_000_000;

/// Basis points per whole (100%).
pub const BPS_PER_WHOLE: u64 = 10_000;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub struct PriceFixed(u128);

impl PriceFixed {
    pub const ZERO: PriceFixed = PriceFixed(0);

    pub const fn from_units(units: u128) -> Self {
        Self(units)
    }

    /// Whole-number constructor, e.g. `PriceFixed::whole(10_000)` for $10k.
    pub const fn whole(value: u64) -> Self {
        Self(value as u128 * PRICE_UNIT)
    }

    pub const fn units(self) -> u128 {
        self.0
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// `self * other`, both 8-decimal fixed point. `None` on overflow.
    pub fn checked_mul(self, other: PriceFixed) -> Option<PriceFixed> {
        self.0.checked_mul(other.0).map(|v| Self(v / PRICE_UNIT))
    }

    /// Absolute deviation of `asking` from `market`, in basis points of the
    /// market price. Saturates rather than wrapping; caller guarantees a
    /// non-zero market price.
    pub fn deviation_bps(market: PriceFixed, asking: PriceFixed) -> u64 {
        if market.is_zero() {
            return u64::MAX;
        }
        let diff = market.0.abs_diff(asking.0);
        match diff.checked_mul(BPS_PER_WHOLE as u128) {
            Some(scaled) => u64::try_from(scaled / market.0).unwrap_or(u64::MAX),
            None => u64::MAX,
        }
    }
}

impl FromStr for PriceFixed {
    type Err = SentryError;

    fn from_str(raw: &str) -> SentryResult<Self> {
        let (int_part, frac_part) = match raw.split_once('.') {
            Some((i, f)) => (i, f),
            None => (raw, ""),
        };
        if int_part.is_empty() || !int_part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(SentryError::InvalidInput(format!(
                "invalid decimal value: {raw:?}"
            )));
        }
        if frac_part.len() > PRICE_DECIMALS as usize
            || !frac_part.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(SentryError::InvalidInput(format!(
                "decimal value must have at most {PRICE_DECIMALS} fractional digits: {raw:?}"
            )));
        }

        let int: u128 = int_part
            .parse()
            .map_err(|_| SentryError::InvalidInput(format!("decimal value too large: {raw:?}")))?;
        let mut frac: u128 = if frac_part.is_empty() {
            0
        } else {
            frac_part.parse().map_err(|_| {
                SentryError::InvalidInput(format!("invalid decimal value: {raw:?}"))
            })?
        };
        for _ in frac_part.len()..PRICE_DECIMALS as usize {
            frac *= 10;
        }

        int.checked_mul(PRICE_UNIT)
            .and_then(|v| v.checked_add(frac))
            .map(Self)
            .ok_or_else(|| SentryError::InvalidInput(format!("decimal value too large: {raw:?}")))
    }
}

impl TryFrom<String> for PriceFixed {
    type Error = SentryError;

    fn try_from(value: String) -> SentryResult<Self> {
        value.parse()
    }
}

impl From<PriceFixed> for String {
    fn from(value: PriceFixed) -> String {
        value.to_string()
    }
}

impl fmt::Display for PriceFixed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let int = self.0 / PRICE_UNIT;
        let frac = self.0 % PRICE_UNIT;
        if frac == 0 {
            return write!(f, "{int}");
        }
        let mut frac = format!("{frac:08}");
        while frac.ends_with('0') {
            frac.pop();
        }
        write!(f, "{int}.{frac}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_formats() {
        let p: PriceFixed = "2100.00".parse().unwrap();
        assert_eq!(p.units(), 2100 * PRICE_UNIT);
        assert_eq!(p.to_string(), "2100");

        let p: PriceFixed = "0.00000001".parse().unwrap();
        assert_eq!(p.units(), 1);
        assert_eq!(p.to_string(), "0.00000001");
    }

    #[test]
    fn rejects_malformed_decimals() {
        for raw in ["", ".", ".5", "-1", "1.123456789", "1e5", "1.2.3", "NaN"] {
            assert!(raw.parse::<PriceFixed>().is_err(), "accepted {raw:?}");
        }
    }

    #[test]
    fn deviation_matches_reference_scenario() {
        // askingPrice=2100.00 vs marketPrice=2065.00 is ~1.7%, well inside
        // the 15% warning threshold.
        let market: PriceFixed = "2065.00".parse().unwrap();
        let asking: PriceFixed = "2100.00".parse().unwrap();
        let bps = PriceFixed::deviation_bps(market, asking);
        assert_eq!(bps, 169); // 35/2065 in basis points, floor
        assert!(bps < 1500);
    }

    #[test]
    fn deviation_is_symmetric_in_direction() {
        let market = PriceFixed::whole(100);
        let above = PriceFixed::whole(160);
        let below = PriceFixed::whole(40);
        assert_eq!(PriceFixed::deviation_bps(market, above), 6000);
        assert_eq!(PriceFixed::deviation_bps(market, below), 6000);
    }

    #[test]
    fn zero_market_price_saturates() {
        assert_eq!(
            PriceFixed::deviation_bps(PriceFixed::ZERO, PriceFixed::whole(1)),
            u64::MAX
        );
    }

    #[test]
    fn checked_mul_scales_back() {
        let price = PriceFixed::whole(2000);
        let amount: PriceFixed = "2.5".parse().unwrap();
        assert_eq!(price.checked_mul(amount), Some(PriceFixed::whole(5000)));
    }

    #[test]
    fn serde_roundtrips_as_string() {
        let p: PriceFixed = "12.5".parse().unwrap();
        let json = serde_json::to_string(&p).unwrap();
        assert_eq!(json, "\"12.5\"");
        let back: PriceFixed = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
    }
}
