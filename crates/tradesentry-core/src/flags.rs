// Copyright (c) 2026 TradeSentry Contributors
// SPDX-License-Identifier: Apache-2.0

//! The closed risk-flag catalogue.
//!
//! Bit positions are protocol constants shared by every node: the signed
//! risk score is the raw bitmask, so reassigning a bit is a wire-breaking
//! change and requires a new catalogue version. Flags are carried as a typed
//! set internally and collapse to an integer only at the message boundary.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::BitOr;

pub const FLAG_CATALOGUE_VERSION: &str = "tradesentry.flags.v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u16)]
pub enum RiskFlag {
    Honeypot = 0,
    TradingBlocked = 1,
    PriceManipulation = 2,
    PriceDeviation = 3,
    HighTax = 4,
    Proxy = 5,
    UncheckedMint = 6,
    HighValueExposure = 7,
}

impl RiskFlag {
    /// Catalogue order; also the rendering order for reasoning strings.
    pub const ALL: [RiskFlag; 8] = [
        RiskFlag::Honeypot,
        RiskFlag::TradingBlocked,
        RiskFlag::PriceManipulation,
        RiskFlag::PriceDeviation,
        RiskFlag::HighTax,
        RiskFlag::Proxy,
        RiskFlag::UncheckedMint,
        RiskFlag::HighValueExposure,
    ];

    pub const fn bit(self) -> u16 {
        1 << (self as u16)
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Honeypot => "HONEYPOT",
            Self::TradingBlocked => "TRADING_BLOCKED",
            Self::PriceManipulation => "PRICE_MANIPULATION",
            Self::PriceDeviation => "PRICE_DEVIATION",
            Self::HighTax => "HIGH_TAX",
            Self::Proxy => "PROXY",
            Self::UncheckedMint => "UNCHECKED_MINT",
            Self::HighValueExposure => "HIGH_VALUE_EXPOSURE",
        }
    }

    pub const fn describe(self) -> &'static str {
        match self {
            Self::Honeypot => "token is a honeypot",
            Self::TradingBlocked => "trading is blocked or security data is unavailable",
            Self::PriceManipulation => "asking price deviates more than 50% from market",
            Self::PriceDeviation => "asking price deviates more than 15% from market",
            Self::HighTax => "buy or sell tax exceeds 5%",
            Self::Proxy => "token contract is an upgradable proxy",
            Self::UncheckedMint => "token is mintable and not trust-listed",
            Self::HighValueExposure => "trade value exceeds the high-value threshold",
        }
    }
}

/// A set of [`RiskFlag`]s over a 16-bit mask. Bits 8..16 are reserved for
/// future catalogue versions and are masked away on ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RiskFlags(u16);

impl RiskFlags {
    pub const EMPTY: RiskFlags = RiskFlags(0);

    /// Every bit the current catalogue defines.
    pub const MASK: u16 = {
        let mut mask = 0u16;
        let mut i = 0;
        while i < RiskFlag::ALL.len() {
            mask |= RiskFlag::ALL[i].bit();
            i += 1;
        }
        mask
    };

    /// Builds a set from a raw mask, silently dropping undefined bits.
    pub const fn from_bits(bits: u16) -> Self {
        Self(bits & Self::MASK)
    }

    pub const fn bits(self) -> u16 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, flag: RiskFlag) -> bool {
        self.0 & flag.bit() != 0
    }

    pub const fn with(self, flag: RiskFlag) -> Self {
        Self(self.0 | flag.bit())
    }

    pub fn insert(&mut self, flag: RiskFlag) {
        self.0 |= flag.bit();
    }

    pub const fn union(self, other: RiskFlags) -> Self {
        Self(self.0 | other.0)
    }

    /// Set flags in catalogue order.
    pub fn iter(self) -> impl Iterator<Item = RiskFlag> {
        RiskFlag::ALL.into_iter().filter(move |f| self.contains(*f))
    }

    pub fn names(self) -> Vec<&'static str> {
        self.iter().map(RiskFlag::name).collect()
    }
}

impl BitOr for RiskFlags {
    type Output = RiskFlags;

    fn bitor(self, rhs: RiskFlags) -> RiskFlags {
        self.union(rhs)
    }
}

impl FromIterator<RiskFlag> for RiskFlags {
    fn from_iter<I: IntoIterator<Item = RiskFlag>>(iter: I) -> Self {
        let mut out = Self::EMPTY;
        for flag in iter {
            out.insert(flag);
        }
        out
    }
}

impl fmt::Display for RiskFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "none");
        }
        write!(f, "{}", self.names().join("|"))
    }
}
