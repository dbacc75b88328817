// Copyright (c) 2026 TradeSentry Contributors
// SPDX-License-Identifier: Apache-2.0

//! The deterministic rule evaluator: `RiskContext -> RiskFlags`.
//!
//! Pure and total. No network, no randomness, no clock, no error path; the
//! normaliser already validated every input. The thresholds are protocol
//! constants: changing one desynchronises consensus between nodes running
//! different builds.

use crate::context::{RiskContext, SecurityReport};
use crate::fixed::PriceFixed;
use crate::flags::{RiskFlag, RiskFlags};

/// Deviation above this forces a REJECT on its own (50%).
pub const DEVIATION_REJECT_BPS: u64 = 5_000;

/// Deviation above this raises a warning flag (15%).
pub const DEVIATION_WARN_BPS: u64 = 1_500;

/// Buy/sell tax above this is flagged (5%).
pub const MAX_TAX_PCT: PriceFixed = PriceFixed::whole(5);

pub fn evaluate(ctx: &RiskContext) -> RiskFlags {
    let mut flags = RiskFlags::EMPTY;

    match ctx.security {
        SecurityReport::Available(sec) => {
            if sec.is_honeypot {
                flags.insert(RiskFlag::Honeypot);
            }
            if sec.cannot_buy || sec.cannot_sell {
                flags.insert(RiskFlag::TradingBlocked);
            }
            if sec.buy_tax_pct > MAX_TAX_PCT || sec.sell_tax_pct > MAX_TAX_PCT {
                flags.insert(RiskFlag::HighTax);
            }
            if sec.is_proxy {
                flags.insert(RiskFlag::Proxy);
            }
            if sec.is_mintable && !sec.is_trust_listed {
                flags.insert(RiskFlag::UncheckedMint);
            }
        }
        // No scan data means the token cannot be assumed tradeable.
        SecurityReport::Unavailable => {
            flags.insert(RiskFlag::TradingBlocked);
        }
    }

    if ctx.is_price_comparison_valid {
        if ctx.price_deviation_bps > DEVIATION_REJECT_BPS {
            flags.insert(RiskFlag::PriceManipulation);
        }
        if ctx.price_deviation_bps > DEVIATION_WARN_BPS {
            flags.insert(RiskFlag::PriceDeviation);
        }
    }

    if ctx.is_high_value {
        flags.insert(RiskFlag::HighValueExposure);
    }

    flags
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{
        normalize, Address, EntropySample, PriceSignal, SecurityMetadata, SecurityReport,
        TradeRequest, UpstreamSnapshot,
    };

    fn ctx_with(security: SecurityReport, market: PriceSignal, asking: &str) -> RiskContext {
        let request = TradeRequest {
            token_address: "0x00000000000000000000000000000000000000a1".parse().unwrap(),
            chain_id: 1,
            asking_price: asking.parse().unwrap(),
            amount: "1".parse().unwrap(),
            user_address: Address::zero(),
        };
        let snapshot = UpstreamSnapshot {
            market_price: market,
            security,
            entropy: EntropySample::fallback(),
        };
        normalize(&request, &snapshot, PriceFixed::whole(10_000)).unwrap()
    }

    fn clean_security() -> SecurityReport {
        SecurityReport::Available(SecurityMetadata::default())
    }

    #[test]
    fn clean_context_yields_no_flags() {
        // Reference scenario: 2100 asked vs 2065 market is ~1.7% deviation.
        let ctx = ctx_with(
            clean_security(),
            PriceSignal::Available("2065.00".parse().unwrap()),
            "2100.00",
        );
        assert_eq!(evaluate(&ctx), RiskFlags::EMPTY);
    }

    #[test]
    fn honeypot_and_blocked_selling_both_flagged() {
        let sec = SecurityReport::Available(SecurityMetadata {
            is_honeypot: true,
            cannot_sell: true,
            ..SecurityMetadata::default()
        });
        let ctx = ctx_with(sec, PriceSignal::Unavailable, "1.00");
        let flags = evaluate(&ctx);
        assert!(flags.contains(RiskFlag::Honeypot));
        assert!(flags.contains(RiskFlag::TradingBlocked));
    }

    #[test]
    fn manipulation_threshold_implies_both_price_flags() {
        let ctx = ctx_with(
            clean_security(),
            PriceSignal::Available("100".parse().unwrap()),
            "151",
        );
        let flags = evaluate(&ctx);
        assert!(flags.contains(RiskFlag::PriceManipulation));
        assert!(flags.contains(RiskFlag::PriceDeviation));
    }

    #[test]
    fn warning_band_sets_only_deviation() {
        let ctx = ctx_with(
            clean_security(),
            PriceSignal::Available("100".parse().unwrap()),
            "120",
        );
        let flags = evaluate(&ctx);
        assert!(!flags.contains(RiskFlag::PriceManipulation));
        assert!(flags.contains(RiskFlag::PriceDeviation));
    }

    #[test]
    fn deviation_ignored_when_comparison_invalid() {
        let ctx = ctx_with(clean_security(), PriceSignal::Unavailable, "1000000");
        let flags = evaluate(&ctx);
        assert!(!flags.contains(RiskFlag::PriceDeviation));
        assert!(!flags.contains(RiskFlag::PriceManipulation));
    }

    #[test]
    fn tax_over_five_percent_flagged() {
        let sec = SecurityReport::Available(SecurityMetadata {
            sell_tax_pct: "5.1".parse().unwrap(),
            ..SecurityMetadata::default()
        });
        let ctx = ctx_with(sec, PriceSignal::Unavailable, "1.00");
        assert!(evaluate(&ctx).contains(RiskFlag::HighTax));

        let sec = SecurityReport::Available(SecurityMetadata {
            sell_tax_pct: "5".parse().unwrap(),
            ..SecurityMetadata::default()
        });
        let ctx = ctx_with(sec, PriceSignal::Unavailable, "1.00");
        assert!(!evaluate(&ctx).contains(RiskFlag::HighTax));
    }

    #[test]
    fn trust_listed_mintable_is_not_flagged() {
        let sec = SecurityReport::Available(SecurityMetadata {
            is_mintable: true,
            is_trust_listed: true,
            ..SecurityMetadata::default()
        });
        let ctx = ctx_with(sec, PriceSignal::Unavailable, "1.00");
        assert!(!evaluate(&ctx).contains(RiskFlag::UncheckedMint));

        let sec = SecurityReport::Available(SecurityMetadata {
            is_mintable: true,
            ..SecurityMetadata::default()
        });
        let ctx = ctx_with(sec, PriceSignal::Unavailable, "1.00");
        assert!(evaluate(&ctx).contains(RiskFlag::UncheckedMint));
    }

    #[test]
    fn unavailable_security_maps_to_trading_blocked() {
        let ctx = ctx_with(SecurityReport::Unavailable, PriceSignal::Unavailable, "1.00");
        assert_eq!(
            evaluate(&ctx),
            RiskFlags::EMPTY.with(RiskFlag::TradingBlocked)
        );
    }

    #[test]
    fn evaluation_is_referentially_transparent() {
        let sec = SecurityReport::Available(SecurityMetadata {
            is_honeypot: true,
            is_proxy: true,
            ..SecurityMetadata::default()
        });
        let ctx = ctx_with(sec, PriceSignal::Available("100".parse().unwrap()), "170");
        assert_eq!(evaluate(&ctx), evaluate(&ctx));
    }
}
