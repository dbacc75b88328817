// Copyright (c) 2026 TradeSentry Contributors
// SPDX-License-Identifier: Apache-2.0

//! tradesentry-core
//!
//! The pure core of the TradeSentry oracle verdict protocol:
//! - Typed, bounded risk context built from upstream market/security signals
//! - Closed risk-flag catalogue with stable bit positions
//! - Deterministic rule evaluation (no clock, no I/O, no iteration-order
//!   dependence anywhere on the path to a risk code)
//! - Canonical verdict encoding, hashing and ed25519 signing
//! - Bit-for-bit consensus comparison across independent pipeline runs
//!
//! Everything network-facing (feeds, the semantic classifier, the HTTP
//! surface) lives in `tradesentry-daemon`; offline envelope verification
//! lives in `tradesentry-verifier`.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod consensus;
pub mod context;
pub mod error;
pub mod fixed;
pub mod flags;
pub mod hexbytes;
pub mod rules;
pub mod sign;
pub mod verdict;

pub use crate::error::{SentryError, SentryResult};
pub use crate::flags::{RiskFlag, RiskFlags};
pub use crate::verdict::{Decision, VerdictMessage};
