// Copyright (c) 2026 TradeSentry Contributors
// SPDX-License-Identifier: Apache-2.0

//! The canonical verdict message: composition, encoding, hashing.
//!
//! The canonical byte encoding is a protocol constant. Fields are written in
//! a fixed order with length-prefixed variable fields and big-endian
//! integers, under a domain-separation prefix, so that every node and every
//! verifier derives the same `message_hash` from the same message, and any
//! post-signing mutation of any field changes it.

use crate::context::{Address, RiskContext, TradeRequest};
use crate::error::{SentryError, SentryResult};
use crate::fixed::PriceFixed;
use crate::flags::RiskFlags;
use crate::hexbytes::hex32;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const DOMAIN_VERDICT_V1: &[u8] = b"tradesentry:verdict:v1";
pub const DOMAIN_REASONING_V1: &[u8] = b"tradesentry:reasoning:v1";
pub const DOMAIN_SALT_V1: &[u8] = b"tradesentry:salt:v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Execute,
    Reject,
}

impl Decision {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Execute => "EXECUTE",
            Self::Reject => "REJECT",
        }
    }
}

/// The entity that gets signed. Immutable once composed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerdictMessage {
    pub user_address: Address,
    pub token_address: Address,
    pub chain_id: u64,
    pub asking_price: PriceFixed,
    pub timestamp: u64,
    pub decision: Decision,
    pub risk_score: u8,
    #[serde(with = "hex32")]
    pub salt: [u8; 32],
    #[serde(with = "hex32")]
    pub reasoning_hash: [u8; 32],
}

fn append_len_prefixed(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u64).to_be_bytes());
    out.extend_from_slice(bytes);
}

impl VerdictMessage {
    /// Fixed-order, fixed-precision canonical encoding of every field.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(256);
        append_len_prefixed(&mut out, self.user_address.as_str().as_bytes());
        append_len_prefixed(&mut out, self.token_address.as_str().as_bytes());
        out.extend_from_slice(&self.chain_id.to_be_bytes());
        out.extend_from_slice(&self.asking_price.units().to_be_bytes());
        out.extend_from_slice(&self.timestamp.to_be_bytes());
        append_len_prefixed(&mut out, self.decision.as_str().as_bytes());
        out.push(self.risk_score);
        out.extend_from_slice(&self.salt);
        out.extend_from_slice(&self.reasoning_hash);
        out
    }

    pub fn message_hash(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(DOMAIN_VERDICT_V1);
        hasher.update(self.canonical_bytes());
        hasher.finalize().into()
    }
}

/// Renders the human-readable explanation for a risk code. Deterministic:
/// set flags in catalogue order, nothing else.
pub fn render_reasoning(risk_code: RiskFlags) -> String {
    if risk_code.is_empty() {
        return "no risk conditions detected".to_string();
    }
    let conditions: Vec<&str> = risk_code.iter().map(|f| f.describe()).collect();
    format!(
        "rejected ({}): {}",
        risk_code.names().join("|"),
        conditions.join("; ")
    )
}

pub fn reasoning_hash(reasoning: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(DOMAIN_REASONING_V1);
    hasher.update(reasoning.as_bytes());
    hasher.finalize().into()
}

/// Derives the per-verdict replay salt: upstream entropy bound to the
/// (token, user, timestamp) tuple. Never reused as long as the entropy
/// sample or the tuple differs.
pub fn derive_salt(
    entropy: &[u8; 32],
    token: &Address,
    user: &Address,
    timestamp: u64,
) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(DOMAIN_SALT_V1);
    hasher.update(entropy);
    hasher.update(token.as_str().as_bytes());
    hasher.update(user.as_str().as_bytes());
    hasher.update(timestamp.to_be_bytes());
    hasher.finalize().into()
}

/// Merges the two flag paths into the risk code and builds the canonical
/// message. Zero-tolerance decision policy: any set bit rejects.
pub fn compose(
    logic: RiskFlags,
    ai: RiskFlags,
    ctx: &RiskContext,
    request: &TradeRequest,
    timestamp: u64,
) -> SentryResult<(VerdictMessage, String)> {
    let risk_code = logic | ai;
    let risk_score = u8::try_from(risk_code.bits()).map_err(|_| {
        SentryError::Internal(format!(
            "risk code 0x{:04x} exceeds the signed score width",
            risk_code.bits()
        ))
    })?;
    let decision = if risk_code.is_empty() {
        Decision::Execute
    } else {
        Decision::Reject
    };

    let reasoning = render_reasoning(risk_code);
    let salt = derive_salt(
        &ctx.entropy,
        &request.token_address,
        &request.user_address,
        timestamp,
    );

    let message = VerdictMessage {
        user_address: request.user_address.clone(),
        token_address: request.token_address.clone(),
        chain_id: request.chain_id,
        asking_price: request.asking_price,
        timestamp,
        decision,
        risk_score,
        salt,
        reasoning_hash: reasoning_hash(&reasoning),
    };
    Ok((message, reasoning))
}
