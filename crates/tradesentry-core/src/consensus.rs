// Copyright (c) 2026 TradeSentry Contributors
// SPDX-License-Identifier: Apache-2.0

//! Bit-for-bit agreement checking across independent pipeline runs.
//!
//! The comparison key covers everything deterministic about a run: both flag
//! paths, the decision, the score, and the request identity fields. `salt`
//! and `timestamp` are per-run by design and excluded. Any disagreement is
//! fatal for the request; there is no majority vote here.

use crate::error::{SentryError, SentryResult};
use crate::flags::RiskFlags;
use crate::verdict::VerdictMessage;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const DOMAIN_CONSENSUS_V1: &[u8] = b"tradesentry:consensus:v1";

/// The output of one full pipeline execution, before signing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub logic_flags: RiskFlags,
    pub ai_flags: RiskFlags,
    pub message: VerdictMessage,
}

impl PipelineRun {
    /// Digest of the deterministic comparison key.
    pub fn comparison_digest(&self) -> [u8; 32] {
        let m = &self.message;
        let mut hasher = Sha256::new();
        hasher.update(DOMAIN_CONSENSUS_V1);
        hasher.update(self.logic_flags.bits().to_be_bytes());
        hasher.update(self.ai_flags.bits().to_be_bytes());
        hasher.update(m.decision.as_str().as_bytes());
        hasher.update([m.risk_score]);
        hasher.update(m.user_address.as_str().as_bytes());
        hasher.update(m.token_address.as_str().as_bytes());
        hasher.update(m.chain_id.to_be_bytes());
        hasher.update(m.asking_price.units().to_be_bytes());
        hasher.finalize().into()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMismatch {
    pub run_index: usize,
    /// Names of the comparison-key fields that differ from the reference run.
    pub fields: Vec<&'static str>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsensusResult {
    pub agreed: bool,
    pub runs: usize,
    /// Hex digest of run 0's comparison key.
    pub reference_digest: String,
    pub mismatches: Vec<RunMismatch>,
}

fn diff_fields(reference: &PipelineRun, other: &PipelineRun) -> Vec<&'static str> {
    let mut fields = Vec::new();
    if reference.logic_flags != other.logic_flags {
        fields.push("logicFlags");
    }
    if reference.ai_flags != other.ai_flags {
        fields.push("aiFlags");
    }
    if reference.message.decision != other.message.decision {
        fields.push("decision");
    }
    if reference.message.risk_score != other.message.risk_score {
        fields.push("riskScore");
    }
    if reference.message.user_address != other.message.user_address
        || reference.message.token_address != other.message.token_address
        || reference.message.chain_id != other.message.chain_id
        || reference.message.asking_price != other.message.asking_price
    {
        fields.push("identity");
    }
    fields
}

/// Compares `n >= 2` runs against run 0. Every mismatching run is reported
/// by index with the differing fields named.
pub fn compare_runs(runs: &[PipelineRun]) -> SentryResult<ConsensusResult> {
    if runs.len() < 2 {
        return Err(SentryError::InvalidInput(format!(
            "consensus requires at least 2 runs, got {}",
            runs.len()
        )));
    }
    let reference = &runs[0];
    let mut mismatches = Vec::new();
    for (index, run) in runs.iter().enumerate().skip(1) {
        let fields = diff_fields(reference, run);
        if !fields.is_empty() {
            mismatches.push(RunMismatch {
                run_index: index,
                fields,
            });
        }
    }
    Ok(ConsensusResult {
        agreed: mismatches.is_empty(),
        runs: runs.len(),
        reference_digest: hex::encode(reference.comparison_digest()),
        mismatches,
    })
}
