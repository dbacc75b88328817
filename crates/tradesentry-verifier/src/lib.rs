// Copyright (c) 2026 TradeSentry Contributors
// SPDX-License-Identifier: Apache-2.0

//! Offline verification of signed verdict envelopes.
//!
//! A verifier holds only the expected authority identity and a salt
//! registry; it never talks to the oracle. Checks run in a fixed order with
//! an absorbing invalid state:
//!
//! `RECEIVED -> HASH_CHECKED -> SIGNATURE_CHECKED -> SALT_CHECKED ->
//! TIME_CHECKED -> ACCEPTED`
//!
//! The hash check must precede signature verification: a tampered message
//! has a different hash, and judging the signature against the wrong hash
//! would misreport tampering as spoofing. The salt check-and-insert is one
//! atomic operation so concurrent verifications cannot open a replay window.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::{SystemTime, UNIX_EPOCH};
use tradesentry_core::sign::SignedVerdict;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidReason {
    Tampered,
    Spoofed,
    Replay,
    Expired,
}

impl InvalidReason {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tampered => "tampered",
            Self::Spoofed => "spoofed",
            Self::Replay => "replay",
            Self::Expired => "expired",
        }
    }
}

/// Outcome of one verification. `detail` is the human-readable explanation;
/// it is unrelated to the signed `reasoning_hash`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerdictReview {
    pub valid: bool,
    pub reason: Option<InvalidReason>,
    pub detail: String,
    /// The identity the signature actually verifies under, when one could be
    /// established. On a spoofed envelope this is the real signer, not the
    /// expected authority.
    pub recovered_identity: Option<String>,
}

impl VerdictReview {
    fn accepted(identity: String) -> Self {
        Self {
            valid: true,
            reason: None,
            detail: "verdict accepted".to_string(),
            recovered_identity: Some(identity),
        }
    }

    fn invalid(reason: InvalidReason, detail: impl Into<String>) -> Self {
        Self {
            valid: false,
            reason: Some(reason),
            detail: detail.into(),
            recovered_identity: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct VerifyPolicy {
    pub expiry_window_secs: u64,
    pub max_clock_skew_secs: u64,
}

impl Default for VerifyPolicy {
    fn default() -> Self {
        Self {
            expiry_window_secs: 300,
            max_clock_skew_secs: 30,
        }
    }
}

pub trait Clock: Send + Sync {
    fn now_unix(&self) -> u64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// Replay-protection capability. Implementations must make
/// `insert_if_absent` atomic: the check and the insert are one operation.
pub trait SaltRegistry: Send + Sync {
    fn contains(&self, salt: &[u8; 32]) -> bool;

    /// Returns `true` when the salt was fresh and has now been recorded.
    fn insert_if_absent(&self, salt: &[u8; 32]) -> bool;
}

/// In-memory registry for tests and embedded verifiers. Append-only for the
/// process lifetime.
#[derive(Debug, Default)]
pub struct MemorySaltRegistry {
    seen: Mutex<HashSet<[u8; 32]>>,
}

impl MemorySaltRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.lock().is_empty()
    }
}

impl SaltRegistry for MemorySaltRegistry {
    fn contains(&self, salt: &[u8; 32]) -> bool {
        self.seen.lock().contains(salt)
    }

    fn insert_if_absent(&self, salt: &[u8; 32]) -> bool {
        self.seen.lock().insert(*salt)
    }
}

/// Runs the full verification state machine over one envelope.
pub fn verify(
    envelope: &SignedVerdict,
    expected_signer: &str,
    registry: &dyn SaltRegistry,
    policy: &VerifyPolicy,
    clock: &dyn Clock,
) -> VerdictReview {
    // 1. Hash check: recompute over every carried field. Detects any
    //    post-signing mutation, including a swapped reasoning hash.
    let recomputed = envelope.message.message_hash();
    if recomputed != envelope.message_hash {
        return VerdictReview::invalid(
            InvalidReason::Tampered,
            "message hash does not match the carried fields",
        );
    }

    // 2. Signature check against the carried signer, then authority match.
    let carried = envelope.signer.to_ascii_lowercase();
    let Ok(verifying_key) = tradesentry_core::sign::parse_authority_id(&carried) else {
        return VerdictReview::invalid(
            InvalidReason::Tampered,
            "carried signer is not a valid identity",
        );
    };
    let signature = Signature::from_bytes(&envelope.signature);
    if verify_over(&verifying_key, &envelope.message_hash, &signature).is_err() {
        return VerdictReview::invalid(
            InvalidReason::Tampered,
            "signature does not verify under the carried signer",
        );
    }
    if carried != expected_signer.to_ascii_lowercase() {
        let mut review = VerdictReview::invalid(
            InvalidReason::Spoofed,
            "envelope is signed by a different identity than the expected authority",
        );
        review.recovered_identity = Some(carried);
        return review;
    }

    // 3. Salt check: atomic check-and-insert.
    if !registry.insert_if_absent(&envelope.message.salt) {
        return VerdictReview::invalid(InvalidReason::Replay, "salt has already been accepted");
    }

    // 4. Time check.
    let now = clock.now_unix();
    let ts = envelope.message.timestamp;
    if ts > now.saturating_add(policy.max_clock_skew_secs) {
        return VerdictReview::invalid(
            InvalidReason::Expired,
            "timestamp is in the future beyond allowed clock skew",
        );
    }
    if now.saturating_sub(ts) > policy.expiry_window_secs {
        return VerdictReview::invalid(
            InvalidReason::Expired,
            "verdict is older than the expiry window",
        );
    }

    VerdictReview::accepted(carried)
}

fn verify_over(
    key: &VerifyingKey,
    digest: &[u8; 32],
    signature: &Signature,
) -> Result<(), ed25519_dalek::SignatureError> {
    key.verify(digest, signature)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;
    use tradesentry_core::context::Address;
    use tradesentry_core::fixed::PriceFixed;
    use tradesentry_core::sign::{authority_id, sign_verdict};
    use tradesentry_core::verdict::{reasoning_hash, Decision, VerdictMessage};

    struct FixedClock(u64);

    impl Clock for FixedClock {
        fn now_unix(&self) -> u64 {
            self.0
        }
    }

    const NOW: u64 = 1_700_000_000;

    fn authority() -> SigningKey {
        SigningKey::from_bytes(&[0x11; 32])
    }

    fn message(salt_byte: u8) -> VerdictMessage {
        VerdictMessage {
            user_address: Address::zero(),
            token_address: "0x00000000000000000000000000000000000000a1".parse().unwrap(),
            chain_id: 1,
            asking_price: PriceFixed::whole(2100),
            timestamp: NOW - 10,
            decision: Decision::Execute,
            risk_score: 0,
            salt: [salt_byte; 32],
            reasoning_hash: reasoning_hash("no risk conditions detected"),
        }
    }

    fn setup() -> (SignedVerdict, String, MemorySaltRegistry, VerifyPolicy) {
        let key = authority();
        let envelope = sign_verdict(message(1), &key);
        let expected = authority_id(&key.verifying_key());
        (
            envelope,
            expected,
            MemorySaltRegistry::new(),
            VerifyPolicy::default(),
        )
    }

    #[test]
    fn valid_envelope_is_accepted() {
        let (envelope, expected, registry, policy) = setup();
        let review = verify(&envelope, &expected, &registry, &policy, &FixedClock(NOW));
        assert!(review.valid);
        assert_eq!(review.reason, None);
        assert_eq!(review.recovered_identity.as_deref(), Some(expected.as_str()));
    }

    #[test]
    fn every_single_field_mutation_reads_as_tampered() {
        let (envelope, expected, registry, policy) = setup();
        let clock = FixedClock(NOW);

        let mutations: Vec<Box<dyn Fn(&mut SignedVerdict)>> = vec![
            Box::new(|e| e.message.decision = Decision::Reject),
            Box::new(|e| e.message.risk_score = 0xff),
            Box::new(|e| e.message.reasoning_hash[0] ^= 1),
            Box::new(|e| e.message.timestamp += 1),
            Box::new(|e| e.message.asking_price = PriceFixed::whole(1)),
            Box::new(|e| e.message.salt[0] ^= 1),
            Box::new(|e| e.message.chain_id = 137),
        ];
        for mutate in mutations {
            let mut tampered = envelope.clone();
            mutate(&mut tampered);
            let review = verify(&tampered, &expected, &registry, &policy, &clock);
            assert_eq!(review.reason, Some(InvalidReason::Tampered));
        }
    }

    #[test]
    fn tampered_envelope_does_not_burn_the_salt() {
        let (envelope, expected, registry, policy) = setup();
        let clock = FixedClock(NOW);

        let mut tampered = envelope.clone();
        tampered.message.risk_score = 7;
        let review = verify(&tampered, &expected, &registry, &policy, &clock);
        assert_eq!(review.reason, Some(InvalidReason::Tampered));

        // The untampered original must still go through.
        let review = verify(&envelope, &expected, &registry, &policy, &clock);
        assert!(review.valid);
    }

    #[test]
    fn second_verification_is_a_replay() {
        let (envelope, expected, registry, policy) = setup();
        let clock = FixedClock(NOW);
        assert!(verify(&envelope, &expected, &registry, &policy, &clock).valid);

        let review = verify(&envelope, &expected, &registry, &policy, &clock);
        assert!(!review.valid);
        assert_eq!(review.reason, Some(InvalidReason::Replay));
    }

    #[test]
    fn foreign_signer_is_spoofed_with_actual_identity_recovered() {
        let (_, expected, registry, policy) = setup();
        let rogue = SigningKey::from_bytes(&[0x99; 32]);
        let envelope = sign_verdict(message(2), &rogue);

        let review = verify(&envelope, &expected, &registry, &policy, &FixedClock(NOW));
        assert!(!review.valid);
        assert_eq!(review.reason, Some(InvalidReason::Spoofed));
        assert_eq!(
            review.recovered_identity.as_deref(),
            Some(authority_id(&rogue.verifying_key()).as_str())
        );
    }

    #[test]
    fn forged_signature_over_authority_identity_is_tampered() {
        let (mut envelope, expected, registry, policy) = setup();
        // A rogue signer cannot claim the authority identity: the signature
        // no longer verifies under the carried key.
        let rogue = sign_verdict(message(1), &SigningKey::from_bytes(&[0x99; 32]));
        envelope.signature = rogue.signature;

        let review = verify(&envelope, &expected, &registry, &policy, &FixedClock(NOW));
        assert_eq!(review.reason, Some(InvalidReason::Tampered));
    }

    #[test]
    fn stale_envelope_expires() {
        let (envelope, expected, registry, policy) = setup();
        let clock = FixedClock(NOW + policy.expiry_window_secs + 60);
        let review = verify(&envelope, &expected, &registry, &policy, &clock);
        assert!(!review.valid);
        assert_eq!(review.reason, Some(InvalidReason::Expired));
    }

    #[test]
    fn future_dated_envelope_expires() {
        let (envelope, expected, registry, policy) = setup();
        let clock = FixedClock(NOW - 3600);
        let review = verify(&envelope, &expected, &registry, &policy, &clock);
        assert_eq!(review.reason, Some(InvalidReason::Expired));
    }

    #[test]
    fn distinct_salts_verify_independently() {
        let key = authority();
        let expected = authority_id(&key.verifying_key());
        let registry = MemorySaltRegistry::new();
        let policy = VerifyPolicy::default();
        let clock = FixedClock(NOW);

        for salt_byte in 1..=3u8 {
            let envelope = sign_verdict(message(salt_byte), &key);
            assert!(verify(&envelope, &expected, &registry, &policy, &clock).valid);
        }
        assert_eq!(registry.len(), 3);
    }
}
