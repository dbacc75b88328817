// Copyright (c) 2026 TradeSentry Contributors
// SPDX-License-Identifier: Apache-2.0

//! Node-side signing of verdict messages.
//!
//! The authority identity is the lowercase hex encoding of the ed25519
//! verifying key; the signature is over the domain-separated message hash.
//! Verification lives in `tradesentry-verifier` so external consumers do not
//! depend on the node.

use crate::error::{SentryError, SentryResult};
use crate::hexbytes::{hex32, hex64};
use crate::verdict::VerdictMessage;
use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};

/// A signed verdict envelope. Consumed by value; verifiers never mutate it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedVerdict {
    pub message: VerdictMessage,
    #[serde(with = "hex32")]
    pub message_hash: [u8; 32],
    #[serde(with = "hex64")]
    pub signature: [u8; 64],
    /// Hex-encoded ed25519 verifying key of the signer.
    pub signer: String,
}

/// Hex identity for a verifying key, as carried in envelopes and configs.
pub fn authority_id(key: &VerifyingKey) -> String {
    hex::encode(key.to_bytes())
}

/// Parses a hex authority identity back into a verifying key.
pub fn parse_authority_id(id: &str) -> SentryResult<VerifyingKey> {
    let bytes = hex::decode(id)
        .map_err(|_| SentryError::InvalidInput("signer identity must be hex".to_string()))?;
    let arr: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
        SentryError::InvalidInput("signer identity must be 32 bytes of hex".to_string())
    })?;
    VerifyingKey::from_bytes(&arr)
        .map_err(|_| SentryError::InvalidInput("signer identity is not a valid key".to_string()))
}

pub fn sign_verdict(message: VerdictMessage, key: &SigningKey) -> SignedVerdict {
    let message_hash = message.message_hash();
    let signature = key.sign(&message_hash);
    SignedVerdict {
        message,
        message_hash,
        signature: signature.to_bytes(),
        signer: authority_id(&key.verifying_key()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Address;
    use crate::fixed::PriceFixed;
    use crate::verdict::{reasoning_hash, Decision};
    use ed25519_dalek::Verifier;

    fn message() -> VerdictMessage {
        VerdictMessage {
            user_address: Address::zero(),
            token_address: "0x00000000000000000000000000000000000000a1".parse().unwrap(),
            chain_id: 1,
            asking_price: PriceFixed::whole(10),
            timestamp: 1_700_000_000,
            decision: Decision::Execute,
            risk_score: 0,
            salt: [9u8; 32],
            reasoning_hash: reasoning_hash("no risk conditions detected"),
        }
    }

    #[test]
    fn signature_verifies_under_the_carried_identity() {
        let key = SigningKey::from_bytes(&[0x11; 32]);
        let envelope = sign_verdict(message(), &key);

        assert_eq!(envelope.message_hash, envelope.message.message_hash());
        let verifying = parse_authority_id(&envelope.signer).unwrap();
        let signature = ed25519_dalek::Signature::from_bytes(&envelope.signature);
        verifying
            .verify(&envelope.message_hash, &signature)
            .unwrap();
    }

    #[test]
    fn authority_id_roundtrips() {
        let key = SigningKey::from_bytes(&[0x42; 32]);
        let id = authority_id(&key.verifying_key());
        assert_eq!(id.len(), 64);
        let parsed = parse_authority_id(&id).unwrap();
        assert_eq!(parsed, key.verifying_key());
    }

    #[test]
    fn envelope_serde_roundtrip() {
        let key = SigningKey::from_bytes(&[0x33; 32]);
        let envelope = sign_verdict(message(), &key);
        let json = serde_json::to_string(&envelope).unwrap();
        let back: SignedVerdict = serde_json::from_str(&json).unwrap();
        assert_eq!(back, envelope);
    }
}
