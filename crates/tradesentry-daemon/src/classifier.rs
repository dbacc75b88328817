//! The semantic risk classifier: a generative model behind a strict
//! validating adapter.
//!
//! The model is asked for one JSON object under a closed, numerically
//! enumerated flag vocabulary. Anything that does not conform (transport
//! failure, timeout, schema violation, unknown fields, wrong schema id)
//! collapses to a fixed fallback bitmask derived only from deterministic
//! signals. Raw model text never reaches the signed message; only the
//! validated bitmask does, which is what keeps cross-node consensus safe
//! from model variance.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tradesentry_core::context::{RiskContext, SecurityReport};
use tradesentry_core::error::{SentryError, SentryResult};
use tradesentry_core::flags::{RiskFlag, RiskFlags};
use tradesentry_core::rules::DEVIATION_REJECT_BPS;

use crate::telemetry::Telemetry;

pub const AI_SCHEMA_ID: &str = "tradesentry.ai.v1";

#[async_trait]
pub trait ClassifierBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn classify(&self, ctx: &RiskContext) -> SentryResult<RiskFlags>;
}

/// The only shape a model reply is allowed to take.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AiAssessment {
    schema: String,
    flags: u16,
    #[allow(dead_code)]
    confidence: u8,
}

/// Validates a raw model reply against the output contract.
pub fn parse_assessment(raw: &str) -> SentryResult<RiskFlags> {
    let assessment: AiAssessment = serde_json::from_str(raw)
        .map_err(|err| SentryError::ClassifierContract(format!("malformed reply: {err}")))?;
    if assessment.schema != AI_SCHEMA_ID {
        return Err(SentryError::ClassifierContract(format!(
            "unexpected schema id {:?}",
            assessment.schema
        )));
    }
    // Bits outside the catalogue are a contract violation, not something to
    // silently mask into the signed score.
    if assessment.flags & !RiskFlags::MASK != 0 {
        return Err(SentryError::ClassifierContract(format!(
            "flags 0x{:04x} outside catalogue",
            assessment.flags
        )));
    }
    Ok(RiskFlags::from_bits(assessment.flags))
}

/// The pre-declared deterministic fallback: what we already know for sure
/// from the deterministic signals, nothing more. Referentially transparent
/// by construction.
pub fn fallback_flags(ctx: &RiskContext) -> RiskFlags {
    let mut flags = RiskFlags::EMPTY;
    match ctx.security {
        SecurityReport::Available(sec) => {
            if sec.is_honeypot {
                flags.insert(RiskFlag::Honeypot);
            }
            if sec.cannot_buy || sec.cannot_sell {
                flags.insert(RiskFlag::TradingBlocked);
            }
        }
        SecurityReport::Unavailable => {
            flags.insert(RiskFlag::TradingBlocked);
        }
    }
    if ctx.is_price_comparison_valid && ctx.price_deviation_bps > DEVIATION_REJECT_BPS {
        flags.insert(RiskFlag::PriceManipulation);
    }
    flags
}

/// System instruction enumerating the closed flag vocabulary. The numeric
/// bit values are part of the contract; the model has no room to invent
/// categories.
pub fn build_instruction() -> String {
    let mut out = String::from(
        "You assess on-chain token trades for risk. Reply with exactly one JSON object \
         and nothing else: {\"schema\":\"tradesentry.ai.v1\",\"flags\":<integer>,\
         \"confidence\":<0-100>}. `flags` is the bitwise OR of every condition you \
         judge present:\n",
    );
    for flag in RiskFlag::ALL {
        out.push_str(&format!(
            "  {} = {} ({})\n",
            flag.bit(),
            flag.name(),
            flag.describe()
        ));
    }
    out.push_str("Use 0 when no condition applies. Do not add fields or prose.");
    out
}

/// Context fields the model sees. Entropy is withheld: it is salt material,
/// not a risk signal.
pub fn context_payload(ctx: &RiskContext) -> serde_json::Value {
    serde_json::json!({
        "marketPrice": ctx.market_price,
        "askingPrice": ctx.asking_price,
        "priceDeviationBps": ctx.price_deviation_bps,
        "isPriceComparisonValid": ctx.is_price_comparison_valid,
        "tradeValueUsd": ctx.trade_value_usd,
        "isHighValue": ctx.is_high_value,
        "security": ctx.security,
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelBackendConfig {
    pub name: String,
    pub endpoint: String,
    pub model: String,
    /// Name of the environment variable holding the bearer token.
    pub api_key_env: String,
}

/// Chat-completion shaped HTTP backend.
pub struct HttpModelBackend {
    cfg: ModelBackendConfig,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionReply {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

impl HttpModelBackend {
    pub fn new(cfg: ModelBackendConfig) -> Self {
        Self {
            cfg,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ClassifierBackend for HttpModelBackend {
    fn name(&self) -> &str {
        &self.cfg.name
    }

    async fn classify(&self, ctx: &RiskContext) -> SentryResult<RiskFlags> {
        let api_key = std::env::var(&self.cfg.api_key_env).map_err(|_| {
            SentryError::UpstreamUnavailable(format!(
                "classifier {}: api key env {} is not set",
                self.cfg.name, self.cfg.api_key_env
            ))
        })?;
        let body = serde_json::json!({
            "model": self.cfg.model,
            "temperature": 0,
            "messages": [
                {"role": "system", "content": build_instruction()},
                {"role": "user", "content": context_payload(ctx).to_string()},
            ],
        });
        let response = self
            .client
            .post(&self.cfg.endpoint)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|err| {
                SentryError::UpstreamUnavailable(format!("classifier {}: {err}", self.cfg.name))
            })?;
        let reply: ChatCompletionReply = response.json().await.map_err(|err| {
            SentryError::ClassifierContract(format!("classifier {}: {err}", self.cfg.name))
        })?;
        let content = reply
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .ok_or_else(|| {
                SentryError::ClassifierContract(format!(
                    "classifier {}: reply carries no choices",
                    self.cfg.name
                ))
            })?;
        parse_assessment(content.trim())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassifierOutcome {
    pub flags: RiskFlags,
    /// Whether any backend (or the absence of backends) took the fallback
    /// path. Reported out-of-band; never part of the signed mask.
    pub fallback_used: bool,
}

/// Queries every configured backend and unions the resulting flag sets.
/// Each backend degrades to the deterministic fallback independently; with
/// no backends configured the fallback is the whole answer.
pub async fn classify_all(
    backends: &[Arc<dyn ClassifierBackend>],
    ctx: &RiskContext,
    timeout: Duration,
    telemetry: &Telemetry,
) -> ClassifierOutcome {
    let fallback = fallback_flags(ctx);
    if backends.is_empty() {
        return ClassifierOutcome {
            flags: fallback,
            fallback_used: true,
        };
    }

    let mut flags = RiskFlags::EMPTY;
    let mut fallback_used = false;
    for backend in backends {
        match tokio::time::timeout(timeout, backend.classify(ctx)).await {
            Ok(Ok(assessed)) => {
                flags = flags | assessed;
            }
            Ok(Err(err)) => {
                fallback_used = true;
                flags = flags | fallback;
                telemetry.record_classifier_fallback(backend.name());
                tracing::warn!(backend = backend.name(), error = %err, "classifier fell back");
            }
            Err(_) => {
                fallback_used = true;
                flags = flags | fallback;
                telemetry.record_classifier_fallback(backend.name());
                tracing::warn!(backend = backend.name(), "classifier timed out");
            }
        }
    }
    ClassifierOutcome {
        flags,
        fallback_used,
    }
}
