//! HTTP surface of the oracle node: verdict issuance and envelope
//! verification.
//!
//! Handlers are thin wrappers around `*_impl` functions that take plain
//! headers and bytes, so the whole request path is testable without binding
//! a socket.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use ed25519_dalek::SigningKey;
use serde::{Deserialize, Serialize};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tradesentry_core::consensus::ConsensusResult;
use tradesentry_core::context::{Address, TradeRequest};
use tradesentry_core::error::SentryError;
use tradesentry_core::fixed::PriceFixed;
use tradesentry_core::sign::{sign_verdict, SignedVerdict};
use tradesentry_verifier::{Clock, SaltRegistry, VerdictReview, VerifyPolicy};

use crate::audit::{AuditLog, AuditRecord, AUDIT_SCHEMA};
use crate::classifier::ClassifierBackend;
use crate::config::DaemonConfig;
use crate::feeds::Feeds;
use crate::pipeline::{run_and_compare, run_once, PipelineConfig, RunOutput};
use crate::telemetry::Telemetry;

/// Conservative maximal risk code carried by every structured error: a
/// request we refused to score is never reported as "no risk".
pub const MAXIMAL_RISK_CODE: u8 = 0xff;

#[derive(Clone)]
pub struct AppState {
    pub cfg: DaemonConfig,
    pub telemetry: Arc<Telemetry>,
    pub signing_key: Arc<SigningKey>,
    /// Hex identity of this node's verifying key.
    pub authority: String,
    pub registry: Arc<dyn SaltRegistry>,
    pub backends: Arc<Vec<Arc<dyn ClassifierBackend>>>,
    pub feeds: Arc<Feeds>,
    pub audit: Arc<AuditLog>,
    pub clock: Arc<dyn Clock>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct VerdictHttpRequest {
    pub token_address: String,
    pub chain_id: u64,
    pub asking_price: Option<String>,
    pub amount: Option<String>,
    pub user_address: Option<String>,
    pub consensus_runs: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerdictHttpResponse {
    pub request_id: String,
    pub verdict: SignedVerdict,
    /// Out-of-band human-readable explanation; its hash is what is signed.
    pub reasoning: String,
    pub logic_flags: u16,
    pub ai_flags: u16,
    pub risk_flags: Vec<&'static str>,
    pub classifier_fallback: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consensus: Option<ConsensusResult>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct VerifyHttpRequest {
    pub verdict: SignedVerdict,
    /// Defaults to this node's own authority identity.
    pub expected_signer: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub error: &'static str,
    pub reason: String,
    pub risk_code: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consensus: Option<ConsensusResult>,
}

#[derive(Debug)]
pub struct HttpErr {
    pub status: StatusCode,
    pub kind: &'static str,
    pub body: ErrorBody,
}

impl HttpErr {
    fn invalid_input(reason: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            kind: "invalid_input",
            body: ErrorBody {
                error: "INVALID_INPUT",
                reason: reason.into(),
                risk_code: MAXIMAL_RISK_CODE,
                consensus: None,
            },
        }
    }

    fn unauthorized() -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            kind: "unauthorized",
            body: ErrorBody {
                error: "UNAUTHORIZED",
                reason: "missing or invalid bearer token".to_string(),
                risk_code: MAXIMAL_RISK_CODE,
                consensus: None,
            },
        }
    }

    fn consensus_mismatch(result: ConsensusResult) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            kind: "consensus_mismatch",
            body: ErrorBody {
                error: "CONSENSUS_MISMATCH",
                reason: format!(
                    "{} of {} runs disagree with the reference run; no verdict was signed",
                    result.mismatches.len(),
                    result.runs
                ),
                risk_code: MAXIMAL_RISK_CODE,
                consensus: Some(result),
            },
        }
    }

    fn internal(reason: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            kind: "internal",
            body: ErrorBody {
                error: "INTERNAL",
                reason: reason.into(),
                risk_code: MAXIMAL_RISK_CODE,
                consensus: None,
            },
        }
    }

    fn from_sentry(err: SentryError) -> Self {
        match err {
            SentryError::InvalidInput(reason) => Self::invalid_input(reason),
            other => Self::internal(other.to_string()),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/verdict", post(issue_verdict))
        .route("/v1/verify", post(verify_envelope))
        .layer(RequestBodyLimitLayer::new(state.cfg.max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(
    listener: tokio::net::TcpListener,
    state: AppState,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), std::io::Error> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn issue_verdict(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> impl IntoResponse {
    let started = Instant::now();
    let outcome = verdict_impl(&state, &headers, &body).await;
    state
        .telemetry
        .record_verdict_latency_ms(started.elapsed().as_millis() as u64);
    match outcome {
        Ok(resp) => (StatusCode::OK, Json(resp)).into_response(),
        Err(err) => {
            state.telemetry.record_request_failure(err.kind);
            (err.status, Json(err.body)).into_response()
        }
    }
}

async fn verify_envelope(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> impl IntoResponse {
    match verify_impl(&state, &headers, &body).await {
        Ok(review) => (StatusCode::OK, Json(review)).into_response(),
        Err(err) => {
            state.telemetry.record_request_failure(err.kind);
            (err.status, Json(err.body)).into_response()
        }
    }
}

pub async fn verdict_impl(
    state: &AppState,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<VerdictHttpResponse, HttpErr> {
    validate_authorization(headers, &state.cfg)?;
    let request_id = validate_request_id(headers)?;

    let req: VerdictHttpRequest = serde_json::from_slice(body)
        .map_err(|err| HttpErr::invalid_input(format!("malformed request: {err}")))?;

    let token_address: Address = req
        .token_address
        .parse()
        .map_err(|err: SentryError| HttpErr::invalid_input(err.to_string()))?;
    if req.chain_id == 0 {
        return Err(HttpErr::invalid_input("chainId must be non-zero"));
    }
    let user_address = match req.user_address.as_deref() {
        Some(raw) => raw
            .parse()
            .map_err(|err: SentryError| HttpErr::invalid_input(err.to_string()))?,
        None => Address::zero(),
    };
    let consensus_runs = req
        .consensus_runs
        .unwrap_or(state.cfg.default_consensus_runs);
    if consensus_runs == 0 || consensus_runs > state.cfg.max_consensus_runs {
        return Err(HttpErr::invalid_input(format!(
            "consensusRuns must be in 1..={}",
            state.cfg.max_consensus_runs
        )));
    }
    let amount: PriceFixed = match req.amount.as_deref() {
        Some(raw) => raw
            .parse()
            .map_err(|err: SentryError| HttpErr::invalid_input(err.to_string()))?,
        None => PriceFixed::whole(1),
    };

    // Freeze the upstream snapshot once; consensus runs all score the same
    // bytes.
    let snapshot = state
        .feeds
        .fetch_snapshot(req.chain_id, &token_address, &state.telemetry)
        .await;

    let asking_price: PriceFixed = match req.asking_price.as_deref() {
        Some(raw) => raw
            .parse()
            .map_err(|err: SentryError| HttpErr::invalid_input(err.to_string()))?,
        None => match snapshot.market_price {
            tradesentry_core::context::PriceSignal::Available(quote) => quote,
            tradesentry_core::context::PriceSignal::Unavailable => {
                return Err(HttpErr::invalid_input(
                    "askingPrice is required when no market quote is available",
                ));
            }
        },
    };

    let trade = TradeRequest {
        token_address,
        chain_id: req.chain_id,
        asking_price,
        amount,
        user_address,
    };
    let pipeline_cfg = PipelineConfig {
        high_value_threshold_usd: state.cfg.high_value_threshold_usd,
        classifier_timeout: std::time::Duration::from_millis(state.cfg.classifier_timeout_ms),
    };

    let (output, consensus): (RunOutput, Option<ConsensusResult>) = if consensus_runs >= 2 {
        let (output, result) = run_and_compare(
            &trade,
            &snapshot,
            &state.backends,
            &pipeline_cfg,
            consensus_runs,
            state.clock.as_ref(),
            &state.telemetry,
        )
        .await
        .map_err(HttpErr::from_sentry)?;
        if !result.agreed {
            state.telemetry.record_consensus("mismatch");
            tracing::warn!(
                request_id = %request_id,
                token_address = %trade.token_address,
                mismatches = result.mismatches.len(),
                "consensus mismatch; refusing to sign"
            );
            return Err(HttpErr::consensus_mismatch(result));
        }
        state.telemetry.record_consensus("agreed");
        (output, Some(result))
    } else {
        let output = run_once(
            &trade,
            &snapshot,
            &state.backends,
            &pipeline_cfg,
            state.clock.now_unix(),
            &state.telemetry,
        )
        .await
        .map_err(HttpErr::from_sentry)?;
        (output, None)
    };

    let run = output.run;
    let envelope = sign_verdict(run.message.clone(), &state.signing_key);
    let risk_code = run.logic_flags | run.ai_flags;

    state
        .telemetry
        .record_verdict(run.message.decision.as_str(), if consensus.is_some() { "consensus" } else { "single" });
    for flag in risk_code.iter() {
        state.telemetry.record_reject_flag(flag.name());
    }

    let record = AuditRecord {
        schema: AUDIT_SCHEMA.to_string(),
        request_id: request_id.clone(),
        token_address: trade.token_address.as_str().to_string(),
        chain_id: trade.chain_id,
        decision: run.message.decision.as_str().to_string(),
        risk_score: run.message.risk_score,
        logic_flags: run.logic_flags.bits(),
        ai_flags: run.ai_flags.bits(),
        classifier_fallback: output.classifier_fallback,
        consensus_runs,
        message_hash: hex::encode(envelope.message_hash),
        signer: envelope.signer.clone(),
        timestamp: run.message.timestamp,
    };
    if let Err(err) = state.audit.append(&record) {
        tracing::error!(request_id = %request_id, error = %err, "audit append failed");
    }

    tracing::info!(
        request_id = %request_id,
        token_address = %trade.token_address,
        chain_id = trade.chain_id,
        decision = %run.message.decision.as_str(),
        risk_code = risk_code.bits(),
        classifier_fallback = output.classifier_fallback,
        "verdict issued"
    );
    tracing::info!(
        target: "tradesentry.verdict.audit",
        request_id = %request_id,
        message_hash = %hex::encode(envelope.message_hash),
        signer = %envelope.signer,
        "verdict audit event"
    );

    Ok(VerdictHttpResponse {
        request_id,
        reasoning: output.reasoning,
        logic_flags: run.logic_flags.bits(),
        ai_flags: run.ai_flags.bits(),
        risk_flags: risk_code.names(),
        classifier_fallback: output.classifier_fallback,
        consensus,
        verdict: envelope,
    })
}

pub async fn verify_impl(
    state: &AppState,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<VerdictReview, HttpErr> {
    validate_authorization(headers, &state.cfg)?;
    let request_id = validate_request_id(headers)?;

    let req: VerifyHttpRequest = serde_json::from_slice(body)
        .map_err(|err| HttpErr::invalid_input(format!("malformed request: {err}")))?;
    let expected = req
        .expected_signer
        .unwrap_or_else(|| state.authority.clone());

    let policy = VerifyPolicy {
        expiry_window_secs: state.cfg.expiry_window_secs,
        max_clock_skew_secs: state.cfg.max_clock_skew_secs,
    };
    let review = tradesentry_verifier::verify(
        &req.verdict,
        &expected,
        state.registry.as_ref(),
        &policy,
        state.clock.as_ref(),
    );

    let result = review
        .reason
        .map(|r| r.as_str())
        .unwrap_or("accepted");
    state.telemetry.record_verification(result);
    tracing::info!(
        request_id = %request_id,
        valid = review.valid,
        result = result,
        "envelope verified"
    );
    Ok(review)
}

fn validate_authorization(headers: &HeaderMap, cfg: &DaemonConfig) -> Result<(), HttpErr> {
    let Some(token) = cfg.require_bearer_token.as_ref() else {
        return Ok(());
    };
    let Some(value) = headers.get(AUTHORIZATION) else {
        return Err(HttpErr::unauthorized());
    };
    let parsed = value.to_str().map_err(|_| HttpErr::unauthorized())?;
    if parsed != format!("Bearer {token}") {
        return Err(HttpErr::unauthorized());
    }
    Ok(())
}

fn validate_request_id(headers: &HeaderMap) -> Result<String, HttpErr> {
    let Some(value) = headers.get("x-request-id") else {
        return Err(HttpErr::invalid_input("missing x-request-id header"));
    };
    let request_id = value
        .to_str()
        .map_err(|_| HttpErr::invalid_input("invalid x-request-id"))?;
    if request_id.is_empty()
        || request_id.len() > 128
        || !request_id
            .bytes()
            .all(|b| (0x21..=0x7e).contains(&b) && b != b':')
    {
        return Err(HttpErr::invalid_input("invalid x-request-id"));
    }
    Ok(request_id.to_string())
}
