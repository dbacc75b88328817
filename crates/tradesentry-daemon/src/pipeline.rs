//! The scoring pipeline: normalize, fork-join the two flag paths, compose.
//!
//! The rule evaluator and the semantic classifier are independent and run
//! concurrently; the composer blocks on both. The classifier is the only
//! suspension point with a timeout; it falls back deterministically rather
//! than fail. Consensus mode fans out `n` independent executions over the
//! same frozen snapshot, with no shared mutable state between runs.

use std::sync::Arc;
use std::time::Duration;
use tradesentry_core::consensus::{compare_runs, ConsensusResult, PipelineRun};
use tradesentry_core::context::{normalize, TradeRequest, UpstreamSnapshot};
use tradesentry_core::error::{SentryError, SentryResult};
use tradesentry_core::fixed::PriceFixed;
use tradesentry_core::rules;
use tradesentry_core::verdict::compose;
use tradesentry_verifier::Clock;

use crate::classifier::{classify_all, ClassifierBackend};
use crate::telemetry::Telemetry;

#[derive(Debug, Clone, Copy)]
pub struct PipelineConfig {
    pub high_value_threshold_usd: PriceFixed,
    pub classifier_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct RunOutput {
    pub run: PipelineRun,
    pub reasoning: String,
    pub classifier_fallback: bool,
}

/// One full pipeline execution over a frozen snapshot.
pub async fn run_once(
    request: &TradeRequest,
    snapshot: &UpstreamSnapshot,
    backends: &[Arc<dyn ClassifierBackend>],
    cfg: &PipelineConfig,
    timestamp: u64,
    telemetry: &Telemetry,
) -> SentryResult<RunOutput> {
    let ctx = normalize(request, snapshot, cfg.high_value_threshold_usd)?;

    let (logic, classifier) = tokio::join!(
        async { rules::evaluate(&ctx) },
        classify_all(backends, &ctx, cfg.classifier_timeout, telemetry),
    );

    let (message, reasoning) = compose(logic, classifier.flags, &ctx, request, timestamp)?;
    Ok(RunOutput {
        run: PipelineRun {
            logic_flags: logic,
            ai_flags: classifier.flags,
            message,
        },
        reasoning,
        classifier_fallback: classifier.fallback_used,
    })
}

/// Fans out `n >= 2` independent executions and checks bit-for-bit
/// agreement. Returns the reference run together with the comparison result;
/// the caller must not sign anything unless `agreed` is set. A single run's
/// failure does not cancel its siblings.
pub async fn run_and_compare(
    request: &TradeRequest,
    snapshot: &UpstreamSnapshot,
    backends: &Arc<Vec<Arc<dyn ClassifierBackend>>>,
    cfg: &PipelineConfig,
    runs: u32,
    clock: &dyn Clock,
    telemetry: &Telemetry,
) -> SentryResult<(RunOutput, ConsensusResult)> {
    if runs < 2 {
        return Err(SentryError::InvalidInput(
            "consensus requires at least 2 runs".to_string(),
        ));
    }

    let mut handles = Vec::with_capacity(runs as usize);
    for _ in 0..runs {
        let request = request.clone();
        let snapshot = *snapshot;
        let backends = Arc::clone(backends);
        let cfg = *cfg;
        let telemetry = telemetry.clone();
        let timestamp = clock.now_unix();
        handles.push(tokio::spawn(async move {
            run_once(&request, &snapshot, &backends, &cfg, timestamp, &telemetry).await
        }));
    }

    let mut outputs = Vec::with_capacity(handles.len());
    for handle in handles {
        let output = handle
            .await
            .map_err(|err| SentryError::Internal(format!("consensus run panicked: {err}")))??;
        outputs.push(output);
    }

    let runs: Vec<PipelineRun> = outputs.iter().map(|o| o.run.clone()).collect();
    let result = compare_runs(&runs)?;
    let reference = outputs.into_iter().next().ok_or_else(|| {
        SentryError::Internal("consensus produced no reference run".to_string())
    })?;
    Ok((reference, result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::ClassifierBackend;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tradesentry_core::context::{
        Address, EntropySample, PriceSignal, RiskContext, SecurityMetadata, SecurityReport,
    };
    use tradesentry_core::flags::{RiskFlag, RiskFlags};
    use tradesentry_core::verdict::Decision;

    struct FixedClock(u64);

    impl Clock for FixedClock {
        fn now_unix(&self) -> u64 {
            self.0
        }
    }

    struct QuietBackend;

    #[async_trait]
    impl ClassifierBackend for QuietBackend {
        fn name(&self) -> &str {
            "quiet"
        }

        async fn classify(&self, _ctx: &RiskContext) -> SentryResult<RiskFlags> {
            Ok(RiskFlags::EMPTY)
        }
    }

    /// Misbehaving backend: returns a different answer on one call out of
    /// three. Models the classifier bug the consensus check exists to catch.
    struct FlakyBackend {
        calls: AtomicU32,
        deviant_call: u32,
    }

    #[async_trait]
    impl ClassifierBackend for FlakyBackend {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn classify(&self, _ctx: &RiskContext) -> SentryResult<RiskFlags> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call == self.deviant_call {
                Ok(RiskFlags::EMPTY.with(RiskFlag::Proxy))
            } else {
                Ok(RiskFlags::EMPTY)
            }
        }
    }

    fn request() -> TradeRequest {
        TradeRequest {
            token_address: "0x00000000000000000000000000000000000000a1".parse().unwrap(),
            chain_id: 1,
            asking_price: "2100.00".parse().unwrap(),
            amount: "1".parse().unwrap(),
            user_address: Address::zero(),
        }
    }

    fn snapshot() -> UpstreamSnapshot {
        UpstreamSnapshot {
            market_price: PriceSignal::Available("2065.00".parse().unwrap()),
            security: SecurityReport::Available(SecurityMetadata::default()),
            entropy: EntropySample::fallback(),
        }
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            high_value_threshold_usd: PriceFixed::whole(10_000),
            classifier_timeout: Duration::from_millis(100),
        }
    }

    #[tokio::test]
    async fn clean_trade_executes_with_zero_risk_code() {
        let backends: Vec<Arc<dyn ClassifierBackend>> = vec![Arc::new(QuietBackend)];
        let output = run_once(
            &request(),
            &snapshot(),
            &backends,
            &config(),
            1_700_000_000,
            &Telemetry::default(),
        )
        .await
        .unwrap();

        assert_eq!(output.run.message.decision, Decision::Execute);
        assert_eq!(output.run.message.risk_score, 0);
        assert!(!output.classifier_fallback);
    }

    #[tokio::test]
    async fn three_agreeing_runs_reach_consensus() {
        let backends: Arc<Vec<Arc<dyn ClassifierBackend>>> =
            Arc::new(vec![Arc::new(QuietBackend)]);
        let (reference, result) = run_and_compare(
            &request(),
            &snapshot(),
            &backends,
            &config(),
            3,
            &FixedClock(1_700_000_000),
            &Telemetry::default(),
        )
        .await
        .unwrap();

        assert!(result.agreed);
        assert_eq!(result.runs, 3);
        assert_eq!(reference.run.message.decision, Decision::Execute);
    }

    #[tokio::test]
    async fn deviant_run_breaks_consensus_and_is_named() {
        let backends: Arc<Vec<Arc<dyn ClassifierBackend>>> = Arc::new(vec![Arc::new(
            FlakyBackend {
                calls: AtomicU32::new(0),
                deviant_call: 1,
            },
        )]);
        let (_, result) = run_and_compare(
            &request(),
            &snapshot(),
            &backends,
            &config(),
            3,
            &FixedClock(1_700_000_000),
            &Telemetry::default(),
        )
        .await
        .unwrap();

        assert!(!result.agreed);
        // The deviant answer lands on exactly one run; depending on whether
        // that run is the reference, either it or the two others mismatch.
        assert!(matches!(result.mismatches.len(), 1 | 2));
        for mismatch in &result.mismatches {
            assert!(mismatch.fields.contains(&"aiFlags"));
        }
    }

    #[tokio::test]
    async fn consensus_requires_two_runs() {
        let backends: Arc<Vec<Arc<dyn ClassifierBackend>>> = Arc::new(Vec::new());
        let err = run_and_compare(
            &request(),
            &snapshot(),
            &backends,
            &config(),
            1,
            &FixedClock(0),
            &Telemetry::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SentryError::InvalidInput(_)));
    }
}
