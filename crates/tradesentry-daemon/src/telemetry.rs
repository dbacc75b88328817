use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("metrics server failed: {0}")]
    Server(std::io::Error),
}

#[derive(Debug, Default)]
struct TelemetryState {
    verdicts_total: HashMap<(String, String), u64>,
    reject_flags_total: HashMap<String, u64>,
    classifier_fallback_total: HashMap<String, u64>,
    upstream_failures_total: HashMap<String, u64>,
    consensus_checks_total: HashMap<String, u64>,
    verifications_total: HashMap<String, u64>,
    request_failures_total: HashMap<String, u64>,
    verdict_latency_ms_bucket: BTreeMap<u64, u64>,
}

#[derive(Debug, Clone, Default)]
pub struct Telemetry {
    state: Arc<Mutex<TelemetryState>>,
}

impl Telemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_verdict(&self, decision: &str, mode: &str) {
        let mut guard = self.state.lock();
        let entry = guard
            .verdicts_total
            .entry((decision.to_string(), mode.to_string()))
            .or_insert(0);
        *entry = entry.saturating_add(1);
    }

    pub fn record_reject_flag(&self, flag: &str) {
        let mut guard = self.state.lock();
        let entry = guard.reject_flags_total.entry(flag.to_string()).or_insert(0);
        *entry = entry.saturating_add(1);
    }

    pub fn record_classifier_fallback(&self, backend: &str) {
        let mut guard = self.state.lock();
        let entry = guard
            .classifier_fallback_total
            .entry(backend.to_string())
            .or_insert(0);
        *entry = entry.saturating_add(1);
    }

    pub fn record_upstream_failure(&self, source: &str) {
        let mut guard = self.state.lock();
        let entry = guard
            .upstream_failures_total
            .entry(source.to_string())
            .or_insert(0);
        *entry = entry.saturating_add(1);
    }

    pub fn record_consensus(&self, outcome: &str) {
        let mut guard = self.state.lock();
        let entry = guard
            .consensus_checks_total
            .entry(outcome.to_string())
            .or_insert(0);
        *entry = entry.saturating_add(1);
    }

    pub fn record_verification(&self, result: &str) {
        let mut guard = self.state.lock();
        let entry = guard
            .verifications_total
            .entry(result.to_string())
            .or_insert(0);
        *entry = entry.saturating_add(1);
    }

    pub fn record_request_failure(&self, kind: &str) {
        let mut guard = self.state.lock();
        let entry = guard
            .request_failures_total
            .entry(kind.to_string())
            .or_insert(0);
        *entry = entry.saturating_add(1);
    }

    pub fn record_verdict_latency_ms(&self, latency_ms: u64) {
        let mut guard = self.state.lock();
        let bucket = [1_u64, 5, 10, 25, 50, 100, 250, 500, 1000, 5000, 15000]
            .into_iter()
            .find(|bound| latency_ms <= *bound)
            .unwrap_or(u64::MAX);
        let entry = guard.verdict_latency_ms_bucket.entry(bucket).or_insert(0);
        *entry = entry.saturating_add(1);
    }

    pub fn render(&self) -> String {
        let guard = self.state.lock();
        let mut out = String::new();
        out.push_str("# TYPE tradesentry_verdicts_total counter\n");
        for ((decision, mode), value) in &guard.verdicts_total {
            let _ = writeln!(
                out,
                "tradesentry_verdicts_total{{decision=\"{}\",mode=\"{}\"}} {}",
                decision, mode, value
            );
        }
        out.push_str("# TYPE tradesentry_reject_flags_total counter\n");
        for (flag, value) in &guard.reject_flags_total {
            let _ = writeln!(
                out,
                "tradesentry_reject_flags_total{{flag=\"{}\"}} {}",
                flag, value
            );
        }
        out.push_str("# TYPE tradesentry_classifier_fallback_total counter\n");
        for (backend, value) in &guard.classifier_fallback_total {
            let _ = writeln!(
                out,
                "tradesentry_classifier_fallback_total{{backend=\"{}\"}} {}",
                backend, value
            );
        }
        out.push_str("# TYPE tradesentry_upstream_failures_total counter\n");
        for (source, value) in &guard.upstream_failures_total {
            let _ = writeln!(
                out,
                "tradesentry_upstream_failures_total{{source=\"{}\"}} {}",
                source, value
            );
        }
        out.push_str("# TYPE tradesentry_consensus_checks_total counter\n");
        for (outcome, value) in &guard.consensus_checks_total {
            let _ = writeln!(
                out,
                "tradesentry_consensus_checks_total{{outcome=\"{}\"}} {}",
                outcome, value
            );
        }
        out.push_str("# TYPE tradesentry_verifications_total counter\n");
        for (result, value) in &guard.verifications_total {
            let _ = writeln!(
                out,
                "tradesentry_verifications_total{{result=\"{}\"}} {}",
                result, value
            );
        }
        out.push_str("# TYPE tradesentry_request_failures_total counter\n");
        for (kind, value) in &guard.request_failures_total {
            let _ = writeln!(
                out,
                "tradesentry_request_failures_total{{kind=\"{}\"}} {}",
                kind, value
            );
        }
        out.push_str("# TYPE tradesentry_verdict_latency_ms_bucket counter\n");
        for (bucket, value) in &guard.verdict_latency_ms_bucket {
            let bucket_label = if *bucket == u64::MAX {
                "+Inf".to_string()
            } else {
                bucket.to_string()
            };
            let _ = writeln!(
                out,
                "tradesentry_verdict_latency_ms_bucket{{le=\"{}\"}} {}",
                bucket_label, value
            );
        }
        out
    }

    pub async fn spawn_metrics_server(
        self: Arc<Self>,
        addr: SocketAddr,
    ) -> Result<tokio::task::JoinHandle<()>, TelemetryError> {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(TelemetryError::Server)?;
        Ok(tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((mut socket, _)) => {
                        let telemetry = self.clone();
                        tokio::spawn(async move {
                            let mut buf = vec![0_u8; 2048];
                            match socket.read(&mut buf).await {
                                Ok(n) if n > 0 => {
                                    let req = String::from_utf8_lossy(&buf[..n]);
                                    let (status, body) = if req.starts_with("GET /metrics ") {
                                        ("200 OK", telemetry.render())
                                    } else {
                                        ("404 Not Found", "not found".to_string())
                                    };
                                    let response = format!(
                                        "HTTP/1.1 {status}\r\ncontent-type: text/plain; version=0.0.4\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                                        body.len(), body
                                    );
                                    let _ = socket.write_all(response.as_bytes()).await;
                                }
                                Ok(_) => {}
                                Err(err) => {
                                    tracing::warn!(error=%err, "metrics socket read failed");
                                }
                            }
                        });
                    }
                    Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                    Err(err) => {
                        tracing::error!(error=%err, "metrics server accept failed");
                        break;
                    }
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_includes_recorded_counters() {
        let telemetry = Telemetry::new();
        telemetry.record_verdict("REJECT", "single");
        telemetry.record_reject_flag("HONEYPOT");
        telemetry.record_upstream_failure("price");
        telemetry.record_verification("replay");

        let rendered = telemetry.render();
        assert!(rendered
            .contains("tradesentry_verdicts_total{decision=\"REJECT\",mode=\"single\"} 1"));
        assert!(rendered.contains("tradesentry_reject_flags_total{flag=\"HONEYPOT\"} 1"));
        assert!(rendered.contains("tradesentry_upstream_failures_total{source=\"price\"} 1"));
        assert!(rendered.contains("tradesentry_verifications_total{result=\"replay\"} 1"));
    }

    #[test]
    fn latency_buckets_are_cumulative_labels() {
        let telemetry = Telemetry::new();
        telemetry.record_verdict_latency_ms(3);
        telemetry.record_verdict_latency_ms(999_999);
        let rendered = telemetry.render();
        assert!(rendered.contains("tradesentry_verdict_latency_ms_bucket{le=\"5\"} 1"));
        assert!(rendered.contains("tradesentry_verdict_latency_ms_bucket{le=\"+Inf\"} 1"));
    }
}
