use crate::classifier::ModelBackendConfig;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tradesentry_core::fixed::PriceFixed;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfig {
    pub listen: String,
    pub metrics_listen: Option<String>,
    pub data_dir: PathBuf,
    pub require_bearer_token: Option<String>,
    pub max_body_bytes: usize,
    pub classifier_timeout_ms: u64,
    pub expiry_window_secs: u64,
    pub max_clock_skew_secs: u64,
    pub high_value_threshold_usd: PriceFixed,
    /// Pipeline executions per request when the request does not ask for a
    /// specific count. 1 disables the consensus check.
    pub default_consensus_runs: u32,
    pub max_consensus_runs: u32,
    pub signing_key_path: PathBuf,
    pub price_feed_url: Option<String>,
    pub security_feed_url: Option<String>,
    pub randomness_url: Option<String>,
    pub classifier_backends: Vec<ModelBackendConfig>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8770".to_string(),
            metrics_listen: None,
            data_dir: PathBuf::from("./data"),
            require_bearer_token: None,
            max_body_bytes: 16_384,
            classifier_timeout_ms: 10_000,
            expiry_window_secs: 300,
            max_clock_skew_secs: 30,
            high_value_threshold_usd: PriceFixed::whole(10_000),
            default_consensus_runs: 1,
            max_consensus_runs: 9,
            signing_key_path: PathBuf::from("./data/signing_key.hex"),
            price_feed_url: None,
            security_feed_url: None,
            randomness_url: None,
            classifier_backends: Vec::new(),
        }
    }
}

impl DaemonConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Box<dyn std::error::Error>> {
        let payload = fs::read(path)?;
        let cfg: DaemonConfig = serde_json::from_slice(&payload)?;
        if cfg.default_consensus_runs == 0 || cfg.default_consensus_runs > cfg.max_consensus_runs {
            return Err("default_consensus_runs must be in 1..=max_consensus_runs".into());
        }
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_sane() {
        let cfg = DaemonConfig::default();
        assert_eq!(cfg.expiry_window_secs, 300);
        assert_eq!(cfg.default_consensus_runs, 1);
        assert_eq!(cfg.high_value_threshold_usd, PriceFixed::whole(10_000));
    }

    #[test]
    fn load_rejects_zero_consensus_runs() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(br#"{"default_consensus_runs": 0}"#).unwrap();
        assert!(DaemonConfig::load(file.path()).is_err());
    }

    #[test]
    fn load_merges_partial_config_over_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(br#"{"listen": "0.0.0.0:9000", "default_consensus_runs": 3}"#)
            .unwrap();
        let cfg = DaemonConfig::load(file.path()).unwrap();
        assert_eq!(cfg.listen, "0.0.0.0:9000");
        assert_eq!(cfg.default_consensus_runs, 3);
        assert_eq!(cfg.max_body_bytes, 16_384);
    }
}
