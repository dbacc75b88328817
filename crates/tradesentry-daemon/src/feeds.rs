//! Upstream data sources: market price, token security scan, randomness.
//!
//! Each source is a capability trait with a reqwest-backed implementation
//! and a named deterministic fallback. A failing source never aborts verdict
//! production: `fetch_snapshot` absorbs every failure into the explicit
//! `Unavailable` state (or the fixed entropy constant) and logs it.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tradesentry_core::context::{
    Address, EntropySample, EntropySource, PriceSignal, SecurityMetadata, SecurityReport,
    UpstreamSnapshot,
};
use tradesentry_core::error::{SentryError, SentryResult};
use tradesentry_core::fixed::PriceFixed;

use crate::telemetry::Telemetry;

const FEED_TIMEOUT: Duration = Duration::from_secs(5);

#[async_trait]
pub trait PriceFeed: Send + Sync {
    async fn usd_price(&self, chain_id: u64, token: &Address) -> SentryResult<PriceFixed>;
}

#[async_trait]
pub trait SecurityScanner: Send + Sync {
    async fn scan(&self, chain_id: u64, token: &Address) -> SentryResult<SecurityMetadata>;
}

#[async_trait]
pub trait RandomnessBeacon: Send + Sync {
    async fn entropy(&self) -> SentryResult<[u8; 32]>;
}

/// A source that was never configured. Always takes the fallback path.
pub struct DisabledSource;

#[async_trait]
impl PriceFeed for DisabledSource {
    async fn usd_price(&self, _chain_id: u64, _token: &Address) -> SentryResult<PriceFixed> {
        Err(SentryError::UpstreamUnavailable(
            "price feed is not configured".to_string(),
        ))
    }
}

#[async_trait]
impl SecurityScanner for DisabledSource {
    async fn scan(&self, _chain_id: u64, _token: &Address) -> SentryResult<SecurityMetadata> {
        Err(SentryError::UpstreamUnavailable(
            "security scanner is not configured".to_string(),
        ))
    }
}

#[async_trait]
impl RandomnessBeacon for DisabledSource {
    async fn entropy(&self) -> SentryResult<[u8; 32]> {
        Err(SentryError::UpstreamUnavailable(
            "randomness beacon is not configured".to_string(),
        ))
    }
}

#[derive(Debug, Deserialize)]
struct PriceResponse {
    usd_price: String,
}

pub struct HttpPriceFeed {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPriceFeed {
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }
}

#[async_trait]
impl PriceFeed for HttpPriceFeed {
    async fn usd_price(&self, chain_id: u64, token: &Address) -> SentryResult<PriceFixed> {
        let url = format!("{}/price/{}/{}", self.base_url, chain_id, token);
        let response = self
            .client
            .get(&url)
            .timeout(FEED_TIMEOUT)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|err| SentryError::UpstreamUnavailable(format!("price feed: {err}")))?;
        let parsed: PriceResponse = response
            .json()
            .await
            .map_err(|err| SentryError::UpstreamUnavailable(format!("price feed: {err}")))?;
        parsed.usd_price.parse()
    }
}

/// Wire schema of the security scanner, kept separate from the domain type
/// so scanner quirks stay at this boundary.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SecurityResponse {
    is_honeypot: bool,
    buy_tax_pct: String,
    sell_tax_pct: String,
    cannot_buy: bool,
    cannot_sell: bool,
    is_proxy: bool,
    is_mintable: bool,
    owner_changeable: bool,
    #[serde(default)]
    is_trust_listed: bool,
}

pub struct HttpSecurityScanner {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSecurityScanner {
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }
}

#[async_trait]
impl SecurityScanner for HttpSecurityScanner {
    async fn scan(&self, chain_id: u64, token: &Address) -> SentryResult<SecurityMetadata> {
        let url = format!("{}/scan/{}/{}", self.base_url, chain_id, token);
        let response = self
            .client
            .get(&url)
            .timeout(FEED_TIMEOUT)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|err| SentryError::UpstreamUnavailable(format!("security scan: {err}")))?;
        let parsed: SecurityResponse = response
            .json()
            .await
            .map_err(|err| SentryError::UpstreamUnavailable(format!("security scan: {err}")))?;
        Ok(SecurityMetadata {
            is_honeypot: parsed.is_honeypot,
            buy_tax_pct: parsed.buy_tax_pct.parse()?,
            sell_tax_pct: parsed.sell_tax_pct.parse()?,
            cannot_buy: parsed.cannot_buy,
            cannot_sell: parsed.cannot_sell,
            is_proxy: parsed.is_proxy,
            is_mintable: parsed.is_mintable,
            owner_changeable: parsed.owner_changeable,
            is_trust_listed: parsed.is_trust_listed,
        })
    }
}

#[derive(Debug, Deserialize)]
struct RandomnessResponse {
    random_hex: String,
}

pub struct HttpRandomnessBeacon {
    client: reqwest::Client,
    url: String,
}

impl HttpRandomnessBeacon {
    pub fn new(url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
        }
    }
}

#[async_trait]
impl RandomnessBeacon for HttpRandomnessBeacon {
    async fn entropy(&self) -> SentryResult<[u8; 32]> {
        let response = self
            .client
            .get(&self.url)
            .timeout(FEED_TIMEOUT)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|err| SentryError::UpstreamUnavailable(format!("randomness: {err}")))?;
        let parsed: RandomnessResponse = response
            .json()
            .await
            .map_err(|err| SentryError::UpstreamUnavailable(format!("randomness: {err}")))?;
        let bytes = hex::decode(parsed.random_hex.trim()).map_err(|_| {
            SentryError::UpstreamUnavailable("randomness: response is not hex".to_string())
        })?;
        bytes.as_slice().try_into().map_err(|_| {
            SentryError::UpstreamUnavailable("randomness: expected 32 bytes".to_string())
        })
    }
}

/// The three upstream capabilities bundled for the pipeline.
pub struct Feeds {
    pub price: Arc<dyn PriceFeed>,
    pub security: Arc<dyn SecurityScanner>,
    pub randomness: Arc<dyn RandomnessBeacon>,
}

impl Feeds {
    pub fn from_config(cfg: &crate::config::DaemonConfig) -> Self {
        let price: Arc<dyn PriceFeed> = match &cfg.price_feed_url {
            Some(url) => Arc::new(HttpPriceFeed::new(url.clone())),
            None => Arc::new(DisabledSource),
        };
        let security: Arc<dyn SecurityScanner> = match &cfg.security_feed_url {
            Some(url) => Arc::new(HttpSecurityScanner::new(url.clone())),
            None => Arc::new(DisabledSource),
        };
        let randomness: Arc<dyn RandomnessBeacon> = match &cfg.randomness_url {
            Some(url) => Arc::new(HttpRandomnessBeacon::new(url.clone())),
            None => Arc::new(DisabledSource),
        };
        Self {
            price,
            security,
            randomness,
        }
    }

    /// Fetches all three sources concurrently and freezes the result.
    /// Failures degrade to the per-source fallback; they are counted and
    /// logged, never propagated.
    pub async fn fetch_snapshot(
        &self,
        chain_id: u64,
        token: &Address,
        telemetry: &Telemetry,
    ) -> UpstreamSnapshot {
        let (price, security, entropy) = tokio::join!(
            self.price.usd_price(chain_id, token),
            self.security.scan(chain_id, token),
            self.randomness.entropy(),
        );

        let market_price = match price {
            Ok(quote) => PriceSignal::Available(quote),
            Err(err) => {
                telemetry.record_upstream_failure("price");
                tracing::warn!(%token, error = %err, "price feed unavailable");
                PriceSignal::Unavailable
            }
        };
        let security = match security {
            Ok(report) => SecurityReport::Available(report),
            Err(err) => {
                telemetry.record_upstream_failure("security");
                tracing::warn!(%token, error = %err, "security scan unavailable");
                SecurityReport::Unavailable
            }
        };
        let entropy = match entropy {
            Ok(bytes) => EntropySample {
                bytes,
                source: EntropySource::Beacon,
            },
            Err(err) => {
                telemetry.record_upstream_failure("randomness");
                tracing::warn!(error = %err, "randomness beacon unavailable, using fallback constant");
                EntropySample::fallback()
            }
        };

        UpstreamSnapshot {
            market_price,
            security,
            entropy,
        }
    }
}
