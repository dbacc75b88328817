// Copyright (c) 2026 TradeSentry Contributors
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use tradesentry_daemon::audit::AuditLog;
use tradesentry_daemon::classifier::{ClassifierBackend, HttpModelBackend};
use tradesentry_daemon::config::DaemonConfig;
use tradesentry_daemon::feeds::Feeds;
use tradesentry_daemon::http::{self, AppState};
use tradesentry_daemon::salt_store::DurableSaltRegistry;
use tradesentry_daemon::signer;
use tradesentry_daemon::telemetry::Telemetry;
use tradesentry_verifier::SystemClock;

#[derive(Debug, Parser)]
#[command(name = "tradesentry-daemon")]
#[command(about = "TradeSentry oracle node: signed trade-risk verdicts")]
struct Args {
    /// Overrides the configured listen address.
    #[arg(long)]
    listen: Option<String>,

    #[arg(long)]
    config: Option<String>,

    #[arg(long, default_value = "./data")]
    data_dir: String,

    #[arg(long, default_value = "info")]
    log: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(args.log))
        .init();

    let mut cfg = match &args.config {
        Some(path) => DaemonConfig::load(path)?,
        None => DaemonConfig::default(),
    };
    if let Some(listen) = args.listen {
        cfg.listen = listen;
    }
    cfg.data_dir = args.data_dir.into();
    std::fs::create_dir_all(&cfg.data_dir)?;

    let signing_key = signer::load_signing_key(&cfg.signing_key_path)?;
    let authority = tradesentry_core::sign::authority_id(&signing_key.verifying_key());

    let registry = DurableSaltRegistry::open(cfg.data_dir.join("salts.ndjson"))?;
    let audit = AuditLog::new(cfg.data_dir.join("verdicts.ndjson"));
    let feeds = Feeds::from_config(&cfg);
    let backends: Vec<Arc<dyn ClassifierBackend>> = cfg
        .classifier_backends
        .iter()
        .cloned()
        .map(|backend_cfg| Arc::new(HttpModelBackend::new(backend_cfg)) as Arc<dyn ClassifierBackend>)
        .collect();

    let telemetry = Arc::new(Telemetry::new());
    if let Some(metrics_listen) = &cfg.metrics_listen {
        let addr: SocketAddr = metrics_listen.parse()?;
        telemetry.clone().spawn_metrics_server(addr).await?;
        tracing::info!(%addr, "metrics listener started");
    }

    let listener = tokio::net::TcpListener::bind(&cfg.listen).await?;
    tracing::info!(
        listen = %cfg.listen,
        data_dir = %cfg.data_dir.display(),
        %authority,
        backends = backends.len(),
        "starting TradeSentry oracle daemon"
    );

    let state = AppState {
        cfg,
        telemetry,
        signing_key: Arc::new(signing_key),
        authority,
        registry: Arc::new(registry),
        backends: Arc::new(backends),
        feeds: Arc::new(feeds),
        audit: Arc::new(audit),
        clock: Arc::new(SystemClock),
    };

    http::serve(listener, state, async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received");
    })
    .await?;

    Ok(())
}
