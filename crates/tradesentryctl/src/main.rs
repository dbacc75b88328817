// Copyright (c) 2026 TradeSentry Contributors
// SPDX-License-Identifier: Apache-2.0

//! Operator tooling: key generation, offline envelope verification against a
//! durable salt store, and deterministic consensus replay over a captured
//! input snapshot.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use ed25519_dalek::SigningKey;
use rand::RngCore;
use serde::Deserialize;
use serde_json::json;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use tradesentry_core::context::{TradeRequest, UpstreamSnapshot};
use tradesentry_core::fixed::PriceFixed;
use tradesentry_core::sign::{authority_id, SignedVerdict};
use tradesentry_daemon::pipeline::{run_and_compare, PipelineConfig};
use tradesentry_daemon::salt_store::DurableSaltRegistry;
use tradesentry_daemon::telemetry::Telemetry;
use tradesentry_verifier::{SystemClock, VerifyPolicy};

#[derive(Parser)]
#[command(name = "tradesentryctl")]
#[command(about = "TradeSentry operator tooling")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate a fresh ed25519 signing seed and print the authority id.
    Keygen {
        #[arg(long)]
        out: PathBuf,
    },
    /// Verify a stored verdict envelope offline.
    Verify {
        #[arg(long)]
        envelope: PathBuf,
        #[arg(long)]
        expected_signer: String,
        /// Durable salt registry shared with the verifying service.
        #[arg(long)]
        salt_store: PathBuf,
        #[arg(long, default_value_t = 300)]
        expiry_window_secs: u64,
    },
    /// Re-run the deterministic pipeline over a captured input snapshot and
    /// report bit-for-bit agreement. Uses the classifier fallback path only,
    /// so the replay is fully deterministic.
    Replay {
        #[arg(long)]
        input: PathBuf,
        #[arg(long, default_value_t = 3)]
        runs: u32,
    },
}

/// Captured request + frozen upstream snapshot, as produced by an audit
/// pipeline or a debugging session.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct ReplayInput {
    request: TradeRequest,
    snapshot: UpstreamSnapshot,
    #[serde(default)]
    high_value_threshold_usd: Option<PriceFixed>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.cmd {
        Command::Keygen { out } => keygen(out),
        Command::Verify {
            envelope,
            expected_signer,
            salt_store,
            expiry_window_secs,
        } => verify(envelope, expected_signer, salt_store, expiry_window_secs),
        Command::Replay { input, runs } => replay(input, runs).await,
    }
}

fn keygen(out: PathBuf) -> Result<()> {
    let mut seed = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut seed);
    let key = SigningKey::from_bytes(&seed);

    fs::write(&out, format!("{}\n", hex::encode(seed)))
        .with_context(|| format!("writing seed to {}", out.display()))?;
    println!(
        "{}",
        json!({
            "seedPath": out.display().to_string(),
            "authority": authority_id(&key.verifying_key()),
        })
    );
    Ok(())
}

fn verify(
    envelope_path: PathBuf,
    expected_signer: String,
    salt_store: PathBuf,
    expiry_window_secs: u64,
) -> Result<()> {
    let payload = fs::read(&envelope_path)
        .with_context(|| format!("reading envelope {}", envelope_path.display()))?;
    let envelope: SignedVerdict =
        serde_json::from_slice(&payload).context("envelope is not a valid SignedVerdict")?;

    let registry = DurableSaltRegistry::open(&salt_store)
        .with_context(|| format!("opening salt store {}", salt_store.display()))?;
    let policy = VerifyPolicy {
        expiry_window_secs,
        ..VerifyPolicy::default()
    };
    let review =
        tradesentry_verifier::verify(&envelope, &expected_signer, &registry, &policy, &SystemClock);

    println!("{}", serde_json::to_string_pretty(&review)?);
    if !review.valid {
        bail!("envelope is invalid");
    }
    Ok(())
}

async fn replay(input_path: PathBuf, runs: u32) -> Result<()> {
    if runs < 2 {
        bail!("--runs must be at least 2");
    }
    let payload = fs::read(&input_path)
        .with_context(|| format!("reading replay input {}", input_path.display()))?;
    let input: ReplayInput =
        serde_json::from_slice(&payload).context("replay input is malformed")?;

    let cfg = PipelineConfig {
        high_value_threshold_usd: input
            .high_value_threshold_usd
            .unwrap_or(PriceFixed::whole(10_000)),
        classifier_timeout: Duration::from_millis(1),
    };
    let backends = std::sync::Arc::new(Vec::new());
    let (reference, result) = run_and_compare(
        &input.request,
        &input.snapshot,
        &backends,
        &cfg,
        runs,
        &SystemClock,
        &Telemetry::new(),
    )
    .await?;

    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "consensus": result,
            "decision": reference.run.message.decision,
            "riskScore": reference.run.message.risk_score,
            "logicFlags": reference.run.logic_flags,
            "aiFlags": reference.run.ai_flags,
            "reasoning": reference.reasoning,
        }))?
    );
    if !result.agreed {
        bail!("consensus mismatch across {} runs", result.runs);
    }
    Ok(())
}
