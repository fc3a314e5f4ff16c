//! phase-balancer - LLM-assisted three-phase load balancing
//!
//! Reads a feeder load table from CSV, balances it with the iterative
//! oracle-assisted engine, and prints the proposed moves together with the
//! before/after current estimates and Phase Unbalance Index.
//!
//! # Usage
//!
//! ```bash
//! # Balance a feeder with the default policy text
//! phase-balancer --loads feeder.csv
//!
//! # Supply operator policy text and export the balanced table
//! phase-balancer --loads feeder.csv --conditions policy.txt --output balanced.csv
//! ```
//!
//! # Environment Variables
//!
//! - `ORACLE_API_KEY`: bearer token for the oracle endpoint
//! - `BALANCER_CONFIG`: path to a TOML config file (default: ./balancer.toml)
//! - `RUST_LOG`: logging level (default: info)

use anyhow::{Context, Result};
use clap::Parser;
use phase_balancer::config::BalanceConfig;
use phase_balancer::oracle::{HttpOracle, DEFAULT_CONDITIONS};
use phase_balancer::{background, ingest};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "phase-balancer")]
#[command(about = "LLM-assisted three-phase load balancing")]
#[command(version)]
struct CliArgs {
    /// Load table CSV (name, customer, customer_code, meter_id, ledger_id,
    /// month_1..month_4, phase)
    #[arg(long, value_name = "FILE")]
    loads: PathBuf,

    /// Free-text balancing conditions file; built-in policy text when omitted
    #[arg(long, value_name = "FILE")]
    conditions: Option<PathBuf>,

    /// Config TOML path (overrides BALANCER_CONFIG and ./balancer.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Write the balanced table (with move trail and proposal columns) here
    #[arg(long, value_name = "FILE")]
    output: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = CliArgs::parse();

    let config = match &args.config {
        Some(path) => BalanceConfig::load_from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => BalanceConfig::load(),
    };

    let conditions = match &args.conditions {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read conditions from {}", path.display()))?,
        None => {
            info!("No conditions file supplied — using the built-in policy text");
            DEFAULT_CONDITIONS.to_string()
        }
    };

    let summary = ingest::read_path(&args.loads)
        .with_context(|| format!("failed to ingest load table {}", args.loads.display()))?;
    if summary.dataset.is_empty() {
        warn!("Load table contains no usable rows — nothing to balance");
        return Ok(());
    }
    info!(
        loads = summary.dataset.len(),
        skipped = summary.rows_skipped,
        "Starting balancing run"
    );

    let oracle = Arc::new(HttpOracle::from_env(config.oracle.clone()));
    let handle = background::spawn(summary.dataset, conditions, config.clone(), oracle);
    let report = handle.wait().await.context("balancing worker failed")?;

    for trace in &report.traces {
        debug!(
            iteration = trace.iteration,
            sums = ?trace.phase_sums,
            spread = trace.spread,
            outcome = ?trace.outcome,
            "Iteration trace"
        );
    }

    // ------------------------------------------------------------------
    // Operator report
    // ------------------------------------------------------------------
    println!("Run finished: {} after {} iterations", report.terminal, report.iterations);
    println!();

    if report.moved.is_empty() {
        println!("No loads need to move.");
    } else {
        println!("Proposed moves:");
        for m in &report.moved {
            let trail = report
                .dataset
                .get(&m.name)
                .map(|l| l.trail_display())
                .unwrap_or_default();
            println!("  {m}  (trail: {trail})");
        }
    }
    println!();

    let (before, after) = (&report.metrics.before, &report.metrics.after);
    for (phase, idx) in [("A", 0), ("B", 1), ("C", 2)] {
        println!(
            "Phase {} current: {:.3} A -> {:.3} A",
            phase, before.phase_current_a[idx], after.phase_current_a[idx]
        );
    }
    println!(
        "Max current difference: {:.3} A -> {:.3} A",
        before.max_current_diff_a, after.max_current_diff_a
    );
    println!(
        "Phase Unbalance Index: {:.3}% -> {:.3}%",
        before.unbalance_index_percent, after.unbalance_index_percent
    );

    if let Some(explanation) = &report.explanation {
        println!();
        println!("Oracle explanation:");
        println!("{explanation}");
    }

    if let Some(output) = &args.output {
        ingest::write_path(&report.dataset, output)
            .with_context(|| format!("failed to export balanced table to {}", output.display()))?;
        println!();
        println!("Balanced table written to {}", output.display());
    }

    Ok(())
}
