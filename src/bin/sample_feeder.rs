//! Sample Feeder Generator
//!
//! Generates a realistic synthetic load table for testing phase-balancer.
//! Simulates a residential/light-commercial feeder with:
//! - Log-normal consumption spread across small and large customers
//! - Deliberately skewed initial phase assignment (most loads on one phase)
//! - Month-to-month jitter, plus a configurable share of sudden-drop loads
//!
//! # Usage
//! ```bash
//! ./sample-feeder --loads 40 --skew-phase A > feeder.csv
//! ./phase-balancer --loads feeder.csv
//! ```

use clap::Parser;
use rand::prelude::*;
use rand_distr::{Distribution, LogNormal, Normal};
use std::io::{self, Write};
use std::str::FromStr;

use phase_balancer::types::Phase;

// ============================================================================
// Feeder Constants
// ============================================================================

/// Median monthly consumption (kWh) of a generated load
const MEDIAN_KWH: f64 = 350.0;
/// Log-normal shape parameter for the consumption spread
const KWH_SIGMA: f64 = 0.6;
/// Relative month-to-month jitter
const MONTHLY_JITTER: f64 = 0.08;
/// Fraction of latest-month consumption retained after a sudden drop
const DROP_RETENTION: f64 = 0.25;

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "sample-feeder")]
#[command(about = "Synthetic feeder load table for phase-balancer testing")]
#[command(version)]
struct Args {
    /// Number of loads to generate (3-10000)
    #[arg(short, long, default_value = "30", value_parser = clap::value_parser!(u32).range(3..=10_000))]
    loads: u32,

    /// Phase that receives the bulk of the loads (A, B, or C)
    #[arg(long, default_value = "A")]
    skew_phase: String,

    /// Fraction of loads placed on the skewed phase
    #[arg(long, default_value = "0.6")]
    skew_ratio: f64,

    /// Fraction of loads given a sudden consumption drop in the latest month
    #[arg(long, default_value = "0.1")]
    drop_ratio: f64,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,
}

fn main() -> io::Result<()> {
    let args = Args::parse();

    let skew_phase = match Phase::from_str(&args.skew_phase) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(2);
        }
    };
    let skew_ratio = args.skew_ratio.clamp(0.0, 1.0);
    let drop_ratio = args.drop_ratio.clamp(0.0, 1.0);

    let mut rng: StdRng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    // Both distributions have fixed, valid parameters.
    let kwh_dist = LogNormal::new(MEDIAN_KWH.ln(), KWH_SIGMA)
        .unwrap_or_else(|_| unreachable!("log-normal parameters are constants"));
    let jitter_dist = Normal::new(1.0, MONTHLY_JITTER)
        .unwrap_or_else(|_| unreachable!("normal parameters are constants"));

    let stdout = io::stdout();
    let mut out = stdout.lock();
    writeln!(
        out,
        "name,customer,customer_code,meter_id,ledger_id,month_1,month_2,month_3,month_4,phase"
    )?;

    let off_phases: Vec<Phase> = Phase::ALL
        .into_iter()
        .filter(|p| *p != skew_phase)
        .collect();

    for i in 1..=args.loads {
        let phase = if rng.gen_bool(skew_ratio) {
            skew_phase
        } else {
            off_phases[rng.gen_range(0..off_phases.len())]
        };

        let base = kwh_dist.sample(&mut rng);
        let mut months: [f64; 4] = std::array::from_fn(|_| {
            (base * jitter_dist.sample(&mut rng).max(0.1)).max(0.0)
        });
        if rng.gen_bool(drop_ratio) {
            months[3] *= DROP_RETENTION;
        }

        writeln!(
            out,
            "Load_{i},Customer {i},KH{i:05},MTR{i:06},LED{i:04},{:.1},{:.1},{:.1},{:.1},{phase}",
            months[0], months[1], months[2], months[3]
        )?;
    }

    Ok(())
}
