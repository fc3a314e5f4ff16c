//! Phase Balancer: LLM-assisted three-phase load balancing
//!
//! Assigns the loads on a distribution feeder to phases A/B/C so per-phase
//! consumption is balanced, using an iterative greedy search arbitrated by an
//! external decision oracle (a language model consulted for tie-breaking
//! among near-equal candidate moves).
//!
//! ## Architecture
//!
//! - **Load Dataset**: in-memory table of loads with monthly history and
//!   phase assignment
//! - **Anomaly Detector**: flags sudden month-over-month consumption drops
//! - **Decision Oracle**: capability trait + HTTP client for the remote
//!   reasoning service, with defensive reply parsing
//! - **Balancing Engine**: the iterative reassignment loop
//! - **Metrics Calculator**: per-phase current estimates and the Phase
//!   Unbalance Index, before and after balancing
//! - **Background Wrapper**: per-request worker with oneshot result delivery
//!   and cancellation

pub mod background;
pub mod config;
pub mod detector;
pub mod engine;
pub mod ingest;
pub mod metrics;
pub mod oracle;
pub mod types;

// Re-export configuration
pub use config::BalanceConfig;

// Re-export commonly used types
pub use types::{
    BalanceOutcome, BalanceReport, IterationOutcome, IterationTrace, LoadDataset, LoadRecord,
    MetricsComparison, MetricsSnapshot, MovedLoad, Phase, PhaseGrouping, PhaseSums, TerminalState,
};

// Re-export the oracle seam
pub use oracle::{CandidateLoad, DecisionOracle, HttpOracle, OracleDecision};

// Re-export the engine and background wrapper
pub use background::{BalanceJobHandle, JobError};
pub use engine::BalancingEngine;
