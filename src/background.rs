//! Background execution — one balancing run per spawned worker
//!
//! The caller stays responsive while the engine runs: each request spawns a
//! dedicated task that owns a private copy of the dataset, runs the detector,
//! the engine, and the metrics calculator in sequence, and delivers the
//! complete report exactly once over a oneshot channel. Workers are not
//! reused and no two runs share mutable dataset state.
//!
//! The handle exposes a cancellation token checked at the top of each engine
//! iteration; cancelling still yields a coherent report for the work done so
//! far.

use crate::config::BalanceConfig;
use crate::detector;
use crate::engine::BalancingEngine;
use crate::metrics;
use crate::oracle::DecisionOracle;
use crate::types::{BalanceReport, LoadDataset};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Errors surfaced by [`BalanceJobHandle::wait`].
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("balancing worker terminated without delivering a result")]
    WorkerLost,
}

/// Handle to one in-flight balancing run.
pub struct BalanceJobHandle {
    cancel: CancellationToken,
    result_rx: oneshot::Receiver<BalanceReport>,
}

impl BalanceJobHandle {
    /// Request cancellation; the engine honours it at its next iteration
    /// boundary.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Await the completion report. Delivered exactly once; no partial or
    /// streaming results are emitted mid-run.
    pub async fn wait(self) -> Result<BalanceReport, JobError> {
        self.result_rx.await.map_err(|_| JobError::WorkerLost)
    }
}

/// Spawn one balancing run on a background task.
///
/// The worker takes ownership of `dataset`, annotates sudden drops, runs the
/// engine to a terminal state, derives the before/after metrics, and asks
/// the oracle for a run explanation when any load moved.
pub fn spawn(
    mut dataset: LoadDataset,
    conditions: String,
    config: BalanceConfig,
    oracle: Arc<dyn DecisionOracle>,
) -> BalanceJobHandle {
    let cancel = CancellationToken::new();
    let (result_tx, result_rx) = oneshot::channel();

    let worker_cancel = cancel.clone();
    tokio::spawn(async move {
        detector::flag_sudden_drops(&mut dataset, config.sudden_drop_kwh);

        let engine =
            BalancingEngine::new(config.clone(), Arc::clone(&oracle)).with_cancellation(worker_cancel);
        let outcome = engine.run(dataset, &conditions).await;

        let explanation = if outcome.moved.is_empty() {
            None
        } else {
            oracle.explain_moves(&outcome.moved).await
        };

        let report = BalanceReport {
            metrics: metrics::compare(&outcome.dataset, &config),
            dataset: outcome.dataset,
            terminal: outcome.terminal,
            iterations: outcome.iterations,
            moved: outcome.moved,
            traces: outcome.traces,
            explanation,
        };

        if result_tx.send(report).is_err() {
            warn!("Balancing result discarded — caller dropped the job handle");
        }
    });

    BalanceJobHandle { cancel, result_rx }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::{CandidateLoad, OracleDecision};
    use crate::types::{LoadRecord, Phase, TerminalState};
    use async_trait::async_trait;

    fn load(name: &str, prior: f64, latest: f64, phase: Phase) -> LoadRecord {
        LoadRecord::new(
            name,
            "",
            "",
            "",
            "",
            [None, None, Some(prior), Some(latest)],
            phase,
        )
    }

    /// Always moves the top-ranked candidate.
    struct FirstCandidateOracle;

    #[async_trait]
    impl DecisionOracle for FirstCandidateOracle {
        async fn choose_candidate(
            &self,
            candidates: &[CandidateLoad],
            _highest: Phase,
            _lowest: Phase,
            _conditions: &str,
        ) -> OracleDecision {
            candidates
                .first()
                .map(|c| OracleDecision::Selected(c.name.clone()))
                .unwrap_or(OracleDecision::NoCandidate)
        }
    }

    /// Signals when consulted, then blocks until released. Lets a test park
    /// the engine mid-iteration at a known point.
    struct BlockingOracle {
        started: CancellationToken,
        release: CancellationToken,
    }

    #[async_trait]
    impl DecisionOracle for BlockingOracle {
        async fn choose_candidate(
            &self,
            _candidates: &[CandidateLoad],
            _highest: Phase,
            _lowest: Phase,
            _conditions: &str,
        ) -> OracleDecision {
            self.started.cancel();
            self.release.cancelled().await;
            OracleDecision::NoCandidate
        }
    }

    #[tokio::test]
    async fn job_delivers_a_complete_report() {
        let mut ds = LoadDataset::new();
        ds.insert(load("Load_1", 1000.0, 1000.0, Phase::A));
        ds.insert(load("Load_2", 400.0, 400.0, Phase::A));
        ds.insert(load("Load_3", 300.0, 300.0, Phase::B));

        let handle = spawn(
            ds,
            String::new(),
            BalanceConfig::default(),
            Arc::new(FirstCandidateOracle),
        );
        let report = handle.wait().await.unwrap();

        assert_eq!(report.terminal, TerminalState::Converged);
        assert!(!report.moved.is_empty());
        assert_eq!(report.traces.len() as u32, report.iterations);
        // Detector ran before the engine: flags are concrete, not stale.
        assert!(report.dataset.iter().all(|l| !l.sudden_drop));
        // Energy is conserved between the two snapshots.
        let before: f64 = report.metrics.before.phase_kwh.iter().sum();
        let after: f64 = report.metrics.after.phase_kwh.iter().sum();
        assert!((before - after).abs() < 1e-9);
    }

    #[tokio::test]
    async fn cancellation_mid_run_still_delivers_a_coherent_report() {
        let mut ds = LoadDataset::new();
        ds.insert(load("Load_1", 2000.0, 2000.0, Phase::A));
        ds.insert(load("Load_2", 100.0, 100.0, Phase::C));

        let started = CancellationToken::new();
        let release = CancellationToken::new();
        let handle = spawn(
            ds,
            String::new(),
            BalanceConfig::default(),
            Arc::new(BlockingOracle {
                started: started.clone(),
                release: release.clone(),
            }),
        );

        // Wait until the engine is parked inside the first consult, cancel
        // the job, then let the consult return. The next iteration boundary
        // must observe the cancellation.
        started.cancelled().await;
        handle.cancel();
        release.cancel();

        let report = handle.wait().await.unwrap();
        assert_eq!(report.terminal, TerminalState::Cancelled);
        assert!(report
            .dataset
            .iter()
            .all(|l| l.proposed_phase().is_some()));
    }
}
