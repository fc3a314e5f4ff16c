//! Balancing Engine — iterative greedy phase reassignment
//!
//! Each iteration: sum the latest-month consumption per phase, pick the
//! highest and lowest phase (label order breaks ties), stop when the spread
//! is within the convergence threshold, otherwise rank the movable loads on
//! the highest phase by closeness to `(max - min) / 2` and let the decision
//! oracle pick one to move to the lowest phase. The oracle is consulted once
//! per iteration, not once per candidate.
//!
//! Every anomaly — oracle refusal, transport failure, an identifier outside
//! the candidate list — degrades to "no move this iteration"; the iteration
//! counter still advances, so the run always reaches a terminal state within
//! `max_iterations` passes.

use crate::config::BalanceConfig;
use crate::oracle::{CandidateLoad, DecisionOracle, OracleDecision};
use crate::types::{
    BalanceOutcome, IterationOutcome, IterationTrace, LoadDataset, Phase, PhaseGrouping,
    TerminalState,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// The iterative balancing state machine.
///
/// Owns no dataset state between runs; per-run session state (iteration
/// count, phase sums) lives on the stack of [`BalancingEngine::run`] and is
/// discarded on completion.
pub struct BalancingEngine {
    config: BalanceConfig,
    oracle: Arc<dyn DecisionOracle>,
    cancel: CancellationToken,
}

impl BalancingEngine {
    pub fn new(config: BalanceConfig, oracle: Arc<dyn DecisionOracle>) -> Self {
        Self {
            config,
            oracle,
            cancel: CancellationToken::new(),
        }
    }

    /// Attach a cancellation token, checked at the top of each iteration.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run the engine to a terminal state on an owned dataset copy.
    ///
    /// Returns the mutated dataset with every `proposed_phase` set, the list
    /// of loads that changed phase, and one trace record per iteration.
    pub async fn run(&self, mut dataset: LoadDataset, conditions: &str) -> BalanceOutcome {
        let mut traces: Vec<IterationTrace> = Vec::new();
        let mut iterations = 0u32;
        let mut terminal = TerminalState::MaxIterationsReached;

        while iterations < self.config.max_iterations {
            if self.cancel.is_cancelled() {
                info!(iterations, "Balancing run cancelled");
                terminal = TerminalState::Cancelled;
                break;
            }

            let sums = dataset.phase_sums(PhaseGrouping::Current);
            let highest = sums.highest();
            let lowest = sums.lowest();
            let spread = sums.spread();

            debug!(
                iteration = iterations + 1,
                sums = ?sums.as_array(),
                spread,
                "Iteration start"
            );

            if spread <= self.config.convergence_kwh {
                info!(iterations, spread, "Phases balanced — converged");
                terminal = TerminalState::Converged;
                break;
            }

            let target_kwh = spread / 2.0;
            let candidates = self.rank_candidates(&dataset, highest, target_kwh);

            // An empty candidate list has only one possible answer, so the
            // oracle is not consulted for it.
            let decision = if candidates.is_empty() {
                debug!(%highest, "No load on the highest phase is eligible to move");
                OracleDecision::NoCandidate
            } else {
                self.oracle
                    .choose_candidate(&candidates, highest, lowest, conditions)
                    .await
            };

            let outcome = match decision {
                OracleDecision::Selected(name)
                    if candidates.iter().any(|c| c.name == name) =>
                {
                    if let Some(load) = dataset.get_mut(&name) {
                        load.record_move(lowest);
                        info!(
                            load = %name,
                            from = %highest,
                            to = %lowest,
                            moves = load.move_count(),
                            "Oracle chose load to move"
                        );
                    }
                    IterationOutcome::Moved {
                        name,
                        from: highest,
                        to: lowest,
                    }
                }
                OracleDecision::Selected(name) => {
                    warn!(load = %name, "Oracle proposed a load outside the candidate list — ignoring");
                    IterationOutcome::InvalidCandidate { name }
                }
                OracleDecision::NoCandidate => {
                    debug!("Oracle found no suitable load this iteration");
                    IterationOutcome::NoCandidate
                }
            };

            traces.push(IterationTrace {
                iteration: iterations + 1,
                phase_sums: sums.as_array(),
                highest,
                lowest,
                spread,
                target_kwh,
                candidate_count: candidates.len(),
                outcome,
            });

            iterations += 1;
        }

        if terminal == TerminalState::MaxIterationsReached {
            info!(iterations, "Maximum iterations reached");
        }

        dataset.finalize_proposals();
        let moved = dataset.moved_loads();
        info!(
            terminal = %terminal,
            iterations,
            moved = moved.len(),
            "Balancing run complete"
        );

        BalanceOutcome {
            dataset,
            terminal,
            iterations,
            moved,
            traces,
        }
    }

    /// Candidate set: loads on the highest phase that have not exhausted
    /// their move budget, ranked best-first by the three-key stable sort —
    /// distance to target ascending, latest consumption ascending, loads
    /// without a sudden drop ahead of otherwise-equal dropped loads.
    fn rank_candidates(
        &self,
        dataset: &LoadDataset,
        highest: Phase,
        target_kwh: f64,
    ) -> Vec<CandidateLoad> {
        let mut candidates: Vec<CandidateLoad> = dataset
            .iter()
            .filter(|l| {
                l.current_phase == highest
                    && (l.move_count() as u32) < self.config.max_moves_per_load
            })
            .map(|l| CandidateLoad {
                name: l.name.clone(),
                latest_kwh: l.latest_kwh(),
                distance_kwh: (l.latest_kwh() - target_kwh).abs(),
                sudden_drop: l.sudden_drop,
            })
            .collect();

        // Stable sort: fully equal keys keep dataset order.
        candidates.sort_by(|a, b| {
            a.distance_kwh
                .total_cmp(&b.distance_kwh)
                .then(a.latest_kwh.total_cmp(&b.latest_kwh))
                .then(a.sudden_drop.cmp(&b.sudden_drop))
        });

        candidates
    }
}
