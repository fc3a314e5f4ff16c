//! Core domain types for three-phase load balancing
//!
//! A feeder serves a set of **loads** (billed customer connection points),
//! each attached to one of three phases (A/B/C) and carrying four months of
//! consumption history. The balancing engine mutates `current_phase`, the
//! intake snapshot lives in `original_phase`, and the terminal assignment is
//! frozen into `proposed_phase` so before/after state is always comparable.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Phase
// ============================================================================

/// One of the three distribution legs a load can be connected to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    A,
    B,
    C,
}

impl Phase {
    /// All phases in label order. Tie-breaks throughout the engine scan this
    /// order, so equal sums resolve to the lower label deterministically.
    pub const ALL: [Phase; 3] = [Phase::A, Phase::B, Phase::C];

    /// Stable index for per-phase arrays (A=0, B=1, C=2).
    pub fn index(self) -> usize {
        match self {
            Phase::A => 0,
            Phase::B => 1,
            Phase::C => 2,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::A => write!(f, "A"),
            Phase::B => write!(f, "B"),
            Phase::C => write!(f, "C"),
        }
    }
}

/// Error for unrecognised phase labels.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unrecognised phase label: {0:?}")]
pub struct ParsePhaseError(pub String);

impl FromStr for Phase {
    type Err = ParsePhaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "A" | "a" => Ok(Phase::A),
            "B" | "b" => Ok(Phase::B),
            "C" | "c" => Ok(Phase::C),
            other => Err(ParsePhaseError(other.to_string())),
        }
    }
}

// ============================================================================
// Load Record
// ============================================================================

/// One phase change applied to a load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseMove {
    pub from: Phase,
    pub to: Phase,
}

impl fmt::Display for PhaseMove {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.from, self.to)
    }
}

/// One row per physical load.
///
/// `original_phase` and the move trail are deliberately private: the snapshot
/// is immutable after intake and the trail is append-only via
/// [`LoadRecord::record_move`].
#[derive(Debug, Clone, Serialize)]
pub struct LoadRecord {
    /// Unique key within a dataset.
    pub name: String,
    pub customer: String,
    pub customer_code: String,
    pub meter_id: String,
    pub ledger_id: String,
    /// Four consecutive monthly consumption samples (kWh), oldest first.
    /// Non-numeric input is coerced to `None` at ingestion, never an error.
    pub monthly_kwh: [Option<f64>; 4],
    /// Phase the load sits on right now; mutated by the engine.
    pub current_phase: Phase,
    original_phase: Phase,
    /// Month-over-month drop exceeding the configured threshold.
    pub sudden_drop: bool,
    move_trail: Vec<PhaseMove>,
    proposed_phase: Option<Phase>,
}

impl LoadRecord {
    /// Create a record at intake. `current_phase` and `original_phase` both
    /// start at `phase`; the snapshot never changes afterwards.
    pub fn new(
        name: impl Into<String>,
        customer: impl Into<String>,
        customer_code: impl Into<String>,
        meter_id: impl Into<String>,
        ledger_id: impl Into<String>,
        monthly_kwh: [Option<f64>; 4],
        phase: Phase,
    ) -> Self {
        Self {
            name: name.into(),
            customer: customer.into(),
            customer_code: customer_code.into(),
            meter_id: meter_id.into(),
            ledger_id: ledger_id.into(),
            monthly_kwh,
            current_phase: phase,
            original_phase: phase,
            sudden_drop: false,
            move_trail: Vec::new(),
            proposed_phase: None,
        }
    }

    /// Latest monthly sample, missing treated as 0.
    pub fn latest_kwh(&self) -> f64 {
        self.monthly_kwh[3].unwrap_or(0.0)
    }

    /// Second-latest monthly sample, missing treated as 0.
    pub fn prior_kwh(&self) -> f64 {
        self.monthly_kwh[2].unwrap_or(0.0)
    }

    /// Phase the load was on at intake.
    pub fn original_phase(&self) -> Phase {
        self.original_phase
    }

    /// Number of phase changes applied so far in this run.
    pub fn move_count(&self) -> usize {
        self.move_trail.len()
    }

    /// Append-only move log.
    pub fn move_trail(&self) -> &[PhaseMove] {
        &self.move_trail
    }

    /// Comma-joined trail for tabular display, e.g. `"A -> C, C -> B"`.
    pub fn trail_display(&self) -> String {
        self.move_trail
            .iter()
            .map(PhaseMove::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Terminal assignment, set exactly once when the engine finishes.
    pub fn proposed_phase(&self) -> Option<Phase> {
        self.proposed_phase
    }

    /// Move this load to `to`, logging the transition.
    pub fn record_move(&mut self, to: Phase) {
        self.move_trail.push(PhaseMove {
            from: self.current_phase,
            to,
        });
        self.current_phase = to;
    }

    /// Freeze `current_phase` into `proposed_phase`.
    pub(crate) fn finalize_proposal(&mut self) {
        self.proposed_phase = Some(self.current_phase);
    }
}

// ============================================================================
// Dataset
// ============================================================================

/// Which phase column a per-phase aggregation groups by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseGrouping {
    /// `current_phase` — live state during a run.
    Current,
    /// `original_phase` — intake snapshot ("before").
    Original,
    /// `proposed_phase`, falling back to `current_phase` when the engine has
    /// not finished ("after").
    Proposed,
}

/// Latest-month consumption summed per phase.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhaseSums {
    sums: [f64; 3],
}

impl PhaseSums {
    pub fn new(sums: [f64; 3]) -> Self {
        Self { sums }
    }

    pub fn get(&self, phase: Phase) -> f64 {
        self.sums[phase.index()]
    }

    pub fn as_array(&self) -> [f64; 3] {
        self.sums
    }

    pub fn total(&self) -> f64 {
        self.sums.iter().sum()
    }

    /// Phase with the maximum sum; ties resolve to the lower label.
    pub fn highest(&self) -> Phase {
        let mut best = Phase::A;
        for phase in Phase::ALL {
            if self.get(phase) > self.get(best) {
                best = phase;
            }
        }
        best
    }

    /// Phase with the minimum sum; ties resolve to the lower label.
    pub fn lowest(&self) -> Phase {
        let mut best = Phase::A;
        for phase in Phase::ALL {
            if self.get(phase) < self.get(best) {
                best = phase;
            }
        }
        best
    }

    /// `max - min` across the three phases.
    pub fn spread(&self) -> f64 {
        self.get(self.highest()) - self.get(self.lowest())
    }
}

/// A load that ended the run on a different phase than it started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovedLoad {
    pub name: String,
    pub from: Phase,
    pub to: Phase,
}

impl fmt::Display for MovedLoad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} -> {}", self.name, self.from, self.to)
    }
}

/// Owns all load records for one feeder. Names are unique; callers insert
/// through [`LoadDataset::insert`] which rejects duplicates.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadDataset {
    loads: Vec<LoadRecord>,
}

impl LoadDataset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.loads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loads.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.loads.iter().any(|l| l.name == name)
    }

    /// Insert a record; returns `false` (record dropped) on a duplicate name.
    pub fn insert(&mut self, record: LoadRecord) -> bool {
        if self.contains(&record.name) {
            return false;
        }
        self.loads.push(record);
        true
    }

    pub fn get(&self, name: &str) -> Option<&LoadRecord> {
        self.loads.iter().find(|l| l.name == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut LoadRecord> {
        self.loads.iter_mut().find(|l| l.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &LoadRecord> {
        self.loads.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut LoadRecord> {
        self.loads.iter_mut()
    }

    /// Sum the latest-month consumption per phase under `grouping`.
    /// Missing samples count as 0.
    pub fn phase_sums(&self, grouping: PhaseGrouping) -> PhaseSums {
        let mut sums = [0.0f64; 3];
        for load in &self.loads {
            let phase = match grouping {
                PhaseGrouping::Current => load.current_phase,
                PhaseGrouping::Original => load.original_phase,
                PhaseGrouping::Proposed => load.proposed_phase.unwrap_or(load.current_phase),
            };
            sums[phase.index()] += load.latest_kwh();
        }
        PhaseSums::new(sums)
    }

    /// Loads whose terminal phase differs from their intake phase.
    pub fn moved_loads(&self) -> Vec<MovedLoad> {
        self.loads
            .iter()
            .filter_map(|l| {
                let to = l.proposed_phase.unwrap_or(l.current_phase);
                (to != l.original_phase).then(|| MovedLoad {
                    name: l.name.clone(),
                    from: l.original_phase,
                    to,
                })
            })
            .collect()
    }

    /// Freeze every load's `current_phase` into `proposed_phase`.
    pub(crate) fn finalize_proposals(&mut self) {
        for load in &mut self.loads {
            load.finalize_proposal();
        }
    }
}

// ============================================================================
// Engine Outcome & Traces
// ============================================================================

/// Terminal state of one balancing run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminalState {
    /// Phase spread fell within the convergence threshold.
    Converged,
    /// Iteration budget exhausted before convergence.
    MaxIterationsReached,
    /// Run cancelled via the job handle.
    Cancelled,
}

impl fmt::Display for TerminalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminalState::Converged => write!(f, "converged"),
            TerminalState::MaxIterationsReached => write!(f, "max iterations reached"),
            TerminalState::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// What one engine iteration did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IterationOutcome {
    /// A candidate was accepted and moved.
    Moved { name: String, from: Phase, to: Phase },
    /// The oracle declined (or failed, or no load was eligible); no mutation.
    NoCandidate,
    /// The oracle named a load outside the candidate list; no mutation.
    InvalidCandidate { name: String },
}

/// Structured record of one engine iteration, returned with the final result
/// for observability instead of interleaved free-text output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationTrace {
    /// 1-based iteration number.
    pub iteration: u32,
    pub phase_sums: [f64; 3],
    pub highest: Phase,
    pub lowest: Phase,
    pub spread: f64,
    /// `(max - min) / 2` for this iteration.
    pub target_kwh: f64,
    pub candidate_count: usize,
    pub outcome: IterationOutcome,
}

/// Raw result of one engine run, before metrics are attached.
#[derive(Debug, Clone, Serialize)]
pub struct BalanceOutcome {
    pub dataset: LoadDataset,
    pub terminal: TerminalState,
    /// Number of loop passes executed.
    pub iterations: u32,
    pub moved: Vec<MovedLoad>,
    pub traces: Vec<IterationTrace>,
}

// ============================================================================
// Metrics
// ============================================================================

/// Derived, read-only per-phase electrical snapshot. Computed once after the
/// engine terminates, never mutated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Aggregate latest-month consumption per phase (kWh).
    pub phase_kwh: [f64; 3],
    /// Estimated current per phase (A).
    pub phase_current_a: [f64; 3],
    /// Maximum pairwise absolute current difference (A).
    pub max_current_diff_a: f64,
    /// Arithmetic mean of the three phase currents (A).
    pub mean_current_a: f64,
    /// Phase Unbalance Index (%): `max_diff / mean * 100`, 0 when mean is 0.
    pub unbalance_index_percent: f64,
}

/// Before/after metrics pair for one balancing run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricsComparison {
    /// Grouped by `original_phase`.
    pub before: MetricsSnapshot,
    /// Grouped by `proposed_phase`.
    pub after: MetricsSnapshot,
}

/// Complete result handed back to the caller: balanced dataset, terminal
/// state, per-iteration traces, and the before/after metrics.
#[derive(Debug, Clone, Serialize)]
pub struct BalanceReport {
    pub dataset: LoadDataset,
    pub terminal: TerminalState,
    pub iterations: u32,
    pub moved: Vec<MovedLoad>,
    pub traces: Vec<IterationTrace>,
    pub metrics: MetricsComparison,
    /// Free-text run explanation from the oracle, when available.
    pub explanation: Option<String>,
}
