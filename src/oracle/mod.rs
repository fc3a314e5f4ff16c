//! Decision Oracle — external arbiter for near-tied candidate moves
//!
//! The engine narrows each iteration down to a short, ranked candidate list;
//! the oracle arbitrates among near-ties and policy exceptions that are hard
//! to encode as pure rules ("not among the three largest loads", "avoid
//! meters that just dropped"). One consult per iteration bounds external-call
//! cost at `O(max_iterations)`.
//!
//! The oracle is a capability trait with a single choice operation so tests
//! substitute deterministic stubs for the remote service.

use crate::types::{MovedLoad, Phase};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

mod http;
pub use http::HttpOracle;

/// Default balancing policy used when the caller supplies no conditions text.
/// Mirrors the operator policy the tool shipped with.
pub const DEFAULT_CONDITIONS: &str = "\
Problem: the phases are unbalanced.
Goal: balance load across the phases to keep the feeder stable.
Priorities:
1. Closest to the target value.
2. Not among the top 3 largest loads.
3. No sudden consumption drop in the latest month.";

/// One ranked candidate presented to the oracle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateLoad {
    pub name: String,
    /// Latest monthly consumption (kWh).
    pub latest_kwh: f64,
    /// Distance to the iteration's target value (kWh).
    pub distance_kwh: f64,
    pub sudden_drop: bool,
}

/// The oracle's verdict for one iteration.
///
/// `Selected` carries whatever identifier was extracted; the engine decides
/// whether it names a real candidate or is invalid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OracleDecision {
    Selected(String),
    NoCandidate,
}

/// Capability interface for the external decision service.
///
/// Implementations must be total: transport failures, timeouts, and
/// malformed replies degrade to [`OracleDecision::NoCandidate`] rather than
/// surfacing an error, so a flaky service costs single iterations and never
/// the whole run.
#[async_trait]
pub trait DecisionOracle: Send + Sync {
    /// Pick the best load to move from `highest` to `lowest`, honouring the
    /// free-text `conditions`. `candidates` arrive ranked best-first.
    async fn choose_candidate(
        &self,
        candidates: &[CandidateLoad],
        highest: Phase,
        lowest: Phase,
        conditions: &str,
    ) -> OracleDecision;

    /// Optional post-run explanation of the applied moves.
    async fn explain_moves(&self, _moved: &[MovedLoad]) -> Option<String> {
        None
    }
}

// ============================================================================
// Prompt Construction
// ============================================================================

/// Build the natural-language ranking request for one iteration.
pub fn build_choice_prompt(
    candidates: &[CandidateLoad],
    highest: Phase,
    lowest: Phase,
    conditions: &str,
) -> String {
    let mut loads_info = String::new();
    for c in candidates {
        loads_info.push_str(&format!(
            "  - {}: latest consumption = {:.0} kWh, sudden drop = {}\n",
            c.name,
            c.latest_kwh,
            if c.sudden_drop { "yes" } else { "no" }
        ));
    }

    format!(
        "You are an expert in balancing electrical grid load.\n\
         Help me choose the best load to move from the highest phase ({highest}) \
         to the lowest phase ({lowest}) to optimise the balance, considering \
         these conditions:\n\n\
         {conditions}\n\n\
         Candidate loads (listed in priority order):\n\
         {loads_info}\n\
         Choose the **name** of the best load to move, making sure it meets \
         all the conditions. If no suitable load exists, reply with 'None'."
    )
}

/// Build the post-run explanation request.
pub fn build_explanation_prompt(moved: &[MovedLoad]) -> String {
    let mut changes = String::new();
    for m in moved {
        changes.push_str(&format!("  - {}: from {} to {}\n", m.name, m.from, m.to));
    }

    format!(
        "You are an expert in balancing electrical grid load. You were \
         previously asked to balance a three-phase system. Based on the \
         changes you proposed (listed below), explain what you did to \
         balance the system and why you made those specific choices.\n\n\
         Changes applied:\n\
         {changes}\n\
         Explanation:"
    )
}

// ============================================================================
// Reply Parsing
// ============================================================================

/// Position of the first whole-word occurrence of `name` in `reply`.
///
/// Both ends of the match must sit on an identifier boundary (neighbouring
/// char not alphanumeric or `_`), so "Load_1" does not match inside
/// "Load_12".
fn find_name_mention(reply: &str, name: &str) -> Option<usize> {
    let mut start = 0;
    while let Some(rel) = reply[start..].find(name) {
        let pos = start + rel;
        let end = pos + name.len();
        let boundary = |c: char| !c.is_alphanumeric() && c != '_';
        if reply[..pos].chars().next_back().map_or(true, boundary)
            && reply[end..].chars().next().map_or(true, boundary)
        {
            return Some(pos);
        }
        start = pos + name.chars().next().map_or(1, char::len_utf8);
    }
    None
}

/// Extract a decision from a free-form oracle reply.
///
/// Resolution order:
/// 1. earliest whole-word occurrence of a known candidate name in the reply;
/// 2. first token matching `identifier_pattern` (may name a load outside the
///    candidate list — the engine records that as an invalid candidate);
/// 3. otherwise `NoCandidate`.
///
/// Replies like "None", "Không có", or arbitrary prose with no identifier all
/// fall through to `NoCandidate`; this function never fails.
pub fn parse_decision(
    reply: &str,
    candidates: &[CandidateLoad],
    identifier_pattern: Option<&Regex>,
) -> OracleDecision {
    let reply = reply.trim();
    if reply.is_empty() {
        return OracleDecision::NoCandidate;
    }

    // Earliest candidate mention wins; ranked order breaks position ties.
    let mut best: Option<(usize, &str)> = None;
    for c in candidates {
        if let Some(pos) = find_name_mention(reply, &c.name) {
            if best.map_or(true, |(p, _)| pos < p) {
                best = Some((pos, c.name.as_str()));
            }
        }
    }
    if let Some((_, name)) = best {
        return OracleDecision::Selected(name.to_string());
    }

    if let Some(pattern) = identifier_pattern {
        if let Some(m) = pattern.find(reply) {
            return OracleDecision::Selected(m.as_str().to_string());
        }
    }

    OracleDecision::NoCandidate
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(name: &str) -> CandidateLoad {
        CandidateLoad {
            name: name.to_string(),
            latest_kwh: 350.0,
            distance_kwh: 0.0,
            sudden_drop: false,
        }
    }

    fn pattern() -> Regex {
        Regex::new(r"Load_\d+").unwrap()
    }

    #[test]
    fn prompt_embeds_candidates_and_conditions() {
        let cands = vec![candidate("Load_7"), candidate("Load_2")];
        let prompt = build_choice_prompt(&cands, Phase::B, Phase::C, DEFAULT_CONDITIONS);
        assert!(prompt.contains("highest phase (B)"));
        assert!(prompt.contains("lowest phase (C)"));
        assert!(prompt.contains("Load_7: latest consumption = 350 kWh"));
        assert!(prompt.contains("top 3 largest"));
    }

    #[test]
    fn candidate_name_is_extracted_from_prose() {
        let cands = vec![candidate("Load_3"), candidate("Load_12")];
        let reply = "I would move Load_12 because it is closest to the target.";
        assert_eq!(
            parse_decision(reply, &cands, Some(&pattern())),
            OracleDecision::Selected("Load_12".to_string())
        );
    }

    #[test]
    fn earliest_mention_wins() {
        let cands = vec![candidate("Load_3"), candidate("Load_12")];
        let reply = "Load_3 fits best; Load_12 is a close second.";
        assert_eq!(
            parse_decision(reply, &cands, Some(&pattern())),
            OracleDecision::Selected("Load_3".to_string())
        );
    }

    #[test]
    fn candidate_name_prefix_does_not_shadow_a_longer_name() {
        // "Load_1" is a prefix of "Load_12"; a reply naming Load_12 must not
        // resolve to Load_1 just because it scans earlier in the list.
        let cands = vec![candidate("Load_1"), candidate("Load_12")];
        let reply = "I recommend moving Load_12, it best fits the conditions.";
        assert_eq!(
            parse_decision(reply, &cands, Some(&pattern())),
            OracleDecision::Selected("Load_12".to_string())
        );
    }

    #[test]
    fn exact_short_name_still_matches_next_to_punctuation() {
        let cands = vec![candidate("Load_1"), candidate("Load_12")];
        assert_eq!(
            parse_decision("Move Load_1.", &cands, Some(&pattern())),
            OracleDecision::Selected("Load_1".to_string())
        );
    }

    #[test]
    fn pattern_token_outside_candidate_list_is_still_selected() {
        // The engine, not the parser, classifies this as invalid.
        let cands = vec![candidate("Load_3")];
        let reply = "Move Load_99.";
        assert_eq!(
            parse_decision(reply, &cands, Some(&pattern())),
            OracleDecision::Selected("Load_99".to_string())
        );
    }

    #[test]
    fn refusals_and_noise_degrade_to_no_candidate() {
        let cands = vec![candidate("Load_3")];
        for reply in ["None", "Không có", "no suitable load here", "", "   "] {
            assert_eq!(
                parse_decision(reply, &cands, Some(&pattern())),
                OracleDecision::NoCandidate,
                "reply {reply:?} should degrade to NoCandidate"
            );
        }
    }

    #[test]
    fn parsing_survives_missing_pattern() {
        let cands = vec![candidate("TBA-BEN-07")];
        assert_eq!(
            parse_decision("take TBA-BEN-07", &cands, None),
            OracleDecision::Selected("TBA-BEN-07".to_string())
        );
        assert_eq!(
            parse_decision("take something else", &cands, None),
            OracleDecision::NoCandidate
        );
    }
}
