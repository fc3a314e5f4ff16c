//! HTTP oracle — chat-completions transport for the decision oracle
//!
//! Talks to an OpenAI-compatible chat-completions endpoint. The service
//! boundary is a single prompt string out and a single free-text string back;
//! no structured schema is enforced on either side, so everything about the
//! response is treated as untrusted: transport failures, unexpected JSON
//! shapes, and prose replies all degrade to `NoCandidate` for the current
//! iteration. One attempt per consult, no retries.

use super::{
    build_choice_prompt, build_explanation_prompt, parse_decision, CandidateLoad, DecisionOracle,
    OracleDecision,
};
use crate::config::OracleConfig;
use crate::types::{MovedLoad, Phase};
use async_trait::async_trait;
use regex::Regex;
use std::time::Duration;
use tracing::{debug, warn};

/// Environment variable holding the bearer token for the oracle endpoint.
pub const API_KEY_ENV: &str = "ORACLE_API_KEY";

/// Completion token budget for explanation requests (half the choice budget,
/// matching the original tool).
const EXPLANATION_MAX_TOKENS: u32 = 500;

/// Remote decision oracle over HTTP.
pub struct HttpOracle {
    http: reqwest::Client,
    config: OracleConfig,
    api_key: String,
    identifier_pattern: Option<Regex>,
}

impl HttpOracle {
    /// Create an oracle client. An invalid identifier pattern disables token
    /// extraction (candidate-name matching still works) rather than failing.
    pub fn new(config: OracleConfig, api_key: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .expect("Failed to build HTTP client");

        let identifier_pattern = match Regex::new(&config.identifier_pattern) {
            Ok(re) => Some(re),
            Err(e) => {
                warn!(pattern = %config.identifier_pattern, error = %e, "Invalid identifier pattern — token extraction disabled");
                None
            }
        };

        Self {
            http,
            config,
            api_key: api_key.into(),
            identifier_pattern,
        }
    }

    /// Create an oracle client with the API key taken from [`API_KEY_ENV`].
    pub fn from_env(config: OracleConfig) -> Self {
        let api_key = std::env::var(API_KEY_ENV).unwrap_or_default();
        if api_key.is_empty() {
            warn!(
                "No {API_KEY_ENV} set — oracle calls will likely be rejected and degrade to no-candidate"
            );
        }
        Self::new(config, api_key)
    }

    /// Send one completion request and return the reply text, or `None` on
    /// any transport or shape failure.
    async fn complete(&self, prompt: &str, max_tokens: u32) -> Option<String> {
        let body = serde_json::json!({
            "model": self.config.model,
            "messages": [{ "role": "user", "content": prompt }],
            "max_tokens": max_tokens,
        });

        let response = match self
            .http
            .post(&self.config.api_url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "Oracle request failed");
                return None;
            }
        };

        let status = response.status();
        if !status.is_success() {
            warn!(status = %status, "Oracle returned non-success status");
            return None;
        }

        let value: serde_json::Value = match response.json().await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "Oracle response was not valid JSON");
                return None;
            }
        };

        match value["choices"][0]["message"]["content"].as_str() {
            Some(content) => Some(content.trim().to_string()),
            None => {
                warn!("Oracle response missing choices[0].message.content");
                None
            }
        }
    }
}

#[async_trait]
impl DecisionOracle for HttpOracle {
    async fn choose_candidate(
        &self,
        candidates: &[CandidateLoad],
        highest: Phase,
        lowest: Phase,
        conditions: &str,
    ) -> OracleDecision {
        let prompt = build_choice_prompt(candidates, highest, lowest, conditions);
        debug!(
            candidates = candidates.len(),
            %highest,
            %lowest,
            "Consulting decision oracle"
        );

        match self.complete(&prompt, self.config.max_tokens).await {
            Some(reply) => {
                let decision =
                    parse_decision(&reply, candidates, self.identifier_pattern.as_ref());
                debug!(reply = %reply, decision = ?decision, "Oracle replied");
                decision
            }
            // A failed consult costs one iteration, never the run.
            None => OracleDecision::NoCandidate,
        }
    }

    async fn explain_moves(&self, moved: &[MovedLoad]) -> Option<String> {
        if moved.is_empty() {
            return None;
        }
        let prompt = build_explanation_prompt(moved);
        self.complete(&prompt, EXPLANATION_MAX_TOKENS)
            .await
            .filter(|s| !s.is_empty())
    }
}
