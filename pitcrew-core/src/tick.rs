//! Tick results, analysis reports, and agent opinions
//!
//! Structured schemas for shapes the language model produces as JSON.
//! Schema-validation failure is treated as malformed model output: the
//! lenient `from_value` constructors return None and callers proceed with
//! defaults, they never raise.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agent::{AgentAction, AgentKind, Zone};
use crate::Timestamp;

// ============================================================================
// TICK RESULTS
// ============================================================================

/// What a single agent tick amounted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TickOutcome {
    /// Nothing perceived; the agent went idle.
    Idle,
    /// The analyze hook produced a usable report.
    Analyzed,
    /// A plan item was active (or analysis produced nothing); the agent kept
    /// executing its plan.
    ContinuedPlan,
    /// The tick failed; see `error`.
    Error,
}

/// Per-tick, per-agent record. A tick never propagates an exception; failures
/// land in `error` with outcome `Error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickResult {
    pub agent: AgentKind,
    pub name: String,
    pub timestamp: Timestamp,
    pub outcome: TickOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<AnalysisReport>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub reflections: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub location: Zone,
    pub action: AgentAction,
    pub action_description: String,
}

impl TickResult {
    /// A tick that failed; the agent is reported idle.
    pub fn failed(agent: AgentKind, name: impl Into<String>, location: Zone, error: impl Into<String>) -> Self {
        Self {
            agent,
            name: name.into(),
            timestamp: Utc::now(),
            outcome: TickOutcome::Error,
            analysis: None,
            reflections: Vec::new(),
            error: Some(error.into()),
            location,
            action: AgentAction::Idle,
            action_description: String::new(),
        }
    }
}

// ============================================================================
// ANALYSIS REPORTS
// ============================================================================

/// Risk classification inside an analysis report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn parse(label: &str) -> Option<RiskLevel> {
        match label.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}

/// Structured result of an agent's analyze hook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    /// Short synthesis; the only required field.
    pub summary: String,
    /// Whether the finding warrants immediately telling someone.
    #[serde(default)]
    pub urgent: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_level: Option<RiskLevel>,
    /// Candidate agents to notify, in preference order.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub notify_agents: Vec<AgentKind>,
    /// External topic codes touched by the analysis.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub tags: Vec<String>,
}

impl AnalysisReport {
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            urgent: false,
            risk_level: None,
            notify_agents: Vec::new(),
            tags: Vec::new(),
        }
    }

    /// Lenient parse of model JSON. Requires a non-empty `summary`; every
    /// other field is optional, and unknown notify targets are dropped.
    pub fn from_value(value: &Value) -> Option<AnalysisReport> {
        let obj = value.as_object()?;
        let summary = obj.get("summary")?.as_str()?.trim();
        if summary.is_empty() {
            return None;
        }

        let urgent = obj.get("urgent").and_then(Value::as_bool).unwrap_or(false);
        let risk_level = obj
            .get("risk_level")
            .and_then(Value::as_str)
            .and_then(RiskLevel::parse);
        let notify_agents = obj
            .get("notify_agents")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(Value::as_str)
                    .filter_map(AgentKind::parse)
                    .collect()
            })
            .unwrap_or_default();
        let tags = obj
            .get("tags")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Some(AnalysisReport {
            summary: summary.to_string(),
            urgent,
            risk_level,
            notify_agents,
            tags,
        })
    }
}

// ============================================================================
// AGENT OPINIONS
// ============================================================================

/// Sentiment of an opinion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Bullish,
    Bearish,
    Neutral,
}

impl Sentiment {
    pub fn parse(label: &str) -> Option<Sentiment> {
        match label.trim().to_ascii_lowercase().as_str() {
            "bullish" => Some(Self::Bullish),
            "bearish" => Some(Self::Bearish),
            "neutral" => Some(Self::Neutral),
            _ => None,
        }
    }
}

/// One agent's answer to an opinion poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentOpinion {
    pub agent: AgentKind,
    pub name: String,
    pub opinion: String,
    pub sentiment: Sentiment,
    /// Confidence in [0, 1].
    pub confidence: f32,
    pub key_points: Vec<String>,
}

impl AgentOpinion {
    /// The fixed placeholder an agent falls back to when opinion generation
    /// fails. Neutral sentiment, zero confidence.
    pub fn fallback(agent: AgentKind, name: impl Into<String>) -> Self {
        Self {
            agent,
            name: name.into(),
            opinion: "No opinion could be produced.".to_string(),
            sentiment: Sentiment::Neutral,
            confidence: 0.0,
            key_points: Vec::new(),
        }
    }

    /// Lenient parse of the model's opinion JSON; missing or unknown fields
    /// fall back to neutral defaults rather than rejecting the value.
    pub fn from_value(agent: AgentKind, name: impl Into<String>, value: &Value) -> Option<AgentOpinion> {
        let obj = value.as_object()?;
        let opinion = obj.get("opinion")?.as_str()?.to_string();
        let sentiment = obj
            .get("sentiment")
            .and_then(Value::as_str)
            .and_then(Sentiment::parse)
            .unwrap_or(Sentiment::Neutral);
        let confidence = obj
            .get("confidence")
            .and_then(Value::as_f64)
            .map(|c| c.clamp(0.0, 1.0) as f32)
            .unwrap_or(0.0);
        let key_points = obj
            .get("key_points")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Some(AgentOpinion {
            agent,
            name: name.into(),
            opinion,
            sentiment,
            confidence,
            key_points,
        })
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_failed_tick_is_idle_with_error() {
        let result = TickResult::failed(AgentKind::News, "Bolt", Zone::NewsTerminal, "boom");
        assert_eq!(result.outcome, TickOutcome::Error);
        assert_eq!(result.action, AgentAction::Idle);
        assert_eq!(result.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_analysis_report_requires_summary() {
        assert!(AnalysisReport::from_value(&json!({"urgent": true})).is_none());
        assert!(AnalysisReport::from_value(&json!({"summary": "  "})).is_none());
        assert!(AnalysisReport::from_value(&json!([1, 2])).is_none());
    }

    #[test]
    fn test_analysis_report_full_parse() {
        let report = AnalysisReport::from_value(&json!({
            "summary": "Chip names broke out",
            "urgent": true,
            "risk_level": "high",
            "notify_agents": ["trend", "bogus", "portfolio"],
            "tags": ["005930"]
        }))
        .unwrap();
        assert!(report.urgent);
        assert_eq!(report.risk_level, Some(RiskLevel::High));
        // Unknown targets are dropped, known ones keep order.
        assert_eq!(
            report.notify_agents,
            vec![AgentKind::Trend, AgentKind::Portfolio]
        );
        assert_eq!(report.tags, vec!["005930".to_string()]);
    }

    #[test]
    fn test_analysis_report_defaults() {
        let report = AnalysisReport::from_value(&json!({"summary": "quiet tape"})).unwrap();
        assert!(!report.urgent);
        assert!(report.risk_level.is_none());
        assert!(report.notify_agents.is_empty());
    }

    #[test]
    fn test_opinion_parse_and_fallback() {
        let opinion = AgentOpinion::from_value(
            AgentKind::Advisor,
            "Sage",
            &json!({
                "opinion": "Overbought near-term",
                "sentiment": "bearish",
                "confidence": 0.8,
                "key_points": ["RSI stretched"]
            }),
        )
        .unwrap();
        assert_eq!(opinion.sentiment, Sentiment::Bearish);
        assert!((opinion.confidence - 0.8).abs() < 1e-6);

        let fallback = AgentOpinion::fallback(AgentKind::Advisor, "Sage");
        assert_eq!(fallback.sentiment, Sentiment::Neutral);
        assert_eq!(fallback.confidence, 0.0);
    }

    #[test]
    fn test_opinion_unknown_sentiment_is_neutral() {
        let opinion = AgentOpinion::from_value(
            AgentKind::News,
            "Bolt",
            &json!({"opinion": "x", "sentiment": "sideways"}),
        )
        .unwrap();
        assert_eq!(opinion.sentiment, Sentiment::Neutral);
    }

    #[test]
    fn test_risk_level_parse() {
        assert_eq!(RiskLevel::parse("HIGH"), Some(RiskLevel::High));
        assert_eq!(RiskLevel::parse("medium "), Some(RiskLevel::Medium));
        assert_eq!(RiskLevel::parse("extreme"), None);
    }
}
