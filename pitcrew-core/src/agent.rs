//! Agent identity, world-state enums, and daily plans

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// AGENT IDENTITY
// ============================================================================

/// The fixed population of specialized personas on the floor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    /// Market-wide direction, sector rotation, flow analysis.
    Trend,
    /// Single-name analysis, technical/fundamental calls.
    Advisor,
    /// Headline monitoring, breaking-news impact.
    News,
    /// Portfolio composition and risk balance.
    Portfolio,
}

impl AgentKind {
    /// All registered kinds, in registry order.
    pub fn all() -> [AgentKind; 4] {
        [Self::Trend, Self::Advisor, Self::News, Self::Portfolio]
    }

    /// Stable lowercase label used in persisted records and prompts.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trend => "trend",
            Self::Advisor => "advisor",
            Self::News => "news",
            Self::Portfolio => "portfolio",
        }
    }

    /// Parse a label produced by `as_str` or by a model classification call.
    /// Tolerates surrounding whitespace and case.
    pub fn parse(label: &str) -> Option<AgentKind> {
        match label.trim().to_ascii_lowercase().as_str() {
            "trend" => Some(Self::Trend),
            "advisor" => Some(Self::Advisor),
            "news" => Some(Self::News),
            "portfolio" => Some(Self::Portfolio),
            _ => None,
        }
    }
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// WORLD STATE ENUMS
// ============================================================================

/// What an agent is visibly doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentAction {
    Idle,
    Observing,
    Analyzing,
    Talking,
    Alerting,
    Writing,
    Thinking,
    Moving,
    Excited,
}

/// Named zones of the floor map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Zone {
    MarketBoard,
    AnalysisDesk,
    NewsTerminal,
    PortfolioBoard,
    MeetingTable,
    UserDesk,
}

/// Mutable per-agent world state, updated every tick and during
/// conversations. The conversation flag itself lives on the runtime as an
/// atomic; this is the snapshot shape exposed to observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    pub kind: AgentKind,
    pub name: String,
    pub location: Zone,
    pub action: AgentAction,
    pub action_description: String,
    pub in_conversation: bool,
    pub conversation_partner: Option<AgentKind>,
}

impl AgentState {
    /// Initial state: idle at the agent's home zone.
    pub fn new(kind: AgentKind, name: impl Into<String>, home: Zone) -> Self {
        Self {
            kind,
            name: name.into(),
            location: home,
            action: AgentAction::Idle,
            action_description: String::new(),
            in_conversation: false,
            conversation_partner: None,
        }
    }
}

// ============================================================================
// DAILY PLANS
// ============================================================================

/// A single scheduled step of an agent's day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanItem {
    /// Wall-clock start time of this step.
    pub time: NaiveTime,
    /// What the agent intends to do.
    pub action: String,
    /// Nominal duration in minutes.
    pub duration_minutes: i64,
}

impl PlanItem {
    pub fn new(time: NaiveTime, action: impl Into<String>, duration_minutes: i64) -> Self {
        Self {
            time,
            action: action.into(),
            duration_minutes,
        }
    }

    /// Lenient parse of a model-produced plan entry:
    /// `{"time": "HH:MM", "action": "...", "duration_minutes": n}`.
    /// Returns None when the shape is unusable (malformed model output).
    pub fn from_value(value: &Value) -> Option<PlanItem> {
        let obj = value.as_object()?;
        let time = NaiveTime::parse_from_str(obj.get("time")?.as_str()?, "%H:%M").ok()?;
        let action = obj.get("action")?.as_str()?.to_string();
        let duration_minutes = obj
            .get("duration_minutes")
            .and_then(Value::as_i64)
            .unwrap_or(30);
        Some(PlanItem {
            time,
            action,
            duration_minutes,
        })
    }
}

/// An agent's plan for one calendar day. Generated at most once per day and
/// replaced wholesale; a fixed fallback covers generation failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    /// Calendar day this plan was generated for.
    pub generated_on: NaiveDate,
    /// Time-ordered steps.
    pub items: Vec<PlanItem>,
}

impl Plan {
    pub fn new(generated_on: NaiveDate, items: Vec<PlanItem>) -> Self {
        Self {
            generated_on,
            items,
        }
    }

    /// The fixed default day: pre-market analysis through closing review.
    pub fn fallback(generated_on: NaiveDate) -> Self {
        let item = |h, m, action: &str, dur| {
            PlanItem::new(NaiveTime::from_hms_opt(h, m, 0).unwrap(), action, dur)
        };
        Self {
            generated_on,
            items: vec![
                item(8, 30, "Pre-market analysis", 30),
                item(9, 0, "Read the opening tape", 30),
                item(9, 30, "Deep-dive analysis", 120),
                item(11, 30, "Morning session recap", 60),
                item(12, 30, "Afternoon session monitoring", 90),
                item(14, 0, "Full-picture synthesis", 80),
                item(15, 20, "Closing review", 40),
            ],
        }
    }

    /// The item active at `now`: the first item whose start is <= now and
    /// whose window runs until the next item's start. The final item's window
    /// extends to end of day.
    pub fn current_item(&self, now: NaiveTime) -> Option<&PlanItem> {
        for (i, item) in self.items.iter().enumerate() {
            if item.time <= now {
                match self.items.get(i + 1) {
                    Some(next) => {
                        if now < next.time {
                            return Some(item);
                        }
                    }
                    None => return Some(item),
                }
            }
        }
        None
    }

    /// Compact "HH:MM: action" summary of the first few steps, stored as a
    /// plan memory.
    pub fn summary(&self, max_items: usize) -> String {
        self.items
            .iter()
            .take(max_items)
            .map(|p| format!("{}: {}", p.time.format("%H:%M"), p.action))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 14).unwrap()
    }

    #[test]
    fn test_agent_kind_roundtrip() {
        for kind in AgentKind::all() {
            assert_eq!(AgentKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(AgentKind::parse(" NEWS \n"), Some(AgentKind::News));
        assert_eq!(AgentKind::parse("none"), None);
    }

    #[test]
    fn test_fallback_plan_has_seven_items() {
        let plan = Plan::fallback(day());
        assert_eq!(plan.items.len(), 7);
        assert_eq!(plan.items[0].time, t(8, 30));
        assert_eq!(plan.items[6].time, t(15, 20));
    }

    #[test]
    fn test_current_item_between_steps() {
        let plan = Plan::fallback(day());
        let item = plan.current_item(t(9, 45)).unwrap();
        assert_eq!(item.time, t(9, 30));
    }

    #[test]
    fn test_current_item_before_first_step_is_none() {
        let plan = Plan::fallback(day());
        assert!(plan.current_item(t(7, 0)).is_none());
    }

    #[test]
    fn test_last_item_window_extends_to_end_of_day() {
        let plan = Plan::fallback(day());
        let item = plan.current_item(t(23, 59)).unwrap();
        assert_eq!(item.time, t(15, 20));
    }

    #[test]
    fn test_plan_item_from_value() {
        let value = serde_json::json!({
            "time": "09:15",
            "action": "Scan sector leaders",
            "duration_minutes": 45
        });
        let item = PlanItem::from_value(&value).unwrap();
        assert_eq!(item.time, t(9, 15));
        assert_eq!(item.action, "Scan sector leaders");
        assert_eq!(item.duration_minutes, 45);
    }

    #[test]
    fn test_plan_item_from_value_defaults_duration() {
        let value = serde_json::json!({"time": "10:00", "action": "x"});
        assert_eq!(PlanItem::from_value(&value).unwrap().duration_minutes, 30);
    }

    #[test]
    fn test_plan_item_from_value_rejects_bad_time() {
        let value = serde_json::json!({"time": "25:99", "action": "x"});
        assert!(PlanItem::from_value(&value).is_none());
        assert!(PlanItem::from_value(&serde_json::json!("not an object")).is_none());
    }

    #[test]
    fn test_plan_summary_caps_items() {
        let plan = Plan::fallback(day());
        let summary = plan.summary(2);
        assert!(summary.contains("08:30: Pre-market analysis"));
        assert!(!summary.contains("Deep-dive"));
    }
}
