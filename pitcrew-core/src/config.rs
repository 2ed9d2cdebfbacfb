//! Floor configuration: scheduler intervals, retrieval weights, meeting slots

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, PitcrewResult};

// ============================================================================
// RETRIEVAL WEIGHTS
// ============================================================================

/// Per-axis weights for memory retrieval scoring. All three default to 1.0,
/// so the unweighted score ranges roughly 0..3.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetrievalWeights {
    pub recency: f32,
    pub importance: f32,
    pub relevance: f32,
}

impl Default for RetrievalWeights {
    fn default() -> Self {
        Self {
            recency: 1.0,
            importance: 1.0,
            relevance: 1.0,
        }
    }
}

// ============================================================================
// MEETING SCHEDULE
// ============================================================================

/// Named fixed daily meeting slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeetingSlotName {
    Morning,
    Midday,
    Closing,
}

impl MeetingSlotName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Morning => "morning",
            Self::Midday => "midday",
            Self::Closing => "closing",
        }
    }

    /// Topic line used when the slot convenes.
    pub fn topic(&self) -> &'static str {
        match self {
            Self::Morning => "Morning briefing: today's market outlook",
            Self::Midday => "Midday check-in: morning session review",
            Self::Closing => "Closing huddle: end-of-day wrap-up",
        }
    }
}

impl std::fmt::Display for MeetingSlotName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One fixed daily meeting slot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeetingSlot {
    pub name: MeetingSlotName,
    /// Wall-clock firing time.
    pub at: NaiveTime,
}

/// The daily meeting schedule. Each slot fires at most once per calendar day,
/// and only inside a `window_secs` band around its scheduled time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeetingSchedule {
    pub slots: Vec<MeetingSlot>,
    /// Half-width of the firing window, in seconds.
    pub window_secs: i64,
}

impl Default for MeetingSchedule {
    fn default() -> Self {
        let slot = |name, h, m| MeetingSlot {
            name,
            at: NaiveTime::from_hms_opt(h, m, 0).unwrap(),
        };
        Self {
            slots: vec![
                slot(MeetingSlotName::Morning, 8, 45),
                slot(MeetingSlotName::Midday, 12, 0),
                slot(MeetingSlotName::Closing, 15, 25),
            ],
            window_secs: 120,
        }
    }
}

impl MeetingSchedule {
    /// Slots whose firing window contains `now`.
    pub fn due_slots(&self, now: NaiveTime) -> Vec<MeetingSlot> {
        self.slots
            .iter()
            .filter(|slot| {
                let delta = (now - slot.at).num_seconds().abs();
                delta <= self.window_secs
            })
            .copied()
            .collect()
    }
}

// ============================================================================
// FLOOR CONFIG
// ============================================================================

/// Global knobs for the floor. `Default` carries the production values; the
/// builder methods exist for tests that need faster clocks or lower gates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FloorConfig {
    /// Seconds between scheduler firings.
    pub tick_interval_secs: u64,
    /// Accumulated-importance threshold at which reflection becomes due.
    pub reflection_threshold: f32,
    /// Hourly recency decay base.
    pub recency_decay: f64,
    /// Size of the retrieval candidate pool (most recent non-archived).
    pub candidate_pool: usize,
    /// Seconds that must elapse between debate starts.
    pub debate_cooldown_secs: i64,
    /// Rolling cap on retained tick batches.
    pub tick_history_cap: usize,
    /// Rolling cap on retained recent conversations.
    pub recent_conversations_cap: usize,
    /// Daily output-token allowance for the language model, if enforced.
    pub daily_token_limit: Option<u64>,
    pub retrieval_weights: RetrievalWeights,
    pub meeting_schedule: MeetingSchedule,
}

impl Default for FloorConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 30,
            reflection_threshold: 50.0,
            recency_decay: 0.995,
            candidate_pool: 200,
            debate_cooldown_secs: 60,
            tick_history_cap: 100,
            recent_conversations_cap: 20,
            daily_token_limit: None,
            retrieval_weights: RetrievalWeights::default(),
            meeting_schedule: MeetingSchedule::default(),
        }
    }
}

impl FloorConfig {
    pub fn with_tick_interval_secs(mut self, secs: u64) -> Self {
        self.tick_interval_secs = secs;
        self
    }

    pub fn with_reflection_threshold(mut self, threshold: f32) -> Self {
        self.reflection_threshold = threshold;
        self
    }

    pub fn with_debate_cooldown_secs(mut self, secs: i64) -> Self {
        self.debate_cooldown_secs = secs;
        self
    }

    pub fn with_daily_token_limit(mut self, limit: u64) -> Self {
        self.daily_token_limit = Some(limit);
        self
    }

    /// Reject configurations that cannot drive the floor at all.
    pub fn validate(&self) -> PitcrewResult<()> {
        if self.tick_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "tick_interval_secs".to_string(),
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            }
            .into());
        }
        if self.candidate_pool == 0 {
            return Err(ConfigError::InvalidValue {
                field: "candidate_pool".to_string(),
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            }
            .into());
        }
        if !(0.0..=1.0).contains(&self.recency_decay) {
            return Err(ConfigError::InvalidValue {
                field: "recency_decay".to_string(),
                value: self.recency_decay.to_string(),
                reason: "outside [0, 1]".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32, s: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, s).unwrap()
    }

    #[test]
    fn test_default_weights_are_unit() {
        let w = RetrievalWeights::default();
        assert_eq!((w.recency, w.importance, w.relevance), (1.0, 1.0, 1.0));
    }

    #[test]
    fn test_default_schedule_slots() {
        let schedule = MeetingSchedule::default();
        assert_eq!(schedule.slots.len(), 3);
        assert_eq!(schedule.slots[0].at, t(8, 45, 0));
        assert_eq!(schedule.slots[1].at, t(12, 0, 0));
        assert_eq!(schedule.slots[2].at, t(15, 25, 0));
        assert_eq!(schedule.window_secs, 120);
    }

    #[test]
    fn test_due_slots_inside_window() {
        let schedule = MeetingSchedule::default();
        let due = schedule.due_slots(t(8, 46, 30));
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].name, MeetingSlotName::Morning);
        // Boundary is inclusive.
        assert_eq!(schedule.due_slots(t(8, 47, 0)).len(), 1);
    }

    #[test]
    fn test_due_slots_outside_window() {
        let schedule = MeetingSchedule::default();
        assert!(schedule.due_slots(t(8, 42, 59)).is_empty());
        assert!(schedule.due_slots(t(10, 0, 0)).is_empty());
    }

    #[test]
    fn test_default_config_values() {
        let config = FloorConfig::default();
        assert_eq!(config.tick_interval_secs, 30);
        assert_eq!(config.reflection_threshold, 50.0);
        assert_eq!(config.recency_decay, 0.995);
        assert_eq!(config.candidate_pool, 200);
        assert_eq!(config.debate_cooldown_secs, 60);
        assert_eq!(config.tick_history_cap, 100);
        assert_eq!(config.recent_conversations_cap, 20);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let config = FloorConfig::default().with_tick_interval_secs(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_decay() {
        let mut config = FloorConfig::default();
        config.recency_decay = 1.5;
        assert!(config.validate().is_err());
    }
}
