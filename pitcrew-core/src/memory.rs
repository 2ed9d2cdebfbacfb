//! Memory records: the append-only unit of an agent's memory stream

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::agent::AgentKind;
use crate::embedding::EmbeddingVector;
use crate::{new_entity_id, EntityId, Timestamp};

/// What kind of experience a memory records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryKind {
    /// Something perceived from the environment.
    Observation,
    /// A note about a conversation the agent took part in.
    Conversation,
    /// A synthesized higher-level insight.
    Reflection,
    /// A summary of a daily plan.
    Plan,
}

/// One record in an agent's memory stream.
///
/// Conceptually append-only: after creation, only `last_accessed_at` and
/// `archived` ever change. Archived records are invisible to retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: EntityId,
    /// Owning agent.
    pub agent: AgentKind,
    pub kind: MemoryKind,
    /// Free-text content, natural language.
    pub content: String,
    /// Importance in [1, 10].
    pub importance: f32,
    /// Embedding of `content`; absence is tolerated and retrieval falls back
    /// to a neutral relevance.
    pub embedding: Option<EmbeddingVector>,
    /// Tagged external references (six-digit instrument codes).
    pub tags: Vec<String>,
    pub created_at: Timestamp,
    /// Updated when retrieval returns this record. Not currently read back
    /// into recency scoring, which uses `created_at` only.
    pub last_accessed_at: Timestamp,
    /// Soft delete; excluded from retrieval once set.
    pub archived: bool,
}

impl MemoryRecord {
    /// Create a new record with importance clamped to [1, 10].
    pub fn new(agent: AgentKind, kind: MemoryKind, content: impl Into<String>, importance: f32) -> Self {
        let now = Utc::now();
        Self {
            id: new_entity_id(),
            agent,
            kind,
            content: content.into(),
            importance: importance.clamp(1.0, 10.0),
            embedding: None,
            tags: Vec::new(),
            created_at: now,
            last_accessed_at: now,
            archived: false,
        }
    }

    /// Attach an embedding.
    pub fn with_embedding(mut self, embedding: Option<EmbeddingVector>) -> Self {
        self.embedding = embedding;
        self
    }

    /// Attach external reference tags.
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Hours elapsed since creation, for recency decay.
    pub fn age_hours(&self, now: Timestamp) -> f64 {
        (now - self.created_at).num_seconds() as f64 / 3600.0
    }
}

static TOPIC_CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d{6}\b").expect("valid regex"));

/// Scan free text for externally-recognizable topic codes (six-digit
/// instrument codes), used to tag reflections and analysis memories.
pub fn extract_topic_codes(text: &str) -> Vec<String> {
    TOPIC_CODE
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect()
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_new_clamps_importance() {
        let low = MemoryRecord::new(AgentKind::Trend, MemoryKind::Observation, "x", -3.0);
        assert_eq!(low.importance, 1.0);
        let high = MemoryRecord::new(AgentKind::Trend, MemoryKind::Observation, "x", 42.0);
        assert_eq!(high.importance, 10.0);
    }

    #[test]
    fn test_new_record_is_live() {
        let rec = MemoryRecord::new(AgentKind::News, MemoryKind::Observation, "headline", 5.0);
        assert!(!rec.archived);
        assert!(rec.embedding.is_none());
        assert_eq!(rec.created_at, rec.last_accessed_at);
    }

    #[test]
    fn test_age_hours() {
        let rec = MemoryRecord::new(AgentKind::News, MemoryKind::Observation, "x", 5.0);
        let later = rec.created_at + Duration::hours(3);
        assert!((rec.age_hours(later) - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_extract_topic_codes() {
        let codes = extract_topic_codes("Chipmaker 005930 gapped up; watch 000660 too");
        assert_eq!(codes, vec!["005930".to_string(), "000660".to_string()]);
    }

    #[test]
    fn test_extract_topic_codes_ignores_other_digits() {
        assert!(extract_topic_codes("up 3.5% on 12345 and 1234567").is_empty());
    }
}
