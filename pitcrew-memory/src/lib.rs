//! PITCREW Memory - Per-agent memory streams
//!
//! The generative-agents memory model: an append-only stream of observations,
//! conversation notes, reflections, and plan summaries, retrieved through a
//! three-axis weighted score (recency, importance, relevance). Accumulated
//! importance of successful writes gates the reflection pass.
//!
//! Persistence failures are logged and absorbed; a tick keeps progressing
//! even when a memory write silently fails.

use chrono::Utc;
use pitcrew_core::{
    AgentKind, FloorConfig, MemoryKind, MemoryRecord, RetrievalWeights,
};
use pitcrew_llm::LanguageModel;
use pitcrew_storage::MemoryStore;
use std::sync::{Arc, Mutex};
use tracing::warn;

// ============================================================================
// SCORING
// ============================================================================

/// Exponential recency decay: `decay^hours`. With the default decay of 0.995
/// a memory loses about 0.5% of its recency weight per hour.
pub fn recency_score(decay: f64, age_hours: f64) -> f64 {
    decay.powf(age_hours.max(0.0))
}

/// Relevance used when either the query or the candidate lacks an embedding:
/// neutral rather than zero, so un-embedded content is not buried.
pub const NEUTRAL_RELEVANCE: f32 = 0.5;

/// One retrieval hit with its per-axis score breakdown.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredMemory {
    pub record: MemoryRecord,
    pub recency: f32,
    pub importance: f32,
    pub relevance: f32,
    pub score: f32,
}

// ============================================================================
// MEMORY STREAM
// ============================================================================

/// One agent's private memory stream.
///
/// Thread-safe; the reflection accumulator only advances when a record is
/// actually persisted, so a flaky store cannot trigger reflection off
/// memories that were never written.
pub struct MemoryStream {
    agent: AgentKind,
    store: Arc<dyn MemoryStore>,
    model: Arc<dyn LanguageModel>,
    config: FloorConfig,
    accumulated_importance: Mutex<f32>,
}

impl MemoryStream {
    pub fn new(
        agent: AgentKind,
        store: Arc<dyn MemoryStore>,
        model: Arc<dyn LanguageModel>,
        config: FloorConfig,
    ) -> Self {
        Self {
            agent,
            store,
            model,
            config,
            accumulated_importance: Mutex::new(0.0),
        }
    }

    pub fn agent(&self) -> AgentKind {
        self.agent
    }

    fn accumulator(&self) -> std::sync::MutexGuard<'_, f32> {
        match self.accumulated_importance.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    // ========================================================================
    // WRITES
    // ========================================================================

    /// Add a memory. When `importance` is omitted the model scores it (with
    /// 5.0 as its own degradation fallback); the embedding is best-effort.
    /// Returns the persisted record, or None when the write failed — in which
    /// case the reflection accumulator does not advance.
    pub async fn add(
        &self,
        content: impl Into<String>,
        kind: MemoryKind,
        importance: Option<f32>,
        tags: Vec<String>,
    ) -> Option<MemoryRecord> {
        let content = content.into();
        let importance = match importance {
            Some(value) => value,
            None => self.model.score_importance(&content).await,
        };
        let embedding = self.model.embed(&content).await;
        let record = MemoryRecord::new(self.agent, kind, content, importance)
            .with_embedding(embedding)
            .with_tags(tags);

        if let Err(e) = self.store.memory_insert(&record).await {
            warn!(agent = %self.agent, error = %e, "memory write failed");
            return None;
        }
        *self.accumulator() += record.importance;
        Some(record)
    }

    /// Observation from the perceive hook, auto-scored.
    pub async fn add_observation(&self, content: impl Into<String>) -> Option<MemoryRecord> {
        self.add(content, MemoryKind::Observation, None, Vec::new())
            .await
    }

    /// Note about a conversation the agent took part in, auto-scored.
    pub async fn add_conversation_note(&self, content: impl Into<String>) -> Option<MemoryRecord> {
        self.add(content, MemoryKind::Conversation, None, Vec::new())
            .await
    }

    /// Synthesized insight; importance pinned at 8.0.
    pub async fn add_reflection(
        &self,
        content: impl Into<String>,
        tags: Vec<String>,
    ) -> Option<MemoryRecord> {
        self.add(content, MemoryKind::Reflection, Some(8.0), tags)
            .await
    }

    /// Daily plan summary; importance pinned at 3.0.
    pub async fn add_plan_summary(&self, content: impl Into<String>) -> Option<MemoryRecord> {
        self.add(content, MemoryKind::Plan, Some(3.0), Vec::new())
            .await
    }

    // ========================================================================
    // RETRIEVAL
    // ========================================================================

    /// Weighted retrieval over the candidate pool (the most recent
    /// non-archived records, default 200).
    ///
    /// score = w_recency * decay^age + w_importance * importance/10
    ///       + w_relevance * clamped-cosine(query, candidate)
    ///
    /// Ties keep the candidate pool's most-recent-first order (stable sort).
    /// Returned records have their `last_accessed_at` touched, best-effort.
    pub async fn retrieve(
        &self,
        query: &str,
        k: usize,
        weights: Option<RetrievalWeights>,
        kinds: Option<&[MemoryKind]>,
    ) -> Vec<ScoredMemory> {
        let weights = weights.unwrap_or(self.config.retrieval_weights);
        let candidates = match self
            .store
            .memory_list_recent(self.agent, kinds, self.config.candidate_pool, 0)
            .await
        {
            Ok(records) => records,
            Err(e) => {
                warn!(agent = %self.agent, error = %e, "retrieval query failed");
                return Vec::new();
            }
        };

        let query_embedding = self.model.embed(query).await;
        let now = Utc::now();

        let mut scored: Vec<ScoredMemory> = candidates
            .into_iter()
            .map(|record| {
                let recency =
                    recency_score(self.config.recency_decay, record.age_hours(now)) as f32;
                let importance = record.importance / 10.0;
                let relevance = match (&query_embedding, &record.embedding) {
                    (Some(q), Some(e)) => q.similarity_clamped(e),
                    _ => NEUTRAL_RELEVANCE,
                };
                let score = weights.recency * recency
                    + weights.importance * importance
                    + weights.relevance * relevance;
                ScoredMemory {
                    record,
                    recency,
                    importance,
                    relevance,
                    score,
                }
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(k);

        let ids: Vec<_> = scored.iter().map(|s| s.record.id).collect();
        if !ids.is_empty() {
            if let Err(e) = self.store.memory_touch(&ids, now).await {
                warn!(agent = %self.agent, error = %e, "touch failed");
            }
        }
        scored
    }

    /// Plain chronological slice, newest first, no scoring. Source material
    /// for daily planning and reflection.
    pub async fn retrieve_recent(&self, n: usize) -> Vec<MemoryRecord> {
        match self.store.memory_list_recent(self.agent, None, n, 0).await {
            Ok(records) => records,
            Err(e) => {
                warn!(agent = %self.agent, error = %e, "recent query failed");
                Vec::new()
            }
        }
    }

    // ========================================================================
    // REFLECTION GATING
    // ========================================================================

    /// Pure threshold comparison; no side effects.
    pub fn should_reflect(&self) -> bool {
        *self.accumulator() >= self.config.reflection_threshold
    }

    /// Reset the accumulator. Called exactly once per completed reflection
    /// pass, regardless of how many insights it produced.
    pub fn reset_reflection_accumulator(&self) {
        *self.accumulator() = 0.0;
    }

    pub fn accumulated_importance(&self) -> f32 {
        *self.accumulator()
    }
}

impl std::fmt::Debug for MemoryStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStream")
            .field("agent", &self.agent)
            .field("accumulated_importance", &self.accumulated_importance())
            .finish()
    }
}

// ============================================================================
// UNIT TESTS
// ============================================================================


// ============================================================================
// PROPERTY TESTS
// ============================================================================

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_recency_monotonically_decreases(
            a in 0.0f64..10_000.0,
            delta in 0.001f64..10_000.0,
        ) {
            let younger = recency_score(0.995, a);
            let older = recency_score(0.995, a + delta);
            prop_assert!(older < younger);
        }

        #[test]
        fn prop_recency_bounded_unit_interval(age in 0.0f64..100_000.0) {
            let r = recency_score(0.995, age);
            prop_assert!((0.0..=1.0).contains(&r));
        }

        #[test]
        fn prop_zero_age_is_full_recency(decay in 0.5f64..1.0) {
            prop_assert!((recency_score(decay, 0.0) - 1.0).abs() < 1e-12);
        }
    }
}
