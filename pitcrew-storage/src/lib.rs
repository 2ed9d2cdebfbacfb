//! PITCREW Storage - Durable-store traits and in-memory backends
//!
//! Async traits for the three record families the floor persists: memory
//! records, conversation transcripts, and daily plans. The in-memory backend
//! here is the default for tests and single-process deployments; a durable
//! implementation satisfies the same traits.

use async_trait::async_trait;
use pitcrew_core::{
    AgentKind, Conversation, EntityId, MemoryKind, MemoryRecord, PitcrewResult, Plan,
    StorageError, Timestamp,
};
use std::sync::RwLock;

// ============================================================================
// STORAGE TRAITS
// ============================================================================

/// Async store for per-agent memory records.
///
/// Queries are ordered most-recent-first by creation time and never return
/// archived records. There are no hard deletes, only soft archive.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Insert a new memory record.
    async fn memory_insert(&self, record: &MemoryRecord) -> PitcrewResult<()>;

    /// List an agent's most recent non-archived records, optionally filtered
    /// by kind, most-recent-first.
    async fn memory_list_recent(
        &self,
        agent: AgentKind,
        kinds: Option<&[MemoryKind]>,
        limit: usize,
        offset: usize,
    ) -> PitcrewResult<Vec<MemoryRecord>>;

    /// Update `last_accessed_at` for a set of records. Best-effort from the
    /// caller's point of view; unknown ids are ignored.
    async fn memory_touch(&self, ids: &[EntityId], at: Timestamp) -> PitcrewResult<()>;

    /// Soft-delete a set of records; they disappear from all queries.
    async fn memory_archive(&self, ids: &[EntityId]) -> PitcrewResult<()>;
}

/// Async store for finished conversation records.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Persist a conversation (normally called once, after finalization).
    async fn conversation_insert(&self, conversation: &Conversation) -> PitcrewResult<()>;

    /// List the most recently started conversations, newest first.
    async fn conversation_list_recent(&self, limit: usize) -> PitcrewResult<Vec<Conversation>>;
}

/// Async store for daily plans, one current plan per agent.
#[async_trait]
pub trait PlanStore: Send + Sync {
    /// Persist an agent's plan, replacing any previous one.
    async fn plan_insert(&self, agent: AgentKind, plan: &Plan) -> PitcrewResult<()>;

    /// The most recently persisted plan for an agent, if any.
    async fn plan_get_latest(&self, agent: AgentKind) -> PitcrewResult<Option<Plan>>;
}

// ============================================================================
// IN-MEMORY BACKEND
// ============================================================================

/// In-memory backend implementing all three store traits over RwLocks.
///
/// Insert order breaks ties between records created in the same instant, so
/// list ordering is fully deterministic.
pub struct InMemoryStore {
    memories: RwLock<Vec<MemoryRecord>>,
    conversations: RwLock<Vec<Conversation>>,
    plans: RwLock<Vec<(AgentKind, Plan)>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            memories: RwLock::new(Vec::new()),
            conversations: RwLock::new(Vec::new()),
            plans: RwLock::new(Vec::new()),
        }
    }

    /// Total records held, archived included. Diagnostics only.
    pub fn memory_count(&self) -> usize {
        self.memories.read().map(|m| m.len()).unwrap_or(0)
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStore")
            .field("memories", &self.memory_count())
            .field(
                "conversations",
                &self.conversations.read().map(|c| c.len()).unwrap_or(0),
            )
            .finish()
    }
}

fn read_lock<T>(lock: &RwLock<T>) -> PitcrewResult<std::sync::RwLockReadGuard<'_, T>> {
    lock.read().map_err(|_| StorageError::LockPoisoned.into())
}

fn write_lock<T>(lock: &RwLock<T>) -> PitcrewResult<std::sync::RwLockWriteGuard<'_, T>> {
    lock.write().map_err(|_| StorageError::LockPoisoned.into())
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn memory_insert(&self, record: &MemoryRecord) -> PitcrewResult<()> {
        write_lock(&self.memories)?.push(record.clone());
        Ok(())
    }

    async fn memory_list_recent(
        &self,
        agent: AgentKind,
        kinds: Option<&[MemoryKind]>,
        limit: usize,
        offset: usize,
    ) -> PitcrewResult<Vec<MemoryRecord>> {
        let memories = read_lock(&self.memories)?;
        let mut matched: Vec<&MemoryRecord> = memories
            .iter()
            .filter(|r| r.agent == agent && !r.archived)
            .filter(|r| kinds.map_or(true, |ks| ks.contains(&r.kind)))
            .collect();
        // Newest first; insertion order (stable sort) breaks created_at ties.
        matched.reverse();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matched
            .into_iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn memory_touch(&self, ids: &[EntityId], at: Timestamp) -> PitcrewResult<()> {
        let mut memories = write_lock(&self.memories)?;
        for record in memories.iter_mut() {
            if ids.contains(&record.id) {
                record.last_accessed_at = at;
            }
        }
        Ok(())
    }

    async fn memory_archive(&self, ids: &[EntityId]) -> PitcrewResult<()> {
        let mut memories = write_lock(&self.memories)?;
        for record in memories.iter_mut() {
            if ids.contains(&record.id) {
                record.archived = true;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ConversationStore for InMemoryStore {
    async fn conversation_insert(&self, conversation: &Conversation) -> PitcrewResult<()> {
        write_lock(&self.conversations)?.push(conversation.clone());
        Ok(())
    }

    async fn conversation_list_recent(&self, limit: usize) -> PitcrewResult<Vec<Conversation>> {
        let conversations = read_lock(&self.conversations)?;
        Ok(conversations.iter().rev().take(limit).cloned().collect())
    }
}

#[async_trait]
impl PlanStore for InMemoryStore {
    async fn plan_insert(&self, agent: AgentKind, plan: &Plan) -> PitcrewResult<()> {
        let mut plans = write_lock(&self.plans)?;
        plans.retain(|(kind, _)| *kind != agent);
        plans.push((agent, plan.clone()));
        Ok(())
    }

    async fn plan_get_latest(&self, agent: AgentKind) -> PitcrewResult<Option<Plan>> {
        let plans = read_lock(&self.plans)?;
        Ok(plans
            .iter()
            .find(|(kind, _)| *kind == agent)
            .map(|(_, plan)| plan.clone()))
    }
}

// ============================================================================
// UNIT TESTS
// ============================================================================
