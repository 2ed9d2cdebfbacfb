//! PITCREW Core - Entity Types
//!
//! Pure data structures with no behavior beyond construction and small
//! accessors. All other crates depend on this. The agent loop, retrieval
//! engine, and conversation protocol live elsewhere.

use chrono::{DateTime, Utc};
use uuid::Uuid;

pub mod agent;
pub mod config;
pub mod conversation;
pub mod embedding;
pub mod error;
pub mod memory;
pub mod tick;

pub use agent::{AgentAction, AgentKind, AgentState, Plan, PlanItem, Zone};
pub use config::{FloorConfig, MeetingSchedule, MeetingSlot, MeetingSlotName, RetrievalWeights};
pub use conversation::{
    Conversation, ConversationKind, ConversationMessage, ConversationStatus, MEETING_ROUNDS,
    MAX_CONVERSATION_TURNS,
};
pub use embedding::EmbeddingVector;
pub use error::{
    AgentError, ConfigError, ConversationError, PitcrewError, PitcrewResult, StorageError,
    VectorError,
};
pub use memory::{extract_topic_codes, MemoryKind, MemoryRecord};
pub use tick::{AgentOpinion, AnalysisReport, RiskLevel, Sentiment, TickOutcome, TickResult};

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Entity identifier using UUIDv7 for timestamp-sortable IDs.
pub type EntityId = Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Generate a new UUIDv7 EntityId (timestamp-sortable).
pub fn new_entity_id() -> EntityId {
    Uuid::now_v7()
}
