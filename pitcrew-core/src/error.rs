//! Error types for PITCREW operations

use thiserror::Error;
use uuid::Uuid;

use crate::agent::AgentKind;

/// Storage layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Record not found: {what} with id {id}")]
    NotFound { what: String, id: Uuid },

    #[error("Insert failed for {what}: {reason}")]
    InsertFailed { what: String, reason: String },

    #[error("Update failed for {what}: {reason}")]
    UpdateFailed { what: String, reason: String },

    #[error("Query failed for {what}: {reason}")]
    QueryFailed { what: String, reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Agent coordination errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AgentError {
    #[error("Agent not registered: {kind:?}")]
    NotRegistered { kind: AgentKind },

    #[error("Agent {kind:?} is already in a conversation")]
    AlreadyInConversation { kind: AgentKind },

    #[error("Not enough eligible participants: {available} available, {required} required")]
    NotEnoughParticipants { available: usize, required: usize },
}

/// Conversation protocol errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConversationError {
    #[error("Conversation {id} failed mid-transcript at turn {turn}: {reason}")]
    TurnFailed { id: Uuid, turn: usize, reason: String },

    #[error("Failed to acquire conversation slot for {kind:?}")]
    SlotUnavailable { kind: AgentKind },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Vector operation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VectorError {
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: i32, got: i32 },

    #[error("Invalid vector: {reason}")]
    InvalidVector { reason: String },
}

/// Master error type for all PITCREW errors.
#[derive(Debug, Clone, Error)]
pub enum PitcrewError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    #[error("Conversation error: {0}")]
    Conversation(#[from] ConversationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Vector error: {0}")]
    Vector(#[from] VectorError),
}

/// Result type alias for PITCREW operations.
pub type PitcrewResult<T> = Result<T, PitcrewError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_display_not_found() {
        let err = StorageError::NotFound {
            what: "memory".to_string(),
            id: Uuid::nil(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Record not found"));
        assert!(msg.contains("memory"));
        assert!(msg.contains("00000000-0000-0000-0000-000000000000"));
    }

    #[test]
    fn test_agent_error_display_in_conversation() {
        let err = AgentError::AlreadyInConversation {
            kind: AgentKind::News,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("already in a conversation"));
        assert!(msg.contains("News"));
    }

    #[test]
    fn test_conversation_error_display_turn_failed() {
        let err = ConversationError::TurnFailed {
            id: Uuid::nil(),
            turn: 3,
            reason: "store offline".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("turn 3"));
        assert!(msg.contains("store offline"));
    }

    #[test]
    fn test_pitcrew_error_from_variants() {
        let storage = PitcrewError::from(StorageError::LockPoisoned);
        assert!(matches!(storage, PitcrewError::Storage(_)));

        let agent = PitcrewError::from(AgentError::NotEnoughParticipants {
            available: 1,
            required: 2,
        });
        assert!(matches!(agent, PitcrewError::Agent(_)));

        let vector = PitcrewError::from(VectorError::InvalidVector {
            reason: "empty".to_string(),
        });
        assert!(matches!(vector, PitcrewError::Vector(_)));
    }
}
