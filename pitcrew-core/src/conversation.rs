//! Conversation records: pairwise dialogues and multi-party meetings

use serde::{Deserialize, Serialize};

use crate::agent::AgentKind;
use crate::{new_entity_id, EntityId, Timestamp};

/// Maximum turns in a pairwise conversation.
pub const MAX_CONVERSATION_TURNS: usize = 6;

/// Fixed number of rounds in a meeting; every participant speaks once per
/// round, so a meeting always produces `MEETING_ROUNDS * participants`
/// messages.
pub const MEETING_ROUNDS: u32 = 2;

/// Pairwise dialogue or multi-party meeting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationKind {
    Pairwise,
    Meeting,
}

/// Lifecycle status of a conversation record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    InFlight,
    Complete,
}

/// One utterance in a transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    /// Zero-based position in the transcript.
    pub turn: usize,
    pub speaker: AgentKind,
    pub speaker_name: String,
    pub content: String,
    pub timestamp: Timestamp,
    /// Meeting round (1-based); None for pairwise conversations.
    pub round: Option<u32>,
}

/// A finished or in-flight conversation. Appended to turn-by-turn, finalized
/// once, then immutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: EntityId,
    pub kind: ConversationKind,
    /// Initiating agent label, or `"system"` for meetings.
    pub initiator: String,
    /// Target agent label, or `"all"` for meetings.
    pub target: String,
    pub participants: Vec<AgentKind>,
    pub topic: String,
    pub messages: Vec<ConversationMessage>,
    /// Terminal summary, filled in by finalization.
    pub conclusion: String,
    /// Why this conversation started (e.g. "urgent_news", "high_risk",
    /// a meeting slot name, "emergency", "user_debate").
    pub trigger: String,
    pub status: ConversationStatus,
    pub started_at: Timestamp,
}

impl Conversation {
    /// Start a pairwise conversation record.
    pub fn pairwise(
        id: Option<EntityId>,
        initiator: AgentKind,
        target: AgentKind,
        topic: impl Into<String>,
        trigger: impl Into<String>,
        started_at: Timestamp,
    ) -> Self {
        Self {
            id: id.unwrap_or_else(new_entity_id),
            kind: ConversationKind::Pairwise,
            initiator: initiator.as_str().to_string(),
            target: target.as_str().to_string(),
            participants: vec![initiator, target],
            topic: topic.into(),
            messages: Vec::new(),
            conclusion: String::new(),
            trigger: trigger.into(),
            status: ConversationStatus::InFlight,
            started_at,
        }
    }

    /// Start a meeting record addressed to all participants.
    pub fn meeting(
        id: Option<EntityId>,
        participants: Vec<AgentKind>,
        topic: impl Into<String>,
        trigger: impl Into<String>,
        started_at: Timestamp,
    ) -> Self {
        Self {
            id: id.unwrap_or_else(new_entity_id),
            kind: ConversationKind::Meeting,
            initiator: "system".to_string(),
            target: "all".to_string(),
            participants,
            topic: topic.into(),
            messages: Vec::new(),
            conclusion: String::new(),
            trigger: trigger.into(),
            status: ConversationStatus::InFlight,
            started_at,
        }
    }

    /// Append the next message, assigning its turn index.
    pub fn push_message(
        &mut self,
        speaker: AgentKind,
        speaker_name: impl Into<String>,
        content: impl Into<String>,
        timestamp: Timestamp,
        round: Option<u32>,
    ) -> &ConversationMessage {
        let turn = self.messages.len();
        self.messages.push(ConversationMessage {
            turn,
            speaker,
            speaker_name: speaker_name.into(),
            content: content.into(),
            timestamp,
            round,
        });
        self.messages.last().expect("just pushed")
    }

    /// Finalize with a conclusion; the record is immutable afterwards.
    pub fn finalize(&mut self, conclusion: impl Into<String>) {
        self.conclusion = conclusion.into();
        self.status = ConversationStatus::Complete;
    }

    pub fn turn_count(&self) -> usize {
        self.messages.len()
    }
}

// =============================================================================
// TESTS
// =============================================================================
