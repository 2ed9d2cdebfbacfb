//! PITCREW Dialogue - Turn-taking conversation engine
//!
//! Drives pairwise dialogues and multi-party meetings through four stable
//! checkpoints: start, turn loop, conclusion, cleanup. Cleanup is
//! unconditional; both participants' conversation flags are released on
//! every exit path, including failure.

use chrono::Utc;
use pitcrew_core::{
    AgentAction, AgentError, Conversation, ConversationKind, ConversationMessage, EntityId,
    PitcrewResult, MAX_CONVERSATION_TURNS, MEETING_ROUNDS,
};
use pitcrew_agents::AgentRuntime;
use pitcrew_events::{EventBus, FloorEvent};
use pitcrew_llm::{GenerateRequest, LanguageModel, ModelTier};
use pitcrew_storage::ConversationStore;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

// ============================================================================
// TERMINATION
// ============================================================================

/// Agreement/closing phrases. From turn index 3 onward a pairwise
/// conversation ends early when the last two messages contain any of these.
pub const CLOSING_PHRASES: [&str; 7] = [
    "agreed",
    "sounds good",
    "good point",
    "in conclusion",
    "to summarize",
    "let's do that",
    "understood",
];

/// Index of the first turn after which early termination is evaluated.
const TERMINATION_CHECK_FROM: usize = 3;

/// True if the combined text of the last two messages contains a closing
/// phrase (case-insensitive).
pub fn reached_closing(messages: &[ConversationMessage]) -> bool {
    let start = messages.len().saturating_sub(2);
    let tail = messages[start..]
        .iter()
        .map(|m| m.content.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ");
    CLOSING_PHRASES.iter().any(|phrase| tail.contains(phrase))
}

// ============================================================================
// CONVERSATION ENGINE
// ============================================================================

/// Runs conversations: claims exclusivity, loops turns, concludes, persists,
/// broadcasts, and keeps a bounded ring of recent transcripts.
pub struct ConversationEngine {
    store: Arc<dyn ConversationStore>,
    model: Arc<dyn LanguageModel>,
    events: EventBus,
    recent: Mutex<VecDeque<Conversation>>,
    recent_cap: usize,
}

impl ConversationEngine {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        model: Arc<dyn LanguageModel>,
        events: EventBus,
        recent_cap: usize,
    ) -> Self {
        Self {
            store,
            model,
            events,
            recent: Mutex::new(VecDeque::with_capacity(recent_cap)),
            recent_cap,
        }
    }

    /// The bus this engine publishes lifecycle events on.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Recent conversations, oldest first, capped.
    pub fn recent_conversations(&self) -> Vec<Conversation> {
        self.recent_ring().iter().cloned().collect()
    }

    fn recent_ring(&self) -> std::sync::MutexGuard<'_, VecDeque<Conversation>> {
        match self.recent.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn remember(&self, conversation: Conversation) {
        let mut ring = self.recent_ring();
        if ring.len() == self.recent_cap {
            ring.pop_front();
        }
        ring.push_back(conversation);
    }

    // ========================================================================
    // PAIRWISE
    // ========================================================================

    /// Run a pairwise conversation between two agents.
    ///
    /// Both agents are claimed atomically up front; a claim failure returns
    /// `AlreadyInConversation` without touching the other agent's flag. Once
    /// claimed, both flags are released no matter how the conversation ends.
    pub async fn run_pairwise(
        &self,
        initiator: &AgentRuntime,
        target: &AgentRuntime,
        topic: &str,
        trigger: &str,
    ) -> PitcrewResult<Conversation> {
        if !initiator.try_begin_conversation(target.kind()) {
            return Err(AgentError::AlreadyInConversation {
                kind: initiator.kind(),
            }
            .into());
        }
        if !target.try_begin_conversation(initiator.kind()) {
            initiator.end_conversation();
            return Err(AgentError::AlreadyInConversation {
                kind: target.kind(),
            }
            .into());
        }

        let conversation = self
            .pairwise_inner(initiator, target, topic, trigger)
            .await;

        // Unconditional cleanup.
        initiator.set_activity(AgentAction::Idle, "");
        target.set_activity(AgentAction::Idle, "");
        initiator.end_conversation();
        target.end_conversation();

        self.remember(conversation.clone());
        Ok(conversation)
    }

    async fn pairwise_inner(
        &self,
        initiator: &AgentRuntime,
        target: &AgentRuntime,
        topic: &str,
        trigger: &str,
    ) -> Conversation {
        let mut conversation = Conversation::pairwise(
            None,
            initiator.kind(),
            target.kind(),
            topic,
            trigger,
            Utc::now(),
        );
        info!(
            conversation_id = %conversation.id,
            initiator = %initiator.kind(),
            target = %target.kind(),
            trigger,
            "conversation started"
        );
        self.events.publish(FloorEvent::ConversationStart {
            conversation_id: conversation.id,
            initiator: initiator.kind(),
            target: target.kind(),
            topic: topic.to_string(),
            trigger: trigger.to_string(),
            timestamp: conversation.started_at,
        });
        initiator.set_activity(AgentAction::Talking, format!("talking about {topic}"));
        target.set_activity(AgentAction::Talking, format!("talking about {topic}"));

        for turn in 0..MAX_CONVERSATION_TURNS {
            let (speaker, listener) = if turn % 2 == 0 {
                (initiator, target)
            } else {
                (target, initiator)
            };
            let content = speaker
                .generate_utterance(&conversation.messages, topic, listener.name())
                .await;
            let conversation_id = conversation.id;
            let message = conversation.push_message(
                speaker.kind(),
                speaker.name(),
                content,
                Utc::now(),
                None,
            );
            self.events.publish(FloorEvent::TurnMessage {
                conversation_id,
                turn: message.turn,
                speaker: message.speaker,
                speaker_name: message.speaker_name.clone(),
                content: message.content.clone(),
                round: None,
                timestamp: message.timestamp,
            });

            if turn >= TERMINATION_CHECK_FROM
                && (conversation.turn_count() >= MAX_CONVERSATION_TURNS
                    || reached_closing(&conversation.messages))
            {
                break;
            }
        }

        let conclusion = self
            .conclude(&conversation, "Summarize this exchange in 2-3 sentences.")
            .await;
        conversation.finalize(conclusion.clone());

        if let Err(e) = self.store.conversation_insert(&conversation).await {
            warn!(conversation_id = %conversation.id, error = %e, "transcript persist failed");
        }
        initiator
            .memory()
            .add_conversation_note(format!(
                "Talked with {} about {topic}. Conclusion: {conclusion}",
                target.name()
            ))
            .await;
        target
            .memory()
            .add_conversation_note(format!(
                "Talked with {} about {topic}. Conclusion: {conclusion}",
                initiator.name()
            ))
            .await;

        self.events.publish(FloorEvent::ConversationEnd {
            conversation_id: conversation.id,
            conclusion,
            turn_count: conversation.turn_count(),
            timestamp: Utc::now(),
        });
        conversation
    }

    // ========================================================================
    // MEETINGS
    // ========================================================================

    /// Run a meeting with a caller-allocated conversation id. Exactly
    /// `MEETING_ROUNDS` rounds; every participant speaks once per round in
    /// list order; no early termination.
    pub async fn run_meeting_with_id(
        &self,
        id: EntityId,
        participants: &[Arc<AgentRuntime>],
        topic: &str,
        trigger: &str,
    ) -> Conversation {
        let kinds = participants.iter().map(|p| p.kind()).collect::<Vec<_>>();
        let mut conversation =
            Conversation::meeting(Some(id), kinds.clone(), topic, trigger, Utc::now());
        info!(
            conversation_id = %conversation.id,
            participants = participants.len(),
            trigger,
            "meeting started"
        );
        self.events.publish(FloorEvent::MeetingStart {
            conversation_id: conversation.id,
            kind: ConversationKind::Meeting,
            trigger: trigger.to_string(),
            participants: kinds,
            topic: topic.to_string(),
            timestamp: conversation.started_at,
        });

        for round in 1..=MEETING_ROUNDS {
            for speaker in participants {
                let content = speaker
                    .generate_utterance(&conversation.messages, topic, "all participants")
                    .await;
                let conversation_id = conversation.id;
                let message = conversation.push_message(
                    speaker.kind(),
                    speaker.name(),
                    content,
                    Utc::now(),
                    Some(round),
                );
                self.events.publish(FloorEvent::TurnMessage {
                    conversation_id,
                    turn: message.turn,
                    speaker: message.speaker,
                    speaker_name: message.speaker_name.clone(),
                    content: message.content.clone(),
                    round: Some(round),
                    timestamp: message.timestamp,
                });
            }
        }

        let conclusion = self
            .conclude(
                &conversation,
                &format!("Summarize this {trigger} meeting in 3-4 sentences."),
            )
            .await;
        conversation.finalize(conclusion.clone());

        if let Err(e) = self.store.conversation_insert(&conversation).await {
            warn!(conversation_id = %conversation.id, error = %e, "transcript persist failed");
        }
        for participant in participants {
            participant
                .memory()
                .add_conversation_note(format!(
                    "Attended the {trigger} meeting on {topic}. Conclusion: {conclusion}"
                ))
                .await;
        }

        self.events.publish(FloorEvent::MeetingEnd {
            conversation_id: conversation.id,
            trigger: trigger.to_string(),
            conclusion,
            timestamp: Utc::now(),
        });
        self.remember(conversation.clone());
        conversation
    }

    /// Run a meeting with a fresh id.
    pub async fn run_meeting(
        &self,
        participants: &[Arc<AgentRuntime>],
        topic: &str,
        trigger: &str,
    ) -> Conversation {
        self.run_meeting_with_id(pitcrew_core::new_entity_id(), participants, topic, trigger)
            .await
    }

    async fn conclude(&self, conversation: &Conversation, instruction: &str) -> String {
        let transcript = conversation
            .messages
            .iter()
            .map(|m| format!("{}: {}", m.speaker_name, m.content))
            .collect::<Vec<_>>()
            .join("\n");
        let request = GenerateRequest::new(format!(
            "Topic: {}\nTranscript:\n{transcript}\n\n{instruction}",
            conversation.topic
        ))
        .with_tier(ModelTier::Medium);
        self.model.generate(&request).await
    }
}

impl std::fmt::Debug for ConversationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationEngine")
            .field("recent", &self.recent_ring().len())
            .field("recent_cap", &self.recent_cap)
            .finish()
    }
}

// ============================================================================
// UNIT TESTS
// ============================================================================
