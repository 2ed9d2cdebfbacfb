//! PITCREW Orchestrator - The floor manager
//!
//! Runs the global tick scheduler, the fixed daily meeting slots, the
//! conversation-trigger heuristics, and the operator-facing debate and
//! opinion-poll surfaces. Per-agent tick failures are isolated into their
//! slot of the batch result; nothing an agent does can abort a scheduler
//! firing.

use chrono::{DateTime, Local, NaiveDate, NaiveTime, Utc};
use futures_util::future::join_all;
use pitcrew_core::{
    AgentAction, AgentError, AgentKind, AgentOpinion, AgentState, Conversation, EntityId,
    FloorConfig, MeetingSlot, MeetingSlotName, PitcrewResult, RiskLevel, Sentiment, TickResult,
    Zone,
};
use pitcrew_agents::AgentRuntime;
use pitcrew_dialogue::ConversationEngine;
use pitcrew_llm::{is_sentinel, GenerateRequest, LanguageModel, ModelTier, TokenBudget};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

// ============================================================================
// AGREEMENT CLASSIFICATION
// ============================================================================

/// How aligned the floor is after an opinion poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Agreement {
    /// Unanimous sentiment.
    Strong,
    /// All but one agent share a sentiment.
    Moderate,
    /// Exactly split between bullish and bearish.
    Divided,
    /// Anything else.
    Mixed,
}

impl Agreement {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Strong => "strong",
            Self::Moderate => "moderate",
            Self::Divided => "divided",
            Self::Mixed => "mixed",
        }
    }
}

/// Classify the sentiment distribution of a poll.
pub fn classify_agreement(sentiments: &[Sentiment]) -> Agreement {
    let n = sentiments.len();
    if n == 0 {
        return Agreement::Mixed;
    }
    let bullish = sentiments.iter().filter(|s| **s == Sentiment::Bullish).count();
    let bearish = sentiments.iter().filter(|s| **s == Sentiment::Bearish).count();
    let neutral = n - bullish - bearish;
    let max = bullish.max(bearish).max(neutral);

    if max == n {
        Agreement::Strong
    } else if bullish == bearish && bullish + bearish == n {
        Agreement::Divided
    } else if max == n - 1 {
        Agreement::Moderate
    } else {
        Agreement::Mixed
    }
}

/// Result of fanning an opinion request out to every agent.
#[derive(Debug, Clone)]
pub struct OpinionPoll {
    pub topic: String,
    pub opinions: Vec<AgentOpinion>,
    pub agreement: Agreement,
    pub consensus: String,
}

/// Fixed placeholder when consensus synthesis is unusable.
const CONSENSUS_FALLBACK: &str = "No consensus statement could be produced.";

// ============================================================================
// DEBATE LIFECYCLE
// ============================================================================

/// Outcome of a debate request. Each rejection carries what the caller can
/// act on: how long to wait, or which debate is already running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebateTicket {
    Started { conversation_id: EntityId },
    Cooldown { remaining_seconds: i64 },
    Busy { conversation_id: EntityId },
    Unavailable,
}

// ============================================================================
// WORLD STATE
// ============================================================================

/// One aggregated snapshot of the whole floor, for operator surfaces.
#[derive(Debug, Clone)]
pub struct WorldState {
    /// Completed tick cycles since startup.
    pub tick_count: u64,
    /// False once shutdown has been requested.
    pub running: bool,
    pub agents: Vec<AgentState>,
    /// Recent conversations, oldest first, capped.
    pub recent_conversations: Vec<Conversation>,
    /// Output tokens consumed today, when a budget is enforced.
    pub tokens_used: Option<u64>,
}

// ============================================================================
// FLOOR MANAGER
// ============================================================================

/// Owns the agent registry and all floor-level scheduling.
pub struct FloorManager {
    agents: Vec<Arc<AgentRuntime>>,
    engine: Arc<ConversationEngine>,
    model: Arc<dyn LanguageModel>,
    config: FloorConfig,
    budget: Option<Arc<TokenBudget>>,
    tick_count: AtomicU64,
    tick_history: Mutex<VecDeque<Vec<TickResult>>>,
    slots_done: Mutex<HashMap<MeetingSlotName, NaiveDate>>,
    last_debate_start: Mutex<Option<DateTime<Utc>>>,
    active_debate: Mutex<Option<EntityId>>,
    debate_handle: Mutex<Option<JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl FloorManager {
    pub fn new(
        agents: Vec<Arc<AgentRuntime>>,
        engine: Arc<ConversationEngine>,
        model: Arc<dyn LanguageModel>,
        config: FloorConfig,
        budget: Option<Arc<TokenBudget>>,
    ) -> Arc<Self> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Arc::new(Self {
            agents,
            engine,
            model,
            config,
            budget,
            tick_count: AtomicU64::new(0),
            tick_history: Mutex::new(VecDeque::new()),
            slots_done: Mutex::new(HashMap::new()),
            last_debate_start: Mutex::new(None),
            active_debate: Mutex::new(None),
            debate_handle: Mutex::new(None),
            shutdown_tx,
            shutdown_rx,
        })
    }

    fn lock<'a, T>(mutex: &'a Mutex<T>) -> std::sync::MutexGuard<'a, T> {
        match mutex.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn agent(&self, kind: AgentKind) -> Option<&Arc<AgentRuntime>> {
        self.agents.iter().find(|a| a.kind() == kind)
    }

    // ========================================================================
    // TICK SCHEDULER
    // ========================================================================

    /// Drive the floor until shutdown: one tick cycle per interval firing.
    pub async fn run(self: Arc<Self>) {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(self.config.tick_interval_secs));
        let mut shutdown = self.shutdown_rx.clone();
        loop {
            // Covers a shutdown sent before this receiver was cloned.
            if *shutdown.borrow() {
                info!("floor scheduler stopping");
                break;
            }
            tokio::select! {
                _ = interval.tick() => {
                    self.run_tick_cycle().await;
                }
                _ = shutdown.changed() => {
                    info!("floor scheduler stopping");
                    break;
                }
            }
        }
    }

    /// Stop accepting new work and join any in-flight background debate.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let handle = Self::lock(&self.debate_handle).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "background debate did not finish cleanly");
            }
        }
    }

    /// One scheduler firing: meeting schedule, concurrent agent ticks,
    /// conversation triggers, history append.
    pub async fn run_tick_cycle(self: &Arc<Self>) {
        let now = Local::now();
        self.check_meeting_schedule(now.date_naive(), now.time())
            .await;

        let results = join_all(self.agents.iter().map(|agent| agent.tick())).await;

        for result in &results {
            self.evaluate_conversation_triggers(result).await;
        }

        let mut history = Self::lock(&self.tick_history);
        if history.len() == self.config.tick_history_cap {
            history.pop_front();
        }
        history.push_back(results);
        drop(history);
        self.tick_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Rolling batches of per-agent tick results, oldest first.
    pub fn tick_history(&self) -> Vec<Vec<TickResult>> {
        Self::lock(&self.tick_history).iter().cloned().collect()
    }

    /// Snapshot of every agent's visible state, registry order.
    pub fn agent_states(&self) -> Vec<AgentState> {
        self.agents.iter().map(|a| a.state()).collect()
    }

    /// One aggregated snapshot of the floor for operator surfaces.
    pub fn world_state(&self) -> WorldState {
        WorldState {
            tick_count: self.tick_count.load(Ordering::Relaxed),
            running: !*self.shutdown_rx.borrow(),
            agents: self.agent_states(),
            recent_conversations: self.engine.recent_conversations(),
            tokens_used: self.budget.as_ref().map(|b| b.used()),
        }
    }

    // ========================================================================
    // CONVERSATION TRIGGERS
    // ========================================================================

    /// At most one conversation is dispatched per agent per tick: urgent
    /// findings go to the first eligible notify target; otherwise a high
    /// risk level asks the agent to nominate a target.
    async fn evaluate_conversation_triggers(&self, result: &TickResult) {
        let Some(report) = &result.analysis else {
            return;
        };
        let Some(actor) = self.agent(result.agent) else {
            return;
        };
        if actor.is_in_conversation() {
            return;
        }

        if report.urgent && !report.notify_agents.is_empty() {
            for kind in &report.notify_agents {
                if *kind == result.agent {
                    continue;
                }
                let Some(target) = self.agent(*kind) else {
                    continue;
                };
                if target.is_in_conversation() {
                    continue;
                }
                if let Err(e) = self
                    .engine
                    .run_pairwise(actor, target, &report.summary, "urgent_news")
                    .await
                {
                    warn!(initiator = %result.agent, target = %kind, error = %e,
                        "urgent conversation failed to start");
                }
                return;
            }
        } else if report.risk_level == Some(RiskLevel::High) {
            let Some(kind) = actor.decide_conversation_target(&report.summary).await else {
                return;
            };
            let Some(target) = self.agent(kind) else {
                return;
            };
            if target.is_in_conversation() {
                return;
            }
            if let Err(e) = self
                .engine
                .run_pairwise(actor, target, &report.summary, "high_risk")
                .await
            {
                warn!(initiator = %result.agent, target = %kind, error = %e,
                    "high-risk conversation failed to start");
            }
        }
    }

    // ========================================================================
    // MEETINGS
    // ========================================================================

    /// Evaluate the daily slots at the given wall-clock instant. A slot fires
    /// at most once per calendar day and only inside its window; a skip for
    /// lack of participants does not mark the slot done, so it can still fire
    /// later inside the window.
    pub async fn check_meeting_schedule(&self, today: NaiveDate, now: NaiveTime) {
        let due: Vec<MeetingSlot> = self
            .config
            .meeting_schedule
            .due_slots(now)
            .into_iter()
            .filter(|slot| {
                Self::lock(&self.slots_done)
                    .get(&slot.name)
                    .map_or(true, |day| *day != today)
            })
            .collect();

        for slot in due {
            let participants = self.claim_eligible();
            if participants.len() < 2 {
                for p in &participants {
                    p.end_conversation();
                }
                warn!(slot = %slot.name, "meeting skipped, not enough free participants");
                continue;
            }
            Self::lock(&self.slots_done).insert(slot.name, today);
            self.convene(
                pitcrew_core::new_entity_id(),
                participants,
                slot.name.topic(),
                slot.name.as_str(),
            )
            .await;
        }
    }

    /// Operator-triggered meeting; bypasses all schedule gating.
    pub async fn emergency_meeting(&self, topic: &str) -> PitcrewResult<Conversation> {
        let participants = self.claim_eligible();
        if participants.len() < 2 {
            let available = participants.len();
            for p in &participants {
                p.end_conversation();
            }
            return Err(AgentError::NotEnoughParticipants {
                available,
                required: 2,
            }
            .into());
        }
        Ok(self
            .convene(pitcrew_core::new_entity_id(), participants, topic, "emergency")
            .await)
    }

    /// Claim every agent not currently in a conversation, atomically each.
    fn claim_eligible(&self) -> Vec<Arc<AgentRuntime>> {
        self.agents
            .iter()
            .filter(|agent| agent.try_begin_group_conversation())
            .cloned()
            .collect()
    }

    /// Relocate claimed participants to the meeting table, run the meeting,
    /// then unconditionally restore their location and release their flags.
    async fn convene(
        &self,
        id: EntityId,
        participants: Vec<Arc<AgentRuntime>>,
        topic: &str,
        trigger: &str,
    ) -> Conversation {
        let origins: Vec<Zone> = participants.iter().map(|p| p.location()).collect();
        for participant in &participants {
            participant.relocate(Zone::MeetingTable, AgentAction::Talking, "in a meeting");
        }

        let conversation = self
            .engine
            .run_meeting_with_id(id, &participants, topic, trigger)
            .await;

        for (participant, origin) in participants.iter().zip(origins) {
            participant.relocate(origin, AgentAction::Idle, "");
            participant.end_conversation();
        }
        conversation
    }

    // ========================================================================
    // DEBATES
    // ========================================================================

    /// Start an operator debate in the background. Gates, in order: cooldown
    /// since the previous debate *start*, single-flight, participant
    /// availability. The returned ticket carries the id immediately; the
    /// meeting itself runs as a tracked background task.
    pub async fn start_debate(self: &Arc<Self>, topic: &str, subject: Option<&str>) -> DebateTicket {
        let now = Utc::now();
        if let Some(last) = *Self::lock(&self.last_debate_start) {
            let elapsed = (now - last).num_seconds();
            if elapsed < self.config.debate_cooldown_secs {
                return DebateTicket::Cooldown {
                    remaining_seconds: self.config.debate_cooldown_secs - elapsed,
                };
            }
        }
        if let Some(id) = *Self::lock(&self.active_debate) {
            return DebateTicket::Busy {
                conversation_id: id,
            };
        }

        let participants = self.claim_eligible();
        if participants.len() < 2 {
            for p in &participants {
                p.end_conversation();
            }
            return DebateTicket::Unavailable;
        }

        let id = pitcrew_core::new_entity_id();
        *Self::lock(&self.last_debate_start) = Some(now);
        *Self::lock(&self.active_debate) = Some(id);

        let topic = match subject {
            Some(subject) => format!("{topic} (re: {subject})"),
            None => topic.to_string(),
        };
        let manager = Arc::clone(self);
        let handle = tokio::spawn(async move {
            manager
                .convene(id, participants, &topic, "user_debate")
                .await;
            // The in-flight marker is cleared however the debate ended.
            *Self::lock(&manager.active_debate) = None;
        });
        *Self::lock(&self.debate_handle) = Some(handle);

        DebateTicket::Started {
            conversation_id: id,
        }
    }

    /// Join the in-flight background debate, if any. Used by shutdown and
    /// by callers that want completion rather than fire-and-forget.
    pub async fn wait_for_debate(&self) {
        let handle = Self::lock(&self.debate_handle).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "background debate did not finish cleanly");
                *Self::lock(&self.active_debate) = None;
            }
        }
    }

    // ========================================================================
    // OPINION POLLS
    // ========================================================================

    /// Fan an opinion request out to every agent concurrently and classify
    /// how aligned the floor is. Each agent degrades independently to its
    /// neutral placeholder; consensus synthesis is best-effort.
    pub async fn poll_opinions(&self, topic: &str) -> OpinionPoll {
        let opinions = join_all(self.agents.iter().map(|agent| agent.opinion(topic))).await;
        let sentiments: Vec<Sentiment> = opinions.iter().map(|o| o.sentiment).collect();
        let agreement = classify_agreement(&sentiments);

        let opinion_block = opinions
            .iter()
            .map(|o| format!("{} ({:?}): {}", o.name, o.sentiment, o.opinion))
            .collect::<Vec<_>>()
            .join("\n");
        let request = GenerateRequest::new(format!(
            "Topic: {topic}\nThe desk's opinions:\n{opinion_block}\n\n\
             State the desk's consensus in 1-2 sentences."
        ))
        .with_tier(ModelTier::Medium);
        let consensus = self.model.generate(&request).await;
        let consensus = if consensus.trim().is_empty() || is_sentinel(&consensus) {
            CONSENSUS_FALLBACK.to_string()
        } else {
            consensus
        };

        OpinionPoll {
            topic: topic.to_string(),
            opinions,
            agreement,
            consensus,
        }
    }

    // ========================================================================
    // OPERATOR Q&A
    // ========================================================================

    /// Ask one agent a direct question, answered from its own memories and
    /// the operator's account context when supplied.
    pub async fn ask_agent(
        &self,
        kind: AgentKind,
        question: &str,
        account_context: Option<&str>,
    ) -> PitcrewResult<String> {
        let agent = self
            .agent(kind)
            .ok_or(AgentError::NotRegistered { kind })?;
        Ok(agent.respond_to_user(question, account_context).await)
    }
}

impl std::fmt::Debug for FloorManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FloorManager")
            .field("agents", &self.agents.len())
            .field("active_debate", &*Self::lock(&self.active_debate))
            .finish()
    }
}

// ============================================================================
// UNIT TESTS
// ============================================================================
