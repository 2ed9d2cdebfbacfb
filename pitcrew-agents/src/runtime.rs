//! Agent runtime: one persona's state plus the per-tick behavior loop
//!
//! The loop is perceive -> retrieve -> react -> act -> reflect, terminal each
//! cycle. A tick never propagates an error to its caller; failures come back
//! as a result with an error field, so one broken agent cannot stall the
//! scheduler batch.

use chrono::{Local, NaiveDate, NaiveTime, Utc};
use pitcrew_core::{
    AgentAction, AgentKind, AgentOpinion, AgentState, ConversationMessage, MemoryKind, Plan,
    PlanItem, TickOutcome, TickResult, Zone,
};
use pitcrew_llm::{is_sentinel, GenerateRequest, LanguageModel, ModelTier};
use pitcrew_memory::MemoryStream;
use pitcrew_storage::PlanStore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, warn};

use crate::persona::Persona;
use crate::contains_urgent_keyword;

// Tick-loop bounds.
const MAX_OBSERVATIONS_PER_TICK: usize = 5;
const QUERY_OBSERVATIONS: usize = 3;
const RETRIEVE_TOP_K: usize = 10;

// Reflection bounds.
const REFLECTION_SOURCE: usize = 100;
const REFLECTION_MIN_MEMORIES: usize = 5;
const REFLECTION_SUMMARY: usize = 30;
const REFLECTION_QUESTIONS: usize = 2;
const REFLECTION_TOP_K: usize = 15;

// Planning and dialogue bounds.
const PLANNING_CONTEXT: usize = 20;
const PLAN_SUMMARY_ITEMS: usize = 5;
const UTTERANCE_HISTORY: usize = 6;
const UTTERANCE_MEMORIES: usize = 5;
const USER_RESPONSE_MEMORIES: usize = 15;

/// One agent on the floor: persona, memory stream, world state, and the
/// exclusive conversation flag.
///
/// All handles are injected at construction; the runtime owns no globals.
pub struct AgentRuntime {
    persona: Arc<dyn Persona>,
    stream: Arc<MemoryStream>,
    model: Arc<dyn LanguageModel>,
    plan_store: Arc<dyn PlanStore>,
    state: RwLock<AgentState>,
    plan: RwLock<Option<Plan>>,
    in_conversation: AtomicBool,
    partner: Mutex<Option<AgentKind>>,
}

impl AgentRuntime {
    pub fn new(
        persona: Arc<dyn Persona>,
        stream: Arc<MemoryStream>,
        model: Arc<dyn LanguageModel>,
        plan_store: Arc<dyn PlanStore>,
    ) -> Self {
        let state = AgentState::new(
            persona.kind(),
            persona.display_name().to_string(),
            persona.home_zone(),
        );
        Self {
            persona,
            stream,
            model,
            plan_store,
            state: RwLock::new(state),
            plan: RwLock::new(None),
            in_conversation: AtomicBool::new(false),
            partner: Mutex::new(None),
        }
    }

    pub fn kind(&self) -> AgentKind {
        self.persona.kind()
    }

    pub fn name(&self) -> &str {
        self.persona.display_name()
    }

    pub fn persona_prompt(&self) -> &str {
        self.persona.persona_prompt()
    }

    pub fn memory(&self) -> &MemoryStream {
        &self.stream
    }

    // ========================================================================
    // WORLD STATE
    // ========================================================================

    fn state_read(&self) -> AgentState {
        match self.state.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn state_update(&self, f: impl FnOnce(&mut AgentState)) {
        let mut guard = match self.state.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard);
    }

    /// Snapshot of the agent's visible state, conversation flag included.
    pub fn state(&self) -> AgentState {
        let mut snapshot = self.state_read();
        snapshot.in_conversation = self.is_in_conversation();
        snapshot.conversation_partner = *self.partner_lock();
        snapshot
    }

    pub fn location(&self) -> Zone {
        self.state_read().location
    }

    /// Move the agent and set what it is visibly doing.
    pub fn relocate(&self, zone: Zone, action: AgentAction, description: impl Into<String>) {
        let description = description.into();
        self.state_update(|s| {
            s.location = zone;
            s.action = action;
            s.action_description = description;
        });
    }

    /// Set what the agent is visibly doing without moving it.
    pub fn set_activity(&self, action: AgentAction, description: impl Into<String>) {
        let description = description.into();
        self.state_update(|s| {
            s.action = action;
            s.action_description = description;
        });
    }

    // ========================================================================
    // CONVERSATION EXCLUSIVITY
    // ========================================================================

    fn partner_lock(&self) -> std::sync::MutexGuard<'_, Option<AgentKind>> {
        match self.partner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Atomically claim the agent for a conversation. Returns false when the
    /// agent is already talking; the check and the set are one CAS, so two
    /// concurrent claims cannot both win.
    pub fn try_begin_conversation(&self, partner: AgentKind) -> bool {
        if self
            .in_conversation
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            *self.partner_lock() = Some(partner);
            true
        } else {
            false
        }
    }

    /// Claim the agent for a group conversation (meeting or debate), where
    /// there is no single partner. Same CAS as the pairwise claim.
    pub fn try_begin_group_conversation(&self) -> bool {
        self.in_conversation
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Release the conversation claim. Idempotent; called on every exit path
    /// of the conversation engine.
    pub fn end_conversation(&self) {
        *self.partner_lock() = None;
        self.in_conversation.store(false, Ordering::Release);
    }

    pub fn is_in_conversation(&self) -> bool {
        self.in_conversation.load(Ordering::Acquire)
    }

    // ========================================================================
    // TICK LOOP
    // ========================================================================

    /// Run one full cycle. Never returns an error; failures are folded into
    /// the result's error field with outcome `Error`.
    pub async fn tick(&self) -> TickResult {
        let today = Local::now().date_naive();
        self.ensure_daily_plan(today).await;

        let observations = match self.persona.perceive().await {
            Ok(observations) => observations,
            Err(e) => {
                self.set_activity(AgentAction::Idle, "");
                return TickResult::failed(self.kind(), self.name(), self.location(), e.to_string());
            }
        };

        if observations.is_empty() {
            self.set_activity(AgentAction::Idle, "");
            return self.result(TickOutcome::Idle, None, Vec::new());
        }

        for obs in observations.iter().take(MAX_OBSERVATIONS_PER_TICK) {
            self.stream.add_observation(obs.clone()).await;
        }

        let query = observations
            .iter()
            .take(QUERY_OBSERVATIONS)
            .cloned()
            .collect::<Vec<_>>()
            .join(" ");
        let memories = self.stream.retrieve(&query, RETRIEVE_TOP_K, None, None).await;

        let (outcome, analysis) = if self.should_react(&observations, Local::now().time()) {
            self.set_activity(AgentAction::Analyzing, "digging into new information");
            match self.persona.analyze(&observations, &memories).await {
                Ok(Some(report)) => {
                    self.stream
                        .add(
                            format!("Analysis complete: {}", report.summary),
                            MemoryKind::Observation,
                            None,
                            report.tags.clone(),
                        )
                        .await;
                    if report.urgent {
                        self.set_activity(AgentAction::Alerting, report.summary.clone());
                    }
                    (TickOutcome::Analyzed, Some(report))
                }
                Ok(None) => (TickOutcome::ContinuedPlan, None),
                Err(e) => {
                    self.set_activity(AgentAction::Idle, "");
                    return TickResult::failed(
                        self.kind(),
                        self.name(),
                        self.location(),
                        e.to_string(),
                    );
                }
            }
        } else {
            let description = self
                .current_plan_action(Local::now().time())
                .unwrap_or_default();
            self.set_activity(AgentAction::Observing, description);
            (TickOutcome::ContinuedPlan, None)
        };

        let reflections = if self.stream.should_reflect() {
            self.run_reflection().await
        } else {
            Vec::new()
        };

        self.result(outcome, analysis, reflections)
    }

    fn result(
        &self,
        outcome: TickOutcome,
        analysis: Option<pitcrew_core::AnalysisReport>,
        reflections: Vec<String>,
    ) -> TickResult {
        let state = self.state_read();
        TickResult {
            agent: self.kind(),
            name: self.name().to_string(),
            timestamp: Utc::now(),
            outcome,
            analysis,
            reflections,
            error: None,
            location: state.location,
            action: state.action,
            action_description: state.action_description,
        }
    }

    /// Deterministic reaction rule, evaluated in order: urgent keywords
    /// always react, an active plan item suppresses reaction, no plan to
    /// fall back on means react.
    pub fn should_react(&self, observations: &[String], now: NaiveTime) -> bool {
        if contains_urgent_keyword(observations) {
            return true;
        }
        if self.current_plan_action(now).is_some() {
            return false;
        }
        true
    }

    fn current_plan_action(&self, now: NaiveTime) -> Option<String> {
        let guard = match self.plan.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard
            .as_ref()
            .and_then(|plan| plan.current_item(now))
            .map(|item| item.action.clone())
    }

    // ========================================================================
    // REFLECTION
    // ========================================================================

    /// Synthesize up to two insight memories from recent history. The
    /// accumulator is reset exactly once at the end, regardless of how many
    /// insights were produced, including the too-few-memories abort.
    pub async fn run_reflection(&self) -> Vec<String> {
        let recent = self.stream.retrieve_recent(REFLECTION_SOURCE).await;
        if recent.len() < REFLECTION_MIN_MEMORIES {
            self.stream.reset_reflection_accumulator();
            return Vec::new();
        }

        self.set_activity(AgentAction::Thinking, "reflecting on recent events");

        let context = recent
            .iter()
            .take(REFLECTION_SUMMARY)
            .map(|r| format!("- {}", r.content))
            .collect::<Vec<_>>()
            .join("\n");
        let question_request = GenerateRequest::new(format!(
            "Recent memories:\n{context}\n\nWhat are the {REFLECTION_QUESTIONS} most \
             important high-level questions these memories raise about the market? \
             Respond with a JSON array of {REFLECTION_QUESTIONS} question strings."
        ))
        .with_system(self.persona_prompt().to_string())
        .with_tier(ModelTier::High);

        let questions: Vec<String> = self
            .model
            .generate_structured(&question_request)
            .await
            .and_then(|v| v.as_array().cloned())
            .map(|arr| {
                arr.iter()
                    .filter_map(|q| q.as_str().map(str::to_string))
                    .take(REFLECTION_QUESTIONS)
                    .collect()
            })
            .unwrap_or_default();

        let mut insights = Vec::new();
        for question in &questions {
            let hits = self
                .stream
                .retrieve(question, REFLECTION_TOP_K, None, None)
                .await;
            let evidence = hits
                .iter()
                .map(|h| format!("- {}", h.record.content))
                .collect::<Vec<_>>()
                .join("\n");
            let insight_request = GenerateRequest::new(format!(
                "Question: {question}\nEvidence from your memories:\n{evidence}\n\n\
                 Answer the question as a 2-3 sentence insight."
            ))
            .with_system(self.persona_prompt().to_string())
            .with_tier(ModelTier::High);
            let insight = self.model.generate(&insight_request).await;
            if insight.trim().is_empty() || is_sentinel(&insight) {
                continue;
            }
            let tags = pitcrew_core::extract_topic_codes(&insight);
            if self.stream.add_reflection(insight.clone(), tags).await.is_some() {
                insights.push(insight);
            }
        }

        self.stream.reset_reflection_accumulator();
        debug!(agent = %self.kind(), insights = insights.len(), "reflection pass finished");
        insights
    }

    // ========================================================================
    // DAILY PLANNING
    // ========================================================================

    async fn ensure_daily_plan(&self, today: NaiveDate) {
        let stale = {
            let guard = match self.plan.read() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard.as_ref().map_or(true, |plan| plan.generated_on != today)
        };
        if stale {
            self.create_daily_plan(today).await;
        }
    }

    /// Generate and install today's plan. At most one generation per calendar
    /// day; a malformed or empty model result falls back to the fixed
    /// default day.
    pub async fn create_daily_plan(&self, today: NaiveDate) -> Plan {
        let recent = self.stream.retrieve_recent(PLANNING_CONTEXT).await;
        let context = recent
            .iter()
            .map(|r| format!("- {}", r.content))
            .collect::<Vec<_>>()
            .join("\n");
        let request = GenerateRequest::new(format!(
            "Your recent memories:\n{context}\n\nPlan your trading day. Respond with a \
             JSON array of steps, each {{\"time\": \"HH:MM\", \"action\": \"...\", \
             \"duration_minutes\": n}}, ordered by time from pre-market to close."
        ))
        .with_system(self.persona_prompt().to_string())
        .with_tier(ModelTier::Medium);

        let items: Vec<PlanItem> = self
            .model
            .generate_structured(&request)
            .await
            .and_then(|v| v.as_array().cloned())
            .map(|arr| arr.iter().filter_map(PlanItem::from_value).collect())
            .unwrap_or_default();

        let plan = if items.is_empty() {
            warn!(agent = %self.kind(), "plan generation unusable, using fallback");
            Plan::fallback(today)
        } else {
            Plan::new(today, items)
        };

        if let Err(e) = self.plan_store.plan_insert(self.kind(), &plan).await {
            warn!(agent = %self.kind(), error = %e, "plan persist failed");
        }
        self.stream
            .add_plan_summary(format!("Today's plan: {}", plan.summary(PLAN_SUMMARY_ITEMS)))
            .await;

        let mut guard = match self.plan.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Some(plan.clone());
        plan
    }

    // ========================================================================
    // DIALOGUE SUPPORT
    // ========================================================================

    /// Produce the agent's next utterance in a conversation, from the recent
    /// transcript and the memories most relevant to the topic.
    pub async fn generate_utterance(
        &self,
        history: &[ConversationMessage],
        topic: &str,
        listener: &str,
    ) -> String {
        let start = history.len().saturating_sub(UTTERANCE_HISTORY);
        let transcript = history[start..]
            .iter()
            .map(|m| format!("{}: {}", m.speaker_name, m.content))
            .collect::<Vec<_>>()
            .join("\n");
        let memories = self
            .stream
            .retrieve(topic, UTTERANCE_MEMORIES, None, None)
            .await;
        let memory_block = memories
            .iter()
            .map(|m| format!("- {}", m.record.content))
            .collect::<Vec<_>>()
            .join("\n");
        let request = GenerateRequest::new(format!(
            "You are talking with {listener} about: {topic}\n\nThe exchange so far:\n\
             {transcript}\n\nYour relevant memories:\n{memory_block}\n\n\
             Give your next utterance, 1-2 sentences, in your own voice."
        ))
        .with_system(self.persona_prompt().to_string())
        .with_tier(ModelTier::Medium);
        self.model.generate(&request).await
    }

    /// Short classification call: which colleague should hear about this
    /// first? Returns None on an unusable or self-referential answer.
    pub async fn decide_conversation_target(&self, context: &str) -> Option<AgentKind> {
        let request = GenerateRequest::new(format!(
            "Context: {context}\n\nWhich colleague should hear this first? \
             Answer with exactly one word: trend, advisor, news, or portfolio."
        ))
        .with_system(self.persona_prompt().to_string())
        .with_tier(ModelTier::Low)
        .with_max_output_tokens(16);
        let reply = self.model.generate(&request).await;
        AgentKind::parse(&reply).filter(|kind| *kind != self.kind())
    }

    /// The agent's opinion on a topic, with sentiment and confidence. Falls
    /// back to a neutral placeholder when generation is unusable.
    pub async fn opinion(&self, topic: &str) -> AgentOpinion {
        let memories = self.stream.retrieve(topic, UTTERANCE_MEMORIES, None, None).await;
        let memory_block = memories
            .iter()
            .map(|m| format!("- {}", m.record.content))
            .collect::<Vec<_>>()
            .join("\n");
        let request = GenerateRequest::new(format!(
            "Topic: {topic}\nYour relevant memories:\n{memory_block}\n\n\
             Give your opinion as JSON: {{\"opinion\": \"...\", \"sentiment\": \
             \"bullish|bearish|neutral\", \"confidence\": 0.0-1.0, \
             \"key_points\": [\"...\"]}}."
        ))
        .with_system(self.persona_prompt().to_string())
        .with_tier(ModelTier::Medium);
        self.model
            .generate_structured(&request)
            .await
            .and_then(|v| AgentOpinion::from_value(self.kind(), self.name(), &v))
            .unwrap_or_else(|| AgentOpinion::fallback(self.kind(), self.name()))
    }

    /// Answer an operator question directly, grounded in retrieved memories
    /// and, when supplied, the operator's account context. The exchange is
    /// recorded as a conversation memory.
    pub async fn respond_to_user(&self, question: &str, account_context: Option<&str>) -> String {
        let memories = self
            .stream
            .retrieve(question, USER_RESPONSE_MEMORIES, None, None)
            .await;
        let memory_block = memories
            .iter()
            .map(|m| format!("- {}", m.record.content))
            .collect::<Vec<_>>()
            .join("\n");
        let context_block = account_context
            .map(|c| format!("Operator account context:\n{c}\n"))
            .unwrap_or_default();
        let request = GenerateRequest::new(format!(
            "The desk operator asks: {question}\n{context_block}Your relevant \
             memories:\n{memory_block}\n\nAnswer directly and concretely, 2-3 sentences."
        ))
        .with_system(self.persona_prompt().to_string())
        .with_tier(ModelTier::Medium);
        let answer = self.model.generate(&request).await;
        if !answer.trim().is_empty() && !is_sentinel(&answer) {
            self.stream
                .add_conversation_note(format!(
                    "The operator asked about '{question}'. I answered: {answer}"
                ))
                .await;
        }
        answer
    }
}

impl std::fmt::Debug for AgentRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRuntime")
            .field("kind", &self.kind())
            .field("name", &self.name())
            .field("in_conversation", &self.is_in_conversation())
            .finish()
    }
}

// ============================================================================
// UNIT TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persona::{FloorPersona, QueueFeed};
    use pitcrew_core::FloorConfig;
    use pitcrew_llm::MockLanguageModel;
    use pitcrew_storage::{InMemoryStore, MemoryStore};
    use serde_json::json;

    struct Rig {
        runtime: AgentRuntime,
        feed: Arc<QueueFeed>,
        model: Arc<MockLanguageModel>,
        store: Arc<InMemoryStore>,
    }

    fn rig(kind: AgentKind) -> Rig {
        let feed = Arc::new(QueueFeed::new());
        let model = Arc::new(MockLanguageModel::new());
        let store = Arc::new(InMemoryStore::new());
        let persona = Arc::new(FloorPersona::new(kind, feed.clone(), model.clone()));
        let stream = Arc::new(MemoryStream::new(
            kind,
            store.clone(),
            model.clone(),
            FloorConfig::default(),
        ));
        let runtime = AgentRuntime::new(persona, stream, model.clone(), store.clone());
        Rig {
            runtime,
            feed,
            model,
            store,
        }
    }

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[tokio::test]
    async fn test_tick_with_nothing_to_see_is_idle() {
        let rig = rig(AgentKind::News);
        let result = rig.runtime.tick().await;
        assert_eq!(result.outcome, TickOutcome::Idle);
        assert_eq!(result.action, AgentAction::Idle);
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn test_tick_persists_at_most_five_observations() {
        let rig = rig(AgentKind::News);
        rig.feed.push_batch(
            (0..7).map(|i| format!("headline {i}")).collect(),
        );
        rig.runtime.tick().await;
        let observations = rig
            .store
            .memory_list_recent(AgentKind::News, Some(&[MemoryKind::Observation]), 50, 0)
            .await
            .unwrap();
        assert_eq!(observations.len(), MAX_OBSERVATIONS_PER_TICK);
    }

    #[tokio::test]
    async fn test_tick_isolates_perceive_failure() {
        let rig = rig(AgentKind::News);
        rig.feed.push_error(
            pitcrew_core::StorageError::QueryFailed {
                what: "feed".to_string(),
                reason: "offline".to_string(),
            }
            .into(),
        );
        let result = rig.runtime.tick().await;
        assert_eq!(result.outcome, TickOutcome::Error);
        assert!(result.error.as_deref().unwrap().contains("offline"));
    }

    #[tokio::test]
    async fn test_tick_analyzed_outcome() {
        let rig = rig(AgentKind::News);
        rig.feed
            .push_batch(vec!["breaking: chipmaker halts fab".to_string()]);
        // First structured call is plan generation; second is the analysis.
        rig.model.push_structured(None);
        rig.model.push_structured(Some(json!({
            "summary": "Fab halt will squeeze supply",
            "urgent": true,
            "notify_agents": ["advisor"]
        })));
        let result = rig.runtime.tick().await;
        assert_eq!(result.outcome, TickOutcome::Analyzed);
        let report = result.analysis.unwrap();
        assert!(report.urgent);
        assert_eq!(result.action, AgentAction::Alerting);
    }

    #[tokio::test]
    async fn test_should_react_rule_order() {
        let rig = rig(AgentKind::Trend);
        // Install the fallback plan (covers 08:30 to end of day).
        rig.model.push_structured(None);
        rig.runtime
            .create_daily_plan(Local::now().date_naive())
            .await;

        let urgent = vec!["index crash underway".to_string()];
        let calm = vec!["drifting sideways".to_string()];

        // Urgent keyword wins over an active plan item.
        assert!(rig.runtime.should_react(&urgent, t(10, 0)));
        // Active plan item suppresses reaction.
        assert!(!rig.runtime.should_react(&calm, t(10, 0)));
        // No plan item active before the day starts.
        assert!(rig.runtime.should_react(&calm, t(7, 0)));
    }

    #[tokio::test]
    async fn test_should_react_without_any_plan() {
        let rig = rig(AgentKind::Trend);
        assert!(rig
            .runtime
            .should_react(&["quiet".to_string()], t(10, 0)));
    }

    #[tokio::test]
    async fn test_conversation_flag_is_exclusive() {
        let rig = rig(AgentKind::News);
        assert!(rig.runtime.try_begin_conversation(AgentKind::Trend));
        assert!(!rig.runtime.try_begin_conversation(AgentKind::Advisor));
        assert!(rig.runtime.is_in_conversation());
        assert_eq!(
            rig.runtime.state().conversation_partner,
            Some(AgentKind::Trend)
        );

        rig.runtime.end_conversation();
        assert!(!rig.runtime.is_in_conversation());
        assert!(rig.runtime.try_begin_conversation(AgentKind::Advisor));
    }

    #[tokio::test]
    async fn test_reflection_produces_insights_and_resets() {
        let rig = rig(AgentKind::Advisor);
        rig.model.set_importance(10.0);
        for i in 0..5 {
            rig.runtime
                .memory()
                .add_observation(format!("position note {i} on 005930"))
                .await;
        }
        assert!(rig.runtime.memory().should_reflect());

        rig.model
            .push_structured(Some(json!(["What drives 005930?", "Is risk rising?"])));
        rig.model.push_text("005930 momentum rests on export orders.");
        rig.model.push_text("Risk is building in concentrated names.");

        let insights = rig.runtime.run_reflection().await;
        assert_eq!(insights.len(), 2);
        assert_eq!(rig.runtime.memory().accumulated_importance(), 0.0);

        let reflections = rig
            .store
            .memory_list_recent(AgentKind::Advisor, Some(&[MemoryKind::Reflection]), 10, 0)
            .await
            .unwrap();
        assert_eq!(reflections.len(), 2);
        assert_eq!(reflections[1].tags, vec!["005930".to_string()]);
    }

    #[tokio::test]
    async fn test_reflection_aborts_below_minimum_but_still_resets() {
        let rig = rig(AgentKind::Advisor);
        rig.model.set_importance(10.0);
        rig.runtime.memory().add_observation("only one").await;
        assert_eq!(rig.runtime.memory().accumulated_importance(), 10.0);

        let insights = rig.runtime.run_reflection().await;
        assert!(insights.is_empty());
        assert_eq!(rig.runtime.memory().accumulated_importance(), 0.0);
    }

    #[tokio::test]
    async fn test_reflection_skips_sentinel_insights() {
        let rig = rig(AgentKind::Advisor);
        for i in 0..5 {
            rig.runtime
                .memory()
                .add_observation(format!("note {i}"))
                .await;
        }
        rig.model.push_structured(Some(json!(["q1", "q2"])));
        rig.model.push_text(pitcrew_llm::SENTINEL_UNAVAILABLE);
        rig.model.push_text("A real insight survives.");
        let insights = rig.runtime.run_reflection().await;
        assert_eq!(insights, vec!["A real insight survives.".to_string()]);
    }

    #[tokio::test]
    async fn test_daily_plan_parses_model_items() {
        let rig = rig(AgentKind::Portfolio);
        rig.model.push_structured(Some(json!([
            {"time": "08:45", "action": "Rebalance check", "duration_minutes": 45},
            {"time": "13:00", "action": "Exposure review"}
        ])));
        let plan = rig
            .runtime
            .create_daily_plan(Local::now().date_naive())
            .await;
        assert_eq!(plan.items.len(), 2);
        assert_eq!(plan.items[0].action, "Rebalance check");
        assert_eq!(plan.items[1].duration_minutes, 30);

        // Persisted and summarized.
        let stored = rig
            .store
            .plan_get_latest(AgentKind::Portfolio)
            .await
            .unwrap();
        assert_eq!(stored.unwrap().items.len(), 2);
        let summaries = rig
            .store
            .memory_list_recent(AgentKind::Portfolio, Some(&[MemoryKind::Plan]), 10, 0)
            .await
            .unwrap();
        assert_eq!(summaries.len(), 1);
    }

    #[tokio::test]
    async fn test_daily_plan_falls_back_on_malformed_output() {
        let rig = rig(AgentKind::Portfolio);
        rig.model.push_structured(Some(json!("not an array")));
        let plan = rig
            .runtime
            .create_daily_plan(Local::now().date_naive())
            .await;
        assert_eq!(plan.items.len(), 7);
    }

    #[tokio::test]
    async fn test_daily_plan_generated_once_per_day() {
        let rig = rig(AgentKind::News);
        // Idle ticks still ensure a plan exists; the second tick must not
        // regenerate it.
        rig.runtime.tick().await;
        let prompts_after_first = rig.model.prompts().len();
        rig.runtime.tick().await;
        assert_eq!(rig.model.prompts().len(), prompts_after_first);
    }

    #[tokio::test]
    async fn test_decide_conversation_target() {
        let rig = rig(AgentKind::News);
        rig.model.push_text("advisor");
        assert_eq!(
            rig.runtime.decide_conversation_target("fab halt").await,
            Some(AgentKind::Advisor)
        );

        // Self-nomination is rejected.
        rig.model.push_text("news");
        assert_eq!(rig.runtime.decide_conversation_target("x").await, None);

        rig.model.push_text("the weather desk");
        assert_eq!(rig.runtime.decide_conversation_target("x").await, None);
    }

    #[tokio::test]
    async fn test_opinion_falls_back_to_neutral() {
        let rig = rig(AgentKind::Trend);
        let opinion = rig.runtime.opinion("rate path").await;
        assert_eq!(opinion.sentiment, pitcrew_core::Sentiment::Neutral);
        assert_eq!(opinion.confidence, 0.0);
        assert_eq!(opinion.name, "Scout");
    }

    #[tokio::test]
    async fn test_opinion_parses_model_output() {
        let rig = rig(AgentKind::Trend);
        rig.model.push_structured(Some(json!({
            "opinion": "Uptrend intact",
            "sentiment": "bullish",
            "confidence": 0.7,
            "key_points": ["breadth improving"]
        })));
        let opinion = rig.runtime.opinion("trend").await;
        assert_eq!(opinion.sentiment, pitcrew_core::Sentiment::Bullish);
        assert_eq!(opinion.key_points, vec!["breadth improving".to_string()]);
    }

    #[tokio::test]
    async fn test_respond_to_user_records_the_exchange() {
        let rig = rig(AgentKind::Advisor);
        rig.model.push_text("Hold the position.");
        let answer = rig
            .runtime
            .respond_to_user("sell now?", Some("cash weight 35%"))
            .await;
        assert_eq!(answer, "Hold the position.");
        assert!(rig
            .model
            .prompts()
            .iter()
            .any(|p| p.contains("cash weight 35%")));
        let notes = rig
            .store
            .memory_list_recent(AgentKind::Advisor, Some(&[MemoryKind::Conversation]), 10, 0)
            .await
            .unwrap();
        assert_eq!(notes.len(), 1);
        assert!(notes[0].content.contains("sell now?"));
    }

    #[tokio::test]
    async fn test_utterance_uses_last_six_history_messages() {
        let rig = rig(AgentKind::News);
        let mut history = Vec::new();
        for i in 0..8 {
            history.push(ConversationMessage {
                turn: i,
                speaker: AgentKind::Trend,
                speaker_name: "Scout".to_string(),
                content: format!("line {i}"),
                timestamp: Utc::now(),
                round: None,
            });
        }
        rig.model.push_text("my reply");
        let reply = rig
            .runtime
            .generate_utterance(&history, "topic", "Scout")
            .await;
        assert_eq!(reply, "my reply");
        let prompt = rig.model.prompts().last().unwrap().clone();
        assert!(prompt.contains("line 7"));
        assert!(prompt.contains("line 2"));
        assert!(!prompt.contains("line 1"));
    }
}
