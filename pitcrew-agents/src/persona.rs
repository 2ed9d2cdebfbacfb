//! Persona trait and the four floor specializations
//!
//! A persona supplies the domain half of an agent: what it watches
//! (`perceive`) and how it interprets what it sees (`analyze`). The runtime
//! supplies everything else. One implementation per specialization is
//! registered with the orchestrator; there is no subclass dispatch.

use async_trait::async_trait;
use pitcrew_core::{AgentKind, AnalysisReport, PitcrewResult, Zone};
use pitcrew_llm::{GenerateRequest, LanguageModel, ModelTier};
use pitcrew_memory::ScoredMemory;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

// ============================================================================
// PERSONA TRAIT
// ============================================================================

/// The pluggable specialization seam.
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait Persona: Send + Sync {
    fn kind(&self) -> AgentKind;

    /// Human-facing display name used in transcripts.
    fn display_name(&self) -> &str;

    /// Where the agent sits when not in a meeting.
    fn home_zone(&self) -> Zone;

    /// Fixed voice/expertise description, injected as the system instruction
    /// for every generation call issued on this agent's behalf.
    fn persona_prompt(&self) -> &str;

    /// Observe the environment. An empty list means "nothing new".
    async fn perceive(&self) -> PitcrewResult<Vec<String>>;

    /// Interpret observations in the light of retrieved memories. None means
    /// "nothing worth reporting".
    async fn analyze(
        &self,
        observations: &[String],
        memories: &[ScoredMemory],
    ) -> PitcrewResult<Option<AnalysisReport>>;
}

// ============================================================================
// OBSERVATION FEEDS
// ============================================================================

/// Source of raw observation strings for a persona. The production feed
/// wraps the market-data pipeline; tests script batches directly.
#[async_trait]
pub trait ObservationFeed: Send + Sync {
    async fn next_observations(&self, kind: AgentKind) -> PitcrewResult<Vec<String>>;
}

/// Scripted feed: batches (or injected failures) are popped in FIFO order,
/// and an empty queue reads as "nothing new".
pub struct QueueFeed {
    queue: Mutex<VecDeque<PitcrewResult<Vec<String>>>>,
}

impl QueueFeed {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
        }
    }

    pub fn push_batch(&self, observations: Vec<String>) {
        self.lock().push_back(Ok(observations));
    }

    pub fn push_error(&self, error: pitcrew_core::PitcrewError) {
        self.lock().push_back(Err(error));
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<PitcrewResult<Vec<String>>>> {
        match self.queue.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for QueueFeed {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObservationFeed for QueueFeed {
    async fn next_observations(&self, _kind: AgentKind) -> PitcrewResult<Vec<String>> {
        self.lock().pop_front().unwrap_or(Ok(Vec::new()))
    }
}

// ============================================================================
// FLOOR PERSONAS
// ============================================================================

/// LLM-backed persona covering all four floor specializations; they differ
/// in identity, home zone, and persona prompt, not in mechanism.
pub struct FloorPersona {
    kind: AgentKind,
    name: String,
    home: Zone,
    prompt: String,
    feed: Arc<dyn ObservationFeed>,
    model: Arc<dyn LanguageModel>,
}

impl FloorPersona {
    pub fn new(
        kind: AgentKind,
        feed: Arc<dyn ObservationFeed>,
        model: Arc<dyn LanguageModel>,
    ) -> Self {
        let (name, home, prompt) = match kind {
            AgentKind::Trend => (
                "Scout",
                Zone::MarketBoard,
                "You are Scout, the market-trend analyst on a trading floor. \
                 You track index direction, sector rotation, and money flow, \
                 and you speak in crisp, data-first sentences.",
            ),
            AgentKind::Advisor => (
                "Sage",
                Zone::AnalysisDesk,
                "You are Sage, the single-name investment advisor on a trading \
                 floor. You weigh technicals against fundamentals for \
                 individual stocks and give measured, actionable calls.",
            ),
            AgentKind::News => (
                "Bolt",
                Zone::NewsTerminal,
                "You are Bolt, the news analyst on a trading floor. You watch \
                 headlines as they break, judge their market impact fast, and \
                 flag anything urgent to the right colleague.",
            ),
            AgentKind::Portfolio => (
                "Ledger",
                Zone::PortfolioBoard,
                "You are Ledger, the portfolio manager on a trading floor. You \
                 care about position sizing, concentration, and risk balance \
                 more than any single trade.",
            ),
        };
        Self {
            kind,
            name: name.to_string(),
            home,
            prompt: prompt.to_string(),
            feed,
            model,
        }
    }

    fn analysis_prompt(&self, observations: &[String], memories: &[ScoredMemory]) -> String {
        let obs_block = observations
            .iter()
            .map(|o| format!("- {o}"))
            .collect::<Vec<_>>()
            .join("\n");
        let memory_block = memories
            .iter()
            .map(|m| format!("- {}", m.record.content))
            .collect::<Vec<_>>()
            .join("\n");
        format!(
            "New observations:\n{obs_block}\n\nRelevant memories:\n{memory_block}\n\n\
             Analyze the observations from your specialty's point of view. \
             Respond with JSON: {{\"summary\": \"...\", \"urgent\": bool, \
             \"risk_level\": \"low|medium|high\", \
             \"notify_agents\": [\"trend|advisor|news|portfolio\"], \
             \"tags\": [\"six-digit codes mentioned\"]}}. \
             Omit fields you have nothing to say about, but always include summary."
        )
    }
}

#[async_trait]
impl Persona for FloorPersona {
    fn kind(&self) -> AgentKind {
        self.kind
    }

    fn display_name(&self) -> &str {
        &self.name
    }

    fn home_zone(&self) -> Zone {
        self.home
    }

    fn persona_prompt(&self) -> &str {
        &self.prompt
    }

    async fn perceive(&self) -> PitcrewResult<Vec<String>> {
        self.feed.next_observations(self.kind).await
    }

    async fn analyze(
        &self,
        observations: &[String],
        memories: &[ScoredMemory],
    ) -> PitcrewResult<Option<AnalysisReport>> {
        if observations.is_empty() {
            return Ok(None);
        }
        let request = GenerateRequest::new(self.analysis_prompt(observations, memories))
            .with_system(self.prompt.clone())
            .with_tier(ModelTier::High);
        let value = self.model.generate_structured(&request).await;
        // Malformed model output reads as "nothing worth reporting".
        Ok(value.as_ref().and_then(AnalysisReport::from_value))
    }
}

impl std::fmt::Debug for FloorPersona {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FloorPersona")
            .field("kind", &self.kind)
            .field("name", &self.name)
            .finish()
    }
}

// ============================================================================
// UNIT TESTS
// ============================================================================
