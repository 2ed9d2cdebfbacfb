//! PITCREW LLM - Language-Model Abstraction Layer
//!
//! Provider-agnostic trait for text generation, structured (JSON) generation,
//! embeddings, and importance scoring. Actual provider implementations are
//! user-supplied; a deterministic mock ships here for tests.
//!
//! Generation never fails loudly: an unconfigured provider or an exhausted
//! token budget degrades to a fixed sentinel string (or `None` for structured
//! output), so agent loops keep progressing with placeholder content.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use pitcrew_core::EmbeddingVector;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::warn;

// ============================================================================
// SENTINELS
// ============================================================================

/// Fixed text returned in place of generated content when the model is
/// unconfigured or the daily token budget is exhausted.
pub const SENTINEL_UNAVAILABLE: &str = "(model unavailable)";

/// True if `text` is degraded sentinel output rather than real generation.
pub fn is_sentinel(text: &str) -> bool {
    text == SENTINEL_UNAVAILABLE
}

// ============================================================================
// GENERATION REQUESTS
// ============================================================================

/// Quality/cost tier routed to different underlying models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    /// Deep analysis, reflection synthesis, meeting conclusions.
    High,
    /// Utterances and everyday generation.
    Medium,
    /// Short classification calls (target selection, importance scoring).
    Low,
}

/// One generation call. Built with `new` plus `with_*` setters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub prompt: String,
    /// Persona description injected as the system instruction.
    pub system_instruction: Option<String>,
    pub tier: ModelTier,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl GenerateRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system_instruction: None,
            tier: ModelTier::Medium,
            temperature: 0.7,
            max_output_tokens: 1024,
        }
    }

    pub fn with_system(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = Some(instruction.into());
        self
    }

    pub fn with_tier(mut self, tier: ModelTier) -> Self {
        self.tier = tier;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_output_tokens(mut self, max: u32) -> Self {
        self.max_output_tokens = max;
        self
    }
}

// ============================================================================
// LANGUAGE MODEL TRAIT
// ============================================================================

/// Capability surface every backend must satisfy.
/// Implementations must be thread-safe (Send + Sync).
///
/// All four operations degrade instead of raising: `generate` falls back to
/// [`SENTINEL_UNAVAILABLE`], `generate_structured` and `embed` to `None`, and
/// `score_importance` to a neutral 5.0. Callers therefore never need a
/// model-error branch in their control flow.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Generate free text for the request.
    async fn generate(&self, request: &GenerateRequest) -> String;

    /// Generate a JSON value for the request. Returns None when the model
    /// produced output that does not parse as JSON (malformed output), or
    /// when generation degraded to the sentinel.
    async fn generate_structured(&self, request: &GenerateRequest) -> Option<Value>;

    /// Embed a text into a fixed-dimension vector; None when embeddings are
    /// unavailable.
    async fn embed(&self, text: &str) -> Option<EmbeddingVector>;

    /// Rate the importance of a memory's content on a 1-10 scale.
    /// Always in [1, 10]; degrades to 5.0.
    async fn score_importance(&self, text: &str) -> f32;
}

// ============================================================================
// JSON EXTRACTION
// ============================================================================

/// Parse model output as JSON, tolerating Markdown code fences around the
/// payload. Returns None on anything unparseable.
pub fn parse_json_output(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|rest| rest.strip_suffix("```").unwrap_or(rest))
        .unwrap_or(trimmed);
    serde_json::from_str(body.trim()).ok()
}

/// Rough token estimate used for budget accounting: ~4 characters per token.
pub fn estimate_tokens(text: &str) -> u64 {
    (text.len() as u64 / 4).max(1)
}

// ============================================================================
// TOKEN BUDGET
// ============================================================================

/// Daily output-token allowance, reset at the first use on each new calendar
/// day (UTC). Thread-safe; `None` limit means unlimited.
pub struct TokenBudget {
    limit: Option<u64>,
    used: AtomicU64,
    day: Mutex<NaiveDate>,
}

impl TokenBudget {
    pub fn new(limit: Option<u64>) -> Self {
        Self {
            limit,
            used: AtomicU64::new(0),
            day: Mutex::new(Utc::now().date_naive()),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(None)
    }

    /// Roll the counter over if the calendar day has changed.
    fn roll_day(&self) {
        let today = Utc::now().date_naive();
        let mut day = match self.day.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if *day != today {
            *day = today;
            self.used.store(0, Ordering::Relaxed);
        }
    }

    /// Record `tokens` of usage. Returns false when the budget was already
    /// exhausted, in which case nothing is recorded and the caller should
    /// degrade to sentinel output.
    pub fn try_consume(&self, tokens: u64) -> bool {
        self.roll_day();
        match self.limit {
            None => {
                self.used.fetch_add(tokens, Ordering::Relaxed);
                true
            }
            Some(limit) => {
                if self.used.load(Ordering::Relaxed) >= limit {
                    warn!(limit, "daily token budget exhausted, degrading to sentinel output");
                    return false;
                }
                self.used.fetch_add(tokens, Ordering::Relaxed);
                true
            }
        }
    }

    pub fn used(&self) -> u64 {
        self.roll_day();
        self.used.load(Ordering::Relaxed)
    }

    pub fn is_exhausted(&self) -> bool {
        self.roll_day();
        match self.limit {
            None => false,
            Some(limit) => self.used.load(Ordering::Relaxed) >= limit,
        }
    }
}

impl std::fmt::Debug for TokenBudget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBudget")
            .field("limit", &self.limit)
            .field("used", &self.used.load(Ordering::Relaxed))
            .finish()
    }
}

// ============================================================================
// MOCK MODEL FOR TESTING
// ============================================================================

/// Deterministic in-process model for tests.
///
/// Text and structured replies are scripted queues; when a queue runs dry the
/// mock falls back to an echo of the prompt head (text) or None (structured).
/// Embeddings are deterministic unit vectors hashed from the input bytes, so
/// identical texts always embed identically.
pub struct MockLanguageModel {
    dimensions: i32,
    text_replies: Mutex<VecDeque<String>>,
    structured_replies: Mutex<VecDeque<Option<Value>>>,
    importance: Mutex<f32>,
    embeddings_enabled: Mutex<bool>,
    unavailable: Mutex<bool>,
    prompts: Mutex<Vec<String>>,
}

impl MockLanguageModel {
    pub fn new() -> Self {
        Self {
            dimensions: 64,
            text_replies: Mutex::new(VecDeque::new()),
            structured_replies: Mutex::new(VecDeque::new()),
            importance: Mutex::new(5.0),
            embeddings_enabled: Mutex::new(true),
            unavailable: Mutex::new(false),
            prompts: Mutex::new(Vec::new()),
        }
    }

    fn lock<'a, T>(mutex: &'a Mutex<T>) -> std::sync::MutexGuard<'a, T> {
        match mutex.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Queue the next text reply.
    pub fn push_text(&self, reply: impl Into<String>) {
        Self::lock(&self.text_replies).push_back(reply.into());
    }

    /// Queue the next structured reply (None simulates malformed output).
    pub fn push_structured(&self, reply: Option<Value>) {
        Self::lock(&self.structured_replies).push_back(reply);
    }

    /// Fix the importance score returned for every text.
    pub fn set_importance(&self, score: f32) {
        *Self::lock(&self.importance) = score;
    }

    /// Toggle embedding availability (false simulates an embed outage).
    pub fn set_embeddings_enabled(&self, enabled: bool) {
        *Self::lock(&self.embeddings_enabled) = enabled;
    }

    /// Toggle full unavailability (sentinel text, None structured output).
    pub fn set_unavailable(&self, unavailable: bool) {
        *Self::lock(&self.unavailable) = unavailable;
    }

    /// Every prompt seen so far, in call order.
    pub fn prompts(&self) -> Vec<String> {
        Self::lock(&self.prompts).clone()
    }

    fn record(&self, prompt: &str) {
        Self::lock(&self.prompts).push(prompt.to_string());
    }

    fn deterministic_embedding(&self, text: &str) -> Vec<f32> {
        let mut data = vec![0.0f32; self.dimensions as usize];
        for (i, byte) in text.bytes().enumerate() {
            let idx = i % self.dimensions as usize;
            data[idx] += (byte as f32) / 255.0;
        }
        let norm: f32 = data.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut data {
                *x /= norm;
            }
        }
        data
    }
}

impl Default for MockLanguageModel {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MockLanguageModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockLanguageModel")
            .field("dimensions", &self.dimensions)
            .field("prompts_seen", &Self::lock(&self.prompts).len())
            .finish()
    }
}

#[async_trait]
impl LanguageModel for MockLanguageModel {
    async fn generate(&self, request: &GenerateRequest) -> String {
        self.record(&request.prompt);
        if *Self::lock(&self.unavailable) {
            return SENTINEL_UNAVAILABLE.to_string();
        }
        if let Some(reply) = Self::lock(&self.text_replies).pop_front() {
            return reply;
        }
        let head: String = request.prompt.chars().take(48).collect();
        format!("mock reply to: {head}")
    }

    async fn generate_structured(&self, request: &GenerateRequest) -> Option<Value> {
        self.record(&request.prompt);
        if *Self::lock(&self.unavailable) {
            return None;
        }
        Self::lock(&self.structured_replies).pop_front().flatten()
    }

    async fn embed(&self, text: &str) -> Option<EmbeddingVector> {
        if !*Self::lock(&self.embeddings_enabled) || *Self::lock(&self.unavailable) {
            return None;
        }
        Some(EmbeddingVector::new(
            self.deterministic_embedding(text),
            "mock-embed".to_string(),
        ))
    }

    async fn score_importance(&self, _text: &str) -> f32 {
        if *Self::lock(&self.unavailable) {
            return 5.0;
        }
        Self::lock(&self.importance).clamp(1.0, 10.0)
    }
}

// ============================================================================
// UNIT TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_mock_scripted_text_then_echo() {
        let model = MockLanguageModel::new();
        model.push_text("scripted");
        let req = GenerateRequest::new("what is the open doing?");
        assert_eq!(model.generate(&req).await, "scripted");
        assert!(model.generate(&req).await.starts_with("mock reply to:"));
    }

    #[tokio::test]
    async fn test_mock_unavailable_degrades_to_sentinel() {
        let model = MockLanguageModel::new();
        model.set_unavailable(true);
        let reply = model.generate(&GenerateRequest::new("x")).await;
        assert!(is_sentinel(&reply));
        assert!(model.generate_structured(&GenerateRequest::new("x")).await.is_none());
        assert!(model.embed("x").await.is_none());
        assert_eq!(model.score_importance("x").await, 5.0);
    }

    #[tokio::test]
    async fn test_mock_structured_queue_and_malformed() {
        let model = MockLanguageModel::new();
        model.push_structured(Some(json!({"summary": "s"})));
        model.push_structured(None);
        let req = GenerateRequest::new("analyze");
        assert!(model.generate_structured(&req).await.is_some());
        assert!(model.generate_structured(&req).await.is_none());
        // Empty queue also reads as malformed.
        assert!(model.generate_structured(&req).await.is_none());
    }

    #[tokio::test]
    async fn test_mock_embeddings_deterministic_and_unit_norm() {
        let model = MockLanguageModel::new();
        let a = model.embed("semiconductor rally").await.unwrap();
        let b = model.embed("semiconductor rally").await.unwrap();
        assert_eq!(a, b);
        let norm: f32 = a.data.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_mock_importance_clamped() {
        let model = MockLanguageModel::new();
        model.set_importance(23.0);
        assert_eq!(model.score_importance("x").await, 10.0);
        model.set_importance(-1.0);
        assert_eq!(model.score_importance("x").await, 1.0);
    }

    #[tokio::test]
    async fn test_mock_records_prompts() {
        let model = MockLanguageModel::new();
        model.generate(&GenerateRequest::new("first")).await;
        model
            .generate_structured(&GenerateRequest::new("second"))
            .await;
        assert_eq!(model.prompts(), vec!["first", "second"]);
    }

    #[test]
    fn test_parse_json_output_plain_and_fenced() {
        assert_eq!(
            parse_json_output(r#"{"a": 1}"#),
            Some(json!({"a": 1}))
        );
        assert_eq!(
            parse_json_output("```json\n{\"a\": 1}\n```"),
            Some(json!({"a": 1}))
        );
        assert_eq!(
            parse_json_output("```\n[1, 2]\n```"),
            Some(json!([1, 2]))
        );
        assert!(parse_json_output("the market feels heavy").is_none());
    }

    #[test]
    fn test_request_builder_defaults() {
        let req = GenerateRequest::new("p");
        assert_eq!(req.tier, ModelTier::Medium);
        assert_eq!(req.max_output_tokens, 1024);
        assert!(req.system_instruction.is_none());

        let req = req.with_system("persona").with_tier(ModelTier::Low);
        assert_eq!(req.system_instruction.as_deref(), Some("persona"));
        assert_eq!(req.tier, ModelTier::Low);
    }

    #[test]
    fn test_budget_unlimited_never_exhausts() {
        let budget = TokenBudget::unlimited();
        assert!(budget.try_consume(1_000_000));
        assert!(!budget.is_exhausted());
        assert_eq!(budget.used(), 1_000_000);
    }

    #[test]
    fn test_budget_exhaustion_blocks_consumption() {
        let budget = TokenBudget::new(Some(100));
        assert!(budget.try_consume(60));
        assert!(budget.try_consume(60));
        // Past the limit now; further consumption is refused.
        assert!(budget.is_exhausted());
        assert!(!budget.try_consume(1));
        assert_eq!(budget.used(), 120);
    }

    #[test]
    fn test_estimate_tokens_floor() {
        assert_eq!(estimate_tokens(""), 1);
        assert_eq!(estimate_tokens("abcdefgh"), 2);
    }
}
