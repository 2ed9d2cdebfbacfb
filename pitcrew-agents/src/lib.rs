//! PITCREW Agents - Agent runtimes and floor personas
//!
//! An [`AgentRuntime`] owns one persona's mutable world state and runs the
//! perceive -> retrieve -> react -> act -> reflect loop once per tick. The
//! pluggable [`Persona`] trait supplies the specialization: what the agent
//! watches and how it analyzes what it sees.

pub mod persona;
pub mod runtime;

pub use persona::{FloorPersona, ObservationFeed, Persona, QueueFeed};
pub use runtime::AgentRuntime;

/// Keywords that force a reaction regardless of any active plan item.
pub const URGENT_KEYWORDS: [&str; 8] = [
    "surge",
    "plunge",
    "breaking",
    "circuit breaker",
    "surprise",
    "crash",
    "urgent",
    "halt",
];

/// True if any observation contains an urgent keyword (case-insensitive).
pub fn contains_urgent_keyword(observations: &[String]) -> bool {
    observations.iter().any(|obs| {
        let lowered = obs.to_lowercase();
        URGENT_KEYWORDS.iter().any(|kw| lowered.contains(kw))
    })
}
