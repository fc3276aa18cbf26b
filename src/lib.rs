// src/lib.rs

// Import the top-level `noesis` module.
pub mod noesis;

// Re-export the component modules at the crate root so callers can write
// noesis::got::GotController instead of noesis::noesis::got::GotController.
pub use noesis::{
    agent_loop, backtrack, bandit, clients, config, detectors, dual_process, error, got, graph,
    llm, modes, reflection, server, storage, tool_protocol, tools, types,
};

// Re-exporting key items for easier external access.
pub use noesis::config::NoesisConfig;
pub use noesis::error::NoesisError;
pub use noesis::llm::{ChatLlm, ReasoningLlm};
pub use noesis::modes::{ThinkingMode, ThoughtInput, ThoughtResult};
pub use noesis::server::ReasoningCore;
pub use noesis::storage::{MemoryStorage, Storage};
pub use noesis::types::{Branch, CrossRef, Insight, Thought, ThoughtMode};
