//! Configuration for the reasoning core.
//!
//! Plain structs with `Default` impls. Callers construct them however they
//! want; no config-file parsing dependencies are introduced.
//!
//! # Example
//!
//! ```rust
//! use noesis::NoesisConfig;
//!
//! let config = NoesisConfig::default();
//! assert_eq!(config.outcome_threshold, 0.7);
//! assert_eq!(config.agent.max_iterations, 10);
//! ```

use crate::noesis::agent_loop::AgentConfig;
use crate::noesis::dual_process::DualProcessConfig;
use crate::noesis::graph::GotConfig;
use crate::noesis::reflection::ReflectionConfig;
use serde::{Deserialize, Serialize};

/// Aggregate configuration consumed at server construction time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoesisConfig {
    /// Success cut for bandit outcome recording.
    pub outcome_threshold: f64,
    pub got: GotConfig,
    pub reflection: ReflectionConfig,
    pub agent: AgentConfig,
    pub dual_process: DualProcessConfig,
}

impl Default for NoesisConfig {
    fn default() -> Self {
        Self {
            outcome_threshold: 0.7,
            got: GotConfig::default(),
            reflection: ReflectionConfig::default(),
            agent: AgentConfig::default(),
            dual_process: DualProcessConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = NoesisConfig::default();
        assert_eq!(config.got.max_active, 10);
        assert_eq!(config.got.max_refinements, 3);
        assert_eq!(config.got.aggregate_min_paths, 2);
        assert!((config.got.prune_threshold - 0.3).abs() < 1e-9);
        assert_eq!(config.reflection.max_iterations, 5);
        assert!((config.reflection.quality_threshold - 0.8).abs() < 1e-9);
        assert!((config.reflection.min_improvement - 0.05).abs() < 1e-9);
        assert!(config.reflection.challenge_assumptions);
        assert_eq!(config.agent.max_tools_per_turn, 5);
        assert!(config.agent.stop_on_error);
    }
}
