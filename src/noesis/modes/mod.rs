//! Thinking modes: the cognitive strategies a thought can be routed through.
//!
//! # Architecture
//!
//! ```text
//! caller → AutoMode (selector) → ModeRegistry → ThinkingMode
//!                                   ├─ divergent (creative / rebellion)
//!                                   ├─ tree      (branch-scoped)
//!                                   └─ linear    (sequential)
//! ```
//!
//! Every mode implements [`ThinkingMode`]: a `process_thought` operation and
//! a `can_handle` predicate the registry probes in priority order
//! (divergent → tree → linear). Additional capabilities (currently
//! [`DivergentProcessor`] for direction-based branching) are separate
//! optional traits; code that needs them probes for the capability instead
//! of downcasting.

pub mod auto;
pub mod divergent;
pub mod linear;
pub mod tree;

use crate::noesis::error::NoesisError;
use crate::noesis::types::{CrossRefType, Thought, ThoughtMode, TouchPoint};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

pub use auto::{AutoMode, ModeSelection, PrototypeEmbedder};
pub use divergent::{BranchDirection, DivergentMode, DivergentProcessor};
pub use linear::LinearMode;
pub use tree::TreeMode;

/// Cross-reference request carried inside a [`ThoughtInput`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrossRefInput {
    pub to_branch: String,
    #[serde(rename = "type")]
    pub ref_type: CrossRefType,
    pub reason: String,
    pub strength: f64,
    #[serde(default)]
    pub touch_points: Vec<TouchPoint>,
}

/// A single incoming thought request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThoughtInput {
    pub content: String,
    /// Requested mode; `None` or `Auto` routes through the selector.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<ThoughtMode>,
    /// Caller-supplied label (e.g. "hypothesis").
    #[serde(rename = "type", default)]
    pub thought_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// Caller confidence; defaults to 0.8 when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub key_points: Vec<String>,
    #[serde(default)]
    pub cross_refs: Vec<CrossRefInput>,
    #[serde(default)]
    pub force_rebellion: bool,
    #[serde(default)]
    pub challenge_assumptions: bool,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ThoughtInput {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    /// Effective confidence with the default applied.
    pub fn effective_confidence(&self) -> f64 {
        self.confidence.unwrap_or(0.8).clamp(0.0, 1.0)
    }
}

/// Outcome of processing a thought through a mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThoughtResult {
    pub thought_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch_id: Option<String>,
    pub mode: ThoughtMode,
    pub confidence: f64,
    pub is_rebellion: bool,
    pub timestamp: DateTime<Utc>,
}

impl ThoughtResult {
    pub(crate) fn from_thought(thought: &Thought) -> Self {
        Self {
            thought_id: thought.id.clone(),
            branch_id: thought.branch_id.clone(),
            mode: thought.mode,
            confidence: thought.confidence,
            is_rebellion: thought.is_rebellion,
            timestamp: thought.timestamp,
        }
    }
}

/// A cognitive strategy. Implementations must never block on network I/O
/// without honouring the cancellation token.
#[async_trait]
pub trait ThinkingMode: Send + Sync {
    /// Stable mode name used for registration and routing.
    fn name(&self) -> &str;

    /// Whether this mode wants the given input. Probed by
    /// [`ModeRegistry::select_best`] in priority order.
    fn can_handle(&self, input: &ThoughtInput) -> bool;

    async fn process_thought(
        &self,
        cancel: &CancellationToken,
        input: ThoughtInput,
    ) -> Result<ThoughtResult, NoesisError>;
}

/// Name → mode registry with reader-writer locking. `select_best` and `get`
/// are read-only; registration is write-locked and rejects duplicates.
pub struct ModeRegistry {
    modes: RwLock<HashMap<String, Arc<dyn ThinkingMode>>>,
}

/// Probe order for `select_best`.
const SELECTION_PRIORITY: [&str; 3] = ["divergent", "tree", "linear"];

impl ModeRegistry {
    pub fn new() -> Self {
        Self {
            modes: RwLock::new(HashMap::new()),
        }
    }

    /// Register a mode under its own name. Duplicate names fail.
    pub async fn register(&self, mode: Arc<dyn ThinkingMode>) -> Result<(), NoesisError> {
        let name = mode.name().to_string();
        let mut modes = self.modes.write().await;
        if modes.contains_key(&name) {
            return Err(NoesisError::Validation(format!(
                "mode already registered: {}",
                name
            )));
        }
        modes.insert(name, mode);
        Ok(())
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn ThinkingMode>> {
        self.modes.read().await.get(name).cloned()
    }

    pub async fn names(&self) -> Vec<String> {
        self.modes.read().await.keys().cloned().collect()
    }

    /// First mode in priority order (divergent → tree → linear) whose
    /// `can_handle` accepts the input.
    pub async fn select_best(&self, input: &ThoughtInput) -> Option<Arc<dyn ThinkingMode>> {
        let modes = self.modes.read().await;
        for name in SELECTION_PRIORITY {
            if let Some(mode) = modes.get(name) {
                if mode.can_handle(input) {
                    return Some(mode.clone());
                }
            }
        }
        None
    }
}

impl Default for ModeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
