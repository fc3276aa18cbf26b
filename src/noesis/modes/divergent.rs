//! Divergent mode: creative continuation and deliberate rebellion.
//!
//! Content is always template-transformed; there is no passthrough path.
//! Unforced thoughts run through a randomly chosen creative template;
//! `force_rebellion` switches to the rebellion templates and marks the
//! stored thought as a rebellion.

use crate::noesis::error::NoesisError;
use crate::noesis::modes::{ThinkingMode, ThoughtInput, ThoughtResult};
use crate::noesis::storage::Storage;
use crate::noesis::types::{Thought, ThoughtMode};
use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Creative transformations applied to unforced divergent thoughts. `{}` is
/// replaced by the input content.
const CREATIVE_TEMPLATES: [&str; 5] = [
    "What if we flipped this entirely: {}",
    "An unconventional angle on this: {}",
    "Imagine the constraint didn't exist: {}",
    "Borrowing from an unrelated field: {}",
    "The wild-card version of this idea: {}",
];

/// Rebellion transformations used when `force_rebellion` is set.
const REBELLION_TEMPLATES: [&str; 4] = [
    "Rejecting the premise outright: {}",
    "The consensus here is wrong: {}",
    "Tearing down the assumption behind this: {}",
    "Contrarian take: {}",
];

/// Direction for deriving a new thought from an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchDirection {
    MoreExtreme,
    Opposite,
    Tangential,
    Simplified,
    Combined,
    /// Unrecognised directions are accepted and fall through to a default
    /// transformation rather than being rejected.
    Unknown,
}

impl BranchDirection {
    pub fn parse(value: &str) -> Self {
        match value {
            "more_extreme" => BranchDirection::MoreExtreme,
            "opposite" => BranchDirection::Opposite,
            "tangential" => BranchDirection::Tangential,
            "simplified" => BranchDirection::Simplified,
            "combined" => BranchDirection::Combined,
            _ => BranchDirection::Unknown,
        }
    }
}

/// Optional capability: modes that can derive a new thought from a stored
/// source in a given direction. Probed by capability, not downcast.
#[async_trait]
pub trait DivergentProcessor: Send + Sync {
    async fn branch_thought(
        &self,
        cancel: &CancellationToken,
        source_id: &str,
        direction: BranchDirection,
    ) -> Result<ThoughtResult, NoesisError>;
}

/// Creative continuation mode.
pub struct DivergentMode {
    storage: Arc<dyn Storage>,
}

impl DivergentMode {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    fn apply_template(templates: &[&str], content: &str) -> String {
        let idx = rand::thread_rng().gen_range(0..templates.len());
        templates[idx].replace("{}", content)
    }

    fn transform_direction(direction: BranchDirection, content: &str) -> String {
        match direction {
            BranchDirection::MoreExtreme => {
                format!("Taken to its logical extreme: {}", content)
            }
            BranchDirection::Opposite => {
                format!("The exact opposite position: it is not true that {}", content)
            }
            BranchDirection::Tangential => {
                format!("A tangent sparked by this: what else behaves like {}", content)
            }
            BranchDirection::Simplified => {
                format!("Stripped to its essence: {}", content)
            }
            BranchDirection::Combined => {
                format!("Fusing this with its strongest alternative: {}", content)
            }
            BranchDirection::Unknown => {
                format!("Reframed from an unspecified angle: {}", content)
            }
        }
    }
}

#[async_trait]
impl ThinkingMode for DivergentMode {
    fn name(&self) -> &str {
        "divergent"
    }

    /// Divergent only claims inputs that force rebellion; keyword-driven
    /// routing happens in the auto selector.
    fn can_handle(&self, input: &ThoughtInput) -> bool {
        input.force_rebellion
    }

    async fn process_thought(
        &self,
        cancel: &CancellationToken,
        input: ThoughtInput,
    ) -> Result<ThoughtResult, NoesisError> {
        if cancel.is_cancelled() {
            return Err(NoesisError::Cancelled);
        }

        let content = if input.force_rebellion {
            Self::apply_template(&REBELLION_TEMPLATES, &input.content)
        } else {
            Self::apply_template(&CREATIVE_TEMPLATES, &input.content)
        };

        let mut thought = Thought::new(content, ThoughtMode::Divergent, input.effective_confidence());
        thought.thought_type = input.thought_type;
        thought.parent_id = input.parent_id;
        thought.key_points = input.key_points;
        thought.is_rebellion = input.force_rebellion;
        thought.challenges_assumption = input.challenge_assumptions || input.force_rebellion;
        thought.metadata = input.metadata;

        let stored = self.storage.store_thought(thought).await?;
        Ok(ThoughtResult::from_thought(&stored))
    }
}

#[async_trait]
impl DivergentProcessor for DivergentMode {
    async fn branch_thought(
        &self,
        cancel: &CancellationToken,
        source_id: &str,
        direction: BranchDirection,
    ) -> Result<ThoughtResult, NoesisError> {
        if cancel.is_cancelled() {
            return Err(NoesisError::Cancelled);
        }

        let source = self.storage.get_thought(source_id).await?;
        let content = Self::transform_direction(direction, &source.content);

        let mut thought = Thought::new(content, ThoughtMode::Divergent, source.confidence);
        thought.parent_id = Some(source.id.clone());
        thought.branch_id = source.branch_id.clone();
        thought.is_rebellion = direction == BranchDirection::Opposite;
        // Every derivation direction challenges the source's assumption.
        thought.challenges_assumption = true;
        thought.metadata.insert(
            "branch_direction".to_string(),
            serde_json::Value::String(format!("{:?}", direction)),
        );

        let stored = self.storage.store_thought(thought).await?;
        Ok(ThoughtResult::from_thought(&stored))
    }
}
