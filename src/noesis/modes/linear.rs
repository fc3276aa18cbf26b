//! Linear mode: sequential, step-by-step reasoning.

use crate::noesis::error::NoesisError;
use crate::noesis::modes::{ThinkingMode, ThoughtInput, ThoughtResult};
use crate::noesis::storage::Storage;
use crate::noesis::types::{Thought, ThoughtMode};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Preamble prepended when the caller asks the thought to challenge its own
/// assumptions.
const CHALLENGE_PREAMBLE: &str =
    "Questioning the premise first: what must be true for this to hold, and what if it is not?\n\n";

/// Confidence penalty applied alongside the challenge preamble, floored so a
/// challenged thought never drops below 0.3.
const CHALLENGE_PENALTY: f64 = 0.1;
const CHALLENGE_FLOOR: f64 = 0.3;

/// Sequential reasoning: one thought, optionally linked to a parent.
pub struct LinearMode {
    storage: Arc<dyn Storage>,
}

impl LinearMode {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl ThinkingMode for LinearMode {
    fn name(&self) -> &str {
        "linear"
    }

    /// Linear is the catch-all: it accepts any input.
    fn can_handle(&self, _input: &ThoughtInput) -> bool {
        true
    }

    async fn process_thought(
        &self,
        cancel: &CancellationToken,
        input: ThoughtInput,
    ) -> Result<ThoughtResult, NoesisError> {
        if cancel.is_cancelled() {
            return Err(NoesisError::Cancelled);
        }

        let mut confidence = input.effective_confidence();
        let content = if input.challenge_assumptions {
            confidence = (confidence - CHALLENGE_PENALTY).max(CHALLENGE_FLOOR);
            format!("{}{}", CHALLENGE_PREAMBLE, input.content)
        } else {
            input.content.clone()
        };

        let mut thought = Thought::new(content, ThoughtMode::Linear, confidence);
        thought.thought_type = input.thought_type;
        thought.parent_id = input.parent_id;
        thought.key_points = input.key_points;
        thought.challenges_assumption = input.challenge_assumptions;
        thought.metadata = input.metadata;

        let stored = self.storage.store_thought(thought).await?;
        Ok(ThoughtResult::from_thought(&stored))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::noesis::storage::MemoryStorage;

    fn mode() -> (LinearMode, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::new());
        (LinearMode::new(storage.clone()), storage)
    }

    #[tokio::test]
    async fn test_plain_thought_keeps_content_and_confidence() {
        let (mode, storage) = mode();
        let result = mode
            .process_thought(&CancellationToken::new(), ThoughtInput::new("step one"))
            .await
            .unwrap();
        assert_eq!(result.mode, ThoughtMode::Linear);
        assert!((result.confidence - 0.8).abs() < 1e-9);
        let stored = storage.get_thought(&result.thought_id).await.unwrap();
        assert_eq!(stored.content, "step one");
    }

    #[tokio::test]
    async fn test_challenge_prepends_preamble_and_penalizes() {
        let (mode, storage) = mode();
        let mut input = ThoughtInput::new("the plan is sound");
        input.challenge_assumptions = true;
        let result = mode
            .process_thought(&CancellationToken::new(), input)
            .await
            .unwrap();
        assert!((result.confidence - 0.7).abs() < 1e-9);
        let stored = storage.get_thought(&result.thought_id).await.unwrap();
        assert!(stored.content.starts_with("Questioning the premise"));
        assert!(stored.challenges_assumption);
    }

    #[tokio::test]
    async fn test_challenge_confidence_floor() {
        let (mode, _) = mode();
        let mut input = ThoughtInput::new("weak claim");
        input.confidence = Some(0.32);
        input.challenge_assumptions = true;
        let result = mode
            .process_thought(&CancellationToken::new(), input)
            .await
            .unwrap();
        assert!((result.confidence - 0.3).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_parent_link_preserved() {
        let (mode, storage) = mode();
        let first = mode
            .process_thought(&CancellationToken::new(), ThoughtInput::new("premise"))
            .await
            .unwrap();
        let mut input = ThoughtInput::new("conclusion");
        input.parent_id = Some(first.thought_id.clone());
        let second = mode
            .process_thought(&CancellationToken::new(), input)
            .await
            .unwrap();
        let stored = storage.get_thought(&second.thought_id).await.unwrap();
        assert_eq!(stored.parent_id.as_deref(), Some(first.thought_id.as_str()));
    }

    #[tokio::test]
    async fn test_cancelled_token_short_circuits() {
        let (mode, _) = mode();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = mode
            .process_thought(&cancel, ThoughtInput::new("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, NoesisError::Cancelled));
    }
}
