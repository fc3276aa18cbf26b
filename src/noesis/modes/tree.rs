//! Tree mode: branch-scoped reasoning with insights and cross-references.

use crate::noesis::error::NoesisError;
use crate::noesis::modes::{ThinkingMode, ThoughtInput, ThoughtResult};
use crate::noesis::storage::Storage;
use crate::noesis::types::{Branch, CrossRef, Insight, InsightType, Thought, ThoughtMode};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Branch-scoped reasoning.
///
/// Resolution order for the target branch:
/// 1. a caller-supplied `branch_id` is used as-is, creating the branch when
///    it does not exist yet (callers accepting untrusted input should
///    validate or namespace ids);
/// 2. otherwise the current active branch, creating and activating a fresh
///    one if none exists.
pub struct TreeMode {
    storage: Arc<dyn Storage>,
}

impl TreeMode {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    async fn resolve_branch(&self, input: &ThoughtInput) -> Result<Branch, NoesisError> {
        if let Some(branch_id) = &input.branch_id {
            match self.storage.get_branch(branch_id).await {
                Ok(branch) => Ok(branch),
                Err(_) => {
                    let branch = Branch::new(Some(branch_id.clone()));
                    Ok(self.storage.store_branch(branch).await?)
                }
            }
        } else if let Some(branch) = self.storage.get_active_branch().await? {
            Ok(branch)
        } else {
            let branch = self.storage.store_branch(Branch::new(None)).await?;
            self.storage.set_active_branch(&branch.id).await?;
            Ok(branch)
        }
    }
}

#[async_trait]
impl ThinkingMode for TreeMode {
    fn name(&self) -> &str {
        "tree"
    }

    /// Tree wants anything that references branch structure.
    fn can_handle(&self, input: &ThoughtInput) -> bool {
        input.branch_id.is_some() || !input.cross_refs.is_empty() || !input.key_points.is_empty()
    }

    async fn process_thought(
        &self,
        cancel: &CancellationToken,
        input: ThoughtInput,
    ) -> Result<ThoughtResult, NoesisError> {
        if cancel.is_cancelled() {
            return Err(NoesisError::Cancelled);
        }

        let branch = self.resolve_branch(&input).await?;
        self.storage.update_branch_access(&branch.id).await?;

        let mut thought = Thought::new(
            input.content.clone(),
            ThoughtMode::Tree,
            input.effective_confidence(),
        );
        thought.thought_type = input.thought_type.clone();
        thought.branch_id = Some(branch.id.clone());
        thought.parent_id = input.parent_id.clone();
        thought.key_points = input.key_points.clone();
        thought.metadata = input.metadata.clone();

        let result = ThoughtResult::from_thought(&thought);
        self.storage
            .append_thought_to_branch(&branch.id, thought)
            .await?;

        // Key points become an observation insight summarising them.
        if !input.key_points.is_empty() {
            let summary = format!(
                "Key points identified: {}",
                input.key_points.join("; ")
            );
            let mut insight = Insight::new(InsightType::Observation, summary, 0.7);
            insight.context = input.key_points.clone();
            self.storage
                .append_insight_to_branch(&branch.id, insight)
                .await?;
        }

        for cross_ref in &input.cross_refs {
            let mut reference = CrossRef::new(
                branch.id.clone(),
                cross_ref.to_branch.clone(),
                cross_ref.ref_type,
                cross_ref.reason.clone(),
                cross_ref.strength,
            );
            reference.touch_points = cross_ref.touch_points.clone();
            self.storage
                .append_cross_ref_to_branch(&branch.id, reference)
                .await?;
        }

        // Priority is recomputed on demand rather than cached.
        let mut updated = self.storage.get_branch(&branch.id).await?;
        updated.recalculate();
        self.storage
            .update_branch_confidence(&branch.id, updated.confidence)
            .await?;
        self.storage
            .update_branch_priority(&branch.id, updated.priority)
            .await?;

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::noesis::modes::CrossRefInput;
    use crate::noesis::storage::MemoryStorage;
    use crate::noesis::types::CrossRefType;

    fn mode() -> (TreeMode, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::new());
        (TreeMode::new(storage.clone()), storage)
    }

    #[tokio::test]
    async fn test_creates_active_branch_when_none_exists() {
        let (mode, storage) = mode();
        let mut input = ThoughtInput::new("explore options");
        input.key_points = vec!["option a".to_string()];
        let result = mode
            .process_thought(&CancellationToken::new(), input)
            .await
            .unwrap();
        let branch_id = result.branch_id.unwrap();
        let active = storage.get_active_branch().await.unwrap().unwrap();
        assert_eq!(active.id, branch_id);
        assert_eq!(active.thoughts.len(), 1);
    }

    #[tokio::test]
    async fn test_caller_supplied_branch_id_is_created() {
        let (mode, storage) = mode();
        let mut input = ThoughtInput::new("scoped thought");
        input.branch_id = Some("branch-custom".to_string());
        mode.process_thought(&CancellationToken::new(), input)
            .await
            .unwrap();
        let branch = storage.get_branch("branch-custom").await.unwrap();
        assert_eq!(branch.thoughts.len(), 1);
    }

    #[tokio::test]
    async fn test_key_points_create_observation_insight() {
        let (mode, storage) = mode();
        let mut input = ThoughtInput::new("compare approaches");
        input.key_points = vec!["latency".to_string(), "cost".to_string()];
        let result = mode
            .process_thought(&CancellationToken::new(), input)
            .await
            .unwrap();
        let branch = storage.get_branch(&result.branch_id.unwrap()).await.unwrap();
        assert_eq!(branch.insights.len(), 1);
        assert_eq!(branch.insights[0].insight_type, InsightType::Observation);
        assert!(branch.insights[0].content.contains("latency"));
    }

    #[tokio::test]
    async fn test_priority_and_confidence_updated() {
        let (mode, storage) = mode();
        let mut input = ThoughtInput::new("first");
        input.branch_id = Some("branch-p".to_string());
        input.confidence = Some(0.6);
        input.cross_refs = vec![CrossRefInput {
            to_branch: "branch-other".to_string(),
            ref_type: CrossRefType::Complementary,
            reason: "related".to_string(),
            strength: 0.5,
            touch_points: Vec::new(),
        }];
        mode.process_thought(&CancellationToken::new(), input)
            .await
            .unwrap();
        let branch = storage.get_branch("branch-p").await.unwrap();
        assert!((branch.confidence - 0.6).abs() < 1e-9);
        // 0.6 + 0.1·0 insights + 0.1·0.5 strength
        assert!((branch.priority - 0.65).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_can_handle_requires_branch_signals() {
        let (mode, _) = mode();
        assert!(!mode.can_handle(&ThoughtInput::new("plain")));
        let mut with_branch = ThoughtInput::new("x");
        with_branch.branch_id = Some("b".to_string());
        assert!(mode.can_handle(&with_branch));
        let mut with_keys = ThoughtInput::new("x");
        with_keys.key_points = vec!["k".to_string()];
        assert!(mode.can_handle(&with_keys));
    }
}
