//! Storage contract and the in-memory reference backend.
//!
//! The [`Storage`] trait defines the minimum contract the reasoning core
//! requires; any backend that honours it is acceptable. Reads never mutate,
//! writes are atomic at single-entity granularity, and ids are assigned by
//! the backend when absent.
//!
//! [`MemoryStorage`] is the reference implementation: one coarse
//! `std::sync::Mutex` around the interior maps, with append fast-paths that
//! mutate a branch's sequences in place under that lock, without deep-copying
//! the branch per addition.

use crate::noesis::error::StorageError;
use crate::noesis::types::{
    mint_id, Branch, CrossRef, Insight, Relationship, RlStrategy, StrategyOutcome, Thought,
    ThoughtMode, Validation,
};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

/// Counters and aggregates reported by [`Storage::get_metrics`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageMetrics {
    pub total_thoughts: usize,
    /// Thought counts keyed by mode tag.
    pub thoughts_by_mode: HashMap<String, usize>,
    pub total_branches: usize,
    pub total_insights: usize,
    pub average_confidence: f64,
}

/// Minimum persistence contract required by the reasoning core.
#[async_trait]
pub trait Storage: Send + Sync {
    // ---- Thoughts ----

    /// Persist a thought, assigning an id when the caller left it empty.
    /// Returns the stored copy.
    async fn store_thought(&self, thought: Thought) -> Result<Thought, StorageError>;

    async fn get_thought(&self, id: &str) -> Result<Thought, StorageError>;

    /// Unordered search over thought content. The reference backend matches
    /// case-insensitive substrings; smarter backends may rank by similarity.
    async fn search_thoughts(
        &self,
        query: &str,
        mode: Option<ThoughtMode>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Thought>, StorageError>;

    // ---- Branches ----

    async fn store_branch(&self, branch: Branch) -> Result<Branch, StorageError>;

    async fn get_branch(&self, id: &str) -> Result<Branch, StorageError>;

    async fn list_branches(&self) -> Result<Vec<Branch>, StorageError>;

    /// Branches ordered by last access, newest first.
    async fn get_recent_branches(&self, limit: usize) -> Result<Vec<Branch>, StorageError>;

    async fn get_active_branch(&self) -> Result<Option<Branch>, StorageError>;

    async fn set_active_branch(&self, id: &str) -> Result<(), StorageError>;

    /// Stamp the branch's last-accessed time.
    async fn update_branch_access(&self, id: &str) -> Result<(), StorageError>;

    /// Append fast-path: add a thought to the branch chain in place.
    async fn append_thought_to_branch(
        &self,
        branch_id: &str,
        thought: Thought,
    ) -> Result<(), StorageError>;

    /// Append fast-path: add an insight to the branch in place.
    async fn append_insight_to_branch(
        &self,
        branch_id: &str,
        insight: Insight,
    ) -> Result<(), StorageError>;

    /// Append fast-path: add a cross-reference to the branch in place.
    async fn append_cross_ref_to_branch(
        &self,
        branch_id: &str,
        cross_ref: CrossRef,
    ) -> Result<(), StorageError>;

    async fn update_branch_priority(&self, id: &str, priority: f64) -> Result<(), StorageError>;

    async fn update_branch_confidence(&self, id: &str, confidence: f64)
        -> Result<(), StorageError>;

    // ---- Derived artifacts ----

    async fn store_insight(&self, insight: Insight) -> Result<Insight, StorageError>;

    async fn store_validation(&self, validation: Validation) -> Result<Validation, StorageError>;

    async fn store_relationship(
        &self,
        relationship: Relationship,
    ) -> Result<Relationship, StorageError>;

    // ---- Metrics ----

    async fn get_metrics(&self) -> Result<StorageMetrics, StorageError>;

    // ---- Bandit strategies ----

    /// Strategies previously written via the seed/increment operations.
    async fn get_all_rl_strategies(&self) -> Result<Vec<RlStrategy>, StorageError>;

    async fn store_rl_strategy(&self, strategy: RlStrategy) -> Result<(), StorageError>;

    async fn increment_thompson_alpha(&self, id: &str) -> Result<(), StorageError>;

    async fn increment_thompson_beta(&self, id: &str) -> Result<(), StorageError>;

    async fn record_rl_outcome(&self, outcome: StrategyOutcome) -> Result<(), StorageError>;
}

#[derive(Default)]
struct MemoryInner {
    thoughts: HashMap<String, Thought>,
    branches: HashMap<String, Branch>,
    /// Insertion order of branches, for stable listing.
    branch_order: Vec<String>,
    active_branch: Option<String>,
    insights: HashMap<String, Insight>,
    validations: HashMap<String, Validation>,
    relationships: HashMap<String, Relationship>,
    strategies: HashMap<String, RlStrategy>,
    strategy_order: Vec<String>,
    outcomes: Vec<StrategyOutcome>,
}

/// In-memory reference backend. A single mutex guards all maps; every
/// operation is atomic at single-entity granularity by construction.
#[derive(Default)]
pub struct MemoryStorage {
    inner: Mutex<MemoryInner>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryInner>, StorageError> {
        self.inner
            .lock()
            .map_err(|_| StorageError::Backend("storage mutex poisoned".to_string()))
    }

    /// Number of recorded strategy outcomes (test/introspection helper).
    pub fn outcome_count(&self) -> usize {
        self.inner.lock().map(|g| g.outcomes.len()).unwrap_or(0)
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn store_thought(&self, mut thought: Thought) -> Result<Thought, StorageError> {
        let mut inner = self.lock()?;
        if thought.id.is_empty() {
            thought.id = mint_id("thought");
        }
        inner.thoughts.insert(thought.id.clone(), thought.clone());
        Ok(thought)
    }

    async fn get_thought(&self, id: &str) -> Result<Thought, StorageError> {
        let inner = self.lock()?;
        inner.thoughts.get(id).cloned().ok_or(StorageError::NotFound {
            kind: "thought",
            id: id.to_string(),
        })
    }

    async fn search_thoughts(
        &self,
        query: &str,
        mode: Option<ThoughtMode>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Thought>, StorageError> {
        let inner = self.lock()?;
        let needle = query.to_lowercase();
        let mut matches: Vec<Thought> = inner
            .thoughts
            .values()
            .filter(|t| mode.map_or(true, |m| t.mode == m))
            .filter(|t| needle.is_empty() || t.content.to_lowercase().contains(&needle))
            .cloned()
            .collect();
        // Stable ordering for paging even though results are semantically unordered.
        matches.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(matches.into_iter().skip(offset).take(limit.max(1)).collect())
    }

    async fn store_branch(&self, mut branch: Branch) -> Result<Branch, StorageError> {
        let mut inner = self.lock()?;
        if branch.id.is_empty() {
            branch.id = mint_id("branch");
        }
        if !inner.branches.contains_key(&branch.id) {
            inner.branch_order.push(branch.id.clone());
        }
        inner.branches.insert(branch.id.clone(), branch.clone());
        Ok(branch)
    }

    async fn get_branch(&self, id: &str) -> Result<Branch, StorageError> {
        let inner = self.lock()?;
        inner.branches.get(id).cloned().ok_or(StorageError::NotFound {
            kind: "branch",
            id: id.to_string(),
        })
    }

    async fn list_branches(&self) -> Result<Vec<Branch>, StorageError> {
        let inner = self.lock()?;
        Ok(inner
            .branch_order
            .iter()
            .filter_map(|id| inner.branches.get(id))
            .cloned()
            .collect())
    }

    async fn get_recent_branches(&self, limit: usize) -> Result<Vec<Branch>, StorageError> {
        let inner = self.lock()?;
        let mut branches: Vec<Branch> = inner.branches.values().cloned().collect();
        branches.sort_by(|a, b| b.last_accessed_at.cmp(&a.last_accessed_at));
        branches.truncate(limit.max(1));
        Ok(branches)
    }

    async fn get_active_branch(&self) -> Result<Option<Branch>, StorageError> {
        let inner = self.lock()?;
        Ok(inner
            .active_branch
            .as_ref()
            .and_then(|id| inner.branches.get(id))
            .cloned())
    }

    async fn set_active_branch(&self, id: &str) -> Result<(), StorageError> {
        let mut inner = self.lock()?;
        if !inner.branches.contains_key(id) {
            return Err(StorageError::NotFound {
                kind: "branch",
                id: id.to_string(),
            });
        }
        inner.active_branch = Some(id.to_string());
        Ok(())
    }

    async fn update_branch_access(&self, id: &str) -> Result<(), StorageError> {
        let mut inner = self.lock()?;
        let branch = inner.branches.get_mut(id).ok_or(StorageError::NotFound {
            kind: "branch",
            id: id.to_string(),
        })?;
        branch.last_accessed_at = Utc::now();
        Ok(())
    }

    async fn append_thought_to_branch(
        &self,
        branch_id: &str,
        thought: Thought,
    ) -> Result<(), StorageError> {
        let mut inner = self.lock()?;
        inner
            .thoughts
            .insert(thought.id.clone(), thought.clone());
        let branch = inner.branches.get_mut(branch_id).ok_or(StorageError::NotFound {
            kind: "branch",
            id: branch_id.to_string(),
        })?;
        branch.thoughts.push(thought);
        branch.updated_at = Utc::now();
        Ok(())
    }

    async fn append_insight_to_branch(
        &self,
        branch_id: &str,
        insight: Insight,
    ) -> Result<(), StorageError> {
        let mut inner = self.lock()?;
        inner
            .insights
            .insert(insight.id.clone(), insight.clone());
        let branch = inner.branches.get_mut(branch_id).ok_or(StorageError::NotFound {
            kind: "branch",
            id: branch_id.to_string(),
        })?;
        branch.insights.push(insight);
        branch.updated_at = Utc::now();
        Ok(())
    }

    async fn append_cross_ref_to_branch(
        &self,
        branch_id: &str,
        cross_ref: CrossRef,
    ) -> Result<(), StorageError> {
        let mut inner = self.lock()?;
        let branch = inner.branches.get_mut(branch_id).ok_or(StorageError::NotFound {
            kind: "branch",
            id: branch_id.to_string(),
        })?;
        branch.cross_refs.push(cross_ref);
        branch.updated_at = Utc::now();
        Ok(())
    }

    async fn update_branch_priority(&self, id: &str, priority: f64) -> Result<(), StorageError> {
        let mut inner = self.lock()?;
        let branch = inner.branches.get_mut(id).ok_or(StorageError::NotFound {
            kind: "branch",
            id: id.to_string(),
        })?;
        branch.priority = priority;
        branch.updated_at = Utc::now();
        Ok(())
    }

    async fn update_branch_confidence(
        &self,
        id: &str,
        confidence: f64,
    ) -> Result<(), StorageError> {
        let mut inner = self.lock()?;
        let branch = inner.branches.get_mut(id).ok_or(StorageError::NotFound {
            kind: "branch",
            id: id.to_string(),
        })?;
        branch.confidence = confidence;
        branch.updated_at = Utc::now();
        Ok(())
    }

    async fn store_insight(&self, mut insight: Insight) -> Result<Insight, StorageError> {
        let mut inner = self.lock()?;
        if insight.id.is_empty() {
            insight.id = mint_id("insight");
        }
        inner.insights.insert(insight.id.clone(), insight.clone());
        Ok(insight)
    }

    async fn store_validation(
        &self,
        mut validation: Validation,
    ) -> Result<Validation, StorageError> {
        let mut inner = self.lock()?;
        if validation.id.is_empty() {
            validation.id = mint_id("validation");
        }
        inner
            .validations
            .insert(validation.id.clone(), validation.clone());
        Ok(validation)
    }

    async fn store_relationship(
        &self,
        mut relationship: Relationship,
    ) -> Result<Relationship, StorageError> {
        let mut inner = self.lock()?;
        if relationship.id.is_empty() {
            relationship.id = mint_id("relationship");
        }
        inner
            .relationships
            .insert(relationship.id.clone(), relationship.clone());
        Ok(relationship)
    }

    async fn get_metrics(&self) -> Result<StorageMetrics, StorageError> {
        let inner = self.lock()?;
        let mut by_mode: HashMap<String, usize> = HashMap::new();
        let mut confidence_sum = 0.0;
        for thought in inner.thoughts.values() {
            *by_mode.entry(thought.mode.as_str().to_string()).or_insert(0) += 1;
            confidence_sum += thought.confidence;
        }
        let total = inner.thoughts.len();
        Ok(StorageMetrics {
            total_thoughts: total,
            thoughts_by_mode: by_mode,
            total_branches: inner.branches.len(),
            total_insights: inner.insights.len(),
            average_confidence: if total > 0 {
                confidence_sum / total as f64
            } else {
                0.0
            },
        })
    }

    async fn get_all_rl_strategies(&self) -> Result<Vec<RlStrategy>, StorageError> {
        let inner = self.lock()?;
        Ok(inner
            .strategy_order
            .iter()
            .filter_map(|id| inner.strategies.get(id))
            .cloned()
            .collect())
    }

    async fn store_rl_strategy(&self, strategy: RlStrategy) -> Result<(), StorageError> {
        let mut inner = self.lock()?;
        if !inner.strategies.contains_key(&strategy.id) {
            inner.strategy_order.push(strategy.id.clone());
        }
        inner.strategies.insert(strategy.id.clone(), strategy);
        Ok(())
    }

    async fn increment_thompson_alpha(&self, id: &str) -> Result<(), StorageError> {
        let mut inner = self.lock()?;
        let strategy = inner.strategies.get_mut(id).ok_or(StorageError::NotFound {
            kind: "strategy",
            id: id.to_string(),
        })?;
        strategy.alpha += 1.0;
        strategy.trials += 1;
        strategy.successes += 1;
        Ok(())
    }

    async fn increment_thompson_beta(&self, id: &str) -> Result<(), StorageError> {
        let mut inner = self.lock()?;
        let strategy = inner.strategies.get_mut(id).ok_or(StorageError::NotFound {
            kind: "strategy",
            id: id.to_string(),
        })?;
        strategy.beta += 1.0;
        strategy.trials += 1;
        Ok(())
    }

    async fn record_rl_outcome(&self, outcome: StrategyOutcome) -> Result<(), StorageError> {
        let mut inner = self.lock()?;
        inner.outcomes.push(outcome);
        Ok(())
    }
}
