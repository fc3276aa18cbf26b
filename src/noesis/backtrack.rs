//! Backtracking: snapshot+delta history, named checkpoints, restore, fork,
//! diff, and prune.
//!
//! The manager keeps, per branch: the latest snapshot, the list of deltas
//! recorded since that snapshot, and the checkpoints taken. Callers invoke
//! [`BacktrackingManager::record_change`] on every mutating branch
//! operation; a checkpoint then pins either a fresh snapshot (when the delta
//! log has grown to ten entries, or no snapshot exists yet) or the current
//! delta count. Restoring replays the first `delta_count` deltas on top of a
//! deep copy of the snapshot.

use crate::noesis::error::NoesisError;
use crate::noesis::storage::Storage;
use crate::noesis::types::{
    mint_id, Branch, BranchDelta, BranchState, Checkpoint, CheckpointMetadata, DeltaEntity,
    DeltaOp, DeltaPayload,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Delta count that forces a fresh snapshot at checkpoint time.
const SNAPSHOT_DELTA_LIMIT: usize = 10;

/// Set differences between two checkpoints of the same branch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckpointDiff {
    pub thoughts_added: Vec<String>,
    pub thoughts_removed: Vec<String>,
    pub insights_added: Vec<String>,
    pub insights_removed: Vec<String>,
}

#[derive(Default)]
struct BacktrackInner {
    /// snapshot id → deep-copied branch.
    snapshots: HashMap<String, Branch>,
    /// branch id → latest snapshot id.
    branch_snapshot: HashMap<String, String>,
    /// branch id → deltas since the latest snapshot, time-ordered.
    deltas: HashMap<String, Vec<BranchDelta>>,
    checkpoints: HashMap<String, Checkpoint>,
    checkpoint_order: Vec<String>,
}

/// Per-server manager for branch history. Interior state is single-writer
/// behind one async mutex.
pub struct BacktrackingManager {
    storage: Arc<dyn Storage>,
    inner: Mutex<BacktrackInner>,
}

impl BacktrackingManager {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            inner: Mutex::new(BacktrackInner::default()),
        }
    }

    /// Append a delta to the branch's log. The payload tag must match the
    /// declared entity type.
    pub async fn record_change(
        &self,
        branch_id: &str,
        op: DeltaOp,
        entity: DeltaEntity,
        entity_id: &str,
        payload: Option<DeltaPayload>,
    ) -> Result<(), NoesisError> {
        if let Some(payload) = &payload {
            if payload.entity() != entity {
                return Err(NoesisError::Validation(format!(
                    "delta payload tag {:?} does not match entity {:?}",
                    payload.entity(),
                    entity
                )));
            }
        }
        if matches!(op, DeltaOp::Add | DeltaOp::Modify) && payload.is_none() {
            return Err(NoesisError::Validation(format!(
                "{:?} delta for {} requires a payload",
                op, entity_id
            )));
        }

        let mut inner = self.inner.lock().await;
        inner
            .deltas
            .entry(branch_id.to_string())
            .or_default()
            .push(BranchDelta {
                op,
                entity,
                entity_id: entity_id.to_string(),
                payload,
                timestamp: Utc::now(),
            });
        Ok(())
    }

    /// Number of deltas currently pending for a branch.
    pub async fn delta_count(&self, branch_id: &str) -> usize {
        let inner = self.inner.lock().await;
        inner.deltas.get(branch_id).map_or(0, |d| d.len())
    }

    /// Create a named checkpoint for a branch.
    pub async fn create_checkpoint(
        &self,
        branch_id: &str,
        name: &str,
        description: &str,
    ) -> Result<Checkpoint, NoesisError> {
        let branch = self.storage.get_branch(branch_id).await?;
        let mut inner = self.inner.lock().await;

        let pending = inner.deltas.get(branch_id).map_or(0, |d| d.len());
        let needs_snapshot =
            pending >= SNAPSHOT_DELTA_LIMIT || !inner.branch_snapshot.contains_key(branch_id);

        let (snapshot_id, delta_count) = if needs_snapshot {
            let snapshot_id = mint_id("snapshot");
            inner.snapshots.insert(snapshot_id.clone(), branch.clone());
            inner
                .branch_snapshot
                .insert(branch_id.to_string(), snapshot_id.clone());
            inner.deltas.insert(branch_id.to_string(), Vec::new());
            (snapshot_id, 0)
        } else {
            // The unwrap above is guarded: needs_snapshot is false only when
            // a snapshot id exists for the branch.
            let snapshot_id = inner
                .branch_snapshot
                .get(branch_id)
                .cloned()
                .ok_or_else(|| NoesisError::State(format!("no snapshot for branch {}", branch_id)))?;
            (snapshot_id, pending)
        };

        let checkpoint = Checkpoint {
            id: mint_id("cp"),
            name: name.to_string(),
            description: description.to_string(),
            branch_id: branch_id.to_string(),
            snapshot_id,
            delta_count,
            created_at: Utc::now(),
            metadata: CheckpointMetadata {
                thought_ids: branch.thought_ids(),
                insight_ids: branch.insight_ids(),
            },
        };
        inner
            .checkpoints
            .insert(checkpoint.id.clone(), checkpoint.clone());
        inner.checkpoint_order.push(checkpoint.id.clone());
        Ok(checkpoint)
    }

    /// Checkpoints taken for a branch, in creation order.
    pub async fn list_checkpoints(&self, branch_id: &str) -> Vec<Checkpoint> {
        let inner = self.inner.lock().await;
        inner
            .checkpoint_order
            .iter()
            .filter_map(|id| inner.checkpoints.get(id))
            .filter(|cp| cp.branch_id == branch_id)
            .cloned()
            .collect()
    }

    /// Rebuild the branch as of the checkpoint and persist it.
    pub async fn restore_checkpoint(&self, checkpoint_id: &str) -> Result<Branch, NoesisError> {
        let (mut branch, replay) = {
            let inner = self.inner.lock().await;
            let checkpoint = inner.checkpoints.get(checkpoint_id).ok_or_else(|| {
                NoesisError::State(format!("unknown checkpoint: {}", checkpoint_id))
            })?;
            let snapshot = inner.snapshots.get(&checkpoint.snapshot_id).ok_or_else(|| {
                NoesisError::State(format!(
                    "snapshot {} for checkpoint {} is gone",
                    checkpoint.snapshot_id, checkpoint_id
                ))
            })?;
            let replay: Vec<BranchDelta> = inner
                .deltas
                .get(&checkpoint.branch_id)
                .map(|deltas| deltas.iter().take(checkpoint.delta_count).cloned().collect())
                .unwrap_or_default();
            (snapshot.clone(), replay)
        };

        for delta in &replay {
            apply_delta(&mut branch, delta)?;
        }
        branch.updated_at = Utc::now();
        branch.recalculate();
        Ok(self.storage.store_branch(branch).await?)
    }

    /// Restore to the checkpoint and fork the result into a brand-new branch
    /// whose `parent_branch_id` points at the restored branch.
    pub async fn fork_from_checkpoint(
        &self,
        checkpoint_id: &str,
        new_name: &str,
    ) -> Result<Branch, NoesisError> {
        let restored = self.restore_checkpoint(checkpoint_id).await?;

        let mut fork = restored.clone();
        fork.id = mint_id("branch");
        fork.parent_branch_id = Some(restored.id.clone());
        fork.created_at = Utc::now();
        fork.updated_at = fork.created_at;
        fork.last_accessed_at = fork.created_at;

        if let Some(last) = fork.thoughts.last_mut() {
            last.metadata.insert(
                "forked_from_checkpoint".to_string(),
                serde_json::Value::String(checkpoint_id.to_string()),
            );
            last.metadata.insert(
                "fork_name".to_string(),
                serde_json::Value::String(new_name.to_string()),
            );
        }

        Ok(self.storage.store_branch(fork).await?)
    }

    /// Thought/insight id set differences between two checkpoints of the
    /// same branch, computed from the metadata stored at checkpoint time.
    pub async fn get_checkpoint_diff(
        &self,
        checkpoint_a: &str,
        checkpoint_b: &str,
    ) -> Result<CheckpointDiff, NoesisError> {
        let inner = self.inner.lock().await;
        let a = inner
            .checkpoints
            .get(checkpoint_a)
            .ok_or_else(|| NoesisError::State(format!("unknown checkpoint: {}", checkpoint_a)))?;
        let b = inner
            .checkpoints
            .get(checkpoint_b)
            .ok_or_else(|| NoesisError::State(format!("unknown checkpoint: {}", checkpoint_b)))?;
        if a.branch_id != b.branch_id {
            return Err(NoesisError::State(format!(
                "checkpoints belong to different branches ({} vs {})",
                a.branch_id, b.branch_id
            )));
        }

        Ok(CheckpointDiff {
            thoughts_added: set_difference(&b.metadata.thought_ids, &a.metadata.thought_ids),
            thoughts_removed: set_difference(&a.metadata.thought_ids, &b.metadata.thought_ids),
            insights_added: set_difference(&b.metadata.insight_ids, &a.metadata.insight_ids),
            insights_removed: set_difference(&a.metadata.insight_ids, &b.metadata.insight_ids),
        })
    }

    /// Transition the branch to `dead_end`, stamping the prune reason into
    /// the last thought's metadata. History and contents stay reachable.
    pub async fn prune_branch(&self, branch_id: &str, reason: &str) -> Result<Branch, NoesisError> {
        let mut branch = self.storage.get_branch(branch_id).await?;
        branch.state = BranchState::DeadEnd;
        branch.updated_at = Utc::now();
        if let Some(last) = branch.thoughts.last_mut() {
            last.metadata
                .insert("pruned".to_string(), serde_json::Value::Bool(true));
            last.metadata.insert(
                "prune_reason".to_string(),
                serde_json::Value::String(reason.to_string()),
            );
            last.metadata.insert(
                "pruned_at".to_string(),
                serde_json::Value::String(Utc::now().to_rfc3339()),
            );
        }
        Ok(self.storage.store_branch(branch).await?)
    }
}

/// Items of `left` not present in `right`, preserving `left`'s order.
fn set_difference(left: &[String], right: &[String]) -> Vec<String> {
    let lookup: HashSet<&String> = right.iter().collect();
    left.iter()
        .filter(|id| !lookup.contains(id))
        .cloned()
        .collect()
}

/// Apply one delta to a branch in place.
fn apply_delta(branch: &mut Branch, delta: &BranchDelta) -> Result<(), NoesisError> {
    match delta.entity {
        DeltaEntity::Thought => {
            let payload = match &delta.payload {
                Some(DeltaPayload::Thought(thought)) => Some(thought),
                Some(_) => {
                    return Err(NoesisError::Validation(
                        "thought delta carries a non-thought payload".to_string(),
                    ))
                }
                None => None,
            };
            match delta.op {
                DeltaOp::Add => {
                    let thought = payload.ok_or_else(|| missing_payload(delta))?;
                    branch.thoughts.push(thought.clone());
                }
                DeltaOp::Remove => branch.thoughts.retain(|t| t.id != delta.entity_id),
                DeltaOp::Modify => {
                    let thought = payload.ok_or_else(|| missing_payload(delta))?;
                    if let Some(slot) =
                        branch.thoughts.iter_mut().find(|t| t.id == delta.entity_id)
                    {
                        *slot = thought.clone();
                    }
                }
            }
        }
        DeltaEntity::Insight => {
            let payload = match &delta.payload {
                Some(DeltaPayload::Insight(insight)) => Some(insight),
                Some(_) => {
                    return Err(NoesisError::Validation(
                        "insight delta carries a non-insight payload".to_string(),
                    ))
                }
                None => None,
            };
            match delta.op {
                DeltaOp::Add => {
                    let insight = payload.ok_or_else(|| missing_payload(delta))?;
                    branch.insights.push(insight.clone());
                }
                DeltaOp::Remove => branch.insights.retain(|i| i.id != delta.entity_id),
                DeltaOp::Modify => {
                    let insight = payload.ok_or_else(|| missing_payload(delta))?;
                    if let Some(slot) =
                        branch.insights.iter_mut().find(|i| i.id == delta.entity_id)
                    {
                        *slot = insight.clone();
                    }
                }
            }
        }
        DeltaEntity::CrossRef => {
            let payload = match &delta.payload {
                Some(DeltaPayload::CrossRef(cross_ref)) => Some(cross_ref),
                Some(_) => {
                    return Err(NoesisError::Validation(
                        "cross_ref delta carries a non-cross_ref payload".to_string(),
                    ))
                }
                None => None,
            };
            match delta.op {
                DeltaOp::Add => {
                    let cross_ref = payload.ok_or_else(|| missing_payload(delta))?;
                    branch.cross_refs.push(cross_ref.clone());
                }
                DeltaOp::Remove => branch.cross_refs.retain(|c| c.id != delta.entity_id),
                DeltaOp::Modify => {
                    let cross_ref = payload.ok_or_else(|| missing_payload(delta))?;
                    if let Some(slot) = branch
                        .cross_refs
                        .iter_mut()
                        .find(|c| c.id == delta.entity_id)
                    {
                        *slot = cross_ref.clone();
                    }
                }
            }
        }
    }
    Ok(())
}

fn missing_payload(delta: &BranchDelta) -> NoesisError {
    NoesisError::Validation(format!(
        "{:?} delta for {} is missing its payload",
        delta.op, delta.entity_id
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::noesis::storage::MemoryStorage;
    use crate::noesis::types::{Thought, ThoughtMode};

    async fn seeded_branch(storage: &MemoryStorage) -> (Branch, Thought) {
        let branch = storage.store_branch(Branch::new(None)).await.unwrap();
        let mut thought = Thought::new("t1", ThoughtMode::Tree, 0.8);
        thought.branch_id = Some(branch.id.clone());
        storage
            .append_thought_to_branch(&branch.id, thought.clone())
            .await
            .unwrap();
        (storage.get_branch(&branch.id).await.unwrap(), thought)
    }

    #[tokio::test]
    async fn test_first_checkpoint_snapshots() {
        let storage = Arc::new(MemoryStorage::new());
        let (branch, _) = seeded_branch(&storage).await;
        let manager = BacktrackingManager::new(storage.clone());

        let checkpoint = manager
            .create_checkpoint(&branch.id, "c1", "first")
            .await
            .unwrap();
        assert_eq!(checkpoint.delta_count, 0);
        assert_eq!(checkpoint.metadata.thought_ids.len(), 1);
    }

    #[tokio::test]
    async fn test_restore_replays_recorded_deltas() {
        let storage = Arc::new(MemoryStorage::new());
        let (branch, t1) = seeded_branch(&storage).await;
        let manager = BacktrackingManager::new(storage.clone());

        let c1 = manager
            .create_checkpoint(&branch.id, "c1", "")
            .await
            .unwrap();

        // Add t2 through the delta log and storage.
        let mut t2 = Thought::new("t2", ThoughtMode::Tree, 0.9);
        t2.branch_id = Some(branch.id.clone());
        storage
            .append_thought_to_branch(&branch.id, t2.clone())
            .await
            .unwrap();
        manager
            .record_change(
                &branch.id,
                DeltaOp::Add,
                DeltaEntity::Thought,
                &t2.id,
                Some(DeltaPayload::Thought(t2.clone())),
            )
            .await
            .unwrap();

        let c2 = manager
            .create_checkpoint(&branch.id, "c2", "")
            .await
            .unwrap();
        assert_eq!(c2.delta_count, 1);

        // Restoring c1 drops t2; restoring c2 brings it back.
        let restored = manager.restore_checkpoint(&c1.id).await.unwrap();
        assert_eq!(restored.thought_ids(), vec![t1.id.clone()]);
        let restored = manager.restore_checkpoint(&c2.id).await.unwrap();
        assert_eq!(restored.thought_ids(), vec![t1.id.clone(), t2.id.clone()]);
    }

    #[tokio::test]
    async fn test_snapshot_forced_after_ten_deltas() {
        let storage = Arc::new(MemoryStorage::new());
        let (branch, _) = seeded_branch(&storage).await;
        let manager = BacktrackingManager::new(storage.clone());
        manager
            .create_checkpoint(&branch.id, "base", "")
            .await
            .unwrap();

        for i in 0..10 {
            let mut t = Thought::new(format!("d{}", i), ThoughtMode::Tree, 0.5);
            t.branch_id = Some(branch.id.clone());
            storage
                .append_thought_to_branch(&branch.id, t.clone())
                .await
                .unwrap();
            let t_id = t.id.clone();
            manager
                .record_change(
                    &branch.id,
                    DeltaOp::Add,
                    DeltaEntity::Thought,
                    &t_id,
                    Some(DeltaPayload::Thought(t)),
                )
                .await
                .unwrap();
        }

        let checkpoint = manager
            .create_checkpoint(&branch.id, "after-ten", "")
            .await
            .unwrap();
        // Fresh snapshot: delta log cleared, count pinned at zero.
        assert_eq!(checkpoint.delta_count, 0);
        assert_eq!(manager.delta_count(&branch.id).await, 0);
    }

    #[tokio::test]
    async fn test_fork_creates_fresh_branch_with_parent() {
        let storage = Arc::new(MemoryStorage::new());
        let (branch, t1) = seeded_branch(&storage).await;
        let manager = BacktrackingManager::new(storage.clone());
        let c1 = manager
            .create_checkpoint(&branch.id, "c1", "")
            .await
            .unwrap();

        let fork = manager.fork_from_checkpoint(&c1.id, "f").await.unwrap();
        assert_ne!(fork.id, branch.id);
        assert_eq!(fork.parent_branch_id.as_deref(), Some(branch.id.as_str()));
        assert_eq!(fork.thought_ids(), vec![t1.id.clone()]);
        let last = fork.thoughts.last().unwrap();
        assert_eq!(
            last.metadata.get("forked_from_checkpoint"),
            Some(&serde_json::Value::String(c1.id.clone()))
        );
    }

    #[tokio::test]
    async fn test_diff_requires_same_branch() {
        let storage = Arc::new(MemoryStorage::new());
        let (branch_a, _) = seeded_branch(&storage).await;
        let (branch_b, _) = seeded_branch(&storage).await;
        let manager = BacktrackingManager::new(storage.clone());
        let ca = manager
            .create_checkpoint(&branch_a.id, "a", "")
            .await
            .unwrap();
        let cb = manager
            .create_checkpoint(&branch_b.id, "b", "")
            .await
            .unwrap();
        let err = manager.get_checkpoint_diff(&ca.id, &cb.id).await.unwrap_err();
        assert!(matches!(err, NoesisError::State(_)));
    }

    #[tokio::test]
    async fn test_diff_reports_added_thoughts() {
        let storage = Arc::new(MemoryStorage::new());
        let (branch, _) = seeded_branch(&storage).await;
        let manager = BacktrackingManager::new(storage.clone());
        let c1 = manager
            .create_checkpoint(&branch.id, "c1", "")
            .await
            .unwrap();

        let mut t2 = Thought::new("t2", ThoughtMode::Tree, 0.9);
        t2.branch_id = Some(branch.id.clone());
        storage
            .append_thought_to_branch(&branch.id, t2.clone())
            .await
            .unwrap();
        manager
            .record_change(
                &branch.id,
                DeltaOp::Add,
                DeltaEntity::Thought,
                &t2.id,
                Some(DeltaPayload::Thought(t2.clone())),
            )
            .await
            .unwrap();
        let c2 = manager
            .create_checkpoint(&branch.id, "c2", "")
            .await
            .unwrap();

        let diff = manager.get_checkpoint_diff(&c1.id, &c2.id).await.unwrap();
        assert_eq!(diff.thoughts_added, vec![t2.id]);
        assert!(diff.thoughts_removed.is_empty());
    }

    #[tokio::test]
    async fn test_prune_marks_dead_end_and_stamps_reason() {
        let storage = Arc::new(MemoryStorage::new());
        let (branch, _) = seeded_branch(&storage).await;
        let manager = BacktrackingManager::new(storage.clone());

        let pruned = manager
            .prune_branch(&branch.id, "low priority")
            .await
            .unwrap();
        assert_eq!(pruned.state, BranchState::DeadEnd);
        let last = pruned.thoughts.last().unwrap();
        assert_eq!(last.metadata.get("pruned"), Some(&serde_json::Value::Bool(true)));
        assert_eq!(
            last.metadata.get("prune_reason"),
            Some(&serde_json::Value::String("low priority".to_string()))
        );
    }

    #[tokio::test]
    async fn test_mismatched_payload_rejected() {
        let storage = Arc::new(MemoryStorage::new());
        let manager = BacktrackingManager::new(storage);
        let err = manager
            .record_change(
                "branch-x",
                DeltaOp::Add,
                DeltaEntity::Insight,
                "id",
                Some(DeltaPayload::Thought(Thought::new(
                    "t",
                    ThoughtMode::Linear,
                    0.5,
                ))),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, NoesisError::Validation(_)));
    }
}
