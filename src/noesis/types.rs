//! Core data model: thoughts, branches, insights, cross-references, deltas,
//! checkpoints, and bandit strategies.
//!
//! All enumerations are closed, string-backed (snake_case on the wire), and
//! carry a `parse` constructor used at the API boundary so that free-form
//! caller input is validated before it reaches the core. Thoughts are
//! immutable after creation; refinement mints a new thought whose
//! `parent_id` points at the original.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Mint a new entity id with a short human-readable prefix.
pub(crate) fn mint_id(prefix: &str) -> String {
    format!("{}-{}", prefix, Uuid::new_v4())
}

/// Cognitive strategy tag attached to every thought.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThoughtMode {
    /// Sequential, step-by-step reasoning.
    Linear,
    /// Branch-scoped reasoning with insights and cross-references.
    Tree,
    /// Creative / rebellious continuation.
    Divergent,
    /// Selector that routes to one of the above.
    Auto,
}

impl ThoughtMode {
    /// Parse a caller-supplied mode tag. Unknown tags are rejected.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "linear" => Some(ThoughtMode::Linear),
            "tree" => Some(ThoughtMode::Tree),
            "divergent" => Some(ThoughtMode::Divergent),
            "auto" => Some(ThoughtMode::Auto),
            _ => None,
        }
    }

    /// Wire representation of the tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            ThoughtMode::Linear => "linear",
            ThoughtMode::Tree => "tree",
            ThoughtMode::Divergent => "divergent",
            ThoughtMode::Auto => "auto",
        }
    }
}

/// Lifecycle state of a branch. Pruning is a state transition, not deletion:
/// a `DeadEnd` branch keeps its history and contents reachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchState {
    Active,
    Suspended,
    Completed,
    DeadEnd,
}

impl BranchState {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(BranchState::Active),
            "suspended" => Some(BranchState::Suspended),
            "completed" => Some(BranchState::Completed),
            "dead_end" => Some(BranchState::DeadEnd),
            _ => None,
        }
    }
}

/// Classification of a derived insight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightType {
    Observation,
    Connection,
    Contradiction,
    Synthesis,
}

impl InsightType {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "observation" => Some(InsightType::Observation),
            "connection" => Some(InsightType::Connection),
            "contradiction" => Some(InsightType::Contradiction),
            "synthesis" => Some(InsightType::Synthesis),
            _ => None,
        }
    }
}

/// Labelled relation between two branches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrossRefType {
    Complementary,
    Contradictory,
    BuildsUpon,
    Alternative,
}

impl CrossRefType {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "complementary" => Some(CrossRefType::Complementary),
            "contradictory" => Some(CrossRefType::Contradictory),
            "builds_upon" => Some(CrossRefType::BuildsUpon),
            "alternative" => Some(CrossRefType::Alternative),
            _ => None,
        }
    }
}

/// Typed relation between two thoughts, persisted through the storage layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipType {
    Supports,
    Contradicts,
    Extends,
    Refines,
}

impl RelationshipType {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "supports" => Some(RelationshipType::Supports),
            "contradicts" => Some(RelationshipType::Contradicts),
            "extends" => Some(RelationshipType::Extends),
            "refines" => Some(RelationshipType::Refines),
            _ => None,
        }
    }
}

/// An atomic unit of reasoning content. Immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thought {
    /// Opaque server-minted identifier.
    pub id: String,
    /// Free-text reasoning content.
    pub content: String,
    /// Strategy that produced the thought.
    pub mode: ThoughtMode,
    /// Owning branch, when the thought lives inside a branch chain.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch_id: Option<String>,
    /// Thought this one derives from (refinement, escalation, branching).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// Caller-supplied label (e.g. "hypothesis", "observation").
    #[serde(rename = "type", default)]
    pub thought_type: String,
    /// Confidence in [0, 1].
    pub confidence: f64,
    /// Ordered key points extracted from or supplied with the content.
    #[serde(default)]
    pub key_points: Vec<String>,
    /// Set when the thought deliberately rebels against the premise.
    #[serde(default)]
    pub is_rebellion: bool,
    /// Set when the thought challenges an assumption of its source.
    #[serde(default)]
    pub challenges_assumption: bool,
    pub timestamp: DateTime<Utc>,
    /// Free-form metadata (processing tags, fork origins, prune stamps).
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Thought {
    /// Construct a thought with a fresh id and the current timestamp.
    pub fn new(content: impl Into<String>, mode: ThoughtMode, confidence: f64) -> Self {
        Self {
            id: mint_id("thought"),
            content: content.into(),
            mode,
            branch_id: None,
            parent_id: None,
            thought_type: String::new(),
            confidence: confidence.clamp(0.0, 1.0),
            key_points: Vec::new(),
            is_rebellion: false,
            challenges_assumption: false,
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }
}

/// A validation attached to a thought or insight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Validation {
    pub id: String,
    /// Id of the thought or insight being validated.
    pub target_id: String,
    pub is_valid: bool,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

impl Validation {
    pub fn new(target_id: impl Into<String>, is_valid: bool, reason: impl Into<String>) -> Self {
        Self {
            id: mint_id("validation"),
            target_id: target_id.into(),
            is_valid,
            reason: reason.into(),
            timestamp: Utc::now(),
        }
    }
}

/// A derived observation, connection, contradiction, or synthesis attached to
/// a branch. Parent references form a DAG (no cycles).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Insight {
    pub id: String,
    #[serde(rename = "type")]
    pub insight_type: InsightType,
    pub content: String,
    /// Context tags describing where the insight applies.
    #[serde(default)]
    pub context: Vec<String>,
    /// Applicability in [0, 1].
    pub applicability_score: f64,
    /// Parent insights this one builds on.
    #[serde(default)]
    pub parent_insights: Vec<String>,
    /// Evidence keyed by source description.
    #[serde(default)]
    pub supporting_evidence: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub validations: Vec<Validation>,
    pub timestamp: DateTime<Utc>,
}

impl Insight {
    pub fn new(
        insight_type: InsightType,
        content: impl Into<String>,
        applicability_score: f64,
    ) -> Self {
        Self {
            id: mint_id("insight"),
            insight_type,
            content: content.into(),
            context: Vec::new(),
            applicability_score: applicability_score.clamp(0.0, 1.0),
            parent_insights: Vec::new(),
            supporting_evidence: HashMap::new(),
            validations: Vec::new(),
            timestamp: Utc::now(),
        }
    }
}

/// A point of contact between two branches inside a cross-reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TouchPoint {
    pub from_thought: String,
    pub to_thought: String,
    pub connection: String,
}

/// A labelled relation between two branches with a strength weight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrossRef {
    pub id: String,
    pub from_branch: String,
    pub to_branch: String,
    #[serde(rename = "type")]
    pub ref_type: CrossRefType,
    pub reason: String,
    /// Strength in [0, 1]; feeds branch priority.
    pub strength: f64,
    #[serde(default)]
    pub touch_points: Vec<TouchPoint>,
    pub timestamp: DateTime<Utc>,
}

impl CrossRef {
    pub fn new(
        from_branch: impl Into<String>,
        to_branch: impl Into<String>,
        ref_type: CrossRefType,
        reason: impl Into<String>,
        strength: f64,
    ) -> Self {
        Self {
            id: mint_id("crossref"),
            from_branch: from_branch.into(),
            to_branch: to_branch.into(),
            ref_type,
            reason: reason.into(),
            strength: strength.clamp(0.0, 1.0),
            touch_points: Vec::new(),
            timestamp: Utc::now(),
        }
    }
}

/// A typed relation between two thoughts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub id: String,
    pub from_thought: String,
    pub to_thought: String,
    #[serde(rename = "type")]
    pub rel_type: RelationshipType,
    #[serde(default)]
    pub description: String,
    pub timestamp: DateTime<Utc>,
}

/// An ordered chain of thoughts with associated insights and
/// cross-references.
///
/// Invariants maintained by [`Branch::recalculate`]:
/// - `confidence` equals the arithmetic mean of member thought confidences
///   when the branch is non-empty;
/// - `priority` equals `confidence + 0.1·|insights| + 0.1·Σ strength` over
///   the branch's cross-references.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Branch {
    pub id: String,
    /// Fork source, when this branch was forked from a checkpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_branch_id: Option<String>,
    pub state: BranchState,
    /// Non-negative ranking score; see [`Branch::recalculate`].
    pub priority: f64,
    pub confidence: f64,
    pub thoughts: Vec<Thought>,
    pub insights: Vec<Insight>,
    pub cross_refs: Vec<CrossRef>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
}

impl Branch {
    /// Create an empty active branch with the given id (or a minted one).
    pub fn new(id: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.unwrap_or_else(|| mint_id("branch")),
            parent_branch_id: None,
            state: BranchState::Active,
            priority: 0.0,
            confidence: 0.0,
            thoughts: Vec::new(),
            insights: Vec::new(),
            cross_refs: Vec::new(),
            created_at: now,
            updated_at: now,
            last_accessed_at: now,
        }
    }

    /// Recompute `confidence` and `priority` from current members.
    ///
    /// Priority is computed on demand; it is O(1) per update and deliberately
    /// not cached.
    pub fn recalculate(&mut self) {
        if !self.thoughts.is_empty() {
            let sum: f64 = self.thoughts.iter().map(|t| t.confidence).sum();
            self.confidence = sum / self.thoughts.len() as f64;
        }
        let crossref_strength: f64 = self.cross_refs.iter().map(|c| c.strength).sum();
        self.priority = self.confidence + 0.1 * self.insights.len() as f64 + 0.1 * crossref_strength;
    }

    /// Ids of member thoughts, in insertion order.
    pub fn thought_ids(&self) -> Vec<String> {
        self.thoughts.iter().map(|t| t.id.clone()).collect()
    }

    /// Ids of member insights, in insertion order.
    pub fn insight_ids(&self) -> Vec<String> {
        self.insights.iter().map(|i| i.id.clone()).collect()
    }
}

/// Operation recorded in a [`BranchDelta`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaOp {
    Add,
    Remove,
    Modify,
}

/// Entity a delta applies to. The payload union is keyed by this tag, so an
/// unknown entity type is unrepresentable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaEntity {
    Thought,
    Insight,
    CrossRef,
}

/// Payload carried by add/modify deltas, tagged by entity type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "entity_type", rename_all = "snake_case")]
pub enum DeltaPayload {
    Thought(Thought),
    Insight(Insight),
    CrossRef(CrossRef),
}

impl DeltaPayload {
    /// Tag of the payload, for consistency checks against the delta header.
    pub fn entity(&self) -> DeltaEntity {
        match self {
            DeltaPayload::Thought(_) => DeltaEntity::Thought,
            DeltaPayload::Insight(_) => DeltaEntity::Insight,
            DeltaPayload::CrossRef(_) => DeltaEntity::CrossRef,
        }
    }
}

/// An atomic recorded change to a branch, appended to the time-ordered log
/// the backtracking manager keeps per branch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchDelta {
    pub op: DeltaOp,
    pub entity: DeltaEntity,
    pub entity_id: String,
    /// Present for add/modify; absent for remove.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<DeltaPayload>,
    pub timestamp: DateTime<Utc>,
}

/// Snapshot of a branch's member id lists, stored in checkpoint metadata and
/// used by checkpoint diff.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub thought_ids: Vec<String>,
    pub insight_ids: Vec<String>,
}

/// A named snapshot+delta-count allowing later restore or fork. Checkpoints
/// never auto-expire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub name: String,
    pub description: String,
    pub branch_id: String,
    pub snapshot_id: String,
    /// Number of deltas to apply atop the snapshot to reconstruct state.
    pub delta_count: usize,
    pub created_at: DateTime<Utc>,
    pub metadata: CheckpointMetadata,
}

/// Problem classification recorded with bandit outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProblemType {
    Causal,
    Probabilistic,
    Logical,
    General,
}

/// A reinforcement-learning strategy with a Beta(α, β) posterior.
///
/// α and β are monotonically non-decreasing within a process lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RlStrategy {
    pub id: String,
    pub name: String,
    pub mode: ThoughtMode,
    pub active: bool,
    pub alpha: f64,
    pub beta: f64,
    pub trials: u64,
    pub successes: u64,
}

impl RlStrategy {
    /// Seed a strategy with the uniform Beta(1, 1) prior.
    pub fn new(id: impl Into<String>, name: impl Into<String>, mode: ThoughtMode) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            mode,
            active: true,
            alpha: 1.0,
            beta: 1.0,
            trials: 0,
            successes: 0,
        }
    }

    /// Posterior mean α/(α+β). Reporting only; selection uses sampled draws.
    pub fn success_rate(&self) -> f64 {
        self.alpha / (self.alpha + self.beta)
    }
}

/// Full outcome record written through storage after a bandit-driven run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyOutcome {
    pub strategy_id: String,
    pub problem_type: ProblemType,
    pub confidence_before: f64,
    pub confidence_after: f64,
    pub success: bool,
    /// Execution time in nanoseconds.
    pub execution_nanos: u64,
    pub timestamp: DateTime<Utc>,
}

/// Fast/slow processing path chosen by the dual-process executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessingSystem {
    System1,
    System2,
}

impl ProcessingSystem {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingSystem::System1 => "System1",
            ProcessingSystem::System2 => "System2",
        }
    }
}
