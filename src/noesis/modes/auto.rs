//! Auto mode: layered strategy selection.
//!
//! Selection runs through layers in this exact order, stopping at the first
//! hit:
//!
//! 1. `force_rebellion` → divergent (confidence 1.0)
//! 2. branch signals (`branch_id`, cross-refs, key points) → tree (1.0)
//! 3. Thompson bandit over registered strategies, when enabled (0.95)
//! 4. semantic prototype matching, when an embedder is attached (remapped
//!    similarity)
//! 5. keyword scan, divergent keywords before tree keywords (0.8)
//! 6. default → linear (0.5)
//!
//! The prototype sentence lists are process-wide constants. At
//! embedder-attach time all prototypes are embedded in one batch and
//! averaged component-wise per mode; any failure disables the semantic
//! layer (logged) while the other layers keep working.

use crate::noesis::bandit::ThompsonSelector;
use crate::noesis::error::NoesisError;
use crate::noesis::modes::{ModeRegistry, ThinkingMode, ThoughtInput, ThoughtResult};
use crate::noesis::storage::Storage;
use crate::noesis::types::{ProblemType, StrategyOutcome, ThoughtMode};
use async_trait::async_trait;
use chrono::Utc;
use lazy_static::lazy_static;
use std::error::Error;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Default success cut for bandit outcome recording.
pub const DEFAULT_OUTCOME_THRESHOLD: f64 = 0.7;

/// Similarity band remapped onto [0, 1] confidence for semantic selection.
const SEMANTIC_SIM_LOW: f64 = 0.3;
const SEMANTIC_SIM_HIGH: f64 = 0.8;

const DIVERGENT_KEYWORDS: [&str; 9] = [
    "creative",
    "unconventional",
    "what if",
    "imagine",
    "challenge",
    "rebel",
    "outside the box",
    "innovative",
    "radical",
];

const TREE_KEYWORDS: [&str; 8] = [
    "branch",
    "explore",
    "alternative",
    "parallel",
    "compare",
    "multiple",
    "options",
    "possibilities",
];

lazy_static! {
    /// Prototype sentences per mode, embedded and averaged at attach time.
    static ref MODE_PROTOTYPES: Vec<(ThoughtMode, Vec<&'static str>)> = vec![
        (
            ThoughtMode::Linear,
            vec![
                "Work through this step by step.",
                "First establish the facts, then draw the conclusion.",
                "Follow the chain of reasoning to its end.",
                "Break the problem into ordered stages.",
                "Proceed methodically from premise to result.",
                "Verify each step before moving to the next.",
            ],
        ),
        (
            ThoughtMode::Tree,
            vec![
                "Explore several alternative approaches in parallel.",
                "Branch into multiple lines of investigation.",
                "Compare the options against each other.",
                "Keep several possibilities open at once.",
                "Map out the different paths this could take.",
                "Weigh competing alternatives side by side.",
            ],
        ),
        (
            ThoughtMode::Divergent,
            vec![
                "Imagine a completely unconventional solution.",
                "What if the usual assumptions were wrong?",
                "Challenge the premise and think outside the box.",
                "Invent a radical new framing for this.",
                "Rebel against the obvious answer.",
                "Find the creative angle nobody considered.",
            ],
        ),
    ];
}

/// Embedding provider used for semantic mode selection. Implementations are
/// collaborators; the core never computes embeddings itself.
#[async_trait]
pub trait PrototypeEmbedder: Send + Sync {
    /// Embed a batch of texts, one vector per input, all the same dimension.
    async fn embed(
        &self,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>, Box<dyn Error + Send + Sync>>;
}

/// Averaged prototype vectors, one per mode.
struct PrototypeVectors {
    entries: Vec<(ThoughtMode, Vec<f32>)>,
}

/// Outcome of a selection pass.
#[derive(Debug, Clone)]
pub struct ModeSelection {
    pub mode: ThoughtMode,
    pub confidence: f64,
    /// Which layer decided ("rebellion", "branch_signals", "bandit",
    /// "semantic", "keyword", "default").
    pub layer: &'static str,
    /// Set when the bandit picked the mode.
    pub strategy_id: Option<String>,
}

/// Higher-level selector that routes each input to the best concrete mode
/// and, when the bandit is active, records outcomes after execution.
pub struct AutoMode {
    storage: Arc<dyn Storage>,
    registry: Arc<ModeRegistry>,
    outcome_threshold: f64,
    bandit: Option<ThompsonSelector>,
    embedder: Option<Arc<dyn PrototypeEmbedder>>,
    prototypes: Option<PrototypeVectors>,
}

impl AutoMode {
    pub fn new(storage: Arc<dyn Storage>, registry: Arc<ModeRegistry>) -> Self {
        Self {
            storage,
            registry,
            outcome_threshold: DEFAULT_OUTCOME_THRESHOLD,
            bandit: None,
            embedder: None,
            prototypes: None,
        }
    }

    /// Override the success cut used for bandit outcome recording.
    pub fn with_outcome_threshold(mut self, threshold: f64) -> Self {
        self.outcome_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    /// Load strategies from storage and enable Thompson selection. A load
    /// failure or an empty strategy set leaves the bandit disabled.
    pub async fn enable_bandit(&mut self) {
        match self.storage.get_all_rl_strategies().await {
            Ok(strategies) if !strategies.is_empty() => {
                log::debug!("AutoMode: bandit enabled with {} strategies", strategies.len());
                self.bandit = Some(ThompsonSelector::from_strategies(strategies));
            }
            Ok(_) => {
                log::debug!("AutoMode: no strategies seeded, bandit disabled");
            }
            Err(err) => {
                log::warn!("AutoMode: failed to load strategies, bandit disabled: {}", err);
            }
        }
    }

    /// Attach an embedder and precompute the averaged prototype vectors.
    /// Embeds all prototypes in a single batch; any failure disables the
    /// semantic layer.
    pub async fn attach_embedder(&mut self, embedder: Arc<dyn PrototypeEmbedder>) {
        let texts: Vec<String> = MODE_PROTOTYPES
            .iter()
            .flat_map(|(_, sentences)| sentences.iter().map(|s| s.to_string()))
            .collect();
        let vectors = match embedder.embed(&texts).await {
            Ok(vectors) if vectors.len() == texts.len() => vectors,
            Ok(vectors) => {
                log::warn!(
                    "AutoMode: embedder returned {} vectors for {} prototypes, semantic \
                     selection disabled",
                    vectors.len(),
                    texts.len()
                );
                return;
            }
            Err(err) => {
                log::warn!(
                    "AutoMode: prototype embedding failed, semantic selection disabled: {}",
                    err
                );
                return;
            }
        };

        let mut entries = Vec::new();
        let mut offset = 0;
        for (mode, sentences) in MODE_PROTOTYPES.iter() {
            let slice = &vectors[offset..offset + sentences.len()];
            offset += sentences.len();
            let Some(averaged) = average_vectors(slice) else {
                log::warn!("AutoMode: empty prototype embedding for {:?}, semantic selection disabled", mode);
                return;
            };
            entries.push((*mode, averaged));
        }
        self.embedder = Some(embedder);
        self.prototypes = Some(PrototypeVectors { entries });
    }

    /// Whether semantic selection is currently available.
    pub fn semantic_enabled(&self) -> bool {
        self.embedder.is_some() && self.prototypes.is_some()
    }

    /// Whether bandit selection is currently available.
    pub fn bandit_enabled(&self) -> bool {
        self.bandit.as_ref().map_or(false, |b| !b.is_empty())
    }

    /// Run the selection layers for an input.
    pub async fn select(&self, input: &ThoughtInput) -> ModeSelection {
        if input.force_rebellion {
            return ModeSelection {
                mode: ThoughtMode::Divergent,
                confidence: 1.0,
                layer: "rebellion",
                strategy_id: None,
            };
        }

        if input.branch_id.is_some()
            || !input.cross_refs.is_empty()
            || !input.key_points.is_empty()
        {
            return ModeSelection {
                mode: ThoughtMode::Tree,
                confidence: 1.0,
                layer: "branch_signals",
                strategy_id: None,
            };
        }

        if let Some(bandit) = &self.bandit {
            if let Some(strategy) = bandit.select() {
                return ModeSelection {
                    mode: strategy.mode,
                    confidence: 0.95,
                    layer: "bandit",
                    strategy_id: Some(strategy.id),
                };
            }
        }

        if let Some(selection) = self.select_semantic(&input.content).await {
            return selection;
        }

        let lowered = input.content.to_lowercase();
        for keyword in DIVERGENT_KEYWORDS {
            if lowered.contains(keyword) {
                return ModeSelection {
                    mode: ThoughtMode::Divergent,
                    confidence: 0.8,
                    layer: "keyword",
                    strategy_id: None,
                };
            }
        }
        for keyword in TREE_KEYWORDS {
            if lowered.contains(keyword) {
                return ModeSelection {
                    mode: ThoughtMode::Tree,
                    confidence: 0.8,
                    layer: "keyword",
                    strategy_id: None,
                };
            }
        }

        ModeSelection {
            mode: ThoughtMode::Linear,
            confidence: 0.5,
            layer: "default",
            strategy_id: None,
        }
    }

    async fn select_semantic(&self, content: &str) -> Option<ModeSelection> {
        let embedder = self.embedder.as_ref()?;
        let prototypes = self.prototypes.as_ref()?;

        let embedded = match embedder.embed(&[content.to_string()]).await {
            Ok(mut vectors) if !vectors.is_empty() => vectors.swap_remove(0),
            Ok(_) => return None,
            Err(err) => {
                log::warn!("AutoMode: input embedding failed, falling through: {}", err);
                return None;
            }
        };

        let mut best: Option<(ThoughtMode, f64)> = None;
        for (mode, prototype) in &prototypes.entries {
            let similarity = cosine_similarity(&embedded, prototype);
            if best.map_or(true, |(_, s)| similarity > s) {
                best = Some((*mode, similarity));
            }
        }
        let (mode, similarity) = best?;
        let confidence = ((similarity - SEMANTIC_SIM_LOW) / (SEMANTIC_SIM_HIGH - SEMANTIC_SIM_LOW))
            .clamp(0.0, 1.0);
        Some(ModeSelection {
            mode,
            confidence,
            layer: "semantic",
            strategy_id: None,
        })
    }

    async fn record_outcome(
        &self,
        strategy_id: &str,
        input: &ThoughtInput,
        selection_confidence: f64,
        result_confidence: f64,
        elapsed_nanos: u64,
    ) {
        let success = result_confidence >= self.outcome_threshold;
        if let Some(bandit) = &self.bandit {
            if success {
                bandit.record_success(strategy_id);
            } else {
                bandit.record_failure(strategy_id);
            }
        }

        // Mirror the in-memory increments through storage.
        let storage_result = if success {
            self.storage.increment_thompson_alpha(strategy_id).await
        } else {
            self.storage.increment_thompson_beta(strategy_id).await
        };
        if let Err(err) = storage_result {
            log::warn!("AutoMode: failed to persist bandit increment: {}", err);
        }

        let outcome = StrategyOutcome {
            strategy_id: strategy_id.to_string(),
            problem_type: detect_problem_type(&input.content),
            confidence_before: selection_confidence,
            confidence_after: result_confidence,
            success,
            execution_nanos: elapsed_nanos,
            timestamp: Utc::now(),
        };
        if let Err(err) = self.storage.record_rl_outcome(outcome).await {
            log::warn!("AutoMode: failed to record strategy outcome: {}", err);
        }
    }
}

#[async_trait]
impl ThinkingMode for AutoMode {
    fn name(&self) -> &str {
        "auto"
    }

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

        let selection = self.select(&input).await;
        log::debug!(
            "AutoMode: selected {} via {} (confidence {:.2})",
            selection.mode.as_str(),
            selection.layer,
            selection.confidence
        );

        let mode = self
            .registry
            .get(selection.mode.as_str())
            .await
            .ok_or_else(|| {
                NoesisError::State(format!("mode not registered: {}", selection.mode.as_str()))
            })?;

        let started = Instant::now();
        let result = mode.process_thought(cancel, input.clone()).await?;
        let elapsed_nanos = started.elapsed().as_nanos() as u64;

        if let Some(strategy_id) = &selection.strategy_id {
            self.record_outcome(
                strategy_id,
                &input,
                selection.confidence,
                result.confidence,
                elapsed_nanos,
            )
            .await;
        }

        Ok(result)
    }
}

/// Classify the problem described by the content, for outcome records.
pub fn detect_problem_type(content: &str) -> ProblemType {
    let lowered = content.to_lowercase();
    const CAUSAL: [&str; 5] = ["because", "cause", "effect", "leads to", "results in"];
    const PROBABILISTIC: [&str; 5] = ["probability", "likely", "chance", "odds", "uncertain"];
    const LOGICAL: [&str; 5] = ["implies", "therefore", "if and only if", "contradiction", "premise"];

    if CAUSAL.iter().any(|k| lowered.contains(k)) {
        ProblemType::Causal
    } else if PROBABILISTIC.iter().any(|k| lowered.contains(k)) {
        ProblemType::Probabilistic
    } else if LOGICAL.iter().any(|k| lowered.contains(k)) {
        ProblemType::Logical
    } else {
        ProblemType::General
    }
}

fn average_vectors(vectors: &[Vec<f32>]) -> Option<Vec<f32>> {
    let first = vectors.first()?;
    if first.is_empty() {
        return None;
    }
    let dim = first.len();
    let mut sum = vec![0.0f32; dim];
    for vector in vectors {
        if vector.len() != dim {
            return None;
        }
        for (acc, v) in sum.iter_mut().zip(vector) {
            *acc += v;
        }
    }
    let n = vectors.len() as f32;
    Some(sum.into_iter().map(|v| v / n).collect())
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        dot += (*x as f64) * (*y as f64);
        norm_a += (*x as f64) * (*x as f64);
        norm_b += (*y as f64) * (*y as f64);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}
