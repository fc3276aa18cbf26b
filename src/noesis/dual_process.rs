//! Dual-process execution: a fast System-1 path and a deliberate System-2
//! path, with escalation from the former to the latter.
//!
//! Complexity of an incoming request is scored on [0, 1] from content
//! length, keyword density, and key-point count. Below 0.4 the request runs
//! on System-1, otherwise System-2; callers can force either system. A
//! System-1 answer escalates to System-2 when confidence lands under the
//! configured cut, when the answer carries uncertainty markers, or when a
//! high-complexity problem got a very short answer.

use crate::noesis::error::NoesisError;
use crate::noesis::modes::{ModeRegistry, ThoughtInput, ThoughtResult};
use crate::noesis::storage::Storage;
use crate::noesis::types::{ProcessingSystem, ThoughtMode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Complexity below which System-1 handles the request.
const SYSTEM1_COMPLEXITY_CUT: f64 = 0.4;

/// Complexity at or above which a short System-1 answer looks suspicious.
const HIGH_COMPLEXITY: f64 = 0.7;

/// Answer length under which a high-complexity answer triggers escalation.
const SHORT_ANSWER_LEN: usize = 50;

const COMPLEX_KEYWORDS: [&str; 10] = [
    "analyze",
    "evaluate",
    "compare",
    "trade-off",
    "architecture",
    "optimize",
    "integrate",
    "design",
    "prove",
    "multi-step",
];

const UNCERTAINTY_MARKERS: [&str; 7] = [
    "unsure",
    "maybe",
    "i think",
    "possibly",
    "perhaps",
    "not certain",
    "might be",
];

/// Escalation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DualProcessConfig {
    /// Confidence cut under which a System-1 result escalates.
    pub confidence_threshold: f64,
    pub escalate_on_low_conf: bool,
}

impl Default for DualProcessConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.6,
            escalate_on_low_conf: true,
        }
    }
}

/// Outcome of a dual-process run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DualProcessResult {
    pub thought_id: String,
    /// System that produced the final answer.
    pub system: ProcessingSystem,
    pub escalated: bool,
    pub complexity: f64,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system1_millis: Option<u128>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system2_millis: Option<u128>,
}

/// Routes requests between the fast and deliberate paths.
pub struct DualProcessExecutor {
    registry: Arc<ModeRegistry>,
    storage: Arc<dyn Storage>,
    config: DualProcessConfig,
}

impl DualProcessExecutor {
    pub fn new(
        registry: Arc<ModeRegistry>,
        storage: Arc<dyn Storage>,
        config: DualProcessConfig,
    ) -> Self {
        Self {
            registry,
            storage,
            config,
        }
    }

    /// Score request complexity on [0, 1].
    pub fn complexity(input: &ThoughtInput) -> f64 {
        let mut score = 0.0;

        let len = input.content.len();
        score += (len as f64 / 500.0).min(1.0) * 0.4;

        let lowered = input.content.to_lowercase();
        let keyword_hits = COMPLEX_KEYWORDS
            .iter()
            .filter(|k| lowered.contains(*k))
            .count();
        score += (0.15 * keyword_hits as f64).min(0.4);

        score += (0.1 * input.key_points.len() as f64).min(0.2);

        score.clamp(0.0, 1.0)
    }

    /// Process a request, optionally forcing a system.
    pub async fn execute(
        &self,
        cancel: &CancellationToken,
        input: ThoughtInput,
        force: Option<ProcessingSystem>,
    ) -> Result<DualProcessResult, NoesisError> {
        if cancel.is_cancelled() {
            return Err(NoesisError::Cancelled);
        }

        let complexity = Self::complexity(&input);
        let system = force.unwrap_or(if complexity < SYSTEM1_COMPLEXITY_CUT {
            ProcessingSystem::System1
        } else {
            ProcessingSystem::System2
        });

        match system {
            ProcessingSystem::System2 => {
                let started = Instant::now();
                let result = self.dispatch(cancel, input, ProcessingSystem::System2, None).await?;
                Ok(DualProcessResult {
                    thought_id: result.thought_id,
                    system: ProcessingSystem::System2,
                    escalated: false,
                    complexity,
                    confidence: result.confidence,
                    system1_millis: None,
                    system2_millis: Some(started.elapsed().as_millis()),
                })
            }
            ProcessingSystem::System1 => {
                let s1_started = Instant::now();
                let s1_result = self
                    .dispatch(cancel, input.clone(), ProcessingSystem::System1, None)
                    .await?;
                let s1_millis = s1_started.elapsed().as_millis();

                if !self.should_escalate(&s1_result, complexity).await? {
                    return Ok(DualProcessResult {
                        thought_id: s1_result.thought_id,
                        system: ProcessingSystem::System1,
                        escalated: false,
                        complexity,
                        confidence: s1_result.confidence,
                        system1_millis: Some(s1_millis),
                        system2_millis: None,
                    });
                }

                log::debug!(
                    "DualProcessExecutor: escalating thought {} to System-2",
                    s1_result.thought_id
                );
                let s2_started = Instant::now();
                let s2_result = self
                    .dispatch(
                        cancel,
                        input,
                        ProcessingSystem::System2,
                        Some(s1_result.thought_id.clone()),
                    )
                    .await?;
                Ok(DualProcessResult {
                    thought_id: s2_result.thought_id,
                    system: ProcessingSystem::System2,
                    escalated: true,
                    complexity,
                    confidence: s2_result.confidence,
                    system1_millis: Some(s1_millis),
                    system2_millis: Some(s2_started.elapsed().as_millis()),
                })
            }
        }
    }

    /// Dispatch to the requested mode with the system tags stamped into the
    /// thought metadata. `escalated_from` links an escalation to its
    /// System-1 parent.
    async fn dispatch(
        &self,
        cancel: &CancellationToken,
        mut input: ThoughtInput,
        system: ProcessingSystem,
        escalated_from: Option<String>,
    ) -> Result<ThoughtResult, NoesisError> {
        input.metadata.insert(
            "processing_system".to_string(),
            serde_json::Value::String(system.as_str().to_string()),
        );
        match system {
            ProcessingSystem::System1 => {
                input.metadata.insert(
                    "processing_mode".to_string(),
                    serde_json::Value::String("fast_heuristic".to_string()),
                );
                input
                    .metadata
                    .insert("escalation_available".to_string(), serde_json::Value::Bool(true));
            }
            ProcessingSystem::System2 => {
                input.metadata.insert(
                    "processing_mode".to_string(),
                    serde_json::Value::String("analytical_deliberate".to_string()),
                );
                input
                    .metadata
                    .insert("full_analysis".to_string(), serde_json::Value::Bool(true));
            }
        }
        if let Some(parent) = escalated_from {
            input.metadata.insert(
                "escalated_from_system1".to_string(),
                serde_json::Value::Bool(true),
            );
            input.parent_id = Some(parent);
        }

        let mode_name = input
            .mode
            .filter(|m| *m != ThoughtMode::Auto)
            .unwrap_or(ThoughtMode::Linear);
        let mode = self
            .registry
            .get(mode_name.as_str())
            .await
            .ok_or_else(|| {
                NoesisError::State(format!("mode not registered: {}", mode_name.as_str()))
            })?;
        mode.process_thought(cancel, input).await
    }

    async fn should_escalate(
        &self,
        s1_result: &ThoughtResult,
        complexity: f64,
    ) -> Result<bool, NoesisError> {
        if self.config.escalate_on_low_conf
            && s1_result.confidence < self.config.confidence_threshold
        {
            return Ok(true);
        }

        let thought = self.storage.get_thought(&s1_result.thought_id).await?;
        let lowered = thought.content.to_lowercase();
        if UNCERTAINTY_MARKERS.iter().any(|m| lowered.contains(m)) {
            return Ok(true);
        }

        if complexity >= HIGH_COMPLEXITY && thought.content.len() < SHORT_ANSWER_LEN {
            return Ok(true);
        }

        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::noesis::modes::LinearMode;
    use crate::noesis::storage::MemoryStorage;

    async fn executor(config: DualProcessConfig) -> (DualProcessExecutor, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::new());
        let registry = Arc::new(ModeRegistry::new());
        registry
            .register(Arc::new(LinearMode::new(storage.clone())))
            .await
            .unwrap();
        (
            DualProcessExecutor::new(registry, storage.clone(), config),
            storage,
        )
    }

    #[tokio::test]
    async fn test_simple_request_stays_on_system1() {
        let (executor, storage) = executor(DualProcessConfig::default()).await;
        let mut input = ThoughtInput::new("quick note on naming");
        input.confidence = Some(0.9);
        let result = executor
            .execute(&CancellationToken::new(), input, None)
            .await
            .unwrap();
        assert_eq!(result.system, ProcessingSystem::System1);
        assert!(!result.escalated);
        assert!(result.complexity < 0.4);
        assert!(result.system2_millis.is_none());

        let thought = storage.get_thought(&result.thought_id).await.unwrap();
        assert_eq!(
            thought.metadata.get("processing_mode"),
            Some(&serde_json::Value::String("fast_heuristic".to_string()))
        );
        assert_eq!(
            thought.metadata.get("escalation_available"),
            Some(&serde_json::Value::Bool(true))
        );
    }

    #[tokio::test]
    async fn test_complex_request_routes_to_system2() {
        let (executor, storage) = executor(DualProcessConfig::default()).await;
        let mut input = ThoughtInput::new(
            "Analyze and compare the proposed architecture options, evaluate the \
             trade-off surface, and design an integration plan that we can prove \
             correct across the multi-step rollout. This needs a careful, deliberate \
             treatment of every failure mode, dependency ordering constraint, and \
             rollback path, because the system spans several regions and storage \
             backends with different consistency guarantees and operational limits.",
        );
        input.key_points = vec!["regions".to_string(), "rollback".to_string()];
        input.confidence = Some(0.9);
        let result = executor
            .execute(&CancellationToken::new(), input, None)
            .await
            .unwrap();
        assert_eq!(result.system, ProcessingSystem::System2);
        assert!(!result.escalated);
        let thought = storage.get_thought(&result.thought_id).await.unwrap();
        assert_eq!(
            thought.metadata.get("full_analysis"),
            Some(&serde_json::Value::Bool(true))
        );
    }

    #[tokio::test]
    async fn test_low_confidence_escalates() {
        let (executor, storage) = executor(DualProcessConfig::default()).await;
        let mut input = ThoughtInput::new("short answer");
        input.confidence = Some(0.3); // under the 0.6 default cut
        let result = executor
            .execute(&CancellationToken::new(), input, None)
            .await
            .unwrap();
        assert!(result.escalated);
        assert_eq!(result.system, ProcessingSystem::System2);
        assert!(result.system1_millis.is_some());
        assert!(result.system2_millis.is_some());

        let final_thought = storage.get_thought(&result.thought_id).await.unwrap();
        assert_eq!(
            final_thought.metadata.get("escalated_from_system1"),
            Some(&serde_json::Value::Bool(true))
        );
        // The escalated thought is parented on the System-1 thought.
        let parent = storage
            .get_thought(final_thought.parent_id.as_ref().unwrap())
            .await
            .unwrap();
        assert_eq!(
            parent.metadata.get("processing_system"),
            Some(&serde_json::Value::String("System1".to_string()))
        );
    }

    #[tokio::test]
    async fn test_uncertainty_marker_escalates() {
        let (executor, _) = executor(DualProcessConfig::default()).await;
        let mut input = ThoughtInput::new("maybe the cache is at fault");
        input.confidence = Some(0.9); // confidence alone would not escalate
        let result = executor
            .execute(&CancellationToken::new(), input, None)
            .await
            .unwrap();
        assert!(result.escalated);
    }

    #[tokio::test]
    async fn test_forced_system_overrides_complexity() {
        let (executor, _) = executor(DualProcessConfig::default()).await;
        let mut input = ThoughtInput::new("tiny");
        input.confidence = Some(0.9);
        let result = executor
            .execute(
                &CancellationToken::new(),
                input,
                Some(ProcessingSystem::System2),
            )
            .await
            .unwrap();
        assert_eq!(result.system, ProcessingSystem::System2);
        assert!(!result.escalated);
    }

    #[tokio::test]
    async fn test_escalation_disabled_by_config() {
        let (executor, _) = executor(DualProcessConfig {
            confidence_threshold: 0.6,
            escalate_on_low_conf: false,
        })
        .await;
        let mut input = ThoughtInput::new("plain statement of fact");
        input.confidence = Some(0.3);
        let result = executor
            .execute(&CancellationToken::new(), input, None)
            .await
            .unwrap();
        assert!(!result.escalated);
        assert_eq!(result.system, ProcessingSystem::System1);
    }
}
