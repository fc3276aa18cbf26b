//! Iterative reflection: evaluate → critique → refine.
//!
//! Given an initial thought, the loop evaluates its quality through the
//! self-evaluator collaborator, collects a critique (detected biases,
//! fallacies, and rule-based quality issues), and refines the thought into a
//! new stored thought parented on the previous iteration. Stop rules, in
//! priority order per iteration:
//!
//! 1. quality ≥ threshold → "threshold reached"
//! 2. no issues and quality ≥ 0.7 → "no significant issues"
//! 3. from the second iteration, improvement in [0, min_improvement) →
//!    "insufficient improvement"
//! 4. iteration budget exhausted → "max iterations reached"
//!
//! Cancellation is honoured at each iteration boundary; the report built so
//! far is returned with stop reason "cancelled".

use crate::noesis::error::NoesisError;
use crate::noesis::storage::Storage;
use crate::noesis::types::{Thought, ThoughtMode};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Bounds for one reflection run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReflectionConfig {
    pub max_iterations: usize,
    pub quality_threshold: f64,
    pub min_improvement: f64,
    pub challenge_assumptions: bool,
}

impl Default for ReflectionConfig {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            quality_threshold: 0.8,
            min_improvement: 0.05,
            challenge_assumptions: true,
        }
    }
}

/// Scores returned by the self-evaluator collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evaluation {
    pub quality_score: f64,
    pub completeness_score: f64,
    pub coherence_score: f64,
}

/// Evaluates a thought's quality. Collaborator seam.
#[async_trait]
pub trait SelfEvaluator: Send + Sync {
    async fn evaluate(
        &self,
        cancel: &CancellationToken,
        thought: &Thought,
    ) -> Result<Evaluation, Box<dyn Error + Send + Sync>>;
}

/// Detects cognitive biases in content. Collaborator seam.
#[async_trait]
pub trait BiasDetector: Send + Sync {
    async fn detect_biases(
        &self,
        cancel: &CancellationToken,
        content: &str,
    ) -> Result<Vec<String>, Box<dyn Error + Send + Sync>>;
}

/// Detects logical fallacies in content. Collaborator seam.
#[async_trait]
pub trait FallacyDetector: Send + Sync {
    async fn detect_fallacies(
        &self,
        cancel: &CancellationToken,
        content: &str,
    ) -> Result<Vec<String>, Box<dyn Error + Send + Sync>>;
}

/// Critique assembled for one iteration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Critique {
    pub biases: Vec<String>,
    pub fallacies: Vec<String>,
    pub issues: Vec<String>,
    pub recommendations: Vec<String>,
    pub should_refine: bool,
}

/// One evaluate/critique/refine pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReflectionIteration {
    pub iteration: usize,
    pub thought_id: String,
    pub evaluation: Evaluation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub critique: Option<Critique>,
    /// Issue classes addressed by the refinement minted in this pass.
    #[serde(default)]
    pub improvements: Vec<String>,
}

/// Full report of a reflection run. Partial state is preserved when the run
/// stops early (threshold, stagnation, cancellation).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReflectionReport {
    pub initial_thought_id: String,
    pub final_thought_id: String,
    pub initial_quality: f64,
    pub final_quality: f64,
    pub iterations: Vec<ReflectionIteration>,
    pub stop_reason: String,
    pub success: bool,
}

/// The reflection loop with its three collaborators.
pub struct ReflectionLoop {
    storage: Arc<dyn Storage>,
    evaluator: Arc<dyn SelfEvaluator>,
    bias_detector: Arc<dyn BiasDetector>,
    fallacy_detector: Arc<dyn FallacyDetector>,
}

impl ReflectionLoop {
    pub fn new(
        storage: Arc<dyn Storage>,
        evaluator: Arc<dyn SelfEvaluator>,
        bias_detector: Arc<dyn BiasDetector>,
        fallacy_detector: Arc<dyn FallacyDetector>,
    ) -> Self {
        Self {
            storage,
            evaluator,
            bias_detector,
            fallacy_detector,
        }
    }

    /// Run the loop over a stored thought.
    pub async fn refine_thought(
        &self,
        cancel: &CancellationToken,
        thought_id: &str,
        config: &ReflectionConfig,
    ) -> Result<ReflectionReport, NoesisError> {
        let mut current = self.storage.get_thought(thought_id).await?;
        let mut iterations: Vec<ReflectionIteration> = Vec::new();
        let mut initial_quality = 0.0;
        let mut previous_quality: Option<f64> = None;
        let mut final_quality = 0.0;
        let mut stop_reason = "max iterations reached".to_string();

        for iteration in 0..config.max_iterations {
            if cancel.is_cancelled() {
                stop_reason = "cancelled".to_string();
                break;
            }

            let evaluation = self
                .evaluator
                .evaluate(cancel, &current)
                .await
                .map_err(NoesisError::collaborator)?;
            let quality = evaluation.quality_score;
            if iteration == 0 {
                initial_quality = quality;
            }
            final_quality = quality;

            if quality >= config.quality_threshold {
                iterations.push(ReflectionIteration {
                    iteration,
                    thought_id: current.id.clone(),
                    evaluation,
                    critique: None,
                    improvements: Vec::new(),
                });
                stop_reason = "threshold reached".to_string();
                break;
            }

            let critique = self.critique(cancel, &current, &evaluation).await?;
            if !critique.should_refine {
                iterations.push(ReflectionIteration {
                    iteration,
                    thought_id: current.id.clone(),
                    evaluation,
                    critique: Some(critique),
                    improvements: Vec::new(),
                });
                stop_reason = "no significant issues".to_string();
                break;
            }

            if let Some(previous) = previous_quality {
                let delta = quality - previous;
                if (0.0..config.min_improvement).contains(&delta) {
                    iterations.push(ReflectionIteration {
                        iteration,
                        thought_id: current.id.clone(),
                        evaluation,
                        critique: Some(critique),
                        improvements: Vec::new(),
                    });
                    stop_reason = "insufficient improvement".to_string();
                    break;
                }
            }
            previous_quality = Some(quality);

            let improvements = improvement_classes(&critique);
            let refined = self.mint_refinement(&current, &critique, config).await?;
            iterations.push(ReflectionIteration {
                iteration,
                thought_id: current.id.clone(),
                evaluation,
                critique: Some(critique),
                improvements,
            });
            current = refined;
        }

        Ok(ReflectionReport {
            initial_thought_id: thought_id.to_string(),
            final_thought_id: current.id.clone(),
            initial_quality,
            final_quality,
            iterations,
            stop_reason,
            success: final_quality >= config.quality_threshold,
        })
    }

    async fn critique(
        &self,
        cancel: &CancellationToken,
        thought: &Thought,
        evaluation: &Evaluation,
    ) -> Result<Critique, NoesisError> {
        let biases = self
            .bias_detector
            .detect_biases(cancel, &thought.content)
            .await
            .map_err(NoesisError::collaborator)?;
        let fallacies = self
            .fallacy_detector
            .detect_fallacies(cancel, &thought.content)
            .await
            .map_err(NoesisError::collaborator)?;

        let mut issues = Vec::new();
        let mut recommendations = Vec::new();
        for bias in &biases {
            issues.push(format!("bias detected: {}", bias));
            recommendations.push(format!("reconsider the claim without the {}", bias));
        }
        for fallacy in &fallacies {
            issues.push(format!("fallacy detected: {}", fallacy));
            recommendations.push(format!("restructure the argument to avoid the {}", fallacy));
        }
        if evaluation.completeness_score < 0.6 {
            issues.push("incomplete".to_string());
            recommendations.push("cover the missing aspects of the problem".to_string());
        }
        if evaluation.coherence_score < 0.6 {
            issues.push("lacks coherence".to_string());
            recommendations.push("connect the steps into a single line of argument".to_string());
        }

        let should_refine = !issues.is_empty() || evaluation.quality_score < 0.7;
        Ok(Critique {
            biases,
            fallacies,
            issues,
            recommendations,
            should_refine,
        })
    }

    /// Mint and store the refined thought for the next iteration.
    async fn mint_refinement(
        &self,
        current: &Thought,
        critique: &Critique,
        config: &ReflectionConfig,
    ) -> Result<Thought, NoesisError> {
        let mut content = String::new();
        content.push_str("Refined reasoning:\n");
        content.push_str(&current.content);
        if !critique.issues.is_empty() {
            content.push_str("\n\nAddressing the issues found:\n");
            for issue in &critique.issues {
                content.push_str(&format!("- {}\n", issue));
            }
        }
        if !critique.recommendations.is_empty() {
            content.push_str("\nApplying:\n");
            for recommendation in &critique.recommendations {
                content.push_str(&format!("- {}\n", recommendation));
            }
        }
        if config.challenge_assumptions {
            content.push_str("\nAssumption check: which premises above could fail, and what follows if they do?\n");
        }

        let mut refined = Thought::new(
            content,
            current.mode,
            (current.confidence + 0.05).min(1.0),
        );
        refined.parent_id = Some(current.id.clone());
        refined.branch_id = current.branch_id.clone();
        refined.thought_type = "refinement".to_string();
        refined.key_points = current.key_points.clone();
        Ok(self.storage.store_thought(refined).await?)
    }
}

fn improvement_classes(critique: &Critique) -> Vec<String> {
    let mut classes = Vec::new();
    if !critique.biases.is_empty() {
        classes.push("addressed biases".to_string());
    }
    if !critique.fallacies.is_empty() {
        classes.push("addressed fallacies".to_string());
    }
    if critique.issues.iter().any(|i| i == "incomplete") {
        classes.push("addressed completeness".to_string());
    }
    if critique.issues.iter().any(|i| i == "lacks coherence") {
        classes.push("addressed coherence".to_string());
    }
    classes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::noesis::storage::MemoryStorage;

    /// Evaluator whose quality scores follow a fixed schedule per call.
    struct ScriptedEvaluator {
        qualities: Vec<f64>,
        completeness: f64,
        coherence: f64,
        calls: std::sync::atomic::AtomicUsize,
    }

    impl ScriptedEvaluator {
        fn new(qualities: Vec<f64>) -> Self {
            Self {
                qualities,
                completeness: 0.8,
                coherence: 0.8,
                calls: std::sync::atomic::AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl SelfEvaluator for ScriptedEvaluator {
        async fn evaluate(
            &self,
            _cancel: &CancellationToken,
            _thought: &Thought,
        ) -> Result<Evaluation, Box<dyn Error + Send + Sync>> {
            let idx = self
                .calls
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            let quality = self.qualities[idx.min(self.qualities.len() - 1)];
            Ok(Evaluation {
                quality_score: quality,
                completeness_score: self.completeness,
                coherence_score: self.coherence,
            })
        }
    }

    struct NoFindings;

    #[async_trait]
    impl BiasDetector for NoFindings {
        async fn detect_biases(
            &self,
            _cancel: &CancellationToken,
            _content: &str,
        ) -> Result<Vec<String>, Box<dyn Error + Send + Sync>> {
            Ok(Vec::new())
        }
    }

    #[async_trait]
    impl FallacyDetector for NoFindings {
        async fn detect_fallacies(
            &self,
            _cancel: &CancellationToken,
            _content: &str,
        ) -> Result<Vec<String>, Box<dyn Error + Send + Sync>> {
            Ok(Vec::new())
        }
    }

    async fn run_loop(
        qualities: Vec<f64>,
        config: &ReflectionConfig,
    ) -> (ReflectionReport, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::new());
        let thought = storage
            .store_thought(Thought::new("initial reasoning", ThoughtMode::Linear, 0.7))
            .await
            .unwrap();
        let reflection = ReflectionLoop::new(
            storage.clone(),
            Arc::new(ScriptedEvaluator::new(qualities)),
            Arc::new(NoFindings),
            Arc::new(NoFindings),
        );
        let report = reflection
            .refine_thought(&CancellationToken::new(), &thought.id, config)
            .await
            .unwrap();
        (report, storage)
    }

    #[tokio::test]
    async fn test_stops_immediately_on_threshold() {
        let (report, storage) = run_loop(vec![0.85], &ReflectionConfig::default()).await;
        assert_eq!(report.stop_reason, "threshold reached");
        assert_eq!(report.iterations.len(), 1);
        assert!(report.success);
        assert_eq!(report.final_thought_id, report.initial_thought_id);
        // No refined thought was stored.
        let metrics = storage.get_metrics().await.unwrap();
        assert_eq!(metrics.total_thoughts, 1);
    }

    #[tokio::test]
    async fn test_no_significant_issues_stop() {
        // Quality 0.75: below threshold 0.8, above the 0.7 refine cut, with
        // clean critique → "no significant issues".
        let (report, _) = run_loop(vec![0.75], &ReflectionConfig::default()).await;
        assert_eq!(report.stop_reason, "no significant issues");
        assert!(!report.success);
    }

    #[tokio::test]
    async fn test_insufficient_improvement_stop() {
        // 0.5 → refine; 0.52 improvement of 0.02 < 0.05 → stop.
        let (report, _) = run_loop(vec![0.5, 0.52], &ReflectionConfig::default()).await;
        assert_eq!(report.stop_reason, "insufficient improvement");
        assert_eq!(report.iterations.len(), 2);
        assert!((report.initial_quality - 0.5).abs() < 1e-9);
        assert!((report.final_quality - 0.52).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_max_iterations_exhaustion() {
        let config = ReflectionConfig {
            max_iterations: 3,
            ..ReflectionConfig::default()
        };
        // Each pass improves by 0.1: enough to keep going, never reaching 0.8.
        let (report, storage) = run_loop(vec![0.3, 0.4, 0.5], &config).await;
        assert_eq!(report.stop_reason, "max iterations reached");
        assert_eq!(report.iterations.len(), 3);
        assert!(!report.success);
        // Three refinements were minted on top of the original.
        let metrics = storage.get_metrics().await.unwrap();
        assert_eq!(metrics.total_thoughts, 4);
        assert_ne!(report.final_thought_id, report.initial_thought_id);
    }

    #[tokio::test]
    async fn test_refinements_chain_parents() {
        let config = ReflectionConfig {
            max_iterations: 2,
            ..ReflectionConfig::default()
        };
        let (report, storage) = run_loop(vec![0.3, 0.5], &config).await;
        let last = storage
            .get_thought(&report.final_thought_id)
            .await
            .unwrap();
        let parent = storage.get_thought(last.parent_id.as_ref().unwrap()).await.unwrap();
        assert_eq!(parent.parent_id.as_deref(), Some(report.initial_thought_id.as_str()));
    }

    #[tokio::test]
    async fn test_cancellation_returns_partial_report() {
        let storage = Arc::new(MemoryStorage::new());
        let thought = storage
            .store_thought(Thought::new("x", ThoughtMode::Linear, 0.7))
            .await
            .unwrap();
        let reflection = ReflectionLoop::new(
            storage.clone(),
            Arc::new(ScriptedEvaluator::new(vec![0.5])),
            Arc::new(NoFindings),
            Arc::new(NoFindings),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = reflection
            .refine_thought(&cancel, &thought.id, &ReflectionConfig::default())
            .await
            .unwrap();
        assert_eq!(report.stop_reason, "cancelled");
        assert!(report.iterations.is_empty());
    }
}
