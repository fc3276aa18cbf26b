//! Rule-based reasoning-quality collaborators.
//!
//! These are the reference implementations of the evaluator / bias / fallacy
//! seams consumed by the reflection loop and the `detect-biases` /
//! `detect-fallacies` tools. They are deliberately local and deterministic
//! (pattern scans, not models), so the reflection loop works without any LLM
//! in the path.

use crate::noesis::reflection::{BiasDetector, Evaluation, FallacyDetector, SelfEvaluator};
use crate::noesis::types::Thought;
use async_trait::async_trait;
use std::error::Error;
use tokio_util::sync::CancellationToken;

/// Keyword patterns per bias class.
const BIAS_PATTERNS: [(&str, &[&str]); 4] = [
    (
        "confirmation bias",
        &["obviously", "clearly", "everyone knows", "as expected", "of course"],
    ),
    (
        "overgeneralization",
        &["always", "never", "all of them", "none of them", "without exception"],
    ),
    (
        "anchoring",
        &["as initially stated", "sticking with the first", "the original estimate"],
    ),
    (
        "sunk cost",
        &["already invested", "come too far", "wasted if we stop"],
    ),
];

/// Keyword patterns per fallacy class.
const FALLACY_PATTERNS: [(&str, &[&str]); 4] = [
    (
        "false dilemma",
        &["either we", "only two options", "the only alternative", "no other choice"],
    ),
    (
        "appeal to authority",
        &["experts agree", "studies show", "everyone in the field"],
    ),
    (
        "slippery slope",
        &["will inevitably lead", "before long", "next thing you know"],
    ),
    (
        "circular reasoning",
        &["because it is true", "by definition it must", "proves itself"],
    ),
];

/// Pattern-scan bias detector.
#[derive(Default)]
pub struct RuleBasedBiasDetector;

#[async_trait]
impl BiasDetector for RuleBasedBiasDetector {
    async fn detect_biases(
        &self,
        cancel: &CancellationToken,
        content: &str,
    ) -> Result<Vec<String>, Box<dyn Error + Send + Sync>> {
        if cancel.is_cancelled() {
            return Err("cancelled".into());
        }
        Ok(scan(content, &BIAS_PATTERNS))
    }
}

/// Pattern-scan fallacy detector.
#[derive(Default)]
pub struct RuleBasedFallacyDetector;

#[async_trait]
impl FallacyDetector for RuleBasedFallacyDetector {
    async fn detect_fallacies(
        &self,
        cancel: &CancellationToken,
        content: &str,
    ) -> Result<Vec<String>, Box<dyn Error + Send + Sync>> {
        if cancel.is_cancelled() {
            return Err("cancelled".into());
        }
        Ok(scan(content, &FALLACY_PATTERNS))
    }
}

fn scan(content: &str, patterns: &[(&str, &[&str])]) -> Vec<String> {
    let lowered = content.to_lowercase();
    patterns
        .iter()
        .filter(|(_, keywords)| keywords.iter().any(|k| lowered.contains(k)))
        .map(|(label, _)| label.to_string())
        .collect()
}

/// Structure-based self-evaluator.
///
/// Quality rewards substance (length band, reasoning connectives) and the
/// thought's own confidence; completeness rewards key points and conclusion
/// markers; coherence rewards connective density and penalizes detected
/// contradiction markers.
#[derive(Default)]
pub struct HeuristicEvaluator;

const CONNECTIVES: [&str; 8] = [
    "because", "therefore", "however", "consequently", "thus", "so that", "which means", "hence",
];

const CONCLUSION_MARKERS: [&str; 5] =
    ["in conclusion", "therefore", "overall", "to summarize", "the answer is"];

const CONTRADICTION_MARKERS: [&str; 3] = ["but also not", "contradicts itself", "on the contrary"];

#[async_trait]
impl SelfEvaluator for HeuristicEvaluator {
    async fn evaluate(
        &self,
        cancel: &CancellationToken,
        thought: &Thought,
    ) -> Result<Evaluation, Box<dyn Error + Send + Sync>> {
        if cancel.is_cancelled() {
            return Err("cancelled".into());
        }
        let content = thought.content.to_lowercase();
        let len = thought.content.len();

        let mut quality: f64 = 0.4;
        if (80..=1200).contains(&len) {
            quality += 0.15;
        } else if len < 30 {
            quality -= 0.15;
        }
        let connective_hits = CONNECTIVES.iter().filter(|c| content.contains(*c)).count();
        quality += (0.05 * connective_hits as f64).min(0.2);
        quality += 0.2 * thought.confidence;

        let mut completeness: f64 = 0.4;
        completeness += (0.1 * thought.key_points.len() as f64).min(0.3);
        if CONCLUSION_MARKERS.iter().any(|m| content.contains(m)) {
            completeness += 0.2;
        }
        if len < 40 {
            completeness -= 0.2;
        }

        let mut coherence: f64 = 0.5;
        coherence += (0.08 * connective_hits as f64).min(0.24);
        if CONTRADICTION_MARKERS.iter().any(|m| content.contains(m)) {
            coherence -= 0.3;
        }

        Ok(Evaluation {
            quality_score: quality.clamp(0.0, 1.0),
            completeness_score: completeness.clamp(0.0, 1.0),
            coherence_score: coherence.clamp(0.0, 1.0),
        })
    }
}
