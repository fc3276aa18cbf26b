use async_trait::async_trait;
use noesis::error::NoesisError;
use noesis::got::{ExploreConfig, GotController};
use noesis::graph::GotConfig;
use noesis::llm::{CriterionScores, ReasoningLlm, ScoreCriteria};
use std::error::Error;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Mock LLM: generation fans out deterministically, scoring walks a fixed
/// schedule, and every call is counted.
struct ScriptedLlm {
    scores: Vec<f64>,
    score_calls: AtomicUsize,
    fail_scoring: bool,
}

impl ScriptedLlm {
    fn new(scores: Vec<f64>) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        Self {
            scores,
            score_calls: AtomicUsize::new(0),
            fail_scoring: false,
        }
    }

    fn failing_scorer() -> Self {
        Self {
            scores: vec![0.5],
            score_calls: AtomicUsize::new(0),
            fail_scoring: true,
        }
    }
}

#[async_trait]
impl ReasoningLlm for ScriptedLlm {
    async fn generate(
        &self,
        _cancel: &CancellationToken,
        prompt: &str,
        k: usize,
    ) -> Result<Vec<String>, Box<dyn Error + Send + Sync>> {
        Ok((0..k).map(|i| format!("{} → option {}", prompt, i)).collect())
    }

    async fn aggregate(
        &self,
        _cancel: &CancellationToken,
        thoughts: &[String],
        _problem: &str,
    ) -> Result<String, Box<dyn Error + Send + Sync>> {
        Ok(format!("merged {} paths", thoughts.len()))
    }

    async fn refine(
        &self,
        _cancel: &CancellationToken,
        thought: &str,
        _problem: &str,
        _refinement_count: usize,
    ) -> Result<String, Box<dyn Error + Send + Sync>> {
        Ok(format!("{} (sharper)", thought))
    }

    async fn score(
        &self,
        _cancel: &CancellationToken,
        _thought: &str,
        _problem: &str,
        _criteria: &ScoreCriteria,
    ) -> Result<CriterionScores, Box<dyn Error + Send + Sync>> {
        if self.fail_scoring {
            return Err("scoring backend offline".into());
        }
        let idx = self.score_calls.fetch_add(1, Ordering::SeqCst);
        Ok(CriterionScores::uniform(self.scores[idx % self.scores.len()]))
    }

    async fn extract_key_points(
        &self,
        _cancel: &CancellationToken,
        _thought: &str,
    ) -> Result<Vec<String>, Box<dyn Error + Send + Sync>> {
        Ok(vec!["kp".to_string()])
    }

    async fn calculate_novelty(
        &self,
        _cancel: &CancellationToken,
        _thought: &str,
        siblings: &[String],
    ) -> Result<f64, Box<dyn Error + Send + Sync>> {
        Ok(if siblings.is_empty() { 1.0 } else { 0.5 })
    }
}

/// Generate + score + prune: the 0.2 vertex is removed, roots and the
/// better-scored vertices survive.
#[tokio::test]
async fn test_generate_score_prune_scenario() {
    let got = GotController::new(Arc::new(ScriptedLlm::new(vec![0.2, 0.5, 0.8])));
    let cancel = CancellationToken::new();
    let graph_id = got.initialize(None, "x", None).unwrap();

    let generated = got.generate(&cancel, &graph_id, 3, None, None).await.unwrap();
    assert_eq!(generated.len(), 3);
    assert!(generated.iter().all(|v| v.depth == 1));

    for vertex in &generated {
        got.score(&cancel, &graph_id, &vertex.id, "the problem")
            .await
            .unwrap();
    }

    let removed = got.prune(&graph_id, Some(0.3)).await.unwrap();
    assert_eq!(removed, 1);

    let state = got.get_state(&graph_id).await.unwrap();
    assert_eq!(state.vertices.len(), 3);
    assert!(state.vertices.contains_key(&state.roots[0]));
    let surviving_scores: Vec<f64> = state
        .vertices
        .values()
        .filter(|v| v.score > 0.0)
        .map(|v| v.score)
        .collect();
    assert!(surviving_scores.iter().all(|s| *s >= 0.3));
}

#[tokio::test]
async fn test_prune_never_removes_terminals() {
    let got = GotController::new(Arc::new(ScriptedLlm::new(vec![0.1])));
    let cancel = CancellationToken::new();
    let graph_id = got.initialize(None, "seed", None).unwrap();

    let generated = got.generate(&cancel, &graph_id, 1, None, None).await.unwrap();
    got.score(&cancel, &graph_id, &generated[0].id, "p").await.unwrap();
    // Low score, but terminal status protects it.
    got.finalize(&graph_id).await.unwrap();

    let removed = got.prune(&graph_id, Some(0.9)).await.unwrap();
    assert_eq!(removed, 0);
}

#[tokio::test]
async fn test_aggregate_and_refine_boundaries() {
    let got = GotController::new(Arc::new(ScriptedLlm::new(vec![0.5])));
    let cancel = CancellationToken::new();
    let config = GotConfig {
        aggregate_min_paths: 2,
        max_refinements: 1,
        ..GotConfig::default()
    };
    let graph_id = got.initialize(None, "seed", Some(config)).unwrap();

    let generated = got.generate(&cancel, &graph_id, 2, None, None).await.unwrap();
    let ids: Vec<String> = generated.iter().map(|v| v.id.clone()).collect();

    // Aggregate below the minimum is a validation error.
    let err = got
        .aggregate(&cancel, &graph_id, &ids[..1], "p")
        .await
        .unwrap_err();
    assert!(matches!(err, NoesisError::Validation(_)));

    let aggregated = got.aggregate(&cancel, &graph_id, &ids, "p").await.unwrap();
    assert_eq!(aggregated.parents.len(), 2);

    // One refinement allowed, the second exceeds the bound.
    let refined = got
        .refine(&cancel, &graph_id, &aggregated.id, "p")
        .await
        .unwrap();
    let err = got
        .refine(&cancel, &graph_id, &refined.id, "p")
        .await
        .unwrap_err();
    assert!(matches!(err, NoesisError::Bound(_)));
}

#[tokio::test]
async fn test_explore_zero_iterations() {
    let got = GotController::new(Arc::new(ScriptedLlm::new(vec![0.5])));
    let config = ExploreConfig {
        max_iterations: 0,
        ..ExploreConfig::default()
    };
    let result = got
        .explore(&CancellationToken::new(), "seed", "problem", Some(config))
        .await
        .unwrap();
    assert_eq!(result.vertex_count, 1);
    assert_eq!(result.actions, vec!["initialize", "finalize"]);
}

#[tokio::test]
async fn test_explore_llm_scoring_failure_is_survivable() {
    // LLM scoring fails for every vertex; explore logs, skips, and still
    // finalizes with unscored vertices.
    let got = GotController::new(Arc::new(ScriptedLlm::failing_scorer()));
    let config = ExploreConfig {
        use_fast_scoring: false,
        skip_refine: true,
        ..ExploreConfig::default()
    };
    let result = got
        .explore(&CancellationToken::new(), "seed", "problem", Some(config))
        .await
        .unwrap();
    assert!(result.error.is_none());
    assert!(result.actions.contains(&"score".to_string()));
    assert_eq!(result.vertex_count, 4); // root + 3 generated, none pruned
}

#[tokio::test]
async fn test_explore_parallel_scoring_matches_sequential() {
    let sequential = GotController::new(Arc::new(ScriptedLlm::new(vec![0.9])));
    let parallel = GotController::new(Arc::new(ScriptedLlm::new(vec![0.9])));
    let base = ExploreConfig {
        use_fast_scoring: false,
        skip_refine: true,
        ..ExploreConfig::default()
    };

    let seq_result = sequential
        .explore(&CancellationToken::new(), "seed", "problem", Some(base.clone()))
        .await
        .unwrap();
    let par_result = parallel
        .explore(
            &CancellationToken::new(),
            "seed",
            "problem",
            Some(ExploreConfig {
                parallel_scoring: true,
                ..base
            }),
        )
        .await
        .unwrap();

    assert_eq!(seq_result.vertex_count, par_result.vertex_count);
    assert_eq!(seq_result.terminals.len(), par_result.terminals.len());
}

#[tokio::test]
async fn test_concurrent_ops_on_distinct_graphs() {
    let got = Arc::new(GotController::new(Arc::new(ScriptedLlm::new(vec![0.5]))));
    let cancel = CancellationToken::new();
    let g1 = got.initialize(None, "alpha", None).unwrap();
    let g2 = got.initialize(None, "beta", None).unwrap();

    let (r1, r2) = tokio::join!(
        got.generate(&cancel, &g1, 3, None, None),
        got.generate(&cancel, &g2, 3, None, None),
    );
    assert_eq!(r1.unwrap().len(), 3);
    assert_eq!(r2.unwrap().len(), 3);

    let s1 = got.get_state(&g1).await.unwrap();
    let s2 = got.get_state(&g2).await.unwrap();
    assert_eq!(s1.vertices.len(), 4);
    assert_eq!(s2.vertices.len(), 4);
}

#[tokio::test]
async fn test_remove_vertex_cleans_adjacency() {
    let got = GotController::new(Arc::new(ScriptedLlm::new(vec![0.5])));
    let cancel = CancellationToken::new();
    let graph_id = got.initialize(None, "seed", None).unwrap();
    let generated = got.generate(&cancel, &graph_id, 2, None, None).await.unwrap();

    got.remove_vertex(&graph_id, &generated[0].id).await.unwrap();

    let state = got.get_state(&graph_id).await.unwrap();
    let gone = &generated[0].id;
    assert!(!state.vertices.contains_key(gone));
    assert!(state
        .edges
        .values()
        .all(|e| e.from != *gone && e.to != *gone));
    assert!(state
        .vertices
        .values()
        .all(|v| !v.parents.contains(gone) && !v.children.contains(gone)));
    assert!(!state.active.contains(gone));
}
