//! Graph-of-Thoughts controller: LLM-backed operations and the Explore
//! orchestrator.
//!
//! The controller maps graph ids onto individually locked [`GraphState`]s,
//! so concurrent mutations of the same graph serialize while operations on
//! distinct graphs proceed in parallel. The Generate / Aggregate / Refine /
//! Score operations consume a [`ReasoningLlm`]; Prune and the structural
//! operations are local.
//!
//! # Explore
//!
//! ```text
//! initialize → [ generate k → score → prune → refine top-n ]* → finalize
//! ```
//!
//! Scoring mode selection: the fast local heuristic by default, else LLM
//! scoring (concurrent when `parallel_scoring` is set and more than one
//! vertex is in play). LLM failures inside the scoring pass are logged and
//! the vertex skipped; generate/refine failures stop the workflow and the
//! partial result is returned with the error attached.

use crate::noesis::error::NoesisError;
use crate::noesis::graph::{
    EdgeType, GotConfig, GraphState, ThoughtEdge, ThoughtVertex, VertexType,
};
use crate::noesis::llm::{ReasoningLlm, ScoreCriteria};
use crate::noesis::types::mint_id;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Structural indicators rewarded by the fast score heuristic.
const STRUCTURE_INDICATORS: [&str; 13] = [
    "1.",
    "2.",
    "first",
    "second",
    "then",
    "next",
    "because",
    "therefore",
    "however",
    "example",
    "specifically",
    "consider",
    "approach",
];

/// Tuning for one Explore run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExploreConfig {
    pub max_iterations: usize,
    pub generate_k: usize,
    /// Score every vertex instead of just the active frontier.
    pub score_all: bool,
    /// Use the local heuristic instead of LLM scoring.
    pub use_fast_scoring: bool,
    /// Score vertices concurrently when LLM scoring is in play.
    pub parallel_scoring: bool,
    pub prune_threshold: f64,
    pub skip_refine: bool,
    pub refine_top_n: usize,
}

impl Default for ExploreConfig {
    fn default() -> Self {
        Self {
            max_iterations: 1,
            generate_k: 3,
            score_all: false,
            use_fast_scoring: true,
            parallel_scoring: false,
            prune_threshold: 0.3,
            skip_refine: false,
            refine_top_n: 1,
        }
    }
}

/// Outcome of an Explore run. When the workflow dies partway the fields
/// reflect everything done so far and `error` carries the cause.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExploreResult {
    pub graph_id: String,
    /// Actions taken, in order (initialize, generate, score, prune, refine,
    /// finalize).
    pub actions: Vec<String>,
    /// Terminal vertices, best first.
    pub terminals: Vec<ThoughtVertex>,
    pub vertex_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Per-server controller over all Graph-of-Thoughts instances.
pub struct GotController {
    llm: Arc<dyn ReasoningLlm>,
    graphs: StdMutex<HashMap<String, Arc<Mutex<GraphState>>>>,
}

impl GotController {
    pub fn new(llm: Arc<dyn ReasoningLlm>) -> Self {
        Self {
            llm,
            graphs: StdMutex::new(HashMap::new()),
        }
    }

    /// Create a graph with one initial root vertex. Returns the graph id.
    pub fn initialize(
        &self,
        id: Option<String>,
        initial_content: &str,
        config: Option<GotConfig>,
    ) -> Result<String, NoesisError> {
        let graph_id = id.unwrap_or_else(|| mint_id("graph"));
        let state = GraphState::initialize(
            graph_id.clone(),
            initial_content,
            config.unwrap_or_default(),
        );
        let mut graphs = self
            .graphs
            .lock()
            .map_err(|_| NoesisError::State("graph map lock poisoned".to_string()))?;
        if graphs.contains_key(&graph_id) {
            return Err(NoesisError::Validation(format!(
                "graph already exists: {}",
                graph_id
            )));
        }
        graphs.insert(graph_id.clone(), Arc::new(Mutex::new(state)));
        Ok(graph_id)
    }

    fn graph(&self, graph_id: &str) -> Result<Arc<Mutex<GraphState>>, NoesisError> {
        let graphs = self
            .graphs
            .lock()
            .map_err(|_| NoesisError::State("graph map lock poisoned".to_string()))?;
        graphs
            .get(graph_id)
            .cloned()
            .ok_or_else(|| NoesisError::State(format!("unknown graph: {}", graph_id)))
    }

    /// Deep copy of the current graph state.
    pub async fn get_state(&self, graph_id: &str) -> Result<GraphState, NoesisError> {
        let graph = self.graph(graph_id)?;
        let state = graph.lock().await;
        Ok(state.clone())
    }

    pub async fn add_vertex(
        &self,
        graph_id: &str,
        vertex: ThoughtVertex,
    ) -> Result<(), NoesisError> {
        let graph = self.graph(graph_id)?;
        let result = graph.lock().await.add_vertex(vertex);
        result
    }

    pub async fn add_edge(&self, graph_id: &str, edge: ThoughtEdge) -> Result<(), NoesisError> {
        let graph = self.graph(graph_id)?;
        let result = graph.lock().await.add_edge(edge);
        result
    }

    pub async fn set_active(&self, graph_id: &str, ids: Vec<String>) -> Result<(), NoesisError> {
        let graph = self.graph(graph_id)?;
        let result = graph.lock().await.set_active(ids);
        result
    }

    pub async fn remove_vertex(&self, graph_id: &str, vertex_id: &str) -> Result<(), NoesisError> {
        let graph = self.graph(graph_id)?;
        let result = graph.lock().await.remove_vertex(vertex_id);
        result
    }

    /// Generate `k` continuations from each source vertex (the active
    /// frontier when `sources` is omitted). Sources at or beyond the depth
    /// cap are skipped. The active frontier is replaced with the newly
    /// generated vertex ids.
    pub async fn generate(
        &self,
        cancel: &CancellationToken,
        graph_id: &str,
        k: usize,
        sources: Option<Vec<String>>,
        max_depth: Option<usize>,
    ) -> Result<Vec<ThoughtVertex>, NoesisError> {
        if !(1..=10).contains(&k) {
            return Err(NoesisError::Validation(format!(
                "k must be in 1..=10, got {}",
                k
            )));
        }
        if cancel.is_cancelled() {
            return Err(NoesisError::Cancelled);
        }

        let graph = self.graph(graph_id)?;
        let mut state = graph.lock().await;
        let depth_cap = max_depth.unwrap_or(state.config.max_depth);

        let source_ids = match sources {
            Some(ids) => ids,
            None => state.active.clone(),
        };

        let mut new_ids = Vec::new();
        let mut new_vertices = Vec::new();
        for source_id in source_ids {
            let (content, depth) = {
                let source = state.get_vertex(&source_id)?;
                (source.content.clone(), source.depth)
            };
            if depth >= depth_cap {
                log::debug!(
                    "GotController::generate: skipping {} at depth {} (cap {})",
                    source_id,
                    depth,
                    depth_cap
                );
                continue;
            }

            let continuations = self
                .llm
                .generate(cancel, &content, k)
                .await
                .map_err(NoesisError::collaborator)?;

            for continuation in continuations {
                let mut vertex = ThoughtVertex::new(continuation, VertexType::Generated, 0.7);
                vertex.depth = depth + 1;
                let vertex_id = vertex.id.clone();
                state.add_vertex(vertex)?;
                state.add_edge(ThoughtEdge::new(
                    source_id.clone(),
                    vertex_id.clone(),
                    EdgeType::DerivesFrom,
                    0.9,
                ))?;
                new_ids.push(vertex_id.clone());
                new_vertices.push(state.get_vertex(&vertex_id)?.clone());
            }
        }

        state.active = new_ids;
        Ok(new_vertices)
    }

    /// Combine several vertices into one aggregated vertex.
    pub async fn aggregate(
        &self,
        cancel: &CancellationToken,
        graph_id: &str,
        ids: &[String],
        problem: &str,
    ) -> Result<ThoughtVertex, NoesisError> {
        if cancel.is_cancelled() {
            return Err(NoesisError::Cancelled);
        }
        let graph = self.graph(graph_id)?;
        let mut state = graph.lock().await;

        if ids.len() < state.config.aggregate_min_paths {
            return Err(NoesisError::Validation(format!(
                "aggregate requires at least {} paths, got {}",
                state.config.aggregate_min_paths,
                ids.len()
            )));
        }

        let mut contents = Vec::new();
        let mut max_depth = 0;
        for id in ids {
            let vertex = state.get_vertex(id)?;
            contents.push(vertex.content.clone());
            max_depth = max_depth.max(vertex.depth);
        }

        let combined = self
            .llm
            .aggregate(cancel, &contents, problem)
            .await
            .map_err(NoesisError::collaborator)?;

        let mut vertex = ThoughtVertex::new(combined, VertexType::Aggregated, 0.85);
        vertex.depth = max_depth + 1;
        let vertex_id = vertex.id.clone();
        state.add_vertex(vertex)?;
        for parent in ids {
            state.add_edge(ThoughtEdge::new(
                parent.clone(),
                vertex_id.clone(),
                EdgeType::Aggregates,
                0.8,
            ))?;
        }
        Ok(state.get_vertex(&vertex_id)?.clone())
    }

    /// Refine a vertex into an improved sibling at the same depth.
    pub async fn refine(
        &self,
        cancel: &CancellationToken,
        graph_id: &str,
        vertex_id: &str,
        problem: &str,
    ) -> Result<ThoughtVertex, NoesisError> {
        if cancel.is_cancelled() {
            return Err(NoesisError::Cancelled);
        }
        let graph = self.graph(graph_id)?;
        let mut state = graph.lock().await;

        let (content, depth, refined_count) = {
            let vertex = state.get_vertex(vertex_id)?;
            (vertex.content.clone(), vertex.depth, vertex.refined_count)
        };
        if refined_count >= state.config.max_refinements {
            return Err(NoesisError::Bound(format!(
                "vertex {} already refined {} times (max {})",
                vertex_id, refined_count, state.config.max_refinements
            )));
        }

        let improved = self
            .llm
            .refine(cancel, &content, problem, refined_count)
            .await
            .map_err(NoesisError::collaborator)?;

        let mut vertex = ThoughtVertex::new(improved, VertexType::Refined, 0.8);
        vertex.depth = depth;
        vertex.refined_count = refined_count + 1;
        let new_id = vertex.id.clone();
        state.add_vertex(vertex)?;
        state.add_edge(ThoughtEdge::new(
            vertex_id.to_string(),
            new_id.clone(),
            EdgeType::Refines,
            0.9,
        ))?;
        Ok(state.get_vertex(&new_id)?.clone())
    }

    /// Score one vertex via the LLM under the fixed criterion weights and
    /// write the weighted result into `vertex.score`.
    pub async fn score(
        &self,
        cancel: &CancellationToken,
        graph_id: &str,
        vertex_id: &str,
        problem: &str,
    ) -> Result<f64, NoesisError> {
        if cancel.is_cancelled() {
            return Err(NoesisError::Cancelled);
        }
        let graph = self.graph(graph_id)?;
        let mut state = graph.lock().await;
        let content = state.get_vertex(vertex_id)?.content.clone();

        let weights = ScoreCriteria::default();
        let scores = self
            .llm
            .score(cancel, &content, problem, &weights)
            .await
            .map_err(NoesisError::collaborator)?;
        let overall = scores.weighted(&weights);

        if let Some(vertex) = state.vertices.get_mut(vertex_id) {
            vertex.score = overall;
        }
        Ok(overall)
    }

    /// Remove every vertex with `0 < score < threshold` that is neither a
    /// root nor a terminal. Returns the number removed.
    pub async fn prune(
        &self,
        graph_id: &str,
        threshold: Option<f64>,
    ) -> Result<usize, NoesisError> {
        let graph = self.graph(graph_id)?;
        let mut state = graph.lock().await;
        let threshold = threshold.unwrap_or(state.config.prune_threshold);

        let doomed: Vec<String> = state
            .vertices
            .values()
            .filter(|v| v.score > 0.0 && v.score < threshold)
            .filter(|v| !state.roots.contains(&v.id) && !state.terminals.contains(&v.id))
            .map(|v| v.id.clone())
            .collect();
        for id in &doomed {
            state.remove_vertex(id)?;
        }
        Ok(doomed.len())
    }

    /// Mark the top-3 scored vertices as terminals and return them.
    pub async fn finalize(&self, graph_id: &str) -> Result<Vec<ThoughtVertex>, NoesisError> {
        let graph = self.graph(graph_id)?;
        let mut state = graph.lock().await;
        let top: Vec<ThoughtVertex> = state
            .vertices_by_score()
            .into_iter()
            .take(3)
            .cloned()
            .collect();
        let ids: Vec<String> = top.iter().map(|v| v.id.clone()).collect();
        state.set_terminals(ids)?;
        Ok(top)
    }

    /// Auto-orchestrated workflow over a fresh graph.
    pub async fn explore(
        &self,
        cancel: &CancellationToken,
        initial_thought: &str,
        problem: &str,
        config: Option<ExploreConfig>,
    ) -> Result<ExploreResult, NoesisError> {
        let config = config.unwrap_or_default();
        let graph_id = self.initialize(None, initial_thought, None)?;
        let mut actions = vec!["initialize".to_string()];
        let mut error: Option<String> = None;

        'iterations: for iteration in 0..config.max_iterations {
            if cancel.is_cancelled() {
                error = Some("cancelled".to_string());
                break;
            }

            match self
                .generate(cancel, &graph_id, config.generate_k, None, None)
                .await
            {
                Ok(_) => actions.push("generate".to_string()),
                Err(err) => {
                    error = Some(err.to_string());
                    break 'iterations;
                }
            }

            if let Err(err) = self.score_pass(cancel, &graph_id, problem, &config).await {
                error = Some(err.to_string());
                break 'iterations;
            }
            actions.push("score".to_string());

            match self.prune(&graph_id, Some(config.prune_threshold)).await {
                Ok(removed) => {
                    actions.push("prune".to_string());
                    log::debug!(
                        "GotController::explore: iteration {} pruned {} vertices",
                        iteration,
                        removed
                    );
                }
                Err(err) => {
                    error = Some(err.to_string());
                    break 'iterations;
                }
            }

            if !config.skip_refine {
                let targets: Vec<String> = {
                    let graph = self.graph(&graph_id)?;
                    let state = graph.lock().await;
                    state
                        .vertices_by_score()
                        .into_iter()
                        .filter(|v| v.score > 0.0)
                        .take(config.refine_top_n)
                        .map(|v| v.id.clone())
                        .collect()
                };
                for target in targets {
                    match self.refine(cancel, &graph_id, &target, problem).await {
                        Ok(refined) => {
                            // Refresh the frontier: the refinement supersedes
                            // its source when the source was active.
                            let graph = self.graph(&graph_id)?;
                            let mut state = graph.lock().await;
                            if let Some(slot) =
                                state.active.iter_mut().find(|id| **id == target)
                            {
                                *slot = refined.id.clone();
                            }
                        }
                        Err(err) => {
                            error = Some(err.to_string());
                            break 'iterations;
                        }
                    }
                }
                actions.push("refine".to_string());
            }
        }

        let terminals = self.finalize(&graph_id).await?;
        actions.push("finalize".to_string());
        let vertex_count = {
            let graph = self.graph(&graph_id)?;
            let state = graph.lock().await;
            state.vertices.len()
        };

        Ok(ExploreResult {
            graph_id,
            actions,
            terminals,
            vertex_count,
            error,
        })
    }

    /// One scoring pass over the frontier (or the whole graph). LLM failures
    /// are logged and the vertex skipped.
    async fn score_pass(
        &self,
        cancel: &CancellationToken,
        graph_id: &str,
        problem: &str,
        config: &ExploreConfig,
    ) -> Result<(), NoesisError> {
        let graph = self.graph(graph_id)?;

        let targets: Vec<(String, String, usize)> = {
            let state = graph.lock().await;
            let ids: Vec<String> = if config.score_all {
                state.vertices.keys().cloned().collect()
            } else {
                state.active.clone()
            };
            ids.into_iter()
                .filter_map(|id| {
                    state
                        .vertices
                        .get(&id)
                        .map(|v| (id.clone(), v.content.clone(), v.depth))
                })
                .collect()
        };

        if config.use_fast_scoring {
            let mut state = graph.lock().await;
            for (id, content, depth) in &targets {
                let score = fast_score(content, problem, *depth);
                if let Some(vertex) = state.vertices.get_mut(id) {
                    vertex.score = score;
                }
            }
            return Ok(());
        }

        let weights = ScoreCriteria::default();
        if config.parallel_scoring && targets.len() > 1 {
            let futures = targets.iter().map(|(id, content, _)| {
                let llm = self.llm.clone();
                let weights = weights.clone();
                async move {
                    let result = llm.score(cancel, content, problem, &weights).await;
                    (id.clone(), result)
                }
            });
            let results = join_all(futures).await;
            // Results are serialised through the graph lock before write-back.
            let mut state = graph.lock().await;
            for (id, result) in results {
                match result {
                    Ok(scores) => {
                        if let Some(vertex) = state.vertices.get_mut(&id) {
                            vertex.score = scores.weighted(&weights);
                        }
                    }
                    Err(err) => {
                        log::warn!("GotController::score_pass: skipping {}: {}", id, err);
                    }
                }
            }
        } else {
            for (id, content, _) in &targets {
                if cancel.is_cancelled() {
                    return Err(NoesisError::Cancelled);
                }
                match self.llm.score(cancel, content, problem, &weights).await {
                    Ok(scores) => {
                        let mut state = graph.lock().await;
                        if let Some(vertex) = state.vertices.get_mut(id) {
                            vertex.score = scores.weighted(&weights);
                        }
                    }
                    Err(err) => {
                        log::warn!("GotController::score_pass: skipping {}: {}", id, err);
                    }
                }
            }
        }
        Ok(())
    }
}

/// Local heuristic used when LLM scoring is disabled.
pub fn fast_score(content: &str, problem: &str, depth: usize) -> f64 {
    let mut score = 0.5;
    let len = content.len();
    if (100..=500).contains(&len) {
        score += 0.15;
    } else if (50..800).contains(&len) {
        score += 0.08;
    }
    if len < 20 {
        score -= 0.2;
    }

    let lowered = content.to_lowercase();
    let problem_words: Vec<String> = problem
        .split_whitespace()
        .filter(|w| w.len() > 3)
        .map(|w| w.to_lowercase())
        .collect();
    if !problem_words.is_empty() {
        let matched = problem_words.iter().filter(|w| lowered.contains(*w)).count();
        score += 0.2 * matched as f64 / problem_words.len() as f64;
    }

    let structure_hits = STRUCTURE_INDICATORS
        .iter()
        .filter(|indicator| lowered.contains(*indicator))
        .count();
    score += 0.03 * structure_hits as f64;

    score += (0.05 * depth as f64).min(0.15);

    score = score.max(0.1).min(0.98);
    score = score.min(0.95);
    score.clamp(0.0, 1.0)
}
