//! Graph-of-Thoughts state: vertices, edges, and structural mutations.
//!
//! A graph is a DAG of thought vertices. Parent/child lists are unordered
//! sets semantically but insertion-ordered for reproducibility; edges are
//! always added from an existing vertex to a freshly minted one by the GoT
//! operations, which keeps the graph acyclic by construction.

use crate::noesis::error::NoesisError;
use crate::noesis::types::mint_id;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Origin of a thought vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VertexType {
    Initial,
    Generated,
    Aggregated,
    Refined,
}

/// Typed relation between two vertices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeType {
    DerivesFrom,
    Aggregates,
    Refines,
    Contradicts,
    Supports,
}

/// A thought node in the DAG.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThoughtVertex {
    pub id: String,
    pub content: String,
    #[serde(rename = "type")]
    pub vertex_type: VertexType,
    pub confidence: f64,
    /// LLM- or heuristic-assigned quality score in [0, 1]; 0 means unscored.
    pub score: f64,
    pub depth: usize,
    /// Parent vertex ids, insertion-ordered, deduplicated.
    pub parents: Vec<String>,
    /// Child vertex ids, insertion-ordered, deduplicated.
    pub children: Vec<String>,
    /// Number of refinement passes this content has been through.
    pub refined_count: usize,
}

impl ThoughtVertex {
    pub fn new(content: impl Into<String>, vertex_type: VertexType, confidence: f64) -> Self {
        Self {
            id: mint_id("vertex"),
            content: content.into(),
            vertex_type,
            confidence: confidence.clamp(0.0, 1.0),
            score: 0.0,
            depth: 0,
            parents: Vec::new(),
            children: Vec::new(),
            refined_count: 0,
        }
    }
}

/// A typed, weighted edge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThoughtEdge {
    pub id: String,
    pub from: String,
    pub to: String,
    #[serde(rename = "type")]
    pub edge_type: EdgeType,
    pub weight: f64,
}

impl ThoughtEdge {
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        edge_type: EdgeType,
        weight: f64,
    ) -> Self {
        Self {
            id: mint_id("edge"),
            from: from.into(),
            to: to.into(),
            edge_type,
            weight: weight.clamp(0.0, 1.0),
        }
    }
}

/// Structural bounds for a graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GotConfig {
    pub max_vertices: usize,
    pub max_active: usize,
    pub max_depth: usize,
    pub max_refinements: usize,
    pub prune_threshold: f64,
    pub aggregate_min_paths: usize,
}

impl Default for GotConfig {
    fn default() -> Self {
        Self {
            max_vertices: 500,
            max_active: 10,
            max_depth: 10,
            max_refinements: 3,
            prune_threshold: 0.3,
            aggregate_min_paths: 2,
        }
    }
}

/// Full state of one Graph-of-Thoughts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphState {
    pub id: String,
    pub vertices: HashMap<String, ThoughtVertex>,
    pub edges: HashMap<String, ThoughtEdge>,
    /// Initial thought ids.
    pub roots: Vec<String>,
    /// Current frontier, |active| ≤ max_active.
    pub active: Vec<String>,
    /// Final conclusions, protected from pruning.
    pub terminals: Vec<String>,
    pub config: GotConfig,
}

impl GraphState {
    /// Create a graph with one initial root vertex at depth 0.
    pub fn initialize(id: impl Into<String>, initial_content: &str, config: GotConfig) -> Self {
        let root = ThoughtVertex::new(initial_content, VertexType::Initial, 0.8);
        let root_id = root.id.clone();
        let mut vertices = HashMap::new();
        vertices.insert(root_id.clone(), root);
        Self {
            id: id.into(),
            vertices,
            edges: HashMap::new(),
            roots: vec![root_id.clone()],
            active: vec![root_id],
            terminals: Vec::new(),
            config,
        }
    }

    pub fn get_vertex(&self, id: &str) -> Result<&ThoughtVertex, NoesisError> {
        self.vertices
            .get(id)
            .ok_or_else(|| NoesisError::Validation(format!("unknown vertex: {}", id)))
    }

    /// Insert a vertex. Rejects once `max_vertices` is reached. Active and
    /// terminal sets are left untouched.
    pub fn add_vertex(&mut self, vertex: ThoughtVertex) -> Result<(), NoesisError> {
        if self.vertices.len() >= self.config.max_vertices {
            return Err(NoesisError::Bound(format!(
                "graph {} is full ({} vertices)",
                self.id, self.config.max_vertices
            )));
        }
        self.vertices.insert(vertex.id.clone(), vertex);
        Ok(())
    }

    /// Insert an edge between existing vertices, updating adjacency
    /// (deduplicated) and the destination depth.
    pub fn add_edge(&mut self, edge: ThoughtEdge) -> Result<(), NoesisError> {
        if edge.from == edge.to {
            return Err(NoesisError::Validation(format!(
                "self-loop rejected on vertex {}",
                edge.from
            )));
        }
        if !self.vertices.contains_key(&edge.from) {
            return Err(NoesisError::Validation(format!(
                "unknown edge source: {}",
                edge.from
            )));
        }
        if !self.vertices.contains_key(&edge.to) {
            return Err(NoesisError::Validation(format!(
                "unknown edge target: {}",
                edge.to
            )));
        }

        let from_depth = self.vertices[&edge.from].depth;
        if let Some(from) = self.vertices.get_mut(&edge.from) {
            if !from.children.contains(&edge.to) {
                from.children.push(edge.to.clone());
            }
        }
        if let Some(to) = self.vertices.get_mut(&edge.to) {
            if !to.parents.contains(&edge.from) {
                to.parents.push(edge.from.clone());
            }
            if to.depth == 0 || to.depth > from_depth + 1 {
                to.depth = to.depth.max(from_depth + 1);
            }
        }
        self.edges.insert(edge.id.clone(), edge);
        Ok(())
    }

    /// Replace the active frontier. Every id must exist and the frontier is
    /// capped at `max_active`.
    pub fn set_active(&mut self, ids: Vec<String>) -> Result<(), NoesisError> {
        if ids.len() > self.config.max_active {
            return Err(NoesisError::Bound(format!(
                "active set of {} exceeds max_active {}",
                ids.len(),
                self.config.max_active
            )));
        }
        for id in &ids {
            if !self.vertices.contains_key(id) {
                return Err(NoesisError::Validation(format!("unknown vertex: {}", id)));
            }
        }
        self.active = ids;
        Ok(())
    }

    /// Replace the terminal set. Unknown ids are a state error.
    pub fn set_terminals(&mut self, ids: Vec<String>) -> Result<(), NoesisError> {
        for id in &ids {
            if !self.vertices.contains_key(id) {
                return Err(NoesisError::State(format!(
                    "cannot mark unknown vertex {} terminal",
                    id
                )));
            }
        }
        self.terminals = ids;
        Ok(())
    }

    /// Remove a vertex: incident edges first, then adjacency entries, then
    /// the vertex itself, then its active/terminal memberships.
    pub fn remove_vertex(&mut self, id: &str) -> Result<(), NoesisError> {
        if !self.vertices.contains_key(id) {
            return Err(NoesisError::Validation(format!("unknown vertex: {}", id)));
        }
        self.edges.retain(|_, edge| edge.from != id && edge.to != id);
        for vertex in self.vertices.values_mut() {
            vertex.parents.retain(|p| p != id);
            vertex.children.retain(|c| c != id);
        }
        self.vertices.remove(id);
        self.active.retain(|a| a != id);
        self.terminals.retain(|t| t != id);
        Ok(())
    }

    /// Vertices sorted by score, highest first. Ties keep insertion order.
    pub fn vertices_by_score(&self) -> Vec<&ThoughtVertex> {
        let mut all: Vec<&ThoughtVertex> = self.vertices.values().collect();
        all.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        all
    }
}
