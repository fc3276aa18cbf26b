//! The canonical tool surface.
//!
//! [`build_tool_registry`] registers every JSON-schema-defined tool the
//! server exposes against a [`ReasoningCore`]: the `think` entry point, the
//! analysis tools, the Graph-of-Thoughts family, the checkpoint family, the
//! listing/metrics tools, and `run-agent`. Tools marked safe are the subset
//! the agentic loop may invoke; lifecycle and storage-mutating tools stay
//! host-only.

use crate::noesis::backtrack::BacktrackingManager;
use crate::noesis::error::NoesisError;
use crate::noesis::llm::{extract_first_json, ReasoningLlm, ScoreCriteria};
use crate::noesis::modes::ThoughtInput;
use crate::noesis::got::ExploreConfig;
use crate::noesis::reflection::{BiasDetector, FallacyDetector};
use crate::noesis::detectors::{RuleBasedBiasDetector, RuleBasedFallacyDetector};
use crate::noesis::server::ReasoningCore;
use crate::noesis::tool_protocol::{
    handler, ToolMetadata, ToolParameter, ToolParameterType, ToolRegistry,
};
use crate::noesis::types::{Branch, ThoughtMode};
use serde_json::{json, Value};
use std::sync::{Arc, Weak};

// ---- Parameter helpers ----

fn require_str(params: &Value, key: &str) -> Result<String, NoesisError> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| NoesisError::Validation(format!("missing required parameter: {}", key)))
}

fn opt_str(params: &Value, key: &str) -> Option<String> {
    params.get(key).and_then(|v| v.as_str()).map(|s| s.to_string())
}

fn opt_usize(params: &Value, key: &str) -> Option<usize> {
    params.get(key).and_then(|v| v.as_u64()).map(|v| v as usize)
}

fn opt_f64(params: &Value, key: &str) -> Option<f64> {
    params.get(key).and_then(|v| v.as_f64())
}

fn opt_bool(params: &Value, key: &str) -> Option<bool> {
    params.get(key).and_then(|v| v.as_bool())
}

fn opt_str_list(params: &Value, key: &str) -> Option<Vec<String>> {
    params.get(key).and_then(|v| v.as_array()).map(|items| {
        items
            .iter()
            .filter_map(|item| item.as_str().map(|s| s.to_string()))
            .collect()
    })
}

fn require_f64_in_unit(params: &Value, key: &str) -> Result<f64, NoesisError> {
    let value = opt_f64(params, key)
        .ok_or_else(|| NoesisError::Validation(format!("missing required parameter: {}", key)))?;
    if !(0.0..=1.0).contains(&value) {
        return Err(NoesisError::Validation(format!(
            "{} must be in [0, 1], got {}",
            key, value
        )));
    }
    Ok(value)
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<Value, NoesisError> {
    serde_json::to_value(value)
        .map_err(|e| NoesisError::State(format!("failed to serialize result: {}", e)))
}

fn branch_summary(branch: &Branch) -> Value {
    json!({
        "id": branch.id,
        "parent_branch_id": branch.parent_branch_id,
        "state": branch.state,
        "priority": branch.priority,
        "confidence": branch.confidence,
        "thought_count": branch.thoughts.len(),
        "insight_count": branch.insights.len(),
        "cross_ref_count": branch.cross_refs.len(),
        "updated_at": branch.updated_at,
        "last_accessed_at": branch.last_accessed_at,
    })
}

fn graph_id_param() -> ToolParameter {
    ToolParameter::new("graph_id", ToolParameterType::String)
        .with_description("Target graph id")
        .required()
}

/// Register the canonical tool set against a core. Returns the populated
/// registry; the transport and the agentic loop both execute through it.
pub async fn build_tool_registry(
    core: &Arc<ReasoningCore>,
) -> Result<Arc<ToolRegistry>, NoesisError> {
    let registry = Arc::new(ToolRegistry::new());

    register_think(core, &registry).await?;
    register_search(core, &registry).await?;
    register_analysis(core, &registry).await?;
    register_got(core, &registry).await?;
    register_backtracking(core, &registry).await?;
    register_listing(core, &registry).await?;
    register_run_agent(core, &registry).await?;

    Ok(registry)
}

async fn register_think(
    core: &Arc<ReasoningCore>,
    registry: &Arc<ToolRegistry>,
) -> Result<(), NoesisError> {
    let metadata = ToolMetadata::new(
        "think",
        "Process a thought through a cognitive strategy (linear, tree, divergent, or auto).",
    )
    .with_parameter(
        ToolParameter::new("content", ToolParameterType::String)
            .with_description("The thought content")
            .required(),
    )
    .with_parameter(
        ToolParameter::new("mode", ToolParameterType::String)
            .with_description("Strategy override; auto-selected when omitted")
            .with_enum(vec![json!("linear"), json!("tree"), json!("divergent"), json!("auto")]),
    )
    .with_parameter(ToolParameter::new("type", ToolParameterType::String))
    .with_parameter(ToolParameter::new("branch_id", ToolParameterType::String))
    .with_parameter(ToolParameter::new("parent_id", ToolParameterType::String))
    .with_parameter(
        ToolParameter::new("confidence", ToolParameterType::Number)
            .with_range(0.0, 1.0)
            .with_default(json!(0.8)),
    )
    .with_parameter(
        ToolParameter::new("key_points", ToolParameterType::Array)
            .with_items(ToolParameterType::String),
    )
    .with_parameter(ToolParameter::new("force_rebellion", ToolParameterType::Boolean))
    .with_parameter(ToolParameter::new("challenge_assumptions", ToolParameterType::Boolean))
    .safe_for_agents();

    let core = core.clone();
    registry
        .register(
            metadata,
            handler(move |cancel, params: Value| {
                let core = core.clone();
                async move {
                    let input: ThoughtInput = serde_json::from_value(params)
                        .map_err(|e| NoesisError::Validation(format!("invalid think input: {}", e)))?;
                    let result = core.think(&cancel, input).await?;
                    to_json(&result)
                }
            }),
        )
        .await
}

async fn register_search(
    core: &Arc<ReasoningCore>,
    registry: &Arc<ToolRegistry>,
) -> Result<(), NoesisError> {
    let metadata = ToolMetadata::new(
        "search-similar-thoughts",
        "Search stored thoughts by content, optionally filtered by mode.",
    )
    .with_parameter(
        ToolParameter::new("query", ToolParameterType::String).required(),
    )
    .with_parameter(
        ToolParameter::new("mode", ToolParameterType::String)
            .with_enum(vec![json!("linear"), json!("tree"), json!("divergent")]),
    )
    .with_parameter(
        ToolParameter::new("limit", ToolParameterType::Integer)
            .with_default(json!(10))
            .with_range(1.0, 100.0),
    )
    .with_parameter(ToolParameter::new("offset", ToolParameterType::Integer))
    .safe_for_agents();

    let core = core.clone();
    registry
        .register(
            metadata,
            handler(move |_cancel, params: Value| {
                let core = core.clone();
                async move {
                    let query = require_str(&params, "query")?;
                    let mode = opt_str(&params, "mode").and_then(|m| ThoughtMode::parse(&m));
                    let limit = opt_usize(&params, "limit").unwrap_or(10);
                    let offset = opt_usize(&params, "offset").unwrap_or(0);
                    let thoughts = core
                        .storage()
                        .search_thoughts(&query, mode, limit, offset)
                        .await?;
                    Ok(json!({"count": thoughts.len(), "thoughts": to_json(&thoughts)?}))
                }
            }),
        )
        .await
}

async fn register_analysis(
    core: &Arc<ReasoningCore>,
    registry: &Arc<ToolRegistry>,
) -> Result<(), NoesisError> {
    // build-causal-graph
    {
        let llm = core.llm().clone();
        registry
            .register(
                ToolMetadata::new(
                    "build-causal-graph",
                    "Derive a causal graph (nodes and directed edges) from a situation description.",
                )
                .with_parameter(
                    ToolParameter::new("description", ToolParameterType::String).required(),
                )
                .safe_for_agents(),
                handler(move |cancel, params: Value| {
                    let llm = llm.clone();
                    async move {
                        let description = require_str(&params, "description")?;
                        let prompt = format!(
                            "Identify the causal structure in the following situation. Reply \
                             with a JSON object {{\"nodes\": [\"...\"], \"edges\": [{{\"from\": \
                             \"...\", \"to\": \"...\", \"relation\": \"causes\"}}]}} and nothing \
                             else.\n\n{}",
                            description
                        );
                        let replies = llm
                            .generate(&cancel, &prompt, 1)
                            .await
                            .map_err(NoesisError::collaborator)?;
                        let reply = replies.into_iter().next().unwrap_or_default();
                        match extract_first_json(&reply) {
                            Some(graph) => Ok(json!({"graph": graph})),
                            None => Ok(json!({"graph": null, "raw": reply})),
                        }
                    }
                }),
            )
            .await?;
    }

    // generate-hypotheses
    {
        let llm = core.llm().clone();
        registry
            .register(
                ToolMetadata::new(
                    "generate-hypotheses",
                    "Generate candidate hypotheses explaining an observation.",
                )
                .with_parameter(
                    ToolParameter::new("observation", ToolParameterType::String).required(),
                )
                .with_parameter(
                    ToolParameter::new("count", ToolParameterType::Integer)
                        .with_default(json!(3))
                        .with_range(1.0, 10.0),
                )
                .safe_for_agents(),
                handler(move |cancel, params: Value| {
                    let llm = llm.clone();
                    async move {
                        let observation = require_str(&params, "observation")?;
                        let count = opt_usize(&params, "count").unwrap_or(3).clamp(1, 10);
                        let prompt = format!(
                            "Propose distinct hypotheses that could explain this observation:\n{}",
                            observation
                        );
                        let hypotheses = llm
                            .generate(&cancel, &prompt, count)
                            .await
                            .map_err(NoesisError::collaborator)?;
                        Ok(json!({"hypotheses": hypotheses}))
                    }
                }),
            )
            .await?;
    }

    // analyze-perspectives
    {
        let llm = core.llm().clone();
        registry
            .register(
                ToolMetadata::new(
                    "analyze-perspectives",
                    "Analyze a topic from several named perspectives.",
                )
                .with_parameter(ToolParameter::new("topic", ToolParameterType::String).required())
                .with_parameter(
                    ToolParameter::new("perspectives", ToolParameterType::Array)
                        .with_items(ToolParameterType::String)
                        .with_item_bounds(1, 6),
                )
                .safe_for_agents(),
                handler(move |cancel, params: Value| {
                    let llm = llm.clone();
                    async move {
                        let topic = require_str(&params, "topic")?;
                        let perspectives = opt_str_list(&params, "perspectives")
                            .filter(|p| !p.is_empty())
                            .unwrap_or_else(|| {
                                vec![
                                    "optimist".to_string(),
                                    "skeptic".to_string(),
                                    "pragmatist".to_string(),
                                ]
                            });
                        let mut analyses = serde_json::Map::new();
                        for perspective in &perspectives {
                            let prompt = format!(
                                "From the perspective of a {}, analyze: {}",
                                perspective, topic
                            );
                            let reply = llm
                                .generate(&cancel, &prompt, 1)
                                .await
                                .map_err(NoesisError::collaborator)?;
                            analyses.insert(
                                perspective.clone(),
                                json!(reply.into_iter().next().unwrap_or_default()),
                            );
                        }
                        Ok(json!({"topic": topic, "perspectives": analyses}))
                    }
                }),
            )
            .await?;
    }

    // decompose-problem
    {
        let llm = core.llm().clone();
        registry
            .register(
                ToolMetadata::new(
                    "decompose-problem",
                    "Break a problem into its key sub-problems.",
                )
                .with_parameter(ToolParameter::new("problem", ToolParameterType::String).required())
                .safe_for_agents(),
                handler(move |cancel, params: Value| {
                    let llm = llm.clone();
                    async move {
                        let problem = require_str(&params, "problem")?;
                        let subproblems = llm
                            .extract_key_points(&cancel, &problem)
                            .await
                            .map_err(NoesisError::collaborator)?;
                        Ok(json!({"problem": problem, "subproblems": subproblems}))
                    }
                }),
            )
            .await?;
    }

    // make-decision
    {
        let llm = core.llm().clone();
        registry
            .register(
                ToolMetadata::new(
                    "make-decision",
                    "Score candidate options against a question and recommend the best.",
                )
                .with_parameter(
                    ToolParameter::new("question", ToolParameterType::String).required(),
                )
                .with_parameter(
                    ToolParameter::new("options", ToolParameterType::Array)
                        .with_items(ToolParameterType::String)
                        .with_item_bounds(2, 10)
                        .required(),
                )
                .safe_for_agents(),
                handler(move |cancel, params: Value| {
                    let llm = llm.clone();
                    async move {
                        let question = require_str(&params, "question")?;
                        let options = opt_str_list(&params, "options").unwrap_or_default();
                        if options.len() < 2 {
                            return Err(NoesisError::Validation(
                                "make-decision requires at least two options".to_string(),
                            ));
                        }
                        let weights = ScoreCriteria::default();
                        let mut scored = Vec::new();
                        for option in &options {
                            let scores = llm
                                .score(&cancel, option, &question, &weights)
                                .await
                                .map_err(NoesisError::collaborator)?;
                            scored.push(json!({
                                "option": option,
                                "score": scores.weighted(&weights),
                            }));
                        }
                        let best = scored
                            .iter()
                            .max_by(|a, b| {
                                a["score"]
                                    .as_f64()
                                    .unwrap_or(0.0)
                                    .partial_cmp(&b["score"].as_f64().unwrap_or(0.0))
                                    .unwrap_or(std::cmp::Ordering::Equal)
                            })
                            .cloned()
                            .unwrap_or(Value::Null);
                        Ok(json!({"decision": best["option"], "scores": scored}))
                    }
                }),
            )
            .await?;
    }

    // detect-biases
    registry
        .register(
            ToolMetadata::new("detect-biases", "Detect cognitive biases in content.")
                .with_parameter(ToolParameter::new("content", ToolParameterType::String).required())
                .safe_for_agents(),
            handler(move |cancel, params: Value| async move {
                let content = require_str(&params, "content")?;
                let biases = RuleBasedBiasDetector
                    .detect_biases(&cancel, &content)
                    .await
                    .map_err(NoesisError::collaborator)?;
                Ok(json!({"biases": biases}))
            }),
        )
        .await?;

    // detect-fallacies
    registry
        .register(
            ToolMetadata::new("detect-fallacies", "Detect logical fallacies in content.")
                .with_parameter(ToolParameter::new("content", ToolParameterType::String).required())
                .safe_for_agents(),
            handler(move |cancel, params: Value| async move {
                let content = require_str(&params, "content")?;
                let fallacies = RuleBasedFallacyDetector
                    .detect_fallacies(&cancel, &content)
                    .await
                    .map_err(NoesisError::collaborator)?;
                Ok(json!({"fallacies": fallacies}))
            }),
        )
        .await?;

    // assess-evidence
    registry
        .register(
            ToolMetadata::new(
                "assess-evidence",
                "Assess how strongly a set of evidence statements supports a claim.",
            )
            .with_parameter(ToolParameter::new("claim", ToolParameterType::String).required())
            .with_parameter(
                ToolParameter::new("evidence", ToolParameterType::Array)
                    .with_items(ToolParameterType::String)
                    .with_item_bounds(1, 20)
                    .required(),
            )
            .safe_for_agents(),
            handler(move |_cancel, params: Value| async move {
                let claim = require_str(&params, "claim")?;
                let evidence = opt_str_list(&params, "evidence").unwrap_or_default();
                if evidence.is_empty() {
                    return Err(NoesisError::Validation(
                        "assess-evidence requires at least one evidence entry".to_string(),
                    ));
                }
                let claim_words: Vec<String> = claim
                    .to_lowercase()
                    .split_whitespace()
                    .filter(|w| w.len() > 3)
                    .map(|w| w.to_string())
                    .collect();
                let mut assessments = Vec::new();
                let mut total = 0.0;
                for entry in &evidence {
                    let lowered = entry.to_lowercase();
                    let overlap = if claim_words.is_empty() {
                        0.0
                    } else {
                        claim_words.iter().filter(|w| lowered.contains(*w)).count() as f64
                            / claim_words.len() as f64
                    };
                    let substance: f64 = if entry.len() >= 40 { 0.3 } else { 0.1 };
                    let strength = (0.2 + 0.5 * overlap + substance).clamp(0.0, 1.0);
                    total += strength;
                    assessments.push(json!({"evidence": entry, "strength": strength}));
                }
                Ok(json!({
                    "claim": claim,
                    "overall_strength": total / evidence.len() as f64,
                    "assessments": assessments,
                }))
            }),
        )
        .await?;

    // probabilistic-reasoning
    registry
        .register(
            ToolMetadata::new(
                "probabilistic-reasoning",
                "Bayesian update: posterior from prior, likelihood, and evidence probability.",
            )
            .with_parameter(
                ToolParameter::new("prior", ToolParameterType::Number)
                    .with_range(0.0, 1.0)
                    .required(),
            )
            .with_parameter(
                ToolParameter::new("likelihood", ToolParameterType::Number)
                    .with_range(0.0, 1.0)
                    .required(),
            )
            .with_parameter(
                ToolParameter::new("evidence_probability", ToolParameterType::Number)
                    .with_range(0.0, 1.0)
                    .required(),
            )
            .safe_for_agents(),
            handler(move |_cancel, params: Value| async move {
                let prior = require_f64_in_unit(&params, "prior")?;
                let likelihood = require_f64_in_unit(&params, "likelihood")?;
                let evidence = require_f64_in_unit(&params, "evidence_probability")?;
                if evidence == 0.0 {
                    return Err(NoesisError::Validation(
                        "evidence_probability must be non-zero".to_string(),
                    ));
                }
                let posterior = (prior * likelihood / evidence).clamp(0.0, 1.0);
                Ok(json!({
                    "prior": prior,
                    "likelihood": likelihood,
                    "evidence_probability": evidence,
                    "posterior": posterior,
                }))
            }),
        )
        .await?;

    // synthesize-insights
    {
        let llm = core.llm().clone();
        registry
            .register(
                ToolMetadata::new(
                    "synthesize-insights",
                    "Combine several insights into a single synthesis.",
                )
                .with_parameter(
                    ToolParameter::new("insights", ToolParameterType::Array)
                        .with_items(ToolParameterType::String)
                        .with_item_bounds(2, 20)
                        .required(),
                )
                .with_parameter(ToolParameter::new("problem", ToolParameterType::String))
                .safe_for_agents(),
                handler(move |cancel, params: Value| {
                    let llm = llm.clone();
                    async move {
                        let insights = opt_str_list(&params, "insights").unwrap_or_default();
                        if insights.len() < 2 {
                            return Err(NoesisError::Validation(
                                "synthesize-insights requires at least two insights".to_string(),
                            ));
                        }
                        let problem = opt_str(&params, "problem").unwrap_or_default();
                        let synthesis = llm
                            .aggregate(&cancel, &insights, &problem)
                            .await
                            .map_err(NoesisError::collaborator)?;
                        Ok(json!({"synthesis": synthesis}))
                    }
                }),
            )
            .await?;
    }

    Ok(())
}

async fn register_got(
    core: &Arc<ReasoningCore>,
    registry: &Arc<ToolRegistry>,
) -> Result<(), NoesisError> {
    // got-initialize: lifecycle, host-only.
    {
        let got = core.got().clone();
        registry
            .register(
                ToolMetadata::new(
                    "got-initialize",
                    "Create a Graph-of-Thoughts with an initial thought.",
                )
                .with_parameter(
                    ToolParameter::new("content", ToolParameterType::String).required(),
                )
                .with_parameter(ToolParameter::new("graph_id", ToolParameterType::String)),
                handler(move |_cancel, params: Value| {
                    let got = got.clone();
                    async move {
                        let content = require_str(&params, "content")?;
                        let graph_id = got.initialize(opt_str(&params, "graph_id"), &content, None)?;
                        Ok(json!({"graph_id": graph_id}))
                    }
                }),
            )
            .await?;
    }

    // got-generate
    {
        let got = core.got().clone();
        registry
            .register(
                ToolMetadata::new(
                    "got-generate",
                    "Generate k continuations from the active frontier (or given sources).",
                )
                .with_parameter(graph_id_param())
                .with_parameter(
                    ToolParameter::new("k", ToolParameterType::Integer)
                        .with_default(json!(3))
                        .with_range(1.0, 10.0),
                )
                .with_parameter(
                    ToolParameter::new("sources", ToolParameterType::Array)
                        .with_items(ToolParameterType::String),
                )
                .with_parameter(ToolParameter::new("max_depth", ToolParameterType::Integer))
                .safe_for_agents(),
                handler(move |cancel, params: Value| {
                    let got = got.clone();
                    async move {
                        let graph_id = require_str(&params, "graph_id")?;
                        let k = opt_usize(&params, "k").unwrap_or(3);
                        let sources = opt_str_list(&params, "sources");
                        let max_depth = opt_usize(&params, "max_depth");
                        let vertices =
                            got.generate(&cancel, &graph_id, k, sources, max_depth).await?;
                        Ok(json!({"count": vertices.len(), "vertices": to_json(&vertices)?}))
                    }
                }),
            )
            .await?;
    }

    // got-aggregate
    {
        let got = core.got().clone();
        registry
            .register(
                ToolMetadata::new("got-aggregate", "Combine vertices into one synthesis vertex.")
                    .with_parameter(graph_id_param())
                    .with_parameter(
                        ToolParameter::new("vertex_ids", ToolParameterType::Array)
                            .with_items(ToolParameterType::String)
                            .with_item_bounds(2, 10)
                            .required(),
                    )
                    .with_parameter(
                        ToolParameter::new("problem", ToolParameterType::String).required(),
                    )
                    .safe_for_agents(),
                handler(move |cancel, params: Value| {
                    let got = got.clone();
                    async move {
                        let graph_id = require_str(&params, "graph_id")?;
                        let ids = opt_str_list(&params, "vertex_ids").unwrap_or_default();
                        let problem = require_str(&params, "problem")?;
                        let vertex = got.aggregate(&cancel, &graph_id, &ids, &problem).await?;
                        Ok(json!({"vertex": to_json(&vertex)?}))
                    }
                }),
            )
            .await?;
    }

    // got-refine
    {
        let got = core.got().clone();
        registry
            .register(
                ToolMetadata::new("got-refine", "Refine a vertex into an improved version.")
                    .with_parameter(graph_id_param())
                    .with_parameter(
                        ToolParameter::new("vertex_id", ToolParameterType::String).required(),
                    )
                    .with_parameter(
                        ToolParameter::new("problem", ToolParameterType::String).required(),
                    )
                    .safe_for_agents(),
                handler(move |cancel, params: Value| {
                    let got = got.clone();
                    async move {
                        let graph_id = require_str(&params, "graph_id")?;
                        let vertex_id = require_str(&params, "vertex_id")?;
                        let problem = require_str(&params, "problem")?;
                        let vertex = got.refine(&cancel, &graph_id, &vertex_id, &problem).await?;
                        Ok(json!({"vertex": to_json(&vertex)?}))
                    }
                }),
            )
            .await?;
    }

    // got-score
    {
        let got = core.got().clone();
        registry
            .register(
                ToolMetadata::new("got-score", "Score a vertex against the problem.")
                    .with_parameter(graph_id_param())
                    .with_parameter(
                        ToolParameter::new("vertex_id", ToolParameterType::String).required(),
                    )
                    .with_parameter(
                        ToolParameter::new("problem", ToolParameterType::String).required(),
                    )
                    .safe_for_agents(),
                handler(move |cancel, params: Value| {
                    let got = got.clone();
                    async move {
                        let graph_id = require_str(&params, "graph_id")?;
                        let vertex_id = require_str(&params, "vertex_id")?;
                        let problem = require_str(&params, "problem")?;
                        let score = got.score(&cancel, &graph_id, &vertex_id, &problem).await?;
                        Ok(json!({"vertex_id": vertex_id, "score": score}))
                    }
                }),
            )
            .await?;
    }

    // got-prune: lifecycle, host-only.
    {
        let got = core.got().clone();
        registry
            .register(
                ToolMetadata::new("got-prune", "Remove low-scoring non-root, non-terminal vertices.")
                    .with_parameter(graph_id_param())
                    .with_parameter(
                        ToolParameter::new("threshold", ToolParameterType::Number)
                            .with_range(0.0, 1.0),
                    ),
                handler(move |_cancel, params: Value| {
                    let got = got.clone();
                    async move {
                        let graph_id = require_str(&params, "graph_id")?;
                        let removed = got.prune(&graph_id, opt_f64(&params, "threshold")).await?;
                        Ok(json!({"removed": removed}))
                    }
                }),
            )
            .await?;
    }

    // got-get-state
    {
        let got = core.got().clone();
        registry
            .register(
                ToolMetadata::new("got-get-state", "Snapshot the full graph state.")
                    .with_parameter(graph_id_param())
                    .safe_for_agents(),
                handler(move |_cancel, params: Value| {
                    let got = got.clone();
                    async move {
                        let graph_id = require_str(&params, "graph_id")?;
                        let state = got.get_state(&graph_id).await?;
                        to_json(&state)
                    }
                }),
            )
            .await?;
    }

    // got-explore: drives the full workflow, host-only.
    {
        let got = core.got().clone();
        registry
            .register(
                ToolMetadata::new(
                    "got-explore",
                    "Run the auto-orchestrated explore workflow over a fresh graph.",
                )
                .with_parameter(
                    ToolParameter::new("content", ToolParameterType::String).required(),
                )
                .with_parameter(
                    ToolParameter::new("problem", ToolParameterType::String).required(),
                )
                .with_parameter(
                    ToolParameter::new("max_iterations", ToolParameterType::Integer)
                        .with_default(json!(1)),
                )
                .with_parameter(
                    ToolParameter::new("generate_k", ToolParameterType::Integer)
                        .with_default(json!(3))
                        .with_range(1.0, 10.0),
                )
                .with_parameter(ToolParameter::new("score_all", ToolParameterType::Boolean))
                .with_parameter(
                    ToolParameter::new("use_fast_scoring", ToolParameterType::Boolean)
                        .with_default(json!(true)),
                )
                .with_parameter(ToolParameter::new("parallel_scoring", ToolParameterType::Boolean))
                .with_parameter(
                    ToolParameter::new("prune_threshold", ToolParameterType::Number)
                        .with_default(json!(0.3))
                        .with_range(0.0, 1.0),
                )
                .with_parameter(ToolParameter::new("skip_refine", ToolParameterType::Boolean))
                .with_parameter(
                    ToolParameter::new("refine_top_n", ToolParameterType::Integer)
                        .with_default(json!(1)),
                ),
                handler(move |cancel, params: Value| {
                    let got = got.clone();
                    async move {
                        let content = require_str(&params, "content")?;
                        let problem = require_str(&params, "problem")?;
                        let defaults = ExploreConfig::default();
                        let config = ExploreConfig {
                            max_iterations: opt_usize(&params, "max_iterations")
                                .unwrap_or(defaults.max_iterations),
                            generate_k: opt_usize(&params, "generate_k")
                                .unwrap_or(defaults.generate_k),
                            score_all: opt_bool(&params, "score_all").unwrap_or(defaults.score_all),
                            use_fast_scoring: opt_bool(&params, "use_fast_scoring")
                                .unwrap_or(defaults.use_fast_scoring),
                            parallel_scoring: opt_bool(&params, "parallel_scoring")
                                .unwrap_or(defaults.parallel_scoring),
                            prune_threshold: opt_f64(&params, "prune_threshold")
                                .unwrap_or(defaults.prune_threshold),
                            skip_refine: opt_bool(&params, "skip_refine")
                                .unwrap_or(defaults.skip_refine),
                            refine_top_n: opt_usize(&params, "refine_top_n")
                                .unwrap_or(defaults.refine_top_n),
                        };
                        let result = got.explore(&cancel, &content, &problem, Some(config)).await?;
                        to_json(&result)
                    }
                }),
            )
            .await?;
    }

    // got-finalize: lifecycle, host-only.
    {
        let got = core.got().clone();
        registry
            .register(
                ToolMetadata::new("got-finalize", "Mark the top-scored vertices as terminals.")
                    .with_parameter(graph_id_param()),
                handler(move |_cancel, params: Value| {
                    let got = got.clone();
                    async move {
                        let graph_id = require_str(&params, "graph_id")?;
                        let terminals = got.finalize(&graph_id).await?;
                        Ok(json!({"terminals": to_json(&terminals)?}))
                    }
                }),
            )
            .await?;
    }

    Ok(())
}

async fn register_backtracking(
    core: &Arc<ReasoningCore>,
    registry: &Arc<ToolRegistry>,
) -> Result<(), NoesisError> {
    let backtrack: &Arc<BacktrackingManager> = core.backtrack();

    // create-checkpoint: host-only.
    {
        let backtrack = backtrack.clone();
        registry
            .register(
                ToolMetadata::new("create-checkpoint", "Create a named checkpoint for a branch.")
                    .with_parameter(
                        ToolParameter::new("branch_id", ToolParameterType::String).required(),
                    )
                    .with_parameter(
                        ToolParameter::new("name", ToolParameterType::String).required(),
                    )
                    .with_parameter(ToolParameter::new("description", ToolParameterType::String)),
                handler(move |_cancel, params: Value| {
                    let backtrack = backtrack.clone();
                    async move {
                        let branch_id = require_str(&params, "branch_id")?;
                        let name = require_str(&params, "name")?;
                        let description = opt_str(&params, "description").unwrap_or_default();
                        let checkpoint = backtrack
                            .create_checkpoint(&branch_id, &name, &description)
                            .await?;
                        to_json(&checkpoint)
                    }
                }),
            )
            .await?;
    }

    // restore-checkpoint: host-only.
    {
        let backtrack = backtrack.clone();
        registry
            .register(
                ToolMetadata::new(
                    "restore-checkpoint",
                    "Restore a branch to the state recorded at a checkpoint.",
                )
                .with_parameter(
                    ToolParameter::new("checkpoint_id", ToolParameterType::String).required(),
                ),
                handler(move |_cancel, params: Value| {
                    let backtrack = backtrack.clone();
                    async move {
                        let checkpoint_id = require_str(&params, "checkpoint_id")?;
                        let branch = backtrack.restore_checkpoint(&checkpoint_id).await?;
                        Ok(branch_summary(&branch))
                    }
                }),
            )
            .await?;
    }

    // fork-from-checkpoint: host-only.
    {
        let backtrack = backtrack.clone();
        registry
            .register(
                ToolMetadata::new(
                    "fork-from-checkpoint",
                    "Fork a new branch from the state recorded at a checkpoint.",
                )
                .with_parameter(
                    ToolParameter::new("checkpoint_id", ToolParameterType::String).required(),
                )
                .with_parameter(ToolParameter::new("name", ToolParameterType::String).required()),
                handler(move |_cancel, params: Value| {
                    let backtrack = backtrack.clone();
                    async move {
                        let checkpoint_id = require_str(&params, "checkpoint_id")?;
                        let name = require_str(&params, "name")?;
                        let branch = backtrack.fork_from_checkpoint(&checkpoint_id, &name).await?;
                        Ok(branch_summary(&branch))
                    }
                }),
            )
            .await?;
    }

    // list-checkpoints
    {
        let backtrack = backtrack.clone();
        registry
            .register(
                ToolMetadata::new("list-checkpoints", "List checkpoints taken for a branch.")
                    .with_parameter(
                        ToolParameter::new("branch_id", ToolParameterType::String).required(),
                    )
                    .safe_for_agents(),
                handler(move |_cancel, params: Value| {
                    let backtrack = backtrack.clone();
                    async move {
                        let branch_id = require_str(&params, "branch_id")?;
                        let checkpoints = backtrack.list_checkpoints(&branch_id).await;
                        Ok(json!({"count": checkpoints.len(), "checkpoints": to_json(&checkpoints)?}))
                    }
                }),
            )
            .await?;
    }

    // checkpoint-diff
    {
        let backtrack = backtrack.clone();
        registry
            .register(
                ToolMetadata::new(
                    "checkpoint-diff",
                    "Thought/insight id differences between two checkpoints of one branch.",
                )
                .with_parameter(
                    ToolParameter::new("checkpoint_a", ToolParameterType::String).required(),
                )
                .with_parameter(
                    ToolParameter::new("checkpoint_b", ToolParameterType::String).required(),
                )
                .safe_for_agents(),
                handler(move |_cancel, params: Value| {
                    let backtrack = backtrack.clone();
                    async move {
                        let a = require_str(&params, "checkpoint_a")?;
                        let b = require_str(&params, "checkpoint_b")?;
                        let diff = backtrack.get_checkpoint_diff(&a, &b).await?;
                        to_json(&diff)
                    }
                }),
            )
            .await?;
    }

    // prune-branch: host-only.
    {
        let backtrack = backtrack.clone();
        registry
            .register(
                ToolMetadata::new("prune-branch", "Mark a branch as a dead end.")
                    .with_parameter(
                        ToolParameter::new("branch_id", ToolParameterType::String).required(),
                    )
                    .with_parameter(ToolParameter::new("reason", ToolParameterType::String)),
                handler(move |_cancel, params: Value| {
                    let backtrack = backtrack.clone();
                    async move {
                        let branch_id = require_str(&params, "branch_id")?;
                        let reason = opt_str(&params, "reason").unwrap_or_default();
                        let branch = backtrack.prune_branch(&branch_id, &reason).await?;
                        Ok(branch_summary(&branch))
                    }
                }),
            )
            .await?;
    }

    Ok(())
}

async fn register_listing(
    core: &Arc<ReasoningCore>,
    registry: &Arc<ToolRegistry>,
) -> Result<(), NoesisError> {
    // list-branches
    {
        let storage = core.storage().clone();
        registry
            .register(
                ToolMetadata::new("list-branches", "List all branches.").safe_for_agents(),
                handler(move |_cancel, _params: Value| {
                    let storage = storage.clone();
                    async move {
                        let branches = storage.list_branches().await?;
                        let summaries: Vec<Value> = branches.iter().map(branch_summary).collect();
                        Ok(json!({"count": summaries.len(), "branches": summaries}))
                    }
                }),
            )
            .await?;
    }

    // recent-branches
    {
        let storage = core.storage().clone();
        registry
            .register(
                ToolMetadata::new("recent-branches", "Most recently accessed branches.")
                    .with_parameter(
                        ToolParameter::new("limit", ToolParameterType::Integer)
                            .with_default(json!(5))
                            .with_range(1.0, 50.0),
                    )
                    .safe_for_agents(),
                handler(move |_cancel, params: Value| {
                    let storage = storage.clone();
                    async move {
                        let limit = opt_usize(&params, "limit").unwrap_or(5);
                        let branches = storage.get_recent_branches(limit).await?;
                        let summaries: Vec<Value> = branches.iter().map(branch_summary).collect();
                        Ok(json!({"branches": summaries}))
                    }
                }),
            )
            .await?;
    }

    // get-metrics
    {
        let storage = core.storage().clone();
        registry
            .register(
                ToolMetadata::new("get-metrics", "Thought/branch counts and average confidence.")
                    .safe_for_agents(),
                handler(move |_cancel, _params: Value| {
                    let storage = storage.clone();
                    async move {
                        let metrics = storage.get_metrics().await?;
                        to_json(&metrics)
                    }
                }),
            )
            .await?;
    }

    Ok(())
}

async fn register_run_agent(
    core: &Arc<ReasoningCore>,
    registry: &Arc<ToolRegistry>,
) -> Result<(), NoesisError> {
    // run-agent executes against the same registry it lives in, so it holds
    // a weak reference to avoid a reference cycle.
    let weak: Weak<ToolRegistry> = Arc::downgrade(registry);
    let core = core.clone();
    registry
        .register(
            ToolMetadata::new(
                "run-agent",
                "Drive an LLM agent through the safe reasoning tools until it answers.",
            )
            .with_parameter(ToolParameter::new("task", ToolParameterType::String).required())
            .with_parameter(ToolParameter::new("system_prompt", ToolParameterType::String)),
            handler(move |cancel, params: Value| {
                let core = core.clone();
                let weak = weak.clone();
                async move {
                    let task = require_str(&params, "task")?;
                    let system_prompt = opt_str(&params, "system_prompt");
                    let registry = weak.upgrade().ok_or_else(|| {
                        NoesisError::State("tool registry has been dropped".to_string())
                    })?;
                    let result = core
                        .run_agent(&cancel, registry, &task, system_prompt.as_deref())
                        .await?;
                    to_json(&result)
                }
            }),
        )
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::noesis::config::NoesisConfig;
    use crate::noesis::llm::{CriterionScores, ReasoningLlm};
    use crate::noesis::storage::MemoryStorage;
    use crate::noesis::tool_protocol::AGENT_EXCLUDED_TOOLS;
    use async_trait::async_trait;
    use std::error::Error;
    use tokio_util::sync::CancellationToken;

    struct CannedLlm;

    #[async_trait]
    impl ReasoningLlm for CannedLlm {
        async fn generate(
            &self,
            _cancel: &CancellationToken,
            _prompt: &str,
            k: usize,
        ) -> Result<Vec<String>, Box<dyn Error + Send + Sync>> {
            Ok((0..k)
                .map(|i| format!("{{\"nodes\": [\"load\"], \"edges\": []}} variant {}", i))
                .collect())
        }

        async fn aggregate(
            &self,
            _cancel: &CancellationToken,
            thoughts: &[String],
            _problem: &str,
        ) -> Result<String, Box<dyn Error + Send + Sync>> {
            Ok(format!("combined: {}", thoughts.join(" | ")))
        }

        async fn refine(
            &self,
            _cancel: &CancellationToken,
            thought: &str,
            _problem: &str,
            _refinement_count: usize,
        ) -> Result<String, Box<dyn Error + Send + Sync>> {
            Ok(format!("{} (refined)", thought))
        }

        async fn score(
            &self,
            _cancel: &CancellationToken,
            thought: &str,
            _problem: &str,
            _criteria: &crate::noesis::llm::ScoreCriteria,
        ) -> Result<CriterionScores, Box<dyn Error + Send + Sync>> {
            // Longer options score higher, making make-decision deterministic.
            Ok(CriterionScores::uniform(
                (thought.len() as f64 / 100.0).clamp(0.1, 0.9),
            ))
        }

        async fn extract_key_points(
            &self,
            _cancel: &CancellationToken,
            _thought: &str,
        ) -> Result<Vec<String>, Box<dyn Error + Send + Sync>> {
            Ok(vec!["part a".to_string(), "part b".to_string()])
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

    async fn registry() -> (Arc<ReasoningCore>, Arc<ToolRegistry>) {
        let core = ReasoningCore::new(
            Arc::new(MemoryStorage::new()),
            Arc::new(CannedLlm),
            NoesisConfig::default(),
        )
        .await
        .unwrap();
        let tools = build_tool_registry(&core).await.unwrap();
        (core, tools)
    }

    #[tokio::test]
    async fn test_canonical_set_is_registered() {
        let (_core, tools) = registry().await;
        let names: Vec<String> = tools.list().await.into_iter().map(|t| t.name).collect();
        for expected in [
            "think",
            "search-similar-thoughts",
            "build-causal-graph",
            "generate-hypotheses",
            "analyze-perspectives",
            "decompose-problem",
            "make-decision",
            "detect-biases",
            "detect-fallacies",
            "assess-evidence",
            "probabilistic-reasoning",
            "synthesize-insights",
            "got-initialize",
            "got-generate",
            "got-aggregate",
            "got-refine",
            "got-score",
            "got-prune",
            "got-get-state",
            "got-explore",
            "got-finalize",
            "create-checkpoint",
            "restore-checkpoint",
            "fork-from-checkpoint",
            "list-checkpoints",
            "checkpoint-diff",
            "prune-branch",
            "list-branches",
            "recent-branches",
            "get-metrics",
            "run-agent",
        ] {
            assert!(names.contains(&expected.to_string()), "missing {}", expected);
        }
    }

    #[tokio::test]
    async fn test_excluded_tools_never_reach_agents() {
        let (_core, tools) = registry().await;
        let safe: Vec<String> = tools
            .safe_tool_definitions()
            .await
            .into_iter()
            .map(|d| d.name)
            .collect();
        for excluded in AGENT_EXCLUDED_TOOLS {
            assert!(!safe.contains(&excluded.to_string()), "{} leaked", excluded);
        }
        assert!(safe.contains(&"think".to_string()));
        assert!(safe.contains(&"got-generate".to_string()));
    }

    #[tokio::test]
    async fn test_think_tool_round_trip() {
        let (core, tools) = registry().await;
        let result = tools
            .execute(
                &CancellationToken::new(),
                "think",
                json!({"content": "Let's explore alternative approaches"}),
            )
            .await
            .unwrap();
        assert_eq!(result["mode"], "tree");
        let thought_id = result["thought_id"].as_str().unwrap();
        assert!(core.storage().get_thought(thought_id).await.is_ok());
    }

    #[tokio::test]
    async fn test_probabilistic_reasoning_bayes() {
        let (_core, tools) = registry().await;
        let result = tools
            .execute(
                &CancellationToken::new(),
                "probabilistic-reasoning",
                json!({"prior": 0.3, "likelihood": 0.8, "evidence_probability": 0.6}),
            )
            .await
            .unwrap();
        assert!((result["posterior"].as_f64().unwrap() - 0.4).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_make_decision_prefers_higher_score() {
        let (_core, tools) = registry().await;
        let result = tools
            .execute(
                &CancellationToken::new(),
                "make-decision",
                json!({
                    "question": "which design",
                    "options": ["short", "a considerably longer and more detailed option"],
                }),
            )
            .await
            .unwrap();
        assert_eq!(
            result["decision"],
            "a considerably longer and more detailed option"
        );
    }

    #[tokio::test]
    async fn test_got_tools_compose() {
        let (_core, tools) = registry().await;
        let cancel = CancellationToken::new();
        let init = tools
            .execute(&cancel, "got-initialize", json!({"content": "seed"}))
            .await
            .unwrap();
        let graph_id = init["graph_id"].as_str().unwrap().to_string();

        let generated = tools
            .execute(&cancel, "got-generate", json!({"graph_id": graph_id, "k": 2}))
            .await
            .unwrap();
        assert_eq!(generated["count"], 2);

        let state = tools
            .execute(&cancel, "got-get-state", json!({"graph_id": graph_id}))
            .await
            .unwrap();
        assert_eq!(state["vertices"].as_object().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_build_causal_graph_extracts_json() {
        let (_core, tools) = registry().await;
        let result = tools
            .execute(
                &CancellationToken::new(),
                "build-causal-graph",
                json!({"description": "load causes latency"}),
            )
            .await
            .unwrap();
        assert_eq!(result["graph"]["nodes"][0], "load");
    }

    #[tokio::test]
    async fn test_assess_evidence_overlap() {
        let (_core, tools) = registry().await;
        let result = tools
            .execute(
                &CancellationToken::new(),
                "assess-evidence",
                json!({
                    "claim": "caching reduces latency",
                    "evidence": [
                        "benchmarks show caching reduces latency by forty percent in production",
                        "unrelated note",
                    ],
                }),
            )
            .await
            .unwrap();
        let assessments = result["assessments"].as_array().unwrap();
        let strong = assessments[0]["strength"].as_f64().unwrap();
        let weak = assessments[1]["strength"].as_f64().unwrap();
        assert!(strong > weak);
    }

    #[tokio::test]
    async fn test_run_agent_without_chat_llm_errors() {
        let (_core, tools) = registry().await;
        let err = tools
            .execute(
                &CancellationToken::new(),
                "run-agent",
                json!({"task": "do something"}),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, NoesisError::State(_)));
    }
}
