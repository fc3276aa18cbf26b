//! Provider-agnostic LLM contracts.
//!
//! Two traits cover everything the core needs from a language model:
//!
//! - [`ReasoningLlm`]: the reasoning primitives consumed by the
//!   Graph-of-Thoughts operations and the analysis tools (generate,
//!   aggregate, refine, score, key points, novelty).
//! - [`ChatLlm`]: a tool-use-capable chat completion used by the agentic
//!   loop. Requests carry an ordered message list and tool definitions;
//!   responses are a sequence of content blocks with a stop reason.
//!
//! Concrete implementations live under [`crate::noesis::clients`]. The
//! supporting helpers here include [`extract_first_json`], which robustly
//! pulls the first balanced JSON object or array out of free-form model
//! output; implementations must accept both structured tool-call replies
//! and JSON-in-prose.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::error::Error;
use tokio_util::sync::CancellationToken;

/// Fixed criterion weights used when scoring a thought.
///
/// The defaults are the canonical weights: confidence 0.25, validity 0.30,
/// relevance 0.25, novelty 0.10, depth factor 0.10.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreCriteria {
    pub confidence: f64,
    pub validity: f64,
    pub relevance: f64,
    pub novelty: f64,
    pub depth_factor: f64,
}

impl Default for ScoreCriteria {
    fn default() -> Self {
        Self {
            confidence: 0.25,
            validity: 0.30,
            relevance: 0.25,
            novelty: 0.10,
            depth_factor: 0.10,
        }
    }
}

/// Per-criterion scores returned by [`ReasoningLlm::score`]. Each value is
/// in [0, 1]; the caller computes the weighted overall score.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CriterionScores {
    pub confidence: f64,
    pub validity: f64,
    pub relevance: f64,
    pub novelty: f64,
    pub depth_factor: f64,
}

impl CriterionScores {
    /// Uniform scores across all criteria, handy for mocks and fallbacks.
    pub fn uniform(value: f64) -> Self {
        let v = value.clamp(0.0, 1.0);
        Self {
            confidence: v,
            validity: v,
            relevance: v,
            novelty: v,
            depth_factor: v,
        }
    }

    /// Weighted sum under the given criteria weights.
    pub fn weighted(&self, weights: &ScoreCriteria) -> f64 {
        (self.confidence * weights.confidence
            + self.validity * weights.validity
            + self.relevance * weights.relevance
            + self.novelty * weights.novelty
            + self.depth_factor * weights.depth_factor)
            .clamp(0.0, 1.0)
    }
}

/// Result of an optional research-with-search call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchResult {
    pub summary: String,
    pub sources: Vec<String>,
}

/// Reasoning primitives required by the Graph-of-Thoughts controller and the
/// analysis tools. Implementations may suspend on network I/O but must honour
/// the cancellation token.
#[async_trait]
pub trait ReasoningLlm: Send + Sync {
    /// Produce exactly `k` continuation strings for the given prompt.
    async fn generate(
        &self,
        cancel: &CancellationToken,
        prompt: &str,
        k: usize,
    ) -> Result<Vec<String>, Box<dyn Error + Send + Sync>>;

    /// Combine multiple thoughts into a single coherent synthesis.
    async fn aggregate(
        &self,
        cancel: &CancellationToken,
        thoughts: &[String],
        problem: &str,
    ) -> Result<String, Box<dyn Error + Send + Sync>>;

    /// Improve a thought; `refinement_count` tells the model how many prior
    /// refinement passes the thought has been through.
    async fn refine(
        &self,
        cancel: &CancellationToken,
        thought: &str,
        problem: &str,
        refinement_count: usize,
    ) -> Result<String, Box<dyn Error + Send + Sync>>;

    /// Score a thought against a problem on the five fixed criteria.
    async fn score(
        &self,
        cancel: &CancellationToken,
        thought: &str,
        problem: &str,
        criteria: &ScoreCriteria,
    ) -> Result<CriterionScores, Box<dyn Error + Send + Sync>>;

    /// Extract 3–5 key points from a thought.
    async fn extract_key_points(
        &self,
        cancel: &CancellationToken,
        thought: &str,
    ) -> Result<Vec<String>, Box<dyn Error + Send + Sync>>;

    /// Novelty of a thought relative to its siblings, in [0, 1]. Must return
    /// 1.0 when `siblings` is empty.
    async fn calculate_novelty(
        &self,
        cancel: &CancellationToken,
        thought: &str,
        siblings: &[String],
    ) -> Result<f64, Box<dyn Error + Send + Sync>>;

    /// Optional web-search-grounded research. Providers without search
    /// support inherit this default.
    async fn research_with_search(
        &self,
        _cancel: &CancellationToken,
        _query: &str,
        _problem: &str,
    ) -> Result<ResearchResult, Box<dyn Error + Send + Sync>> {
        Err("research with search not supported".into())
    }
}

// ---- Chat-level types for the agentic loop ----

/// Role of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

/// One block of a chat message or reply. Tool results are fed back inside a
/// user message, mirroring the messages-API wire shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
}

/// Why the model stopped generating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    Other(String),
}

impl StopReason {
    pub fn parse(value: &str) -> Self {
        match value {
            "end_turn" => StopReason::EndTurn,
            "tool_use" => StopReason::ToolUse,
            "max_tokens" => StopReason::MaxTokens,
            other => StopReason::Other(other.to_string()),
        }
    }
}

/// How many tokens were spent on prompt vs. completion.
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub total_tokens: usize,
}

impl TokenUsage {
    /// Fold another usage record into this one.
    pub fn accumulate(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// A chat message: role plus ordered content blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: Vec<ContentBlock>,
}

impl ChatMessage {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }
}

/// Tool schema forwarded to the provider's tool-use API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolUseDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// A full chat request: model, token budget, optional system prompt, ordered
/// messages, optional tools and tool choice, temperature.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub max_tokens: usize,
    pub system: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolUseDefinition>,
    pub tool_choice: Option<serde_json::Value>,
    pub temperature: Option<f64>,
}

/// One assistant turn: content blocks, stop reason, and token accounting.
#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub content: Vec<ContentBlock>,
    pub stop_reason: StopReason,
    pub usage: TokenUsage,
}

impl ChatTurn {
    /// Concatenated text of all text blocks.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for block in &self.content {
            if let ContentBlock::Text { text } = block {
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str(text);
            }
        }
        out
    }

    /// Borrow the tool-use blocks in order.
    pub fn tool_uses(&self) -> Vec<(&str, &str, &serde_json::Value)> {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::ToolUse { id, name, input } => {
                    Some((id.as_str(), name.as_str(), input))
                }
                _ => None,
            })
            .collect()
    }
}

/// Tool-use-capable chat completion consumed by the agentic loop.
#[async_trait]
pub trait ChatLlm: Send + Sync {
    async fn send(
        &self,
        cancel: &CancellationToken,
        request: &ChatRequest,
    ) -> Result<ChatTurn, Box<dyn Error + Send + Sync>>;

    /// Identifier of the upstream model (e.g. `"claude-sonnet-4-0"`).
    fn model_name(&self) -> &str;
}

/// Extract the first balanced JSON object or array from free-form text.
///
/// Models frequently wrap JSON in prose or code fences; this scans for the
/// first `{` or `[`, walks the text string-aware (quotes and escapes), and
/// returns the parsed value once the brackets balance. Unbalanced or
/// unparseable fragments yield `None`.
pub fn extract_first_json(text: &str) -> Option<serde_json::Value> {
    let start = text.find(|c| c == '{' || c == '[')?;
    let tail = &text[start..];
    let open = if tail.starts_with('{') { '{' } else { '[' };
    let close = if open == '{' { '}' } else { ']' };

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in tail.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            c if c == open => depth += 1,
            c if c == close => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    let fragment = &tail[..offset + ch.len_utf8()];
                    return serde_json::from_str(fragment).ok();
                }
            }
            _ => {}
        }
    }
    None
}

/// Pull a string array out of model output, tolerating bare lists, wrapped
/// objects, and line-based fallbacks.
pub fn extract_string_list(text: &str) -> Vec<String> {
    if let Some(value) = extract_first_json(text) {
        let array = match value {
            serde_json::Value::Array(items) => Some(items),
            serde_json::Value::Object(map) => map
                .into_iter()
                .find_map(|(_, v)| v.as_array().cloned()),
            _ => None,
        };
        if let Some(items) = array {
            let strings: Vec<String> = items
                .into_iter()
                .filter_map(|v| v.as_str().map(|s| s.trim().to_string()))
                .filter(|s| !s.is_empty())
                .collect();
            if !strings.is_empty() {
                return strings;
            }
        }
    }
    // Fallback: treat non-empty lines as entries, stripping list markers.
    text.lines()
        .map(|line| line.trim().trim_start_matches(&['-', '*', ' '][..]).to_string())
        .filter(|line| !line.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_from_prose() {
        let text = "Sure, here you go: {\"score\": 0.8, \"note\": \"a {nested} brace\"} done.";
        let value = extract_first_json(text).unwrap();
        assert_eq!(value["score"], 0.8);
    }

    #[test]
    fn test_extract_json_array() {
        let text = "```json\n[\"one\", \"two\"]\n```";
        let value = extract_first_json(text).unwrap();
        assert_eq!(value.as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_extract_json_ignores_braces_in_strings() {
        let text = r#"{"a": "close } inside", "b": 1}"#;
        let value = extract_first_json(text).unwrap();
        assert_eq!(value["b"], 1);
    }

    #[test]
    fn test_extract_json_unbalanced_returns_none() {
        assert!(extract_first_json("{\"a\": ").is_none());
        assert!(extract_first_json("no json here").is_none());
    }

    #[test]
    fn test_extract_string_list_fallback_to_lines() {
        let out = extract_string_list("- first point\n- second point\n");
        assert_eq!(out, vec!["first point", "second point"]);
    }

    #[test]
    fn test_weighted_score_with_default_criteria() {
        let scores = CriterionScores::uniform(0.8);
        let overall = scores.weighted(&ScoreCriteria::default());
        assert!((overall - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_chat_turn_text_and_tool_uses() {
        let turn = ChatTurn {
            content: vec![
                ContentBlock::Text {
                    text: "thinking".to_string(),
                },
                ContentBlock::ToolUse {
                    id: "tu_1".to_string(),
                    name: "echo".to_string(),
                    input: serde_json::json!({"message": "hi"}),
                },
            ],
            stop_reason: StopReason::ToolUse,
            usage: TokenUsage::default(),
        };
        assert_eq!(turn.text(), "thinking");
        assert_eq!(turn.tool_uses().len(), 1);
        assert_eq!(turn.tool_uses()[0].1, "echo");
    }
}
