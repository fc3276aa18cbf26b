//! HTTP client for a messages-style LLM provider API.
//!
//! [`MessagesClient`] speaks the common messages wire shape: a request with
//! `model`, `max_tokens`, optional `system`, an ordered `messages` list,
//! optional `tools`/`tool_choice`, and `temperature`; a response made of
//! content blocks (`text` / `tool_use`) plus a `stop_reason`. It implements
//! both [`ChatLlm`] (for the agentic loop) and [`ReasoningLlm`] (for the
//! Graph-of-Thoughts operations), building structured prompts for the latter
//! and extracting JSON from free-form replies where needed.
//!
//! # Example
//!
//! ```rust,no_run
//! use noesis::clients::MessagesClient;
//!
//! let client = MessagesClient::new(
//!     &std::env::var("LLM_API_KEY").unwrap(),
//!     "claude-sonnet-4-0",
//! );
//! ```

use crate::noesis::llm::{
    extract_first_json, extract_string_list, ChatLlm, ChatMessage, ChatRequest, ChatRole,
    ChatTurn, ContentBlock, CriterionScores, ReasoningLlm, ScoreCriteria, StopReason, TokenUsage,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::error::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const DEFAULT_MAX_TOKENS: usize = 2048;

/// Client wrapper for a messages-style provider endpoint.
pub struct MessagesClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: usize,
    /// Usage from the most recent call, for callers that want accounting.
    last_usage: Mutex<Option<TokenUsage>>,
}

// ---- Wire types ----

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    max_tokens: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'a serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[derive(Serialize)]
struct WireMessage {
    role: String,
    content: serde_json::Value,
}

#[derive(Serialize)]
struct WireTool<'a> {
    name: &'a str,
    description: &'a str,
    input_schema: &'a serde_json::Value,
}

#[derive(Deserialize)]
struct WireResponse {
    #[serde(default)]
    content: Vec<WireBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum WireBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Deserialize)]
struct WireUsage {
    #[serde(default)]
    input_tokens: usize,
    #[serde(default)]
    output_tokens: usize,
}

impl MessagesClient {
    /// Create a client against the default provider endpoint.
    pub fn new(api_key: &str, model: &str) -> Self {
        Self::new_with_base_url(api_key, model, DEFAULT_BASE_URL)
    }

    /// Create a client pointing at a custom messages-compatible base URL.
    pub fn new_with_base_url(api_key: &str, model: &str, base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            last_usage: Mutex::new(None),
        }
    }

    /// Override the per-request completion token budget (builder pattern).
    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Usage recorded by the most recent call, if the provider reported any.
    pub async fn last_usage(&self) -> Option<TokenUsage> {
        self.last_usage.lock().await.clone()
    }

    fn encode_message(message: &ChatMessage) -> WireMessage {
        let role = match message.role {
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        };
        let blocks: Vec<serde_json::Value> = message
            .content
            .iter()
            .map(|block| match block {
                ContentBlock::Text { text } => serde_json::json!({
                    "type": "text",
                    "text": text,
                }),
                ContentBlock::ToolUse { id, name, input } => serde_json::json!({
                    "type": "tool_use",
                    "id": id,
                    "name": name,
                    "input": input,
                }),
                ContentBlock::ToolResult {
                    tool_use_id,
                    content,
                    is_error,
                } => serde_json::json!({
                    "type": "tool_result",
                    "tool_use_id": tool_use_id,
                    "content": content,
                    "is_error": is_error,
                }),
            })
            .collect();
        WireMessage {
            role: role.to_string(),
            content: serde_json::Value::Array(blocks),
        }
    }

    async fn post(
        &self,
        cancel: &CancellationToken,
        request: &ChatRequest,
    ) -> Result<ChatTurn, Box<dyn Error + Send + Sync>> {
        if cancel.is_cancelled() {
            return Err("request cancelled".into());
        }
        let wire = WireRequest {
            model: if request.model.is_empty() {
                &self.model
            } else {
                &request.model
            },
            max_tokens: if request.max_tokens == 0 {
                self.max_tokens
            } else {
                request.max_tokens
            },
            system: request.system.as_deref(),
            messages: request.messages.iter().map(Self::encode_message).collect(),
            tools: request
                .tools
                .iter()
                .map(|t| WireTool {
                    name: &t.name,
                    description: &t.description,
                    input_schema: &t.input_schema,
                })
                .collect(),
            tool_choice: request.tool_choice.as_ref(),
            temperature: request.temperature,
        };

        let send = self
            .http
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&wire)
            .send();

        // Abort the in-flight request at the next cancellation check.
        let response = tokio::select! {
            _ = cancel.cancelled() => return Err("request cancelled".into()),
            result = send => result?,
        };

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            log::error!(
                "MessagesClient::post: provider returned {}: {}",
                status,
                body
            );
            return Err(format!("provider error {}: {}", status, body).into());
        }

        let parsed: WireResponse = serde_json::from_str(&body)?;
        let content: Vec<ContentBlock> = parsed
            .content
            .into_iter()
            .filter_map(|block| match block {
                WireBlock::Text { text } => Some(ContentBlock::Text { text }),
                WireBlock::ToolUse { id, name, input } => {
                    Some(ContentBlock::ToolUse { id, name, input })
                }
                WireBlock::Unknown => None,
            })
            .collect();
        let usage = parsed
            .usage
            .map(|u| TokenUsage {
                input_tokens: u.input_tokens,
                output_tokens: u.output_tokens,
                total_tokens: u.input_tokens + u.output_tokens,
            })
            .unwrap_or_default();
        *self.last_usage.lock().await = Some(usage.clone());

        Ok(ChatTurn {
            content,
            stop_reason: parsed
                .stop_reason
                .as_deref()
                .map(StopReason::parse)
                .unwrap_or(StopReason::EndTurn),
            usage,
        })
    }

    /// One-shot prompt helper for the reasoning primitives.
    async fn prompt(
        &self,
        cancel: &CancellationToken,
        prompt: String,
    ) -> Result<String, Box<dyn Error + Send + Sync>> {
        let request = ChatRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            system: None,
            messages: vec![ChatMessage::user_text(prompt)],
            tools: Vec::new(),
            tool_choice: None,
            temperature: None,
        };
        let turn = self.post(cancel, &request).await?;
        Ok(turn.text())
    }
}

#[async_trait]
impl ChatLlm for MessagesClient {
    async fn send(
        &self,
        cancel: &CancellationToken,
        request: &ChatRequest,
    ) -> Result<ChatTurn, Box<dyn Error + Send + Sync>> {
        self.post(cancel, request).await
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl ReasoningLlm for MessagesClient {
    async fn generate(
        &self,
        cancel: &CancellationToken,
        prompt: &str,
        k: usize,
    ) -> Result<Vec<String>, Box<dyn Error + Send + Sync>> {
        let text = self
            .prompt(
                cancel,
                format!(
                    "Generate exactly {} distinct continuations of the following line of \
                     reasoning. Reply with a JSON array of {} strings and nothing else.\n\n{}",
                    k, k, prompt
                ),
            )
            .await?;
        let mut items = extract_string_list(&text);
        items.truncate(k);
        if items.is_empty() {
            return Err("model returned no continuations".into());
        }
        Ok(items)
    }

    async fn aggregate(
        &self,
        cancel: &CancellationToken,
        thoughts: &[String],
        problem: &str,
    ) -> Result<String, Box<dyn Error + Send + Sync>> {
        let mut body = String::new();
        for (i, thought) in thoughts.iter().enumerate() {
            body.push_str(&format!("{}. {}\n", i + 1, thought));
        }
        self.prompt(
            cancel,
            format!(
                "Problem: {}\n\nCombine the following lines of reasoning into a single \
                 coherent synthesis that keeps the strongest points of each:\n\n{}",
                problem, body
            ),
        )
        .await
    }

    async fn refine(
        &self,
        cancel: &CancellationToken,
        thought: &str,
        problem: &str,
        refinement_count: usize,
    ) -> Result<String, Box<dyn Error + Send + Sync>> {
        self.prompt(
            cancel,
            format!(
                "Problem: {}\n\nThe following reasoning has been refined {} time(s) already. \
                 Improve it further: fix weaknesses, add missing considerations, keep what \
                 works.\n\n{}",
                problem, refinement_count, thought
            ),
        )
        .await
    }

    async fn score(
        &self,
        cancel: &CancellationToken,
        thought: &str,
        problem: &str,
        _criteria: &ScoreCriteria,
    ) -> Result<CriterionScores, Box<dyn Error + Send + Sync>> {
        let text = self
            .prompt(
                cancel,
                format!(
                    "Problem: {}\n\nScore the following reasoning on each criterion from 0.0 \
                     to 1.0. Reply with a JSON object with keys confidence, validity, \
                     relevance, novelty, depth_factor and nothing else.\n\n{}",
                    problem, thought
                ),
            )
            .await?;
        let value =
            extract_first_json(&text).ok_or("model returned no JSON score object")?;
        let get = |key: &str| value.get(key).and_then(|v| v.as_f64()).unwrap_or(0.5);
        Ok(CriterionScores {
            confidence: get("confidence").clamp(0.0, 1.0),
            validity: get("validity").clamp(0.0, 1.0),
            relevance: get("relevance").clamp(0.0, 1.0),
            novelty: get("novelty").clamp(0.0, 1.0),
            depth_factor: get("depth_factor").clamp(0.0, 1.0),
        })
    }

    async fn extract_key_points(
        &self,
        cancel: &CancellationToken,
        thought: &str,
    ) -> Result<Vec<String>, Box<dyn Error + Send + Sync>> {
        let text = self
            .prompt(
                cancel,
                format!(
                    "Extract 3 to 5 key points from the following reasoning. Reply with a \
                     JSON array of short strings and nothing else.\n\n{}",
                    thought
                ),
            )
            .await?;
        let mut points = extract_string_list(&text);
        points.truncate(5);
        Ok(points)
    }

    async fn calculate_novelty(
        &self,
        cancel: &CancellationToken,
        thought: &str,
        siblings: &[String],
    ) -> Result<f64, Box<dyn Error + Send + Sync>> {
        if siblings.is_empty() {
            return Ok(1.0);
        }
        let mut body = String::new();
        for sibling in siblings {
            body.push_str(&format!("- {}\n", sibling));
        }
        let text = self
            .prompt(
                cancel,
                format!(
                    "How novel is this thought relative to its siblings? Reply with a JSON \
                     object {{\"novelty\": <0.0..1.0>}} and nothing else.\n\nThought: {}\n\n\
                     Siblings:\n{}",
                    thought, body
                ),
            )
            .await?;
        let value = extract_first_json(&text).ok_or("model returned no novelty JSON")?;
        Ok(value
            .get("novelty")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.5)
            .clamp(0.0, 1.0))
    }
}
