//! Agentic tool-calling loop.
//!
//! Drives an external tool-use-capable LLM through the registry's safe-tool
//! subset until a final answer is produced. Each turn sends the accumulated
//! message list plus the current tool definitions; tool-use blocks in the
//! reply are executed (up to `max_tools_per_turn`) and their results fed
//! back as `tool_result` blocks. The loop ends when the model stops calling
//! tools, errors out (subject to `stop_on_error`), or the iteration budget
//! runs dry; the full trace is returned in every case.

use crate::noesis::error::NoesisError;
use crate::noesis::llm::{
    ChatLlm, ChatMessage, ChatRequest, ChatRole, ContentBlock, StopReason, TokenUsage,
};
use crate::noesis::tool_protocol::ToolRegistry;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Bounds and knobs for an agent run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub max_iterations: usize,
    pub max_tools_per_turn: usize,
    pub stop_on_error: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Model override; the client's own model when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub max_tokens: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            max_tools_per_turn: 5,
            stop_on_error: true,
            temperature: None,
            model: None,
            max_tokens: 4096,
        }
    }
}

/// Terminal status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Completed,
    Error,
    MaxIterations,
}

/// One executed (or failed) tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentToolCall {
    pub name: String,
    pub input: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One LLM turn: the assistant's visible reasoning plus its tool calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentIteration {
    pub thought: String,
    pub tool_calls: Vec<AgentToolCall>,
}

/// Full result and trace of an agent run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRunResult {
    pub status: AgentStatus,
    pub final_answer: String,
    pub iterations: Vec<AgentIteration>,
    #[serde(skip)]
    pub usage: TokenUsage,
    pub duration_millis: u128,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AgentRunResult {
    /// Total tool calls across all iterations.
    pub fn total_tool_calls(&self) -> usize {
        self.iterations.iter().map(|i| i.tool_calls.len()).sum()
    }

    /// Number of tool calls that failed.
    pub fn error_count(&self) -> usize {
        self.iterations
            .iter()
            .flat_map(|i| &i.tool_calls)
            .filter(|c| c.error.is_some())
            .count()
    }

    /// Deduplicated tool names in first-use order.
    pub fn tools_used(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for call in self.iterations.iter().flat_map(|i| &i.tool_calls) {
            if !seen.contains(&call.name) {
                seen.push(call.name.clone());
            }
        }
        seen
    }
}

/// The loop itself: an LLM, the tool registry, and the run bounds.
pub struct AgentLoop {
    llm: Arc<dyn ChatLlm>,
    registry: Arc<ToolRegistry>,
    config: AgentConfig,
}

impl AgentLoop {
    pub fn new(llm: Arc<dyn ChatLlm>, registry: Arc<ToolRegistry>, config: AgentConfig) -> Self {
        Self {
            llm,
            registry,
            config,
        }
    }

    /// Drive the LLM until it produces a final answer.
    pub async fn run(
        &self,
        cancel: &CancellationToken,
        task: &str,
        system_prompt: Option<&str>,
    ) -> Result<AgentRunResult, NoesisError> {
        let started = Instant::now();
        let model = self
            .config
            .model
            .clone()
            .unwrap_or_else(|| self.llm.model_name().to_string());
        let tools = self.registry.safe_tool_definitions().await;

        let mut messages = vec![ChatMessage::user_text(task)];
        let mut iterations: Vec<AgentIteration> = Vec::new();
        let mut usage = TokenUsage::default();

        let finish = |status: AgentStatus,
                          final_answer: String,
                          iterations: Vec<AgentIteration>,
                          usage: TokenUsage,
                          error: Option<String>| {
            AgentRunResult {
                status,
                final_answer,
                iterations,
                usage,
                duration_millis: started.elapsed().as_millis(),
                error,
            }
        };

        for iteration in 0..self.config.max_iterations {
            if cancel.is_cancelled() {
                return Ok(finish(
                    AgentStatus::Error,
                    String::new(),
                    iterations,
                    usage,
                    Some("cancelled".to_string()),
                ));
            }

            let request = ChatRequest {
                model: model.clone(),
                max_tokens: self.config.max_tokens,
                system: system_prompt.map(|s| s.to_string()),
                messages: messages.clone(),
                tools: tools.clone(),
                tool_choice: None,
                temperature: self.config.temperature,
            };

            let turn = match self.llm.send(cancel, &request).await {
                Ok(turn) => turn,
                Err(err) => {
                    log::error!("AgentLoop::run: LLM call failed on iteration {}: {}", iteration, err);
                    return Ok(finish(
                        AgentStatus::Error,
                        String::new(),
                        iterations,
                        usage,
                        Some(err.to_string()),
                    ));
                }
            };
            usage.accumulate(&turn.usage);

            let thought = turn.text();
            let tool_uses = turn.tool_uses();

            if tool_uses.is_empty() || turn.stop_reason == StopReason::EndTurn {
                iterations.push(AgentIteration {
                    thought: thought.clone(),
                    tool_calls: Vec::new(),
                });
                return Ok(finish(
                    AgentStatus::Completed,
                    thought,
                    iterations,
                    usage,
                    None,
                ));
            }

            let mut tool_calls = Vec::new();
            let mut result_blocks = Vec::new();
            for (tool_use_id, name, input) in
                tool_uses.into_iter().take(self.config.max_tools_per_turn)
            {
                match self.registry.execute(cancel, name, input.clone()).await {
                    Ok(output) => {
                        let serialized = serde_json::to_string(&output)
                            .unwrap_or_else(|_| output.to_string());
                        tool_calls.push(AgentToolCall {
                            name: name.to_string(),
                            input: input.clone(),
                            output: Some(output),
                            error: None,
                        });
                        result_blocks.push(ContentBlock::ToolResult {
                            tool_use_id: tool_use_id.to_string(),
                            content: serialized,
                            is_error: false,
                        });
                    }
                    Err(err) => {
                        let message = err.to_string();
                        tool_calls.push(AgentToolCall {
                            name: name.to_string(),
                            input: input.clone(),
                            output: None,
                            error: Some(message.clone()),
                        });
                        if self.config.stop_on_error {
                            iterations.push(AgentIteration {
                                thought,
                                tool_calls,
                            });
                            return Ok(finish(
                                AgentStatus::Error,
                                String::new(),
                                iterations,
                                usage,
                                Some(message),
                            ));
                        }
                        result_blocks.push(ContentBlock::ToolResult {
                            tool_use_id: tool_use_id.to_string(),
                            content: message,
                            is_error: true,
                        });
                    }
                }
            }

            iterations.push(AgentIteration {
                thought,
                tool_calls,
            });

            messages.push(ChatMessage {
                role: ChatRole::Assistant,
                content: turn.content.clone(),
            });
            messages.push(ChatMessage {
                role: ChatRole::User,
                content: result_blocks,
            });
        }

        let final_answer = iterations
            .last()
            .map(|i| i.thought.clone())
            .unwrap_or_default();
        Ok(finish(
            AgentStatus::MaxIterations,
            final_answer,
            iterations,
            usage,
            None,
        ))
    }
}
