use async_trait::async_trait;
use noesis::agent_loop::{AgentConfig, AgentLoop, AgentStatus};
use noesis::llm::{
    ChatLlm, ChatRequest, ChatTurn, ContentBlock, CriterionScores, ReasoningLlm, ScoreCriteria,
    StopReason, TokenUsage,
};
use noesis::storage::MemoryStorage;
use noesis::tool_protocol::{handler, ToolMetadata, ToolParameter, ToolParameterType, ToolRegistry};
use noesis::tools::build_tool_registry;
use noesis::{NoesisConfig, ReasoningCore};
use serde_json::json;
use std::error::Error;
use std::sync::Arc;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Chat LLM that replays a scripted list of turns.
struct ScriptedChat {
    turns: Mutex<Vec<ChatTurn>>,
}

impl ScriptedChat {
    fn new(turns: Vec<ChatTurn>) -> Self {
        Self {
            turns: Mutex::new(turns),
        }
    }
}

#[async_trait]
impl ChatLlm for ScriptedChat {
    async fn send(
        &self,
        _cancel: &CancellationToken,
        _request: &ChatRequest,
    ) -> Result<ChatTurn, Box<dyn Error + Send + Sync>> {
        let mut turns = self.turns.lock().unwrap();
        if turns.is_empty() {
            return Err("no more scripted turns".into());
        }
        Ok(turns.remove(0))
    }

    fn model_name(&self) -> &str {
        "scripted-chat"
    }
}

struct StubReasoner;

#[async_trait]
impl ReasoningLlm for StubReasoner {
    async fn generate(
        &self,
        _cancel: &CancellationToken,
        prompt: &str,
        k: usize,
    ) -> Result<Vec<String>, Box<dyn Error + Send + Sync>> {
        Ok((0..k).map(|i| format!("{} [{}]", prompt, i)).collect())
    }

    async fn aggregate(
        &self,
        _cancel: &CancellationToken,
        thoughts: &[String],
        _problem: &str,
    ) -> Result<String, Box<dyn Error + Send + Sync>> {
        Ok(thoughts.join(" + "))
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
        _thought: &str,
        _problem: &str,
        _criteria: &ScoreCriteria,
    ) -> Result<CriterionScores, Box<dyn Error + Send + Sync>> {
        Ok(CriterionScores::uniform(0.5))
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

fn usage() -> TokenUsage {
    TokenUsage {
        input_tokens: 20,
        output_tokens: 10,
        total_tokens: 30,
    }
}

/// The canonical scenario: one echo tool call, then a final text answer.
#[tokio::test]
async fn test_agent_echo_scenario() {
    let registry = Arc::new(ToolRegistry::new());
    registry
        .register(
            ToolMetadata::new("echo", "Echoes the message")
                .with_parameter(
                    ToolParameter::new("message", ToolParameterType::String).required(),
                )
                .safe_for_agents(),
            handler(|_cancel, params: serde_json::Value| async move {
                Ok(json!({"echoed": params["message"]}))
            }),
        )
        .await
        .unwrap();

    let llm = Arc::new(ScriptedChat::new(vec![
        ChatTurn {
            content: vec![ContentBlock::ToolUse {
                id: "tu_1".to_string(),
                name: "echo".to_string(),
                input: json!({"message": "hello"}),
            }],
            stop_reason: StopReason::ToolUse,
            usage: usage(),
        },
        ChatTurn {
            content: vec![ContentBlock::Text {
                text: "Done.".to_string(),
            }],
            stop_reason: StopReason::EndTurn,
            usage: usage(),
        },
    ]));

    let agent = AgentLoop::new(llm, registry, AgentConfig::default());
    let result = agent
        .run(&CancellationToken::new(), "use echo to say hello", None)
        .await
        .unwrap();

    assert_eq!(result.status, AgentStatus::Completed);
    assert_eq!(result.final_answer, "Done.");
    assert_eq!(result.iterations.len(), 2);
    assert_eq!(result.total_tool_calls(), 1);
    assert_eq!(result.error_count(), 0);
    assert_eq!(result.tools_used(), vec!["echo".to_string()]);
    assert_eq!(result.usage.total_tokens, 60);

    let call = &result.iterations[0].tool_calls[0];
    assert_eq!(call.output.as_ref().unwrap()["echoed"], "hello");
}

/// run-agent wired through the full canonical registry: the agent calls the
/// real `think` tool, and the excluded tools never appear in its toolbox.
#[tokio::test]
async fn test_run_agent_through_canonical_registry() {
    let llm = Arc::new(ScriptedChat::new(vec![
        ChatTurn {
            content: vec![ContentBlock::ToolUse {
                id: "tu_1".to_string(),
                name: "think".to_string(),
                input: json!({"content": "first step of the plan"}),
            }],
            stop_reason: StopReason::ToolUse,
            usage: usage(),
        },
        ChatTurn {
            content: vec![ContentBlock::Text {
                text: "Plan recorded.".to_string(),
            }],
            stop_reason: StopReason::EndTurn,
            usage: usage(),
        },
    ]));

    let storage = Arc::new(MemoryStorage::new());
    let core = ReasoningCore::with_options(
        storage.clone(),
        Arc::new(StubReasoner),
        Some(llm),
        None,
        NoesisConfig::default(),
    )
    .await
    .unwrap();
    let tools = build_tool_registry(&core).await.unwrap();

    let result = tools
        .execute(
            &CancellationToken::new(),
            "run-agent",
            json!({"task": "record the first step"}),
        )
        .await
        .unwrap();

    assert_eq!(result["status"], "completed");
    assert_eq!(result["final_answer"], "Plan recorded.");
    // The think call actually stored a thought.
    let metrics = core.storage().get_metrics().await.unwrap();
    assert_eq!(metrics.total_thoughts, 1);
}

/// A scripted model that tries to call an excluded tool gets an error fed
/// back (or stops, under stop_on_error).
#[tokio::test]
async fn test_agent_cannot_reach_excluded_tools() {
    let llm = Arc::new(ScriptedChat::new(vec![ChatTurn {
        content: vec![ContentBlock::ToolUse {
            id: "tu_1".to_string(),
            name: "run-agent".to_string(),
            input: json!({"task": "recurse"}),
        }],
        stop_reason: StopReason::ToolUse,
        usage: usage(),
    }]));

    let storage = Arc::new(MemoryStorage::new());
    let core = ReasoningCore::with_options(
        storage,
        Arc::new(StubReasoner),
        Some(llm.clone()),
        None,
        NoesisConfig::default(),
    )
    .await
    .unwrap();
    let tools = build_tool_registry(&core).await.unwrap();

    // The safe subset surfaced to agents never contains the excluded names.
    let safe: Vec<String> = tools
        .safe_tool_definitions()
        .await
        .into_iter()
        .map(|d| d.name)
        .collect();
    assert!(!safe.contains(&"run-agent".to_string()));
    assert!(!safe.contains(&"restore-checkpoint".to_string()));
    assert!(!safe.contains(&"got-prune".to_string()));
}

#[tokio::test]
async fn test_agent_loop_respects_iteration_budget() {
    let registry = Arc::new(ToolRegistry::new());
    registry
        .register(
            ToolMetadata::new("noop", "Does nothing").safe_for_agents(),
            handler(|_cancel, _params: serde_json::Value| async move { Ok(json!({})) }),
        )
        .await
        .unwrap();

    let turns: Vec<ChatTurn> = (0..5)
        .map(|i| ChatTurn {
            content: vec![ContentBlock::ToolUse {
                id: format!("tu_{}", i),
                name: "noop".to_string(),
                input: json!({}),
            }],
            stop_reason: StopReason::ToolUse,
            usage: usage(),
        })
        .collect();

    let agent = AgentLoop::new(
        Arc::new(ScriptedChat::new(turns)),
        registry,
        AgentConfig {
            max_iterations: 2,
            ..AgentConfig::default()
        },
    );
    let result = agent
        .run(&CancellationToken::new(), "loop forever", None)
        .await
        .unwrap();
    assert_eq!(result.status, AgentStatus::MaxIterations);
    assert_eq!(result.iterations.len(), 2);
}
