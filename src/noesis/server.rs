//! Server core: wires storage, modes, managers, and the tool surface into
//! the per-server singletons created at startup.
//!
//! # Architecture
//!
//! ```text
//! ReasoningCore
//!   ├─ Storage (injected backend)
//!   ├─ ModeRegistry { linear, tree, divergent } + AutoMode selector
//!   ├─ BacktrackingManager (checkpoints / restore / fork / diff / prune)
//!   ├─ GotController (Graph-of-Thoughts)
//!   ├─ ReflectionLoop (evaluate → critique → refine)
//!   ├─ DualProcessExecutor (System-1 / System-2)
//!   └─ build_tool_registry() → ToolRegistry (JSON-schema tool surface)
//! ```
//!
//! The transport (MCP/JSON-RPC or anything else) is a collaborator: it calls
//! [`ToolRegistry::execute`](crate::noesis::tool_protocol::ToolRegistry::execute)
//! with the wire-level parameters and serialises whatever comes back.
//!
//! # Example
//!
//! ```rust,no_run
//! use noesis::{MemoryStorage, NoesisConfig, ReasoningCore};
//! use noesis::clients::MessagesClient;
//! use std::sync::Arc;
//!
//! # async {
//! let llm = Arc::new(MessagesClient::new("key", "claude-sonnet-4-0"));
//! let core = ReasoningCore::new(
//!     Arc::new(MemoryStorage::new()),
//!     llm,
//!     NoesisConfig::default(),
//! )
//! .await
//! .unwrap();
//! let tools = noesis::tools::build_tool_registry(&core).await.unwrap();
//! # };
//! ```

use crate::noesis::agent_loop::{AgentConfig, AgentLoop, AgentRunResult};
use crate::noesis::backtrack::BacktrackingManager;
use crate::noesis::config::NoesisConfig;
use crate::noesis::detectors::{
    HeuristicEvaluator, RuleBasedBiasDetector, RuleBasedFallacyDetector,
};
use crate::noesis::dual_process::DualProcessExecutor;
use crate::noesis::error::NoesisError;
use crate::noesis::got::GotController;
use crate::noesis::llm::{ChatLlm, ReasoningLlm};
use crate::noesis::modes::{
    AutoMode, DivergentMode, LinearMode, ModeRegistry, PrototypeEmbedder, ThoughtInput,
    ThoughtResult, TreeMode,
};
use crate::noesis::reflection::{ReflectionLoop, ReflectionReport};
use crate::noesis::storage::Storage;
use crate::noesis::tool_protocol::ToolRegistry;
use crate::noesis::types::ThoughtMode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// The reasoning core: long-lived, concurrency-safe, one per server.
pub struct ReasoningCore {
    storage: Arc<dyn Storage>,
    registry: Arc<ModeRegistry>,
    auto: Arc<AutoMode>,
    backtrack: Arc<BacktrackingManager>,
    got: Arc<GotController>,
    reflection: Arc<ReflectionLoop>,
    dual: Arc<DualProcessExecutor>,
    llm: Arc<dyn ReasoningLlm>,
    chat_llm: Option<Arc<dyn ChatLlm>>,
    config: NoesisConfig,
}

impl ReasoningCore {
    /// Construct a core with the default collaborators (rule-based
    /// evaluator/detectors, no embedder, no chat LLM).
    pub async fn new(
        storage: Arc<dyn Storage>,
        llm: Arc<dyn ReasoningLlm>,
        config: NoesisConfig,
    ) -> Result<Arc<Self>, NoesisError> {
        Self::with_options(storage, llm, None, None, config).await
    }

    /// Construct a core with an optional tool-use chat LLM (enables
    /// `run-agent`) and an optional prototype embedder (enables semantic
    /// mode selection).
    pub async fn with_options(
        storage: Arc<dyn Storage>,
        llm: Arc<dyn ReasoningLlm>,
        chat_llm: Option<Arc<dyn ChatLlm>>,
        embedder: Option<Arc<dyn PrototypeEmbedder>>,
        config: NoesisConfig,
    ) -> Result<Arc<Self>, NoesisError> {
        let registry = Arc::new(ModeRegistry::new());
        registry
            .register(Arc::new(LinearMode::new(storage.clone())))
            .await?;
        registry
            .register(Arc::new(TreeMode::new(storage.clone())))
            .await?;
        registry
            .register(Arc::new(DivergentMode::new(storage.clone())))
            .await?;

        let mut auto = AutoMode::new(storage.clone(), registry.clone())
            .with_outcome_threshold(config.outcome_threshold);
        auto.enable_bandit().await;
        if let Some(embedder) = embedder {
            auto.attach_embedder(embedder).await;
        }

        let reflection = Arc::new(ReflectionLoop::new(
            storage.clone(),
            Arc::new(HeuristicEvaluator),
            Arc::new(RuleBasedBiasDetector),
            Arc::new(RuleBasedFallacyDetector),
        ));
        let dual = Arc::new(DualProcessExecutor::new(
            registry.clone(),
            storage.clone(),
            config.dual_process.clone(),
        ));

        Ok(Arc::new(Self {
            backtrack: Arc::new(BacktrackingManager::new(storage.clone())),
            got: Arc::new(GotController::new(llm.clone())),
            auto: Arc::new(auto),
            registry,
            reflection,
            dual,
            storage,
            llm,
            chat_llm,
            config,
        }))
    }

    /// Process one thought. A concrete requested mode is dispatched
    /// directly; everything else routes through the auto selector.
    pub async fn think(
        &self,
        cancel: &CancellationToken,
        input: ThoughtInput,
    ) -> Result<ThoughtResult, NoesisError> {
        match input.mode {
            Some(mode) if mode != ThoughtMode::Auto => {
                let concrete = self.registry.get(mode.as_str()).await.ok_or_else(|| {
                    NoesisError::State(format!("mode not registered: {}", mode.as_str()))
                })?;
                concrete.process_thought(cancel, input).await
            }
            _ => {
                use crate::noesis::modes::ThinkingMode;
                self.auto.process_thought(cancel, input).await
            }
        }
    }

    /// Run the iterative reflection loop over a stored thought.
    pub async fn reflect(
        &self,
        cancel: &CancellationToken,
        thought_id: &str,
    ) -> Result<ReflectionReport, NoesisError> {
        self.reflection
            .refine_thought(cancel, thought_id, &self.config.reflection)
            .await
    }

    /// Drive the agentic loop against the given tool registry. Requires a
    /// chat-capable LLM.
    pub async fn run_agent(
        &self,
        cancel: &CancellationToken,
        tools: Arc<ToolRegistry>,
        task: &str,
        system_prompt: Option<&str>,
    ) -> Result<AgentRunResult, NoesisError> {
        let chat_llm = self.chat_llm.clone().ok_or_else(|| {
            NoesisError::State("no tool-use LLM configured for run-agent".to_string())
        })?;
        let agent = AgentLoop::new(chat_llm, tools, self.config.agent.clone());
        agent.run(cancel, task, system_prompt).await
    }

    // ---- Component accessors ----

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn modes(&self) -> &Arc<ModeRegistry> {
        &self.registry
    }

    pub fn auto(&self) -> &Arc<AutoMode> {
        &self.auto
    }

    pub fn backtrack(&self) -> &Arc<BacktrackingManager> {
        &self.backtrack
    }

    pub fn got(&self) -> &Arc<GotController> {
        &self.got
    }

    pub fn reflection(&self) -> &Arc<ReflectionLoop> {
        &self.reflection
    }

    pub fn dual_process(&self) -> &Arc<DualProcessExecutor> {
        &self.dual
    }

    pub fn llm(&self) -> &Arc<dyn ReasoningLlm> {
        &self.llm
    }

    pub fn agent_config(&self) -> &AgentConfig {
        &self.config.agent
    }

    pub fn config(&self) -> &NoesisConfig {
        &self.config
    }
}
