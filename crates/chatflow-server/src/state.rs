use std::sync::Arc;
use std::time::Duration;

use chatflow_ai::{
    AgentConfig, CompletionDriver, LlmClient, MemoryConfig, OpenAIClient, SessionMemoryStore,
    default_registry,
};

use crate::config::ServerConfig;

/// Shared handler state. Cloned per request.
#[derive(Clone)]
pub struct AppState {
    pub driver: CompletionDriver,
}

impl AppState {
    pub fn new(driver: CompletionDriver) -> Self {
        Self { driver }
    }

    /// Wire the OpenAI clients, tool registry and session memory from config.
    pub fn from_config(config: &ServerConfig) -> Self {
        let client = |model: &str| -> Arc<dyn LlmClient> {
            Arc::new(
                OpenAIClient::new(config.llm.api_key.clone())
                    .with_base_url(config.llm.base_url.clone())
                    .with_model(model),
            )
        };

        let memory = SessionMemoryStore::new(
            client(&config.memory.summary_model),
            MemoryConfig {
                max_token_limit: config.memory.max_token_limit,
                min_tail_messages: config.memory.min_tail_messages,
                max_sessions: config.memory.max_sessions,
                ..MemoryConfig::default()
            },
        );

        let agent_config = AgentConfig::default()
            .with_system_prompt(config.agent.system_prompt.clone())
            .with_max_iterations(config.agent.max_iterations)
            .with_temperature(Some(config.llm.temperature))
            .with_tool_timeout(Duration::from_secs(config.agent.tool_timeout_secs));

        let driver = CompletionDriver::new(
            client(&config.llm.model),
            Arc::new(default_registry()),
            memory,
        )
        .with_direct_llm(client(&config.llm.direct_model))
        .with_agent_config(agent_config)
        .with_mode(config.agent.mode);

        tracing::info!(
            mode = %config.agent.mode,
            model = %config.llm.model,
            direct_model = %config.llm.direct_model,
            summary_model = %config.memory.summary_model,
            "Completion driver ready"
        );

        Self::new(driver)
    }
}
