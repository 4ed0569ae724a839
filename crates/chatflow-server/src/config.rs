use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, bail};
use chatflow_ai::DriverMode;
use serde::Deserialize;

/// Runtime configuration, from a TOML file or the environment.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub llm: LlmSettings,
    pub agent: AgentSettings,
    pub memory: MemorySettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmSettings {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_direct_model")]
    pub direct_model: String,
    #[serde(default)]
    pub temperature: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentSettings {
    #[serde(default)]
    pub mode: DriverMode,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MemorySettings {
    #[serde(default = "default_summary_model")]
    pub summary_model: String,
    #[serde(default = "default_max_token_limit")]
    pub max_token_limit: usize,
    #[serde(default = "default_min_tail_messages")]
    pub min_tail_messages: usize,
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

#[derive(Debug, Deserialize, Default)]
struct FileConfig {
    #[serde(default)]
    server: ServerSection,
    #[serde(default)]
    llm: LlmSettings,
    #[serde(default)]
    agent: AgentSettings,
    #[serde(default)]
    memory: MemorySettings,
}

#[derive(Debug, Deserialize)]
struct ServerSection {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_cors_origins")]
    cors_origins: Vec<String>,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: default_cors_origins(),
        }
    }
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_base_url(),
            model: default_model(),
            direct_model: default_direct_model(),
            temperature: 0.0,
        }
    }
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            mode: DriverMode::default(),
            max_iterations: default_max_iterations(),
            system_prompt: default_system_prompt(),
            tool_timeout_secs: default_tool_timeout_secs(),
        }
    }
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            summary_model: default_summary_model(),
            max_token_limit: default_max_token_limit(),
            min_tail_messages: default_min_tail_messages(),
            max_sessions: default_max_sessions(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4o-2024-05-13".to_string()
}

fn default_direct_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_max_iterations() -> usize {
    chatflow_ai::agent::DEFAULT_MAX_ITERATIONS
}

fn default_system_prompt() -> String {
    chatflow_ai::agent::DEFAULT_AGENT_PROMPT.to_string()
}

fn default_tool_timeout_secs() -> u64 {
    chatflow_ai::agent::DEFAULT_TOOL_TIMEOUT.as_secs()
}

fn default_summary_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_max_token_limit() -> usize {
    chatflow_ai::memory::DEFAULT_MAX_TOKEN_LIMIT
}

fn default_min_tail_messages() -> usize {
    chatflow_ai::memory::DEFAULT_MIN_TAIL_MESSAGES
}

fn default_max_sessions() -> usize {
    chatflow_ai::memory::DEFAULT_MAX_SESSIONS
}

impl ServerConfig {
    /// Load from `CHATFLOW_CONFIG` or `./chatflow.toml` if present, otherwise
    /// from environment variables. A `.env` file is read first when present.
    pub fn load() -> anyhow::Result<Self> {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!(path = %path.display(), "Loaded .env file");
        }

        let lookup = |key: &str| env::var(key).ok();
        if let Some((path, contents)) = read_config_file()? {
            return Self::from_toml(&contents, lookup)
                .with_context(|| format!("Invalid config {path}"));
        }

        Self::from_lookup(lookup)
    }

    /// Parse a TOML document. A missing `llm.api_key` falls back to `OPENAI_API_KEY`.
    pub fn from_toml(
        contents: &str,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> anyhow::Result<Self> {
        let mut file: FileConfig = toml::from_str(contents).context("Failed to parse TOML")?;
        if file.llm.api_key.is_empty() {
            file.llm.api_key = lookup("OPENAI_API_KEY").unwrap_or_default();
        }

        let config = Self {
            host: file.server.host,
            port: file.server.port,
            cors_origins: file.server.cors_origins,
            llm: file.llm,
            agent: file.agent,
            memory: file.memory,
        };
        config.validate()?;
        Ok(config)
    }

    /// Build from environment-style key lookups.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let defaults = FileConfig::default();
        let parsed = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let host = parsed("CHATFLOW_HOST").unwrap_or(defaults.server.host);
        let port = match parsed("CHATFLOW_PORT") {
            Some(value) => value
                .parse::<u16>()
                .with_context(|| format!("CHATFLOW_PORT is not a port: {value}"))?,
            None => defaults.server.port,
        };
        let cors_origins = parsed("CHATFLOW_CORS_ORIGINS")
            .map(|value| {
                value
                    .split(',')
                    .map(|origin| origin.trim().to_string())
                    .filter(|origin| !origin.is_empty())
                    .collect()
            })
            .unwrap_or(defaults.server.cors_origins);

        let temperature = match parsed("CHATFLOW_TEMPERATURE") {
            Some(value) => value
                .parse::<f32>()
                .with_context(|| format!("CHATFLOW_TEMPERATURE is not a number: {value}"))?,
            None => defaults.llm.temperature,
        };
        let llm = LlmSettings {
            api_key: parsed("OPENAI_API_KEY").unwrap_or_default(),
            base_url: parsed("OPENAI_BASE_URL").unwrap_or(defaults.llm.base_url),
            model: parsed("CHATFLOW_MODEL").unwrap_or(defaults.llm.model),
            direct_model: parsed("CHATFLOW_DIRECT_MODEL").unwrap_or(defaults.llm.direct_model),
            temperature,
        };

        let mode = match parsed("CHATFLOW_MODE") {
            Some(value) => value.parse::<DriverMode>()?,
            None => defaults.agent.mode,
        };
        let max_iterations = match parsed("CHATFLOW_MAX_ITERATIONS") {
            Some(value) => value
                .parse::<usize>()
                .with_context(|| format!("CHATFLOW_MAX_ITERATIONS is not a number: {value}"))?,
            None => defaults.agent.max_iterations,
        };
        let agent = AgentSettings {
            mode,
            max_iterations,
            ..defaults.agent
        };

        let max_token_limit = match parsed("CHATFLOW_MEMORY_TOKEN_LIMIT") {
            Some(value) => value.parse::<usize>().with_context(|| {
                format!("CHATFLOW_MEMORY_TOKEN_LIMIT is not a number: {value}")
            })?,
            None => defaults.memory.max_token_limit,
        };
        let max_sessions = match parsed("CHATFLOW_MAX_SESSIONS") {
            Some(value) => value
                .parse::<usize>()
                .with_context(|| format!("CHATFLOW_MAX_SESSIONS is not a number: {value}"))?,
            None => defaults.memory.max_sessions,
        };
        let memory = MemorySettings {
            summary_model: parsed("CHATFLOW_SUMMARY_MODEL")
                .unwrap_or(defaults.memory.summary_model),
            max_token_limit,
            max_sessions,
            ..defaults.memory
        };

        let config = Self {
            host,
            port,
            cors_origins,
            llm,
            agent,
            memory,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.llm.api_key.trim().is_empty() {
            bail!("OPENAI_API_KEY is not set");
        }
        if self.agent.max_iterations == 0 {
            bail!("agent.max_iterations must be at least 1");
        }
        if self.memory.max_sessions == 0 {
            bail!("memory.max_sessions must be at least 1");
        }
        Ok(())
    }
}

fn read_config_file() -> anyhow::Result<Option<(String, String)>> {
    let path = if let Ok(path) = env::var("CHATFLOW_CONFIG") {
        path
    } else if Path::new("chatflow.toml").exists() {
        "chatflow.toml".to_string()
    } else {
        return Ok(None);
    };

    let contents =
        fs::read_to_string(&path).with_context(|| format!("Failed to read config {path}"))?;
    Ok(Some((path, contents)))
}
