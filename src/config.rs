//! Declarative system configuration
//!
//! The runtime is driven by a YAML file with four top-level keys: `system`,
//! `agents`, `functions`, and `inference_engines`. Missing keys take
//! defaults; unknown top-level keys are warned about and ignored.
//! Precedence for overlapping settings is CLI flags over environment
//! variables over the file.

use crate::agent::AgentRole;
use crate::domain_types::FunctionName;
use crate::error::{AgentError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::warn;

/// Environment variable overriding the configuration file path
pub const ENV_CONFIG: &str = "KOLOSAL_CONFIG";
/// Environment variable overriding the log level
pub const ENV_LOG_LEVEL: &str = "KOLOSAL_LOG_LEVEL";
/// Environment variable overriding the management API port
pub const ENV_PORT: &str = "KOLOSAL_PORT";

/// Server and supervisor settings under the `system` key
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemSettings {
    /// Bind host for the management API
    pub host: String,
    /// Bind port for the management API
    pub port: u16,
    /// Log level (TRACE|DEBUG|INFO|WARN|ERROR)
    pub log_level: String,
    /// Allowed CORS origins; empty means permissive
    pub cors_allowed_origins: Vec<String>,
    /// Server-side request deadline in seconds
    pub request_timeout_secs: u64,
    /// Supervisor health check interval in seconds
    pub health_check_interval_secs: u64,
    /// Whether the supervisor attempts recovery
    pub auto_recovery: bool,
    /// Bounded recovery attempts within the rolling window
    pub max_recovery_attempts: u32,
    /// Rolling window for recovery accounting in seconds
    pub recovery_window_secs: u64,
    /// Grace period for component shutdown in seconds
    pub shutdown_grace_secs: u64,
}

impl Default for SystemSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8081,
            log_level: "INFO".to_string(),
            cors_allowed_origins: Vec::new(),
            request_timeout_secs: 30,
            health_check_interval_secs: 30,
            auto_recovery: true,
            max_recovery_attempts: 3,
            recovery_window_secs: 300,
            shutdown_grace_secs: 5,
        }
    }
}

/// Declarative description of one agent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Human-readable agent name
    pub name: String,
    /// Free-form type tag
    #[serde(alias = "type")]
    pub agent_type: String,
    /// Role in the population
    pub role: AgentRole,
    /// Capability tags for discovery
    pub capabilities: Vec<String>,
    /// Function names to register, in order
    pub functions: Vec<String>,
    /// Whether the agent starts with the system
    pub auto_start: bool,
    /// Job worker pool size
    pub max_concurrent_tasks: Option<usize>,
    /// Retained conversation messages
    pub memory_limit: Option<usize>,
    /// Free-form option bag passed through unchanged
    pub options: HashMap<String, serde_json::Value>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            agent_type: "generic".to_string(),
            role: AgentRole::default(),
            capabilities: Vec::new(),
            functions: Vec::new(),
            auto_start: false,
            max_concurrent_tasks: None,
            memory_limit: None,
            options: HashMap::new(),
        }
    }
}

/// Declarative description of one configurable function
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FunctionConfig {
    /// Function name
    pub name: String,
    /// Kind: `builtin`, `llm`, or `external_api`
    #[serde(alias = "type")]
    pub function_type: String,
    /// Human-readable description
    pub description: String,
    /// System prompt for `llm` functions
    pub system_prompt: Option<String>,
    /// Endpoint for `external_api` functions
    pub endpoint: Option<String>,
    /// Declared parameters for config-defined functions
    pub parameters: Vec<crate::functions::ParameterSpec>,
}

impl Default for FunctionConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            function_type: "builtin".to_string(),
            description: String::new(),
            system_prompt: None,
            endpoint: None,
            parameters: Vec::new(),
        }
    }
}

/// Descriptor for an external inference backend subprocess
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceEngineConfig {
    /// Engine identifier
    pub name: String,
    /// Path to the backend executable; `None` means externally managed
    pub executable: Option<String>,
    /// Host the backend binds or is reachable on
    pub host: String,
    /// Port the backend binds or is reachable on
    pub port: u16,
    /// Model identifier forwarded to completion requests
    pub model: String,
    /// Seconds to poll the health URL after spawning
    pub startup_timeout_secs: u64,
    /// Seconds between graceful termination and forced kill
    pub grace_period_secs: u64,
}

impl Default for InferenceEngineConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            executable: None,
            host: "127.0.0.1".to_string(),
            port: 8080,
            model: "default".to_string(),
            startup_timeout_secs: 30,
            grace_period_secs: 5,
        }
    }
}

impl InferenceEngineConfig {
    /// Base URL of the backend HTTP interface
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Health probe URL
    pub fn health_url(&self) -> String {
        format!("{}/health", self.base_url())
    }
}

/// Root of the declarative configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    /// Server and supervisor settings
    pub system: SystemSettings,
    /// Agent population
    pub agents: Vec<AgentConfig>,
    /// Config-defined functions
    pub functions: Vec<FunctionConfig>,
    /// Inference backends
    pub inference_engines: Vec<InferenceEngineConfig>,
}

const KNOWN_TOP_LEVEL_KEYS: &[&str] = &["system", "agents", "functions", "inference_engines"];

impl SystemConfig {
    /// Parses configuration from YAML text
    ///
    /// # Errors
    ///
    /// Returns a validation error when the document does not parse or an
    /// agent entry fails validation.
    pub fn from_yaml(text: &str) -> Result<Self> {
        let value: serde_yaml::Value = serde_yaml::from_str(text)
            .map_err(|e| AgentError::Validation(format!("invalid configuration: {e}")))?;

        if let serde_yaml::Value::Mapping(mapping) = &value {
            for key in mapping.keys() {
                if let serde_yaml::Value::String(key) = key {
                    if !KNOWN_TOP_LEVEL_KEYS.contains(&key.as_str()) {
                        warn!(key = %key, "ignoring unknown configuration key");
                    }
                }
            }
        }

        let config: Self = serde_yaml::from_value(value)
            .map_err(|e| AgentError::Validation(format!("invalid configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and parses a configuration file
    ///
    /// # Errors
    ///
    /// Returns an IO error when the file cannot be read and a validation
    /// error when it does not parse.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml(&text)
    }

    /// Validates cross-field constraints
    ///
    /// # Errors
    ///
    /// Returns a validation error naming the offending entry.
    pub fn validate(&self) -> Result<()> {
        let mut seen_names = std::collections::HashSet::new();
        for agent in &self.agents {
            if agent.name.trim().is_empty() {
                return Err(AgentError::Validation(
                    "agent entry with empty name".to_string(),
                ));
            }
            if !seen_names.insert(agent.name.as_str()) {
                return Err(AgentError::Validation(format!(
                    "duplicate agent name '{}'",
                    agent.name
                )));
            }
            if let Some(workers) = agent.max_concurrent_tasks {
                if workers == 0 {
                    return Err(AgentError::Validation(format!(
                        "agent '{}' has max_concurrent_tasks of zero",
                        agent.name
                    )));
                }
            }
        }
        for function in &self.functions {
            FunctionName::try_new(function.name.clone()).map_err(|e| {
                AgentError::Validation(format!("invalid function name '{}': {e}", function.name))
            })?;
            if function.function_type == "external_api" && function.endpoint.is_none() {
                return Err(AgentError::Validation(format!(
                    "external_api function '{}' has no endpoint",
                    function.name
                )));
            }
        }
        Ok(())
    }

    /// The primary inference engine, when one is configured
    pub fn primary_engine(&self) -> Option<&InferenceEngineConfig> {
        self.inference_engines.first()
    }

    /// Number of agents configured to auto-start
    pub fn expected_running(&self) -> usize {
        self.agents.iter().filter(|a| a.auto_start).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
system:
  host: 0.0.0.0
  port: 9090
  log_level: DEBUG

agents:
  - name: assistant
    type: worker
    role: ANALYST
    capabilities: [text_processing]
    functions: [echo, text_analysis]
    auto_start: true
    max_concurrent_tasks: 2
  - name: coordinator
    role: COORDINATOR
    auto_start: false

functions:
  - name: summarize
    type: llm
    description: Summarize text
    system_prompt: You are a summarizer.

inference_engines:
  - name: default
    host: 127.0.0.1
    port: 8080
    model: llama
"#;

    #[test]
    fn parses_a_full_document() {
        let config = SystemConfig::from_yaml(SAMPLE).unwrap();
        assert_eq!(config.system.port, 9090);
        assert_eq!(config.agents.len(), 2);
        assert_eq!(config.agents[0].role, AgentRole::Analyst);
        assert!(config.agents[0].auto_start);
        assert_eq!(config.expected_running(), 1);
        assert_eq!(config.functions[0].function_type, "llm");
        assert_eq!(
            config.primary_engine().unwrap().health_url(),
            "http://127.0.0.1:8080/health"
        );
    }

    #[test]
    fn missing_keys_take_defaults() {
        let config = SystemConfig::from_yaml("agents: []").unwrap();
        assert_eq!(config.system.port, 8081);
        assert_eq!(config.system.health_check_interval_secs, 30);
        assert!(config.system.auto_recovery);
        assert!(config.inference_engines.is_empty());
    }

    #[test]
    fn unknown_top_level_keys_are_ignored() {
        let config = SystemConfig::from_yaml("workflows: []\nagents: []").unwrap();
        assert!(config.agents.is_empty());
    }

    #[test]
    fn duplicate_agent_names_are_rejected() {
        let doc = "agents:\n  - name: twin\n  - name: twin\n";
        let err = SystemConfig::from_yaml(doc).unwrap_err();
        assert!(matches!(err, AgentError::Validation(_)));
        assert!(err.to_string().contains("twin"));
    }

    #[test]
    fn zero_workers_are_rejected() {
        let doc = "agents:\n  - name: lazy\n    max_concurrent_tasks: 0\n";
        assert!(SystemConfig::from_yaml(doc).is_err());
    }

    #[test]
    fn external_api_function_requires_endpoint() {
        let doc = "functions:\n  - name: api\n    type: external_api\n";
        assert!(SystemConfig::from_yaml(doc).is_err());
    }

    #[test]
    fn malformed_yaml_is_a_validation_error() {
        let err = SystemConfig::from_yaml("agents: [unclosed").unwrap_err();
        assert!(matches!(err, AgentError::Validation(_)));
    }
}
