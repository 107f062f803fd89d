//! Agent configuration loader.

use serde::{Deserialize, Serialize};
use squid_core::{AgentError, ExecutionContext};
use squid_executor::FailSafeConfig;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_LLM_ENDPOINT: &str = "SQUID_LLM_ENDPOINT";
pub const ENV_LLM_MODEL: &str = "SQUID_LLM_MODEL";
pub const ENV_LLM_API_KEY: &str = "SQUID_LLM_API_KEY";
pub const ENV_VISION_API_KEY: &str = "SQUID_VISION_API_KEY";

/// Agent configuration. Every field has a default, so an almost empty YAML
/// file is valid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    pub id: String,
    pub memory_capacity: usize,
    pub history_limit: usize,
    pub recall_limit: usize,
    pub max_iterations: usize,
    pub timeouts: Timeouts,
    pub constraints: Vec<String>,
    pub safety_checks: Vec<String>,
    pub fail_safe: FailSafeConfig,
    pub planner: PlannerConfig,
    pub vision: VisionConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            id: "squid".to_string(),
            memory_capacity: 256,
            history_limit: 50,
            recall_limit: 5,
            max_iterations: 20,
            timeouts: Timeouts::default(),
            constraints: Vec::new(),
            safety_checks: Vec::new(),
            fail_safe: FailSafeConfig::default(),
            planner: PlannerConfig::default(),
            vision: VisionConfig::default(),
        }
    }
}

/// Per-adapter timeouts in milliseconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Timeouts {
    pub capture_ms: u64,
    pub detect_ms: u64,
    pub plan_ms: u64,
    pub action_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            capture_ms: 5_000,
            detect_ms: 15_000,
            plan_ms: 60_000,
            action_ms: 10_000,
        }
    }
}

impl Timeouts {
    pub fn capture(&self) -> Duration {
        Duration::from_millis(self.capture_ms)
    }

    pub fn detect(&self) -> Duration {
        Duration::from_millis(self.detect_ms)
    }

    pub fn plan(&self) -> Duration {
        Duration::from_millis(self.plan_ms)
    }

    pub fn action(&self) -> Duration {
        Duration::from_millis(self.action_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlannerConfig {
    pub endpoint: String,
    pub model: String,
    /// Only read from the environment; never written back out.
    #[serde(skip)]
    pub api_key: Option<String>,
    pub system_prompt: Option<String>,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:11434/v1".to_string(),
            model: "llama3.1".to_string(),
            api_key: None,
            system_prompt: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum VisionBackend {
    #[default]
    Tesseract,
    Remote,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct VisionConfig {
    pub backend: VisionBackend,
    /// Required for the remote backend.
    pub endpoint: Option<String>,
    #[serde(skip)]
    pub api_key: Option<String>,
    /// Tesseract language, e.g. `eng`.
    pub lang: Option<String>,
    /// Where screenshots are written. Defaults to the system temp dir.
    pub capture_dir: Option<PathBuf>,
}

impl AgentConfig {
    /// Environment variables override the planner endpoint, model and keys.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(endpoint) = non_empty(ENV_LLM_ENDPOINT) {
            self.planner.endpoint = endpoint;
        }
        if let Some(model) = non_empty(ENV_LLM_MODEL) {
            self.planner.model = model;
        }
        if let Some(key) = non_empty(ENV_LLM_API_KEY) {
            self.planner.api_key = Some(key);
        }
        if let Some(key) = non_empty(ENV_VISION_API_KEY) {
            self.vision.api_key = Some(key);
        }
    }

    pub fn validate(&self) -> Result<(), AgentError> {
        if self.id.trim().is_empty() {
            return Err(AgentError::Config("id cannot be empty".to_string()));
        }
        if self.memory_capacity == 0 {
            return Err(AgentError::Config(
                "memory_capacity must be at least 1".to_string(),
            ));
        }
        if self.max_iterations == 0 {
            return Err(AgentError::Config(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        let t = &self.timeouts;
        if [t.capture_ms, t.detect_ms, t.plan_ms, t.action_ms].contains(&0) {
            return Err(AgentError::Config("timeouts must be non-zero".to_string()));
        }
        if self.fail_safe.screen_width == 0 || self.fail_safe.screen_height == 0 {
            return Err(AgentError::Config(
                "fail_safe screen size must be non-zero".to_string(),
            ));
        }
        if self.vision.backend == VisionBackend::Remote && self.vision.endpoint.is_none() {
            return Err(AgentError::Config(
                "remote vision backend needs vision.endpoint".to_string(),
            ));
        }
        Ok(())
    }

    /// Execution context for one iteration: configured constraints and
    /// checks, plus the screen size for coordinate checks.
    pub fn execution_context(&self) -> ExecutionContext {
        ExecutionContext::new(self.constraints.clone(), self.safety_checks.clone())
            .with_variable("screen_width", self.fail_safe.screen_width.into())
            .with_variable("screen_height", self.fail_safe.screen_height.into())
    }
}

/// Parse configuration from YAML text. Does not apply env overrides.
pub fn parse_agent_config(content: &str) -> Result<AgentConfig, AgentError> {
    if content.trim().is_empty() {
        return Err(AgentError::Config("Config file is empty".to_string()));
    }
    let config: AgentConfig = serde_yaml::from_str(content)
        .map_err(|e| AgentError::Config(format!("Invalid YAML: {}", e)))?;
    config.validate()?;
    Ok(config)
}

/// Load agent configuration from a YAML file and apply env overrides.
///
/// # Errors
/// Returns `AgentError::Config` if the file is missing, empty, not valid
/// YAML, or has out-of-range values.
pub fn load_agent_config(config_path: &str) -> Result<AgentConfig, AgentError> {
    let config_file = Path::new(config_path);

    if !config_file.exists() {
        return Err(AgentError::Config(format!(
            "Config file not found: {}",
            config_path
        )));
    }

    let content = std::fs::read_to_string(config_file)
        .map_err(|e| AgentError::Config(format!("Cannot read {}: {}", config_path, e)))?;

    let mut config = parse_agent_config(&content)?;
    config.apply_env_overrides();
    tracing::info!("Loaded agent config '{}' from {}", config.id, config_path);
    Ok(config)
}
