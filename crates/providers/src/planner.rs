use crate::traits::{LLMProvider, Message, Planner, ProviderError};
use async_trait::async_trait;
use serde_json::{Map, Value};
use squid_core::FunctionCall;
use squid_memory::{HistoryEntry, MemoryEntry};
use std::sync::Arc;
use tracing::debug;

const DEFAULT_SYSTEM_PROMPT: &str = "You control a desktop computer on behalf of the user. \
Look at the detected screen elements and call the available functions to make progress on the instruction. \
Call functions in the order they should run. Call no function when the instruction is already satisfied.";

/// Everything the planner sees for one decision.
#[derive(Debug, Clone, Default)]
pub struct PlanningContext {
    pub instruction: String,
    /// OpenAI-style `{ "type": "function", "function": {...} }` schemas.
    pub functions: Vec<Value>,
    pub snapshot_summary: String,
    pub recalled: Vec<MemoryEntry>,
    pub working_memory: Map<String, Value>,
    pub constraints: Vec<String>,
    pub history: Vec<HistoryEntry>,
}

impl PlanningContext {
    pub fn function_names(&self) -> Vec<String> {
        self.functions
            .iter()
            .filter_map(|schema| {
                schema
                    .get("function")
                    .and_then(|f| f.get("name"))
                    .and_then(|n| n.as_str())
                    .map(|s| s.to_string())
            })
            .collect()
    }

    /// Chat transcript for the model: system prompt, recent history, then
    /// the current observation.
    pub fn to_messages(&self, system_prompt: &str) -> Vec<Message> {
        let mut system = format!(
            "{}\n\nAvailable functions: {}",
            system_prompt,
            self.function_names().join(", ")
        );
        if !self.constraints.is_empty() {
            system.push_str("\n\nActive constraints:\n");
            for constraint in &self.constraints {
                system.push_str(&format!("- {}\n", constraint));
            }
        }

        let mut messages = vec![Message::system(system)];
        for entry in &self.history {
            messages.push(Message {
                role: entry.role.clone(),
                content: entry.content.clone(),
            });
        }

        let mut observation = format!(
            "Instruction: {}\n\nScreen:\n{}",
            self.instruction, self.snapshot_summary
        );
        if !self.working_memory.is_empty() {
            observation.push_str(&format!(
                "\nWorking memory: {}",
                Value::Object(self.working_memory.clone())
            ));
        }
        if !self.recalled.is_empty() {
            observation.push_str("\nRecent observations:\n");
            for entry in &self.recalled {
                observation.push_str(&format!("- {}\n", entry.content()));
            }
        }
        messages.push(Message::user(observation));
        messages
    }
}

/// [`Planner`] on top of any chat model that supports tool calls.
pub struct ModelPlanner {
    provider: Arc<dyn LLMProvider>,
    system_prompt: String,
}

impl ModelPlanner {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self {
            provider,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }
}

#[async_trait]
impl Planner for ModelPlanner {
    async fn propose(&self, context: &PlanningContext) -> Result<Vec<FunctionCall>, ProviderError> {
        let messages = context.to_messages(&self.system_prompt);
        let response = self
            .provider
            .generate(&messages, Some(context.functions.as_slice()))
            .await?;

        if response.tool_calls.is_empty() {
            if let Some(content) = &response.content {
                debug!("Planner returned text without calls: {}", content);
            }
        }

        Ok(response.tool_calls.into_iter().map(FunctionCall::from).collect())
    }

    fn name(&self) -> &str {
        self.provider.name()
    }
}
