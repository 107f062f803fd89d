use crate::coordinates::CoordinateMapper;
use serde_json::{Map, Value};
use squid_core::{Action, ScreenSnapshot};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ToolError {
    #[error("Unknown function: {0}")]
    UnknownFunction(String),
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("Not found: {0}")]
    NotFound(String),
}

/// What an operation needs to turn a call into an action.
pub struct ResolveContext<'a> {
    pub snapshot: &'a ScreenSnapshot,
    pub working_memory: &'a Map<String, Value>,
    pub mapper: &'a dyn CoordinateMapper,
}

/// A resolved call: one action for the plan, plus working-memory updates.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub action: Action,
    pub memory: Map<String, Value>,
}

impl Resolution {
    pub fn action(action: Action) -> Self {
        Self {
            action,
            memory: Map::new(),
        }
    }

    pub fn remember(mut self, key: &str, value: Value) -> Self {
        self.memory.insert(key.to_string(), value);
        self
    }
}

/// One executable operation the planner may call.
pub trait Operation: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn schema(&self) -> Value;

    fn resolve(&self, args: &Value, ctx: &ResolveContext<'_>) -> Result<Resolution, ToolError>;
}
