use crate::desktop_ops::{ClickElement, FindElement, ReadText, TypeText, Wait};
use crate::traits::{Operation, Resolution, ResolveContext, ToolError};
use squid_core::FunctionCall;
use std::collections::HashMap;
use std::sync::Arc;

/// Operations the planner may call, by name.
///
/// Lookups of names that were never registered fail with
/// [`ToolError::UnknownFunction`]; nothing is resolved by guessing.
pub struct FunctionRegistry {
    operations: HashMap<String, Arc<dyn Operation>>,
    order: Vec<String>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self {
            operations: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// `find_element`, `click_element`, `type_text`, `read_text`, `wait`.
    pub fn desktop() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(FindElement));
        registry.register(Arc::new(ClickElement));
        registry.register(Arc::new(TypeText));
        registry.register(Arc::new(ReadText));
        registry.register(Arc::new(Wait));
        registry
    }

    pub fn register(&mut self, operation: Arc<dyn Operation>) {
        let name = operation.name().to_string();
        if self.operations.insert(name.clone(), operation).is_none() {
            self.order.push(name);
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Operation>> {
        self.operations.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.operations.contains_key(name)
    }

    /// Names in registration order.
    pub fn list(&self) -> Vec<String> {
        self.order.clone()
    }

    pub fn schemas(&self) -> Vec<serde_json::Value> {
        self.order
            .iter()
            .filter_map(|name| self.operations.get(name))
            .map(|op| {
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": op.name(),
                        "description": op.description(),
                        "parameters": op.schema()
                    }
                })
            })
            .collect()
    }

    pub fn resolve(
        &self,
        call: &FunctionCall,
        ctx: &ResolveContext<'_>,
    ) -> Result<Resolution, ToolError> {
        let operation = self
            .operations
            .get(&call.name)
            .ok_or_else(|| ToolError::UnknownFunction(call.name.clone()))?;
        operation.resolve(&call.arguments, ctx)
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::desktop()
    }
}
