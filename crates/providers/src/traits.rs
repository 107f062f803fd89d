use crate::planner::PlanningContext;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use squid_core::FunctionCall;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("API error: {0}")]
    Api(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    pub arguments: serde_json::Value,
}

impl From<ToolCall> for FunctionCall {
    fn from(call: ToolCall) -> Self {
        FunctionCall::new(call.name, call.arguments)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: String,
}

/// Text deltas of a streamed completion, in arrival order.
pub type ChunkStream = BoxStream<'static, Result<String, ProviderError>>;

#[async_trait]
pub trait LLMProvider: Send + Sync {
    async fn generate(
        &self,
        messages: &[Message],
        tools: Option<&[serde_json::Value]>,
    ) -> Result<GenerateResponse, ProviderError>;

    /// Stream the text of a completion as it is produced.
    ///
    /// Backends without incremental output yield the whole `generate`
    /// content as a single chunk.
    async fn stream(&self, messages: &[Message]) -> Result<ChunkStream, ProviderError> {
        let response = self.generate(messages, None).await?;
        Ok(stream::iter(response.content.map(Ok)).boxed())
    }

    fn name(&self) -> &str;
}

/// Language-model capability as seen by the reasoning engine: a planning
/// context in, an ordered list of function calls out.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn propose(&self, context: &PlanningContext) -> Result<Vec<FunctionCall>, ProviderError>;

    fn name(&self) -> &str;
}
