pub mod openai_compatible;
pub mod planner;
pub mod traits;

pub use openai_compatible::OpenAICompatibleProvider;
pub use planner::{ModelPlanner, PlanningContext};
pub use traits::{ChunkStream, GenerateResponse, LLMProvider, Message, Planner, ProviderError, ToolCall};
