pub mod error;
pub mod metrics;
pub mod planning;
pub mod types;

pub use error::AgentError;
pub use metrics::{Metrics, MetricsSnapshot};
pub use planning::{ActionPlan, DroppedCall, ValidationResult, ValidationStatus};
pub use types::*;
