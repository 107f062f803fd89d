pub mod compactor;
pub mod context_manager;
pub mod types;

pub use compactor::{prune, rank};
pub use context_manager::ContextManager;
pub use types::*;
