pub mod coordinates;
pub mod desktop_ops;
pub mod registry;
pub mod traits;

pub use coordinates::{CenterPoint, CoordinateMapper, ScaledCenter};
pub use registry::FunctionRegistry;
pub use traits::{Operation, Resolution, ResolveContext, ToolError};
