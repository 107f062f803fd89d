pub mod constraints;
pub mod validator;

pub use constraints::{Constraint, ConstraintError, SafetyCheck};
pub use validator::SafetyValidator;
