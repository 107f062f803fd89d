pub mod actuator;
pub mod failsafe;
pub mod input_driver;

pub use actuator::{Actuator, ExecutionError};
pub use failsafe::{FailSafe, FailSafeConfig};
pub use input_driver::{CommandInputDriver, InputDriver, InputError};
