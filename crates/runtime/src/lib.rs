//! SQUID runtime: configuration, the reasoning engine and the control loop.

pub mod agent_config;
pub mod control_loop;
pub mod logging;
pub mod metrics;
pub mod reasoning;

pub use agent_config::{
    load_agent_config, parse_agent_config, AgentConfig, PlannerConfig, Timeouts, VisionBackend,
    VisionConfig,
};
pub use control_loop::{
    ControlLoop, IterationOutcome, LoopConfig, LoopState, OutcomeKind, RunReport, STOP_INSTRUCTION,
};
pub use reasoning::ReasoningEngine;
