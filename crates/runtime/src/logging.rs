//! Tracing subscriber setup.

use squid_core::AgentError;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const DEFAULT_FILTER: &str = "info";

/// Install the global subscriber, honouring `RUST_LOG`.
pub fn init() -> Result<(), AgentError> {
    init_with_default(DEFAULT_FILTER)
}

/// Like [`init`], with `default_filter` used when `RUST_LOG` is unset or
/// invalid. Fails if a global subscriber is already installed.
pub fn init_with_default(default_filter: &str) -> Result<(), AgentError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let fmt_layer = fmt::layer().with_writer(std::io::stderr).with_target(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| AgentError::Config(format!("Cannot install logger: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_fails() {
        // Another test may have installed one already; either way the
        // second call must report an error instead of panicking.
        let _ = init_with_default("debug");
        assert!(matches!(init(), Err(AgentError::Config(_))));
    }
}
