use crate::failsafe::FailSafe;
use crate::input_driver::InputDriver;
use squid_core::{Action, ActionName};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, warn};

const DEFAULT_ACTION_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExecutionError {
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),
    #[error("Input error: {0}")]
    Input(String),
    #[error("Action timed out after {0}ms")]
    Timeout(u64),
    #[error("Fail-safe triggered: {0}")]
    FailSafe(String),
}

/// The only component that touches OS input state.
///
/// Parameters are checked before anything reaches the driver, and the
/// fail-safe is consulted before every input-producing step.
pub struct Actuator {
    driver: Arc<dyn InputDriver>,
    fail_safe: Arc<FailSafe>,
    default_timeout: Duration,
}

impl Actuator {
    pub fn new(driver: Arc<dyn InputDriver>, fail_safe: Arc<FailSafe>) -> Self {
        Self {
            driver,
            fail_safe,
            default_timeout: DEFAULT_ACTION_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn fail_safe(&self) -> &Arc<FailSafe> {
        &self.fail_safe
    }

    /// Run one action. Never fails: any problem is logged and reported as
    /// `false`.
    pub async fn execute(&self, action: &Action) -> bool {
        self.execute_with_timeout(action, self.default_timeout).await
    }

    pub async fn execute_with_timeout(&self, action: &Action, limit: Duration) -> bool {
        match self.try_execute_with_timeout(action, limit).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Action '{}' not executed: {}", action.describe(), e);
                false
            }
        }
    }

    pub async fn try_execute(&self, action: &Action) -> Result<(), ExecutionError> {
        self.try_execute_with_timeout(action, self.default_timeout).await
    }

    pub async fn try_execute_with_timeout(
        &self,
        action: &Action,
        limit: Duration,
    ) -> Result<(), ExecutionError> {
        action
            .check_parameters()
            .map_err(ExecutionError::InvalidParameters)?;

        if action.name.touches_input() {
            self.fail_safe.check(self.driver.as_ref()).await?;
        } else {
            self.fail_safe.ensure_armed()?;
        }

        debug!("Executing {}", action.describe());
        match action.name {
            ActionName::Click => {
                let point = self.point(action)?;
                self.bounded(limit, self.driver.click(point)).await
            }
            ActionName::Move => {
                let point = self.point(action)?;
                self.bounded(limit, self.driver.move_to(point)).await
            }
            ActionName::Type => {
                let text = action.text().unwrap_or_default();
                self.bounded(limit, self.driver.type_text(text)).await
            }
            ActionName::Wait => {
                let duration = action.duration().unwrap_or_default();
                let token = self.fail_safe.token();
                tokio::select! {
                    biased;
                    _ = token.cancelled() => self.fail_safe.ensure_armed(),
                    slept = timeout(limit, tokio::time::sleep(duration)) => {
                        slept.map_err(|_| ExecutionError::Timeout(limit.as_millis() as u64))
                    }
                }
            }
            ActionName::Read | ActionName::NoOp => Ok(()),
        }
    }

    fn point(&self, action: &Action) -> Result<squid_core::Point, ExecutionError> {
        action.point().ok_or_else(|| {
            ExecutionError::InvalidParameters(format!("{} requires 'x' and 'y'", action.name))
        })
    }

    async fn bounded<F>(&self, limit: Duration, op: F) -> Result<(), ExecutionError>
    where
        F: Future<Output = Result<(), crate::input_driver::InputError>>,
    {
        match timeout(limit, op).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ExecutionError::Input(e.to_string())),
            Err(_) => Err(ExecutionError::Timeout(limit.as_millis() as u64)),
        }
    }
}
