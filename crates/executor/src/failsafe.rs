use crate::actuator::ExecutionError;
use crate::input_driver::InputDriver;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use squid_core::Point;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FailSafeConfig {
    /// Side of the square corner zones in pixels. Zero disables the corners.
    pub corner_size: u32,
    pub screen_width: u32,
    pub screen_height: u32,
    /// Let input through when the cursor position cannot be read. Off by
    /// default: an unreadable cursor trips the guard.
    pub allow_unguarded: bool,
}

impl Default for FailSafeConfig {
    fn default() -> Self {
        Self {
            corner_size: 5,
            screen_width: 1920,
            screen_height: 1080,
            allow_unguarded: false,
        }
    }
}

/// Hard abort for automated input.
///
/// Moving the cursor into any screen corner trips the guard. A tripped guard
/// cancels its token and refuses every later action; there is no reset.
pub struct FailSafe {
    config: FailSafeConfig,
    token: CancellationToken,
    reason: Mutex<Option<String>>,
}

impl FailSafe {
    pub fn new(config: FailSafeConfig) -> Self {
        Self::with_token(config, CancellationToken::new())
    }

    /// Share an existing token, so tripping also cancels whatever else
    /// listens on it.
    pub fn with_token(config: FailSafeConfig, token: CancellationToken) -> Self {
        Self {
            config,
            token,
            reason: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &FailSafeConfig {
        &self.config
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn in_corner(&self, point: Point) -> bool {
        let size = self.config.corner_size as i64;
        if size == 0 {
            return false;
        }
        let (x, y) = (i64::from(point.x), i64::from(point.y));
        let right = i64::from(self.config.screen_width) - size;
        let bottom = i64::from(self.config.screen_height) - size;

        let near_left = x < size;
        let near_right = x >= right;
        let near_top = y < size;
        let near_bottom = y >= bottom;
        (near_left || near_right) && (near_top || near_bottom)
    }

    pub fn is_tripped(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Trip the guard. The first reason wins.
    pub fn trip(&self, reason: impl Into<String>) {
        let reason = reason.into();
        {
            let mut slot = self.reason.lock();
            if slot.is_none() {
                tracing::error!("Fail-safe tripped: {}", reason);
                *slot = Some(reason);
            }
        }
        self.token.cancel();
    }

    pub fn reason(&self) -> Option<String> {
        self.reason.lock().clone()
    }

    /// Refuse if already tripped, otherwise trip when the cursor is in a
    /// corner.
    ///
    /// An unreadable cursor position trips the guard too, unless
    /// `allow_unguarded` is set.
    pub async fn check(&self, driver: &dyn InputDriver) -> Result<(), ExecutionError> {
        self.ensure_armed()?;

        match driver.cursor_position().await {
            Ok(point) if self.in_corner(point) => {
                self.trip(format!("cursor in screen corner at {}", point));
                Err(ExecutionError::FailSafe(self.reason_or_default()))
            }
            Ok(_) => Ok(()),
            Err(e) if self.config.allow_unguarded => {
                tracing::warn!("Fail-safe could not read cursor position, continuing: {}", e);
                Ok(())
            }
            Err(e) => {
                self.trip(format!("cursor position unreadable: {}", e));
                Err(ExecutionError::FailSafe(self.reason_or_default()))
            }
        }
    }

    /// Refuse if already tripped.
    pub fn ensure_armed(&self) -> Result<(), ExecutionError> {
        if self.is_tripped() {
            return Err(ExecutionError::FailSafe(self.reason_or_default()));
        }
        Ok(())
    }

    fn reason_or_default(&self) -> String {
        self.reason()
            .unwrap_or_else(|| "fail-safe cancelled".to_string())
    }
}

impl Default for FailSafe {
    fn default() -> Self {
        Self::new(FailSafeConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_corners() {
        let guard = FailSafe::default();
        assert!(guard.in_corner(Point::new(0, 0)));
        assert!(guard.in_corner(Point::new(1919, 0)));
        assert!(guard.in_corner(Point::new(0, 1079)));
        assert!(guard.in_corner(Point::new(1917, 1077)));
        assert!(!guard.in_corner(Point::new(960, 0)));
        assert!(!guard.in_corner(Point::new(5, 5)));
        assert!(!guard.in_corner(Point::new(0, 540)));
    }

    #[test]
    fn test_zero_size_disables_corners() {
        let guard = FailSafe::new(FailSafeConfig {
            corner_size: 0,
            ..FailSafeConfig::default()
        });
        assert!(!guard.in_corner(Point::new(0, 0)));
    }

    #[test]
    fn test_trip_is_sticky_and_keeps_first_reason() {
        let token = CancellationToken::new();
        let guard = FailSafe::with_token(FailSafeConfig::default(), token.clone());

        guard.trip("operator abort");
        guard.trip("second");

        assert!(token.is_cancelled());
        assert_eq!(guard.reason().as_deref(), Some("operator abort"));
        assert_eq!(
            guard.ensure_armed(),
            Err(ExecutionError::FailSafe("operator abort".to_string()))
        );
    }
}
