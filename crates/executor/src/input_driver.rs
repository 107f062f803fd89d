//! OS input primitives.

use async_trait::async_trait;
use squid_core::Point;
use thiserror::Error;
use tokio::process::Command;
use tokio::time::{sleep, Duration};

#[derive(Debug, Error)]
pub enum InputError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("No input backend: {0}")]
    Unavailable(String),
    #[error("Input command failed: {0}")]
    Failed(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait InputDriver: Send + Sync {
    async fn cursor_position(&self) -> Result<Point, InputError>;
    async fn move_to(&self, point: Point) -> Result<(), InputError>;
    /// Left click at `point`.
    async fn click(&self, point: Point) -> Result<(), InputError>;
    async fn type_text(&self, text: &str) -> Result<(), InputError>;
}

/// Drives a Wayland session through `hyprctl`, `wlrctl`, `ydotool` and
/// `wtype`, whichever are installed.
pub struct CommandInputDriver {
    click_settle: Duration,
}

impl CommandInputDriver {
    pub fn new() -> Self {
        Self {
            click_settle: Duration::from_millis(30),
        }
    }
}

impl Default for CommandInputDriver {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_point(point: Point) -> Result<(), InputError> {
    if point.x < 0 || point.y < 0 {
        return Err(InputError::InvalidArgument(format!(
            "coordinates must be >= 0, got {}",
            point
        )));
    }
    Ok(())
}

fn validate_text(text: &str) -> Result<(), InputError> {
    if text.is_empty() {
        return Err(InputError::InvalidArgument("text cannot be empty".to_string()));
    }
    if text.contains('\0') {
        return Err(InputError::InvalidArgument(
            "text contains null byte".to_string(),
        ));
    }
    Ok(())
}

async fn command_exists(command: &str) -> bool {
    Command::new("which")
        .arg(command)
        .output()
        .await
        .map(|output| output.status.success())
        .unwrap_or(false)
}

async fn run_output(command: &str, args: &[&str]) -> Result<String, InputError> {
    let output = Command::new(command).args(args).output().await?;
    if output.status.success() {
        return Ok(String::from_utf8_lossy(&output.stdout).to_string());
    }
    Err(InputError::Failed(
        String::from_utf8_lossy(&output.stderr).trim().to_string(),
    ))
}

/// Parse `hyprctl cursorpos` output, e.g. `"960, 540"`.
pub fn parse_cursorpos(output: &str) -> Option<Point> {
    let (x, y) = output.trim().split_once(',')?;
    let x = x.trim().parse::<f64>().ok()?;
    let y = y.trim().parse::<f64>().ok()?;
    Some(Point::new(x.round() as i32, y.round() as i32))
}

#[async_trait]
impl InputDriver for CommandInputDriver {
    async fn cursor_position(&self) -> Result<Point, InputError> {
        if !command_exists("hyprctl").await {
            return Err(InputError::Unavailable(
                "hyprctl not found for cursor position".to_string(),
            ));
        }
        let output = run_output("hyprctl", &["cursorpos"]).await?;
        parse_cursorpos(&output).ok_or_else(|| {
            InputError::Failed(format!("unexpected cursorpos output: {}", output.trim()))
        })
    }

    async fn move_to(&self, point: Point) -> Result<(), InputError> {
        validate_point(point)?;
        let xs = point.x.to_string();
        let ys = point.y.to_string();

        if command_exists("wlrctl").await {
            run_output("wlrctl", &["pointer", "move", &xs, &ys]).await?;
            return Ok(());
        }
        if command_exists("ydotool").await {
            run_output("ydotool", &["mousemove", "--absolute", &xs, &ys]).await?;
            return Ok(());
        }
        Err(InputError::Unavailable(
            "install 'wlrctl' or 'ydotool' for pointer moves".to_string(),
        ))
    }

    async fn click(&self, point: Point) -> Result<(), InputError> {
        self.move_to(point).await?;
        // Let the compositor settle the cursor before the button press.
        sleep(self.click_settle).await;

        if command_exists("ydotool").await {
            run_output("ydotool", &["click", "1"]).await?;
            return Ok(());
        }
        if command_exists("wlrctl").await {
            run_output("wlrctl", &["pointer", "click", "left"]).await?;
            return Ok(());
        }
        Err(InputError::Unavailable(
            "install 'ydotool' or 'wlrctl' for clicks".to_string(),
        ))
    }

    async fn type_text(&self, text: &str) -> Result<(), InputError> {
        validate_text(text)?;
        if command_exists("wtype").await {
            run_output("wtype", &[text]).await?;
            return Ok(());
        }
        if command_exists("ydotool").await {
            run_output("ydotool", &["type", text]).await?;
            return Ok(());
        }
        Err(InputError::Unavailable(
            "install 'wtype' or 'ydotool' for text input".to_string(),
        ))
    }
}
