//! Screenshot backend built on the compositor's capture tools.

use crate::traits::{CaptureError, ScreenCapture};
use async_trait::async_trait;
use parking_lot::Mutex;
use squid_core::ScreenImage;
use std::path::{Path, PathBuf};
use tokio::process::Command;

pub(crate) async fn command_exists(command: &str) -> bool {
    Command::new("which")
        .arg(command)
        .output()
        .await
        .map(|output| output.status.success())
        .unwrap_or(false)
}

/// Run a command and return stdout, or stderr as the error text.
pub(crate) async fn run_output(command: &str, args: &[&str]) -> Result<String, String> {
    let output = Command::new(command)
        .args(args)
        .output()
        .await
        .map_err(|e| format!("{}: {}", command, e))?;
    if output.status.success() {
        return Ok(String::from_utf8_lossy(&output.stdout).to_string());
    }
    Err(String::from_utf8_lossy(&output.stderr).trim().to_string())
}

/// Captures the full screen with `grim`, falling back to `hyprshot`.
///
/// Only the newest capture is kept on disk: taking a new one deletes the
/// previous file, and dropping the backend deletes the last.
pub struct GrimCapture {
    output_dir: PathBuf,
    latest: Mutex<Option<PathBuf>>,
}

impl GrimCapture {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            latest: Mutex::new(None),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Record `path` as the newest capture and delete the one it supersedes.
    async fn retire_previous(&self, path: PathBuf) {
        let previous = self.latest.lock().replace(path);
        if let Some(previous) = previous {
            remove_capture(&previous).await;
        }
    }
}

impl Default for GrimCapture {
    fn default() -> Self {
        Self::new(std::env::temp_dir())
    }
}

impl Drop for GrimCapture {
    fn drop(&mut self) {
        if let Some(path) = self.latest.get_mut().take() {
            if let Err(e) = std::fs::remove_file(&path) {
                tracing::debug!("Could not remove capture {}: {}", path.display(), e);
            }
        }
    }
}

#[async_trait]
impl ScreenCapture for GrimCapture {
    async fn capture(&self) -> Result<ScreenImage, CaptureError> {
        let id = uuid::Uuid::new_v4().to_string();
        let target = self.output_dir.join(format!("squid-shot-{}.png", id));
        let target_str = target.to_string_lossy().to_string();

        if command_exists("grim").await {
            run_output("grim", &[&target_str])
                .await
                .map_err(CaptureError::Failed)?;
        } else if command_exists("hyprshot").await {
            run_output("hyprshot", &["-m", "output", "-o", &target_str])
                .await
                .map_err(CaptureError::Failed)?;
        } else {
            return Err(CaptureError::BackendUnavailable(
                "install 'grim' or 'hyprshot'".to_string(),
            ));
        }

        let (width, height) = match image_size(&target).await {
            Ok(size) => size,
            Err(e) => {
                remove_capture(&target).await;
                return Err(e);
            }
        };
        self.retire_previous(target.clone()).await;
        tracing::debug!("Captured {}x{} screen to {}", width, height, target_str);
        Ok(ScreenImage::new(id, target).with_size(width, height))
    }
}

/// Pixel size of an image file, read from its header.
pub async fn image_size(path: &Path) -> Result<(u32, u32), CaptureError> {
    let path = path.to_path_buf();
    let size = tokio::task::spawn_blocking(move || image::image_dimensions(&path))
        .await
        .map_err(|e| CaptureError::Failed(format!("sizing task failed: {}", e)))??;
    Ok(size)
}

async fn remove_capture(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Could not remove capture {}: {}", path.display(), e),
    }
}
