use async_trait::async_trait;
use squid_core::{Element, ScreenImage};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("No capture backend available: {0}")]
    BackendUnavailable(String),
    #[error("Capture failed: {0}")]
    Failed(String),
    #[error("Capture timed out after {0}ms")]
    Timeout(u64),
    #[error("Unreadable capture: {0}")]
    Image(#[from] image::ImageError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("Detector unavailable: {0}")]
    Unavailable(String),
    #[error("Detection failed: {0}")]
    Failed(String),
    #[error("Malformed detector output: {0}")]
    Malformed(String),
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Produces a fresh screen image on every call.
#[async_trait]
pub trait ScreenCapture: Send + Sync {
    async fn capture(&self) -> Result<ScreenImage, CaptureError>;
}

/// Vision capability: turns a screen image into UI elements and text.
#[async_trait]
pub trait ElementDetector: Send + Sync {
    async fn detect_elements(&self, image: &ScreenImage) -> Result<Vec<Element>, DetectionError>;

    /// Element id to recognized text.
    async fn extract_text(
        &self,
        image: &ScreenImage,
    ) -> Result<HashMap<String, String>, DetectionError>;

    fn name(&self) -> &str;
}
