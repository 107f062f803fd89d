use crate::traits::{CaptureError, ElementDetector, ScreenCapture};
use squid_core::{Element, ScreenImage, ScreenSnapshot};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

/// Elements found in one image, plus a note when detection degraded.
#[derive(Debug, Clone, Default)]
pub struct DetectionReport {
    pub elements: Vec<Element>,
    pub diagnostic: Option<String>,
}

/// Perception front end: one capture backend and one detector backend.
///
/// Detector failures never propagate; they degrade to empty results with a
/// diagnostic. Only capture failures are errors.
pub struct Detector {
    capture: Arc<dyn ScreenCapture>,
    detector: Arc<dyn ElementDetector>,
}

impl Detector {
    pub fn new(capture: Arc<dyn ScreenCapture>, detector: Arc<dyn ElementDetector>) -> Self {
        Self { capture, detector }
    }

    pub fn backend_name(&self) -> &str {
        self.detector.name()
    }

    /// Capture the screen and run detection and text extraction on it.
    ///
    /// `limit` bounds each phase separately.
    pub async fn capture(&self, limit: Duration) -> Result<ScreenSnapshot, CaptureError> {
        let image = self.capture_image(limit).await?;
        Ok(self.snapshot(image, limit).await)
    }

    /// Capture phase only.
    pub async fn capture_image(&self, limit: Duration) -> Result<ScreenImage, CaptureError> {
        match timeout(limit, self.capture.capture()).await {
            Ok(result) => result,
            Err(_) => Err(CaptureError::Timeout(limit.as_millis() as u64)),
        }
    }

    /// Detection phase only: elements and text for an already captured image.
    pub async fn snapshot(&self, image: ScreenImage, limit: Duration) -> ScreenSnapshot {
        let mut diagnostics = Vec::new();
        let report = self.detect_elements(&image, limit).await;
        diagnostics.extend(report.diagnostic);

        let (text_map, text_diagnostic) = self.text_map(&image, limit).await;
        diagnostics.extend(text_diagnostic);

        tracing::debug!(
            "Snapshot {}: {} elements, {} text entries",
            image.id,
            report.elements.len(),
            text_map.len()
        );
        ScreenSnapshot::new(image, report.elements, text_map, diagnostics)
    }

    pub async fn detect_elements(&self, image: &ScreenImage, limit: Duration) -> DetectionReport {
        match timeout(limit, self.detector.detect_elements(image)).await {
            Ok(Ok(elements)) => DetectionReport {
                elements,
                diagnostic: None,
            },
            Ok(Err(e)) => {
                let note = format!("{} detection failed: {}", self.detector.name(), e);
                tracing::warn!("{}", note);
                DetectionReport {
                    elements: Vec::new(),
                    diagnostic: Some(note),
                }
            }
            Err(_) => {
                let note = format!(
                    "{} detection timed out after {}ms",
                    self.detector.name(),
                    limit.as_millis()
                );
                tracing::warn!("{}", note);
                DetectionReport {
                    elements: Vec::new(),
                    diagnostic: Some(note),
                }
            }
        }
    }

    /// Element id to text. Empty on failure.
    pub async fn extract_text(&self, image: &ScreenImage, limit: Duration) -> HashMap<String, String> {
        self.text_map(image, limit).await.0
    }

    /// Fresh capture, then the best text match in it.
    pub async fn locate_by_text(&self, text: &str, limit: Duration) -> Option<Element> {
        match self.capture(limit).await {
            Ok(snapshot) => snapshot.find_by_text(text).cloned(),
            Err(e) => {
                tracing::warn!("Could not locate '{}': {}", text, e);
                None
            }
        }
    }

    async fn text_map(
        &self,
        image: &ScreenImage,
        limit: Duration,
    ) -> (HashMap<String, String>, Option<String>) {
        match timeout(limit, self.detector.extract_text(image)).await {
            Ok(Ok(map)) => (map, None),
            Ok(Err(e)) => {
                let note = format!("{} text extraction failed: {}", self.detector.name(), e);
                tracing::warn!("{}", note);
                (HashMap::new(), Some(note))
            }
            Err(_) => {
                let note = format!(
                    "{} text extraction timed out after {}ms",
                    self.detector.name(),
                    limit.as_millis()
                );
                tracing::warn!("{}", note);
                (HashMap::new(), Some(note))
            }
        }
    }
}
