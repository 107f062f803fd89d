#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use async_trait::async_trait;
use squid_core::{BoundingBox, Element, ElementKind, ScreenImage};
use squid_vision::{CaptureError, DetectionError, Detector, ElementDetector, ScreenCapture};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const LIMIT: Duration = Duration::from_millis(200);

struct StaticCapture {
    calls: AtomicUsize,
}

impl StaticCapture {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl ScreenCapture for StaticCapture {
    async fn capture(&self) -> Result<ScreenImage, CaptureError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ScreenImage::new(format!("img-{}", n), "/tmp/fake.png").with_size(1920, 1080))
    }
}

struct BrokenCapture;

#[async_trait]
impl ScreenCapture for BrokenCapture {
    async fn capture(&self) -> Result<ScreenImage, CaptureError> {
        Err(CaptureError::BackendUnavailable("no display".to_string()))
    }
}

struct HangingCapture;

#[async_trait]
impl ScreenCapture for HangingCapture {
    async fn capture(&self) -> Result<ScreenImage, CaptureError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Err(CaptureError::Failed("unreachable".to_string()))
    }
}

enum Mode {
    Ok,
    Fail,
    Hang,
}

struct MockDetector {
    mode: Mode,
}

impl MockDetector {
    fn elements() -> Vec<Element> {
        vec![
            Element::new("e1", ElementKind::Button, BoundingBox::new(100, 200, 40, 20))
                .with_text("Save")
                .with_confidence(0.9),
            Element::new("e2", ElementKind::Button, BoundingBox::new(150, 200, 60, 20))
                .with_text("Save As")
                .with_confidence(0.95),
        ]
    }
}

#[async_trait]
impl ElementDetector for MockDetector {
    async fn detect_elements(&self, _image: &ScreenImage) -> Result<Vec<Element>, DetectionError> {
        match self.mode {
            Mode::Ok => Ok(Self::elements()),
            Mode::Fail => Err(DetectionError::Failed("model crashed".to_string())),
            Mode::Hang => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(Vec::new())
            }
        }
    }

    async fn extract_text(
        &self,
        _image: &ScreenImage,
    ) -> Result<HashMap<String, String>, DetectionError> {
        match self.mode {
            Mode::Ok => Ok(Self::elements()
                .into_iter()
                .filter_map(|e| e.text.map(|t| (e.id, t)))
                .collect()),
            Mode::Fail => Err(DetectionError::Failed("model crashed".to_string())),
            Mode::Hang => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(HashMap::new())
            }
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}

fn detector(capture: Arc<dyn ScreenCapture>, mode: Mode) -> Detector {
    Detector::new(capture, Arc::new(MockDetector { mode }))
}

#[tokio::test]
async fn test_capture_builds_snapshot() {
    let detector = detector(StaticCapture::new(), Mode::Ok);

    let snapshot = detector.capture(LIMIT).await.unwrap();

    assert_eq!(snapshot.elements().len(), 2);
    assert_eq!(snapshot.text_map().get("e1").map(String::as_str), Some("Save"));
    assert!(snapshot.diagnostics().is_empty());
    assert_eq!(snapshot.image().width, Some(1920));
}

#[tokio::test]
async fn test_detector_failure_degrades_to_empty() {
    let detector = detector(StaticCapture::new(), Mode::Fail);

    let snapshot = detector.capture(LIMIT).await.unwrap();

    assert!(snapshot.elements().is_empty());
    assert!(snapshot.text_map().is_empty());
    assert_eq!(snapshot.diagnostics().len(), 2);
    assert!(snapshot.diagnostics()[0].contains("model crashed"));
}

#[tokio::test]
async fn test_detection_timeout_yields_empty_report() {
    let detector = detector(StaticCapture::new(), Mode::Hang);
    let image = ScreenImage::new("img", "/tmp/fake.png");

    let report = detector
        .detect_elements(&image, Duration::from_millis(20))
        .await;

    assert!(report.elements.is_empty());
    assert!(report.diagnostic.unwrap().contains("timed out"));
    assert!(detector
        .extract_text(&image, Duration::from_millis(20))
        .await
        .is_empty());
}

#[tokio::test]
async fn test_capture_failure_is_an_error() {
    let detector = detector(Arc::new(BrokenCapture), Mode::Ok);
    let err = detector.capture(LIMIT).await.unwrap_err();
    assert!(matches!(err, CaptureError::BackendUnavailable(_)));
}

#[tokio::test]
async fn test_capture_timeout() {
    let detector = detector(Arc::new(HangingCapture), Mode::Ok);
    let err = detector
        .capture(Duration::from_millis(20))
        .await
        .unwrap_err();
    assert!(matches!(err, CaptureError::Timeout(20)));
}

#[tokio::test]
async fn test_detection_is_deterministic_per_image() {
    let detector = detector(StaticCapture::new(), Mode::Ok);
    let image = ScreenImage::new("img", "/tmp/fake.png");

    let first = detector.detect_elements(&image, LIMIT).await;
    let second = detector.detect_elements(&image, LIMIT).await;

    assert_eq!(first.elements, second.elements);
}

#[tokio::test]
async fn test_locate_by_text_prefers_exact_match() {
    let capture = StaticCapture::new();
    let detector = detector(capture.clone(), Mode::Ok);

    let found = detector.locate_by_text("save", LIMIT).await.unwrap();
    assert_eq!(found.id, "e1");
    assert!(detector.locate_by_text("Quit", LIMIT).await.is_none());

    // Each lookup captures fresh.
    assert_eq!(capture.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_locate_by_text_survives_capture_failure() {
    let detector = detector(Arc::new(BrokenCapture), Mode::Ok);
    assert!(detector.locate_by_text("Save", LIMIT).await.is_none());
}
