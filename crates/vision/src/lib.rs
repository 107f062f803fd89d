pub mod capture;
pub mod detector;
pub mod ocr;
pub mod remote;
pub mod traits;

pub use capture::GrimCapture;
pub use detector::{DetectionReport, Detector};
pub use ocr::TesseractDetector;
pub use remote::RemoteVisionDetector;
pub use traits::{CaptureError, DetectionError, ElementDetector, ScreenCapture};
