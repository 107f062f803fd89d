//! Tesseract-backed detector: every recognized word becomes an element.

use crate::capture::{command_exists, run_output};
use crate::traits::{DetectionError, ElementDetector};
use async_trait::async_trait;
use parking_lot::Mutex;
use squid_core::{BoundingBox, Element, ElementKind, ScreenImage};
use std::collections::HashMap;

pub struct TesseractDetector {
    lang: Option<String>,
    /// Last (image id, elements) pair, so text extraction after detection on
    /// the same capture does not run OCR twice.
    last: Mutex<Option<(String, Vec<Element>)>>,
}

impl TesseractDetector {
    pub fn new() -> Self {
        Self {
            lang: None,
            last: Mutex::new(None),
        }
    }

    pub fn with_lang(mut self, lang: impl Into<String>) -> Self {
        self.lang = Some(lang.into());
        self
    }

    fn cached(&self, image_id: &str) -> Option<Vec<Element>> {
        let last = self.last.lock();
        match last.as_ref() {
            Some((id, elements)) if id == image_id => Some(elements.clone()),
            _ => None,
        }
    }

    async fn recognize(&self, image: &ScreenImage) -> Result<Vec<Element>, DetectionError> {
        if let Some(elements) = self.cached(&image.id) {
            return Ok(elements);
        }

        if !command_exists("tesseract").await {
            return Err(DetectionError::Unavailable(
                "tesseract not found (install 'tesseract' package)".to_string(),
            ));
        }

        let path = image.path.to_string_lossy().to_string();
        let mut args = vec![path.as_str(), "stdout", "tsv"];
        if let Some(lang) = &self.lang {
            args.push("-l");
            args.push(lang);
        }
        let tsv = run_output("tesseract", &args)
            .await
            .map_err(DetectionError::Failed)?;
        let elements = parse_tesseract_tsv(&tsv);

        tracing::debug!("OCR found {} words in {}", elements.len(), image.id);
        *self.last.lock() = Some((image.id.clone(), elements.clone()));
        Ok(elements)
    }
}

impl Default for TesseractDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ElementDetector for TesseractDetector {
    async fn detect_elements(&self, image: &ScreenImage) -> Result<Vec<Element>, DetectionError> {
        self.recognize(image).await
    }

    async fn extract_text(
        &self,
        image: &ScreenImage,
    ) -> Result<HashMap<String, String>, DetectionError> {
        let elements = self.recognize(image).await?;
        Ok(elements
            .into_iter()
            .filter_map(|e| e.text.map(|text| (e.id, text)))
            .collect())
    }

    fn name(&self) -> &str {
        "tesseract"
    }
}

/// Parse `tesseract ... tsv` output into word elements.
///
/// Rows without text, with negative confidence, or with an empty box are
/// skipped. Ids are `ocr-<n>` in reading order; confidence is scaled to 0-1.
pub fn parse_tesseract_tsv(tsv: &str) -> Vec<Element> {
    let mut elements = Vec::new();
    for line in tsv.lines().skip(1) {
        let cols: Vec<&str> = line.split('\t').collect();
        if cols.len() < 12 {
            continue;
        }
        let text = cols[11].trim();
        if text.is_empty() {
            continue;
        }
        let conf = cols[10].trim().parse::<f64>().unwrap_or(-1.0);
        if conf < 0.0 {
            continue;
        }
        let x = cols[6].parse::<i32>().unwrap_or(-1);
        let y = cols[7].parse::<i32>().unwrap_or(-1);
        let width = cols[8].parse::<i32>().unwrap_or(0);
        let height = cols[9].parse::<i32>().unwrap_or(0);
        let bbox = BoundingBox::new(x, y, width, height);
        if x < 0 || y < 0 || width <= 0 || height <= 0 || !bbox.in_range() {
            continue;
        }

        let id = format!("ocr-{}", elements.len());
        elements.push(
            Element::new(id, ElementKind::Other, bbox)
                .with_text(text)
                .with_confidence(conf / 100.0),
        );
    }
    elements
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext";

    #[test]
    fn test_parse_tesseract_tsv() {
        let tsv = format!(
            "{}\n\
             1\t1\t0\t0\t0\t0\t0\t0\t1920\t1080\t-1\t\n\
             5\t1\t1\t1\t1\t1\t100\t200\t40\t20\t96.5\tSave\n\
             5\t1\t1\t1\t1\t2\t150\t200\t60\t20\t88\tCancel\n\
             5\t1\t1\t1\t1\t3\t0\t0\t0\t0\t90\tghost\n\
             5\t1\t1\t1\t1\t4\t10\t10\t5\t5\t91\t   \n",
            HEADER
        );

        let elements = parse_tesseract_tsv(&tsv);

        assert_eq!(elements.len(), 2);
        assert_eq!(elements[0].id, "ocr-0");
        assert_eq!(elements[0].text.as_deref(), Some("Save"));
        assert_eq!(elements[0].bbox, BoundingBox::new(100, 200, 40, 20));
        assert!((elements[0].confidence - 0.965).abs() < 1e-9);
        assert_eq!(elements[1].id, "ocr-1");
        assert_eq!(elements[1].kind, ElementKind::Other);
    }

    #[test]
    fn test_parse_garbage_is_empty() {
        assert!(parse_tesseract_tsv("").is_empty());
        assert!(parse_tesseract_tsv("not\ttsv\nat all").is_empty());
    }
}
