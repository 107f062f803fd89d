use crate::traits::{DetectionError, ElementDetector};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use parking_lot::Mutex;
use reqwest::Client;
use serde_json::{json, Value};
use squid_core::{BoundingBox, Element, ElementKind, ScreenImage};
use std::collections::HashMap;

/// Detector backed by a hosted vision model.
///
/// Posts `{ "image": <base64 png>, "mime_type": "image/png" }` to the endpoint
/// and expects `{ "elements": [...] }` back.
pub struct RemoteVisionDetector {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    /// Last (image id, elements) pair; text extraction reuses it instead of
    /// uploading the same capture again.
    last: Mutex<Option<(String, Vec<Element>)>>,
}

impl RemoteVisionDetector {
    pub fn new(endpoint: String, api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint,
            api_key,
            last: Mutex::new(None),
        }
    }

    fn cached(&self, image_id: &str) -> Option<Vec<Element>> {
        let last = self.last.lock();
        match last.as_ref() {
            Some((id, elements)) if id == image_id => Some(elements.clone()),
            _ => None,
        }
    }

    async fn detect(&self, image: &ScreenImage) -> Result<Vec<Element>, DetectionError> {
        if let Some(elements) = self.cached(&image.id) {
            return Ok(elements);
        }
        let elements = self.request(image).await?;
        *self.last.lock() = Some((image.id.clone(), elements.clone()));
        Ok(elements)
    }

    async fn request(&self, image: &ScreenImage) -> Result<Vec<Element>, DetectionError> {
        let bytes = tokio::fs::read(&image.path).await?;
        let body = json!({
            "image": STANDARD.encode(bytes),
            "mime_type": "image/png",
            "image_id": image.id,
        });

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| DetectionError::Http(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(DetectionError::Failed(format!("{}: {}", status, text)));
        }

        let json: Value = response
            .json()
            .await
            .map_err(|e| DetectionError::Malformed(e.to_string()))?;
        parse_elements_response(&json)
    }
}

#[async_trait]
impl ElementDetector for RemoteVisionDetector {
    async fn detect_elements(&self, image: &ScreenImage) -> Result<Vec<Element>, DetectionError> {
        self.detect(image).await
    }

    async fn extract_text(
        &self,
        image: &ScreenImage,
    ) -> Result<HashMap<String, String>, DetectionError> {
        let elements = self.detect(image).await?;
        Ok(elements
            .into_iter()
            .filter_map(|e| e.text.map(|text| (e.id, text)))
            .collect())
    }

    fn name(&self) -> &str {
        "remote-vision"
    }
}

/// Parse a `{ "elements": [...] }` payload.
///
/// Each element needs a bbox, either `{x, y, width, height}` or
/// `[x, y, width, height]`. `kind` (or `label`) is mapped leniently; missing
/// ids become `el-<n>`. Entries without a usable bbox are skipped.
pub fn parse_elements_response(json: &Value) -> Result<Vec<Element>, DetectionError> {
    let items = json["elements"]
        .as_array()
        .ok_or_else(|| DetectionError::Malformed("missing 'elements' array".to_string()))?;

    let mut elements = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        let Some(bbox) = parse_bbox(&item["bbox"]) else {
            tracing::debug!("Skipping element {} without a usable bbox", index);
            continue;
        };
        let id = item["id"]
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| format!("el-{}", index));
        let kind = item["kind"]
            .as_str()
            .or_else(|| item["label"].as_str())
            .map(ElementKind::from_label)
            .unwrap_or(ElementKind::Other);

        let mut element = Element::new(id, kind, bbox)
            .with_confidence(item["confidence"].as_f64().unwrap_or(1.0));
        if let Some(text) = item["text"].as_str().filter(|t| !t.is_empty()) {
            element = element.with_text(text);
        }
        elements.push(element);
    }
    Ok(elements)
}

fn parse_bbox(value: &Value) -> Option<BoundingBox> {
    let field = |v: &Value| v.as_i64().and_then(|n| i32::try_from(n).ok());
    let (x, y, w, h) = match value {
        Value::Array(parts) if parts.len() == 4 => (
            field(&parts[0])?,
            field(&parts[1])?,
            field(&parts[2])?,
            field(&parts[3])?,
        ),
        Value::Object(_) => (
            field(&value["x"])?,
            field(&value["y"])?,
            field(&value["width"])?,
            field(&value["height"])?,
        ),
        _ => return None,
    };
    let bbox = BoundingBox::new(x, y, w, h);
    (w > 0 && h > 0 && bbox.in_range()).then_some(bbox)
}
