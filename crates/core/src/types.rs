use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Button,
    Field,
    Link,
    Other,
}

impl ElementKind {
    /// Lenient mapping from detector labels. Anything unrecognized is `Other`.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "button" | "btn" => ElementKind::Button,
            "field" | "input" | "textbox" | "text_field" => ElementKind::Field,
            "link" | "anchor" => ElementKind::Link,
            _ => ElementKind::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl BoundingBox {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Centre point, clamped to the `i32` range for boxes at the edge of it.
    pub fn center(&self) -> Point {
        let mid = |origin: i32, extent: i32| {
            let value = i64::from(origin) + i64::from(extent) / 2;
            value.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
        };
        Point::new(mid(self.x, self.width), mid(self.y, self.height))
    }

    /// Whether the far edges fit in `i32`.
    pub fn in_range(&self) -> bool {
        self.x.checked_add(self.width).is_some() && self.y.checked_add(self.height).is_some()
    }

    /// Half-open containment: the right and bottom edges are outside.
    pub fn contains(&self, point: Point) -> bool {
        point.x >= self.x
            && point.y >= self.y
            && point.x < self.x.saturating_add(self.width)
            && point.y < self.y.saturating_add(self.height)
    }
}

/// A UI element found by the detector in one capture.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Element {
    pub id: String,
    pub kind: ElementKind,
    pub bbox: BoundingBox,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    pub confidence: f64,
}

impl Element {
    pub fn new(id: impl Into<String>, kind: ElementKind, bbox: BoundingBox) -> Self {
        Self {
            id: id.into(),
            kind,
            bbox,
            text: None,
            confidence: 1.0,
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = clamp_unit(confidence);
        self
    }
}

/// Handle to a captured screen image.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScreenImage {
    pub id: String,
    pub path: PathBuf,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub captured_at: DateTime<Utc>,
}

impl ScreenImage {
    pub fn new(id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
            width: None,
            height: None,
            captured_at: Utc::now(),
        }
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }
}

/// One capture plus everything the detector made of it.
///
/// Fields are read-only after construction; re-detection builds a new snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenSnapshot {
    image: ScreenImage,
    elements: Vec<Element>,
    text_map: HashMap<String, String>,
    captured_at: DateTime<Utc>,
    diagnostics: Vec<String>,
}

impl ScreenSnapshot {
    pub fn new(
        image: ScreenImage,
        elements: Vec<Element>,
        text_map: HashMap<String, String>,
        diagnostics: Vec<String>,
    ) -> Self {
        let captured_at = image.captured_at;
        Self {
            image,
            elements,
            text_map,
            captured_at,
            diagnostics,
        }
    }

    pub fn image(&self) -> &ScreenImage {
        &self.image
    }

    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    pub fn text_map(&self) -> &HashMap<String, String> {
        &self.text_map
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn diagnostics(&self) -> &[String] {
        &self.diagnostics
    }

    pub fn element(&self, id: &str) -> Option<&Element> {
        self.elements.iter().find(|e| e.id == id)
    }

    /// Text of an element, preferring the extracted text map over the label.
    pub fn text_of(&self, id: &str) -> Option<&str> {
        self.text_map
            .get(id)
            .map(String::as_str)
            .or_else(|| self.element(id).and_then(|e| e.text.as_deref()))
    }

    /// Case-insensitive lookup. Exact matches beat substring matches, then
    /// higher confidence wins, then detection order.
    pub fn find_by_text(&self, text: &str) -> Option<&Element> {
        let needle = text.trim().to_lowercase();
        if needle.is_empty() {
            return None;
        }

        let mut best: Option<(&Element, bool)> = None;
        for element in &self.elements {
            let Some(label) = self.text_of(&element.id) else {
                continue;
            };
            let label = label.trim().to_lowercase();
            let exact = label == needle;
            if !exact && !label.contains(&needle) {
                continue;
            }
            best = match best {
                None => Some((element, exact)),
                Some((current, current_exact)) => {
                    let better = (exact && !current_exact)
                        || (exact == current_exact && element.confidence > current.confidence);
                    if better {
                        Some((element, exact))
                    } else {
                        Some((current, current_exact))
                    }
                }
            };
        }
        best.map(|(element, _)| element)
    }

    /// Compact rendering used in planner prompts.
    pub fn summary(&self) -> String {
        if self.elements.is_empty() {
            return "No UI elements detected.".to_string();
        }
        let mut out = String::new();
        for element in &self.elements {
            let label = self.text_of(&element.id).unwrap_or("");
            let b = element.bbox;
            out.push_str(&format!(
                "- {} [{:?}] \"{}\" at ({}, {}, {}x{}) conf={:.2}\n",
                element.id, element.kind, label, b.x, b.y, b.width, b.height, element.confidence
            ));
        }
        out
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ActionName {
    Click,
    Type,
    Move,
    Read,
    Wait,
    NoOp,
}

impl ActionName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionName::Click => "click",
            ActionName::Type => "type",
            ActionName::Move => "move",
            ActionName::Read => "read",
            ActionName::Wait => "wait",
            ActionName::NoOp => "no_op",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "click" => Some(ActionName::Click),
            "type" => Some(ActionName::Type),
            "move" => Some(ActionName::Move),
            "read" => Some(ActionName::Read),
            "wait" => Some(ActionName::Wait),
            "no_op" | "noop" | "no-op" => Some(ActionName::NoOp),
            _ => None,
        }
    }

    /// Whether executing this action touches OS input state.
    pub fn touches_input(&self) -> bool {
        matches!(self, ActionName::Click | ActionName::Type | ActionName::Move)
    }
}

impl fmt::Display for ActionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single planned UI operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Action {
    pub name: ActionName,
    pub parameters: Map<String, Value>,
    #[serde(default)]
    pub preconditions: Vec<String>,
    #[serde(default)]
    pub postconditions: Vec<String>,
    pub confidence: f64,
}

impl Action {
    pub fn new(name: ActionName, parameters: Value) -> Self {
        let parameters = match parameters {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            name,
            parameters,
            preconditions: Vec::new(),
            postconditions: Vec::new(),
            confidence: 1.0,
        }
    }

    pub fn no_op() -> Self {
        Self::new(ActionName::NoOp, json!({}))
    }

    pub fn click(x: i32, y: i32) -> Self {
        Self::new(ActionName::Click, json!({ "x": x, "y": y }))
    }

    pub fn move_to(x: i32, y: i32) -> Self {
        Self::new(ActionName::Move, json!({ "x": x, "y": y }))
    }

    pub fn type_text(text: impl Into<String>) -> Self {
        Self::new(ActionName::Type, json!({ "text": text.into() }))
    }

    pub fn wait(duration: Duration) -> Self {
        Self::new(
            ActionName::Wait,
            json!({ "duration_ms": duration.as_millis() as u64 }),
        )
    }

    pub fn with_param(mut self, key: &str, value: Value) -> Self {
        self.parameters.insert(key.to_string(), value);
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = clamp_unit(confidence);
        self
    }

    pub fn with_precondition(mut self, condition: impl Into<String>) -> Self {
        self.preconditions.push(condition.into());
        self
    }

    pub fn with_postcondition(mut self, condition: impl Into<String>) -> Self {
        self.postconditions.push(condition.into());
        self
    }

    /// `{x, y}` as integer screen coordinates. Fractional values are rounded.
    pub fn point(&self) -> Option<Point> {
        let x = coordinate(self.parameters.get("x")?)?;
        let y = coordinate(self.parameters.get("y")?)?;
        Some(Point::new(x, y))
    }

    pub fn text(&self) -> Option<&str> {
        self.parameters.get("text").and_then(Value::as_str)
    }

    pub fn element_id(&self) -> Option<&str> {
        self.parameters.get("element_id").and_then(Value::as_str)
    }

    pub fn duration(&self) -> Option<Duration> {
        self.parameters
            .get("duration_ms")
            .and_then(Value::as_u64)
            .map(Duration::from_millis)
    }

    /// Checks the parameter contract of the action vocabulary.
    pub fn check_parameters(&self) -> Result<(), String> {
        match self.name {
            ActionName::Click | ActionName::Move => {
                if self.point().is_none() {
                    return Err(format!("{} requires integer 'x' and 'y'", self.name));
                }
            }
            ActionName::Type => match self.text() {
                Some(text) if !text.is_empty() => {}
                _ => return Err("type requires non-empty 'text'".to_string()),
            },
            ActionName::Wait => {
                if self.duration().is_none() {
                    return Err("wait requires a non-negative 'duration_ms'".to_string());
                }
            }
            ActionName::Read | ActionName::NoOp => {}
        }
        Ok(())
    }

    pub fn is_no_op(&self) -> bool {
        self.name == ActionName::NoOp
    }

    /// Short human-readable form, e.g. `click (120, 210)`.
    pub fn describe(&self) -> String {
        match self.name {
            ActionName::Click | ActionName::Move => match self.point() {
                Some(p) => format!("{} {}", self.name, p),
                None => format!("{} <no coordinates>", self.name),
            },
            ActionName::Type => format!("type {:?}", self.text().unwrap_or("")),
            ActionName::Wait => match self.duration() {
                Some(d) => format!("wait {}ms", d.as_millis()),
                None => "wait <no duration>".to_string(),
            },
            ActionName::Read => match self.element_id() {
                Some(id) => format!("read {}", id),
                None => "read".to_string(),
            },
            ActionName::NoOp => "no_op".to_string(),
        }
    }
}

fn coordinate(value: &Value) -> Option<i32> {
    if let Some(i) = value.as_i64() {
        return i32::try_from(i).ok();
    }
    let f = value.as_f64()?;
    if !f.is_finite() || f < i32::MIN as f64 || f > i32::MAX as f64 {
        return None;
    }
    Some(f.round() as i32)
}

pub(crate) fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Variables, constraints and safety-check ids in force for one iteration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionContext {
    #[serde(default)]
    pub variables: Map<String, Value>,
    #[serde(default)]
    pub constraints: Vec<String>,
    #[serde(default)]
    pub safety_checks: Vec<String>,
}

impl ExecutionContext {
    pub fn new(constraints: Vec<String>, safety_checks: Vec<String>) -> Self {
        Self {
            variables: Map::new(),
            constraints,
            safety_checks,
        }
    }

    pub fn with_variable(mut self, key: &str, value: Value) -> Self {
        self.variables.insert(key.to_string(), value);
        self
    }

    pub fn variable_i64(&self, key: &str) -> Option<i64> {
        self.variables.get(key).and_then(Value::as_i64)
    }
}

/// Outcome of running a validated plan.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub completed_steps: usize,
    pub outputs: Map<String, Value>,
    pub errors: Vec<String>,
    pub metrics: HashMap<String, f64>,
}

/// A planner-proposed call into the function registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

impl FunctionCall {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }
}
