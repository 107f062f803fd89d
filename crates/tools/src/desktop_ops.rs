//! The five operations the planner can call.

use crate::traits::{Operation, Resolution, ResolveContext, ToolError};
use serde_json::{json, Value};
use squid_core::{Action, ActionName, Element};
use std::time::Duration;

/// Working-memory key written by `find_element`.
pub const LAST_FOUND_ELEMENT: &str = "last_found_element";

const MAX_WAIT_MS: u64 = 60_000;

fn str_arg<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn require_object(args: &Value) -> Result<(), ToolError> {
    if args.is_object() {
        Ok(())
    } else {
        Err(ToolError::InvalidArguments(format!(
            "expected a JSON object, got {}",
            args
        )))
    }
}

/// Element named by `element_id`, or by `text`, or else the element stored by
/// the last `find_element`.
fn target_element<'a>(args: &Value, ctx: &'a ResolveContext<'_>) -> Result<&'a Element, ToolError> {
    if let Some(id) = str_arg(args, "element_id") {
        return ctx
            .snapshot
            .element(id)
            .ok_or_else(|| ToolError::NotFound(format!("no element with id '{}'", id)));
    }
    if let Some(text) = str_arg(args, "text") {
        return ctx
            .snapshot
            .find_by_text(text)
            .ok_or_else(|| ToolError::NotFound(format!("no element matching '{}'", text)));
    }
    let remembered = ctx
        .working_memory
        .get(LAST_FOUND_ELEMENT)
        .and_then(|v| v.get("id"))
        .and_then(Value::as_str);
    match remembered {
        Some(id) => ctx.snapshot.element(id).ok_or_else(|| {
            ToolError::NotFound(format!("remembered element '{}' is no longer on screen", id))
        }),
        None => Err(ToolError::InvalidArguments(
            "expected 'element_id' or 'text'".to_string(),
        )),
    }
}

pub struct FindElement;

impl Operation for FindElement {
    fn name(&self) -> &str {
        "find_element"
    }

    fn description(&self) -> &str {
        "Locate a UI element by its visible text and remember it for later calls."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "text": { "type": "string", "description": "Visible text of the element" }
            },
            "required": ["text"]
        })
    }

    fn resolve(&self, args: &Value, ctx: &ResolveContext<'_>) -> Result<Resolution, ToolError> {
        require_object(args)?;
        let text = str_arg(args, "text")
            .ok_or_else(|| ToolError::InvalidArguments("'text' is required".to_string()))?;
        let element = ctx
            .snapshot
            .find_by_text(text)
            .ok_or_else(|| ToolError::NotFound(format!("no element matching '{}'", text)))?;
        let point = ctx.mapper.target(element);
        let label = ctx.snapshot.text_of(&element.id).unwrap_or(text);

        let action = Action::new(
            ActionName::Read,
            json!({ "element_id": element.id, "text": label }),
        )
        .with_confidence(element.confidence)
        .with_postcondition(format!("{} located", element.id));

        Ok(Resolution::action(action).remember(
            LAST_FOUND_ELEMENT,
            json!({
                "id": element.id,
                "text": label,
                "x": point.x,
                "y": point.y,
            }),
        ))
    }
}

pub struct ClickElement;

impl Operation for ClickElement {
    fn name(&self) -> &str {
        "click_element"
    }

    fn description(&self) -> &str {
        "Click an element by id or text. Without either, clicks the last found element."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "element_id": { "type": "string" },
                "text": { "type": "string" }
            }
        })
    }

    fn resolve(&self, args: &Value, ctx: &ResolveContext<'_>) -> Result<Resolution, ToolError> {
        require_object(args)?;
        let element = target_element(args, ctx)?;
        let point = ctx.mapper.target(element);
        let action = Action::click(point.x, point.y)
            .with_param("element_id", json!(element.id))
            .with_confidence(element.confidence)
            .with_precondition(format!("{} visible", element.id));
        Ok(Resolution::action(action))
    }
}

pub struct TypeText;

impl Operation for TypeText {
    fn name(&self) -> &str {
        "type_text"
    }

    fn description(&self) -> &str {
        "Type text into the focused element."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "text": { "type": "string" }
            },
            "required": ["text"]
        })
    }

    fn resolve(&self, args: &Value, _ctx: &ResolveContext<'_>) -> Result<Resolution, ToolError> {
        require_object(args)?;
        // Not trimmed: whitespace is part of what gets typed.
        let text = args
            .get("text")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ToolError::InvalidArguments("'text' must be a non-empty string".to_string()))?;
        Ok(Resolution::action(Action::type_text(text)))
    }
}

pub struct ReadText;

impl Operation for ReadText {
    fn name(&self) -> &str {
        "read_text"
    }

    fn description(&self) -> &str {
        "Read the recognized text of an element."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "element_id": { "type": "string" }
            },
            "required": ["element_id"]
        })
    }

    fn resolve(&self, args: &Value, ctx: &ResolveContext<'_>) -> Result<Resolution, ToolError> {
        require_object(args)?;
        let element = target_element(args, ctx)?;
        let text = ctx.snapshot.text_of(&element.id).unwrap_or("");
        let action = Action::new(
            ActionName::Read,
            json!({ "element_id": element.id, "text": text }),
        )
        .with_confidence(element.confidence);
        Ok(Resolution::action(action))
    }
}

pub struct Wait;

impl Operation for Wait {
    fn name(&self) -> &str {
        "wait"
    }

    fn description(&self) -> &str {
        "Pause before the next step."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "duration_ms": { "type": "integer", "minimum": 0, "maximum": MAX_WAIT_MS }
            },
            "required": ["duration_ms"]
        })
    }

    fn resolve(&self, args: &Value, _ctx: &ResolveContext<'_>) -> Result<Resolution, ToolError> {
        require_object(args)?;
        let ms = args
            .get("duration_ms")
            .and_then(Value::as_u64)
            .or_else(|| {
                args.get("seconds")
                    .and_then(Value::as_f64)
                    .filter(|s| s.is_finite() && *s >= 0.0)
                    .map(|s| (s * 1000.0).round() as u64)
            })
            .ok_or_else(|| {
                ToolError::InvalidArguments("'duration_ms' must be a non-negative integer".to_string())
            })?;
        if ms > MAX_WAIT_MS {
            return Err(ToolError::InvalidArguments(format!(
                "wait of {}ms exceeds {}ms",
                ms, MAX_WAIT_MS
            )));
        }
        Ok(Resolution::action(Action::wait(Duration::from_millis(ms))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinates::CenterPoint;
    use serde_json::Map;
    use squid_core::{BoundingBox, ElementKind, ScreenImage, ScreenSnapshot};
    use std::collections::HashMap;

    fn snapshot() -> ScreenSnapshot {
        let elements = vec![
            Element::new("e1", ElementKind::Button, BoundingBox::new(100, 200, 40, 20))
                .with_text("Save")
                .with_confidence(0.9),
            Element::new("e2", ElementKind::Field, BoundingBox::new(0, 0, 300, 30)),
        ];
        let mut text_map = HashMap::new();
        text_map.insert("e2".to_string(), "search here".to_string());
        ScreenSnapshot::new(ScreenImage::new("img", "/tmp/x.png"), elements, text_map, Vec::new())
    }

    fn resolve(op: &dyn Operation, args: Value, working: &Map<String, Value>) -> Result<Resolution, ToolError> {
        let snapshot = snapshot();
        let ctx = ResolveContext {
            snapshot: &snapshot,
            working_memory: working,
            mapper: &CenterPoint,
        };
        op.resolve(&args, &ctx)
    }

    #[test]
    fn test_find_element_remembers_location() {
        let resolution = resolve(&FindElement, json!({ "text": "save" }), &Map::new()).unwrap();

        assert_eq!(resolution.action.name, ActionName::Read);
        assert_eq!(resolution.action.element_id(), Some("e1"));
        assert_eq!(
            resolution.memory[LAST_FOUND_ELEMENT],
            json!({ "id": "e1", "text": "Save", "x": 120, "y": 210 })
        );
    }

    #[test]
    fn test_find_element_missing() {
        let err = resolve(&FindElement, json!({ "text": "Quit" }), &Map::new()).unwrap_err();
        assert!(matches!(err, ToolError::NotFound(_)));
    }

    #[test]
    fn test_click_element_by_id_uses_center() {
        let resolution = resolve(&ClickElement, json!({ "element_id": "e1" }), &Map::new()).unwrap();
        let action = resolution.action;
        assert_eq!(action.name, ActionName::Click);
        assert_eq!(action.parameters["x"], json!(120));
        assert_eq!(action.parameters["y"], json!(210));
        assert_eq!(action.confidence, 0.9);
    }

    #[test]
    fn test_click_element_on_box_at_i32_edge_clamps() {
        let edge = ScreenSnapshot::new(
            ScreenImage::new("img", "/tmp/x.png"),
            vec![Element::new(
                "e1",
                ElementKind::Button,
                BoundingBox::new(2_147_483_000, 10, 2_000, 20),
            )],
            HashMap::new(),
            Vec::new(),
        );
        let ctx = ResolveContext {
            snapshot: &edge,
            working_memory: &Map::new(),
            mapper: &CenterPoint,
        };

        let resolution = ClickElement
            .resolve(&json!({ "element_id": "e1" }), &ctx)
            .unwrap();
        assert_eq!(resolution.action.parameters["x"], json!(i32::MAX));
        assert_eq!(resolution.action.parameters["y"], json!(20));
    }

    #[test]
    fn test_click_element_falls_back_to_last_found() {
        let mut working = Map::new();
        working.insert(LAST_FOUND_ELEMENT.to_string(), json!({ "id": "e2" }));
        let resolution = resolve(&ClickElement, json!({}), &working).unwrap();
        assert_eq!(resolution.action.parameters["x"], json!(150));

        let err = resolve(&ClickElement, json!({}), &Map::new()).unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[test]
    fn test_type_text_requires_text() {
        assert!(resolve(&TypeText, json!({ "text": "" }), &Map::new()).is_err());
        assert!(resolve(&TypeText, json!("hello"), &Map::new()).is_err());
        let ok = resolve(&TypeText, json!({ "text": " hi " }), &Map::new()).unwrap();
        assert_eq!(ok.action.text(), Some(" hi "));
    }

    #[test]
    fn test_read_text_uses_text_map() {
        let resolution = resolve(&ReadText, json!({ "element_id": "e2" }), &Map::new()).unwrap();
        assert_eq!(resolution.action.text(), Some("search here"));
    }

    #[test]
    fn test_wait_bounds() {
        let ok = resolve(&Wait, json!({ "duration_ms": 250 }), &Map::new()).unwrap();
        assert_eq!(ok.action.duration(), Some(Duration::from_millis(250)));
        let secs = resolve(&Wait, json!({ "seconds": 1.5 }), &Map::new()).unwrap();
        assert_eq!(secs.action.duration(), Some(Duration::from_millis(1500)));
        assert!(resolve(&Wait, json!({ "duration_ms": -1 }), &Map::new()).is_err());
        assert!(resolve(&Wait, json!({ "duration_ms": 600_000 }), &Map::new()).is_err());
    }
}
