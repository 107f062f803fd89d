use serde::{Deserialize, Serialize};
use squid_core::{ActionName, BoundingBox};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ConstraintError {
    #[error("Unknown constraint kind: {0}")]
    UnknownKind(String),
    #[error("Invalid value for {kind}: {value}")]
    InvalidValue { kind: String, value: String },
}

/// A declarative rule checked against every action.
///
/// Written as `kind:value`, e.g. `deny_action:type` or
/// `allow_region:0,0,1920,1080`.
#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    DenyAction(ActionName),
    DenyText(String),
    AllowRegion(BoundingBox),
    DenyRegion(BoundingBox),
    MinConfidence(f64),
    WarnConfidence(f64),
    MaxTextLen(usize),
    MaxWaitMs(u64),
    /// Downgrades blocking findings of the named rule to warnings.
    Waive(String),
}

impl Constraint {
    pub fn parse(raw: &str) -> Result<Self, ConstraintError> {
        let (kind, value) = raw
            .split_once(':')
            .ok_or_else(|| ConstraintError::UnknownKind(raw.to_string()))?;
        let kind = kind.trim().to_lowercase();
        let value = value.trim();

        let invalid = || ConstraintError::InvalidValue {
            kind: kind.clone(),
            value: value.to_string(),
        };

        match kind.as_str() {
            "deny_action" => ActionName::parse(value)
                .map(Constraint::DenyAction)
                .ok_or_else(invalid),
            "deny_text" => {
                if value.is_empty() {
                    return Err(invalid());
                }
                Ok(Constraint::DenyText(value.to_lowercase()))
            }
            "allow_region" => parse_region(value)
                .map(Constraint::AllowRegion)
                .ok_or_else(invalid),
            "deny_region" => parse_region(value)
                .map(Constraint::DenyRegion)
                .ok_or_else(invalid),
            "min_confidence" => parse_unit(value)
                .map(Constraint::MinConfidence)
                .ok_or_else(invalid),
            "warn_confidence" => parse_unit(value)
                .map(Constraint::WarnConfidence)
                .ok_or_else(invalid),
            "max_text_len" => value
                .parse()
                .map(Constraint::MaxTextLen)
                .map_err(|_| invalid()),
            "max_wait_ms" => value
                .parse()
                .map(Constraint::MaxWaitMs)
                .map_err(|_| invalid()),
            "waive" => {
                if value.is_empty() {
                    return Err(invalid());
                }
                Ok(Constraint::Waive(value.to_lowercase()))
            }
            _ => Err(ConstraintError::UnknownKind(kind)),
        }
    }

    /// Rule name used by `waive:`.
    pub fn kind(&self) -> &'static str {
        match self {
            Constraint::DenyAction(_) => "deny_action",
            Constraint::DenyText(_) => "deny_text",
            Constraint::AllowRegion(_) => "allow_region",
            Constraint::DenyRegion(_) => "deny_region",
            Constraint::MinConfidence(_) => "min_confidence",
            Constraint::WarnConfidence(_) => "warn_confidence",
            Constraint::MaxTextLen(_) => "max_text_len",
            Constraint::MaxWaitMs(_) => "max_wait_ms",
            Constraint::Waive(_) => "waive",
        }
    }
}

fn parse_region(value: &str) -> Option<BoundingBox> {
    let parts: Vec<i32> = value
        .split(',')
        .map(|p| p.trim().parse::<i32>())
        .collect::<Result<_, _>>()
        .ok()?;
    match parts.as_slice() {
        [x, y, w, h] if *w > 0 && *h > 0 => Some(BoundingBox::new(*x, *y, *w, *h)),
        _ => None,
    }
}

fn parse_unit(value: &str) -> Option<f64> {
    let v: f64 = value.parse().ok()?;
    (0.0..=1.0).contains(&v).then_some(v)
}

/// Built-in checks selectable through `ExecutionContext::safety_checks`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SafetyCheck {
    Parameters,
    Coordinates,
    Text,
    Confidence,
}

impl SafetyCheck {
    pub const ALL: [SafetyCheck; 4] = [
        SafetyCheck::Parameters,
        SafetyCheck::Coordinates,
        SafetyCheck::Text,
        SafetyCheck::Confidence,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            SafetyCheck::Parameters => "parameters",
            SafetyCheck::Coordinates => "coordinates",
            SafetyCheck::Text => "text",
            SafetyCheck::Confidence => "confidence",
        }
    }

    pub fn parse(id: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|check| check.id() == id.trim().to_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_constraints() {
        assert_eq!(
            Constraint::parse("deny_action:click").unwrap(),
            Constraint::DenyAction(ActionName::Click)
        );
        assert_eq!(
            Constraint::parse("allow_region:0, 0, 1920, 1080").unwrap(),
            Constraint::AllowRegion(BoundingBox::new(0, 0, 1920, 1080))
        );
        assert_eq!(
            Constraint::parse("deny_text:RM -RF").unwrap(),
            Constraint::DenyText("rm -rf".to_string())
        );
        assert_eq!(
            Constraint::parse("max_wait_ms:500").unwrap(),
            Constraint::MaxWaitMs(500)
        );
    }

    #[test]
    fn test_parse_rejects_bad_values() {
        assert!(matches!(
            Constraint::parse("deny_action:drag"),
            Err(ConstraintError::InvalidValue { .. })
        ));
        assert!(matches!(
            Constraint::parse("min_confidence:1.5"),
            Err(ConstraintError::InvalidValue { .. })
        ));
        assert!(matches!(
            Constraint::parse("allow_region:0,0,0,10"),
            Err(ConstraintError::InvalidValue { .. })
        ));
        assert!(matches!(
            Constraint::parse("nonsense"),
            Err(ConstraintError::UnknownKind(_))
        ));
        assert!(matches!(
            Constraint::parse("teleport:1"),
            Err(ConstraintError::UnknownKind(_))
        ));
    }

    #[test]
    fn test_safety_check_ids() {
        for check in SafetyCheck::ALL {
            assert_eq!(SafetyCheck::parse(check.id()), Some(check));
        }
        assert_eq!(SafetyCheck::parse("Coordinates"), Some(SafetyCheck::Coordinates));
        assert!(SafetyCheck::parse("telepathy").is_none());
    }
}
