use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One remembered observation. Importance and timestamp never change after
/// creation; pruning only removes whole entries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemoryEntry {
    content: String,
    timestamp: DateTime<Utc>,
    sequence: u64,
    importance: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<serde_json::Value>,
}

impl MemoryEntry {
    pub fn new(
        content: impl Into<String>,
        importance: f64,
        timestamp: DateTime<Utc>,
        sequence: u64,
    ) -> Self {
        Self {
            content: content.into(),
            timestamp,
            sequence,
            importance: clamp_importance(importance),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Insertion order within one store; breaks ties between equal timestamps.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn importance(&self) -> f64 {
        self.importance
    }

    pub fn metadata(&self) -> Option<&serde_json::Value> {
        self.metadata.as_ref()
    }
}

fn clamp_importance(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryEntry {
    pub timestamp: i64,
    pub role: String,
    pub content: String,
}
