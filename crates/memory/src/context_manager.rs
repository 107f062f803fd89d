use crate::compactor::{prune, rank};
use crate::types::*;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::VecDeque;

const DEFAULT_HISTORY_LIMIT: usize = 50;

struct MemoryState {
    short_term: Vec<MemoryEntry>,
    working: Map<String, Value>,
    history: VecDeque<HistoryEntry>,
    next_sequence: u64,
}

/// Session memory: working key/value state, bounded short-term memory and a
/// short conversation history.
///
/// All mutation goes through one mutex, so concurrent reporters never
/// interleave partial updates.
pub struct ContextManager {
    capacity: usize,
    history_limit: usize,
    state: Mutex<MemoryState>,
}

impl ContextManager {
    pub fn new(capacity: usize) -> Self {
        Self::with_history_limit(capacity, DEFAULT_HISTORY_LIMIT)
    }

    pub fn with_history_limit(capacity: usize, history_limit: usize) -> Self {
        Self {
            capacity,
            history_limit,
            state: Mutex::new(MemoryState {
                short_term: Vec::new(),
                working: Map::new(),
                history: VecDeque::new(),
                next_sequence: 0,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Merge `partial` into working memory; incoming keys overwrite.
    pub fn update_working_memory(&self, partial: Map<String, Value>) {
        let mut state = self.state.lock();
        for (key, value) in partial {
            state.working.insert(key, value);
        }
    }

    pub fn set_working_value(&self, key: impl Into<String>, value: Value) {
        self.state.lock().working.insert(key.into(), value);
    }

    pub fn working_memory(&self) -> Map<String, Value> {
        self.state.lock().working.clone()
    }

    pub fn working_value(&self, key: &str) -> Option<Value> {
        self.state.lock().working.get(key).cloned()
    }

    /// Store an observation and prune to capacity.
    ///
    /// Returns the stored entry; it may already have been evicted if it ranks
    /// below everything else in a full store.
    pub fn remember(
        &self,
        content: impl Into<String>,
        metadata: Option<Value>,
        importance: f64,
    ) -> MemoryEntry {
        let mut state = self.state.lock();
        let sequence = state.next_sequence;
        state.next_sequence += 1;

        let mut entry = MemoryEntry::new(content, importance, chrono::Utc::now(), sequence);
        if let Some(metadata) = metadata {
            entry = entry.with_metadata(metadata);
        }

        state.short_term.push(entry.clone());
        let entries = std::mem::take(&mut state.short_term);
        state.short_term = prune(entries, self.capacity);
        entry
    }

    /// [`remember`](Self::remember) with full importance and no metadata.
    pub fn note(&self, content: impl Into<String>) -> MemoryEntry {
        self.remember(content, None, 1.0)
    }

    /// Most important entries first, newest first among equals.
    ///
    /// `query` is not used for ranking yet; retrieval is importance-based.
    pub fn recall(&self, _query: &str, limit: usize) -> Vec<MemoryEntry> {
        let mut entries = self.state.lock().short_term.clone();
        entries.sort_by(rank);
        entries.truncate(limit);
        entries
    }

    /// Prune explicitly. Returns how many entries were evicted.
    pub fn prune(&self) -> usize {
        let mut state = self.state.lock();
        let before = state.short_term.len();
        let entries = std::mem::take(&mut state.short_term);
        state.short_term = prune(entries, self.capacity);
        before - state.short_term.len()
    }

    pub fn entries(&self) -> Vec<MemoryEntry> {
        self.state.lock().short_term.clone()
    }

    pub fn len(&self) -> usize {
        self.state.lock().short_term.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn record_message(&self, role: impl Into<String>, content: impl Into<String>) {
        let mut state = self.state.lock();
        state.history.push_back(HistoryEntry {
            timestamp: chrono::Utc::now().timestamp(),
            role: role.into(),
            content: content.into(),
        });
        while state.history.len() > self.history_limit {
            state.history.pop_front();
        }
    }

    /// The last `n` messages, oldest first.
    pub fn recent_history(&self, n: usize) -> Vec<HistoryEntry> {
        let state = self.state.lock();
        let skip = state.history.len().saturating_sub(n);
        state.history.iter().skip(skip).cloned().collect()
    }
}

impl Default for ContextManager {
    fn default() -> Self {
        Self::new(4096)
    }
}
