use super::{Entry, Index};

use std::collections::HashMap;

/// A Raft-managed state machine. Committed log entries are applied in
/// strict index order, so the state is deterministic given a log prefix.
pub trait State {
    /// Returns the index of the last applied entry, or 0 if none.
    fn applied_index(&self) -> Index;

    /// Applies a committed entry. The index must follow the applied index;
    /// applies never skip or repeat.
    fn apply(&mut self, index: Index, entry: &Entry);

    /// Reads the value for a key, if present.
    fn read(&self, key: &str) -> Option<String>;
}

/// The key/value store: a map from string keys to string values, produced
/// by folding applied puts.
pub struct KvStore {
    applied_index: Index,
    data: HashMap<String, String>,
}

impl KvStore {
    pub fn new() -> Self {
        Self { applied_index: 0, data: HashMap::new() }
    }
}

impl Default for KvStore {
    fn default() -> Self {
        Self::new()
    }
}

impl State for KvStore {
    fn applied_index(&self) -> Index {
        self.applied_index
    }

    fn apply(&mut self, index: Index, entry: &Entry) {
        assert_eq!(index, self.applied_index + 1, "applies must be sequential");
        self.data.insert(entry.key.clone(), entry.value.clone());
        self.applied_index = index;
    }

    fn read(&self, key: &str) -> Option<String> {
        self.data.get(key).cloned()
    }
}
