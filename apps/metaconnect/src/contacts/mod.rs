use std::collections::BTreeMap;

use parking_lot::RwLock;

/// A persisted connection as the external store keeps it, keyed by the
/// mapping's own key (the peer handle).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry {
    pub name: String,
    pub social_media: BTreeMap<String, String>,
}

/// Read side of the user's connection mapping. Persistence, merging and
/// deletion stay with the owner of the store; the exchange core only reads
/// and hands candidates back to the caller.
pub trait ContactStore: Send + Sync {
    fn count(&self) -> usize;
    fn lookup(&self, key: &str) -> Option<StoredEntry>;
}

/// Map-backed store for tests and the CLI loopback wiring.
#[derive(Debug, Default)]
pub struct InMemoryContacts {
    entries: RwLock<BTreeMap<String, StoredEntry>>,
}

impl InMemoryContacts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Key collisions overwrite, which is what keeps the list idempotent
    /// when the same peer is exchanged twice.
    pub fn insert(&self, key: impl Into<String>, entry: StoredEntry) {
        self.entries.write().insert(key.into(), entry);
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }
}

impl ContactStore for InMemoryContacts {
    fn count(&self) -> usize {
        self.entries.read().len()
    }

    fn lookup(&self, key: &str) -> Option<StoredEntry> {
        self.entries.read().get(key).cloned()
    }
}
