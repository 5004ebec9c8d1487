use crate::error::{MonitorError, MonitorResult};
use crate::matcher;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
    Unknown,
}

impl EntryKind {
    /// Classify a path on disk. Only used on the management path.
    pub fn probe(path: &Path) -> Self {
        match std::fs::metadata(path) {
            Ok(meta) if meta.is_dir() => EntryKind::Directory,
            Ok(_) => EntryKind::File,
            Err(_) => EntryKind::Unknown,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlacklistEntry {
    pub path: String,
    pub kind: EntryKind,
}

impl BlacklistEntry {
    pub fn new(path: impl Into<String>, kind: EntryKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }
}

/// Ordered set of protected path prefixes.
///
/// Insertion order is preserved and is the order in which lookups try
/// entries. The entry count is the length of the backing vector, so the
/// size and the sequence cannot disagree.
#[derive(Debug, Clone, Default)]
pub struct Blacklist {
    entries: Vec<BlacklistEntry>,
}

impl Blacklist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.position(path).is_some()
    }

    fn position(&self, path: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.path == path)
    }

    /// Append `entry` to the tail. Byte-identical duplicates are rejected.
    pub fn insert(&mut self, entry: BlacklistEntry) -> MonitorResult<()> {
        if self.contains(&entry.path) {
            return Err(MonitorError::AlreadyExists(entry.path));
        }
        self.entries
            .try_reserve(1)
            .map_err(|e| MonitorError::ResourceExhausted(e.to_string()))?;
        self.entries.push(entry);
        Ok(())
    }

    /// Unlink the entry equal to `path`, keeping the others in order.
    pub fn remove(&mut self, path: &str) -> MonitorResult<BlacklistEntry> {
        match self.position(path) {
            Some(idx) => Ok(self.entries.remove(idx)),
            None => Err(MonitorError::NotFound(path.to_string())),
        }
    }

    /// First entry (in insertion order) protecting `candidate`.
    pub fn find_protecting(&self, candidate: &str) -> Option<&BlacklistEntry> {
        self.entries
            .iter()
            .find(|e| matcher::matches(&e.path, candidate))
    }

    pub fn iter(&self) -> impl Iterator<Item = &BlacklistEntry> {
        self.entries.iter()
    }

    pub fn paths(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.path.clone()).collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
