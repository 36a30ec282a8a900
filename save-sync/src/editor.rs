//! Editor collaborator seam.

use shared_types::{Document, EditorSnapshot};
use std::sync::{Arc, Mutex, PoisonError};

/// Source of the authoritative in-memory document state.
///
/// `snapshot` is called synchronously right before each write attempt, so it
/// must return the state as of the call, never a cached older copy.
pub trait SnapshotSource: Send + Sync {
    fn snapshot(&self) -> EditorSnapshot;
}

/// Shared, mutable editor buffer.
///
/// Clones share the same contents. Hosts that keep the graph elsewhere can
/// implement [`SnapshotSource`] directly instead.
#[derive(Debug, Clone)]
pub struct EditorBuffer {
    current: Arc<Mutex<EditorSnapshot>>,
}

impl EditorBuffer {
    pub fn new(initial: EditorSnapshot) -> Self {
        Self {
            current: Arc::new(Mutex::new(initial)),
        }
    }

    pub fn from_document(document: &Document) -> Self {
        Self::new(EditorSnapshot::from(document))
    }

    /// Replace the buffer contents
    pub fn set(&self, content: serde_json::Value) {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        current.content = content;
    }

    pub fn replace(&self, snapshot: EditorSnapshot) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = snapshot;
    }
}

impl SnapshotSource for EditorBuffer {
    fn snapshot(&self) -> EditorSnapshot {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_snapshot_reflects_latest_set() {
        let buffer = EditorBuffer::new(EditorSnapshot::new(json!({"nodes": []}), 3));
        let shared = buffer.clone();

        shared.set(json!({"nodes": [{"id": "a"}]}));

        let snapshot = buffer.snapshot();
        assert_eq!(snapshot.content, json!({"nodes": [{"id": "a"}]}));
        assert_eq!(snapshot.format_version, 3);
    }

    #[test]
    fn test_replace_swaps_format_version() {
        let buffer = EditorBuffer::new(EditorSnapshot::new(json!({"nodes": []}), 1));

        buffer.replace(EditorSnapshot::new(json!({"sheets": []}), 2));

        assert_eq!(buffer.snapshot(), EditorSnapshot::new(json!({"sheets": []}), 2));
    }
}
