//! In-process backend with fault injection.
//!
//! Behaves like a real document store (conditional writes, fresh revision per
//! applied write) and lets tests simulate outages, held writes and writes
//! from a peer session.

use async_trait::async_trait;
use chrono::Utc;
use shared_types::{CreateDocumentRequest, Document, DocumentId, Revision};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;

use super::{BackendError, PersistOutcome, PersistRequest, PersistenceBackend};

#[derive(Debug, Default)]
struct MemoryInner {
    documents: HashMap<DocumentId, Document>,
    next_revision: u64,
    fail_next: u32,
    offline: bool,
    writes: Vec<PersistRequest>,
}

impl MemoryInner {
    fn fresh_revision(&mut self) -> Revision {
        self.next_revision += 1;
        Revision::new(format!("r{}", self.next_revision))
    }
}

#[derive(Debug, Clone)]
pub struct InMemoryBackend {
    inner: Arc<Mutex<MemoryInner>>,
    /// `false` while writes are held
    gate: Arc<watch::Sender<bool>>,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBackend {
    pub fn new() -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            inner: Arc::new(Mutex::new(MemoryInner::default())),
            gate: Arc::new(gate),
        }
    }

    /// Store a document as-is, keeping its revision.
    pub fn insert(&self, document: Document) {
        self.lock().documents.insert(document.id.clone(), document);
    }

    /// Store a new document with an explicit revision token.
    pub fn seed(
        &self,
        name: &str,
        content: serde_json::Value,
        revision: impl Into<String>,
    ) -> Document {
        let now = Utc::now();
        let document = Document {
            id: DocumentId::new(),
            name: name.to_string(),
            content,
            format_version: 1,
            created_at: now,
            updated_at: now,
            revision: Revision::new(revision),
        };
        self.insert(document.clone());
        document
    }

    pub fn get(&self, id: &DocumentId) -> Option<Document> {
        self.lock().documents.get(id).cloned()
    }

    /// Fail the next `count` writes with a transient error.
    pub fn fail_next(&self, count: u32) {
        self.lock().fail_next = count;
    }

    /// While offline every load and write fails with `Unavailable`.
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Park incoming writes until `release_writes`.
    pub fn hold_writes(&self) {
        self.gate.send_replace(false);
    }

    pub fn release_writes(&self) {
        self.gate.send_replace(true);
    }

    /// Apply a write from another session, bypassing the revision check.
    pub fn external_write(&self, id: &DocumentId, content: serde_json::Value) -> Option<Revision> {
        let mut inner = self.lock();
        let revision = inner.fresh_revision();
        let document = inner.documents.get_mut(id)?;
        document.content = content;
        document.updated_at = Utc::now();
        document.revision = revision.clone();
        Some(revision)
    }

    /// Every write attempt received, in arrival order
    pub fn writes(&self) -> Vec<PersistRequest> {
        self.lock().writes.clone()
    }

    pub fn write_count(&self) -> usize {
        self.lock().writes.len()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl PersistenceBackend for InMemoryBackend {
    async fn load(&self, id: &DocumentId) -> Result<Document, BackendError> {
        let inner = self.lock();
        if inner.offline {
            return Err(BackendError::Unavailable("backend offline".to_string()));
        }
        inner
            .documents
            .get(id)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(id.clone()))
    }

    async fn create(&self, request: CreateDocumentRequest) -> Result<Document, BackendError> {
        let mut inner = self.lock();
        if inner.offline {
            return Err(BackendError::Unavailable("backend offline".to_string()));
        }
        let now = Utc::now();
        let document = Document {
            id: DocumentId::new(),
            name: request.name,
            content: request.content,
            format_version: request.format_version,
            created_at: now,
            updated_at: now,
            revision: inner.fresh_revision(),
        };
        inner.documents.insert(document.id.clone(), document.clone());
        Ok(document)
    }

    async fn persist(&self, request: PersistRequest) -> PersistOutcome {
        let mut gate = self.gate.subscribe();
        if gate.wait_for(|open| *open).await.is_err() {
            return PersistOutcome::Failure(BackendError::Unavailable(
                "write gate closed".to_string(),
            ));
        }

        let mut inner = self.lock();
        inner.writes.push(request.clone());

        if inner.offline {
            return PersistOutcome::Failure(BackendError::Unavailable(
                "backend offline".to_string(),
            ));
        }
        if inner.fail_next > 0 {
            inner.fail_next -= 1;
            return PersistOutcome::Failure(BackendError::Unavailable(
                "injected failure".to_string(),
            ));
        }

        let current = match inner.documents.get(&request.document_id) {
            Some(document) => document.revision.clone(),
            None => return PersistOutcome::Failure(BackendError::NotFound(request.document_id)),
        };
        if current != request.expected_revision {
            return PersistOutcome::RevisionMismatch {
                current_revision: current,
            };
        }

        let revision = inner.fresh_revision();
        if let Some(document) = inner.documents.get_mut(&request.document_id) {
            document.name = request.name;
            document.content = request.snapshot.content;
            document.format_version = request.snapshot.format_version;
            document.updated_at = Utc::now();
            document.revision = revision.clone();
        }
        PersistOutcome::Applied { revision }
    }
}
