//! Save Orchestrator - one conditional write per attempt.
//!
//! The orchestrator owns the collaborators of a document session: it takes
//! the editor snapshot, builds the conditional write, runs it off the
//! session's control thread and folds the outcome back into the SaveState
//! store. Mutual exclusion (`begin_save`) and retry scheduling stay with the
//! caller.

use shared_types::{Document, DocumentId, Revision};
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::backend::{BackendError, PersistOutcome, PersistRequest, PersistenceBackend};
use crate::editor::SnapshotSource;
use crate::save_state::SaveStateStore;

/// What the caller has to do once an outcome is recorded
#[derive(Debug, Clone, PartialEq)]
pub enum FollowUp {
    /// Write applied; re-arm the debounce when `still_dirty`
    Saved {
        revision: Revision,
        still_dirty: bool,
    },
    /// Conflict detected; hold the document until the user resolves it
    Hold { server_revision: Revision },
    /// Transient failure; schedule a retry
    Retry { error: BackendError },
}

pub struct SaveOrchestrator {
    document_id: DocumentId,
    name: String,
    session_id: String,
    editor: Arc<dyn SnapshotSource>,
    backend: Arc<dyn PersistenceBackend>,
}

impl SaveOrchestrator {
    pub fn new(
        document: &Document,
        session_id: impl Into<String>,
        editor: Arc<dyn SnapshotSource>,
        backend: Arc<dyn PersistenceBackend>,
    ) -> Self {
        Self {
            document_id: document.id.clone(),
            name: document.name.clone(),
            session_id: session_id.into(),
            editor,
            backend,
        }
    }

    pub fn document_id(&self) -> &DocumentId {
        &self.document_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Point the orchestrator at another (freshly loaded) document.
    pub fn retarget(&mut self, document: &Document) {
        self.document_id = document.id.clone();
        self.name = document.name.clone();
    }

    /// Build the write from a snapshot taken now.
    pub fn prepare(&self, expected_revision: Revision) -> PersistRequest {
        PersistRequest {
            document_id: self.document_id.clone(),
            name: self.name.clone(),
            snapshot: self.editor.snapshot(),
            expected_revision,
            session_id: self.session_id.clone(),
        }
    }

    /// Run the write on its own task and hand the outcome to `on_finish`.
    pub fn spawn_write<F>(&self, request: PersistRequest, on_finish: F) -> JoinHandle<()>
    where
        F: FnOnce(PersistOutcome) + Send + 'static,
    {
        let backend = Arc::clone(&self.backend);
        tokio::spawn(async move {
            let outcome = backend.persist(request).await;
            on_finish(outcome);
        })
    }

    /// Fetch the authoritative copy of the current document on its own task.
    pub fn spawn_load<F>(&self, on_finish: F) -> JoinHandle<()>
    where
        F: FnOnce(Result<Document, BackendError>) + Send + 'static,
    {
        let backend = Arc::clone(&self.backend);
        let document_id = self.document_id.clone();
        tokio::spawn(async move {
            let result = backend.load(&document_id).await;
            on_finish(result);
        })
    }

    /// Route an outcome into the SaveState store.
    pub fn record_outcome(store: &mut SaveStateStore, outcome: PersistOutcome) -> FollowUp {
        match outcome {
            PersistOutcome::Applied { revision } => {
                store.complete_save(revision.clone());
                FollowUp::Saved {
                    revision,
                    still_dirty: store.is_dirty(),
                }
            }
            PersistOutcome::RevisionMismatch { current_revision } => {
                store.detect_conflict(current_revision.clone());
                FollowUp::Hold {
                    server_revision: current_revision,
                }
            }
            PersistOutcome::Failure(error) => {
                store.fail_save(error.to_string());
                FollowUp::Retry { error }
            }
        }
    }
}
