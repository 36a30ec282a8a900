//! Persistence collaborator seam.
//!
//! A backend stores whole documents behind a conditional write: the write is
//! applied only when the stored revision still equals the caller's expected
//! revision, and a successful write always yields a fresh revision.

pub mod file;
pub mod http;
pub mod memory;

use async_trait::async_trait;
use shared_types::{
    CreateDocumentRequest, Document, DocumentId, EditorSnapshot, Revision, SaveDocumentRequest,
};

pub use file::FileBackend;
pub use http::HttpBackend;
pub use memory::InMemoryBackend;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("Document not found: {0}")]
    NotFound(DocumentId),

    #[error("Invalid document id: {0}")]
    InvalidId(String),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<std::io::Error> for BackendError {
    fn from(e: std::io::Error) -> Self {
        BackendError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(e: serde_json::Error) -> Self {
        BackendError::Serialization(e.to_string())
    }
}

/// One conditional write of a whole document
#[derive(Debug, Clone, PartialEq)]
pub struct PersistRequest {
    pub document_id: DocumentId,
    pub name: String,
    pub snapshot: EditorSnapshot,
    pub expected_revision: Revision,
    pub session_id: String,
}

impl PersistRequest {
    pub fn from_wire(document_id: DocumentId, request: SaveDocumentRequest) -> Self {
        Self {
            document_id,
            name: request.name,
            snapshot: EditorSnapshot::new(request.content, request.format_version),
            expected_revision: request.expected_revision,
            session_id: request.session_id,
        }
    }

    pub fn to_wire(&self) -> SaveDocumentRequest {
        SaveDocumentRequest {
            name: self.name.clone(),
            content: self.snapshot.content.clone(),
            format_version: self.snapshot.format_version,
            expected_revision: self.expected_revision.clone(),
            session_id: self.session_id.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PersistOutcome {
    /// Stored; `revision` is the new token
    Applied { revision: Revision },
    /// Not stored; the backend holds `current_revision`
    RevisionMismatch { current_revision: Revision },
    /// No definitive revision information
    Failure(BackendError),
}

impl PersistOutcome {
    pub fn kind(&self) -> &'static str {
        match self {
            PersistOutcome::Applied { .. } => "applied",
            PersistOutcome::RevisionMismatch { .. } => "revision_mismatch",
            PersistOutcome::Failure(_) => "failure",
        }
    }
}

#[async_trait]
pub trait PersistenceBackend: Send + Sync {
    /// Fetch the authoritative copy, including its current revision.
    async fn load(&self, id: &DocumentId) -> Result<Document, BackendError>;

    async fn create(&self, request: CreateDocumentRequest) -> Result<Document, BackendError>;

    /// Conditional write. Must answer `RevisionMismatch` whenever the stored
    /// revision differs from `request.expected_revision`.
    async fn persist(&self, request: PersistRequest) -> PersistOutcome;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_conversion_keeps_fields() {
        let request = PersistRequest {
            document_id: DocumentId::from("doc-1"),
            name: "Budget".to_string(),
            snapshot: EditorSnapshot::new(json!({"cells": 4}), 2),
            expected_revision: Revision::from("r7"),
            session_id: "session:a".to_string(),
        };

        let wire = request.to_wire();
        assert_eq!(wire.expected_revision, Revision::from("r7"));
        assert_eq!(wire.format_version, 2);

        let back = PersistRequest::from_wire(DocumentId::from("doc-1"), wire);
        assert_eq!(back, request);
    }
}
