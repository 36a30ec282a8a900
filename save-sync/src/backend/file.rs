//! File-backed document store.
//!
//! One JSON file per document under the store root, holding the document
//! together with a monotonic revision counter. Writes are serialized by a
//! store-wide lock and land atomically (temp + rename).

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use shared_types::{CreateDocumentRequest, Document, DocumentId, Revision};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;

use super::{BackendError, PersistOutcome, PersistRequest, PersistenceBackend};

const MAX_ID_LEN: usize = 128;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedDocument {
    revision: u64,
    document: Document,
}

impl PersistedDocument {
    fn into_document(self) -> Document {
        let mut document = self.document;
        document.revision = Revision::new(self.revision.to_string());
        document
    }
}

#[derive(Debug)]
pub struct FileBackend {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl FileBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn document_path(&self, id: &DocumentId) -> Result<PathBuf, BackendError> {
        validate_id(id.as_str())?;
        Ok(self.root.join(format!("{}.json", id.as_str())))
    }

    async fn read(&self, id: &DocumentId) -> Result<PersistedDocument, BackendError> {
        let path = self.document_path(id)?;
        let raw = match fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BackendError::NotFound(id.clone()));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_str(&raw)?)
    }

    async fn write(&self, persisted: &PersistedDocument) -> Result<(), BackendError> {
        let path = self.document_path(&persisted.document.id)?;
        fs::create_dir_all(&self.root).await?;

        let raw = serde_json::to_string_pretty(persisted)?;
        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, raw)
            .await
            .map_err(|e| BackendError::Io(format!("Failed to write temp file: {e}")))?;
        fs::rename(&temp_path, &path)
            .await
            .map_err(|e| BackendError::Io(format!("Failed to rename temp file: {e}")))?;
        Ok(())
    }

    async fn apply(&self, request: PersistRequest) -> Result<PersistOutcome, BackendError> {
        let _guard = self.write_lock.lock().await;

        let mut persisted = self.read(&request.document_id).await?;
        let current = Revision::new(persisted.revision.to_string());
        if current != request.expected_revision {
            return Ok(PersistOutcome::RevisionMismatch {
                current_revision: current,
            });
        }

        persisted.revision += 1;
        persisted.document.name = request.name;
        persisted.document.content = request.snapshot.content;
        persisted.document.format_version = request.snapshot.format_version;
        persisted.document.updated_at = Utc::now();
        persisted.document.revision = Revision::new(persisted.revision.to_string());
        self.write(&persisted).await?;

        tracing::debug!(
            document_id = %request.document_id,
            revision = persisted.revision,
            session_id = %request.session_id,
            "Document persisted"
        );
        Ok(PersistOutcome::Applied {
            revision: persisted.document.revision,
        })
    }
}

/// Ids become file names, so only `[A-Za-z0-9_-]` is accepted.
fn validate_id(id: &str) -> Result<(), BackendError> {
    if id.is_empty() || id.len() > MAX_ID_LEN {
        return Err(BackendError::InvalidId(id.to_string()));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(BackendError::InvalidId(id.to_string()));
    }
    Ok(())
}

#[async_trait]
impl PersistenceBackend for FileBackend {
    async fn load(&self, id: &DocumentId) -> Result<Document, BackendError> {
        Ok(self.read(id).await?.into_document())
    }

    async fn create(&self, request: CreateDocumentRequest) -> Result<Document, BackendError> {
        let _guard = self.write_lock.lock().await;

        let now = Utc::now();
        let persisted = PersistedDocument {
            revision: 1,
            document: Document {
                id: DocumentId::new(),
                name: request.name,
                content: request.content,
                format_version: request.format_version,
                created_at: now,
                updated_at: now,
                revision: Revision::new("1"),
            },
        };
        self.write(&persisted).await?;

        tracing::info!(document_id = %persisted.document.id, "Document created");
        Ok(persisted.into_document())
    }

    async fn persist(&self, request: PersistRequest) -> PersistOutcome {
        self.apply(request)
            .await
            .unwrap_or_else(PersistOutcome::Failure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_id() {
        assert!(validate_id("0b8f6a2e-doc_1").is_ok());
        assert!(validate_id("").is_err());
        assert!(validate_id("../etc/passwd").is_err());
        assert!(validate_id("a/b").is_err());
        assert!(validate_id("name.json").is_err());
        assert!(validate_id(&"x".repeat(MAX_ID_LEN + 1)).is_err());
    }
}
