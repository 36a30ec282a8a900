//! FileBackend integration tests
//!
//! Tests for:
//! - Revision monotonicity across writes
//! - Conditional write rejection
//! - Atomic persistence (no temp files left behind)
//! - Reopening the store from disk

use serde_json::json;
use shared_types::{CreateDocumentRequest, DocumentId, EditorSnapshot, Revision};

use save_sync::{BackendError, FileBackend, PersistOutcome, PersistRequest, PersistenceBackend};

fn create_request(name: &str) -> CreateDocumentRequest {
    CreateDocumentRequest {
        name: name.to_string(),
        content: json!({"nodes": []}),
        format_version: 2,
    }
}

fn write(id: &DocumentId, expected: &Revision, content: serde_json::Value) -> PersistRequest {
    PersistRequest {
        document_id: id.clone(),
        name: "Forecast".to_string(),
        snapshot: EditorSnapshot::new(content, 2),
        expected_revision: expected.clone(),
        session_id: "session:file-test".to_string(),
    }
}

#[tokio::test]
async fn test_create_and_load() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
    let store = FileBackend::new(temp_dir.path().join("documents"));

    let created = store.create(create_request("Forecast")).await.unwrap();
    assert_eq!(created.revision, Revision::from("1"));
    assert_eq!(created.format_version, 2);

    let loaded = store.load(&created.id).await.unwrap();
    assert_eq!(loaded, created);
    assert!(temp_dir
        .path()
        .join("documents")
        .join(format!("{}.json", created.id))
        .exists());
}

#[tokio::test]
async fn test_revisions_increase_and_stale_writes_are_rejected() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
    let store = FileBackend::new(temp_dir.path());
    let created = store.create(create_request("Forecast")).await.unwrap();

    let first = store
        .persist(write(&created.id, &created.revision, json!({"v": 1})))
        .await;
    assert_eq!(
        first,
        PersistOutcome::Applied {
            revision: Revision::from("2")
        }
    );

    let second = store
        .persist(write(&created.id, &Revision::from("2"), json!({"v": 2})))
        .await;
    assert_eq!(
        second,
        PersistOutcome::Applied {
            revision: Revision::from("3")
        }
    );

    let stale = store
        .persist(write(&created.id, &created.revision, json!({"v": "stale"})))
        .await;
    assert_eq!(
        stale,
        PersistOutcome::RevisionMismatch {
            current_revision: Revision::from("3")
        }
    );

    let loaded = store.load(&created.id).await.unwrap();
    assert_eq!(loaded.content, json!({"v": 2}));
    assert_eq!(loaded.revision, Revision::from("3"));
    assert_eq!(loaded.created_at, created.created_at);
    assert!(loaded.updated_at >= created.updated_at);
}

#[tokio::test]
async fn test_no_temp_files_left_behind() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
    let store = FileBackend::new(temp_dir.path());
    let created = store.create(create_request("Forecast")).await.unwrap();
    store
        .persist(write(&created.id, &created.revision, json!({"v": 1})))
        .await;

    assert_eq!(store.root(), temp_dir.path());
    let leftovers: Vec<_> = std::fs::read_dir(store.root())
        .unwrap()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty());
}

#[tokio::test]
async fn test_reopen_reads_persisted_state() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
    let id = {
        let store = FileBackend::new(temp_dir.path());
        let created = store.create(create_request("Forecast")).await.unwrap();
        store
            .persist(write(&created.id, &created.revision, json!({"kept": true})))
            .await;
        created.id
    };

    let reopened = FileBackend::new(temp_dir.path());
    let loaded = reopened.load(&id).await.unwrap();
    assert_eq!(loaded.content, json!({"kept": true}));
    assert_eq!(loaded.revision, Revision::from("2"));
}

#[tokio::test]
async fn test_missing_and_invalid_ids() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
    let store = FileBackend::new(temp_dir.path());

    let missing = DocumentId::from("does-not-exist");
    assert_eq!(
        store.load(&missing).await,
        Err(BackendError::NotFound(missing.clone()))
    );
    assert_eq!(
        store
            .persist(write(&missing, &Revision::from("1"), json!({})))
            .await,
        PersistOutcome::Failure(BackendError::NotFound(missing))
    );

    let traversal = DocumentId::from("../escape");
    assert!(matches!(
        store.load(&traversal).await,
        Err(BackendError::InvalidId(_))
    ));
}

#[tokio::test]
async fn test_concurrent_writers_one_wins() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
    let store = std::sync::Arc::new(FileBackend::new(temp_dir.path()));
    let created = store.create(create_request("Forecast")).await.unwrap();

    let writers: Vec<_> = (0..4)
        .map(|n| {
            let store = store.clone();
            let request = write(&created.id, &created.revision, json!({"writer": n}));
            tokio::spawn(async move { store.persist(request).await })
        })
        .collect();

    let mut applied = 0;
    let mut rejected = 0;
    for writer in writers {
        match writer.await.unwrap() {
            PersistOutcome::Applied { .. } => applied += 1,
            PersistOutcome::RevisionMismatch { current_revision } => {
                assert_eq!(current_revision, Revision::from("2"));
                rejected += 1;
            }
            PersistOutcome::Failure(e) => panic!("unexpected failure: {e}"),
        }
    }
    assert_eq!(applied, 1);
    assert_eq!(rejected, 3);
}
