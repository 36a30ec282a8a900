//! Typed handle over a running DocumentSessionActor.

use ractor::{Actor, ActorRef, RpcReplyPort};
use shared_types::{Document, DocumentId, QueueSnapshot, Revision, SaveStateSnapshot};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use super::messages::{GuardDecision, SaveError, SessionMsg};
use super::{DocumentSessionActor, DocumentSessionArguments};
use crate::backend::PersistenceBackend;
use crate::config::SyncConfig;
use crate::editor::SnapshotSource;

/// Cloneable handle; all clones drive the same session.
#[derive(Debug, Clone)]
pub struct DocumentSession {
    actor: ActorRef<SessionMsg>,
}

impl DocumentSession {
    /// Start a session for a document that was just loaded.
    pub async fn spawn(
        document: Document,
        editor: Arc<dyn SnapshotSource>,
        backend: Arc<dyn PersistenceBackend>,
        config: SyncConfig,
    ) -> Result<(Self, JoinHandle<()>), SaveError> {
        let args = DocumentSessionArguments {
            document,
            editor,
            backend,
            config,
            session_id: format!("session:{}", ulid::Ulid::new()),
        };
        let (actor, join) = Actor::spawn(None, DocumentSessionActor, args)
            .await
            .map_err(|e| SaveError::SessionUnavailable(e.to_string()))?;
        Ok((Self { actor }, join))
    }

    /// Load `id` from the backend and start a session for it.
    ///
    /// The returned document is what the editor should display; the known
    /// server revision comes from it and nothing else.
    pub async fn open(
        id: &DocumentId,
        editor: Arc<dyn SnapshotSource>,
        backend: Arc<dyn PersistenceBackend>,
        config: SyncConfig,
    ) -> Result<(Self, Document, JoinHandle<()>), SaveError> {
        let document = backend
            .load(id)
            .await
            .map_err(|e| SaveError::Transient(e.to_string()))?;
        let (session, join) = Self::spawn(document.clone(), editor, backend, config).await?;
        Ok((session, document, join))
    }

    /// Record an edit. Never fails; outcomes surface through the save state.
    pub fn mark_dirty(&self) {
        if let Err(e) = self.actor.cast(SessionMsg::MarkDirty) {
            tracing::warn!(error = %e, "Edit recorded after session stopped");
        }
    }

    pub async fn save_now(&self) -> Result<Revision, SaveError> {
        self.request(|reply| SessionMsg::SaveNow { reply }).await?
    }

    pub async fn keep_mine(&self) -> Result<Revision, SaveError> {
        self.request(|reply| SessionMsg::KeepMine { reply }).await?
    }

    pub async fn reload(&self) -> Result<Document, SaveError> {
        self.request(|reply| SessionMsg::Reload { reply }).await?
    }

    pub async fn swap(&self, document: Document) -> Result<(), SaveError> {
        self.request(|reply| SessionMsg::Swap { document, reply })
            .await
    }

    pub async fn navigate_away(&self) -> Result<GuardDecision, SaveError> {
        self.request(|reply| SessionMsg::NavigateAway { reply })
            .await
    }

    pub async fn save_state(&self) -> Result<SaveStateSnapshot, SaveError> {
        self.request(|reply| SessionMsg::GetSaveState { reply })
            .await
    }

    pub async fn queue_state(&self) -> Result<QueueSnapshot, SaveError> {
        self.request(|reply| SessionMsg::GetQueueState { reply })
            .await
    }

    pub async fn subscribe(&self) -> Result<broadcast::Receiver<SaveStateSnapshot>, SaveError> {
        self.request(|reply| SessionMsg::Subscribe { reply }).await
    }

    pub async fn subscribe_queue(&self) -> Result<broadcast::Receiver<QueueSnapshot>, SaveError> {
        self.request(|reply| SessionMsg::SubscribeQueue { reply })
            .await
    }

    /// Stop the session; armed timers and queued retries are dropped.
    pub fn close(&self) {
        self.actor.stop(Some("document closed".to_string()));
    }

    async fn request<T, F>(&self, build: F) -> Result<T, SaveError>
    where
        T: Send + 'static,
        F: FnOnce(RpcReplyPort<T>) -> SessionMsg,
    {
        ractor::call!(self.actor, build).map_err(|e| SaveError::SessionUnavailable(e.to_string()))
    }
}
