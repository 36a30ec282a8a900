//! DocumentSessionActor message types.

use ractor::RpcReplyPort;
use serde::{Deserialize, Serialize};
use shared_types::{Document, QueueSnapshot, Revision, SaveStateSnapshot};
use tokio::sync::broadcast;

use crate::backend::{BackendError, PersistOutcome};

#[derive(Debug)]
pub enum SessionMsg {
    /// The editor changed the document
    MarkDirty,
    /// Manual "save now"; flushes the offline queue when a retry is pending
    SaveNow {
        reply: RpcReplyPort<Result<Revision, SaveError>>,
    },
    /// Retry path invoked by the offline queue
    RetrySave {
        reply: RpcReplyPort<Result<(), SaveError>>,
    },
    /// Overwrite the server copy, using the conflicting revision as the
    /// compare-and-swap key
    KeepMine {
        reply: RpcReplyPort<Result<Revision, SaveError>>,
    },
    /// Drop local state and fetch the authoritative copy
    Reload {
        reply: RpcReplyPort<Result<Document, SaveError>>,
    },
    /// Start tracking another document
    Swap {
        document: Document,
        reply: RpcReplyPort<()>,
    },
    /// Unload or navigate-away event
    NavigateAway {
        reply: RpcReplyPort<GuardDecision>,
    },
    GetSaveState {
        reply: RpcReplyPort<SaveStateSnapshot>,
    },
    GetQueueState {
        reply: RpcReplyPort<QueueSnapshot>,
    },
    Subscribe {
        reply: RpcReplyPort<broadcast::Receiver<SaveStateSnapshot>>,
    },
    SubscribeQueue {
        reply: RpcReplyPort<broadcast::Receiver<QueueSnapshot>>,
    },
    DebounceElapsed {
        generation: u64,
    },
    WriteFinished {
        attempt: u64,
        outcome: PersistOutcome,
    },
    ReloadFinished {
        generation: u64,
        result: Result<Document, BackendError>,
        reply: RpcReplyPort<Result<Document, SaveError>>,
    },
}

/// Result of the unload guard. The transition always proceeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardDecision {
    /// A final fire-and-forget write was started
    pub flushed: bool,
    /// The document had edits not yet confirmed by the server
    pub unsaved: bool,
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum SaveError {
    #[error("Revision conflict: server holds {server_revision}")]
    Conflict { server_revision: Revision },

    #[error("Save failed: {0}")]
    Transient(String),

    #[error("No known server revision; the document was never loaded")]
    MissingRevision,

    #[error("A save is already in flight")]
    SaveInFlight,

    #[error("A reload is already in flight")]
    ReloadInFlight,

    #[error("Document is not in conflict")]
    NotInConflict,

    #[error("Session unavailable: {0}")]
    SessionUnavailable(String),
}

impl SaveError {
    /// Whether the offline queue may try again
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SaveError::Transient(_) | SaveError::SessionUnavailable(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_errors_are_retryable() {
        assert!(SaveError::Transient("timeout".into()).is_retryable());
        assert!(SaveError::SessionUnavailable("stopped".into()).is_retryable());
        assert!(!SaveError::Conflict {
            server_revision: Revision::from("R2")
        }
        .is_retryable());
        assert!(!SaveError::MissingRevision.is_retryable());
        assert!(!SaveError::SaveInFlight.is_retryable());
        assert!(!SaveError::ReloadInFlight.is_retryable());
    }
}
