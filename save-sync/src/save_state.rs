//! SaveState store - per-document save status and dirty tracking.
//!
//! Every operation is a total function of (current state, operation): it
//! mutates the state fully and only then publishes a snapshot to subscribers.

use chrono::Utc;
use shared_types::{Revision, SaveStateSnapshot, SaveStatus};
use tokio::sync::broadcast;

const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug)]
pub struct SaveStateStore {
    state: SaveStateSnapshot,
    /// Bumped by every `mark_dirty`
    edit_seq: u64,
    /// `edit_seq` observed when the running save took its snapshot
    save_started_seq: u64,
    events: broadcast::Sender<SaveStateSnapshot>,
}

impl Default for SaveStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SaveStateStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            state: SaveStateSnapshot::default(),
            edit_seq: 0,
            save_started_seq: 0,
            events,
        }
    }

    pub fn snapshot(&self) -> SaveStateSnapshot {
        self.state.clone()
    }

    pub fn status(&self) -> SaveStatus {
        self.state.status
    }

    pub fn is_dirty(&self) -> bool {
        self.state.is_dirty
    }

    pub fn known_server_revision(&self) -> Option<&Revision> {
        self.state.known_server_revision.as_ref()
    }

    pub fn conflict_revision(&self) -> Option<&Revision> {
        self.state.conflict_revision.as_ref()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SaveStateSnapshot> {
        self.events.subscribe()
    }

    /// Record a local edit. Leaves saving/conflict/error states alone.
    pub fn mark_dirty(&mut self) {
        self.edit_seq += 1;
        self.state.is_dirty = true;
        if self.state.status == SaveStatus::Saved {
            self.state.status = SaveStatus::Idle;
        }
        self.notify();
    }

    /// Enter `saving`. Returns false (and changes nothing) when a save is
    /// already running.
    pub fn begin_save(&mut self) -> bool {
        if self.state.status == SaveStatus::Saving {
            return false;
        }
        self.save_started_seq = self.edit_seq;
        self.state.status = SaveStatus::Saving;
        self.state.conflict_revision = None;
        self.state.last_error = None;
        self.notify();
        true
    }

    /// Record an applied write. The document stays dirty when edits landed
    /// after the saved snapshot was taken.
    pub fn complete_save(&mut self, revision: Revision) {
        self.state.status = SaveStatus::Saved;
        self.state.known_server_revision = Some(revision);
        self.state.last_saved_at = Some(Utc::now());
        self.state.conflict_revision = None;
        self.state.last_error = None;
        self.state.is_dirty = self.edit_seq != self.save_started_seq;
        self.notify();
    }

    /// Hold the document: the server has a revision we have not seen.
    pub fn detect_conflict(&mut self, server_revision: Revision) {
        self.state.status = SaveStatus::Conflict;
        self.state.conflict_revision = Some(server_revision);
        self.state.is_dirty = true;
        self.notify();
    }

    pub fn fail_save(&mut self, message: impl Into<String>) {
        self.state.status = SaveStatus::Error;
        self.state.conflict_revision = None;
        self.state.last_error = Some(message.into());
        self.state.is_dirty = true;
        self.notify();
    }

    /// The failed write has been handed to the offline queue.
    pub fn mark_queued(&mut self) {
        self.state.status = SaveStatus::OfflineQueued;
        self.state.conflict_revision = None;
        self.state.is_dirty = true;
        self.notify();
    }

    pub fn reset(&mut self) {
        self.state = SaveStateSnapshot::default();
        self.edit_seq = 0;
        self.save_started_seq = 0;
        self.notify();
    }

    /// Start tracking a freshly loaded document.
    pub fn open(&mut self, revision: Revision) {
        self.state = SaveStateSnapshot {
            known_server_revision: Some(revision),
            ..SaveStateSnapshot::default()
        };
        self.edit_seq = 0;
        self.save_started_seq = 0;
        self.notify();
    }

    fn notify(&self) {
        let _ = self.events.send(self.state.clone());
    }
}
