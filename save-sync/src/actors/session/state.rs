//! DocumentSessionActor state types.

use ractor::RpcReplyPort;
use shared_types::Revision;
use tokio::task::JoinHandle;

use crate::config::SyncConfig;
use crate::offline_queue::OfflineQueue;
use crate::orchestrator::SaveOrchestrator;
use crate::save_state::SaveStateStore;

use super::messages::SaveError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptKind {
    /// Debounce expiry or unload guard
    Auto,
    /// "Save now" without a pending retry
    Manual,
    /// Re-invoked by the offline queue
    Retry,
    /// Conflict resolution overwrite
    KeepMine,
}

impl AttemptKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AttemptKind::Auto => "auto",
            AttemptKind::Manual => "manual",
            AttemptKind::Retry => "retry",
            AttemptKind::KeepMine => "keep_mine",
        }
    }
}

/// Caller waiting on the outcome of an attempt
#[derive(Debug)]
pub enum Waiter {
    Revision(RpcReplyPort<Result<Revision, SaveError>>),
    Retry(RpcReplyPort<Result<(), SaveError>>),
}

impl Waiter {
    pub fn fail(self, error: SaveError) {
        match self {
            Waiter::Revision(reply) => {
                let _ = reply.send(Err(error));
            }
            Waiter::Retry(reply) => {
                let _ = reply.send(Err(error));
            }
        }
    }
}

#[derive(Debug)]
pub struct InFlightSave {
    pub attempt: u64,
    pub kind: AttemptKind,
    pub expected_revision: Revision,
    pub waiter: Option<Waiter>,
}

pub struct DocumentSessionState {
    pub orchestrator: SaveOrchestrator,
    pub save_state: SaveStateStore,
    pub queue: OfflineQueue<SaveError>,
    pub config: SyncConfig,
    pub debounce: Option<JoinHandle<()>>,
    pub debounce_generation: u64,
    pub next_attempt: u64,
    pub in_flight: Option<InFlightSave>,
    /// Bumped by swap so a reload started before it is discarded
    pub reload_generation: u64,
    pub reloading: bool,
}

impl DocumentSessionState {
    pub fn new(
        orchestrator: SaveOrchestrator,
        config: SyncConfig,
        known_revision: Revision,
    ) -> Self {
        let queue = OfflineQueue::new(config.backoff.clone());
        let mut state = Self {
            orchestrator,
            save_state: SaveStateStore::new(),
            queue,
            config,
            debounce: None,
            debounce_generation: 0,
            next_attempt: 0,
            in_flight: None,
            reload_generation: 0,
            reloading: false,
        };
        state.track(known_revision);
        state
    }

    /// Reset the save state around a freshly loaded revision. An empty token
    /// means the document was never loaded, so no revision is known.
    pub fn track(&mut self, revision: Revision) {
        if revision.as_str().is_empty() {
            self.save_state.reset();
        } else {
            self.save_state.open(revision);
        }
    }

    /// Disarm the debounce timer; safe when nothing is armed.
    pub fn cancel_debounce(&mut self) {
        self.debounce_generation = self.debounce_generation.wrapping_add(1);
        if let Some(timer) = self.debounce.take() {
            timer.abort();
        }
    }

    /// Forget a pending reload; its result is dropped when it arrives.
    pub fn supersede_reload(&mut self) {
        self.reload_generation = self.reload_generation.wrapping_add(1);
        self.reloading = false;
    }

    /// Fail any waiter of the running attempt and forget it.
    pub fn abandon_in_flight(&mut self, reason: &str) {
        if let Some(in_flight) = self.in_flight.take() {
            if let Some(waiter) = in_flight.waiter {
                waiter.fail(SaveError::SessionUnavailable(reason.to_string()));
            }
        }
    }
}
