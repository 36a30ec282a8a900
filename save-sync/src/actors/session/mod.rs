//! DocumentSessionActor - save engine for one open document.
//!
//! The actor mailbox is the single control thread for a document: SaveState
//! mutations, debounce arm/cancel and conflict transitions all happen inside
//! `handle`, one message at a time. Writes run on spawned tasks and report
//! back with `WriteFinished`; results of superseded attempts are dropped.
//! Reloads fetch on a spawned task too and report with `ReloadFinished`, so
//! the guard and status reads never wait on backend I/O.
//!
//! Each session owns its OfflineQueue. The queued retry is an RPC back into
//! the actor (`RetrySave`), so retried writes go through the same `saving`
//! guard and always carry a fresh editor snapshot.

mod handle;
mod messages;
mod state;

use async_trait::async_trait;
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use shared_types::{Document, Revision, SaveStatus};
use std::sync::Arc;

pub use handle::DocumentSession;
pub use messages::{GuardDecision, SaveError, SessionMsg};
pub use state::{AttemptKind, DocumentSessionState};

use crate::backend::{BackendError, PersistOutcome, PersistenceBackend};
use crate::config::SyncConfig;
use crate::editor::SnapshotSource;
use crate::orchestrator::{FollowUp, SaveOrchestrator};
use crate::save_state::SaveStateStore;
use state::{InFlightSave, Waiter};

#[derive(Debug, Default)]
pub struct DocumentSessionActor;

pub struct DocumentSessionArguments {
    /// Freshly loaded document; its revision seeds `known_server_revision`
    pub document: Document,
    pub editor: Arc<dyn SnapshotSource>,
    pub backend: Arc<dyn PersistenceBackend>,
    pub config: SyncConfig,
    pub session_id: String,
}

#[async_trait]
impl Actor for DocumentSessionActor {
    type Msg = SessionMsg;
    type State = DocumentSessionState;
    type Arguments = DocumentSessionArguments;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!(
            actor_id = %myself.get_id(),
            document_id = %args.document.id,
            revision = %args.document.revision,
            session_id = %args.session_id,
            debounce_ms = args.config.debounce.as_millis() as u64,
            "DocumentSessionActor starting"
        );

        let orchestrator =
            SaveOrchestrator::new(&args.document, args.session_id, args.editor, args.backend);
        Ok(DocumentSessionState::new(
            orchestrator,
            args.config,
            args.document.revision,
        ))
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SessionMsg::MarkDirty => {
                state.save_state.mark_dirty();
                Self::arm_debounce(&myself, state);
            }
            SessionMsg::DebounceElapsed { generation } => {
                self.handle_debounce_elapsed(&myself, state, generation);
            }
            SessionMsg::SaveNow { reply } => {
                self.handle_save_now(&myself, state, reply);
            }
            SessionMsg::RetrySave { reply } => {
                self.handle_retry_save(&myself, state, reply);
            }
            SessionMsg::KeepMine { reply } => {
                self.handle_keep_mine(&myself, state, reply);
            }
            SessionMsg::Reload { reply } => {
                self.handle_reload(&myself, state, reply);
            }
            SessionMsg::Swap { document, reply } => {
                self.handle_swap(state, document);
                let _ = reply.send(());
            }
            SessionMsg::NavigateAway { reply } => {
                let decision = self.handle_navigate_away(&myself, state);
                let _ = reply.send(decision);
            }
            SessionMsg::GetSaveState { reply } => {
                let _ = reply.send(state.save_state.snapshot());
            }
            SessionMsg::GetQueueState { reply } => {
                let _ = reply.send(state.queue.snapshot());
            }
            SessionMsg::Subscribe { reply } => {
                let _ = reply.send(state.save_state.subscribe());
            }
            SessionMsg::SubscribeQueue { reply } => {
                let _ = reply.send(state.queue.subscribe());
            }
            SessionMsg::WriteFinished { attempt, outcome } => {
                self.handle_write_finished(&myself, state, attempt, outcome);
            }
            SessionMsg::ReloadFinished {
                generation,
                result,
                reply,
            } => {
                let result = self.handle_reload_finished(state, generation, result);
                let _ = reply.send(result);
            }
        }
        Ok(())
    }

    async fn post_stop(
        &self,
        myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        state.cancel_debounce();
        state.queue.cancel();
        state.supersede_reload();
        state.abandon_in_flight("session stopped");

        tracing::info!(
            actor_id = %myself.get_id(),
            document_id = %state.orchestrator.document_id(),
            dirty = state.save_state.is_dirty(),
            "DocumentSessionActor stopped"
        );
        Ok(())
    }
}

impl DocumentSessionActor {
    fn arm_debounce(myself: &ActorRef<SessionMsg>, state: &mut DocumentSessionState) {
        state.cancel_debounce();
        let generation = state.debounce_generation;
        let delay = state.config.debounce;
        let actor = myself.clone();
        state.debounce = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = actor.cast(SessionMsg::DebounceElapsed { generation });
        }));
    }

    fn handle_debounce_elapsed(
        &self,
        myself: &ActorRef<SessionMsg>,
        state: &mut DocumentSessionState,
        generation: u64,
    ) {
        if generation != state.debounce_generation {
            return;
        }
        state.debounce = None;

        if !state.save_state.is_dirty() {
            return;
        }
        match state.save_state.status() {
            SaveStatus::Saving => {
                tracing::debug!(
                    document_id = %state.orchestrator.document_id(),
                    "Save in flight; pending edits go out after it completes"
                );
            }
            SaveStatus::Conflict => {
                tracing::debug!(
                    document_id = %state.orchestrator.document_id(),
                    "Auto-save suspended until the conflict is resolved"
                );
            }
            _ => Self::start_attempt(myself, state, AttemptKind::Auto, None),
        }
    }

    fn handle_save_now(
        &self,
        myself: &ActorRef<SessionMsg>,
        state: &mut DocumentSessionState,
        reply: RpcReplyPort<Result<Revision, SaveError>>,
    ) {
        let status = state.save_state.status();

        if status.is_retry_pending() && state.queue.has_pending() {
            tracing::info!(
                document_id = %state.orchestrator.document_id(),
                "Manual save: flushing offline queue"
            );
            // The flush re-enters this actor through RetrySave, so it must
            // not be awaited inside the handler.
            let queue = state.queue.clone();
            let actor = myself.clone();
            tokio::spawn(async move {
                let result = match queue.flush().await {
                    Ok(()) => Self::settled_revision(&actor).await,
                    Err(e) => Err(e),
                };
                let _ = reply.send(result);
            });
            return;
        }

        match status {
            SaveStatus::Saving => {
                let _ = reply.send(Err(SaveError::SaveInFlight));
            }
            SaveStatus::Conflict => {
                let _ = reply.send(Err(Self::conflict_error(&state.save_state)));
            }
            _ if !state.save_state.is_dirty() => {
                let result = match state.save_state.known_server_revision() {
                    Some(revision) => Ok(revision.clone()),
                    None => {
                        tracing::error!(
                            document_id = %state.orchestrator.document_id(),
                            kind = AttemptKind::Manual.as_str(),
                            "Save requested before the document was loaded; no known server revision"
                        );
                        Err(SaveError::MissingRevision)
                    }
                };
                let _ = reply.send(result);
            }
            _ => Self::start_attempt(
                myself,
                state,
                AttemptKind::Manual,
                Some(Waiter::Revision(reply)),
            ),
        }
    }

    fn handle_retry_save(
        &self,
        myself: &ActorRef<SessionMsg>,
        state: &mut DocumentSessionState,
        reply: RpcReplyPort<Result<(), SaveError>>,
    ) {
        match state.save_state.status() {
            // The running attempt re-enqueues on failure; a conflict is
            // resolved by the user, never by the queue.
            SaveStatus::Saving | SaveStatus::Conflict => {
                let _ = reply.send(Ok(()));
            }
            _ if !state.save_state.is_dirty() => {
                let _ = reply.send(Ok(()));
            }
            _ => Self::start_attempt(myself, state, AttemptKind::Retry, Some(Waiter::Retry(reply))),
        }
    }

    fn handle_keep_mine(
        &self,
        myself: &ActorRef<SessionMsg>,
        state: &mut DocumentSessionState,
        reply: RpcReplyPort<Result<Revision, SaveError>>,
    ) {
        match state.save_state.status() {
            SaveStatus::Conflict => {
                tracing::info!(
                    document_id = %state.orchestrator.document_id(),
                    server_revision = ?state.save_state.conflict_revision(),
                    "Keeping local copy over server revision"
                );
                Self::start_attempt(
                    myself,
                    state,
                    AttemptKind::KeepMine,
                    Some(Waiter::Revision(reply)),
                );
            }
            SaveStatus::Saving => {
                let _ = reply.send(Err(SaveError::SaveInFlight));
            }
            _ => {
                let _ = reply.send(Err(SaveError::NotInConflict));
            }
        }
    }

    fn handle_reload(
        &self,
        myself: &ActorRef<SessionMsg>,
        state: &mut DocumentSessionState,
        reply: RpcReplyPort<Result<Document, SaveError>>,
    ) {
        if state.save_state.status() == SaveStatus::Saving {
            let _ = reply.send(Err(SaveError::SaveInFlight));
            return;
        }
        if state.reloading {
            let _ = reply.send(Err(SaveError::ReloadInFlight));
            return;
        }

        state.reloading = true;
        let generation = state.reload_generation;
        let actor = myself.clone();
        state.orchestrator.spawn_load(move |result| {
            if let Err(e) = actor.cast(SessionMsg::ReloadFinished {
                generation,
                result,
                reply,
            }) {
                tracing::debug!(error = %e, "Session gone before reload finished");
            }
        });
    }

    fn handle_reload_finished(
        &self,
        state: &mut DocumentSessionState,
        generation: u64,
        result: Result<Document, BackendError>,
    ) -> Result<Document, SaveError> {
        if generation != state.reload_generation {
            tracing::debug!(generation, "Ignoring result of superseded reload");
            return Err(SaveError::SessionUnavailable(
                "reload superseded by document swap".to_string(),
            ));
        }
        state.reloading = false;

        let document = result.map_err(|e| {
            tracing::warn!(
                document_id = %state.orchestrator.document_id(),
                error = %e,
                "Reload failed; keeping local state"
            );
            SaveError::Transient(e.to_string())
        })?;

        state.abandon_in_flight("document reloaded");
        state.cancel_debounce();
        state.queue.cancel();
        state.orchestrator.retarget(&document);
        state.track(document.revision.clone());

        tracing::info!(
            document_id = %document.id,
            revision = %document.revision,
            "Reloaded authoritative copy; local edits discarded"
        );
        Ok(document)
    }

    fn handle_swap(&self, state: &mut DocumentSessionState, document: Document) {
        state.supersede_reload();
        state.abandon_in_flight("document swapped");
        state.cancel_debounce();
        state.queue.cancel();
        state.orchestrator.retarget(&document);
        state.track(document.revision.clone());

        tracing::info!(
            document_id = %document.id,
            revision = %document.revision,
            "Session switched document"
        );
    }

    fn handle_navigate_away(
        &self,
        myself: &ActorRef<SessionMsg>,
        state: &mut DocumentSessionState,
    ) -> GuardDecision {
        let unsaved = state.save_state.is_dirty();
        let flushed = unsaved
            && state.save_state.known_server_revision().is_some()
            && !matches!(
                state.save_state.status(),
                SaveStatus::Saving | SaveStatus::Conflict
            );

        if flushed {
            Self::start_attempt(myself, state, AttemptKind::Auto, None);
        }

        tracing::info!(
            document_id = %state.orchestrator.document_id(),
            unsaved,
            flushed,
            status = %state.save_state.status(),
            "Navigation guard"
        );
        GuardDecision { flushed, unsaved }
    }

    fn start_attempt(
        myself: &ActorRef<SessionMsg>,
        state: &mut DocumentSessionState,
        kind: AttemptKind,
        waiter: Option<Waiter>,
    ) {
        let expected = match kind {
            AttemptKind::KeepMine => state.save_state.conflict_revision().cloned(),
            _ => state.save_state.known_server_revision().cloned(),
        };
        let Some(expected_revision) = expected else {
            tracing::error!(
                document_id = %state.orchestrator.document_id(),
                kind = kind.as_str(),
                "Save requested before the document was loaded; no known server revision"
            );
            if let Some(waiter) = waiter {
                waiter.fail(SaveError::MissingRevision);
            }
            return;
        };

        if !state.save_state.begin_save() {
            if let Some(waiter) = waiter {
                waiter.fail(SaveError::SaveInFlight);
            }
            return;
        }

        // Snapshot below covers every edit so far.
        state.cancel_debounce();
        state.next_attempt += 1;
        let attempt = state.next_attempt;
        let request = state.orchestrator.prepare(expected_revision.clone());

        tracing::debug!(
            document_id = %request.document_id,
            attempt,
            kind = kind.as_str(),
            expected_revision = %expected_revision,
            "Starting save attempt"
        );

        let actor = myself.clone();
        state.orchestrator.spawn_write(request, move |outcome| {
            if let Err(e) = actor.cast(SessionMsg::WriteFinished { attempt, outcome }) {
                tracing::debug!(attempt, error = %e, "Session gone before write finished");
            }
        });

        state.in_flight = Some(InFlightSave {
            attempt,
            kind,
            expected_revision,
            waiter,
        });
    }

    fn handle_write_finished(
        &self,
        myself: &ActorRef<SessionMsg>,
        state: &mut DocumentSessionState,
        attempt: u64,
        outcome: PersistOutcome,
    ) {
        let current = state.in_flight.as_ref().map(|in_flight| in_flight.attempt);
        if current != Some(attempt) {
            tracing::debug!(attempt, "Ignoring result of superseded save attempt");
            return;
        }
        let Some(in_flight) = state.in_flight.take() else {
            return;
        };
        let document_id = state.orchestrator.document_id().clone();

        if in_flight.kind == AttemptKind::KeepMine {
            if let PersistOutcome::Failure(error) = &outcome {
                tracing::warn!(
                    document_id = %document_id,
                    attempt,
                    error = %error,
                    "Keep-mine write failed; conflict still open"
                );
                state
                    .save_state
                    .detect_conflict(in_flight.expected_revision.clone());
                if let Some(waiter) = in_flight.waiter {
                    waiter.fail(SaveError::Transient(error.to_string()));
                }
                return;
            }
        }

        match SaveOrchestrator::record_outcome(&mut state.save_state, outcome) {
            FollowUp::Saved {
                revision,
                still_dirty,
            } => {
                if state.queue.has_pending() {
                    state.queue.cancel();
                }
                tracing::info!(
                    document_id = %document_id,
                    attempt,
                    kind = in_flight.kind.as_str(),
                    revision = %revision,
                    still_dirty,
                    "Document saved"
                );
                match in_flight.waiter {
                    Some(Waiter::Revision(reply)) => {
                        let _ = reply.send(Ok(revision));
                    }
                    Some(Waiter::Retry(reply)) => {
                        let _ = reply.send(Ok(()));
                    }
                    None => {}
                }
                if still_dirty {
                    Self::arm_debounce(myself, state);
                }
            }
            FollowUp::Hold { server_revision } => {
                state.cancel_debounce();
                state.queue.cancel();
                tracing::warn!(
                    document_id = %document_id,
                    attempt,
                    expected_revision = %in_flight.expected_revision,
                    server_revision = %server_revision,
                    "Revision conflict; auto-save suspended"
                );
                match in_flight.waiter {
                    Some(Waiter::Revision(reply)) => {
                        let _ = reply.send(Err(SaveError::Conflict { server_revision }));
                    }
                    Some(Waiter::Retry(reply)) => {
                        let _ = reply.send(Ok(()));
                    }
                    None => {}
                }
            }
            FollowUp::Retry { error } => {
                tracing::warn!(
                    document_id = %document_id,
                    attempt,
                    kind = in_flight.kind.as_str(),
                    error = %error,
                    "Save failed; queued for retry"
                );
                // A queued retry is re-armed by the queue itself.
                if in_flight.kind != AttemptKind::Retry {
                    Self::enqueue_retry(myself, state);
                }
                state.save_state.mark_queued();
                if let Some(waiter) = in_flight.waiter {
                    waiter.fail(SaveError::Transient(error.to_string()));
                }
            }
        }
    }

    fn enqueue_retry(myself: &ActorRef<SessionMsg>, state: &mut DocumentSessionState) {
        let actor = myself.clone();
        state.queue.enqueue(move || {
            let actor = actor.clone();
            async move {
                match ractor::call!(actor, |reply| SessionMsg::RetrySave { reply }) {
                    Ok(result) => result,
                    Err(e) => Err(SaveError::SessionUnavailable(e.to_string())),
                }
            }
        });
    }

    /// Outcome of a manual flush, read back from the session.
    async fn settled_revision(actor: &ActorRef<SessionMsg>) -> Result<Revision, SaveError> {
        let snapshot = ractor::call!(actor, |reply| SessionMsg::GetSaveState { reply })
            .map_err(|e| SaveError::SessionUnavailable(e.to_string()))?;
        match snapshot.status {
            SaveStatus::Conflict => match snapshot.conflict_revision {
                Some(server_revision) => Err(SaveError::Conflict { server_revision }),
                None => Err(SaveError::NotInConflict),
            },
            SaveStatus::Saving => Err(SaveError::SaveInFlight),
            SaveStatus::Error | SaveStatus::OfflineQueued => {
                Err(SaveError::Transient(snapshot.last_error.unwrap_or_else(|| {
                    "save still pending".to_string()
                })))
            }
            _ => snapshot
                .known_server_revision
                .ok_or(SaveError::MissingRevision),
        }
    }

    fn conflict_error(save_state: &SaveStateStore) -> SaveError {
        match save_state.conflict_revision() {
            Some(revision) => SaveError::Conflict {
                server_revision: revision.clone(),
            },
            None => SaveError::NotInConflict,
        }
    }
}
