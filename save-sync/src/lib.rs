//! Save Sync - per-document save engine
//!
//! Persists an in-memory document to a backend with debounced conditional
//! writes, holds the document on revision conflicts until the user picks a
//! side, and retries transient failures through a per-session offline queue.

pub mod actors;
pub mod api;
pub mod backend;
pub mod config;
pub mod editor;
pub mod offline_queue;
pub mod orchestrator;
pub mod save_state;

pub use actors::{DocumentSession, GuardDecision, SaveError};
pub use backend::{
    BackendError, FileBackend, HttpBackend, InMemoryBackend, PersistOutcome, PersistRequest,
    PersistenceBackend,
};
pub use config::{ConfigError, DocstoreConfig, SyncConfig};
pub use editor::{EditorBuffer, SnapshotSource};
pub use offline_queue::{BackoffSchedule, OfflineQueue};
pub use save_state::SaveStateStore;
