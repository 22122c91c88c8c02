//! # osdi-sync core library
//!
//! Keeps a local CRM and an OSDI-compliant remote (Action Network) in sync,
//! in both directions. The CLI binary is a thin layer over this crate.
//!
//! ## Architecture
//!
//! - **Model**: local records and remote resources with per-field change
//!   tracking
//! - **Store**: the [`ObjectStore`] seam over the SQLite local CRM and the
//!   OSDI HTTP API (or an in-memory remote)
//! - **Sync**: the single-record state machine, horizon-driven batch runs
//!   and the reactive queue fed by local writes
//! - **Entities**: matching, mapping and eligibility per entity type
//! - **Storage**: SQLite (sync state, settings, queue) and TOML configuration
//!
//! ## Key Components
//!
//! - [`SingleSyncer`]: one-record sync state machine
//! - [`BatchSyncer`]: locked batch runs over changed records
//! - [`QueueProcessor`]: locked runs over queued local edits
//! - [`Config`]: application configuration management

pub mod entities;
pub mod error;
pub mod model;
pub mod storage;
pub mod store;
pub mod sync;

pub use error::{ConfigError, CoreError, DatabaseError, MapError, MatchError, StoreError};
pub use model::{EntityKind, SyncOrigin};
pub use storage::{Config, Database, Settings};
pub use store::{LocalCrm, MemoryRemote, ObjectStore, OsdiClient, RemoteSystem, WriteContext};
pub use sync::{
    BatchSyncer, LocalRemotePair, QueueProcessor, QueueingListener, Registry, SingleSyncer,
    SyncContext, SyncReport, SyncState, SyncStateRepository, SyncStatus, TaskQueue,
};
