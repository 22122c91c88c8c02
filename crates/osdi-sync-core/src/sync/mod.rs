//! Bidirectional sync engine.
//!
//! [`SingleSyncer`] runs one record through match, eligibility, map, write
//! and state bookkeeping. [`BatchSyncer`] drives it over everything changed
//! since the last run, and [`QueueProcessor`] over records queued by local
//! edits. Both take a process-wide lock first.

pub mod batch;
pub mod eligibility;
pub mod listener;
pub mod lock;
pub mod mapper;
pub mod matcher;
pub mod pair;
pub mod queue;
pub mod registry;
pub mod results;
pub mod single;
pub mod state;

pub use batch::{BatchSyncer, BatchTally};
pub use eligibility::{AlwaysEligible, Eligibility, EligibilityRule};
pub use listener::QueueingListener;
pub use lock::{LockState, ProcessProbe, SystemProbe};
pub use mapper::{MapAction, Mapper};
pub use matcher::Matcher;
pub use pair::{LocalRemotePair, SyncReport};
pub use queue::{QueueOperation, QueueProcessor, QueuedTask, TaskQueue};
pub use registry::{EntitySync, Registry, SyncContext, SyncerFactory};
pub use results::{
    EligibilityStatus, FetchMatchStatus, MapStatus, MatchStatus, SaveStatus, StatusCode, SyncStatus,
};
pub use single::{DeletionKind, SingleSyncer};
pub use state::{SyncState, SyncStateRepository};
