//! Shared primitives for the UpNext question tracker.
//!
//! The same queue/cursor state machine backs both deployment shapes: a local
//! session persisted to a key-value store, and the networked holder that
//! broadcasts its state to every connected client.

pub mod focus;
pub mod navigation;
pub mod parser;
pub mod protocol;
pub mod queue;
pub mod session;
pub mod storage;
pub mod sync;

pub use focus::{Advance, AutoAdvance, FocusSignal, Subscription};
pub use navigation::{listing, progress_percent, Navigation};
pub use parser::parse;
pub use protocol::{ClientRequest, ProtocolError, ServerPush};
pub use queue::{clamp_index, NumberQueue, QueueState, Transition};
pub use session::{
    Commit, LocalSession, LocalTracker, Persisted, SessionError, SessionHandle, SessionView,
    StateObserver, StorageObserver,
};
pub use storage::{FileStore, KeyValueStore, MemoryStore, StoreError, StoreResult};
pub use sync::SyncClient;
