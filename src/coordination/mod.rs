//! Coordination Layer for Singleton Supervision
//!
//! Primitives shared by every supervised process:
//! - Stable lock keys and the per-component distributed lock
//! - Catalog registration and the remote enabled flag
//! - Heartbeat publishing and error event recording
//! - Cooperative shutdown

pub mod heartbeat;
pub mod key_hash;
pub mod lock;
pub mod registry;
pub mod shutdown;
pub mod store;

pub use heartbeat::{
    truncate_message, truncate_traceback, ErrorEventRecorder, HeartbeatPublisher, LastError,
    MAX_MESSAGE_CHARS, MAX_TRACEBACK_CHARS,
};
pub use key_hash::stable_key_hash;
pub use lock::{ComponentLock, LockManager, LOCK_TAG_PREFIX};
pub use registry::{ComponentRegistry, EnabledFlagStore};
pub use shutdown::{install_signal_handlers, Shutdown, ShutdownSignal, FORCED_EXIT_CODE};
pub use store::{CoordinationStore, LockHandle};
