//! The exclusive per-upload lock contract.

use std::any::Any;
use std::fmt;

use salvo_core::async_trait;

mod memory;

pub use memory::MemoryLocker;

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("upload is currently locked by another request")]
    AlreadyLocked,
    #[error("lock failure: {0}")]
    Other(String),
}

/// Provides exclusive, per-id serialization of upload access.
///
/// While a lock is held its holder is the sole mutator *and* reader of that
/// upload's descriptor and bytes; HEAD takes the same lock as PATCH so an
/// observed offset is never torn by a concurrent append.
///
/// `lock` performs a bounded attempt and surfaces [`LockError::AlreadyLocked`]
/// instead of queueing, so contended requests fail fast with 423 and the
/// client retries. Blocking here would pin HTTP connections.
///
/// Distributed implementations whose lock can silently expire (session loss)
/// MUST abort the process when they detect expiry and cannot re-assert the
/// lock. Surfacing the loss as an error is not safe: other tasks may be
/// mid-write and cannot be interrupted atomically.
#[async_trait]
pub trait Locker: Send + Sync + 'static {
    async fn lock(&self, id: &str) -> Result<LockGuard, LockError>;
}

/// Scoped ownership of an acquired lock.
///
/// Dropping the guard releases the lock, which guarantees exactly one
/// release on every handler exit path. Releasing an id that is no longer
/// held is implementation-defined (no-op or logged), never a panic.
pub struct LockGuard {
    _token: Box<dyn Any + Send>,
}

impl LockGuard {
    /// Wraps whatever resource releases the lock when dropped.
    pub fn new(token: impl Any + Send) -> LockGuard {
        LockGuard {
            _token: Box::new(token),
        }
    }
}

impl fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard").finish_non_exhaustive()
    }
}
