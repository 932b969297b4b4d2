use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use salvo_core::async_trait;
use tokio::sync::Mutex;

use crate::lockers::{LockError, LockGuard, Locker};

/// In-process locker backed by one `tokio::sync::Mutex` per upload id.
///
/// By default acquisition is a pure try-lock: a held lock is reported as
/// [`LockError::AlreadyLocked`] immediately. An optional `acquire_timeout`
/// turns that into a bounded wait, which smooths over very short holders
/// without pinning connections.
#[derive(Clone, Default)]
pub struct MemoryLocker {
    cells: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
    acquire_timeout: Option<Duration>,
}

impl MemoryLocker {
    pub fn new() -> MemoryLocker {
        MemoryLocker::default()
    }

    #[must_use]
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = Some(timeout);
        self
    }

    async fn cell(&self, id: &str) -> Arc<Mutex<()>> {
        let mut cells = self.cells.lock().await;
        cells
            .entry(id.to_owned())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

impl std::fmt::Debug for MemoryLocker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryLocker")
            .field("acquire_timeout", &self.acquire_timeout)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Locker for MemoryLocker {
    async fn lock(&self, id: &str) -> Result<LockGuard, LockError> {
        let cell = self.cell(id).await;
        match self.acquire_timeout {
            None => cell
                .try_lock_owned()
                .map(LockGuard::new)
                .map_err(|_| LockError::AlreadyLocked),
            Some(timeout) => tokio::time::timeout(timeout, cell.lock_owned())
                .await
                .map(LockGuard::new)
                .map_err(|_| LockError::AlreadyLocked),
        }
    }
}
