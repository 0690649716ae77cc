//! Live connection bookkeeping.
//!
//! Every accepted connection is registered under a monotonically
//! increasing id before its first read. The entry holds the token that
//! destroys the connection on server shutdown.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;

/// Set of open connections keyed by connection id.
#[derive(Debug, Default)]
pub(crate) struct ConnectionRegistry {
    next_id: AtomicU64,
    connections: Mutex<HashMap<u64, CancellationToken>>,
}

impl ConnectionRegistry {
    /// Track a new connection destroyed through `cancel`.
    ///
    /// The returned guard removes the entry when dropped.
    pub(crate) fn register(self: &Arc<Self>, cancel: CancellationToken) -> Registration {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.lock().insert(id, cancel);
        Registration {
            id,
            registry: Arc::clone(self),
        }
    }

    /// Number of tracked connections.
    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    /// Ids of tracked connections, ascending.
    pub(crate) fn ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Cancel every tracked connection and clear the set.
    ///
    /// Returns how many connections were destroyed.
    pub(crate) fn destroy_all(&self) -> usize {
        let drained: Vec<CancellationToken> = self.lock().drain().map(|(_, token)| token).collect();
        for token in &drained {
            token.cancel();
        }
        drained.len()
    }

    fn remove(&self, id: u64) -> bool {
        self.lock().remove(&id).is_some()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, CancellationToken>> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Registry membership of one connection; dropping it unregisters.
#[derive(Debug)]
pub(crate) struct Registration {
    id: u64,
    registry: Arc<ConnectionRegistry>,
}

impl Registration {
    pub(crate) fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.remove(self.id);
    }
}
