//! Per-file exclusivity
//!
//! At most one transfer may own a remote id at any time. Ownership is a
//! [`FileLockGuard`]; dropping the guard releases the id and wakes every task
//! waiting in [`FileLockRegistry::claim`].
//!
//! The guard also covers the file's target path on disk: only its holder
//! writes there.

use std::sync::Arc;

use dashmap::DashSet;
use tokio::sync::Notify;

use cloudmirror_core::domain::RemoteId;

/// Registry of remote ids currently owned by a transfer
#[derive(Default)]
pub struct FileLockRegistry {
    held: DashSet<RemoteId>,
    released: Notify,
}

impl FileLockRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Claim `id` if no other transfer owns it
    pub fn try_claim(self: &Arc<Self>, id: &RemoteId) -> Option<FileLockGuard> {
        if !self.held.insert(id.clone()) {
            return None;
        }
        tracing::trace!(id = %id, "Claimed file lock");
        Some(FileLockGuard {
            registry: Arc::clone(self),
            id: id.clone(),
        })
    }

    /// Wait until `id` can be claimed
    pub async fn claim(self: &Arc<Self>, id: &RemoteId) -> FileLockGuard {
        loop {
            // Register interest before checking so a release in between is not missed
            let released = self.released.notified();
            if let Some(guard) = self.try_claim(id) {
                return guard;
            }
            released.await;
        }
    }

    /// Whether some transfer currently owns `id`
    pub fn is_held(&self, id: &RemoteId) -> bool {
        self.held.contains(id)
    }

    /// Number of ids currently owned
    pub fn held_count(&self) -> usize {
        self.held.len()
    }

    fn release(&self, id: &RemoteId) {
        self.held.remove(id);
        tracing::trace!(id = %id, "Released file lock");
        self.released.notify_waiters();
    }
}

/// Exclusive ownership of one remote id, released on drop
pub struct FileLockGuard {
    registry: Arc<FileLockRegistry>,
    id: RemoteId,
}

impl FileLockGuard {
    pub fn id(&self) -> &RemoteId {
        &self.id
    }
}

impl Drop for FileLockGuard {
    fn drop(&mut self) {
        self.registry.release(&self.id);
    }
}

impl std::fmt::Debug for FileLockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileLockGuard").field("id", &self.id).finish()
    }
}
