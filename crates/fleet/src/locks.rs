use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::workspace::WorkspaceId;

/// Serializes create/delete for a single workspace. Different workspaces
/// never wait on each other.
#[derive(Default)]
pub struct WorkspaceLocks {
    slots: Mutex<HashMap<WorkspaceId, Arc<AsyncMutex<()>>>>,
}

/// Held for the duration of one provisioning or teardown sequence.
pub struct WorkspaceGuard {
    _guard: OwnedMutexGuard<()>,
}

impl WorkspaceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, workspace: &WorkspaceId) -> WorkspaceGuard {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            // Only the map holds a reference: nobody owns or waits on it.
            slots.retain(|_, slot| Arc::strong_count(slot) > 1);
            Arc::clone(slots.entry(workspace.clone()).or_default())
        };
        WorkspaceGuard {
            _guard: slot.lock_owned().await,
        }
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
