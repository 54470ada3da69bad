use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use payroll_core::types::OwnerScope;

/// One async mutex per owner scope: writers of the same scope queue up,
/// different scopes proceed in parallel.
#[derive(Clone, Default)]
pub struct ScopeLocks {
    inner: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl ScopeLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for the scope's writer slot; it is released when the guard drops.
    ///
    /// Slots nobody holds or waits for are pruned on the way in.
    pub async fn acquire(&self, owner: &OwnerScope) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks
                .entry(owner.as_str().to_string())
                .or_default()
                .clone()
        };
        lock.lock_owned().await
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
