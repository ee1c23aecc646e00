//! Per-owner async mutexes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// One async mutex per owner, created on first use.
///
/// The registry itself sits behind a short-lived std mutex; the returned
/// guard is the owner's tokio mutex and may be held across `.await`.
#[derive(Default)]
pub struct OwnerLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl OwnerLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self, owner: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks
            .entry(owner.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Wait for exclusive access to `owner`.
    pub async fn lock(&self, owner: &str) -> OwnedMutexGuard<()> {
        self.handle(owner).lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_owner_is_exclusive() {
        let locks = Arc::new(OwnerLocks::new());
        let guard = locks.lock("u1").await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _g = locks.lock("u1").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_different_owners_do_not_block() {
        let locks = OwnerLocks::new();
        let _a = locks.lock("u1").await;
        tokio::time::timeout(Duration::from_secs(1), locks.lock("u2"))
            .await
            .unwrap();
    }
}
