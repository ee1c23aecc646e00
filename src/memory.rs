//! Per-owner conversation memory.
//!
//! Each owner has an ordered list of question/answer turns that grows until
//! cleared. Memory is keyed by owner; a caller-supplied session id does not
//! select a separate conversation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::models::{ClearStatus, Turn};

/// An owner's conversation, locked for the duration of a query or clear.
pub type Conversation = Arc<AsyncMutex<Vec<Turn>>>;

#[derive(Default)]
pub struct MemoryStore {
    conversations: Mutex<HashMap<String, Conversation>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn registry(&self) -> std::sync::MutexGuard<'_, HashMap<String, Conversation>> {
        self.conversations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The owner's conversation, created empty if it does not exist.
    pub fn get_or_create(&self, owner: &str) -> Conversation {
        self.registry()
            .entry(owner.to_string())
            .or_default()
            .clone()
    }

    /// Number of owners with a live conversation.
    pub fn len(&self) -> usize {
        self.registry().len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry().is_empty()
    }

    fn get(&self, owner: &str) -> Option<Conversation> {
        self.registry().get(owner).cloned()
    }

    /// Lock the owner's conversation, creating it if needed.
    ///
    /// A conversation removed by [`clear`](Self::clear) while this call was
    /// waiting is not returned; the lock is retaken on the fresh entry.
    pub async fn lock(&self, owner: &str) -> OwnedMutexGuard<Vec<Turn>> {
        loop {
            let conversation = self.get_or_create(owner);
            let guard = conversation.clone().lock_owned().await;
            if self.is_current(owner, &conversation) {
                return guard;
            }
        }
    }

    fn is_current(&self, owner: &str, conversation: &Conversation) -> bool {
        self.get(owner)
            .is_some_and(|current| Arc::ptr_eq(&current, conversation))
    }

    /// Snapshot of the owner's turns. Does not create a conversation.
    pub async fn history(&self, owner: &str) -> Vec<Turn> {
        match self.get(owner) {
            Some(conversation) => conversation.lock().await.clone(),
            None => Vec::new(),
        }
    }

    /// Remove the owner's conversation; the next query starts a new one.
    ///
    /// Waits for an in-flight query on the same owner to finish first.
    pub async fn clear(&self, owner: &str) -> ClearStatus {
        let Some(conversation) = self.get(owner) else {
            return ClearStatus::NothingToClear;
        };
        let turns = conversation.lock().await;
        {
            let mut registry = self.registry();
            if registry
                .get(owner)
                .is_some_and(|current| Arc::ptr_eq(current, &conversation))
            {
                registry.remove(owner);
            }
        }
        if turns.is_empty() {
            ClearStatus::NothingToClear
        } else {
            ClearStatus::Cleared
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(q: &str) -> Turn {
        Turn {
            question: q.to_string(),
            answer: format!("answer to {}", q),
        }
    }

    #[tokio::test]
    async fn test_history_does_not_create() {
        let store = MemoryStore::new();
        assert!(store.history("u1").await.is_empty());
        assert!(store.get("u1").is_none());
    }

    #[tokio::test]
    async fn test_turns_accumulate_in_order() {
        let store = MemoryStore::new();
        store.lock("u1").await.push(turn("q1"));
        store.lock("u1").await.push(turn("q2"));
        let history = store.history("u1").await;
        assert_eq!(history, vec![turn("q1"), turn("q2")]);
        assert!(store.history("u2").await.is_empty());
    }

    #[tokio::test]
    async fn test_clear_then_clear_again() {
        let store = MemoryStore::new();
        assert_eq!(store.clear("u1").await, ClearStatus::NothingToClear);
        store.lock("u1").await.push(turn("q1"));
        assert_eq!(store.clear("u1").await, ClearStatus::Cleared);
        assert!(store.get("u1").is_none());
        assert!(store.history("u1").await.is_empty());
        assert_eq!(store.clear("u1").await, ClearStatus::NothingToClear);
    }

    #[tokio::test]
    async fn test_cleared_entries_do_not_accumulate() {
        let store = MemoryStore::new();
        store.lock("u1").await.push(turn("q1"));
        for i in 0..100 {
            let owner = format!("owner-{}", i);
            drop(store.lock(&owner).await);
            store.clear(&owner).await;
        }
        assert_eq!(store.clear("u1").await, ClearStatus::Cleared);
        assert!(store.registry().is_empty());
    }

    #[tokio::test]
    async fn test_query_waiting_on_clear_uses_fresh_conversation() {
        let store = Arc::new(MemoryStore::new());
        let mut turns = store.lock("u1").await;
        turns.push(turn("q1"));

        let clearing = {
            let store = store.clone();
            tokio::spawn(async move { store.clear("u1").await })
        };
        tokio::task::yield_now().await;
        let querying = {
            let store = store.clone();
            tokio::spawn(async move { store.lock("u1").await.push(turn("q2")) })
        };
        tokio::task::yield_now().await;
        drop(turns);

        assert_eq!(clearing.await.unwrap(), ClearStatus::Cleared);
        querying.await.unwrap();
        assert_eq!(store.history("u1").await, vec![turn("q2")]);
    }
}
