//! Process-wide mapping from platform users to backend conversations.
//!
//! The store is created once at startup and shared through the server state.
//! It is bounded: once `capacity` users are tracked, the least recently seen
//! user is forgotten and will be assigned afresh on their next message.
//! [`ConversationStore::reset`] is the teardown hook; it drops every mapping.

use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};

use lru::LruCache;
use nonempty::NonEmpty;
use rand::Rng;
use tracing::debug;

/// Bounded, thread-safe user → conversation id map.
#[derive(Debug)]
pub struct ConversationStore {
    pool: NonEmpty<String>,
    assignments: Mutex<LruCache<String, String>>,
}

impl ConversationStore {
    /// Create a store that assigns conversation ids from `pool`.
    pub fn new(pool: NonEmpty<String>, capacity: NonZeroUsize) -> Self {
        Self {
            pool,
            assignments: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Return the conversation assigned to `user_id`, assigning one at random
    /// from the pool if the user has none.
    ///
    /// Lookup and insert happen under one lock, so concurrent first messages
    /// from the same user always agree on the conversation.
    pub fn get_or_assign(&self, user_id: &str) -> String {
        let mut assignments = self.lock();
        if let Some(conversation_id) = assignments.get(user_id) {
            return conversation_id.clone();
        }

        let conversation_id = self.pick().to_string();
        debug!(user_id, conversation_id = %conversation_id, "assigned conversation");
        assignments.put(user_id.to_string(), conversation_id.clone());
        conversation_id
    }

    /// Current assignment for `user_id` without touching recency.
    pub fn peek(&self, user_id: &str) -> Option<String> {
        self.lock().peek(user_id).cloned()
    }

    /// Drop the assignment for `user_id`, returning it.
    pub fn forget(&self, user_id: &str) -> Option<String> {
        self.lock().pop(user_id)
    }

    /// Drop every assignment.
    pub fn reset(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.lock().cap().get()
    }

    pub fn pool(&self) -> &NonEmpty<String> {
        &self.pool
    }

    fn pick(&self) -> &str {
        let index = rand::thread_rng().gen_range(0..self.pool.len());
        self.pool.get(index).unwrap_or(&self.pool.head)
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<String, String>> {
        // A panic while holding the lock cannot leave the cache half-updated
        self.assignments
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
