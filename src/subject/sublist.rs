//! Subscription registry
//!
//! Wraps a [`SubjectTrie`] of [`Subscription`]s behind a single lock. Writers
//! (SUB, UNSUB, disconnect) take it exclusively, so a match walk never
//! observes a half-applied mutation.

use parking_lot::RwLock;
use smallvec::SmallVec;

use super::trie::SubjectTrie;
use super::validation::SubjectError;
use super::{ClientId, Subscription};

/// Thread-safe subscription store using the subject trie
pub struct Sublist {
    trie: RwLock<SubjectTrie<Subscription>>,
}

impl Sublist {
    pub fn new() -> Self {
        Self {
            trie: RwLock::new(SubjectTrie::new()),
        }
    }

    /// Add a subscription under its pattern
    pub fn insert(&self, subscription: Subscription) -> Result<(), SubjectError> {
        let pattern = subscription.pattern.clone();
        self.trie.write().insert(pattern.as_str(), subscription)
    }

    /// Remove the subscription `sid` owned by `client_id` from `pattern`
    pub fn remove(&self, pattern: &str, client_id: ClientId, sid: &str) -> Option<Subscription> {
        self.trie
            .write()
            .remove(pattern, |s| s.client_id == client_id && s.sid.as_ref() == sid)
    }

    /// Remove all subscriptions for a client
    pub fn remove_client(&self, client_id: ClientId) -> usize {
        self.trie.write().remove_where(|s| s.client_id == client_id)
    }

    /// Find all subscriptions matching a literal subject
    ///
    /// Performance: Uses SmallVec to avoid heap allocation for typical workloads
    pub fn matches(&self, subject: &str) -> SmallVec<[Subscription; 16]> {
        let trie = self.trie.read();
        let mut result: SmallVec<[Subscription; 16]> = SmallVec::new();
        trie.matches(subject, |sub| result.push(sub.clone()));
        result
    }

    /// Find all matching subscriptions using a callback to avoid allocation
    ///
    /// The read lock is held while `callback` runs.
    #[cfg(test)]
    pub(crate) fn matches_with_callback<F>(&self, subject: &str, callback: F)
    where
        F: FnMut(&Subscription),
    {
        self.trie.read().matches(subject, callback);
    }

    /// Total number of subscriptions
    pub fn count(&self) -> usize {
        self.trie.read().len()
    }

    /// Number of subscriptions owned by one client
    #[cfg(test)]
    pub(crate) fn client_count(&self, client_id: ClientId) -> usize {
        let mut count = 0;
        self.trie.read().for_each(|s| {
            if s.client_id == client_id {
                count += 1;
            }
        });
        count
    }
}

impl Default for Sublist {
    fn default() -> Self {
        Self::new()
    }
}
