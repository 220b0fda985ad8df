//! Subject matching and subscription management
//!
//! Implements subject/pattern validation and a subject trie for efficient
//! subscription matching. Subjects are `.`-separated tokens; patterns may use
//! `*` for one token and a trailing `>` for one or more tokens.
//!
//! Performance optimizations:
//! - Uses callback-based matching to avoid intermediate allocations
//! - Uses SmallVec for typical workloads (few matching subscriptions per subject)

mod sublist;
mod trie;
pub mod validation;

pub use sublist::Sublist;
pub use trie::SubjectTrie;
pub use validation::{
    matches, parse_literal, parse_pattern, tokens, Pattern, Subject, SubjectError, Token,
    Validation,
};

use std::fmt;
use std::sync::Arc;

/// Connection identifier, used by subscriptions as a non-owning handle to
/// their connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub u64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cid:{}", self.0)
    }
}

/// A subscription entry
#[derive(Debug, Clone)]
pub struct Subscription {
    /// Owning connection
    pub client_id: ClientId,
    /// Subscriber-chosen id, unique within the owning connection
    pub sid: Arc<str>,
    /// Pattern the subscription was registered under
    pub pattern: Pattern,
}

impl Subscription {
    pub fn new(client_id: ClientId, sid: &str, pattern: Pattern) -> Self {
        Self {
            client_id,
            sid: sid.into(),
            pattern,
        }
    }
}
