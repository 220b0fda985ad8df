//! Subject Trie for subscription matching
//!
//! A token-keyed prefix tree. Each node has literal children, at most one
//! `*` child, the values whose pattern ends at the node, and the values whose
//! pattern is the node's prefix followed by `>`.
//!
//! Performance optimizations:
//! - Uses compact_str for memory-efficient token storage
//! - Uses SmallVec to avoid heap allocation for typical subject depths
//!
//! Empty nodes are left in place on removal.

use ahash::AHashMap;
use compact_str::CompactString;
use smallvec::SmallVec;

use super::validation::{SubjectError, ANY, REST, SEPARATOR};

/// Node in the subject trie
#[derive(Debug)]
struct TrieNode<V> {
    /// Values whose pattern ends exactly at this node
    values: Vec<V>,
    /// Children indexed by literal token
    children: AHashMap<CompactString, TrieNode<V>>,
    /// Single-token wildcard (*) child
    any: Option<Box<TrieNode<V>>>,
    /// Values for patterns ending in `>` at this position
    rest: Vec<V>,
}

impl<V> TrieNode<V> {
    fn new() -> Self {
        Self {
            values: Vec::new(),
            children: AHashMap::with_capacity(4),
            any: None,
            rest: Vec::new(),
        }
    }
}

impl<V> Default for TrieNode<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Subject Trie for subscription matching
#[derive(Debug)]
pub struct SubjectTrie<V> {
    root: TrieNode<V>,
    len: usize,
}

impl<V> SubjectTrie<V> {
    pub fn new() -> Self {
        Self {
            root: TrieNode::new(),
            len: 0,
        }
    }

    /// Number of stored values
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Insert a value under a pattern
    ///
    /// Fails without touching the trie when `>` is not the last token.
    pub fn insert(&mut self, pattern: &str, value: V) -> Result<(), SubjectError> {
        if pattern.split(SEPARATOR).rev().skip(1).any(|level| level == REST) {
            return Err(SubjectError::RestNotLast);
        }

        let mut levels = pattern.split(SEPARATOR).peekable();
        let mut node = &mut self.root;

        while let Some(level) = levels.next() {
            if level == REST {
                node.rest.push(value);
                self.len += 1;
                return Ok(());
            }

            node = if level == ANY {
                node.any.get_or_insert_with(|| Box::new(TrieNode::new())).as_mut()
            } else {
                node.children.entry(CompactString::new(level)).or_default()
            };

            if levels.peek().is_none() {
                node.values.push(value);
                self.len += 1;
                return Ok(());
            }
        }

        Ok(())
    }

    /// Remove the first value under `pattern` for which `pred` returns true
    pub fn remove<F>(&mut self, pattern: &str, mut pred: F) -> Option<V>
    where
        F: FnMut(&V) -> bool,
    {
        let mut levels = pattern.split(SEPARATOR).peekable();
        let mut node = &mut self.root;

        while let Some(level) = levels.next() {
            let is_last = levels.peek().is_none();

            let list = if level == REST {
                if !is_last {
                    return None;
                }
                &mut node.rest
            } else {
                node = if level == ANY {
                    node.any.as_deref_mut()?
                } else {
                    node.children.get_mut(level)?
                };
                if !is_last {
                    continue;
                }
                &mut node.values
            };

            let pos = list.iter().position(&mut pred)?;
            self.len -= 1;
            return Some(list.remove(pos));
        }

        None
    }

    /// Remove every value for which `pred` returns true, returning how many were removed
    pub fn remove_where<F>(&mut self, mut pred: F) -> usize
    where
        F: FnMut(&V) -> bool,
    {
        let removed = Self::remove_where_recursive(&mut self.root, &mut pred);
        self.len -= removed;
        removed
    }

    fn remove_where_recursive<F>(node: &mut TrieNode<V>, pred: &mut F) -> usize
    where
        F: FnMut(&V) -> bool,
    {
        let before = node.values.len() + node.rest.len();
        node.values.retain(|v| !pred(v));
        node.rest.retain(|v| !pred(v));
        let mut removed = before - node.values.len() - node.rest.len();

        if let Some(ref mut child) = node.any {
            removed += Self::remove_where_recursive(child, pred);
        }
        for child in node.children.values_mut() {
            removed += Self::remove_where_recursive(child, pred);
        }
        removed
    }

    /// Visit every value whose pattern matches a literal subject
    ///
    /// At each depth the walk follows the literal child and the `*` child and
    /// collects the node's `>` values, so several paths are explored.
    pub fn matches<F>(&self, subject: &str, mut callback: F)
    where
        F: FnMut(&V),
    {
        let levels: SmallVec<[&str; 8]> = subject.split(SEPARATOR).collect();
        Self::matches_recursive(&self.root, &levels, 0, &mut callback);
    }

    fn matches_recursive<F>(node: &TrieNode<V>, levels: &[&str], index: usize, callback: &mut F)
    where
        F: FnMut(&V),
    {
        if index >= levels.len() {
            node.values.iter().for_each(|v| callback(v));
            return;
        }

        // '>' needs at least one remaining token, which we have here
        node.rest.iter().for_each(|v| callback(v));

        if let Some(ref child) = node.any {
            Self::matches_recursive(child, levels, index + 1, callback);
        }

        if let Some(child) = node.children.get(levels[index]) {
            Self::matches_recursive(child, levels, index + 1, callback);
        }
    }

    /// Visit every stored value
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&V),
    {
        Self::for_each_recursive(&self.root, &mut f);
    }

    fn for_each_recursive<F>(node: &TrieNode<V>, f: &mut F)
    where
        F: FnMut(&V),
    {
        node.values.iter().chain(node.rest.iter()).for_each(|v| f(v));
        if let Some(ref child) = node.any {
            Self::for_each_recursive(child, f);
        }
        for child in node.children.values() {
            Self::for_each_recursive(child, f);
        }
    }
}

impl<V> Default for SubjectTrie<V> {
    fn default() -> Self {
        Self::new()
    }
}
