/*!
 * Allow-list Trie
 *
 * Prefix tree over symbol token paths. Each level holds literal edges plus at
 * most one single-token edge and one wildcard edge. Lookup prefers literal
 * edges, then the single-token edge, then the wildcard, backtracking at the
 * point of divergence when a branch fails.
 *
 * A wildcard that ends a stored path is a tail wildcard: it swallows one or
 * more remaining query tokens. A wildcard anywhere else stands for exactly
 * one token. A single-token edge always stands for exactly one token, even
 * at the end of a path.
 */

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One position of a stored path
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PathToken {
    Literal(String),
    Wildcard,
    /// Exactly one token, never a tail
    Single,
}

impl PathToken {
    pub fn literal(token: impl Into<String>) -> Self {
        Self::Literal(token.into())
    }

    #[inline]
    pub fn is_wildcard(&self) -> bool {
        matches!(self, Self::Wildcard)
    }
}

impl From<&str> for PathToken {
    fn from(token: &str) -> Self {
        Self::Literal(token.to_string())
    }
}

impl From<String> for PathToken {
    fn from(token: String) -> Self {
        Self::Literal(token)
    }
}

impl fmt::Display for PathToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(token) => f.write_str(token),
            Self::Wildcard => f.write_str("*"),
            Self::Single => f.write_str("?"),
        }
    }
}

struct Node<V> {
    children: AHashMap<String, Node<V>>,
    single: Option<Box<Node<V>>>,
    wildcard: Option<Box<Node<V>>>,
    value: Option<V>,
}

impl<V> Default for Node<V> {
    fn default() -> Self {
        Self {
            children: AHashMap::new(),
            single: None,
            wildcard: None,
            value: None,
        }
    }
}

/// Token-path trie with literal-first, backtracking wildcard lookup
pub struct AllowlistTrie<V> {
    root: Node<V>,
    len: usize,
}

impl<V> Default for AllowlistTrie<V> {
    fn default() -> Self {
        Self {
            root: Node::default(),
            len: 0,
        }
    }
}

impl<V> AllowlistTrie<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored paths
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Store `value` at `path`, returning the value it replaced
    pub fn put(&mut self, value: V, path: &[PathToken]) -> Option<V> {
        let mut node = &mut self.root;
        for token in path {
            node = match token {
                PathToken::Literal(literal) => {
                    node.children.entry(literal.clone()).or_default()
                }
                PathToken::Wildcard => &mut **node.wildcard.get_or_insert_with(Box::default),
                PathToken::Single => &mut **node.single.get_or_insert_with(Box::default),
            };
        }

        let previous = node.value.replace(value);
        if previous.is_none() {
            self.len += 1;
        }
        previous
    }

    /// Look up a concrete token path
    pub fn retrieve<S: AsRef<str>>(&self, query: &[S]) -> Option<&V> {
        let mut scratch = Vec::new();
        Self::lookup(&self.root, query, &mut scratch)
    }

    /// Look up a concrete token path, appending every token consumed by a
    /// wildcard edge to `captures` in query order.
    ///
    /// `captures` is left untouched when nothing matches.
    pub fn retrieve_with_captures<S: AsRef<str>>(
        &self,
        captures: &mut Vec<String>,
        query: &[S],
    ) -> Option<&V> {
        let mark = captures.len();
        let found = Self::lookup(&self.root, query, captures);
        if found.is_none() {
            captures.truncate(mark);
        }
        found
    }

    fn lookup<'a, S: AsRef<str>>(
        node: &'a Node<V>,
        query: &[S],
        captures: &mut Vec<String>,
    ) -> Option<&'a V> {
        let Some((head, rest)) = query.split_first() else {
            return node.value.as_ref();
        };

        if let Some(child) = node.children.get(head.as_ref()) {
            if let Some(value) = Self::lookup(child, rest, captures) {
                return Some(value);
            }
        }

        let mark = captures.len();
        if let Some(single) = node.single.as_deref() {
            captures.push(head.as_ref().to_string());
            if let Some(value) = Self::lookup(single, rest, captures) {
                return Some(value);
            }
            captures.truncate(mark);
        }

        let wildcard = node.wildcard.as_deref()?;
        captures.push(head.as_ref().to_string());
        if let Some(value) = Self::lookup(wildcard, rest, captures) {
            return Some(value);
        }
        captures.truncate(mark);

        // Tail wildcard: consume the rest of the query
        let value = wildcard.value.as_ref()?;
        captures.extend(query.iter().map(|token| token.as_ref().to_string()));
        Some(value)
    }
}

impl<V: fmt::Debug> fmt::Debug for AllowlistTrie<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AllowlistTrie").field("len", &self.len).finish()
    }
}
