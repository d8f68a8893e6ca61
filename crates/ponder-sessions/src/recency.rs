//! Arena-backed doubly-linked recency list.
//!
//! Keys are ordered from least to most recently touched. Nodes live in a
//! `Vec` and link to each other by slot index, so touching a key, removing
//! it and finding the oldest key are all O(1) and never reorder anything
//! else. Freed slots are recycled.

/// Stable handle to a node in a [`RecencyList`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeRef(usize);

#[derive(Debug)]
struct Node<K> {
    key: K,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Touch-ordered list of keys (oldest at the head, newest at the tail).
#[derive(Debug)]
pub struct RecencyList<K> {
    slots: Vec<Option<Node<K>>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
}

impl<K> RecencyList<K> {
    /// Empty list.
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            len: 0,
        }
    }

    /// Number of linked keys.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether no keys are linked.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Insert `key` at the newest end.
    pub fn push_newest(&mut self, key: K) -> NodeRef {
        let node = Node {
            key,
            prev: self.tail,
            next: None,
        };
        let idx = if let Some(idx) = self.free.pop() {
            self.slots[idx] = Some(node);
            idx
        } else {
            self.slots.push(Some(node));
            self.slots.len() - 1
        };
        match self.tail {
            Some(t) => self.node_mut(t).next = Some(idx),
            None => self.head = Some(idx),
        }
        self.tail = Some(idx);
        self.len += 1;
        NodeRef(idx)
    }

    /// Move a node to the newest end. Stale handles are ignored.
    pub fn touch(&mut self, node: NodeRef) {
        if !self.is_linked(node) || self.tail == Some(node.0) {
            return;
        }
        self.unlink(node.0);
        let idx = node.0;
        self.node_mut(idx).prev = self.tail;
        self.node_mut(idx).next = None;
        if let Some(t) = self.tail {
            self.node_mut(t).next = Some(idx);
        } else {
            self.head = Some(idx);
        }
        self.tail = Some(idx);
    }

    /// Unlink a node and return its key. Stale handles return `None`.
    pub fn remove(&mut self, node: NodeRef) -> Option<K> {
        if !self.is_linked(node) {
            return None;
        }
        self.unlink(node.0);
        self.len -= 1;
        self.free.push(node.0);
        self.slots[node.0].take().map(|n| n.key)
    }

    /// Oldest node and its key.
    pub fn oldest(&self) -> Option<(NodeRef, &K)> {
        let idx = self.head?;
        Some((NodeRef(idx), &self.node(idx).key))
    }

    /// Node touched right after `node`, if any.
    pub fn newer(&self, node: NodeRef) -> Option<(NodeRef, &K)> {
        if !self.is_linked(node) {
            return None;
        }
        let idx = self.node(node.0).next?;
        Some((NodeRef(idx), &self.node(idx).key))
    }

    /// Keys from oldest to newest.
    pub fn iter_oldest_first(&self) -> impl Iterator<Item = &K> + '_ {
        std::iter::successors(self.head, move |&idx| self.node(idx).next)
            .map(move |idx| &self.node(idx).key)
    }

    /// Keys from newest to oldest.
    pub fn iter_newest_first(&self) -> impl Iterator<Item = &K> + '_ {
        std::iter::successors(self.tail, move |&idx| self.node(idx).prev)
            .map(move |idx| &self.node(idx).key)
    }

    fn is_linked(&self, node: NodeRef) -> bool {
        matches!(self.slots.get(node.0), Some(Some(_)))
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = {
            let n = self.node(idx);
            (n.prev, n.next)
        };
        match prev {
            Some(p) => self.node_mut(p).next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.node_mut(n).prev = prev,
            None => self.tail = prev,
        }
    }

    // Internal links only ever point at occupied slots.
    fn node(&self, idx: usize) -> &Node<K> {
        match &self.slots[idx] {
            Some(n) => n,
            None => unreachable!("recency list link to vacant slot {idx}"),
        }
    }

    fn node_mut(&mut self, idx: usize) -> &mut Node<K> {
        match &mut self.slots[idx] {
            Some(n) => n,
            None => unreachable!("recency list link to vacant slot {idx}"),
        }
    }
}

impl<K> Default for RecencyList<K> {
    fn default() -> Self {
        Self::new()
    }
}
