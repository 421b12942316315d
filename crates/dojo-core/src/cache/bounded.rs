use std::collections::HashMap;

use thiserror::Error;

/// Capacity used when no explicit size is configured.
/// Large enough to hold a couple of list pages plus the detail views
/// reached from them.
pub const DEFAULT_MAX_SIZE: usize = 20;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("Invalid cache size {0}: capacity must be at least 1")]
    InvalidCapacity(usize),
}

#[derive(Debug, Clone)]
struct Node<V> {
    key: String,
    value: V,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Fixed-capacity key/value store with least-recently-used eviction.
///
/// Entries live in a slab of nodes linked by index into a doubly linked list
/// ordered from least (`head`) to most (`tail`) recently used, with a map from
/// key to slot for O(1) lookup. Freed slots are recycled through `free`.
#[derive(Debug, Clone)]
pub struct BoundedCache<V> {
    max_size: usize,
    index: HashMap<String, usize>,
    nodes: Vec<Option<Node<V>>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl<V> Default for BoundedCache<V> {
    fn default() -> Self {
        Self::with_capacity_unchecked(DEFAULT_MAX_SIZE)
    }
}

impl<V> BoundedCache<V> {
    /// Create a cache holding at most `max_size` entries.
    pub fn new(max_size: usize) -> Result<Self, CacheError> {
        if max_size == 0 {
            return Err(CacheError::InvalidCapacity(max_size));
        }
        Ok(Self::with_capacity_unchecked(max_size))
    }

    fn with_capacity_unchecked(max_size: usize) -> Self {
        // Grow on demand past the default; max_size may be huge
        let reserve = max_size.min(DEFAULT_MAX_SIZE);
        Self {
            max_size,
            index: HashMap::with_capacity(reserve),
            nodes: Vec::with_capacity(reserve),
            free: Vec::new(),
            head: None,
            tail: None,
        }
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Look up `key` and mark it most recently used.
    pub fn get(&mut self, key: &str) -> Option<&V> {
        let slot = *self.index.get(key)?;
        self.move_to_back(slot);
        self.nodes[slot].as_ref().map(|node| &node.value)
    }

    /// Look up `key` without touching recency.
    pub fn peek(&self, key: &str) -> Option<&V> {
        let slot = *self.index.get(key)?;
        self.nodes[slot].as_ref().map(|node| &node.value)
    }

    /// Insert or overwrite `key`, making it most recently used.
    ///
    /// Returns the evicted `(key, value)` when a new key pushed the cache
    /// past capacity. Overwriting an existing key never evicts.
    pub fn set(&mut self, key: impl Into<String>, value: V) -> Option<(String, V)> {
        let key = key.into();

        if let Some(&slot) = self.index.get(&key) {
            if let Some(node) = self.nodes[slot].as_mut() {
                node.value = value;
            }
            self.move_to_back(slot);
            return None;
        }

        let evicted = if self.index.len() >= self.max_size {
            self.pop_front()
        } else {
            None
        };

        let node = Node {
            key: key.clone(),
            value,
            prev: None,
            next: None,
        };
        let slot = match self.free.pop() {
            Some(slot) => {
                self.nodes[slot] = Some(node);
                slot
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        };
        self.push_back(slot);
        self.index.insert(key, slot);

        evicted
    }

    /// Remove `key`, returning whether an entry was present.
    pub fn delete(&mut self, key: &str) -> bool {
        self.remove(key).is_some()
    }

    /// Remove `key` and hand back its value.
    pub fn remove(&mut self, key: &str) -> Option<V> {
        let slot = self.index.remove(key)?;
        self.unlink(slot);
        self.release(slot).map(|node| node.value)
    }

    pub fn clear(&mut self) {
        self.index.clear();
        self.nodes.clear();
        self.free.clear();
        self.head = None;
        self.tail = None;
    }

    /// Keys from least to most recently used. Does not affect recency;
    /// clone the iterator (or call again) to restart.
    pub fn keys(&self) -> Keys<'_, V> {
        Keys { iter: self.iter() }
    }

    /// Entries from least to most recently used.
    pub fn iter(&self) -> Iter<'_, V> {
        Iter {
            cache: self,
            cursor: self.head,
            remaining: self.len(),
        }
    }

    fn pop_front(&mut self) -> Option<(String, V)> {
        let slot = self.head?;
        self.unlink(slot);
        let node = self.release(slot)?;
        self.index.remove(&node.key);
        Some((node.key, node.value))
    }

    fn release(&mut self, slot: usize) -> Option<Node<V>> {
        let node = self.nodes[slot].take();
        self.free.push(slot);
        node
    }

    fn move_to_back(&mut self, slot: usize) {
        if self.tail == Some(slot) {
            return;
        }
        self.unlink(slot);
        self.push_back(slot);
    }

    fn push_back(&mut self, slot: usize) {
        let old_tail = self.tail;
        if let Some(node) = self.nodes[slot].as_mut() {
            node.prev = old_tail;
            node.next = None;
        }
        match old_tail {
            Some(tail) => {
                if let Some(node) = self.nodes[tail].as_mut() {
                    node.next = Some(slot);
                }
            }
            None => self.head = Some(slot),
        }
        self.tail = Some(slot);
    }

    fn unlink(&mut self, slot: usize) {
        let (prev, next) = match self.nodes[slot].as_mut() {
            Some(node) => (node.prev.take(), node.next.take()),
            None => return,
        };
        match prev {
            Some(p) => {
                if let Some(node) = self.nodes[p].as_mut() {
                    node.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(n) => {
                if let Some(node) = self.nodes[n].as_mut() {
                    node.prev = prev;
                }
            }
            None => self.tail = prev,
        }
    }
}

/// Iterator over cache entries, oldest first.
#[derive(Debug)]
pub struct Iter<'a, V> {
    cache: &'a BoundedCache<V>,
    cursor: Option<usize>,
    remaining: usize,
}

impl<V> Clone for Iter<'_, V> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache,
            cursor: self.cursor,
            remaining: self.remaining,
        }
    }
}

impl<'a, V> Iterator for Iter<'a, V> {
    type Item = (&'a str, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let slot = self.cursor?;
        let node = self.cache.nodes[slot].as_ref()?;
        self.cursor = node.next;
        self.remaining = self.remaining.saturating_sub(1);
        Some((node.key.as_str(), &node.value))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<V> ExactSizeIterator for Iter<'_, V> {}

/// Iterator over cache keys, oldest first.
#[derive(Debug)]
pub struct Keys<'a, V> {
    iter: Iter<'a, V>,
}

impl<V> Clone for Keys<'_, V> {
    fn clone(&self) -> Self {
        Self {
            iter: self.iter.clone(),
        }
    }
}

impl<'a, V> Iterator for Keys<'a, V> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        self.iter.next().map(|(key, _)| key)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.iter.size_hint()
    }
}

impl<V> ExactSizeIterator for Keys<'_, V> {}

// ============================================================================
// Tests
// ============================================================================
