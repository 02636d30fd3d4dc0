// Bounded registry of pending asynchronous operations
//
// Entries are kept in arrival order. Several live entries may share one key;
// lookups return the oldest entry still awaiting the arriving context. When
// the registry is full the oldest entry overall is evicted and handed back to
// the caller.

use crate::context::ExecutionContext;
use fnv::FnvHashMap;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::hash::Hash;

/// First half of an asynchronous operation awaiting its counterpart(s)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingOperation<K> {
    pub key: K,
    /// Timestamp of the half that created the entry
    pub start: u64,
    /// Context of the half that created the entry
    pub source: ExecutionContext,
    /// Contexts still expected; `None` accepts the first arrival from anywhere
    pub awaited: Option<BTreeSet<ExecutionContext>>,
}

impl<K> PendingOperation<K> {
    /// True if an arrival from `context` can complete (part of) this entry
    pub fn accepts(&self, context: ExecutionContext) -> bool {
        match &self.awaited {
            None => true,
            Some(awaited) => awaited.contains(&context),
        }
    }
}

/// Handle of an entry, valid until it is removed or evicted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PendingId(u64);

/// Arrival-ordered, capacity-bounded map of pending entries
#[derive(Debug, Clone)]
pub struct PendingRegistry<K, V> {
    entries: BTreeMap<u64, (K, V)>,
    by_key: FnvHashMap<K, VecDeque<u64>>,
    next_seq: u64,
    capacity: usize,
}

impl<K, V> PendingRegistry<K, V>
where
    K: Clone + Eq + Hash,
{
    /// Registry holding at most `capacity` entries (at least one)
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            by_key: FnvHashMap::default(),
            next_seq: 0,
            capacity: capacity.max(1),
        }
    }

    /// Add an entry, evicting and returning the oldest one if full
    pub fn insert(&mut self, key: K, value: V) -> (PendingId, Option<(K, V)>) {
        let evicted = if self.entries.len() >= self.capacity {
            self.pop_oldest()
        } else {
            None
        };

        let seq = self.next_seq;
        self.next_seq += 1;
        self.by_key.entry(key.clone()).or_default().push_back(seq);
        self.entries.insert(seq, (key, value));
        (PendingId(seq), evicted)
    }

    /// Oldest entry under `key` for which `predicate` holds
    pub fn find<F>(&self, key: &K, mut predicate: F) -> Option<PendingId>
    where
        F: FnMut(&V) -> bool,
    {
        self.by_key.get(key)?.iter().copied().find_map(|seq| {
            let (_, value) = self.entries.get(&seq)?;
            predicate(value).then_some(PendingId(seq))
        })
    }

    pub fn get(&self, id: PendingId) -> Option<&V> {
        self.entries.get(&id.0).map(|(_, value)| value)
    }

    pub fn get_mut(&mut self, id: PendingId) -> Option<&mut V> {
        self.entries.get_mut(&id.0).map(|(_, value)| value)
    }

    /// Remove an entry
    pub fn remove(&mut self, id: PendingId) -> Option<V> {
        let (key, value) = self.entries.remove(&id.0)?;
        self.unlink(&key, id.0);
        Some(value)
    }

    /// Remove and return every entry, oldest first
    pub fn drain(&mut self) -> Vec<(K, V)> {
        self.by_key.clear();
        std::mem::take(&mut self.entries).into_values().collect()
    }

    /// Entries in arrival order
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.entries.values().map(|(key, value)| (key, value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn pop_oldest(&mut self) -> Option<(K, V)> {
        let (seq, (key, value)) = self.entries.pop_first()?;
        self.unlink(&key, seq);
        Some((key, value))
    }

    fn unlink(&mut self, key: &K, seq: u64) {
        if let Some(queue) = self.by_key.get_mut(key) {
            if let Some(pos) = queue.iter().position(|s| *s == seq) {
                queue.remove(pos);
            }
            if queue.is_empty() {
                self.by_key.remove(key);
            }
        }
    }
}
