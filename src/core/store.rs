//! Addressable key-value storage for the column population.
//!
//! The store can run as a single in-memory map or be partitioned across
//! several backing maps. Partition assignment is round-robin by insertion
//! sequence number, not by key hash: the k-th inserted element lands in
//! partition `k mod num_partitions`. With one partition this degenerates
//! exactly to a plain map, which is the contract the equivalence tests
//! exploit. Keys are not derivable from the partition index, so lookups
//! probe the partitions in order.
//!
//! The insertion counter is the only shared mutable state touched during
//! parallel initialization and is incremented atomically before the
//! partition is chosen.

use crate::error::{HtmError, Result};
use fxhash::FxHashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Storage contract shared by the single-map baseline and the partitioned
/// backend. Enumeration order is partition-major, then insertion order
/// within each partition.
pub trait AddressableStore<V: Clone> {
    /// Inserts a new entry. Inserting an existing key is an addressing
    /// error, never a silent overwrite.
    fn add(&self, key: usize, value: V) -> Result<()>;

    /// Returns the value stored under `key`.
    fn get(&self, key: usize) -> Result<V>;

    /// Whether any partition holds `key`.
    fn contains_key(&self, key: usize) -> bool;

    /// Removes and returns the entry stored under `key`.
    fn remove(&self, key: usize) -> Result<V>;

    /// Total number of entries across all partitions.
    fn len(&self) -> usize;

    /// Whether the store holds no entries.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys in enumeration order: partition-major, insertion order within
    /// each partition.
    fn keys_ordered(&self) -> Vec<usize>;

    /// Updates existing keys in place; keys not yet present are inserted
    /// through the regular round-robin path.
    fn add_or_update(&self, batch: Vec<(usize, V)>) -> Result<()>;

    /// Entry count per partition. Distributed-only; the single-map baseline
    /// reports an unsupported operation.
    fn partition_lens(&self) -> Result<Vec<usize>>;
}

/// One backing map plus its insertion log, so enumeration stays in
/// insertion order.
#[derive(Debug)]
struct Partition<V> {
    slots: FxHashMap<usize, V>,
    order: Vec<usize>,
}

// Manual impl: an empty partition needs no `V: Default`.
impl<V> Default for Partition<V> {
    fn default() -> Self {
        Self {
            slots: FxHashMap::default(),
            order: Vec::new(),
        }
    }
}

impl<V> Partition<V> {
    fn insert(&mut self, key: usize, value: V) {
        self.slots.insert(key, value);
        self.order.push(key);
    }

    fn remove(&mut self, key: usize) -> Option<V> {
        let value = self.slots.remove(&key)?;
        self.order.retain(|&k| k != key);
        Some(value)
    }
}

/// A key-value store distributed across multiple backing maps.
#[derive(Debug)]
pub struct PartitionedStore<V> {
    partitions: Vec<Mutex<Partition<V>>>,
    /// Monotonic insertion sequence number; the k-th insert goes to
    /// partition `k mod num_partitions`.
    insertions: AtomicUsize,
}

impl<V: Clone> PartitionedStore<V> {
    /// Creates a store with the given number of partitions.
    pub fn new(num_partitions: usize) -> Result<Self> {
        if num_partitions == 0 {
            return Err(HtmError::InvalidConfig {
                name: "num_partitions",
                message: "a partitioned store needs at least one partition".to_string(),
            });
        }
        Ok(Self {
            partitions: (0..num_partitions).map(|_| Mutex::new(Partition::default())).collect(),
            insertions: AtomicUsize::new(0),
        })
    }

    /// Number of partitions.
    pub fn num_partitions(&self) -> usize {
        self.partitions.len()
    }

    fn lock(&self, partition: usize) -> std::sync::MutexGuard<'_, Partition<V>> {
        // Lock poisoning only happens after a panic in another worker, at
        // which point the run is already lost.
        self.partitions[partition]
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<V: Clone> AddressableStore<V> for PartitionedStore<V> {
    fn add(&self, key: usize, value: V) -> Result<()> {
        // The duplicate check and the insert take different partition
        // locks, so concurrent adds must use distinct keys (as parallel
        // column initialization does). Duplicate detection is only
        // reliable for sequential callers.
        if self.contains_key(key) {
            return Err(HtmError::DuplicateKey { key });
        }
        let sequence = self.insertions.fetch_add(1, Ordering::SeqCst);
        let partition = sequence % self.partitions.len();
        self.lock(partition).insert(key, value);
        Ok(())
    }

    fn get(&self, key: usize) -> Result<V> {
        for partition in 0..self.partitions.len() {
            if let Some(value) = self.lock(partition).slots.get(&key) {
                return Ok(value.clone());
            }
        }
        Err(HtmError::KeyNotFound { key })
    }

    fn contains_key(&self, key: usize) -> bool {
        (0..self.partitions.len()).any(|p| self.lock(p).slots.contains_key(&key))
    }

    fn remove(&self, key: usize) -> Result<V> {
        for partition in 0..self.partitions.len() {
            if let Some(value) = self.lock(partition).remove(key) {
                return Ok(value);
            }
        }
        Err(HtmError::KeyNotFound { key })
    }

    fn len(&self) -> usize {
        (0..self.partitions.len()).map(|p| self.lock(p).slots.len()).sum()
    }

    fn keys_ordered(&self) -> Vec<usize> {
        let mut keys = Vec::with_capacity(self.len());
        for partition in 0..self.partitions.len() {
            keys.extend(self.lock(partition).order.iter().copied());
        }
        keys
    }

    fn add_or_update(&self, batch: Vec<(usize, V)>) -> Result<()> {
        'next: for (key, value) in batch {
            for partition in 0..self.partitions.len() {
                let mut guard = self.lock(partition);
                if let Some(slot) = guard.slots.get_mut(&key) {
                    *slot = value;
                    continue 'next;
                }
            }
            self.add(key, value)?;
        }
        Ok(())
    }

    fn partition_lens(&self) -> Result<Vec<usize>> {
        Ok((0..self.partitions.len()).map(|p| self.lock(p).slots.len()).collect())
    }
}

/// The plain single-map baseline the partitioned store must be
/// observationally identical to. Used as the reference side of the
/// equivalence tests; it refuses distributed-only operations.
#[derive(Debug)]
pub struct SingleMapStore<V> {
    inner: Mutex<Partition<V>>,
}

impl<V: Clone> SingleMapStore<V> {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Partition::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Partition<V>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<V: Clone> Default for SingleMapStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone> AddressableStore<V> for SingleMapStore<V> {
    fn add(&self, key: usize, value: V) -> Result<()> {
        let mut guard = self.lock();
        if guard.slots.contains_key(&key) {
            return Err(HtmError::DuplicateKey { key });
        }
        guard.insert(key, value);
        Ok(())
    }

    fn get(&self, key: usize) -> Result<V> {
        self.lock().slots.get(&key).cloned().ok_or(HtmError::KeyNotFound { key })
    }

    fn contains_key(&self, key: usize) -> bool {
        self.lock().slots.contains_key(&key)
    }

    fn remove(&self, key: usize) -> Result<V> {
        self.lock().remove(key).ok_or(HtmError::KeyNotFound { key })
    }

    fn len(&self) -> usize {
        self.lock().slots.len()
    }

    fn keys_ordered(&self) -> Vec<usize> {
        self.lock().order.clone()
    }

    fn add_or_update(&self, batch: Vec<(usize, V)>) -> Result<()> {
        let mut guard = self.lock();
        for (key, value) in batch {
            if let Some(slot) = guard.slots.get_mut(&key) {
                *slot = value;
            } else {
                guard.insert(key, value);
            }
        }
        Ok(())
    }

    fn partition_lens(&self) -> Result<Vec<usize>> {
        Err(HtmError::UnsupportedOperation {
            operation: "partition_lens",
            backend: "SingleMapStore",
        })
    }
}
