//! The sparse addressable matrix: coordinate math glued to a backing store.
//!
//! A `SparseMatrix` owns a `Topology` for the coordinate/index bijection and
//! an `AddressableStore` for the actual entries. It holds no learning logic;
//! the Spatial Pooler and `Connections` decide what to put in it.

use crate::core::store::AddressableStore;
use crate::core::topology::{CoordinateMapper, Topology};
use crate::error::{HtmError, Result};

/// N-dimensional sparse matrix over an addressable store.
#[derive(Debug)]
pub struct SparseMatrix<V, S> {
    topology: Topology,
    store: S,
    _value: std::marker::PhantomData<V>,
}

impl<V: Clone, S: AddressableStore<V>> SparseMatrix<V, S> {
    /// Creates an empty matrix over the given topology and backing store.
    pub fn new(topology: Topology, store: S) -> Self {
        Self {
            topology,
            store,
            _value: std::marker::PhantomData,
        }
    }

    /// The coordinate mapper of this matrix.
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// The backing store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Stores `value` under a flat index, overwriting an existing entry.
    pub fn set(&self, index: usize, value: V) -> Result<()> {
        self.check_index(index)?;
        self.store.add_or_update(vec![(index, value)])
    }

    /// Stores `value` under a coordinate tuple.
    pub fn set_coords(&self, coordinates: &[usize], value: V) -> Result<()> {
        let index = self.topology.compute_index(coordinates)?;
        self.store.add_or_update(vec![(index, value)])
    }

    /// Inserts a fresh entry under a flat index; duplicate indices are an
    /// addressing error.
    pub fn insert(&self, index: usize, value: V) -> Result<()> {
        self.check_index(index)?;
        self.store.add(index, value)
    }

    /// Returns the entry stored under a flat index.
    pub fn get(&self, index: usize) -> Result<V> {
        self.check_index(index)?;
        self.store.get(index)
    }

    /// Returns the entry stored under a coordinate tuple.
    pub fn get_coords(&self, coordinates: &[usize]) -> Result<V> {
        let index = self.topology.compute_index(coordinates)?;
        self.store.get(index)
    }

    /// Sorted ascending list of occupied flat indices.
    pub fn sparse_indices(&self) -> Vec<usize> {
        let mut indices = self.store.keys_ordered();
        indices.sort_unstable();
        indices
    }

    /// Number of occupied entries.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// Whether the matrix holds no entries.
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Delegates to the topology; part of the matrix surface so callers do
    /// not need to reach into the mapper.
    pub fn compute_index(&self, coordinates: &[usize]) -> Result<usize> {
        self.topology.compute_index(coordinates)
    }

    /// Inverse of [`Self::compute_index`].
    pub fn coordinates(&self, index: usize) -> Result<Vec<usize>> {
        self.topology.coordinates(index)
    }

    fn check_index(&self, index: usize) -> Result<()> {
        let size = self.topology.size();
        if index >= size {
            return Err(HtmError::IndexOutOfBounds { index, size });
        }
        Ok(())
    }
}
