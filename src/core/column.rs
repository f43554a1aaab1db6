//! A `Column` is the Spatial Pooler's unit of competition: one receptive
//! field into the input space. Columns are created once per flat index at
//! initialization and never destroyed during a run.
//!
//! The column value itself stays small on purpose. All per-column scalar
//! state (overlaps, duty cycles, boost factors) lives in the engine-wide
//! arrays of `Connections`, addressed by the column's flat index, and the
//! proximal synapses live in the flat `SynapseArena`. Keeping parent
//! relationships as indices instead of references is what makes parallel
//! mutation by index range safe.

/// One cortical column, identified by its flat index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    /// The flat index of the column; also its key in the partitioned store
    /// and its slot in the engine-wide arrays.
    pub index: usize,
}

impl Column {
    /// Creates a new column.
    pub fn new(index: usize) -> Self {
        Self { index }
    }
}
