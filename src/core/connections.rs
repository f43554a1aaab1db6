//! The aggregate data model of the pooling layer.
//!
//! `Connections` owns everything the algorithm operates on: the column
//! matrix over the partitioned store, the flat synapse arena, and the
//! engine-wide statistic arrays sized `num_columns`. The Spatial Pooler
//! itself is stateless with respect to this data; it reads and mutates a
//! `Connections` instance.
//!
//! Each compute cycle mutates only the slots belonging to the column being
//! processed. A column's update never reads another column's current-cycle
//! intermediate state, only previous-cycle duty cycles and boost factors,
//! which is what makes the per-column parallel phases safe.

use crate::core::column::Column;
use crate::core::config::HtmConfig;
use crate::core::matrix::SparseMatrix;
use crate::core::store::PartitionedStore;
use crate::core::synapses::SynapseArena;
use crate::core::topology::{CoordinateMapper, Topology};
use crate::error::Result;

/// Runtime boosting knobs, initialized from the configuration.
///
/// They live outside the immutable `HtmConfig` because the homeostatic
/// controller switches boosting off once the new-born stage of a training
/// run is over.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoostingState {
    /// Current upper bound of the boost factor; `1.0` disables boosting.
    pub max_boost: f32,
    /// Current fraction of the neighborhood maximum overlap duty cycle
    /// below which a column is bumped up.
    pub min_pct_overlap_duty_cycles: f32,
    /// Current fraction of the neighborhood maximum active duty cycle used
    /// for the boost eligibility threshold.
    pub min_pct_active_duty_cycles: f32,
}

/// All columns, their synapses, and the engine-wide statistics arrays.
#[derive(Debug)]
pub struct Connections {
    /// The validated parameter bundle this instance was built from.
    pub config: HtmConfig,

    /// Coordinate math of the input space.
    pub input_topology: Topology,

    /// The column population, keyed by flat index in the partitioned store.
    pub columns: SparseMatrix<Column, PartitionedStore<Column>>,

    /// All proximal synapses.
    pub synapses: SynapseArena,

    /// Raw overlap per column for the current cycle.
    pub overlaps: Vec<f32>,

    /// Boost-scaled overlap per column for the current cycle.
    pub boosted_overlaps: Vec<f32>,

    /// Moving average of how often each column had a nonzero overlap.
    pub overlap_duty_cycles: Vec<f32>,

    /// Moving average of how often each column won the inhibition.
    pub active_duty_cycles: Vec<f32>,

    /// Per-column overlap duty-cycle floor; weak columns get bumped up.
    pub min_overlap_duty_cycles: Vec<f32>,

    /// Per-column active duty-cycle floor used by boosting.
    pub min_active_duty_cycles: Vec<f32>,

    /// Multiplier applied to each column's overlap, in `[1.0, max_boost]`.
    pub boost_factors: Vec<f32>,

    /// Activation bitmap of the current cycle.
    pub active_columns: Vec<bool>,

    /// Radius of the local inhibition neighborhoods, in column space.
    pub inhibition_radius: usize,

    /// Runtime boosting knobs.
    pub boosting: BoostingState,
}

impl Connections {
    /// Builds an empty data model from a configuration. Fails fast on any
    /// invalid parameter; columns and synapses are filled in by
    /// `SpatialPooler::init`.
    pub fn new(config: HtmConfig) -> Result<Self> {
        config.validate()?;

        let num_columns = config.num_columns();
        let num_inputs = config.num_inputs();
        let column_topology = Topology::new(&config.column_dimensions, config.column_major);
        let input_topology = Topology::new(&config.input_dimensions, config.column_major);
        let store = PartitionedStore::new(config.num_partitions)?;
        let boosting = BoostingState {
            max_boost: config.max_boost,
            min_pct_overlap_duty_cycles: config.min_pct_overlap_duty_cycles,
            min_pct_active_duty_cycles: config.min_pct_active_duty_cycles,
        };

        Ok(Self {
            input_topology,
            columns: SparseMatrix::new(column_topology, store),
            synapses: SynapseArena::new(num_columns, num_inputs),
            overlaps: vec![0.0; num_columns],
            boosted_overlaps: vec![0.0; num_columns],
            overlap_duty_cycles: vec![0.0; num_columns],
            active_duty_cycles: vec![0.0; num_columns],
            min_overlap_duty_cycles: vec![0.0; num_columns],
            min_active_duty_cycles: vec![0.0; num_columns],
            boost_factors: vec![1.0; num_columns],
            active_columns: vec![false; num_columns],
            inhibition_radius: 1,
            boosting,
            config,
        })
    }

    /// Total number of columns.
    pub fn num_columns(&self) -> usize {
        self.config.num_columns()
    }

    /// Total number of input bits.
    pub fn num_inputs(&self) -> usize {
        self.config.num_inputs()
    }

    /// The column stored under a flat index.
    pub fn column(&self, index: usize) -> Result<Column> {
        self.columns.get(index)
    }

    /// Sorted flat indices of every column in the store.
    pub fn all_columns(&self) -> Vec<usize> {
        self.columns.sparse_indices()
    }

    /// Flat indices of the columns active in the current cycle, ascending.
    pub fn active_column_indices(&self) -> Vec<usize> {
        self.active_columns
            .iter()
            .enumerate()
            .filter_map(|(index, &active)| active.then_some(index))
            .collect()
    }

    /// Average receptive-field span of a column's connected synapses in
    /// input space, averaged over the input dimensions.
    pub fn avg_connected_span(&self, column: usize) -> f32 {
        let connected = self.synapses.connected(column);
        if connected.is_empty() {
            return 0.0;
        }

        let dims = self.input_topology.dimensions().len();
        let mut total_span = 0.0;
        for dim in 0..dims {
            let mut lo = usize::MAX;
            let mut hi = 0;
            for synapse in connected {
                let coord = self
                    .input_topology
                    .coordinates(synapse.source as usize)
                    .expect("synapse sources are valid input indices")[dim];
                lo = lo.min(coord);
                hi = hi.max(coord);
            }
            total_span += (hi - lo + 1) as f32;
        }
        total_span / dims as f32
    }

    /// Ratio of column count to input count, folded over the dimensions.
    pub fn avg_columns_per_input(&self) -> f32 {
        let column_dims = self.columns.topology().dimensions();
        let input_dims = self.input_topology.dimensions();
        let dims = column_dims.len().max(input_dims.len());

        let mut ratio = 1.0;
        for dim in 0..dims {
            let columns = column_dims.get(dim).copied().unwrap_or(1) as f32;
            let inputs = input_dims.get(dim).copied().unwrap_or(1) as f32;
            ratio *= columns / inputs;
        }
        ratio
    }

    /// Recomputes the inhibition radius from the average connected span.
    /// Only local inhibition reads it; under global inhibition it is pinned
    /// to the widest column dimension.
    pub fn update_inhibition_radius(&mut self) {
        if self.config.global_inhibition {
            self.inhibition_radius = self
                .columns
                .topology()
                .dimensions()
                .iter()
                .copied()
                .max()
                .unwrap_or(1);
            return;
        }

        let num_columns = self.num_columns();
        let total_span: f32 = (0..num_columns).map(|c| self.avg_connected_span(c)).sum();
        let avg_span = total_span / num_columns as f32;
        let diameter = avg_span * self.avg_columns_per_input();

        self.inhibition_radius = (((diameter - 1.0) / 2.0).round().max(1.0)) as usize;
    }

    /// Switches boosting off for the rest of the run: factors pinned to
    /// 1.0, duty-cycle floors to zero. Called by the homeostatic controller
    /// once the new-born stage is over.
    pub fn disable_boosting(&mut self) {
        if self.boosting.max_boost == 1.0 {
            return;
        }
        log::debug!("boosting disabled");
        self.boosting.max_boost = 1.0;
        self.boosting.min_pct_overlap_duty_cycles = 0.0;
        self.boosting.min_pct_active_duty_cycles = 0.0;
        self.boost_factors.fill(1.0);
        self.min_overlap_duty_cycles.fill(0.0);
        self.min_active_duty_cycles.fill(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> HtmConfig {
        HtmConfig {
            input_dimensions: vec![32],
            column_dimensions: vec![64],
            num_active_columns_per_inh_area: 4,
            potential_radius: 4,
            ..Default::default()
        }
    }

    #[test]
    fn new_builds_empty_arrays() {
        let conn = Connections::new(small_config()).unwrap();
        assert_eq!(conn.overlaps.len(), 64);
        assert_eq!(conn.boost_factors, vec![1.0; 64]);
        assert!(conn.columns.is_empty());
    }

    #[test]
    fn invalid_config_fails_at_construction() {
        let config = HtmConfig {
            column_dimensions: vec![0],
            ..small_config()
        };
        assert!(Connections::new(config).is_err());
    }

    #[test]
    fn disable_boosting_resets_factors() {
        let mut conn = Connections::new(small_config()).unwrap();
        conn.boost_factors.fill(4.2);
        conn.disable_boosting();
        assert_eq!(conn.boosting.max_boost, 1.0);
        assert_eq!(conn.boost_factors, vec![1.0; 64]);
        assert_eq!(conn.min_overlap_duty_cycles, vec![0.0; 64]);
    }

    #[test]
    fn avg_columns_per_input_folds_dimensions() {
        let config = HtmConfig {
            input_dimensions: vec![10, 10],
            column_dimensions: vec![20, 20],
            ..small_config()
        };
        let conn = Connections::new(config).unwrap();
        assert!((conn.avg_columns_per_input() - 4.0).abs() < 1e-6);
    }
}
