//! The Spatial Pooler algorithm: overlap, boosting, inhibition, learning.
//!
//! The pooler owns no column data. It operates on a `Connections` instance:
//! per cycle it computes each column's overlap with the input, scales it by
//! the column's boost factor, runs the competitive inhibition that enforces
//! sparsity, and (when learning) adapts permanences and duty cycles.
//!
//! Two phases are data-parallel across columns: the overlap computation
//! (read-only over the input and each column's own synapses) and the
//! permanence adaptation (each column touches only its own arena stride and
//! array slots). The inhibition step between them is the synchronization
//! barrier: it runs only after every boosted overlap is final, and learning
//! starts only after the full active set is known.

use crate::core::connections::Connections;
use crate::core::synapses::PermanenceOptions;
use crate::core::topology::CoordinateMapper;
use crate::error::{HtmError, Result};
use rand::rngs::StdRng;
use rand::seq::{IteratorRandom, SliceRandom};
use rand::SeedableRng;
use rayon::prelude::*;
use std::cmp::Ordering;

/// The Spatial Pooler. Holds only the RNG and the cycle counters; all
/// learned state lives in `Connections`.
pub struct SpatialPooler {
    /// Seeded generator used during potential-pool initialization.
    rand: StdRng,

    /// Total compute cycles so far, learning or not.
    pub iteration_num: u32,

    /// Compute cycles so far with learning enabled.
    pub iteration_learn_num: u32,
}

impl SpatialPooler {
    /// Initializes the pooler against an empty `Connections` instance:
    /// creates one column per flat index, samples its potential pool within
    /// the potential radius of the column's natural center, and bootstraps
    /// permanences so a configured fraction start connected.
    pub fn init(conn: &mut Connections) -> Result<Self> {
        let mut pooler = Self {
            rand: StdRng::seed_from_u64(conn.config.seed),
            iteration_num: 0,
            iteration_learn_num: 0,
        };
        pooler.connect_and_configure(conn)?;
        conn.update_inhibition_radius();
        Ok(pooler)
    }

    /// Re-attaches a pooler to a `Connections` instance restored from
    /// serialized state. Skips the synapse bootstrap; cycle counters
    /// restart at zero.
    pub fn restore(conn: &Connections) -> Self {
        Self {
            rand: StdRng::seed_from_u64(conn.config.seed),
            iteration_num: 0,
            iteration_learn_num: 0,
        }
    }

    /// Processes one input vector and returns the active columns, sorted
    /// ascending. Deterministic for a given `(input, Connections state)`;
    /// with `learn == false` it mutates nothing but the cycle counter.
    pub fn compute(
        &mut self,
        conn: &mut Connections,
        input: &[bool],
        learn: bool,
    ) -> Result<Vec<usize>> {
        if input.len() != conn.num_inputs() {
            return Err(HtmError::InvalidConfig {
                name: "input_vector",
                message: format!(
                    "input has {} bits but the input space holds {}",
                    input.len(),
                    conn.num_inputs()
                ),
            });
        }

        self.iteration_num += 1;
        if learn {
            self.iteration_learn_num += 1;
        }

        self.calculate_overlaps(conn, input);
        Self::apply_boost(conn);
        let winners = self.inhibit_columns(conn);

        conn.active_columns.fill(false);
        for &column in &winners {
            conn.active_columns[column] = true;
        }

        if winners.is_empty() && input.iter().any(|&bit| bit) {
            return Err(HtmError::NoActiveColumns {
                cycle: self.iteration_num,
            });
        }

        if learn {
            Self::adapt_synapses(conn, input);
            self.update_duty_cycles(conn);
            Self::bump_up_weak_columns(conn);
            conn.update_inhibition_radius();
            if self.iteration_num % conn.config.update_period == 0 {
                Self::update_min_duty_cycles(conn);
            }
            Self::update_boost_factors(conn);
        }

        Ok(winners)
    }

    /// Overlap phase: for each column, count connected synapses whose
    /// source bit is active. Overlaps below the stimulus threshold are
    /// forced to zero. Runs in parallel; each worker reads only its own
    /// column's synapses.
    pub fn calculate_overlaps(&mut self, conn: &mut Connections, input: &[bool]) {
        let Connections {
            overlaps,
            synapses,
            config,
            ..
        } = conn;
        let arena = &*synapses;
        let stimulus_threshold = config.stimulus_threshold;

        overlaps
            .par_iter_mut()
            .enumerate()
            .for_each(|(column, overlap)| {
                let count = arena
                    .connected(column)
                    .iter()
                    .filter(|synapse| input[synapse.source as usize])
                    .count() as f32;
                *overlap = if count < stimulus_threshold { 0.0 } else { count };
            });
    }

    /// Boosting phase: scale every overlap by the column's boost factor
    /// computed at the end of the previous cycle.
    pub fn apply_boost(conn: &mut Connections) {
        let Connections {
            overlaps,
            boosted_overlaps,
            boost_factors,
            ..
        } = conn;

        boosted_overlaps
            .iter_mut()
            .zip(overlaps.iter())
            .zip(boost_factors.iter())
            .for_each(|((boosted, &overlap), &factor)| {
                *boosted = overlap * factor;
            });
    }

    /// Inhibition phase: the global reduction barrier between the parallel
    /// overlap and learning phases. Ties are broken by column index, lower
    /// index wins, so the result is deterministic.
    pub fn inhibit_columns(&self, conn: &Connections) -> Vec<usize> {
        if conn.config.global_inhibition {
            Self::inhibit_columns_global(conn)
        } else {
            Self::inhibit_columns_local(conn)
        }
    }

    fn winners_per_area(conn: &Connections, area: usize) -> usize {
        let config = &conn.config;
        if config.num_active_columns_per_inh_area > 0 {
            config.num_active_columns_per_inh_area
        } else {
            ((area as f32 * config.local_area_density).round() as usize).max(1)
        }
    }

    /// Selects the top columns by boosted overlap over the whole
    /// population.
    fn inhibit_columns_global(conn: &Connections) -> Vec<usize> {
        let num_columns = conn.num_columns();
        let boosted = &conn.boosted_overlaps;
        let target = Self::winners_per_area(conn, num_columns).min(num_columns);

        let mut candidates: Vec<usize> = (0..num_columns).collect();
        candidates.sort_unstable_by(|&a, &b| {
            boosted[b]
                .partial_cmp(&boosted[a])
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.cmp(&b))
        });

        // Columns with no overlap at all never compete, even when the
        // stimulus threshold is zero.
        let cutoff = candidates
            .iter()
            .position(|&column| {
                boosted[column] <= 0.0 || boosted[column] < conn.config.stimulus_threshold
            })
            .unwrap_or(num_columns);

        let mut winners: Vec<usize> = candidates[..cutoff.min(target)].to_vec();
        winners.sort_unstable();
        winners
    }

    /// Runs the top-k selection independently within every column's
    /// inhibition neighborhood.
    fn inhibit_columns_local(conn: &Connections) -> Vec<usize> {
        let boosted = &conn.boosted_overlaps;
        let topology = conn.columns.topology();
        let radius = conn.inhibition_radius;
        let wrap = conn.config.wrap_around;
        let stimulus_threshold = conn.config.stimulus_threshold;

        let mut winners = Vec::new();
        for column in 0..conn.num_columns() {
            let score = boosted[column];
            if score <= 0.0 || score < stimulus_threshold {
                continue;
            }

            let mut area = 0;
            let mut beaten_by = 0;
            for neighbor in topology.neighborhood(column, radius, wrap) {
                area += 1;
                if neighbor == column {
                    continue;
                }
                let other = boosted[neighbor];
                if other > score || (other == score && neighbor < column) {
                    beaten_by += 1;
                }
            }

            if beaten_by < Self::winners_per_area(conn, area) {
                winners.push(column);
            }
        }
        winners
    }

    /// Learning phase, part one: every active column strengthens synapses
    /// on active input bits and weakens the rest, clamped to `[0, 1]`.
    /// Parallel; each worker owns exactly one column's arena stride.
    pub fn adapt_synapses(conn: &mut Connections, input: &[bool]) {
        let Connections {
            synapses,
            active_columns,
            config,
            ..
        } = conn;
        let options = PermanenceOptions::from(&*config);
        let stimulus_threshold = (config.stimulus_threshold + 0.5) as usize;
        let active = &*active_columns;

        synapses.par_columns_mut().for_each(|mut view| {
            if active[view.column] {
                view.adapt(input, &options);
                view.update_permanences(true, stimulus_threshold, &options);
            }
        });
    }

    /// Learning phase, part two: exponential moving averages of overlap and
    /// activation frequency, over a window capped at `duty_cycle_period`.
    pub fn update_duty_cycles(&self, conn: &mut Connections) {
        let period = self.iteration_num.min(conn.config.duty_cycle_period) as f32;

        conn.overlap_duty_cycles
            .iter_mut()
            .zip(&conn.overlaps)
            .for_each(|(duty, &overlap)| {
                let value = if overlap > 0.0 { 1.0 } else { 0.0 };
                *duty = clamp_duty((*duty * (period - 1.0) + value) / period);
            });

        conn.active_duty_cycles
            .iter_mut()
            .zip(&conn.active_columns)
            .for_each(|(duty, &active)| {
                let value = if active { 1.0 } else { 0.0 };
                *duty = clamp_duty((*duty * (period - 1.0) + value) / period);
            });
    }

    /// Learning phase, part three: columns whose overlap duty cycle fell
    /// below their minimum get all permanences raised, a corrective measure
    /// independent of the active/inactive rule.
    pub fn bump_up_weak_columns(conn: &mut Connections) {
        let Connections {
            synapses,
            overlap_duty_cycles,
            min_overlap_duty_cycles,
            config,
            ..
        } = conn;
        let options = PermanenceOptions::from(&*config);
        let stimulus_threshold = (config.stimulus_threshold + 0.5) as usize;
        let duty = &*overlap_duty_cycles;
        let floor = &*min_overlap_duty_cycles;

        synapses.par_columns_mut().for_each(|mut view| {
            if duty[view.column] < floor[view.column] {
                view.bump_up(&options);
                view.update_permanences(true, stimulus_threshold, &options);
            }
        });
    }

    /// Refreshes the per-column duty-cycle floors from the neighborhood
    /// maxima. Runs every `update_period` cycles.
    pub fn update_min_duty_cycles(conn: &mut Connections) {
        if conn.config.global_inhibition {
            let max_overlap = conn.overlap_duty_cycles.iter().fold(0.0f32, |a, &b| a.max(b));
            let max_active = conn.active_duty_cycles.iter().fold(0.0f32, |a, &b| a.max(b));
            conn.min_overlap_duty_cycles
                .fill(conn.boosting.min_pct_overlap_duty_cycles * max_overlap);
            conn.min_active_duty_cycles
                .fill(conn.boosting.min_pct_active_duty_cycles * max_active);
            return;
        }

        let radius = conn.inhibition_radius;
        let wrap = conn.config.wrap_around;
        for column in 0..conn.num_columns() {
            let mut max_overlap = 0.0f32;
            let mut max_active = 0.0f32;
            for neighbor in conn.columns.topology().neighborhood(column, radius, wrap) {
                max_overlap = max_overlap.max(conn.overlap_duty_cycles[neighbor]);
                max_active = max_active.max(conn.active_duty_cycles[neighbor]);
            }
            conn.min_overlap_duty_cycles[column] =
                conn.boosting.min_pct_overlap_duty_cycles * max_overlap;
            conn.min_active_duty_cycles[column] =
                conn.boosting.min_pct_active_duty_cycles * max_active;
        }
    }

    /// Recomputes the boost factors for the next cycle from the
    /// just-updated active duty cycles. A column at or above the maximum
    /// duty cycle of its inhibition neighborhood gets factor 1.0; below it
    /// the factor rises on an exponential curve bounded by `max_boost`.
    pub fn update_boost_factors(conn: &mut Connections) {
        let max_boost = conn.boosting.max_boost;
        if max_boost <= 1.0 {
            conn.boost_factors.fill(1.0);
            return;
        }

        if conn.config.global_inhibition {
            let max_duty = conn.active_duty_cycles.iter().fold(0.0f32, |a, &b| a.max(b));
            for (factor, &duty) in conn.boost_factors.iter_mut().zip(&conn.active_duty_cycles) {
                *factor = boost_factor(duty, max_duty, max_boost);
            }
            return;
        }

        let radius = conn.inhibition_radius;
        let wrap = conn.config.wrap_around;
        let mut factors = vec![1.0f32; conn.num_columns()];
        for (column, factor) in factors.iter_mut().enumerate() {
            let max_duty = conn
                .columns
                .topology()
                .neighborhood(column, radius, wrap)
                .map(|neighbor| conn.active_duty_cycles[neighbor])
                .fold(0.0f32, f32::max);
            *factor = boost_factor(conn.active_duty_cycles[column], max_duty, max_boost);
        }
        conn.boost_factors = factors;
    }

    /// Builds every column and its potential synapses.
    fn connect_and_configure(&mut self, conn: &mut Connections) -> Result<()> {
        let num_columns = conn.num_columns();
        let stimulus_threshold = (conn.config.stimulus_threshold + 0.5) as usize;
        let options = PermanenceOptions::from(&conn.config);
        let init_connected_pct = conn.config.init_connected_pct;

        for column in 0..num_columns {
            conn.columns
                .insert(column, crate::core::column::Column::new(column))?;

            let potential = self.map_potential(conn, column);
            conn.synapses
                .init_column(column, &potential, init_connected_pct, &options, &mut self.rand);
            conn.synapses
                .handle_mut(column)
                .update_permanences(true, stimulus_threshold, &options);
        }
        Ok(())
    }

    /// Samples the potential pool of one column: all input bits within the
    /// potential radius of the column's natural center, thinned down to the
    /// configured fraction.
    fn map_potential(&mut self, conn: &Connections, column: usize) -> Vec<usize> {
        let center = Self::map_column(conn, column);
        let radius = conn.config.effective_potential_radius();
        let neighborhood = conn
            .input_topology
            .neighborhood(center, radius, conn.config.wrap_around);

        let available = neighborhood.size_hint().0;
        let sample_size = Self::potential_pool_size(conn, available);
        let mut sample = neighborhood.choose_multiple(&mut self.rand, sample_size);
        sample.shuffle(&mut self.rand);
        sample
    }

    /// Number of potential synapses for a neighborhood of `available` input
    /// bits. Always at least one, so no column is born silent.
    fn potential_pool_size(conn: &Connections, available: usize) -> usize {
        (((available as f64 * conn.config.potential_pct) + 0.5) as usize).max(1)
    }

    /// Maps a column's flat index to its natural center in input space by
    /// scaling its coordinates proportionally, offset by half a cell.
    fn map_column(conn: &Connections, column: usize) -> usize {
        let column_dims = conn.columns.topology().dimensions();
        let input_dims = conn.input_topology.dimensions();

        let coords: Vec<usize> = conn
            .columns
            .topology()
            .coordinates(column)
            .expect("column indices are in range")
            .into_iter()
            .zip(column_dims)
            .zip(input_dims)
            .map(|((coord, &col_dim), &in_dim)| {
                let scaled = (coord as f32 / col_dim as f32) * in_dim as f32
                    + (in_dim as f32 / col_dim as f32) * 0.5;
                (scaled as usize).min(in_dim - 1)
            })
            .collect();

        conn.input_topology
            .compute_index(&coords)
            .expect("scaled coordinates stay in the input space")
    }
}

/// Exponential boost curve: 1.0 at or above the neighborhood maximum duty
/// cycle, `max_boost` at zero.
fn boost_factor(duty: f32, neighborhood_max: f32, max_boost: f32) -> f32 {
    if neighborhood_max <= 0.0 || duty >= neighborhood_max {
        return 1.0;
    }
    max_boost
        .powf(1.0 - duty / neighborhood_max)
        .clamp(1.0, max_boost)
}

/// Duty cycles are moving averages of indicator values and must stay in
/// `[0, 1]`; anything else is a programming error, clamped and logged so a
/// long training run survives it.
fn clamp_duty(duty: f32) -> f32 {
    if (0.0..=1.0).contains(&duty) {
        duty
    } else {
        log::warn!("duty cycle {duty} outside [0, 1], clamping");
        duty.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::HtmConfig;

    fn config() -> HtmConfig {
        HtmConfig {
            input_dimensions: vec![64],
            column_dimensions: vec![128],
            potential_radius: 8,
            num_active_columns_per_inh_area: 8,
            ..Default::default()
        }
    }

    fn pattern(len: usize, step: usize) -> Vec<bool> {
        (0..len).map(|i| i % step == 0).collect()
    }

    #[test]
    fn init_creates_every_column() {
        let mut conn = Connections::new(config()).unwrap();
        let _pooler = SpatialPooler::init(&mut conn).unwrap();
        assert_eq!(conn.all_columns().len(), 128);
        for column in 0..128 {
            assert!(!conn.synapses.column(column).is_empty());
        }
    }

    #[test]
    fn same_seed_same_pools() {
        let mut a = Connections::new(config()).unwrap();
        let mut b = Connections::new(config()).unwrap();
        SpatialPooler::init(&mut a).unwrap();
        SpatialPooler::init(&mut b).unwrap();
        for column in 0..128 {
            assert_eq!(a.synapses.column(column), b.synapses.column(column));
        }
    }

    #[test]
    fn compute_without_learning_is_pure() {
        let mut conn = Connections::new(config()).unwrap();
        let mut pooler = SpatialPooler::init(&mut conn).unwrap();
        let input = pattern(64, 3);

        let first = pooler.compute(&mut conn, &input, false).unwrap();
        let second = pooler.compute(&mut conn, &input, false).unwrap();
        assert_eq!(first, second);
        assert!(!first.is_empty());
    }

    #[test]
    fn global_inhibition_selects_exactly_k() {
        let mut conn = Connections::new(config()).unwrap();
        let mut pooler = SpatialPooler::init(&mut conn).unwrap();
        let winners = pooler.compute(&mut conn, &pattern(64, 2), true).unwrap();
        assert_eq!(winners.len(), 8);
        assert!(winners.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn ties_break_toward_lower_indices() {
        let mut conn = Connections::new(config()).unwrap();
        let _pooler = SpatialPooler::init(&mut conn).unwrap();
        conn.boosted_overlaps.fill(3.0);
        let winners = SpatialPooler::inhibit_columns_global(&conn);
        assert_eq!(winners, (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn zero_overlap_columns_never_win() {
        let mut conn = Connections::new(config()).unwrap();
        let _pooler = SpatialPooler::init(&mut conn).unwrap();
        conn.boosted_overlaps.fill(0.0);
        conn.boosted_overlaps[3] = 2.0;
        conn.boosted_overlaps[7] = 1.0;

        // Fewer scoring columns than the winner target: the rest must not
        // be padded in with zero overlap.
        assert_eq!(SpatialPooler::inhibit_columns_global(&conn), vec![3, 7]);
        assert_eq!(SpatialPooler::inhibit_columns_local(&conn), vec![3, 7]);
    }

    #[test]
    fn boosted_overlap_is_zero_below_stimulus_threshold() {
        let cfg = HtmConfig {
            stimulus_threshold: 3.0,
            ..config()
        };
        let mut conn = Connections::new(cfg).unwrap();
        let mut pooler = SpatialPooler::init(&mut conn).unwrap();
        // A single active bit cannot reach the threshold anywhere.
        let mut input = vec![false; 64];
        input[10] = true;
        let result = pooler.compute(&mut conn, &input, false);
        assert!(matches!(result, Err(HtmError::NoActiveColumns { .. })));
        assert!(conn.overlaps.iter().all(|&o| o == 0.0));
        assert!(conn.boosted_overlaps.iter().all(|&b| b == 0.0));
    }

    #[test]
    fn silent_input_is_not_an_error() {
        let mut conn = Connections::new(config()).unwrap();
        let mut pooler = SpatialPooler::init(&mut conn).unwrap();
        let winners = pooler.compute(&mut conn, &vec![false; 64], false).unwrap();
        assert!(winners.is_empty());
    }

    #[test]
    fn learning_keeps_numeric_invariants() {
        let mut conn = Connections::new(config()).unwrap();
        let mut pooler = SpatialPooler::init(&mut conn).unwrap();
        let inputs = [pattern(64, 2), pattern(64, 3), pattern(64, 5)];

        for cycle in 0..60 {
            pooler
                .compute(&mut conn, &inputs[cycle % inputs.len()], true)
                .unwrap();
        }

        for column in 0..conn.num_columns() {
            for synapse in conn.synapses.column(column) {
                assert!((0.0..=1.0).contains(&synapse.permanence));
            }
        }
        assert!(conn.overlap_duty_cycles.iter().all(|d| (0.0..=1.0).contains(d)));
        assert!(conn.active_duty_cycles.iter().all(|d| (0.0..=1.0).contains(d)));
        let max_boost = conn.boosting.max_boost;
        assert!(conn
            .boost_factors
            .iter()
            .all(|&f| (1.0..=max_boost).contains(&f)));
    }

    #[test]
    fn boost_factor_curve_endpoints() {
        assert_eq!(boost_factor(0.5, 0.5, 10.0), 1.0);
        assert_eq!(boost_factor(0.8, 0.5, 10.0), 1.0);
        assert!((boost_factor(0.0, 0.5, 10.0) - 10.0).abs() < 1e-6);
        let mid = boost_factor(0.25, 0.5, 10.0);
        assert!(mid > 1.0 && mid < 10.0);
    }

    #[test]
    fn local_inhibition_activates_spread_out_columns() {
        let cfg = HtmConfig {
            global_inhibition: false,
            num_active_columns_per_inh_area: 2,
            ..config()
        };
        let mut conn = Connections::new(cfg).unwrap();
        let mut pooler = SpatialPooler::init(&mut conn).unwrap();
        let winners = pooler.compute(&mut conn, &pattern(64, 2), true).unwrap();
        assert!(!winners.is_empty());
        // Every winner beat its own neighborhood, so no more than two
        // winners share one.
        let radius = conn.inhibition_radius;
        for &winner in &winners {
            let in_neighborhood = conn
                .columns
                .topology()
                .neighborhood(winner, radius, true)
                .filter(|n| winners.contains(n))
                .count();
            assert!(in_neighborhood <= 2 + 1);
        }
    }

    #[test]
    fn mismatched_input_length_is_rejected() {
        let mut conn = Connections::new(config()).unwrap();
        let mut pooler = SpatialPooler::init(&mut conn).unwrap();
        assert!(pooler.compute(&mut conn, &vec![true; 63], false).is_err());
    }
}
