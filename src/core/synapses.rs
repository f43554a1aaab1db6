//! Proximal synapses, stored as one flat arena for all columns.
//!
//! Every column owns a contiguous stride within a single vector of
//! synapses. A synapse links one input bit to its column and carries a
//! permanence value in `[0, 1]`; it counts as connected once the permanence
//! reaches the connected threshold. The set of source indices of a column is
//! fixed at initialization, only permanences mutate afterwards.
//!
//! Within each stride the synapses are kept pivot-sorted so the connected
//! ones sit at the front; the overlap loop then scans only the connected
//! prefix. Because strides are disjoint, the learning phase can hand out
//! one mutable stride per column to parallel workers without any locking.

use crate::core::config::HtmConfig;
use rand::Rng;
use rayon::prelude::*;
use std::ops::Range;

/// A proximal synapse: one input bit plus the strength of the connection.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Synapse {
    /// The input bit this synapse reads.
    pub source: u32,

    /// Connection strength in `[0, 1]`.
    pub permanence: f32,
}

/// The permanence bounds and increments a column update needs, extracted
/// from the configuration once per call site.
#[derive(Debug, Clone, Copy)]
pub struct PermanenceOptions {
    pub active_inc: f32,
    pub inactive_dec: f32,
    pub connected: f32,
    pub below_stimulus_inc: f32,
    pub trim_threshold: f32,
}

impl From<&HtmConfig> for PermanenceOptions {
    fn from(config: &HtmConfig) -> Self {
        Self {
            active_inc: config.syn_perm_active_inc,
            inactive_dec: config.syn_perm_inactive_dec,
            connected: config.syn_perm_connected,
            below_stimulus_inc: config.syn_perm_below_stimulus_inc,
            trim_threshold: config.syn_perm_trim_threshold,
        }
    }
}

/// A flat pool of potential synapses for all columns.
#[derive(Debug)]
pub struct SynapseArena {
    /// All synapses; column `c` occupies `[c * stride, c * stride + len[c])`.
    synapses: Vec<Synapse>,

    /// Number of synapses actually used per column.
    len_per_column: Vec<usize>,

    /// Number of connected synapses per column after pivot sorting.
    connected_per_column: Vec<usize>,

    /// Capacity reserved per column.
    stride: usize,
}

/// Mutable view of one column's synapses, handed to parallel workers.
pub struct ColumnSynapses<'a> {
    /// The owning column's flat index.
    pub column: usize,
    /// The column's used synapse slots.
    pub synapses: &'a mut [Synapse],
    connected: &'a mut usize,
}

impl SynapseArena {
    /// Creates an arena for `num_columns` columns with room for `stride`
    /// synapses each.
    pub fn new(num_columns: usize, stride: usize) -> Self {
        Self {
            synapses: vec![Synapse::default(); num_columns * stride],
            len_per_column: vec![0; num_columns],
            connected_per_column: vec![0; num_columns],
            stride,
        }
    }

    /// Capacity reserved per column.
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Number of columns the arena was sized for.
    pub fn num_columns(&self) -> usize {
        self.len_per_column.len()
    }

    /// Fills a column's stride from its potential pool. Permanences are
    /// drawn so that roughly `init_connected_pct` of them start above the
    /// connected threshold and the rest below it; values under the trim
    /// threshold collapse to zero.
    pub fn init_column<R: Rng>(
        &mut self,
        column: usize,
        potential: &[usize],
        init_connected_pct: f32,
        options: &PermanenceOptions,
        rng: &mut R,
    ) {
        assert!(
            potential.len() <= self.stride,
            "potential pool of column {} exceeds the arena stride",
            column
        );
        let start = column * self.stride;
        for (slot, &source) in self.synapses[start..start + potential.len()]
            .iter_mut()
            .zip(potential)
        {
            let raw = if rng.random::<f32>() <= init_connected_pct {
                options.connected + (1.0 - options.connected) * rng.random::<f32>()
            } else {
                options.connected * rng.random::<f32>()
            };
            // Round to 5 decimals so serialized snapshots stay short.
            let rounded = (raw * 100_000.0).round() / 100_000.0;
            *slot = Synapse {
                source: source as u32,
                permanence: if rounded > options.trim_threshold { rounded } else { 0.0 },
            };
        }
        self.len_per_column[column] = potential.len();
        self.handle_mut(column).pivot_sort(options.connected);
    }

    /// Restores one column from serialized state, bypassing the RNG path.
    pub fn restore_column(&mut self, column: usize, synapses: &[Synapse], connected: usize) {
        assert!(synapses.len() <= self.stride);
        let start = column * self.stride;
        self.synapses[start..start + synapses.len()].copy_from_slice(synapses);
        self.len_per_column[column] = synapses.len();
        self.connected_per_column[column] = connected;
    }

    fn used_range(&self, column: usize) -> Range<usize> {
        let start = column * self.stride;
        start..start + self.len_per_column[column]
    }

    /// All synapses of a column.
    pub fn column(&self, column: usize) -> &[Synapse] {
        &self.synapses[self.used_range(column)]
    }

    /// The connected prefix of a column's synapses.
    pub fn connected(&self, column: usize) -> &[Synapse] {
        let start = column * self.stride;
        &self.synapses[start..start + self.connected_per_column[column]]
    }

    /// Number of connected synapses of a column.
    pub fn connected_len(&self, column: usize) -> usize {
        self.connected_per_column[column]
    }

    /// Mutable view of one column, for the sequential call sites.
    pub fn handle_mut(&mut self, column: usize) -> ColumnSynapses<'_> {
        let range = self.used_range(column);
        ColumnSynapses {
            column,
            synapses: &mut self.synapses[range],
            connected: &mut self.connected_per_column[column],
        }
    }

    /// Parallel iterator over per-column mutable views. Strides are
    /// disjoint, so each worker mutates only its own column.
    pub fn par_columns_mut(
        &mut self,
    ) -> impl IndexedParallelIterator<Item = ColumnSynapses<'_>> {
        let stride = self.stride;
        let lens = &self.len_per_column;
        self.synapses
            .par_chunks_mut(stride)
            .zip(self.connected_per_column.par_iter_mut())
            .enumerate()
            .map(move |(column, (chunk, connected))| ColumnSynapses {
                column,
                synapses: &mut chunk[..lens[column]],
                connected,
            })
    }
}

impl ColumnSynapses<'_> {
    /// Hebbian adaptation for a winner column: synapses on active input
    /// bits strengthen, the rest weaken.
    pub fn adapt(&mut self, input: &[bool], options: &PermanenceOptions) {
        for synapse in self.synapses.iter_mut() {
            if input[synapse.source as usize] {
                synapse.permanence += options.active_inc;
            } else {
                synapse.permanence -= options.inactive_dec;
            }
        }
    }

    /// Corrective bump for a column whose overlap duty cycle fell below its
    /// minimum: every permanence rises, active or not.
    pub fn bump_up(&mut self, options: &PermanenceOptions) {
        for synapse in self.synapses.iter_mut() {
            synapse.permanence += options.below_stimulus_inc;
        }
    }

    /// Clamps and trims permanences after an update, raising them first if
    /// the column would otherwise fall short of `stimulus_threshold`
    /// connected synapses, then restores the connected-first ordering.
    pub fn update_permanences(
        &mut self,
        raise: bool,
        stimulus_threshold: usize,
        options: &PermanenceOptions,
    ) {
        if raise {
            self.raise_permanences(stimulus_threshold, options);
        }

        for synapse in self.synapses.iter_mut() {
            if synapse.permanence <= options.trim_threshold {
                synapse.permanence = 0.0;
            } else {
                synapse.permanence = synapse.permanence.clamp(0.0, 1.0);
            }
        }

        self.pivot_sort(options.connected);
    }

    /// Raises every permanence until at least `stimulus_threshold` synapses
    /// are connected, so the column can reach the inhibition step at all.
    fn raise_permanences(&mut self, stimulus_threshold: usize, options: &PermanenceOptions) {
        if stimulus_threshold == 0 {
            return;
        }
        if self.synapses.len() < stimulus_threshold {
            // The potential pool cannot satisfy the threshold; raising
            // forever would loop. Leave the column short and let the
            // zero-active check at compute time surface the misconfiguration.
            log::warn!(
                "column {} has {} potential synapses but stimulus threshold {}",
                self.column,
                self.synapses.len(),
                stimulus_threshold
            );
            return;
        }
        loop {
            let connected = self
                .synapses
                .iter()
                .filter(|s| s.permanence >= options.connected)
                .count();
            if connected >= stimulus_threshold {
                return;
            }
            for synapse in self.synapses.iter_mut() {
                synapse.permanence += options.below_stimulus_inc;
            }
        }
    }

    /// Moves connected synapses to the front of the stride and records the
    /// connected count.
    pub fn pivot_sort(&mut self, connected_threshold: f32) {
        let mut pivot = 0;
        for i in 0..self.synapses.len() {
            if self.synapses[i].permanence >= connected_threshold {
                self.synapses.swap(i, pivot);
                pivot += 1;
            }
        }
        *self.connected = pivot;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn options() -> PermanenceOptions {
        PermanenceOptions {
            active_inc: 0.05,
            inactive_dec: 0.008,
            connected: 0.1,
            below_stimulus_inc: 0.01,
            trim_threshold: 0.025,
        }
    }

    #[test]
    fn init_column_respects_connected_fraction() {
        let mut arena = SynapseArena::new(1, 1000);
        let mut rng = StdRng::seed_from_u64(7);
        let potential: Vec<usize> = (0..1000).collect();
        arena.init_column(0, &potential, 0.5, &options(), &mut rng);

        let connected = arena.connected_len(0);
        // Half the synapses should start connected, give or take sampling noise.
        assert!((350..=650).contains(&connected), "connected = {connected}");
        assert_eq!(arena.column(0).len(), 1000);
    }

    #[test]
    fn pivot_sort_puts_connected_first() {
        let mut arena = SynapseArena::new(1, 4);
        arena.restore_column(
            0,
            &[
                Synapse { source: 0, permanence: 0.05 },
                Synapse { source: 1, permanence: 0.9 },
                Synapse { source: 2, permanence: 0.02 },
                Synapse { source: 3, permanence: 0.3 },
            ],
            0,
        );
        arena.handle_mut(0).pivot_sort(0.1);
        assert_eq!(arena.connected_len(0), 2);
        assert!(arena.connected(0).iter().all(|s| s.permanence >= 0.1));
    }

    #[test]
    fn adapt_moves_permanences_both_ways() {
        let mut arena = SynapseArena::new(1, 2);
        arena.restore_column(
            0,
            &[
                Synapse { source: 0, permanence: 0.5 },
                Synapse { source: 1, permanence: 0.5 },
            ],
            0,
        );
        let opts = options();
        let input = vec![true, false];
        let mut handle = arena.handle_mut(0);
        handle.adapt(&input, &opts);
        assert!((handle.synapses[0].permanence - 0.55).abs() < 1e-6);
        assert!((handle.synapses[1].permanence - 0.492).abs() < 1e-6);
    }

    #[test]
    fn update_permanences_raises_to_stimulus_threshold() {
        let mut arena = SynapseArena::new(1, 3);
        arena.restore_column(
            0,
            &[
                Synapse { source: 0, permanence: 0.01 },
                Synapse { source: 1, permanence: 0.04 },
                Synapse { source: 2, permanence: 0.09 },
            ],
            0,
        );
        let opts = options();
        arena.handle_mut(0).update_permanences(true, 2, &opts);
        assert!(arena.connected_len(0) >= 2);
        assert!(arena.column(0).iter().all(|s| (0.0..=1.0).contains(&s.permanence)));
    }

    #[test]
    fn update_permanences_clamps_and_trims() {
        let mut arena = SynapseArena::new(1, 2);
        arena.restore_column(
            0,
            &[
                Synapse { source: 0, permanence: 1.2 },
                Synapse { source: 1, permanence: 0.01 },
            ],
            0,
        );
        arena.handle_mut(0).update_permanences(false, 0, &options());
        assert_eq!(arena.column(0)[0].permanence, 1.0);
        assert_eq!(arena.column(0)[1].permanence, 0.0);
    }

    #[test]
    fn parallel_views_cover_all_columns() {
        let mut arena = SynapseArena::new(8, 4);
        for column in 0..8 {
            arena.restore_column(
                column,
                &[Synapse { source: column as u32, permanence: 0.2 }],
                1,
            );
        }
        let mut seen: Vec<usize> = arena.par_columns_mut().map(|view| view.column).collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..8).collect::<Vec<_>>());
    }
}
