//! The immutable parameter bundle of the Spatial Pooler.
//!
//! All tunable parameters live here, validated once before any column or
//! synapse is created. Configuration problems fail fast at initialization
//! and never surface during `compute`.

use crate::error::{HtmError, Result};
use serde::{Deserialize, Serialize};

/// Parameters of one Spatial Pooler instance.
///
/// The struct is cheap to clone and never mutated after validation. Runtime
/// values derived from it (boost factors, duty-cycle thresholds) live in
/// `Connections`.
///
/// The serde derives let embedding applications load a configuration from
/// any serde-backed format (JSON, TOML); model persistence itself goes
/// through the text schema in `serialization`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HtmConfig {
    /// The shape of the input space.
    pub input_dimensions: Vec<usize>,

    /// The shape of the column grid.
    pub column_dimensions: Vec<usize>,

    /// Radius (in input space) around a column's natural center from which
    /// potential synapses are drawn. `-1` uses the entire input space.
    pub potential_radius: i32,

    /// Fraction of the input bits within the potential radius that become
    /// potential synapses of a column.
    pub potential_pct: f64,

    /// If true, all columns compete in one global inhibition area. If false,
    /// each column competes within its inhibition-radius neighborhood.
    pub global_inhibition: bool,

    /// Number of winners per inhibition area. If zero, `local_area_density`
    /// controls sparsity instead.
    pub num_active_columns_per_inh_area: usize,

    /// Target fraction of active columns per inhibition area, used when
    /// `num_active_columns_per_inh_area` is zero.
    pub local_area_density: f32,

    /// Minimum overlap a column must reach to take part in inhibition.
    /// Overlaps below this value are forced to zero.
    pub stimulus_threshold: f32,

    /// Permanence increment for synapses whose input bit was active.
    pub syn_perm_active_inc: f32,

    /// Permanence decrement for synapses whose input bit was inactive.
    pub syn_perm_inactive_dec: f32,

    /// Permanence threshold above which a synapse counts as connected.
    pub syn_perm_connected: f32,

    /// Permanence increment applied to every synapse of a column whose
    /// overlap duty cycle has fallen below its minimum.
    pub syn_perm_below_stimulus_inc: f32,

    /// Permanences below this value are trimmed to zero after an update.
    pub syn_perm_trim_threshold: f32,

    /// Fraction of each column's synapses that start above the connected
    /// threshold.
    pub init_connected_pct: f32,

    /// Fraction of the maximum overlap duty cycle in the neighborhood below
    /// which a column is considered weak and bumped up.
    pub min_pct_overlap_duty_cycles: f32,

    /// Fraction of the maximum active duty cycle in the neighborhood below
    /// which a column is eligible for boosting.
    pub min_pct_active_duty_cycles: f32,

    /// Window (in cycles) of the duty-cycle moving averages.
    pub duty_cycle_period: u32,

    /// Upper bound of the boost factor. `1.0` disables boosting.
    pub max_boost: f32,

    /// How often (in cycles) the inhibition radius and the minimum duty
    /// cycles are recomputed.
    pub update_period: u32,

    /// If true, neighborhoods wrap around the edges of the space.
    pub wrap_around: bool,

    /// If true, coordinate math uses column-major ordering.
    pub column_major: bool,

    /// Seed of the pseudo-random generator used during initialization.
    pub seed: u64,

    /// Number of partitions of the backing column store. `1` is the plain
    /// non-distributed baseline.
    pub num_partitions: usize,
}

impl Default for HtmConfig {
    fn default() -> Self {
        Self {
            input_dimensions: vec![100],
            column_dimensions: vec![2048],
            potential_radius: 16,
            potential_pct: 0.5,
            global_inhibition: true,
            num_active_columns_per_inh_area: 40,
            local_area_density: 0.0,
            stimulus_threshold: 0.0,
            syn_perm_active_inc: 0.05,
            syn_perm_inactive_dec: 0.008,
            syn_perm_connected: 0.1,
            syn_perm_below_stimulus_inc: 0.01,
            syn_perm_trim_threshold: 0.025,
            init_connected_pct: 0.5,
            min_pct_overlap_duty_cycles: 0.001,
            min_pct_active_duty_cycles: 0.001,
            duty_cycle_period: 1000,
            max_boost: 10.0,
            update_period: 50,
            wrap_around: true,
            column_major: false,
            seed: 42,
            num_partitions: 1,
        }
    }
}

impl HtmConfig {
    /// Total number of input bits.
    pub fn num_inputs(&self) -> usize {
        self.input_dimensions.iter().product()
    }

    /// Total number of columns.
    pub fn num_columns(&self) -> usize {
        self.column_dimensions.iter().product()
    }

    /// The potential radius with the `-1` convention resolved.
    pub fn effective_potential_radius(&self) -> usize {
        if self.potential_radius < 0 {
            self.num_inputs()
        } else {
            self.potential_radius as usize
        }
    }

    /// Checks every parameter range. Called once before initialization;
    /// a failure here means no `Connections` instance is ever built.
    pub fn validate(&self) -> Result<()> {
        if self.input_dimensions.is_empty() || self.input_dimensions.contains(&0) {
            return Err(invalid(
                "input_dimensions",
                format!("dimensions must be nonzero, got {:?}", self.input_dimensions),
            ));
        }
        if self.column_dimensions.is_empty() || self.column_dimensions.contains(&0) {
            return Err(invalid(
                "column_dimensions",
                format!("dimensions must be nonzero, got {:?}", self.column_dimensions),
            ));
        }
        if self.column_dimensions.len() != self.input_dimensions.len() {
            return Err(invalid(
                "column_dimensions",
                format!(
                    "rank {} does not match input rank {}; the column-to-input center mapping needs one input dimension per column dimension",
                    self.column_dimensions.len(),
                    self.input_dimensions.len()
                ),
            ));
        }
        if !(0.0..=1.0).contains(&self.potential_pct) || self.potential_pct == 0.0 {
            return Err(invalid(
                "potential_pct",
                format!("must be in (0, 1], got {}", self.potential_pct),
            ));
        }
        if self.num_active_columns_per_inh_area == 0 && self.local_area_density <= 0.0 {
            return Err(invalid(
                "num_active_columns_per_inh_area",
                "either num_active_columns_per_inh_area or local_area_density must be positive"
                    .to_string(),
            ));
        }
        if self.local_area_density > 0.5 {
            return Err(invalid(
                "local_area_density",
                format!("must be at most 0.5, got {}", self.local_area_density),
            ));
        }
        if self.num_active_columns_per_inh_area > self.num_columns() {
            return Err(invalid(
                "num_active_columns_per_inh_area",
                format!(
                    "{} winners requested but only {} columns exist",
                    self.num_active_columns_per_inh_area,
                    self.num_columns()
                ),
            ));
        }
        if self.stimulus_threshold < 0.0 {
            return Err(invalid(
                "stimulus_threshold",
                format!("must not be negative, got {}", self.stimulus_threshold),
            ));
        }
        for (name, value) in [
            ("syn_perm_active_inc", self.syn_perm_active_inc),
            ("syn_perm_inactive_dec", self.syn_perm_inactive_dec),
            ("syn_perm_connected", self.syn_perm_connected),
            ("syn_perm_below_stimulus_inc", self.syn_perm_below_stimulus_inc),
            ("syn_perm_trim_threshold", self.syn_perm_trim_threshold),
            ("init_connected_pct", self.init_connected_pct),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(HtmError::InvalidConfig {
                    name,
                    message: format!("must be in [0, 1], got {value}"),
                });
            }
        }
        if self.stimulus_threshold > 0.0 && self.syn_perm_below_stimulus_inc == 0.0 {
            return Err(invalid(
                "syn_perm_below_stimulus_inc",
                format!(
                    "must be positive when stimulus_threshold is {}; permanences could never be raised to meet the threshold",
                    self.stimulus_threshold
                ),
            ));
        }
        if self.max_boost < 1.0 {
            return Err(invalid(
                "max_boost",
                format!("must be at least 1.0, got {}", self.max_boost),
            ));
        }
        if self.duty_cycle_period == 0 {
            return Err(invalid("duty_cycle_period", "must be positive".to_string()));
        }
        if self.update_period == 0 {
            return Err(invalid("update_period", "must be positive".to_string()));
        }
        if self.num_partitions == 0 {
            return Err(invalid("num_partitions", "must be positive".to_string()));
        }
        Ok(())
    }
}

fn invalid(name: &'static str, message: String) -> HtmError {
    HtmError::InvalidConfig { name, message }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(HtmConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_zero_dimensions() {
        let config = HtmConfig {
            column_dimensions: vec![64, 0],
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(HtmError::InvalidConfig { name: "column_dimensions", .. })
        ));
    }

    #[test]
    fn rejects_missing_sparsity_control() {
        let config = HtmConfig {
            num_active_columns_per_inh_area: 0,
            local_area_density: 0.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_mismatched_dimension_ranks() {
        let config = HtmConfig {
            input_dimensions: vec![10, 10],
            column_dimensions: vec![64],
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(HtmError::InvalidConfig { name: "column_dimensions", .. })
        ));
    }

    #[test]
    fn rejects_unraisable_stimulus_threshold() {
        let config = HtmConfig {
            stimulus_threshold: 2.0,
            syn_perm_below_stimulus_inc: 0.0,
            init_connected_pct: 0.0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(HtmError::InvalidConfig { name: "syn_perm_below_stimulus_inc", .. })
        ));
        // A zero increment is fine when no threshold has to be met.
        let config = HtmConfig {
            stimulus_threshold: 0.0,
            syn_perm_below_stimulus_inc: 0.0,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_permanence_outside_unit_interval() {
        let config = HtmConfig {
            syn_perm_connected: 1.5,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(HtmError::InvalidConfig { name: "syn_perm_connected", .. })
        ));
    }

    #[test]
    fn negative_potential_radius_covers_whole_input() {
        let config = HtmConfig {
            input_dimensions: vec![25, 4],
            potential_radius: -1,
            ..Default::default()
        };
        assert_eq!(config.effective_potential_radius(), 100);
    }
}
