//! Homeostatic plasticity: detecting when the learned representation of a
//! fixed input set has stopped changing.
//!
//! The controller observes one `(input, active columns)` pair per full
//! compute cycle, always from the orchestrating loop and never from inside
//! the parallel region, so it needs no internal locking. Inputs are reduced
//! to hash signatures; per signature the controller tracks the last SDR,
//! a short history of active-column counts, and how many consecutive
//! cycles the SDR has been unchanged.
//!
//! Two states: **Unstable** (initial, the "new-born" stage where boosting
//! shakes the column population) and **Stable**. Once every seen pattern
//! has held still for the configured number of cycles and the minimum cycle
//! count has passed, the controller fires its callback once with
//! `is_stable = true`. Falling back to instability afterwards re-fires the
//! callback with `is_stable = false`; a healthy run never does that, so
//! callers may treat it as a configuration problem.

use crate::core::connections::Connections;
use crate::core::serialization::{fixed, TextReader, TextSerializable, TextWriter};
use crate::error::{HtmError, Result};
use fxhash::FxHashMap;
use std::io::{BufRead, Write};

/// Length of the per-pattern active-column-count history window.
const COUNT_WINDOW: usize = 5;

/// Tuning knobs of the stability detector.
#[derive(Debug, Clone)]
pub struct HpcParams {
    /// Minimum number of cycles before the controller may declare
    /// stability. Also the length of the new-born stage: once reached,
    /// boosting is switched off in `Connections`.
    pub min_cycles: usize,

    /// How many consecutive unchanged cycles every pattern needs before
    /// the pooler counts as stable.
    pub num_of_cycles_to_wait_on_change: usize,

    /// Minimum similarity between consecutive SDRs of the same pattern for
    /// the cycle to count as unchanged.
    pub required_similarity: f32,
}

impl Default for HpcParams {
    fn default() -> Self {
        Self {
            min_cycles: 100,
            num_of_cycles_to_wait_on_change: 50,
            required_similarity: 0.97,
        }
    }
}

/// Payload of the stability callback.
#[derive(Debug, Clone, PartialEq)]
pub struct StabilityEvent {
    /// True when the pooler entered the stable state, false on a
    /// regression back to instability.
    pub is_stable: bool,

    /// Number of distinct input patterns seen so far.
    pub num_patterns: usize,

    /// Rolling average size of the active-column set of the pattern that
    /// triggered the transition.
    pub avg_active_columns: f32,

    /// Total inputs observed when the transition fired.
    pub cycle: usize,
}

/// Callback invoked on every stability transition.
pub type StabilityCallback = Box<dyn FnMut(StabilityEvent) + Send>;

/// Book-keeping for one input signature.
#[derive(Debug, Default)]
struct PatternState {
    /// The SDR produced for this pattern in its previous presentation.
    last_sdr: Vec<usize>,
    /// Active-column counts of the last few presentations.
    counts: [u32; COUNT_WINDOW],
    /// Consecutive presentations with an unchanged SDR.
    stable_cycles: usize,
}

/// Watches the active-column stream and signals the stability transition.
pub struct HomeostaticPlasticityController {
    params: HpcParams,
    patterns: FxHashMap<u64, PatternState>,
    cycle: usize,
    is_stable: bool,
    boosting_disabled: bool,
    callback: Option<StabilityCallback>,
}

impl HomeostaticPlasticityController {
    /// Creates a controller; the callback fires on every transition.
    pub fn new(params: HpcParams, callback: Option<StabilityCallback>) -> Self {
        Self {
            params,
            patterns: FxHashMap::default(),
            cycle: 0,
            is_stable: false,
            boosting_disabled: false,
            callback,
        }
    }

    /// Whether the pooler is currently considered stable.
    pub fn is_stable(&self) -> bool {
        self.is_stable
    }

    /// Number of distinct input patterns observed.
    pub fn num_patterns(&self) -> usize {
        self.patterns.len()
    }

    /// Total compute cycles observed.
    pub fn cycle(&self) -> usize {
        self.cycle
    }

    /// Observes one compute cycle. `active` is the sorted active-column
    /// set the pooler produced for `input`. Returns the stability state
    /// after this cycle.
    pub fn compute(
        &mut self,
        conn: &mut Connections,
        input: &[bool],
        active: &[usize],
    ) -> bool {
        let signature = fxhash::hash64(input);

        if let Some(state) = self.patterns.get_mut(&signature) {
            state.counts.rotate_left(1);
            state.counts[COUNT_WINDOW - 1] = active.len() as u32;

            // End of the new-born stage: from here on the representation
            // must settle without the boosting mechanism stirring it.
            if self.cycle >= self.params.min_cycles && !self.boosting_disabled {
                conn.disable_boosting();
                self.boosting_disabled = true;
            }

            let similarity = sdr_similarity(&state.last_sdr, active);
            state.last_sdr = active.to_vec();

            if similarity >= self.params.required_similarity {
                if avg_delta(&state.counts) == 0.0 {
                    state.stable_cycles += 1;
                } else {
                    state.stable_cycles = 0;
                }

                let wait = self.params.num_of_cycles_to_wait_on_change;
                if self.cycle >= self.params.min_cycles
                    && self.patterns[&signature].stable_cycles > wait
                    && self
                        .patterns
                        .values()
                        .all(|state| state.stable_cycles >= wait)
                    && !self.is_stable
                {
                    self.is_stable = true;
                    self.emit(signature, active.len());
                }
            } else {
                self.patterns.get_mut(&signature).unwrap().stable_cycles = 0;
                if self.is_stable {
                    // A settled pattern started moving again; this should
                    // never happen in a healthy run.
                    log::warn!(
                        "pattern destabilized in cycle {} (similarity {:.3})",
                        self.cycle,
                        similarity
                    );
                    self.is_stable = false;
                    self.emit(signature, active.len());
                }
            }
        } else {
            self.patterns.insert(
                signature,
                PatternState {
                    last_sdr: active.to_vec(),
                    ..Default::default()
                },
            );
        }

        self.cycle += 1;
        self.is_stable
    }

    fn emit(&mut self, signature: u64, fallback_count: usize) {
        let avg_active_columns = self
            .patterns
            .get(&signature)
            .map(|state| {
                let sum: u32 = state.counts.iter().sum();
                sum as f32 / COUNT_WINDOW as f32
            })
            .unwrap_or(fallback_count as f32);

        let event = StabilityEvent {
            is_stable: self.is_stable,
            num_patterns: self.patterns.len(),
            avg_active_columns,
            cycle: self.cycle,
        };
        log::debug!(
            "stability transition: stable={} patterns={} cycle={}",
            event.is_stable,
            event.num_patterns,
            event.cycle
        );
        if let Some(callback) = self.callback.as_mut() {
            callback(event);
        }
    }
}

impl TextSerializable for HomeostaticPlasticityController {
    const TYPE_NAME: &'static str = "HomeostaticPlasticityController";

    fn write_body<W: Write>(&self, writer: &mut TextWriter<W>) -> Result<()> {
        writer.values(&[
            self.params.min_cycles,
            self.params.num_of_cycles_to_wait_on_change,
        ])?;
        writer.values(&[self.params.required_similarity])?;
        writer.values(&[
            self.cycle.to_string(),
            self.is_stable.to_string(),
            self.boosting_disabled.to_string(),
        ])?;
        writer.values(&[self.patterns.len()])?;

        // Hash maps iterate in arbitrary order; sorting by signature keeps
        // the output byte-stable across runs.
        let mut signatures: Vec<u64> = self.patterns.keys().copied().collect();
        signatures.sort_unstable();
        for signature in signatures {
            let state = &self.patterns[&signature];
            let mut line = vec![signature.to_string(), state.stable_cycles.to_string()];
            line.extend(state.counts.iter().map(u32::to_string));
            writer.values(&line)?;
            writer.values(&state.last_sdr)?;
        }
        Ok(())
    }

    /// The callback is not serializable; a restored controller starts
    /// without one.
    fn read_body<R: BufRead>(reader: &mut TextReader<R>) -> Result<Self> {
        let [min_cycles, num_of_cycles_to_wait_on_change] = fixed::<usize, 2>(reader.parsed()?)?;
        let [required_similarity] = fixed::<f32, 1>(reader.parsed()?)?;

        let flags = reader.values()?;
        if flags.len() != 3 {
            return Err(HtmError::Serialization(format!(
                "controller state line expects 3 values, found {}",
                flags.len()
            )));
        }
        let cycle = flags[0]
            .parse::<usize>()
            .map_err(|_| HtmError::Serialization(format!("cannot parse cycle '{}'", flags[0])))?;
        let parse_bool = |raw: &str| {
            raw.parse::<bool>()
                .map_err(|_| HtmError::Serialization(format!("cannot parse flag '{raw}'")))
        };
        let is_stable = parse_bool(&flags[1])?;
        let boosting_disabled = parse_bool(&flags[2])?;

        let [num_patterns] = fixed::<usize, 1>(reader.parsed()?)?;
        let mut patterns = FxHashMap::default();
        for _ in 0..num_patterns {
            let head = reader.values()?;
            if head.len() != 2 + COUNT_WINDOW {
                return Err(HtmError::Serialization(format!(
                    "pattern line expects {} values, found {}",
                    2 + COUNT_WINDOW,
                    head.len()
                )));
            }
            let parse = |raw: &str| {
                raw.parse::<u64>()
                    .map_err(|_| HtmError::Serialization(format!("cannot parse '{raw}'")))
            };
            let signature = parse(&head[0])?;
            let stable_cycles = parse(&head[1])? as usize;
            let mut counts = [0u32; COUNT_WINDOW];
            for (slot, raw) in counts.iter_mut().zip(&head[2..]) {
                *slot = parse(raw)? as u32;
            }
            let last_sdr = reader.parsed::<usize>()?;
            patterns.insert(
                signature,
                PatternState {
                    last_sdr,
                    counts,
                    stable_cycles,
                },
            );
        }

        Ok(Self {
            params: HpcParams {
                min_cycles,
                num_of_cycles_to_wait_on_change,
                required_similarity,
            },
            patterns,
            cycle,
            is_stable,
            boosting_disabled,
            callback: None,
        })
    }
}

/// Similarity of two sorted index sets: shared elements over the larger
/// set size. Empty-vs-empty counts as identical.
fn sdr_similarity(a: &[usize], b: &[usize]) -> f32 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let longer = a.len().max(b.len());
    let mut shared = 0usize;
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                shared += 1;
                i += 1;
                j += 1;
            }
        }
    }
    shared as f32 / longer as f32
}

/// Average absolute difference between consecutive history entries; zero
/// means the active-column count has stopped moving.
fn avg_delta(counts: &[u32; COUNT_WINDOW]) -> f32 {
    let total: u32 = counts
        .windows(2)
        .map(|pair| pair[0].abs_diff(pair[1]))
        .sum();
    total as f32 / (COUNT_WINDOW - 1) as f32
}
