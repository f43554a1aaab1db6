//! End-to-end training runs: learning, stability detection, persistence.

use anyhow::Result;
use htm_sp::{
    Connections, HomeostaticPlasticityController, HpcParams, HtmConfig, SpatialPooler,
    TextSerializable,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const INPUT_BITS: usize = 500;
const COLUMNS: usize = 2048;
const ACTIVE_COLUMNS: usize = 40;

fn training_config(potential_radius: i32) -> HtmConfig {
    HtmConfig {
        input_dimensions: vec![INPUT_BITS],
        column_dimensions: vec![COLUMNS],
        potential_radius,
        num_active_columns_per_inh_area: ACTIVE_COLUMNS,
        ..Default::default()
    }
}

fn hpc_params() -> HpcParams {
    HpcParams {
        min_cycles: 100,
        num_of_cycles_to_wait_on_change: 15,
        required_similarity: 0.97,
    }
}

/// Every fifth bit of a window of the input space.
fn sparse_pattern(offset: usize, len: usize) -> Vec<bool> {
    (0..INPUT_BITS)
        .map(|i| i >= offset && i < offset + len && (i - offset) % 5 == 0)
        .collect()
}

#[test]
fn single_pattern_run_reaches_a_stable_sdr() -> Result<()> {
    let mut conn = Connections::new(training_config(10))?;
    let mut pooler = SpatialPooler::init(&mut conn)?;

    let transitions = Arc::new(AtomicUsize::new(0));
    let sink = Arc::clone(&transitions);
    let mut hpc = HomeostaticPlasticityController::new(
        hpc_params(),
        Some(Box::new(move |event| {
            assert!(event.is_stable);
            assert_eq!(event.num_patterns, 1);
            sink.fetch_add(1, Ordering::SeqCst);
        })),
    );

    let input = sparse_pattern(0, INPUT_BITS);
    let mut previous: Option<Vec<usize>> = None;
    let mut unchanged_tail = 0;

    for _ in 0..200 {
        let active = pooler.compute(&mut conn, &input, true)?;
        assert_eq!(active.len(), ACTIVE_COLUMNS);
        assert!(active.windows(2).all(|w| w[0] < w[1]));

        if previous.as_deref() == Some(&active) {
            unchanged_tail += 1;
        } else {
            unchanged_tail = 0;
        }
        previous = Some(active.clone());
        hpc.compute(&mut conn, &input, &active);
    }

    assert!(hpc.is_stable());
    assert_eq!(transitions.load(Ordering::SeqCst), 1);
    // Once stable, consecutive cycles produce the identical active set.
    assert!(unchanged_tail >= 15, "only {unchanged_tail} unchanged cycles");
    // Boosting was switched off at the end of the new-born stage.
    assert_eq!(conn.boosting.max_boost, 1.0);
    assert!(conn.boost_factors.iter().all(|&f| f == 1.0));
    Ok(())
}

#[test]
fn disjoint_patterns_learn_disjoint_stable_sdrs() -> Result<()> {
    // Covering the whole input space is a valid potential radius.
    let mut conn = Connections::new(training_config(-1))?;
    let mut pooler = SpatialPooler::init(&mut conn)?;
    let mut hpc = HomeostaticPlasticityController::new(hpc_params(), None);

    let patterns = [sparse_pattern(0, 250), sparse_pattern(250, 250)];
    let mut last_sdrs: [Vec<usize>; 2] = [Vec::new(), Vec::new()];

    for cycle in 0..200 {
        for (pattern, last_sdr) in patterns.iter().zip(last_sdrs.iter_mut()) {
            let active = pooler.compute(&mut conn, pattern, true)?;
            assert_eq!(active.len(), ACTIVE_COLUMNS);
            if hpc.is_stable() && cycle > 0 {
                // After stabilization each pattern maps to its fixed SDR.
                assert_eq!(&active, last_sdr);
            }
            *last_sdr = active.clone();
            hpc.compute(&mut conn, pattern, &active);
        }
    }

    assert!(hpc.is_stable());
    assert_eq!(hpc.num_patterns(), 2);
    // Distinct inputs keep distinct representations.
    assert_ne!(last_sdrs[0], last_sdrs[1]);
    Ok(())
}

#[test]
fn trained_model_survives_a_save_and_reload() -> Result<()> {
    let mut conn = Connections::new(training_config(10))?;
    let mut pooler = SpatialPooler::init(&mut conn)?;
    let input = sparse_pattern(0, INPUT_BITS);

    for _ in 0..50 {
        pooler.compute(&mut conn, &input, true)?;
    }
    let expected = pooler.compute(&mut conn, &input, false)?;

    let text = conn.to_text()?;
    let mut restored = Connections::from_text(&text)?;
    assert_eq!(restored.to_text()?, text);

    let mut reloaded = SpatialPooler::restore(&restored);
    let actual = reloaded.compute(&mut restored, &input, false)?;
    assert_eq!(expected, actual);
    Ok(())
}
