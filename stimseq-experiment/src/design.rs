//! Block and sequence design.
//!
//! Omission positions are drawn without replacement from a per-nerve pool
//! that repeats the configured positions just enough times to cover every
//! sequence, so each position is used a near-equal number of times.

use std::collections::BTreeMap;

use rand::seq::SliceRandom;
use rand::Rng;
use stimseq_core::{Block, ConfigError, EventKind, ExperimentPlan, Nerve};

use crate::config::{ExperimentConfig, TriggerMapping};

/// Builds the shuffled block list for one session.
pub fn generate<R: Rng + ?Sized>(
    config: &ExperimentConfig,
    rng: &mut R,
) -> Result<ExperimentPlan, ConfigError> {
    let mut blocks = build_blocks(config, rng)?;
    blocks.shuffle(rng);
    Ok(ExperimentPlan::new(blocks))
}

/// Blocks in construction order (nerve, ISI, repetition), before the shuffle.
pub fn build_blocks<R: Rng + ?Sized>(
    config: &ExperimentConfig,
    rng: &mut R,
) -> Result<Vec<Block>, ConfigError> {
    config.validate()?;

    let mut blocks = Vec::with_capacity(config.total_blocks());

    for nerve in Nerve::STIMULATED {
        let mut pool = balanced_pool(&config.omission_positions, config.draws_per_nerve());
        for &isi in &config.isis {
            for _ in 0..config.n_blocks {
                let positions = (0..config.n_sequences)
                    .map(|_| pool.swap_remove(rng.random_range(0..pool.len())))
                    .collect();
                blocks.extend(Block::stimulation(isi, nerve, positions));
            }
        }
        debug_assert!(pool.is_empty());
    }

    // No omission to balance here: every sequence gets the mean length.
    let per_block = config.n_sequences * config.mean_omission_count();
    for &isi in &config.isis {
        for _ in 0..config.n_no_stim_blocks {
            blocks.push(Block::non_stimulation(isi, per_block));
        }
    }

    Ok(blocks)
}

/// `positions` cycled and cut to exactly `draws` entries. When `draws` is
/// not a multiple of the number of positions the last cycle is cut short.
pub fn balanced_pool(positions: &[u32], draws: usize) -> Vec<u32> {
    positions.iter().copied().cycle().take(draws).collect()
}

/// Expected session length in seconds, breaks included. Operator feedback only.
pub fn estimate_duration(config: &ExperimentConfig) -> f64 {
    let mean = config.mean_omission_count() as f64;
    let n_sequences = config.n_sequences as f64;

    let mut total = config.rest_duration * 2.0;
    for &isi in &config.isis {
        total += config.n_blocks as f64 * n_sequences * isi * mean * 2.0;
        total += config.n_no_stim_blocks as f64 * n_sequences * isi * mean;
    }

    let n_breaks = config.total_blocks() / config.blocks_between_breaks.max(1);
    total + n_breaks as f64 * config.break_duration
}

pub fn count_event_kinds(plan: &ExperimentPlan) -> BTreeMap<EventKind, usize> {
    let mut counts = BTreeMap::new();
    for block in plan {
        for &event in block.events() {
            *counts.entry(event).or_insert(0) += 1;
        }
    }
    counts
}

/// Event counts keyed by the name each trigger code resolves back to, the
/// way an analyst reading the log would see them.
pub fn count_event_labels(
    plan: &ExperimentPlan,
    mapping: &TriggerMapping,
) -> BTreeMap<&'static str, usize> {
    let mut counts = BTreeMap::new();
    for (kind, n) in count_event_kinds(plan) {
        let label = mapping
            .code(kind)
            .and_then(|code| mapping.kind_for(code))
            .map_or("unknown_event", |k| k.label());
        *counts.entry(label).or_insert(0) += n;
    }
    counts
}

/// How often each omission position was drawn, per stimulated nerve.
pub fn omission_balance(plan: &ExperimentPlan) -> BTreeMap<Nerve, BTreeMap<u32, usize>> {
    let mut balance = BTreeMap::new();
    for nerve in Nerve::STIMULATED {
        let mut counts = BTreeMap::new();
        for pos in plan.drawn_positions(nerve) {
            *counts.entry(pos).or_insert(0) += 1;
        }
        balance.insert(nerve, counts);
    }
    balance
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn small_config() -> ExperimentConfig {
        ExperimentConfig {
            isis: vec![1.0],
            n_sequences: 2,
            n_blocks: 1,
            n_no_stim_blocks: 1,
            omission_positions: vec![4, 5],
            ..Default::default()
        }
    }

    #[test]
    fn small_session_layout() {
        let plan = generate(&small_config(), &mut StdRng::seed_from_u64(7)).unwrap();
        assert_eq!(plan.len(), 3);

        for nerve in Nerve::STIMULATED {
            let mut drawn = plan.drawn_positions(nerve);
            drawn.sort_unstable();
            assert_eq!(drawn, vec![4, 5]);
            let block = plan.iter().find(|b| b.nerve() == nerve).unwrap();
            assert_eq!(block.len(), 9);
        }

        let none = plan.iter().find(|b| b.nerve() == Nerve::None).unwrap();
        assert_eq!(none.len(), 8);
        assert!(none.omission_positions().is_empty());
    }

    #[test]
    fn same_seed_same_plan() {
        let config = ExperimentConfig::default();
        let a = generate(&config, &mut StdRng::seed_from_u64(42)).unwrap();
        let b = generate(&config, &mut StdRng::seed_from_u64(42)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn invalid_config_is_rejected_before_drawing() {
        let config = ExperimentConfig {
            omission_positions: vec![],
            ..Default::default()
        };
        assert_eq!(
            generate(&config, &mut StdRng::seed_from_u64(0)),
            Err(ConfigError::EmptyOmissionPositions)
        );
    }

    #[test]
    fn oversized_config_fails_before_allocating() {
        let config = ExperimentConfig {
            n_blocks: usize::MAX / 2,
            ..Default::default()
        };
        assert_eq!(
            generate(&config, &mut StdRng::seed_from_u64(0)),
            Err(ConfigError::PlanTooLarge {
                limit: crate::config::MAX_PLAN_EVENTS
            })
        );
    }

    #[test]
    fn pool_is_cut_short_when_not_divisible() {
        assert_eq!(balanced_pool(&[4, 5, 6], 7), vec![4, 5, 6, 4, 5, 6, 4]);
        assert_eq!(balanced_pool(&[4, 5], 4), vec![4, 5, 4, 5]);
        assert!(balanced_pool(&[4], 0).is_empty());
    }

    #[test]
    fn estimate_matches_hand_calculation() {
        let config = ExperimentConfig {
            isis: vec![0.5, 1.0],
            n_sequences: 5,
            n_blocks: 2,
            n_no_stim_blocks: 1,
            omission_positions: vec![4, 5, 6],
            blocks_between_breaks: 3,
            rest_duration: 60.0,
            break_duration: 10.0,
            ..Default::default()
        };
        // mean 5; stim 2 * 5 * 5 * 1.5 * 2 = 150; no-stim 5 * 5 * 1.5 = 37.5
        // blocks 2 * (2*2 + 1) = 10 -> 3 breaks
        let expected = 120.0 + 150.0 + 37.5 + 30.0;
        assert!((estimate_duration(&config) - expected).abs() < 1e-9);
    }

    #[test]
    fn labels_resolve_through_mapping() {
        let plan = generate(&small_config(), &mut StdRng::seed_from_u64(1)).unwrap();
        let labels = count_event_labels(&plan, &TriggerMapping::default());
        assert_eq!(labels["omis_tibial"], 2);
        assert_eq!(labels["omis_median"], 2);
        assert_eq!(labels["stim_tibial"], 7);
        assert_eq!(labels["non_stim"], 8);
        assert!(!labels.contains_key("unknown_event"));
    }

    #[test]
    fn aliased_codes_resolve_to_first_kind() {
        let mapping = TriggerMapping::new(TriggerMapping::default().iter().map(|(k, c)| {
            if k == EventKind::OmisMedian {
                (k, 10)
            } else {
                (k, c)
            }
        }));
        let plan = generate(&small_config(), &mut StdRng::seed_from_u64(1)).unwrap();
        let labels = count_event_labels(&plan, &mapping);
        assert_eq!(labels["omis_tibial"], 4);
        assert!(!labels.contains_key("omis_median"));
    }
}
