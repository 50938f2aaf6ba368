//! Test utility only supposed for testing.
#![doc(hidden)]

use std::collections::HashMap;

use command::{Command, Trace};
use geometry::{Geometry, Level};
use rand::prelude::*;

use crate::{AttentionShape, FinalContextHead, IterationCommandSet, Layout, PipelineParams};

/// Random shapes that fit the default HBM3 organization.
pub fn random_shapes(count: usize) -> Vec<AttentionShape> {
    // Use a fixed seed RNG for same sequence across runs.
    let mut rng = rand::rngs::SmallRng::seed_from_u64(42);
    (0..count)
        .map(|_| {
            let max_seq_len = 64 * rng.random_range(1..=64);
            AttentionShape {
                head_dim: 16 * rng.random_range(1..=16),
                heads_per_device: rng.random_range(1..=80),
                seq_len: rng.random_range(1..=max_seq_len),
                max_seq_len,
                element_bytes: [1, 2, 4][rng.random_range(0..3)],
            }
        })
        .collect()
}

struct WaveCounts {
    score_broadcast: u64,
    score_mac: u64,
    score_drain: u64,
    softmax: u64,
    context_broadcast: u64,
    context_mac: u64,
    context_drain: u64,
}

impl WaveCounts {
    fn new(geometry: &Geometry, layout: &Layout, valid: u64) -> Self {
        let banks = geometry.count(Level::Bank);
        let ranks = geometry.count(Level::Rank);
        let bank_groups = geometry.count(Level::BankGroup);
        WaveCounts {
            score_broadcast: banks * layout.k_chunks * valid,
            score_mac: layout.columns_per_unit * layout.k_chunks * valid,
            score_drain: layout.score_steps * bank_groups * ranks * valid,
            softmax: valid,
            context_broadcast: ranks * bank_groups * layout.context_chunks * valid,
            context_mac: layout.k_chunks * layout.columns_per_unit * valid,
            context_drain: layout.k_chunks * banks * ranks * valid,
        }
    }
}

/// Trace length derived from the partition counts alone.
pub fn closed_form_len(
    geometry: &Geometry,
    layout: &Layout,
    params: &PipelineParams,
    valid_channels: &[u64],
) -> u64 {
    let barrier = geometry.count(Level::Channel);
    let score_barriers = layout.score_steps * barrier;
    let context_barriers = layout.k_chunks * barrier;
    let waves: Vec<WaveCounts> = valid_channels
        .iter()
        .map(|&valid| WaveCounts::new(geometry, layout, valid))
        .collect();

    let mut total = 0;
    let pairs = waves.chunks_exact(2);
    let tail = pairs.remainder();
    for (i, pair) in pairs.enumerate() {
        let (first, second) = (&pair[0], &pair[1]);
        let warm_up = if i == 0 { valid_channels[0] } else { 0 };
        let last = match params.final_context_head {
            FinalContextHead::First => first,
            FinalContextHead::Second => second,
        };
        total += first.score_broadcast + warm_up + barrier;
        total += first.score_mac + first.score_drain + second.score_broadcast + score_barriers;
        total += second.score_mac
            + second.score_drain
            + first.softmax
            + first.context_broadcast
            + score_barriers;
        total += first.context_mac
            + first.context_drain
            + second.softmax
            + second.context_broadcast
            + context_barriers;
        total += last.context_mac + last.context_drain + context_barriers;
    }
    if let [wave] = tail {
        total += wave.score_broadcast + barrier;
        total += wave.score_mac + wave.score_drain + score_barriers;
        total += wave.softmax + wave.context_broadcast + barrier;
        total += wave.context_mac + wave.context_drain + context_barriers;
    }
    total
}

/// Check that every drain batch present in `trace` comes after the compute batches it reads.
///
/// A score drain `d` needs the MAC batches of columns up to `(d + 1) * drain_period`, a context
/// drain `d` needs context MAC batch `d`. The drain batches of one phase share their addresses, so
/// drain `d` is matched with the `d`-th occurrence of its records. Returns the first violation.
pub fn check_drain_order(
    sets: &[IterationCommandSet],
    trace: &Trace,
    drain_period: u64,
) -> Result<(), String> {
    let mut seen: HashMap<Command, Vec<usize>> = HashMap::new();
    for (i, command) in trace.iter().enumerate() {
        seen.entry(*command).or_default().push(i);
    }
    let nth = |command: &Command, n: usize| seen.get(command).and_then(|at| at.get(n)).copied();
    let period = drain_period as usize;

    for set in sets {
        let checks = set
            .score_drain()
            .iter()
            .enumerate()
            .map(|(d, drain)| {
                let last = ((d + 1) * period).min(set.score_mac().len()) - 1;
                ("score", d, drain, &set.score_mac()[last])
            })
            .chain(
                set.context_drain()
                    .iter()
                    .zip(set.context_mac())
                    .enumerate()
                    .map(|(d, (drain, mac))| ("context", d, drain, mac)),
            );

        for (phase, d, drain, mac) in checks {
            let Some(drained) = drain.iter().filter_map(|c| nth(c, d)).min() else {
                continue;
            };
            let Some(computed) = mac.iter().map(|c| nth(c, 0)).collect::<Option<Vec<_>>>() else {
                return Err(format!(
                    "wave {}: {phase} drain {d} issued without its MACs",
                    set.wave()
                ));
            };
            let computed = computed.into_iter().max().unwrap_or(0);
            if computed > drained {
                return Err(format!(
                    "wave {}: {phase} drain {d} at {drained} precedes its MAC at {computed}",
                    set.wave()
                ));
            }
        }
    }
    Ok(())
}
