//! Two-head software pipeline.
//!
//! Waves are scheduled in pairs. While one wave computes, the other one loads its inputs or runs
//! its softmax, so every pipeline step carries the compute batches of one wave plus the transfers
//! of its partner. A BARRIER on every channel closes each step. Drain batches always trail their
//! producing compute batches by exactly one step.

use command::{Command, Opcode, Trace};
use geometry::{Geometry, Level};
use tracing::debug;

use crate::{Batch, ConfigError, FinalContextHead, IterationCommandSet, Layout, PipelineParams};

pub struct PipelineScheduler {
    layout: Layout,
    params: PipelineParams,
    barrier: Batch,
}

/// Compute and drain batches of one GEMV loop.
struct Gemv<'a> {
    macs: &'a [Batch],
    drains: &'a [Batch],
    macs_per_step: usize,
    steps: usize,
}

impl Gemv<'_> {
    fn score<'a>(set: &'a IterationCommandSet, layout: &Layout, drain_period: u64) -> Gemv<'a> {
        Gemv {
            macs: set.score_mac(),
            drains: set.score_drain(),
            macs_per_step: drain_period as usize,
            steps: layout.score_steps as usize,
        }
    }

    fn context<'a>(set: &'a IterationCommandSet, layout: &Layout) -> Gemv<'a> {
        Gemv {
            macs: set.context_mac(),
            drains: set.context_drain(),
            macs_per_step: 1,
            steps: layout.k_chunks as usize,
        }
    }
}

/// The `step`-th of `span` even slices of `commands`, counting from step `first`. Empty outside
/// the spread.
fn spread(commands: &[Command], step: usize, first: usize, span: usize) -> &[Command] {
    if span == 0 || step < first {
        return &[];
    }
    let size = commands.len().div_ceil(span);
    let start = (step - first) * size;
    if start >= commands.len() {
        return &[];
    }
    &commands[start..commands.len().min(start + size)]
}

impl PipelineScheduler {
    pub fn new(
        geometry: &Geometry,
        layout: &Layout,
        params: &PipelineParams,
    ) -> Result<Self, ConfigError> {
        let barrier = (0..geometry.count(Level::Channel))
            .map(|ch| {
                geometry
                    .encode(0, &[(Level::Channel, ch)])
                    .map(|addr| Command::new(Opcode::Barrier, addr))
            })
            .collect::<Result<Batch, _>>()?;
        Ok(PipelineScheduler {
            layout: *layout,
            params: *params,
            barrier,
        })
    }

    /// Run `gemv` for `steps + 1` steps. Step `j` issues the compute batches of slice `j` and the
    /// drain batch `j - 1`, followed by whatever `overlap` adds for `j`. Every step but the last
    /// ends with a barrier.
    fn pipelined(
        &self,
        trace: &mut Trace,
        gemv: &Gemv<'_>,
        mut overlap: impl FnMut(&mut Trace, usize),
    ) {
        for j in 0..=gemv.steps {
            if j != gemv.steps {
                for batch in gemv.macs.iter().skip(j * gemv.macs_per_step).take(gemv.macs_per_step) {
                    trace.extend_from_slice(batch);
                }
            }
            if j != 0 {
                if let Some(drain) = gemv.drains.get(j - 1) {
                    trace.extend_from_slice(drain);
                }
            }
            overlap(trace, j);
            if j != gemv.steps {
                trace.extend_from_slice(&self.barrier);
            }
        }
    }

    fn schedule_pair(
        &self,
        trace: &mut Trace,
        first: &IterationCommandSet,
        second: &IterationCommandSet,
        warm_up: bool,
    ) {
        let drain_period = self.params.drain_period;
        let start = trace.len();

        // Head 0 score, head 1 query load.
        trace.extend_from_slice(first.score_broadcast());
        if warm_up {
            if let Some(batch) = first.score_mac().first() {
                let len = (first.valid_channels() as usize).min(batch.len());
                trace.extend_from_slice(&batch[..len]);
            }
        }
        trace.extend_from_slice(&self.barrier);
        let gemv = Gemv::score(first, &self.layout, drain_period);
        let steps = gemv.steps;
        self.pipelined(trace, &gemv, |trace, j| {
            trace.extend_from_slice(spread(second.score_broadcast(), j, 0, steps));
        });
        debug!("wave {}: score stage, {} commands", first.wave(), trace.len() - start);

        // Head 0 softmax and weight load, head 1 score.
        let start = trace.len();
        let gemv = Gemv::score(second, &self.layout, drain_period);
        let (half, span) = (gemv.steps / 2, gemv.steps.div_ceil(2));
        self.pipelined(trace, &gemv, |trace, j| {
            if j == 0 {
                trace.extend_from_slice(first.softmax());
            }
            trace.extend_from_slice(spread(first.context_broadcast(), j, half, span));
        });
        debug!("wave {}: score stage, {} commands", second.wave(), trace.len() - start);

        // Head 0 context, head 1 softmax and weight load.
        let start = trace.len();
        let gemv = Gemv::context(first, &self.layout);
        let (half, span) = (gemv.steps / 2, gemv.steps.div_ceil(2));
        self.pipelined(trace, &gemv, |trace, j| {
            if j == 0 {
                trace.extend_from_slice(second.softmax());
            }
            trace.extend_from_slice(spread(second.context_broadcast(), j, half, span));
        });
        debug!("wave {}: context stage, {} commands", first.wave(), trace.len() - start);

        // Head 1 context.
        let start = trace.len();
        let last = match self.params.final_context_head {
            FinalContextHead::First => first,
            FinalContextHead::Second => second,
        };
        self.pipelined(trace, &Gemv::context(last, &self.layout), |_, _| {});
        debug!("wave {}: context stage, {} commands", last.wave(), trace.len() - start);
    }

    /// A wave without a partner runs its phases back to back.
    fn schedule_single(&self, trace: &mut Trace, set: &IterationCommandSet) {
        let start = trace.len();
        trace.extend_from_slice(set.score_broadcast());
        trace.extend_from_slice(&self.barrier);
        self.pipelined(
            trace,
            &Gemv::score(set, &self.layout, self.params.drain_period),
            |_, _| {},
        );

        trace.extend_from_slice(set.softmax());
        trace.extend_from_slice(set.context_broadcast());
        trace.extend_from_slice(&self.barrier);

        self.pipelined(trace, &Gemv::context(set, &self.layout), |_, _| {});
        debug!("wave {}: unpaired, {} commands", set.wave(), trace.len() - start);
    }

    pub fn schedule(&self, sets: &[IterationCommandSet]) -> Result<Trace, ConfigError> {
        let mut trace = Trace::new();
        let pairs = sets.chunks_exact(2);
        let tail = pairs.remainder();
        for (i, pair) in pairs.enumerate() {
            self.schedule_pair(&mut trace, &pair[0], &pair[1], i == 0);
        }
        if let [set] = tail {
            self.schedule_single(&mut trace, set);
        }
        Ok(trace)
    }
}
