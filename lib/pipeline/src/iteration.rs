use command::Command;
use geometry::{Geometry, Level};
use serde::Serialize;
use tracing::debug;

use crate::emit::PhaseEmitter;
use crate::{AttentionShape, ConfigError, Layout, PipelineParams};

/// Commands issued back to back to all heads of a wave.
pub type Batch = Vec<Command>;

/// The commands of one wave, one attention head per channel, grouped by phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IterationCommandSet {
    wave: u64,
    valid_channels: u64,
    key_base: u64,
    value_base: u64,
    score_broadcast: Batch,
    score_mac: Vec<Batch>,
    score_drain: Vec<Batch>,
    softmax: Batch,
    context_broadcast: Batch,
    context_mac: Vec<Batch>,
    context_drain: Vec<Batch>,
}

/// Outer and (first) inner length of every container of a command set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SetShape {
    pub score_broadcast: Vec<usize>,
    pub score_mac: Vec<usize>,
    pub score_drain: Vec<usize>,
    pub softmax: Vec<usize>,
    pub context_broadcast: Vec<usize>,
    pub context_mac: Vec<usize>,
    pub context_drain: Vec<usize>,
}

fn nested_shape(batches: &[Batch]) -> Vec<usize> {
    let mut shape = vec![batches.len()];
    if let Some(first) = batches.first() {
        shape.push(first.len());
    }
    shape
}

impl IterationCommandSet {
    pub fn wave(&self) -> u64 {
        self.wave
    }

    pub fn valid_channels(&self) -> u64 {
        self.valid_channels
    }

    pub fn key_base(&self) -> u64 {
        self.key_base
    }

    pub fn value_base(&self) -> u64 {
        self.value_base
    }

    /// `banks x k_chunks x valid` query writes.
    pub fn score_broadcast(&self) -> &[Command] {
        &self.score_broadcast
    }

    /// One batch per output column of a reduction unit.
    pub fn score_mac(&self) -> &[Batch] {
        &self.score_mac
    }

    /// One batch per drain period of score columns.
    pub fn score_drain(&self) -> &[Batch] {
        &self.score_drain
    }

    pub fn softmax(&self) -> &[Command] {
        &self.softmax
    }

    pub fn context_broadcast(&self) -> &[Command] {
        &self.context_broadcast
    }

    /// One batch per head-dimension chunk.
    pub fn context_mac(&self) -> &[Batch] {
        &self.context_mac
    }

    /// One batch per head-dimension chunk.
    pub fn context_drain(&self) -> &[Batch] {
        &self.context_drain
    }

    pub fn total_commands(&self) -> usize {
        let flat = self.score_broadcast.len() + self.softmax.len() + self.context_broadcast.len();
        let nested: usize = [
            &self.score_mac,
            &self.score_drain,
            &self.context_mac,
            &self.context_drain,
        ]
        .into_iter()
        .flatten()
        .map(Vec::len)
        .sum();
        flat + nested
    }

    pub fn shape(&self) -> SetShape {
        SetShape {
            score_broadcast: vec![self.score_broadcast.len()],
            score_mac: nested_shape(&self.score_mac),
            score_drain: nested_shape(&self.score_drain),
            softmax: vec![self.softmax.len()],
            context_broadcast: vec![self.context_broadcast.len()],
            context_mac: nested_shape(&self.context_mac),
            context_drain: nested_shape(&self.context_drain),
        }
    }
}

/// Builds the per-wave command sets of one run.
pub struct IterationBuilder {
    geometry: Geometry,
    shape: AttentionShape,
    params: PipelineParams,
    layout: Layout,
}

impl IterationBuilder {
    pub fn new(
        geometry: &Geometry,
        shape: &AttentionShape,
        params: &PipelineParams,
    ) -> Result<Self, ConfigError> {
        let layout = Layout::new(geometry, shape, params)?;
        Ok(IterationBuilder {
            geometry: *geometry,
            shape: *shape,
            params: *params,
            layout,
        })
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn wave_count(&self) -> u64 {
        self.layout.wave_count
    }

    /// Heads mapped onto the channels in `wave`. Only the last wave can be partially occupied.
    pub fn valid_channels(&self, wave: u64) -> u64 {
        let channels = self.geometry.count(Level::Channel);
        let remainder = self.shape.heads_per_device % channels;
        if remainder != 0 && self.wave_count().checked_sub(1) == Some(wave) {
            remainder
        } else {
            channels
        }
    }

    pub fn build_wave(&self, wave: u64) -> Result<IterationCommandSet, ConfigError> {
        let valid_channels = self.valid_channels(wave);
        let key_base = wave
            .checked_mul(self.layout.partition_size)
            .ok_or(ConfigError::Overflow("key base"))?;
        let value_base = key_base
            .checked_add(self.params.value_offset)
            .ok_or(ConfigError::Overflow("value base"))?;

        let emitter = PhaseEmitter::new(
            &self.geometry,
            &self.layout,
            self.params.drain_period,
            valid_channels,
        )?;
        let score_broadcast = emitter.score_broadcast(key_base)?;
        let (score_mac, score_drain) = emitter.score_mac(key_base)?;
        let softmax = emitter.softmax()?;
        let context_broadcast = emitter.context_broadcast(value_base)?;
        let (context_mac, context_drain) = emitter.context_mac(value_base)?;

        let set = IterationCommandSet {
            wave,
            valid_channels,
            key_base,
            value_base,
            score_broadcast,
            score_mac,
            score_drain,
            softmax,
            context_broadcast,
            context_mac,
            context_drain,
        };
        debug!(
            "wave {wave}: {valid_channels} heads, key base {key_base:#x}, {} commands",
            set.total_commands()
        );
        Ok(set)
    }

    pub fn build_all(&self) -> Result<Vec<IterationCommandSet>, ConfigError> {
        (0..self.wave_count())
            .map(|wave| self.build_wave(wave))
            .collect()
    }
}
