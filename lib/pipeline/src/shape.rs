use geometry::{Geometry, Level};
use serde::{Deserialize, Serialize};

use crate::{ConfigError, PipelineParams};

/// Dimensions of the attention layer mapped onto one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttentionShape {
    pub head_dim: u64,
    pub heads_per_device: u64,
    /// Sequence length L of this trace.
    pub seq_len: u64,
    /// Longest sequence the key/value layout reserves space for.
    pub max_seq_len: u64,
    /// Bytes per element.
    pub element_bytes: u64,
}

impl Default for AttentionShape {
    fn default() -> Self {
        AttentionShape {
            head_dim: 128,
            heads_per_device: 64,
            seq_len: 2048,
            max_seq_len: 4096,
            element_bytes: 2,
        }
    }
}

/// Partition counts derived from a geometry, an attention shape and the pipeline parameters.
///
/// Key and value data of one head live in the same channel; within that channel the score GEMV is
/// reduced over banks and parallelised over `pseudochannel x rank x bankgroup` units, while the
/// context GEMV is reduced over those units and parallelised over banks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Layout {
    /// Elements delivered by one column access.
    pub lane_width: u64,
    /// `pseudochannel x rank x bankgroup`.
    pub reduction_units: u64,
    /// Column chunks of the head dimension handled by one bank.
    pub k_chunks: u64,
    /// Score outputs owned by one reduction unit.
    pub columns_per_unit: u64,
    /// Column chunks of the attention weights broadcast to one reduction unit.
    pub context_chunks: u64,
    /// Steps of a score loop, one drain batch each.
    pub score_steps: u64,
    /// Bytes reserved per bank for one wave of keys (values use the same size).
    pub partition_size: u64,
    pub wave_count: u64,
}

impl Layout {
    pub fn new(
        geometry: &Geometry,
        shape: &AttentionShape,
        params: &PipelineParams,
    ) -> Result<Self, ConfigError> {
        for (name, value) in [
            ("head_dim", shape.head_dim),
            ("heads_per_device", shape.heads_per_device),
            ("seq_len", shape.seq_len),
            ("max_seq_len", shape.max_seq_len),
            ("element_bytes", shape.element_bytes),
            ("drain_period", params.drain_period),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroParameter(name));
            }
        }

        if shape.seq_len > shape.max_seq_len {
            return Err(ConfigError::SequenceTooLong {
                seq_len: shape.seq_len,
                max_seq_len: shape.max_seq_len,
            });
        }

        let granularity = geometry.organization().granularity;
        if shape.element_bytes > granularity || !granularity.is_multiple_of(shape.element_bytes) {
            return Err(ConfigError::LaneWidth {
                granularity,
                element_bytes: shape.element_bytes,
            });
        }
        let lane_width = granularity / shape.element_bytes;

        let banks = geometry.count(Level::Bank);
        let reduction_units = geometry.count(Level::PseudoChannel)
            * geometry.count(Level::Rank)
            * geometry.count(Level::BankGroup);

        let k_chunks = shape.head_dim.div_ceil(banks).div_ceil(lane_width);
        let columns_per_unit = shape.seq_len.div_ceil(reduction_units);
        let context_chunks = shape.seq_len.div_ceil(reduction_units * lane_width);
        let score_steps = columns_per_unit.div_ceil(params.drain_period);
        let partition_size = shape
            .max_seq_len
            .checked_mul(shape.head_dim)
            .ok_or(ConfigError::Overflow("max_seq_len x head_dim"))?
            .div_ceil(reduction_units * banks);
        let wave_count = shape
            .heads_per_device
            .div_ceil(geometry.count(Level::Channel));

        let key_end = wave_count
            .checked_mul(partition_size)
            .ok_or(ConfigError::Overflow("key storage"))?;
        if key_end > params.value_offset {
            return Err(ConfigError::KeyRegionOverlapsValues {
                key_end,
                value_offset: params.value_offset,
            });
        }

        Ok(Layout {
            lane_width,
            reduction_units,
            k_chunks,
            columns_per_unit,
            context_chunks,
            score_steps,
            partition_size,
            wave_count,
        })
    }
}
