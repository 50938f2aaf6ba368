use serde::{Deserialize, Serialize};

/// Which head's context batches the last stage of a wave pair drains.
///
/// `First` drains the pair's first head a second time and leaves the second head's context GEMV
/// out of the trace, matching the traces replayed so far record for record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FinalContextHead {
    #[default]
    First,
    Second,
}

/// Tuning parameters of the emitters and the two-head pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineParams {
    /// Output columns the on-die output buffer holds before it must be drained to the softmax
    /// buffer. Also the number of score MAC batches issued per pipeline step.
    pub drain_period: u64,
    /// Distance from a wave's key storage to its value storage.
    pub value_offset: u64,
    pub final_context_head: FinalContextHead,
}

impl Default for PipelineParams {
    fn default() -> Self {
        PipelineParams {
            drain_period: 16,
            value_offset: 1 << 23,
            final_context_head: FinalContextHead::First,
        }
    }
}
