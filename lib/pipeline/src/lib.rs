//! Attention trace generation for bank-level PIM.
//!
//! [`IterationBuilder`] emits the commands of every wave of heads, [`PipelineScheduler`] interleaves
//! them into a single trace, and [`generate`] runs both for one configuration.

mod emit;
mod iteration;
mod params;
mod schedule;
mod shape;

#[doc(hidden)]
pub mod testutils;

use command::Trace;
use geometry::{Geometry, GeometryError};
use thiserror::Error;
use tracing::info;

pub use emit::PhaseEmitter;
pub use iteration::{Batch, IterationBuilder, IterationCommandSet, SetShape};
pub use params::{FinalContextHead, PipelineParams};
pub use schedule::PipelineScheduler;
pub use shape::{AttentionShape, Layout};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    ZeroParameter(&'static str),

    #[error("sequence length {seq_len} exceeds the maximum of {max_seq_len}")]
    SequenceTooLong { seq_len: u64, max_seq_len: u64 },

    #[error("access granularity of {granularity} bytes is not a multiple of {element_bytes}-byte elements")]
    LaneWidth { granularity: u64, element_bytes: u64 },

    #[error("key storage ends at {key_end:#x}, past the value offset {value_offset:#x}")]
    KeyRegionOverlapsValues { key_end: u64, value_offset: u64 },

    #[error("{0} overflows the 64-bit address space")]
    Overflow(&'static str),

    #[error(transparent)]
    Geometry(#[from] GeometryError),
}

/// A scheduled trace together with the command sets it was built from.
#[derive(Debug, Clone)]
pub struct Generated {
    pub trace: Trace,
    pub sets: Vec<IterationCommandSet>,
    pub layout: Layout,
}

pub fn generate(
    geometry: &Geometry,
    shape: &AttentionShape,
    params: &PipelineParams,
) -> Result<Generated, ConfigError> {
    let builder = IterationBuilder::new(geometry, shape, params)?;
    let layout = *builder.layout();
    info!(
        "head_dim {}, {} heads, L {}: {} waves of {} channels",
        shape.head_dim,
        shape.heads_per_device,
        shape.seq_len,
        layout.wave_count,
        geometry.count(geometry::Level::Channel)
    );

    let sets = builder.build_all()?;
    let trace = PipelineScheduler::new(geometry, &layout, params)?.schedule(&sets)?;
    info!("scheduled {} commands", trace.len());

    Ok(Generated {
        trace,
        sets,
        layout,
    })
}
