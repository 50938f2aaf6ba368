//! Per-phase command emitters.
//!
//! Every emitter addresses the first `valid_channels` channels, one attention head per channel,
//! and loops the channel index innermost so a batch issues the same operation to all heads back to
//! back.

use core::ops::Range;

use command::{Command, Opcode};
use geometry::{Geometry, GeometryError, Level};

use crate::{Batch, ConfigError, Layout};

pub struct PhaseEmitter<'a> {
    geometry: &'a Geometry,
    layout: &'a Layout,
    drain_period: u64,
    valid_channels: u64,
}

impl<'a> PhaseEmitter<'a> {
    pub fn new(
        geometry: &'a Geometry,
        layout: &'a Layout,
        drain_period: u64,
        valid_channels: u64,
    ) -> Result<Self, ConfigError> {
        if drain_period == 0 {
            return Err(ConfigError::ZeroParameter("drain_period"));
        }
        Ok(Self {
            geometry,
            layout,
            drain_period,
            valid_channels,
        })
    }

    fn channels(&self) -> Range<u64> {
        0..self.valid_channels
    }

    fn command(
        &self,
        opcode: Opcode,
        base: u64,
        indices: &[(Level, u64)],
    ) -> Result<Command, GeometryError> {
        Ok(Command::new(opcode, self.geometry.encode(base, indices)?))
    }

    /// Write the query vector into the GEMV buffer of every bank.
    ///
    /// Bank `b` receives the `b`-th slice of the head dimension, `k_chunks` buffer slots of one
    /// column access each. Slots are addressed by index, not by column stride.
    pub fn score_broadcast(&self, base: u64) -> Result<Batch, GeometryError> {
        let k_chunks = self.layout.k_chunks;
        let mut batch = Vec::new();
        for bank in 0..self.geometry.count(Level::Bank) {
            for chunk in 0..k_chunks {
                for ch in self.channels() {
                    batch.push(self.command(
                        Opcode::BroadcastWrite,
                        base + chunk,
                        &[(Level::Channel, ch), (Level::Bank, bank)],
                    )?);
                }
            }
        }
        Ok(batch)
    }

    /// Score GEMV `q x K^T` in adder-tree mode.
    ///
    /// Returns one MAC batch per output column of a reduction unit and one drain batch per
    /// `drain_period` columns (the last one possibly short).
    pub fn score_mac(&self, base: u64) -> Result<(Vec<Batch>, Vec<Batch>), GeometryError> {
        let k_chunks = self.layout.k_chunks;
        let columns = self.layout.columns_per_unit;

        let mut macs = Vec::with_capacity(columns as usize);
        let mut drains = Vec::new();
        for n in 0..columns {
            let mut batch = Vec::with_capacity((k_chunks * self.valid_channels) as usize);
            for k in 0..k_chunks {
                for ch in self.channels() {
                    batch.push(self.command(
                        Opcode::MultiplyAccumulate,
                        base,
                        &[(Level::Channel, ch), (Level::Column, k + n * k_chunks)],
                    )?);
                }
            }
            macs.push(batch);

            if n % self.drain_period == self.drain_period - 1 || n == columns - 1 {
                drains.push(self.drain(base, Level::BankGroup)?);
            }
        }
        Ok((macs, drains))
    }

    /// One softmax per head. The sequence length only changes how long it runs.
    pub fn softmax(&self) -> Result<Batch, GeometryError> {
        self.channels()
            .map(|ch| self.command(Opcode::Softmax, 0, &[(Level::Channel, ch)]))
            .collect()
    }

    /// Move the attention weights from the softmax buffer into the GEMV buffers.
    ///
    /// Each `rank x bankgroup` unit receives its share of the sequence, `context_chunks` slots.
    pub fn context_broadcast(&self, base: u64) -> Result<Batch, GeometryError> {
        let mut batch = Vec::new();
        for rank in 0..self.geometry.count(Level::Rank) {
            for bg in 0..self.geometry.count(Level::BankGroup) {
                for chunk in 0..self.layout.context_chunks {
                    for ch in self.channels() {
                        batch.push(self.command(
                            Opcode::MoveToComputeBuf,
                            base + chunk,
                            &[
                                (Level::Channel, ch),
                                (Level::Rank, rank),
                                (Level::BankGroup, bg),
                            ],
                        )?);
                    }
                }
            }
        }
        Ok(batch)
    }

    /// Context GEMV `s x V` in MAC mode.
    ///
    /// Returns one MAC batch per head-dimension chunk, each reducing over the whole sequence share
    /// of a unit, and the drain batch following each of them.
    pub fn context_mac(&self, base: u64) -> Result<(Vec<Batch>, Vec<Batch>), GeometryError> {
        let k_chunks = self.layout.k_chunks;
        let columns = self.layout.columns_per_unit;

        let mut macs = Vec::with_capacity(k_chunks as usize);
        let mut drains = Vec::with_capacity(k_chunks as usize);
        for n in 0..k_chunks {
            let mut batch = Vec::with_capacity((columns * self.valid_channels) as usize);
            for k in 0..columns {
                for ch in self.channels() {
                    batch.push(self.command(
                        Opcode::MultiplyAccumulate,
                        base,
                        &[(Level::Channel, ch), (Level::Column, k + n * columns)],
                    )?);
                }
            }
            macs.push(batch);
            drains.push(self.drain(base, Level::Bank)?);
        }
        Ok((macs, drains))
    }

    /// Drain every `outer x rank` output buffer of each head to its softmax buffer.
    fn drain(&self, base: u64, outer: Level) -> Result<Batch, GeometryError> {
        let mut batch = Vec::new();
        for o in 0..self.geometry.count(outer) {
            for rank in 0..self.geometry.count(Level::Rank) {
                for ch in self.channels() {
                    batch.push(self.command(
                        Opcode::MoveToSoftmaxBuf,
                        base,
                        &[(Level::Channel, ch), (Level::Rank, rank), (outer, o)],
                    )?);
                }
            }
        }
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use geometry::{Address, Organization};

    use super::*;
    use crate::{AttentionShape, PipelineParams};

    fn setup(shape: AttentionShape) -> (Geometry, Layout) {
        let geometry = Geometry::new(Organization::default()).unwrap();
        let layout = Layout::new(&geometry, &shape, &PipelineParams::default()).unwrap();
        (geometry, layout)
    }

    fn addrs(batch: &[Command]) -> Vec<u64> {
        batch.iter().map(|cmd| cmd.addr().get()).collect()
    }

    #[test]
    fn score_broadcast_order_and_count() {
        let (geometry, layout) = setup(AttentionShape::default());
        let emitter = PhaseEmitter::new(&geometry, &layout, 16, 16).unwrap();
        let batch = emitter.score_broadcast(0x2000).unwrap();

        // banks x k_chunks x channels
        assert_eq!(batch.len(), 4 * 2 * 16);
        assert!(
            batch
                .iter()
                .all(|cmd| cmd.opcode() == Opcode::BroadcastWrite)
        );
        assert_eq!(batch[0].addr(), Address::new(0x2000));
        assert_eq!(batch[1].addr(), Address::new(0x2000 + (1 << 30)));
        assert_eq!(batch[16].addr(), Address::new(0x2001));
        assert_eq!(batch[32].addr(), Address::new(0x2000 + (1 << 24)));
    }

    #[test]
    fn score_mac_batches_and_drains() {
        let (geometry, layout) = setup(AttentionShape::default());
        let emitter = PhaseEmitter::new(&geometry, &layout, 16, 16).unwrap();
        let (macs, drains) = emitter.score_mac(0).unwrap();

        assert_eq!(macs.len(), 128);
        assert!(macs.iter().all(|batch| batch.len() == 2 * 16));
        // Column n, chunk k lives at column k + 2n.
        assert_eq!(addrs(&macs[3])[..2], [6 * 32, (1 << 30) + 6 * 32]);
        assert_eq!(addrs(&macs[3])[16], 7 * 32);

        assert_eq!(drains.len(), 128 / 16);
        for drain in &drains {
            assert_eq!(drain.len(), 4 * 2 * 16);
            assert!(
                drain
                    .iter()
                    .all(|cmd| cmd.opcode() == Opcode::MoveToSoftmaxBuf)
            );
        }
        // bankgroup outer, rank, channel inner
        assert_eq!(drains[0][16].addr(), Address::new(1 << 28));
        assert_eq!(drains[0][32].addr(), Address::new(1 << 26));
    }

    #[test]
    fn short_final_drain() {
        let (geometry, layout) = setup(AttentionShape {
            seq_len: 1000,
            ..AttentionShape::default()
        });
        let emitter = PhaseEmitter::new(&geometry, &layout, 16, 16).unwrap();
        let (macs, drains) = emitter.score_mac(0).unwrap();
        assert_eq!(macs.len(), 63);
        assert_eq!(drains.len(), 4);
    }

    #[test]
    fn softmax_is_one_per_valid_channel() {
        let (geometry, layout) = setup(AttentionShape {
            seq_len: 16,
            ..AttentionShape::default()
        });
        let batch = PhaseEmitter::new(&geometry, &layout, 16, 5)
            .unwrap()
            .softmax()
            .unwrap();
        assert_eq!(addrs(&batch), (0..5).map(|ch| ch << 30).collect::<Vec<_>>());
        assert!(batch.iter().all(|cmd| cmd.opcode() == Opcode::Softmax));
    }

    #[test]
    fn context_broadcast_order_and_count() {
        let (geometry, layout) = setup(AttentionShape::default());
        let emitter = PhaseEmitter::new(&geometry, &layout, 16, 3).unwrap();
        let base = 1 << 23;
        let batch = emitter.context_broadcast(base).unwrap();

        // ranks x bankgroups x context_chunks x channels
        assert_eq!(batch.len(), 2 * 4 * 8 * 3);
        assert!(
            batch
                .iter()
                .all(|cmd| cmd.opcode() == Opcode::MoveToComputeBuf)
        );
        assert_eq!(batch[1].addr().get(), base + (1 << 30));
        assert_eq!(batch[3].addr().get(), base + 1);
        assert_eq!(batch[8 * 3].addr().get(), base + (1 << 26));
        assert_eq!(batch[4 * 8 * 3].addr().get(), base + (1 << 28));
    }

    #[test]
    fn context_mac_drains_after_every_step() {
        let (geometry, layout) = setup(AttentionShape::default());
        let emitter = PhaseEmitter::new(&geometry, &layout, 16, 16).unwrap();
        let base = 1 << 23;
        let (macs, drains) = emitter.context_mac(base).unwrap();

        assert_eq!(macs.len(), 2);
        assert_eq!(drains.len(), 2);
        assert!(macs.iter().all(|batch| batch.len() == 128 * 16));
        assert_eq!(macs[1][0].addr().get(), base + 128 * 32);
        for drain in &drains {
            assert_eq!(drain.len(), 4 * 2 * 16);
            // bank outer, rank, channel inner
            assert_eq!(drain[16].addr().get(), base + (1 << 28));
            assert_eq!(drain[32].addr().get(), base + (1 << 24));
        }
    }

    #[test]
    fn zero_drain_period_is_rejected() {
        let (geometry, layout) = setup(AttentionShape::default());
        assert!(matches!(
            PhaseEmitter::new(&geometry, &layout, 0, 16),
            Err(ConfigError::ZeroParameter("drain_period"))
        ));
    }

    #[test]
    fn addresses_past_capacity_fail() {
        let (geometry, layout) = setup(AttentionShape::default());
        let emitter = PhaseEmitter::new(&geometry, &layout, 16, 17).unwrap();
        assert!(matches!(
            emitter.softmax(),
            Err(GeometryError::AddressOutOfRange { .. })
        ));
    }
}
