//! Bus glue between the APU and its host CPU and audio sink.

use crate::apu::ChannelSample;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// APU-owned IRQ sources, reported to the CPU as separate lines.
    #[derive(Default, Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq)]
    #[must_use]
    pub struct Irq: u8 {
        const FRAME_COUNTER = 1 << 0;
        const DMC = 1 << 1;
    }
}

/// The narrow view of the CPU the APU needs: DMA stalls, sample-byte reads, and
/// IRQ lines. The CPU implements this and is passed by `&mut` into the APU entry
/// points; the APU retains no reference to it.
pub trait CpuBus {
    /// Freeze the CPU for `cycles` CPU cycles while the DMC fetches a sample byte.
    /// The nominal cost is 4; collision costs with OAM DMA are the CPU's to arbitrate.
    fn stall_for_dmc(&mut self, cycles: u8);

    /// Read one sample byte from cartridge space ($8000-$FFFF).
    fn dmc_read(&mut self, addr: u16) -> u8;

    /// Assert an IRQ line. May be called repeatedly at the current level.
    fn set_irq(&mut self, source: Irq);

    /// Deassert an IRQ line. May be called repeatedly at the current level.
    fn clear_irq(&mut self, source: Irq);
}

/// Sink for the unfiltered per-channel sample stream.
///
/// [`Apu::end_frame`](crate::apu::Apu::end_frame) hands over every
/// `(channel, cycle, level)` event accumulated since the previous frame
/// boundary. Events are cycle-ordered within each channel, not globally.
/// Mixing, filtering, and resampling happen on the host's side of this trait.
pub trait Mixer {
    /// Consume one frame of samples. `frame_len` is the length of the frame in
    /// CPU cycles; sample cycles are relative to the start of the frame.
    fn consume(&mut self, frame_len: u64, samples: &[ChannelSample]);
}

/// A [`Mixer`] that discards every sample.
#[derive(Default, Debug, Copy, Clone)]
#[must_use]
pub struct NullMixer;

impl Mixer for NullMixer {
    fn consume(&mut self, _frame_len: u64, _samples: &[ChannelSample]) {}
}
