//! APU Length Counter implementation.
//!
//! See: <https://www.nesdev.org/wiki/APU_Length_Counter>

use crate::{
    apu::Channel,
    common::{Clock, Reset, ResetKind},
};
use serde::{Deserialize, Serialize};

/// APU Length Counter provides duration control for APU waveform channels,
/// silencing a channel after a programmed number of half-frame ticks.
///
/// Loads and halt-flag changes that land on the same CPU cycle as a half-frame
/// tick are held in `reload`/`pending_halt` and committed after the tick.
///
/// See: <https://www.nesdev.org/wiki/APU_Length_Counter>
#[derive(Debug, Copy, Clone, Serialize, Deserialize)]
#[must_use]
pub struct LengthCounter {
    pub enabled: bool,
    pub channel: Channel,
    pub halt: bool,
    pub pending_halt: bool,
    pub counter: u8,
    pub previous_counter: u8,
    pub reload: u8,
}

impl LengthCounter {
    const LENGTH_TABLE: [u8; 32] = [
        10, 254, 20, 2, 40, 4, 80, 6, 160, 8, 60, 10, 14, 12, 26, 14, 12, 16, 24, 18, 48, 20, 96,
        22, 192, 24, 72, 26, 16, 28, 32, 30,
    ];

    pub const fn new(channel: Channel) -> Self {
        Self {
            enabled: false,
            channel,
            halt: false,
            pending_halt: false,
            counter: 0,
            previous_counter: 0,
            reload: 0,
        }
    }

    /// $4003/$4007/$400B/$400F D7..D3: queue a counter load. Ignored while the
    /// channel is disabled via $4015.
    #[inline]
    pub const fn write(&mut self, val: u8) {
        if self.enabled {
            self.reload = Self::LENGTH_TABLE[(val & 0x1F) as usize];
            self.previous_counter = self.counter;
        }
    }

    #[inline]
    pub const fn set_enabled(&mut self, enabled: bool) {
        if !enabled {
            self.counter = 0;
        }
        self.enabled = enabled;
    }

    /// Commit a queued load and halt change. A load whose counter was changed
    /// by an intervening half-frame tick is discarded.
    #[inline]
    pub const fn commit(&mut self) {
        if self.reload > 0 {
            if self.counter == self.previous_counter {
                self.counter = self.reload;
            }
            self.reload = 0;
        }
        self.halt = self.pending_halt;
    }

    /// $4000/$4004/$4008/$400C halt/control flag. Takes effect at the next commit.
    #[inline]
    pub const fn write_ctrl(&mut self, halt: bool) {
        self.pending_halt = halt;
    }
}

impl Clock for LengthCounter {
    fn clock(&mut self) -> u64 {
        if self.counter > 0 && !self.halt {
            self.counter -= 1;
            1
        } else {
            0
        }
    }
}

impl Reset for LengthCounter {
    fn reset(&mut self, kind: ResetKind) {
        self.enabled = false;
        // Soft reset leaves the triangle's halt and counter untouched.
        if kind == ResetKind::Hard || self.channel != Channel::Triangle {
            self.halt = false;
            self.pending_halt = false;
            self.counter = 0;
            self.reload = 0;
            self.previous_counter = 0;
        }
    }
}
