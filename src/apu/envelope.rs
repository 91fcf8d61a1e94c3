use crate::common::{Clock, Reset, ResetKind};
use serde::{Deserialize, Serialize};

/// APU Envelope provides volume control for APU waveform channels: either a
/// constant volume or a looping 15-to-0 decay ramp, clocked by quarter frames.
///
/// See: <https://www.nesdev.org/wiki/APU_Envelope>
#[derive(Default, Debug, Clone, Serialize, Deserialize)]
#[must_use]
pub struct Envelope {
    pub start: bool,
    pub loops: bool,
    pub constant_volume: bool,
    /// 4-bit divider period, doubling as the constant volume value.
    pub period: u8,
    pub divider: u8,
    pub decay: u8,
}

impl Envelope {
    pub const fn new() -> Self {
        Self {
            start: false,
            loops: false,
            constant_volume: false,
            period: 0,
            divider: 0,
            decay: 0,
        }
    }

    #[inline]
    #[must_use]
    pub const fn volume(&self) -> u8 {
        if self.constant_volume {
            self.period
        } else {
            self.decay
        }
    }

    #[inline]
    pub const fn restart(&mut self) {
        self.start = true;
    }

    /// $4000/$4004/$400C Envelope control
    #[inline]
    pub const fn write_ctrl(&mut self, val: u8) {
        self.loops = (val & 0x20) == 0x20; // D5
        self.constant_volume = (val & 0x10) == 0x10; // D4
        self.period = val & 0x0F; // D3..D0
    }
}

impl Clock for Envelope {
    fn clock(&mut self) -> u64 {
        if self.start {
            self.start = false;
            self.decay = 15;
            self.divider = self.period;
        } else if self.divider > 0 {
            self.divider -= 1;
        } else {
            self.divider = self.period;
            if self.decay > 0 {
                self.decay -= 1;
            } else if self.loops {
                self.decay = 15;
            }
        }

        1
    }
}

impl Reset for Envelope {
    fn reset(&mut self, _kind: ResetKind) {
        self.start = false;
        self.loops = false;
        self.constant_volume = false;
        self.period = 0;
        self.divider = 0;
        self.decay = 0;
    }
}
