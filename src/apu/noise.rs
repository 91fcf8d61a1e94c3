//! APU Noise Channel implementation.
//!
//! See: <https://www.nesdev.org/wiki/APU_Noise>

use crate::{
    apu::{envelope::Envelope, length_counter::LengthCounter, timer::Timer, Channel, ChannelSample},
    common::{Clock, NesRegion, Regional, Reset, ResetKind, Sample},
};
use serde::{Deserialize, Serialize};

/// Noise shift mode.
#[derive(Debug, PartialEq, Eq, Copy, Clone, Serialize, Deserialize)]
pub enum ShiftMode {
    /// Zero (XOR bits 0 and 1)
    Zero,
    /// One (XOR bits 0 and 6)
    One,
}

/// APU Noise Channel provides pseudo-random noise generation from a 15-bit
/// linear-feedback shift register.
///
/// See: <https://www.nesdev.org/wiki/APU_Noise>
#[derive(Debug, Clone, Serialize, Deserialize)]
#[must_use]
pub struct Noise {
    pub region: NesRegion,
    pub timer: Timer,
    pub shift: u16,
    pub shift_mode: ShiftMode,
    /// Force mode 0 feedback regardless of $400E D7, for homebrew written
    /// against emulators that never implemented the short mode.
    pub mode_flag_disabled: bool,
    pub length: LengthCounter,
    pub envelope: Envelope,
}

impl Default for Noise {
    fn default() -> Self {
        Self::new(NesRegion::Ntsc)
    }
}

impl Noise {
    const PERIOD_TABLE_NTSC: [u64; 16] = [
        4, 8, 16, 32, 64, 96, 128, 160, 202, 254, 380, 508, 762, 1016, 2034, 4068,
    ];
    const PERIOD_TABLE_PAL: [u64; 16] = [
        4, 8, 14, 30, 60, 88, 118, 148, 188, 236, 354, 472, 708, 944, 1890, 3778,
    ];

    pub const fn new(region: NesRegion) -> Self {
        Self {
            region,
            timer: Timer::new(Self::period(region, 0)),
            shift: 1, // defaults to 1 on power up
            shift_mode: ShiftMode::Zero,
            mode_flag_disabled: false,
            length: LengthCounter::new(Channel::Noise),
            envelope: Envelope::new(),
        }
    }

    #[inline]
    #[must_use]
    pub const fn is_muted(&self) -> bool {
        (self.shift & 0x01) == 0x01
    }

    const fn period(region: NesRegion, val: u8) -> u64 {
        let index = (val & 0x0F) as usize;
        match region {
            NesRegion::Auto | NesRegion::Ntsc | NesRegion::Dendy => {
                Self::PERIOD_TABLE_NTSC[index] - 1
            }
            NesRegion::Pal => Self::PERIOD_TABLE_PAL[index] - 1,
        }
    }

    pub fn clock_quarter_frame(&mut self) {
        self.envelope.clock();
    }

    pub fn clock_half_frame(&mut self) {
        self.clock_quarter_frame();
        self.length.clock();
    }

    /// $400C Noise control
    pub const fn write_ctrl(&mut self, val: u8) {
        self.length.write_ctrl((val & 0x20) == 0x20); // D5
        self.envelope.write_ctrl(val);
    }

    /// $400E Noise timer
    pub const fn write_timer(&mut self, val: u8) {
        self.timer.period = Self::period(self.region, val);
        self.shift_mode = if (val & 0x80) == 0x80 {
            ShiftMode::One
        } else {
            ShiftMode::Zero
        };
    }

    /// $400F Length counter
    pub const fn write_length(&mut self, val: u8) {
        self.length.write(val >> 3);
        self.envelope.restart();
    }

    pub const fn set_enabled(&mut self, enabled: bool) {
        self.length.set_enabled(enabled);
    }

    pub const fn volume(&self) -> u8 {
        if self.length.counter > 0 {
            self.envelope.volume()
        } else {
            0
        }
    }

    fn clock_shift(&mut self) {
        let mode = if self.mode_flag_disabled {
            ShiftMode::Zero
        } else {
            self.shift_mode
        };
        let shift_by = if mode == ShiftMode::One { 6 } else { 1 };
        let feedback = (self.shift & 0x01) ^ ((self.shift >> shift_by) & 0x01);
        self.shift >>= 1;
        self.shift |= feedback << 14;
    }

    /// Run the timer up to `cycle`, clocking the shift register and emitting
    /// one sample per underflow.
    pub fn run(&mut self, cycle: u64, samples: &mut Vec<ChannelSample>) {
        while self.timer.run(cycle) {
            self.clock_shift();
            samples.push(ChannelSample {
                channel: Channel::Noise,
                cycle: self.timer.cycle,
                level: self.output(),
            });
        }
    }
}

impl Sample for Noise {
    //    Timer --> Shift Register   Length Counter
    //                    |                |
    //                    v                v
    // Envelope -------> Gate ----------> Gate --> (to mixer)
    fn output(&self) -> u8 {
        if self.is_muted() {
            0
        } else {
            self.volume()
        }
    }
}

impl Clock for Noise {
    fn clock(&mut self) -> u64 {
        if self.timer.clock() > 0 {
            self.clock_shift();
            1
        } else {
            0
        }
    }
}

impl Regional for Noise {
    fn region(&self) -> NesRegion {
        self.region
    }

    fn set_region(&mut self, region: NesRegion) {
        self.region = region;
    }
}

impl Reset for Noise {
    fn reset(&mut self, kind: ResetKind) {
        self.timer.reset(kind);
        self.timer.period = Self::period(self.region, 0);
        self.length.reset(kind);
        self.envelope.reset(kind);
        self.shift = 1;
        self.shift_mode = ShiftMode::Zero;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lfsr_period(noise: &mut Noise) -> u32 {
        let initial = noise.shift;
        let mut steps = 0;
        loop {
            noise.clock_shift();
            steps += 1;
            if noise.shift == initial {
                return steps;
            }
            assert!(steps < 40_000, "shift register never cycled");
        }
    }

    #[test]
    fn long_mode_period() {
        let mut noise = Noise::new(NesRegion::Ntsc);
        assert_eq!(lfsr_period(&mut noise), 32_767);
    }

    #[test]
    fn short_mode_period() {
        let mut noise = Noise::new(NesRegion::Ntsc);
        noise.write_timer(0x80);
        assert_eq!(lfsr_period(&mut noise), 93);
    }

    #[test]
    fn mode_flag_can_be_disabled() {
        let mut noise = Noise::new(NesRegion::Ntsc);
        noise.mode_flag_disabled = true;
        noise.write_timer(0x80);
        assert_eq!(lfsr_period(&mut noise), 32_767);
    }

    #[test]
    fn regional_periods() {
        let mut noise = Noise::new(NesRegion::Ntsc);
        noise.write_timer(0x0F);
        assert_eq!(noise.timer.period, 4068 - 1);

        noise.set_region(NesRegion::Pal);
        noise.write_timer(0x0F);
        assert_eq!(noise.timer.period, 3778 - 1);
    }
}
