//! APU Pulse Channel implementation.
//!
//! See: <https://www.nesdev.org/wiki/APU_Pulse>

use crate::{
    apu::{
        envelope::Envelope,
        length_counter::LengthCounter,
        timer::Timer,
        Channel, ChannelSample,
    },
    common::{Clock, Reset, ResetKind, Sample},
};
use serde::{Deserialize, Serialize};

/// Pulse Channel selection. The sweep's subtraction mode treats the two
/// channels differently.
#[derive(Debug, PartialEq, Eq, Copy, Clone, Serialize, Deserialize)]
pub enum PulseChannel {
    One,
    Two,
}

/// APU Pulse Channel provides square wave generation with a duty selector,
/// envelope, length counter, and sweep unit.
///
/// See: <https://www.nesdev.org/wiki/APU_Pulse>
#[derive(Debug, Clone, Serialize, Deserialize)]
#[must_use]
pub struct Pulse {
    pub channel: PulseChannel,
    /// 11-bit period as written to $4002/$4003; the timer runs at twice this.
    pub period: u16,
    pub timer: Timer,
    pub duty: u8,     // Select row in DUTY_TABLE
    pub duty_pos: u8, // Select column in DUTY_TABLE
    pub length: LengthCounter,
    pub envelope: Envelope,
    pub sweep: Sweep,
}

impl Default for Pulse {
    fn default() -> Self {
        Self::new(PulseChannel::One)
    }
}

impl Pulse {
    const DUTY_TABLE: [[u8; 8]; 4] = [
        [0, 0, 0, 0, 0, 0, 0, 1],
        [0, 0, 0, 0, 0, 0, 1, 1],
        [0, 0, 0, 0, 1, 1, 1, 1],
        [1, 1, 1, 1, 1, 1, 0, 0],
    ];

    pub const fn new(channel: PulseChannel) -> Self {
        Self {
            channel,
            period: 0,
            timer: Timer::new(0),
            duty: 0,
            duty_pos: 0,
            length: LengthCounter::new(match channel {
                PulseChannel::One => Channel::Pulse1,
                PulseChannel::Two => Channel::Pulse2,
            }),
            envelope: Envelope::new(),
            sweep: Sweep::new(),
        }
    }

    pub const fn output_channel(&self) -> Channel {
        match self.channel {
            PulseChannel::One => Channel::Pulse1,
            PulseChannel::Two => Channel::Pulse2,
        }
    }

    /// Whether the sweep unit forces silence: a current period below 8 or a
    /// target period overflowing 11 bits mutes the channel immediately, even
    /// when the sweep itself is disabled or its shift is zero.
    #[inline]
    #[must_use]
    pub const fn is_muted(&self) -> bool {
        self.period < 8 || (!self.sweep.negate && self.sweep.target_period > 0x7FF)
    }

    fn update_target_period(&mut self) {
        let delta = self.period >> self.sweep.shift;
        if self.sweep.negate {
            self.sweep.target_period = self.period.wrapping_sub(delta);
            if let PulseChannel::One = self.channel {
                // Pulse 1 subtracts one extra (ones' complement adder).
                self.sweep.target_period = self.sweep.target_period.wrapping_sub(1);
            }
        } else {
            self.sweep.target_period = self.period + delta;
        }
    }

    fn set_period(&mut self, period: u16) {
        self.period = period;
        self.timer.period = (u64::from(period) * 2) + 1;
        self.update_target_period();
    }

    fn clock_sweep(&mut self) {
        self.sweep.divider = self.sweep.divider.wrapping_sub(1);
        if self.sweep.divider == 0 {
            if self.sweep.shift > 0
                && self.sweep.enabled
                && self.period >= 8
                && self.sweep.target_period <= 0x7FF
            {
                self.set_period(self.sweep.target_period);
            }
            self.sweep.divider = self.sweep.period;
        }

        if self.sweep.reload {
            self.sweep.divider = self.sweep.period;
            self.sweep.reload = false;
        }
    }

    pub fn clock_quarter_frame(&mut self) {
        self.envelope.clock();
    }

    pub fn clock_half_frame(&mut self) {
        self.clock_quarter_frame();
        self.length.clock();
        self.clock_sweep();
    }

    /// $4000/$4004 Pulse control
    pub const fn write_ctrl(&mut self, val: u8) {
        self.length.write_ctrl((val & 0x20) == 0x20); // D5
        self.envelope.write_ctrl(val);
        self.duty = (val & 0xC0) >> 6;
    }

    /// $4001/$4005 Pulse sweep
    pub fn write_sweep(&mut self, val: u8) {
        self.sweep.enabled = (val & 0x80) == 0x80;
        self.sweep.negate = (val & 0x08) == 0x08;
        self.sweep.period = ((val & 0x70) >> 4) + 1;
        self.sweep.shift = val & 0x07;
        self.update_target_period();
        self.sweep.reload = true;
    }

    /// $4002/$4006 Pulse timer lo
    pub fn write_timer_lo(&mut self, val: u8) {
        self.set_period(self.period & 0x0700 | u16::from(val));
    }

    /// $4003/$4007 Pulse timer hi
    pub fn write_timer_hi(&mut self, val: u8) {
        self.length.write(val >> 3);
        self.set_period(self.period & 0xFF | (u16::from(val & 0x07) << 8));
        self.duty_pos = 0;
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

    /// Run the timer up to `cycle`, advancing the duty sequencer and emitting
    /// one sample per underflow.
    pub fn run(&mut self, cycle: u64, samples: &mut Vec<ChannelSample>) {
        let channel = self.output_channel();
        while self.timer.run(cycle) {
            self.duty_pos = self.duty_pos.wrapping_sub(1) & 0x07;
            samples.push(ChannelSample {
                channel,
                cycle: self.timer.cycle,
                level: self.output(),
            });
        }
    }
}

impl Sample for Pulse {
    //                  Sweep -----> Timer
    //                    |            |
    //                    |            |
    //                    |            v
    //                    |        Sequencer   Length Counter
    //                    |            |             |
    //                    |            |             |
    //                    v            v             v
    // Envelope -------> Gate -----> Gate -------> Gate --->(to mixer)
    fn output(&self) -> u8 {
        if self.is_muted() {
            0
        } else {
            Self::DUTY_TABLE[self.duty as usize][self.duty_pos as usize] * self.volume()
        }
    }
}

impl Clock for Pulse {
    fn clock(&mut self) -> u64 {
        if self.timer.clock() > 0 {
            self.duty_pos = self.duty_pos.wrapping_sub(1) & 0x07;
            1
        } else {
            0
        }
    }
}

impl Reset for Pulse {
    fn reset(&mut self, kind: ResetKind) {
        self.timer.reset(kind);
        self.length.reset(kind);
        self.envelope.reset(kind);
        self.sweep.reset(kind);
        self.period = 0;
        self.update_target_period();
        self.duty = 0;
        self.duty_pos = 0;
    }
}

/// APU Sweep provides frequency sweeping for the APU pulse channels.
///
/// See: <https://www.nesdev.org/wiki/APU_Sweep>
#[derive(Default, Debug, Clone, Serialize, Deserialize)]
pub struct Sweep {
    pub enabled: bool,
    pub negate: bool,
    pub reload: bool,
    pub shift: u8,
    pub divider: u8,
    pub period: u8,
    /// Recomputed on every period change; out of range means the channel is muted.
    pub target_period: u16,
}

impl Sweep {
    pub const fn new() -> Self {
        Self {
            enabled: false,
            negate: false,
            reload: false,
            shift: 0,
            divider: 0,
            period: 0,
            target_period: 0,
        }
    }
}

impl Reset for Sweep {
    fn reset(&mut self, _kind: ResetKind) {
        self.enabled = false;
        self.negate = false;
        self.reload = false;
        self.shift = 0;
        self.divider = 0;
        self.period = 0;
        self.target_period = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready_pulse() -> Pulse {
        let mut pulse = Pulse::new(PulseChannel::One);
        pulse.set_enabled(true);
        pulse.write_ctrl(0xBF); // 50% duty, halt, constant volume 15
        pulse
    }

    #[test]
    fn duty_cycle_alternates() {
        let mut pulse = ready_pulse();
        pulse.write_timer_lo(0x08);
        pulse.write_timer_hi(0x00);
        pulse.length.commit();

        // 50% duty: 4 high steps then 4 low steps per 8-step sequence.
        let mut levels = Vec::new();
        for _ in 0..8 {
            while pulse.clock() == 0 {}
            levels.push(pulse.output());
        }
        assert_eq!(levels.iter().filter(|&&l| l == 15).count(), 4);
        assert_eq!(levels.iter().filter(|&&l| l == 0).count(), 4);
    }

    #[test]
    fn low_period_mutes() {
        let mut pulse = ready_pulse();
        pulse.write_timer_lo(0x07);
        pulse.write_timer_hi(0x00);
        pulse.length.commit();
        assert!(pulse.is_muted());
        for _ in 0..64 {
            pulse.clock();
            assert_eq!(pulse.output(), 0);
        }
    }

    #[test]
    fn target_period_overflow_mutes() {
        let mut pulse = ready_pulse();
        // Period 0x400 with shift 0 targets 0x800, out of 11-bit range.
        pulse.write_timer_lo(0x00);
        pulse.write_timer_hi(0x04);
        pulse.length.commit();
        assert!(pulse.is_muted());

        // Negate mode brings the target back in range.
        pulse.write_sweep(0x08);
        assert!(!pulse.is_muted());
    }

    #[test]
    fn sweep_subtract_modes_differ_by_one() {
        let mut pulse1 = Pulse::new(PulseChannel::One);
        let mut pulse2 = Pulse::new(PulseChannel::Two);
        for pulse in [&mut pulse1, &mut pulse2] {
            pulse.set_enabled(true);
            pulse.write_sweep(0x89); // enabled, negate, shift 1
            pulse.write_timer_lo(0x40);
            pulse.write_timer_hi(0x00);
        }
        assert_eq!(pulse2.sweep.target_period, 0x40 - 0x20);
        assert_eq!(pulse1.sweep.target_period, 0x40 - 0x20 - 1);
    }
}
