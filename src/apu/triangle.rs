//! APU Triangle Channel implementation.
//!
//! See: <https://www.nesdev.org/wiki/APU_Triangle>

use crate::{
    apu::{length_counter::LengthCounter, timer::Timer, Channel, ChannelSample},
    common::{Clock, Reset, ResetKind, Sample},
};
use serde::{Deserialize, Serialize};

/// APU Triangle Channel provides triangle wave generation: a fixed 32-step
/// ramp gated by both the length counter and the linear counter.
///
/// See: <https://www.nesdev.org/wiki/APU_Triangle>
#[derive(Debug, Clone, Serialize, Deserialize)]
#[must_use]
pub struct Triangle {
    pub timer: Timer,
    pub sequence: u8,
    pub length: LengthCounter,
    pub linear: LinearCounter,
    /// Suppress sample emission at ultrasonic periods (< 2) to avoid DC
    /// artifacts in the unfiltered stream. Off by default for accuracy.
    pub silence_high_freq: bool,
}

impl Default for Triangle {
    fn default() -> Self {
        Self::new()
    }
}

impl Triangle {
    const SEQUENCE: [u8; 32] = [
        15, 14, 13, 12, 11, 10, 9, 8, 7, 6, 5, 4, 3, 2, 1, 0, 0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10,
        11, 12, 13, 14, 15,
    ];

    pub const fn new() -> Self {
        Self {
            timer: Timer::new(0),
            sequence: 0,
            length: LengthCounter::new(Channel::Triangle),
            linear: LinearCounter::new(),
            silence_high_freq: false,
        }
    }

    pub fn clock_quarter_frame(&mut self) {
        self.linear.clock();
    }

    pub fn clock_half_frame(&mut self) {
        self.clock_quarter_frame();
        self.length.clock();
    }

    /// $4008 Linear counter control
    pub const fn write_linear_counter(&mut self, val: u8) {
        self.linear.control = (val & 0x80) == 0x80; // D7
        self.linear.write(val & 0x7F); // D6..D0
        self.length.write_ctrl(self.linear.control); // D7
    }

    /// $400A Triangle timer lo
    pub fn write_timer_lo(&mut self, val: u8) {
        self.timer.period = (self.timer.period & 0xFF00) | u64::from(val); // D7..D0
    }

    /// $400B Triangle timer hi
    pub fn write_timer_hi(&mut self, val: u8) {
        self.length.write(val >> 3);
        self.timer.period = (self.timer.period & 0x00FF) | (u64::from(val & 0x07) << 8); // D2..D0
        self.linear.reload = true;
    }

    pub const fn set_enabled(&mut self, enabled: bool) {
        self.length.set_enabled(enabled);
    }

    /// Run the timer up to `cycle`. The sequencer only advances while both
    /// counters are non-zero; when gated, the channel holds its last level.
    pub fn run(&mut self, cycle: u64, samples: &mut Vec<ChannelSample>) {
        while self.timer.run(cycle) {
            if self.length.counter > 0 && self.linear.counter > 0 {
                self.sequence = (self.sequence + 1) & 0x1F;
                if !(self.silence_high_freq && self.timer.period < 2) {
                    samples.push(ChannelSample {
                        channel: Channel::Triangle,
                        cycle: self.timer.cycle,
                        level: self.output(),
                    });
                }
            }
        }
    }
}

impl Sample for Triangle {
    //       Linear Counter   Length Counter
    //             |                |
    //             v                v
    // Timer ---> Gate ----------> Gate ---> Sequencer ---> (to mixer)
    fn output(&self) -> u8 {
        Self::SEQUENCE[self.sequence as usize]
    }
}

impl Clock for Triangle {
    fn clock(&mut self) -> u64 {
        if self.timer.clock() > 0 && self.length.counter > 0 && self.linear.counter > 0 {
            self.sequence = (self.sequence + 1) & 0x1F;
            1
        } else {
            0
        }
    }
}

impl Reset for Triangle {
    fn reset(&mut self, kind: ResetKind) {
        self.timer.reset(kind);
        self.length.reset(kind);
        self.linear.reset(kind);
        self.sequence = 0;
    }
}

/// APU Linear Counter provides duration control for the APU triangle channel,
/// clocked by quarter frames.
///
/// See: <https://www.nesdev.org/wiki/APU_Triangle>
#[derive(Default, Debug, Clone, Serialize, Deserialize)]
#[must_use]
pub struct LinearCounter {
    pub reload: bool,
    pub control: bool,
    pub reload_value: u8,
    pub counter: u8,
}

impl LinearCounter {
    pub const fn new() -> Self {
        Self {
            reload: false,
            control: false,
            reload_value: 0,
            counter: 0,
        }
    }

    pub const fn write(&mut self, val: u8) {
        self.reload_value = val;
    }
}

impl Clock for LinearCounter {
    fn clock(&mut self) -> u64 {
        if self.reload {
            self.counter = self.reload_value;
        } else if self.counter > 0 {
            self.counter -= 1;
        }
        if !self.control {
            self.reload = false;
        }
        1
    }
}

impl Reset for LinearCounter {
    fn reset(&mut self, _kind: ResetKind) {
        self.counter = 0;
        self.reload_value = 0;
        self.reload = false;
        self.control = false;
    }
}
