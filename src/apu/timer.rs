//! Timer abstraction shared by every [`Apu`](crate::apu::Apu) channel.

use crate::common::{Clock, Reset, ResetKind};
use serde::{Deserialize, Serialize};

/// A divider that underflows every `period + 1` CPU cycles, carrying the cycle
/// it has been run up to so channels can be advanced out of lockstep with each
/// other. Every channel shares this loop so they all count cycles identically.
#[derive(Default, Debug, Clone, Serialize, Deserialize)]
#[must_use]
pub struct Timer {
    pub cycle: u64,
    pub counter: u64,
    pub period: u64,
}

impl Timer {
    pub const fn new(period: u64) -> Self {
        Self {
            cycle: 0,
            counter: 0,
            period,
        }
    }

    pub const fn preload(period: u64) -> Self {
        let mut timer = Self::new(period);
        timer.counter = timer.period;
        timer
    }

    pub const fn reload(&mut self) {
        self.counter = self.period;
    }

    /// Advance toward `cycle`, stopping at the first underflow. Returns `true`
    /// on underflow so the caller can step its sequencer and emit a sample, or
    /// `false` once the target cycle is reached. Callers loop until `false`.
    pub const fn run(&mut self, cycle: u64) -> bool {
        if cycle <= self.cycle {
            return false;
        }
        let cycles = cycle - self.cycle;
        if cycles > self.counter {
            self.cycle += self.counter + 1;
            self.counter = self.period;
            true
        } else {
            self.counter -= cycles;
            self.cycle = cycle;
            false
        }
    }
}

impl Clock for Timer {
    fn clock(&mut self) -> u64 {
        u64::from(self.run(self.cycle + 1))
    }
}

impl Reset for Timer {
    fn reset(&mut self, _kind: ResetKind) {
        self.counter = 0;
        self.period = 0;
        self.cycle = 0;
    }
}
