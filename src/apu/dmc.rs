//! APU DMC (Delta Modulation Channel) implementation.
//!
//! See: <https://www.nesdev.org/wiki/APU_DMC>

use crate::{
    apu::{timer::Timer, Channel, ChannelSample},
    common::{Clock, NesRegion, Regional, Reset, ResetKind, Sample},
};
use serde::{Deserialize, Serialize};
use tracing::trace;

/// APU DMC (Delta Modulation Channel) provides 1-bit delta-encoded sample
/// playback, fetching bytes over the CPU bus one at a time.
///
/// The channel never touches the CPU itself: it raises `dma_pending` and
/// `irq_pending` and the [`Apu`](crate::apu::Apu) aggregator relays them to
/// the host through [`CpuBus`](crate::bus::CpuBus).
///
/// See: <https://www.nesdev.org/wiki/APU_DMC>
#[derive(Debug, Clone, Serialize, Deserialize)]
#[must_use]
pub struct Dmc {
    pub region: NesRegion,
    pub timer: Timer,
    pub irq_enabled: bool,
    pub irq_pending: bool,
    pub loops: bool,
    pub rate_index: u8,
    pub addr: u16,
    pub sample_addr: u16,
    pub bytes_remaining: u16,
    pub sample_length: u16,
    pub sample_buffer: u8,
    pub buffer_empty: bool,
    /// Set when a sample byte must be fetched over the CPU bus.
    pub dma_pending: bool,
    /// Countdown between enabling playback and the first DMA fetch.
    pub start_delay: u8,
    /// Countdown between disabling playback and `bytes_remaining` clearing.
    pub disable_delay: u8,
    pub output_level: u8,
    pub bits_remaining: u8,
    pub shift: u8,
    pub silence: bool,
    pub should_clock: bool,
}

impl Default for Dmc {
    fn default() -> Self {
        Self::new(NesRegion::Ntsc)
    }
}

impl Dmc {
    /// CPU cycles the nominal sample-byte fetch steals from the CPU.
    pub const DMA_STALL_CYCLES: u8 = 4;

    const PERIOD_TABLE_NTSC: [u64; 16] = [
        428, 380, 340, 320, 286, 254, 226, 214, 190, 160, 142, 128, 106, 84, 72, 54,
    ];
    const PERIOD_TABLE_PAL: [u64; 16] = [
        398, 354, 316, 298, 276, 236, 210, 198, 176, 148, 132, 118, 98, 78, 66, 50,
    ];

    pub const fn new(region: NesRegion) -> Self {
        Self {
            region,
            timer: Timer::preload(Self::period(region, 0)),
            irq_enabled: false,
            irq_pending: false,
            loops: false,
            rate_index: 0,
            addr: 0xC000,
            sample_addr: 0xC000,
            bytes_remaining: 0x0000,
            sample_length: 0x0001,
            sample_buffer: 0x00,
            buffer_empty: true,
            dma_pending: false,
            start_delay: 0,
            disable_delay: 0,
            output_level: 0x00,
            bits_remaining: 0x08,
            shift: 0x00,
            silence: true,
            should_clock: false,
        }
    }

    #[must_use]
    pub fn irq_pending_in(&self, cycles_to_run: u64) -> bool {
        if self.irq_enabled && self.bytes_remaining > 0 {
            let cycles_to_empty = (u64::from(self.bits_remaining)
                + u64::from(self.bytes_remaining - 1) * 8)
                * self.timer.period;
            cycles_to_run >= cycles_to_empty
        } else {
            false
        }
    }

    #[must_use]
    pub const fn dma_addr(&self) -> u16 {
        self.addr
    }

    fn restart_sample(&mut self) {
        self.addr = self.sample_addr;
        self.bytes_remaining = self.sample_length;
        trace!(
            "APU DMC sample started. bytes remaining: {}",
            self.bytes_remaining
        );
        self.should_clock = self.bytes_remaining > 0;
    }

    /// Accept a sample byte fetched from `dma_addr()` by the CPU collaborator.
    pub fn load_buffer(&mut self, val: u8) {
        if self.bytes_remaining > 0 {
            self.sample_buffer = val;
            self.buffer_empty = false;
            // The fetch address wraps within the CPU's upper 32 KiB.
            if self.addr == 0xFFFF {
                self.addr = 0x8000;
            } else {
                self.addr += 1;
            }
            self.bytes_remaining -= 1;
            trace!("APU DMC bytes remaining: {}", self.bytes_remaining);
            if self.bytes_remaining == 0 {
                self.should_clock = false;
                if self.loops {
                    self.restart_sample();
                } else if self.irq_enabled {
                    self.irq_pending = true;
                }
            }
        }
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

    /// $4010 DMC timer
    pub const fn write_timer(&mut self, val: u8) {
        self.irq_enabled = (val & 0x80) == 0x80;
        self.loops = (val & 0x40) == 0x40;
        self.rate_index = val & 0x0F;
        self.timer.period = Self::period(self.region, val);
        if !self.irq_enabled {
            self.irq_pending = false;
        }
    }

    /// $4011 DMC output
    pub const fn write_output(&mut self, val: u8) {
        self.output_level = val & 0x7F;
    }

    /// $4012 DMC addr load
    pub const fn write_addr(&mut self, val: u8) {
        self.sample_addr = 0xC000 | ((val as u16) << 6);
    }

    /// $4013 DMC length
    pub const fn write_length(&mut self, val: u8) {
        self.sample_length = ((val as u16) << 4) | 1;
    }

    /// $4015 D4. Enabling restarts playback only when the previous sample has
    /// finished; disabling clears `bytes_remaining` after a short delay without
    /// aborting an in-flight fetch. Both delays are seeded from CPU-cycle
    /// parity; the exact counts track the current test-ROM findings.
    pub fn set_enabled(&mut self, enabled: bool, cycle: u64) {
        if enabled {
            self.disable_delay = 0;
            if self.bytes_remaining == 0 {
                self.restart_sample();
                self.start_delay = if cycle & 0x01 == 0x00 { 2 } else { 3 };
            }
        } else if self.disable_delay == 0 {
            self.disable_delay = if cycle & 0x01 == 0x00 { 2 } else { 3 };
        }
    }

    /// Advance the start/disable delay counters by one CPU cycle and report
    /// whether the channel needs clocking. Called once per CPU cycle from the
    /// aggregator's scheduling hint.
    pub fn should_clock(&mut self) -> bool {
        if self.disable_delay > 0 {
            self.disable_delay -= 1;
            if self.disable_delay == 0 {
                self.bytes_remaining = 0;
                self.should_clock = false;
            }
        }
        if self.start_delay > 0 {
            self.start_delay -= 1;
            if self.start_delay == 0 && self.buffer_empty && self.bytes_remaining > 0 {
                trace!("APU DMC DMA pending");
                self.dma_pending = true;
            }
        }
        self.should_clock || self.dma_pending || self.start_delay > 0 || self.disable_delay > 0
    }

    /// Run the timer up to `cycle`. The output level always gets emitted, even
    /// while silent, so $4011 writes behave as a 7-bit PCM DAC.
    pub fn run(&mut self, cycle: u64, samples: &mut Vec<ChannelSample>) {
        while self.timer.run(cycle) {
            self.clock_output();
            samples.push(ChannelSample {
                channel: Channel::Dmc,
                cycle: self.timer.cycle,
                level: self.output_level,
            });
        }
    }

    fn clock_output(&mut self) {
        if !self.silence {
            // Update output level but clamp to 0..=127 range
            if self.shift & 0x01 == 0x01 {
                if self.output_level <= 125 {
                    self.output_level += 2;
                }
            } else if self.output_level >= 2 {
                self.output_level -= 2;
            }
            self.shift >>= 1;
        }

        if self.bits_remaining > 0 {
            self.bits_remaining -= 1;
        }

        if self.bits_remaining == 0 {
            self.bits_remaining = 8;
            self.silence = self.buffer_empty;
            if !self.buffer_empty {
                self.shift = self.sample_buffer;
                self.buffer_empty = true;
                if self.bytes_remaining > 0 {
                    trace!("APU DMC DMA pending");
                    self.dma_pending = true;
                }
            }
        }
    }
}

impl Sample for Dmc {
    //                          Timer
    //                            |
    //                            v
    // Reader ---> Buffer ---> Shifter ---> Output level ---> (to the mixer)
    fn output(&self) -> u8 {
        self.output_level
    }
}

impl Clock for Dmc {
    fn clock(&mut self) -> u64 {
        if self.timer.clock() > 0 {
            self.clock_output();
            1
        } else {
            0
        }
    }
}

impl Regional for Dmc {
    fn region(&self) -> NesRegion {
        self.region
    }

    fn set_region(&mut self, region: NesRegion) {
        self.region = region;
        self.timer.period = Self::period(region, self.rate_index);
    }
}

impl Reset for Dmc {
    fn reset(&mut self, kind: ResetKind) {
        self.timer.reset(kind);
        self.timer.period = Self::period(self.region, 0);
        self.timer.reload();
        // Start one cycle late to line the first fetch up with the CPU.
        self.timer.cycle += 1;
        if let ResetKind::Hard = kind {
            self.sample_addr = 0xC000;
            self.sample_length = 1;
        }
        self.irq_enabled = false;
        self.irq_pending = false;
        self.loops = false;
        self.rate_index = 0;
        self.addr = 0xC000;
        self.bytes_remaining = 0;
        self.sample_buffer = 0x00;
        self.buffer_empty = true;
        self.dma_pending = false;
        self.start_delay = 0;
        self.disable_delay = 0;
        self.output_level = 0x00;
        self.bits_remaining = 0x08;
        self.shift = 0x00;
        self.silence = true;
        self.should_clock = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_and_length_registers_scale() {
        let mut dmc = Dmc::new(NesRegion::Ntsc);
        dmc.write_addr(0x01);
        assert_eq!(dmc.sample_addr, 0xC040);
        dmc.write_addr(0xFF);
        assert_eq!(dmc.sample_addr, 0xFFC0);
        dmc.write_length(0x00);
        assert_eq!(dmc.sample_length, 1);
        dmc.write_length(0xFF);
        assert_eq!(dmc.sample_length, 0xFF1);
    }

    #[test]
    fn rate_tables_are_regional() {
        for (region, table) in [
            (NesRegion::Ntsc, &Dmc::PERIOD_TABLE_NTSC),
            (NesRegion::Pal, &Dmc::PERIOD_TABLE_PAL),
        ] {
            let mut dmc = Dmc::new(region);
            for (index, &entry) in table.iter().enumerate() {
                dmc.write_timer(index as u8);
                assert_eq!(dmc.timer.period, entry - 1);
            }
        }
    }

    #[test]
    fn fetch_address_wraps_to_8000() {
        let mut dmc = Dmc::new(NesRegion::Ntsc);
        dmc.write_addr(0xFF);
        dmc.write_length(0x01); // 17 bytes
        dmc.set_enabled(true, 0);
        dmc.addr = 0xFFFF;
        dmc.load_buffer(0xAA);
        assert_eq!(dmc.addr, 0x8000);
    }

    #[test]
    fn delta_steps_clamp() {
        let mut dmc = Dmc::new(NesRegion::Ntsc);
        dmc.silence = false;
        dmc.bits_remaining = 8;
        dmc.shift = 0xFF;
        dmc.output_level = 126;
        dmc.clock_output();
        assert_eq!(dmc.output_level, 126);
        dmc.output_level = 1;
        dmc.shift = 0x00;
        dmc.clock_output();
        assert_eq!(dmc.output_level, 1);
    }

    #[test]
    fn sample_end_raises_irq_only_when_enabled() {
        let mut dmc = Dmc::new(NesRegion::Ntsc);
        dmc.write_length(0x00);
        dmc.set_enabled(true, 0);
        assert_eq!(dmc.bytes_remaining, 1);
        dmc.load_buffer(0x55);
        assert!(!dmc.irq_pending);

        dmc.write_timer(0x80);
        dmc.set_enabled(true, 0);
        dmc.load_buffer(0x55);
        assert!(dmc.irq_pending);
    }

    #[test]
    fn looped_sample_reloads_instead_of_irq() {
        let mut dmc = Dmc::new(NesRegion::Ntsc);
        dmc.write_timer(0xC0); // IRQ + loop
        dmc.write_addr(0x04);
        dmc.write_length(0x00);
        dmc.set_enabled(true, 0);
        dmc.load_buffer(0x55);
        assert!(!dmc.irq_pending);
        assert_eq!(dmc.bytes_remaining, 1);
        assert_eq!(dmc.addr, 0xC100);
    }
}
