//! NES APU (Audio Processing Unit) implementation.
//!
//! See: <https://www.nesdev.org/wiki/APU>

use crate::{
    apu::{
        dmc::Dmc,
        frame_counter::{FrameCounter, FrameType},
        noise::Noise,
        pulse::{Pulse, PulseChannel},
        triangle::Triangle,
    },
    bus::{CpuBus, Irq, Mixer},
    common::{NesRegion, Regional, Reset, ResetKind, Sample},
    error, state,
};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use tracing::trace;

pub mod dmc;
pub mod noise;
pub mod pulse;
pub mod triangle;

pub mod envelope;
pub mod frame_counter;
pub mod length_counter;
pub mod timer;

/// [`Apu`] Channel.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[must_use]
pub enum Channel {
    Pulse1,
    Pulse2,
    Triangle,
    Noise,
    Dmc,
}

/// One unfiltered output event: a channel held `level` from `cycle` until its
/// next event. Levels are raw DAC units: 0-15 for the tone channels, 0-127 for
/// the DMC.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[must_use]
pub struct ChannelSample {
    pub channel: Channel,
    pub cycle: u64,
    pub level: u8,
}

/// The two documented accuracy trade-offs. Everything else is fixed hardware
/// behavior.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[must_use]
pub struct Config {
    /// Suppress triangle output at ultrasonic periods (< 2) to avoid DC
    /// artifacts in the unfiltered stream. Default `false` (more accurate).
    pub silence_triangle_high_freq: bool,
    /// Ignore the $400E mode flag, forcing long LFSR sequences. Default
    /// `false` (more accurate).
    pub disable_noise_mode_flag: bool,
}

/// NES APU (Audio Processing Unit).
///
/// Owns the five channels and the frame sequencer, advanced in lockstep with
/// the host CPU via [`Apu::clock`] / [`Apu::run`]. The CPU side of the contract
/// (DMA stalls, sample fetches, IRQ lines) goes through [`CpuBus`]; accumulated
/// samples are handed to a [`Mixer`] at [`Apu::end_frame`].
///
/// See: <https://wiki.nesdev.com/w/index.php/APU>
#[derive(Clone, Serialize, Deserialize)]
#[must_use]
pub struct Apu {
    pub frame_counter: FrameCounter,
    pub region: NesRegion,
    pub config: Config,
    /// Absolute CPU cycle, used for the odd/even write-delay quirks.
    pub cpu_cycle: u64,
    /// Frame-relative cycle the APU has been told about.
    pub master_cycle: u64,
    /// Frame-relative cycle the APU has actually run to.
    pub cycle: u64,
    pub pulse1: Pulse,
    pub pulse2: Pulse,
    pub triangle: Triangle,
    pub noise: Noise,
    pub dmc: Dmc,
    pub should_clock: bool,
    #[serde(skip, default = "Apu::default_samples")]
    pub samples: Vec<ChannelSample>,
}

impl Apu {
    /// Create a new APU instance.
    pub fn new(region: NesRegion) -> Self {
        Self::with_config(region, Config::default())
    }

    pub fn with_config(region: NesRegion, config: Config) -> Self {
        let mut apu = Self {
            frame_counter: FrameCounter::new(region),
            region,
            config,
            cpu_cycle: 0,
            master_cycle: 0,
            cycle: 0,
            pulse1: Pulse::new(PulseChannel::One),
            pulse2: Pulse::new(PulseChannel::Two),
            triangle: Triangle::new(),
            noise: Noise::new(region),
            dmc: Dmc::new(region),
            should_clock: false,
            samples: Self::default_samples(),
        };
        apu.set_config(config);
        apu
    }

    fn default_samples() -> Vec<ChannelSample> {
        Vec::with_capacity(8192)
    }

    #[must_use]
    pub const fn config(&self) -> Config {
        self.config
    }

    pub const fn set_config(&mut self, config: Config) {
        self.config = config;
        self.triangle.silence_high_freq = config.silence_triangle_high_freq;
        self.noise.mode_flag_disabled = config.disable_noise_mode_flag;
    }

    /// Whether the frame counter or the DMC holds an asserted IRQ.
    #[must_use]
    pub const fn irq_pending(&self) -> bool {
        self.frame_counter.irq_pending || self.dmc.irq_pending
    }

    /// Hint that the APU must be run in the next `cycles_ahead` CPU cycles:
    /// a pending $4017 write, an imminent frame event, a deferred IRQ-flag
    /// clear, DMC DMA demand, or an imminent DMC IRQ.
    ///
    /// Advances the DMC's small delay counters, so call it once per CPU cycle;
    /// [`Apu::clock`] already does.
    pub fn needs_to_run(&mut self, cycles_ahead: u64) -> bool {
        if self.dmc.should_clock() || self.should_clock {
            self.should_clock = false;
            return true;
        }
        self.frame_counter.should_clock(cycles_ahead) || self.dmc.irq_pending_in(cycles_ahead)
    }

    /// Advance one CPU cycle, lazily falling into [`Apu::run`] only when
    /// something is due. Returns the number of cycles caught up.
    pub fn clock(&mut self, cpu: &mut impl CpuBus) -> u64 {
        self.cpu_cycle = self.cpu_cycle.wrapping_add(1);
        self.master_cycle += 1;
        if self.needs_to_run(self.master_cycle - self.cycle) {
            self.run(self.master_cycle, cpu)
        } else {
            0
        }
    }

    /// Advance all APU state to the given frame-relative CPU cycle: frame
    /// sequencer events first, then every channel up to each event boundary.
    pub fn run(&mut self, cycle: u64, cpu: &mut impl CpuBus) -> u64 {
        self.master_cycle = cycle.max(self.cycle);

        let cycles = self.master_cycle - self.cycle;
        trace!(
            "APU cycles to run: {} ({} - {}) - CYC:{}",
            cycles,
            self.master_cycle,
            self.cycle,
            self.cpu_cycle,
        );
        while self.master_cycle - self.cycle > 0 {
            self.frame_counter.apply_irq_clear(self.cpu_cycle);

            self.cycle += self
                .frame_counter
                .clock_with(self.master_cycle - self.cycle, |ty| match ty {
                    FrameType::Quarter => {
                        self.pulse1.clock_quarter_frame();
                        self.pulse2.clock_quarter_frame();
                        self.triangle.clock_quarter_frame();
                        self.noise.clock_quarter_frame();
                    }
                    FrameType::Half => {
                        self.pulse1.clock_half_frame();
                        self.pulse2.clock_half_frame();
                        self.triangle.clock_half_frame();
                        self.noise.clock_half_frame();
                    }
                    FrameType::None => (),
                });

            self.pulse1.length.commit();
            self.pulse2.length.commit();
            self.triangle.length.commit();
            self.noise.length.commit();

            let cycle = self.cycle;
            self.pulse1.run(cycle, &mut self.samples);
            self.pulse2.run(cycle, &mut self.samples);
            self.triangle.run(cycle, &mut self.samples);
            self.noise.run(cycle, &mut self.samples);
            self.dmc.run(cycle, &mut self.samples);

            if self.dmc.dma_pending {
                self.run_dmc_dma(cpu);
            }
        }

        self.sync_irq(cpu);

        cycles
    }

    /// Catch up, hand the frame's samples to the mixer, and rebase all
    /// per-frame cycle bookkeeping to zero.
    pub fn end_frame(&mut self, cpu: &mut impl CpuBus, mixer: &mut impl Mixer) {
        self.run(self.master_cycle, cpu);
        debug_assert_eq!(self.master_cycle, self.cycle);
        mixer.consume(self.cycle, &self.samples);
        self.samples.clear();

        self.master_cycle = 0;
        self.cycle = 0;
        self.pulse1.timer.cycle = 0;
        self.pulse2.timer.cycle = 0;
        self.triangle.timer.cycle = 0;
        self.noise.timer.cycle = 0;
        self.dmc.timer.cycle = 0;
    }

    /// Write a register in [$4000, $4017]. Writes to unused addresses in the
    /// range are ignored.
    pub fn write(&mut self, addr: u16, val: u8, cpu: &mut impl CpuBus) {
        self.run(self.master_cycle, cpu);
        trace!("APU ${addr:04X} write: ${val:02X} - CYC:{}", self.cpu_cycle);
        match addr {
            0x4000 => {
                self.pulse1.write_ctrl(val);
                self.should_clock = true;
            }
            0x4001 => self.pulse1.write_sweep(val),
            0x4002 => self.pulse1.write_timer_lo(val),
            0x4003 => {
                self.pulse1.write_timer_hi(val);
                self.should_clock |= self.pulse1.length.enabled;
            }
            0x4004 => {
                self.pulse2.write_ctrl(val);
                self.should_clock = true;
            }
            0x4005 => self.pulse2.write_sweep(val),
            0x4006 => self.pulse2.write_timer_lo(val),
            0x4007 => {
                self.pulse2.write_timer_hi(val);
                self.should_clock |= self.pulse2.length.enabled;
            }
            0x4008 => {
                self.triangle.write_linear_counter(val);
                self.should_clock = true;
            }
            0x400A => self.triangle.write_timer_lo(val),
            0x400B => {
                self.triangle.write_timer_hi(val);
                self.should_clock |= self.triangle.length.enabled;
            }
            0x400C => {
                self.noise.write_ctrl(val);
                self.should_clock = true;
            }
            0x400E => self.noise.write_timer(val),
            0x400F => {
                self.noise.write_length(val);
                self.should_clock |= self.noise.length.enabled;
            }
            0x4010 => self.dmc.write_timer(val),
            0x4011 => self.dmc.write_output(val),
            0x4012 => self.dmc.write_addr(val),
            0x4013 => self.dmc.write_length(val),
            0x4015 => self.write_status(val),
            0x4017 => self.frame_counter.write(val, self.cpu_cycle),
            _ => (),
        }

        // Mute and level transitions are audible immediately, not at the next
        // timer underflow. The triangle is the exception: its DAC holds the
        // last sequence level, which the sink reconstructs from prior events.
        match addr {
            0x4000..=0x4003 => self.record_output(Channel::Pulse1),
            0x4004..=0x4007 => self.record_output(Channel::Pulse2),
            0x400C | 0x400E | 0x400F => self.record_output(Channel::Noise),
            0x4010..=0x4013 => self.record_output(Channel::Dmc),
            0x4015 => {
                self.record_output(Channel::Pulse1);
                self.record_output(Channel::Pulse2);
                self.record_output(Channel::Noise);
                self.record_output(Channel::Dmc);
            }
            _ => (),
        }

        self.sync_irq(cpu);
    }

    /// Read a register in [$4000, $4017]. Only $4015 is APU-readable; every
    /// other address reads back 0.
    pub fn read(&mut self, addr: u16, cpu: &mut impl CpuBus) -> u8 {
        match addr {
            0x4015 => self.read_status(cpu),
            _ => 0x00,
        }
    }

    /// Read APU Status.
    ///
    /// $4015   if-d nt21   DMC IRQ, frame IRQ, length counter statuses
    ///
    /// The reader observes the frame IRQ flag as of the read; the flag itself
    /// drops at the start of the next APU cycle. The DMC IRQ flag is unaffected.
    pub fn read_status(&mut self, cpu: &mut impl CpuBus) -> u8 {
        self.run(self.master_cycle, cpu);
        self.frame_counter.apply_irq_clear(self.cpu_cycle);
        let val = self.peek_status();
        trace!("APU $4015 read: ${val:02X} - CYC:{}", self.cpu_cycle);
        self.frame_counter.schedule_irq_clear(self.cpu_cycle);
        val
    }

    /// Read APU Status without side-effects.
    ///
    /// Non-mutating version of `read_status`.
    #[must_use]
    pub const fn peek_status(&self) -> u8 {
        let mut status = 0x00;
        if self.pulse1.length.counter > 0 {
            status |= 0x01;
        }
        if self.pulse2.length.counter > 0 {
            status |= 0x02;
        }
        if self.triangle.length.counter > 0 {
            status |= 0x04;
        }
        if self.noise.length.counter > 0 {
            status |= 0x08;
        }
        if self.dmc.bytes_remaining > 0 {
            status |= 0x10;
        }
        if self.frame_counter.irq_pending {
            status |= 0x40;
        }
        if self.dmc.irq_pending {
            status |= 0x80;
        }
        status
    }

    /// Write APU Status.
    ///
    /// $4015   ---d nt21   length ctr enable: DMC, noise, triangle, pulse 2, 1
    fn write_status(&mut self, val: u8) {
        self.dmc.irq_pending = false;
        self.pulse1.set_enabled(val & 0x01 == 0x01);
        self.pulse2.set_enabled(val & 0x02 == 0x02);
        self.triangle.set_enabled(val & 0x04 == 0x04);
        self.noise.set_enabled(val & 0x08 == 0x08);
        self.dmc.set_enabled(val & 0x10 == 0x10, self.cpu_cycle);
    }

    /// Serialize the full APU state into `writer`.
    ///
    /// # Errors
    ///
    /// If the state fails to serialize, then an error is returned.
    pub fn save_state(&self, writer: &mut impl Write) -> error::Result<()> {
        state::save(writer, self)
    }

    /// Restore the full APU state from `reader`. The host configuration is
    /// kept. On failure the APU is left hard-reset.
    ///
    /// # Errors
    ///
    /// If the state fails to validate or deserialize, then an error is
    /// returned.
    pub fn load_state(&mut self, reader: &mut impl Read) -> error::Result<()> {
        match state::load::<_, Self>(reader) {
            Ok(mut apu) => {
                apu.set_config(self.config);
                apu.samples = std::mem::take(&mut self.samples);
                apu.samples.clear();
                *self = apu;
                Ok(())
            }
            Err(err) => {
                self.reset(ResetKind::Hard);
                Err(err)
            }
        }
    }

    fn record_output(&mut self, channel: Channel) {
        let level = match channel {
            Channel::Pulse1 => self.pulse1.output(),
            Channel::Pulse2 => self.pulse2.output(),
            Channel::Triangle => self.triangle.output(),
            Channel::Noise => self.noise.output(),
            Channel::Dmc => self.dmc.output(),
        };
        self.samples.push(ChannelSample {
            channel,
            cycle: self.cycle,
            level,
        });
    }

    /// Honor the DMC's fetch demand: stall the CPU, read the sample byte, and
    /// hand it to the channel.
    fn run_dmc_dma(&mut self, cpu: &mut impl CpuBus) {
        self.dmc.dma_pending = false;
        cpu.stall_for_dmc(Dmc::DMA_STALL_CYCLES);
        let val = cpu.dmc_read(self.dmc.dma_addr());
        self.dmc.load_buffer(val);
    }

    /// Report current IRQ flag levels to the CPU. Both calls are idempotent on
    /// the CPU side, so levels are re-reported rather than edge-tracked.
    fn sync_irq(&mut self, cpu: &mut impl CpuBus) {
        if self.frame_counter.irq_pending {
            cpu.set_irq(Irq::FRAME_COUNTER);
        } else {
            cpu.clear_irq(Irq::FRAME_COUNTER);
        }
        if self.dmc.irq_pending {
            cpu.set_irq(Irq::DMC);
        } else {
            cpu.clear_irq(Irq::DMC);
        }
    }
}

impl Default for Apu {
    fn default() -> Self {
        Self::new(NesRegion::Ntsc)
    }
}

impl Regional for Apu {
    fn region(&self) -> NesRegion {
        self.region
    }

    /// Set the regional timing tables. Only valid at a reset boundary; an
    /// unresolved `Auto` region keeps the previous tables.
    fn set_region(&mut self, region: NesRegion) {
        if region.is_auto() || self.region == region {
            return;
        }
        self.region = region;
        self.frame_counter.set_region(region);
        self.noise.set_region(region);
        self.dmc.set_region(region);
    }
}

impl Reset for Apu {
    fn reset(&mut self, kind: ResetKind) {
        self.cpu_cycle = 0;
        self.master_cycle = 0;
        self.cycle = 0;
        self.should_clock = false;
        self.samples.clear();
        self.frame_counter.reset(kind);
        self.pulse1.reset(kind);
        self.pulse2.reset(kind);
        self.triangle.reset(kind);
        self.noise.reset(kind);
        self.dmc.reset(kind);
    }
}

impl std::fmt::Debug for Apu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::result::Result<(), std::fmt::Error> {
        f.debug_struct("Apu")
            .field("region", &self.region)
            .field("cpu_cycle", &self.cpu_cycle)
            .field("master_cycle", &self.master_cycle)
            .field("cycle", &self.cycle)
            .field("frame_counter", &self.frame_counter)
            .field("pulse1", &self.pulse1)
            .field("pulse2", &self.pulse2)
            .field("triangle", &self.triangle)
            .field("noise", &self.noise)
            .field("dmc", &self.dmc)
            .field("samples_len", &self.samples.len())
            .finish()
    }
}
