//! Register-level tests driving the APU through its public CPU-facing surface
//! with a scripted CPU collaborator and a collecting sample sink.

use nes_apu::prelude::*;

#[derive(Default, Debug, Clone)]
struct TestCpu {
    irqs: Irq,
    stalled: u64,
    dmc_reads: Vec<u16>,
    sample_byte: u8,
}

impl CpuBus for TestCpu {
    fn stall_for_dmc(&mut self, cycles: u8) {
        self.stalled += u64::from(cycles);
    }

    fn dmc_read(&mut self, addr: u16) -> u8 {
        self.dmc_reads.push(addr);
        self.sample_byte
    }

    fn set_irq(&mut self, source: Irq) {
        self.irqs.insert(source);
    }

    fn clear_irq(&mut self, source: Irq) {
        self.irqs.remove(source);
    }
}

#[derive(Default, Debug, Clone, PartialEq, Eq)]
struct SampleSink {
    frames: Vec<(u64, Vec<ChannelSample>)>,
}

impl Mixer for SampleSink {
    fn consume(&mut self, frame_len: u64, samples: &[ChannelSample]) {
        self.frames.push((frame_len, samples.to_vec()));
    }
}

fn new_apu(region: NesRegion) -> (Apu, TestCpu) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let mut apu = Apu::new(region);
    apu.reset(ResetKind::Hard);
    (apu, TestCpu::default())
}

fn clock(apu: &mut Apu, cpu: &mut TestCpu, cycles: u64) {
    for _ in 0..cycles {
        apu.clock(cpu);
    }
}

/// Force the channels all the way up to the current cycle.
fn catch_up(apu: &mut Apu, cpu: &mut TestCpu) {
    let cycle = apu.master_cycle;
    apu.run(cycle, cpu);
}

fn channel_stream(samples: &[ChannelSample], channel: Channel) -> Vec<(u64, u8)> {
    samples
        .iter()
        .filter(|s| s.channel == channel)
        .map(|s| (s.cycle, s.level))
        .collect()
}

#[test]
fn pulse_frequency() {
    let (mut apu, mut cpu) = new_apu(NesRegion::Ntsc);

    apu.write(0x4015, 0x01, &mut cpu);
    apu.write(0x4000, 0xBF, &mut cpu); // 50% duty, halt, constant volume 15
    apu.write(0x4002, 0xFE, &mut cpu);
    apu.write(0x4003, 0x00, &mut cpu);
    assert_eq!(apu.pulse1.period, 0x0FE);

    clock(&mut apu, &mut cpu, 6000);
    catch_up(&mut apu, &mut cpu);
    assert_eq!(apu.read_status(&mut cpu) & 0x01, 0x01);

    let events: Vec<_> = channel_stream(&apu.samples, Channel::Pulse1)
        .into_iter()
        .filter(|&(cycle, _)| cycle > 0)
        .collect();
    assert!(events.len() >= 11);

    // The sequencer steps every (period + 1) * 2 CPU cycles.
    for pair in events.windows(2) {
        assert_eq!(pair[1].0 - pair[0].0, (0x0FE + 1) * 2);
    }
    // 50% duty: the level alternates between 15 and 0 every four steps.
    for (i, &(_, level)) in events.iter().enumerate() {
        let expected = if (i / 4) % 2 == 0 { 15 } else { 0 };
        assert_eq!(level, expected, "event {i}");
    }
}

#[test]
fn triangle_silent_on_linear_underrun() {
    let (mut apu, mut cpu) = new_apu(NesRegion::Ntsc);

    apu.write(0x4008, 0x00, &mut cpu); // linear reload value 0
    apu.write(0x400A, 0x10, &mut cpu);
    apu.write(0x400B, 0x00, &mut cpu);
    apu.write(0x4015, 0x04, &mut cpu);

    // Run past the first quarter-frame tick; the linear counter reloads to 0
    // and the sequencer never advances.
    clock(&mut apu, &mut cpu, 10_000);
    catch_up(&mut apu, &mut cpu);

    assert_eq!(apu.triangle.linear.counter, 0);
    assert_eq!(apu.triangle.sequence, 0);
    assert!(channel_stream(&apu.samples, Channel::Triangle).is_empty());
}

#[test]
fn noise_short_mode_period() {
    let (mut apu, mut cpu) = new_apu(NesRegion::Ntsc);

    apu.write(0x400C, 0x30, &mut cpu);
    apu.write(0x400E, 0x80, &mut cpu); // mode 1, rate index 0 (period 4)
    apu.write(0x400F, 0x08, &mut cpu);
    apu.write(0x4015, 0x08, &mut cpu);

    // Mid-orbit the register must differ from its seed value.
    clock(&mut apu, &mut cpu, 186);
    catch_up(&mut apu, &mut cpu);
    assert_ne!(apu.noise.shift, 1);

    // 93 timer clocks at 4 CPU cycles apiece complete the short orbit.
    clock(&mut apu, &mut cpu, 372 - 186);
    catch_up(&mut apu, &mut cpu);
    assert_eq!(apu.noise.shift, 1);
}

#[test]
fn dmc_dma_and_irq() {
    let (mut apu, mut cpu) = new_apu(NesRegion::Ntsc);
    cpu.sample_byte = 0xAA;

    apu.write(0x4012, 0x00, &mut cpu); // addr $C000
    apu.write(0x4013, 0x00, &mut cpu); // length 1 byte
    apu.write(0x4010, 0x00, &mut cpu); // no IRQ, no loop, rate 0 (428)
    apu.write(0x4015, 0x10, &mut cpu);
    assert!(cpu.dmc_reads.is_empty());

    // One fetch once the start delay elapses, stalling the CPU 4 cycles.
    clock(&mut apu, &mut cpu, 4);
    assert_eq!(cpu.dmc_reads, vec![0xC000]);
    assert_eq!(cpu.stalled, 4);

    // IRQ disabled: the flag stays clear after the full 8-bit playback.
    clock(&mut apu, &mut cpu, 428 * 8);
    assert!(!apu.irq_pending());

    // Repeat with the IRQ enabled.
    apu.write(0x4010, 0x80, &mut cpu);
    apu.write(0x4015, 0x10, &mut cpu);
    clock(&mut apu, &mut cpu, 4);
    assert_eq!(cpu.dmc_reads.len(), 2);
    clock(&mut apu, &mut cpu, 428 * 8);
    assert!(apu.irq_pending());
    assert!(cpu.irqs.contains(Irq::DMC));
    let status = apu.read_status(&mut cpu);
    assert_eq!(status & 0x80, 0x80);

    // Any $4015 write acknowledges the DMC IRQ.
    apu.write(0x4015, 0x00, &mut cpu);
    assert!(!cpu.irqs.contains(Irq::DMC));
    assert_eq!(apu.read_status(&mut cpu) & 0x80, 0x00);
}

#[test]
fn frame_counter_mode_switch_delay() {
    for (pad, delay) in [(0u64, 3u64), (1, 4)] {
        let (mut apu, mut cpu) = new_apu(NesRegion::Ntsc);

        apu.write(0x4015, 0x01, &mut cpu);
        apu.write(0x4000, 0x00, &mut cpu);
        apu.write(0x4003, 0x00, &mut cpu); // length 10
        clock(&mut apu, &mut cpu, 4 + pad);
        assert_eq!(apu.pulse1.length.counter, 10);

        // Writing $00 must not clock anything immediately.
        apu.write(0x4017, 0x00, &mut cpu);
        clock(&mut apu, &mut cpu, 6);
        assert_eq!(apu.pulse1.length.counter, 10);

        // Bit 7 set: the sequencer resets after the write delay and dispatches
        // one immediate half-frame tick.
        apu.write(0x4017, 0x80, &mut cpu);
        clock(&mut apu, &mut cpu, delay - 1);
        assert_eq!(apu.pulse1.length.counter, 10);
        clock(&mut apu, &mut cpu, 1);
        assert_eq!(apu.pulse1.length.counter, 9);
    }
}

#[test]
fn status_read_clears_frame_irq_not_dmc_irq() {
    let (mut apu, mut cpu) = new_apu(NesRegion::Ntsc);

    // Latch the DMC IRQ with a completed 1-byte sample.
    apu.write(0x4010, 0x80, &mut cpu);
    apu.write(0x4013, 0x00, &mut cpu);
    apu.write(0x4015, 0x10, &mut cpu);
    clock(&mut apu, &mut cpu, 8);
    assert!(apu.dmc.irq_pending);

    // Latch the frame IRQ by running out the 4-step sequence.
    clock(&mut apu, &mut cpu, 29_840);
    let status = apu.read_status(&mut cpu);
    assert_eq!(status & 0xC0, 0xC0);

    // The frame flag drops at the start of the next APU cycle; the DMC flag
    // is untouched by reads.
    clock(&mut apu, &mut cpu, 2);
    let status = apu.read_status(&mut cpu);
    assert_eq!(status & 0x40, 0x00);
    assert_eq!(status & 0x80, 0x80);
    assert!(!cpu.irqs.contains(Irq::FRAME_COUNTER));

    apu.write(0x4015, 0x00, &mut cpu);
    assert_eq!(apu.read_status(&mut cpu) & 0x80, 0x00);
}

#[test]
fn disabled_channels_emit_only_zero() {
    let (mut apu, mut cpu) = new_apu(NesRegion::Ntsc);

    // Configure every channel without ever touching the $4015 enable bits.
    for (addr, val) in [
        (0x4000u16, 0xBFu8),
        (0x4002, 0x50),
        (0x4003, 0x00),
        (0x4008, 0x7F),
        (0x400A, 0x42),
        (0x400B, 0x00),
        (0x400C, 0x3F),
        (0x400E, 0x03),
        (0x400F, 0x08),
        (0x4010, 0x00),
        (0x4012, 0x10),
        (0x4013, 0x01),
    ] {
        apu.write(addr, val, &mut cpu);
    }
    clock(&mut apu, &mut cpu, 40_000);

    let mut sink = SampleSink::default();
    apu.end_frame(&mut cpu, &mut sink);
    let (_, samples) = &sink.frames[0];
    assert!(!samples.is_empty());
    assert!(samples.iter().all(|s| s.level == 0));
    assert!(channel_stream(samples, Channel::Triangle).is_empty());
}

#[test]
fn status_tracks_length_counters() {
    let (mut apu, mut cpu) = new_apu(NesRegion::Ntsc);

    apu.write(0x4015, 0x0F, &mut cpu);
    apu.write(0x4003, 0x08, &mut cpu);
    apu.write(0x4007, 0x08, &mut cpu);
    apu.write(0x400B, 0x08, &mut cpu);
    apu.write(0x400F, 0x08, &mut cpu);
    clock(&mut apu, &mut cpu, 2);
    assert_eq!(apu.read_status(&mut cpu) & 0x1F, 0x0F);

    // Clearing the enable bits zeroes the counters immediately.
    apu.write(0x4015, 0x00, &mut cpu);
    assert_eq!(apu.read_status(&mut cpu) & 0x1F, 0x00);
}

#[test]
fn lazy_and_eager_clocking_match() {
    let (mut eager, mut cpu_e) = new_apu(NesRegion::Ntsc);
    let (mut lazy, mut cpu_l) = new_apu(NesRegion::Ntsc);

    let writes: &[(u64, u16, u8)] = &[
        (0, 0x4015, 0x1F),
        (1, 0x4000, 0x3A),
        (2, 0x4002, 0x80),
        (3, 0x4003, 0x01),
        (4, 0x4008, 0xC4),
        (5, 0x400A, 0x42),
        (6, 0x400B, 0x02),
        (7, 0x400C, 0x35),
        (8, 0x400E, 0x02),
        (9, 0x400F, 0x10),
        (10, 0x4011, 0x40),
        (5000, 0x4017, 0x80),
        (9000, 0x4015, 0x00),
    ];

    for cycle in 0..30_000u64 {
        for &(at, addr, val) in writes {
            if at == cycle {
                eager.write(addr, val, &mut cpu_e);
                lazy.write(addr, val, &mut cpu_l);
            }
        }
        eager.clock(&mut cpu_e);
        catch_up(&mut eager, &mut cpu_e);
        lazy.clock(&mut cpu_l);
    }

    let mut sink_e = SampleSink::default();
    let mut sink_l = SampleSink::default();
    eager.end_frame(&mut cpu_e, &mut sink_e);
    lazy.end_frame(&mut cpu_l, &mut sink_l);

    assert_eq!(cpu_e.dmc_reads, cpu_l.dmc_reads);
    let (_, samples_e) = &sink_e.frames[0];
    let (_, samples_l) = &sink_l.frames[0];
    for channel in [
        Channel::Pulse1,
        Channel::Pulse2,
        Channel::Triangle,
        Channel::Noise,
        Channel::Dmc,
    ] {
        assert_eq!(
            channel_stream(samples_e, channel),
            channel_stream(samples_l, channel),
            "{channel:?} streams diverged",
        );
    }
    assert!(channel_stream(samples_e, Channel::Pulse1)
        .iter()
        .any(|&(_, level)| level > 0));
}

#[test]
fn save_state_round_trip() -> anyhow::Result<()> {
    let (mut apu, mut cpu) = new_apu(NesRegion::Ntsc);

    apu.write(0x4015, 0x1F, &mut cpu);
    apu.write(0x4000, 0x7A, &mut cpu);
    apu.write(0x4002, 0x34, &mut cpu);
    apu.write(0x4003, 0x12, &mut cpu);
    apu.write(0x4008, 0x85, &mut cpu);
    apu.write(0x400A, 0x96, &mut cpu);
    apu.write(0x400B, 0x20, &mut cpu);
    apu.write(0x400F, 0x18, &mut cpu);
    clock(&mut apu, &mut cpu, 12_345);
    let mut sink = SampleSink::default();
    apu.end_frame(&mut cpu, &mut sink);

    let mut data = Vec::new();
    apu.save_state(&mut data)?;
    let mut restored = Apu::new(NesRegion::Ntsc);
    restored.load_state(&mut data.as_slice())?;
    assert_eq!(format!("{apu:?}"), format!("{restored:?}"));

    // The restored APU keeps producing the same stream.
    let mut cpu_r = TestCpu::default();
    cpu_r.irqs = cpu.irqs;
    clock(&mut apu, &mut cpu, 10_000);
    clock(&mut restored, &mut cpu_r, 10_000);
    let mut sink_a = SampleSink::default();
    let mut sink_r = SampleSink::default();
    apu.end_frame(&mut cpu, &mut sink_a);
    restored.end_frame(&mut cpu_r, &mut sink_r);
    assert_eq!(sink_a, sink_r);
    assert_eq!(format!("{apu:?}"), format!("{restored:?}"));

    Ok(())
}

#[test]
fn load_state_failure_leaves_reset_state() {
    let (mut apu, mut cpu) = new_apu(NesRegion::Ntsc);
    apu.write(0x4015, 0x0F, &mut cpu);
    apu.write(0x4003, 0x08, &mut cpu);
    clock(&mut apu, &mut cpu, 100);

    let garbage = [0x55u8; 32];
    assert!(apu.load_state(&mut &garbage[..]).is_err());
    assert_eq!(apu.peek_status(), 0x00);
    assert_eq!(apu.cycle, 0);
    assert_eq!(apu.master_cycle, 0);
}

#[test]
fn regional_frame_irq_timing() {
    // PAL raises the frame IRQ later than NTSC would.
    let (mut apu, mut cpu) = new_apu(NesRegion::Pal);
    clock(&mut apu, &mut cpu, 30_500);
    assert!(!apu.irq_pending());
    clock(&mut apu, &mut cpu, 2_800);
    assert!(apu.irq_pending());

    // Dendy uses the NTSC sequencer table.
    let (mut apu, mut cpu) = new_apu(NesRegion::Dendy);
    clock(&mut apu, &mut cpu, 29_840);
    assert!(apu.irq_pending());
    assert!(cpu.irqs.contains(Irq::FRAME_COUNTER));
}

#[test]
fn region_switch_mid_frame_does_not_hang() {
    let (mut apu, mut cpu) = new_apu(NesRegion::Pal);
    clock(&mut apu, &mut cpu, 33_000);

    // Auto is an unresolved region: keep the previous tables.
    apu.set_region(NesRegion::Auto);
    assert_eq!(apu.region(), NesRegion::Pal);

    // PAL left the sequencer beyond several NTSC boundaries; the switch must
    // clamp rather than spin.
    apu.set_region(NesRegion::Ntsc);
    clock(&mut apu, &mut cpu, 40_000);
    catch_up(&mut apu, &mut cpu);
    assert_eq!(apu.region(), NesRegion::Ntsc);
    assert!(apu.frame_counter.cycle < 29_831);
}
