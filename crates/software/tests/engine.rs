//! Drives the [`Engine`] the way the firmware does: USB-MIDI packets in, voltages and edges out.

use embassy_time::{Duration, Instant};
use measurements::Voltage;
use yoctocore_lib::configuration::{ClockDivision, OutputMode, SysExRealtime};
use yoctocore_lib::engine::{Collaborator, Engine, EngineConfig};
use yoctocore_lib::midi::{MidiHandler, sysex_usb_packets, usb_bursts};
use yoctocore_lib::pulse::GateState;
use yoctocore_lib::sysex::SysExHandler;
use yoctocore_lib::tempo::TempoConfig;

/// USB-MIDI packet carrying a single Timing Clock byte.
const CLOCK_PACKET: [u8; 4] = [0x0F, 0xF8, 0x00, 0x00];

#[derive(Default)]
struct Module {
    tempos: Vec<u16>,
    clock_ticks: usize,
    edges: Vec<(u8, GateState)>,
    voltages: [f64; 2],
    scene_code: Vec<u8>,
    calibration: Option<(i32, f32, f32)>,
}

impl MidiHandler for Module {
    fn on_clock_tick(&mut self) {
        self.clock_ticks += 1;
    }
}

impl SysExHandler for Module {
    fn on_scene_code(&mut self, _scene: u8, _output: u8, code: &[u8], append: bool) {
        if !append {
            self.scene_code.clear();
        }
        self.scene_code.extend_from_slice(code);
    }

    fn on_calibration(&mut self, channel: i32, offset: f32, scale: f32) {
        self.calibration = Some((channel, offset, scale));
    }
}

impl Collaborator for Module {
    fn set_output_voltage(&mut self, output: u8, voltage: Voltage) {
        self.voltages[usize::from(output)] = voltage.as_volts();
    }

    fn on_pulse_edge(&mut self, output: u8, state: GateState) {
        self.edges.push((output, state));
    }

    fn on_tempo_change(&mut self, bpm: u16) {
        self.tempos.push(bpm);
    }
}

/// Sends `ticks` clock packets spaced `delta_micros` apart, ticking the engine after each one.
fn run_clock(engine: &mut Engine<2>, module: &mut Module, ticks: u64, delta_micros: u64) -> Instant {
    let mut now = Instant::from_micros(0);
    for i in 0..ticks {
        now = Instant::from_micros(i * delta_micros);
        for burst in usb_bursts(&CLOCK_PACKET) {
            engine.receive(burst, now, module);
        }
        engine.tick(now, module);
    }
    now
}

/// Frames `payload` as SysEx and splits it into USB-MIDI packets.
fn sysex_packets(payload: &[u8]) -> Vec<u8> {
    let mut bytes = vec![0xF0];
    bytes.extend_from_slice(payload);
    bytes.push(0xF7);
    sysex_usb_packets(&bytes).flatten().collect()
}

#[test]
fn steady_clock_is_adopted_within_one_bpm() {
    let mut engine: Engine<2> = Engine::new(EngineConfig::default(), Instant::from_micros(0));
    let mut module = Module::default();
    // one window to anchor plus seven to fill the median ring
    run_clock(&mut engine, &mut module, 8 * 32 + 1, 41_667);

    assert_eq!(8 * 32 + 1, module.clock_ticks);
    assert!(
        (119..=121).contains(&engine.bpm()),
        "Expected about 120 BPM but got {}",
        engine.bpm()
    );
}

#[test]
fn steady_clock_at_eight_ppqn() {
    let config = EngineConfig {
        tempo: TempoConfig {
            ppqn: 8,
            initial_bpm: 100,
            ..TempoConfig::default()
        },
        ..EngineConfig::default()
    };
    let mut engine: Engine<2> = Engine::new(config, Instant::from_micros(0));
    let mut module = Module::default();
    run_clock(&mut engine, &mut module, 8 * 32 + 1, 125_000);

    assert_eq!(vec![120], module.tempos, "Expected left but got right");
    assert_eq!(120, engine.bpm());
}

#[test]
fn new_tempo_retunes_clock_outputs() {
    let config = EngineConfig {
        tempo: TempoConfig {
            initial_bpm: 100,
            ..TempoConfig::default()
        },
        ..EngineConfig::default()
    };
    let mut engine: Engine<2> = Engine::new(config, Instant::from_micros(0));
    let mut module = Module::default();
    engine.set_division(1, ClockDivision::Quarter, &mut module);
    engine.set_mode(1, OutputMode::Clock, Instant::from_micros(0), &mut module);

    run_clock(&mut engine, &mut module, 8 * 32 + 1, 41_667);

    assert_eq!(vec![120], module.tempos, "Expected left but got right");
    let pulse = engine.outputs()[1].pulse();
    assert_eq!(120.0, pulse.bpm());
    assert_eq!(Duration::from_millis(250), pulse.half_period());
    assert!(module.edges.iter().all(|&(output, _)| output == 1));
    assert!(module.edges.len() > 2);
    assert!(
        module.edges.windows(2).all(|pair| pair[0].1 != pair[1].1),
        "Edges should alternate across the tempo change: {:?}",
        module.edges
    );
}

#[test]
fn clock_output_swings_between_levels() {
    let mut engine: Engine<2> = Engine::new(EngineConfig::default(), Instant::from_micros(0));
    let mut module = Module::default();
    engine.set_division(0, ClockDivision::Quarter, &mut module);
    engine.set_levels(0, Voltage::from_volts(0.0), Voltage::from_volts(8.0));
    engine.set_mode(0, OutputMode::Clock, Instant::from_millis(0), &mut module);

    engine.tick(Instant::from_millis(1), &mut module);
    assert_eq!([8.0, 0.0], module.voltages, "Expected left but got right");
    engine.tick(Instant::from_millis(251), &mut module);
    assert_eq!([0.0, 0.0], module.voltages, "Expected left but got right");
}

#[test]
fn manual_output_slews_to_target() {
    let mut engine: Engine<2> = Engine::new(EngineConfig::default(), Instant::from_micros(0));
    let mut module = Module::default();
    engine.set_slew(1, Duration::from_millis(100));
    engine.set_manual_target(1, Voltage::from_volts(-4.0));

    engine.tick(Instant::from_millis(0), &mut module);
    assert_eq!(0.0, module.voltages[1]);
    engine.tick(Instant::from_millis(50), &mut module);
    assert_eq!(-2.0, module.voltages[1]);
    engine.tick(Instant::from_millis(100), &mut module);
    assert_eq!(-4.0, module.voltages[1]);
}

#[test]
fn scene_code_over_usb() {
    let mut engine: Engine<2> = Engine::new(EngineConfig::default(), Instant::from_micros(0));
    let mut module = Module::default();
    let now = Instant::from_micros(0);
    for packets in [sysex_packets(b"LN01print("), sysex_packets(b"LA01'hi')")] {
        for burst in usb_bursts(&packets) {
            engine.receive(burst, now, &mut module);
        }
    }
    assert_eq!(b"print('hi')".to_vec(), module.scene_code, "Expected left but got right");
}

#[test]
fn clock_inside_sysex_is_not_lost() {
    let config = EngineConfig {
        sysex_realtime: SysExRealtime::Interleave,
        ..EngineConfig::default()
    };
    let mut engine: Engine<2> = Engine::new(config, Instant::from_micros(0));
    let mut module = Module::default();
    let now = Instant::from_micros(0);
    let mut packets = sysex_packets(b"calibration2,0.1,0.98");
    // a clock packet between the first two SysEx packets
    let tail = packets.split_off(4);
    packets.extend_from_slice(&CLOCK_PACKET);
    packets.extend_from_slice(&tail);

    for burst in usb_bursts(&packets) {
        engine.receive(burst, now, &mut module);
    }
    assert_eq!(1, module.clock_ticks);
    assert_eq!(Some((2, 0.1, 0.98)), module.calibration, "Expected left but got right");
}
