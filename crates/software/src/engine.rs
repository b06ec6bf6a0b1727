//! Provides the [`Engine`], which owns every piece of real-time state and wires them together.
//!
//! The firmware creates one [`Engine`], feeds it each transport read with [`Engine::receive`] and calls
//! [`Engine::tick`] once per control-loop iteration with a single time reading. Everything the engine wants done in
//! the outside world goes through the [`Collaborator`] passed to those calls.

use crate::configuration::{ClockDivision, OutputMode, SysExRealtime};
use crate::midi::{Decoder, MidiHandler, Realtime};
use crate::output::OutputChannel;
use crate::pulse::{GateState, PulseGenerator, PulseHandler};
use crate::sysex::{self, SysExHandler};
use crate::tempo::{TempoConfig, TempoEstimator};
use embassy_time::{Duration, Instant};
use measurements::Voltage;
use wmidi::{Channel, ControlFunction, ControlValue, Note, PitchBend, ProgramNumber, Velocity};

/// Number of analog outputs on the module.
pub const OUTPUTS: usize = 8;

/// Periodic chores driven by their own [`PulseGenerator`]s, independent of the MIDI clock.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Housekeeping {
    /// Read the knobs.
    SampleKnobs,
    /// Redraw the LEDs.
    RefreshLeds,
}

impl Housekeeping {
    const ALL: [Self; 2] = [Self::SampleKnobs, Self::RefreshLeds];
}

/// Settings fixed when the [`Engine`] is built.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EngineConfig {
    /// Tuning of the tempo estimator.
    pub tempo: TempoConfig,
    /// How realtime bytes inside SysEx are treated.
    pub sysex_realtime: SysExRealtime,
    /// Tempo of the housekeeping pulses.
    pub housekeeping_bpm: f32,
    /// Division of the housekeeping pulses.
    pub housekeeping_division: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tempo: TempoConfig::default(),
            sysex_realtime: SysExRealtime::default(),
            // both chores run every 1000 / 30 ms
            housekeeping_bpm: 900.0,
            housekeeping_division: 4.0,
        }
    }
}

/// Everything outside the core that the [`Engine`] drives or reports to.
///
/// MIDI channel and transport events arrive through [`MidiHandler`]; completed SysEx payloads are recognized by the
/// engine and arrive through [`SysExHandler`] instead of [`MidiHandler::on_sysex_complete`].
#[allow(unused_variables)]
pub trait Collaborator: MidiHandler + SysExHandler {
    /// An output should now produce `voltage`.
    fn set_output_voltage(&mut self, output: u8, voltage: Voltage) {}
    /// An output's pulse changed state.
    fn on_pulse_edge(&mut self, output: u8, state: GateState) {}
    /// A new tempo was adopted.
    fn on_tempo_change(&mut self, bpm: u16) {}
    /// The MIDI clock reached the start of a phrase.
    fn on_phrase_boundary(&mut self) {}
    /// A housekeeping chore is due.
    fn on_housekeeping(&mut self, task: Housekeeping) {}
}

/// Forwards output pulse edges to the [`Collaborator`].
struct Edges<'a, C: ?Sized>(&'a mut C);

impl<C: Collaborator + ?Sized> PulseHandler for Edges<'_, C> {
    fn on_edge(&mut self, tag: u8, state: GateState) {
        self.0.on_pulse_edge(tag, state);
    }
}

/// Turns housekeeping pulse edges into chores.
struct Chores<'a, C: ?Sized>(&'a mut C);

impl<C: Collaborator + ?Sized> PulseHandler for Chores<'_, C> {
    fn on_edge(&mut self, tag: u8, _state: GateState) {
        if let Some(&task) = Housekeeping::ALL.get(usize::from(tag)) {
            self.0.on_housekeeping(task);
        }
    }
}

/// The real-time core: one MIDI input, its tempo, and the analog outputs.
#[derive(Debug, Clone)]
pub struct Engine<const N: usize = OUTPUTS> {
    decoder: Decoder,
    tempo: TempoEstimator,
    outputs: [OutputChannel; N],
    housekeeping: [PulseGenerator; 2],
}

impl<const N: usize> Engine<N> {
    /// Constructs an [`Engine`] whose outputs are all in [`Manual`][OutputMode::Manual] mode at zero volts.
    pub fn new(config: EngineConfig, now: Instant) -> Self {
        let tempo = TempoEstimator::new(config.tempo);
        let bpm = f32::from(tempo.bpm());
        let housekeeping = Housekeeping::ALL.map(|task| {
            PulseGenerator::new(
                config.housekeeping_bpm,
                config.housekeeping_division,
                Duration::from_ticks(0),
                task as u8,
                now,
            )
        });
        Self {
            decoder: Decoder::with_policy(config.sysex_realtime),
            tempo,
            outputs: core::array::from_fn(|i| OutputChannel::new(i as u8, bpm, now)),
            housekeeping,
        }
    }

    /// The adopted tempo in beats per minute.
    pub fn bpm(&self) -> u16 {
        self.tempo.bpm()
    }

    /// Getter.
    pub fn outputs(&self) -> &[OutputChannel; N] {
        &self.outputs
    }

    /// Getter.
    pub fn output(&self, output: usize) -> Option<&OutputChannel> {
        self.outputs.get(output)
    }

    /// Decodes one transport read received at `now`.
    pub fn receive<C: Collaborator + ?Sized>(&mut self, burst: &[u8], now: Instant, collaborator: &mut C) {
        let mut router = Router {
            tempo: &mut self.tempo,
            outputs: &mut self.outputs,
            now,
            collaborator,
        };
        self.decoder.decode(burst, &mut router);
    }

    /// Advances every generator to `now` and delivers the output voltages.
    pub fn tick<C: Collaborator + ?Sized>(&mut self, now: Instant, collaborator: &mut C) {
        for generator in self.housekeeping.iter_mut() {
            generator.advance(now, &mut Chores(&mut *collaborator));
        }
        for output in self.outputs.iter_mut() {
            let voltage = output.tick(now, &mut Edges(&mut *collaborator));
            collaborator.set_output_voltage(output.index(), voltage);
        }
    }

    /// Starts the housekeeping chores. Until then, [`Collaborator::on_housekeeping`] is never called.
    pub fn start_housekeeping(&mut self, now: Instant) {
        info!("Starting housekeeping");
        for generator in self.housekeeping.iter_mut() {
            generator.start();
            generator.reset(now, &mut |_: u8, _: GateState| {});
        }
    }

    /// Switches what drives an output.
    pub fn set_mode<C: Collaborator + ?Sized>(
        &mut self,
        output: usize,
        mode: OutputMode,
        now: Instant,
        collaborator: &mut C,
    ) {
        if let Some(channel) = self.channel(output) {
            channel.set_mode(mode, now, &mut Edges(collaborator));
        }
    }

    /// Sets how many pulses per beat a clock output produces.
    pub fn set_division<C: Collaborator + ?Sized>(
        &mut self,
        output: usize,
        division: ClockDivision,
        collaborator: &mut C,
    ) {
        if let Some(channel) = self.channel(output) {
            channel.set_division(division, &mut Edges(collaborator));
        }
    }

    /// Sets how long an output takes to glide to a new level.
    pub fn set_slew(&mut self, output: usize, duration: Duration) {
        if let Some(channel) = self.channel(output) {
            channel.set_slew(duration);
        }
    }

    /// Sets the gate levels of a clock output.
    pub fn set_levels(&mut self, output: usize, low: Voltage, high: Voltage) {
        if let Some(channel) = self.channel(output) {
            channel.set_levels(low, high);
        }
    }

    /// Sets where a manual output slews to.
    pub fn set_manual_target(&mut self, output: usize, target: Voltage) {
        if let Some(channel) = self.channel(output) {
            channel.set_manual_target(target);
        }
    }

    fn channel(&mut self, output: usize) -> Option<&mut OutputChannel> {
        let channel = self.outputs.get_mut(output);
        if channel.is_none() {
            warn!("There is no output {}", output);
        }
        channel
    }
}

/// Routes decoded events for the duration of one [`Engine::receive`] call.
struct Router<'a, C: ?Sized, const N: usize> {
    tempo: &'a mut TempoEstimator,
    outputs: &'a mut [OutputChannel; N],
    now: Instant,
    collaborator: &'a mut C,
}

impl<C: Collaborator + ?Sized, const N: usize> Router<'_, C, N> {
    fn transport(&mut self, msg: Realtime) {
        self.tempo.on_transport(msg);
    }
}

impl<C: Collaborator + ?Sized, const N: usize> MidiHandler for Router<'_, C, N> {
    fn on_note_on(&mut self, channel: Channel, note: Note, velocity: Velocity) {
        self.collaborator.on_note_on(channel, note, velocity);
    }

    fn on_note_off(&mut self, channel: Channel, note: Note) {
        self.collaborator.on_note_off(channel, note);
    }

    fn on_key_pressure(&mut self, channel: Channel, note: Note, pressure: Velocity) {
        self.collaborator.on_key_pressure(channel, note, pressure);
    }

    fn on_control_change(&mut self, channel: Channel, controller: ControlFunction, value: ControlValue) {
        self.collaborator.on_control_change(channel, controller, value);
    }

    fn on_program_change(&mut self, channel: Channel, program: ProgramNumber) {
        self.collaborator.on_program_change(channel, program);
    }

    fn on_channel_pressure(&mut self, channel: Channel, pressure: Velocity) {
        self.collaborator.on_channel_pressure(channel, pressure);
    }

    fn on_pitch_bend(&mut self, channel: Channel, value: PitchBend) {
        self.collaborator.on_pitch_bend(channel, value);
    }

    fn on_clock_tick(&mut self) {
        let outcome = self.tempo.on_tick(self.now);
        if let Some(bpm) = outcome.tempo {
            for output in self.outputs.iter_mut() {
                output.retune(f32::from(bpm), &mut Edges(&mut *self.collaborator));
            }
            self.collaborator.on_tempo_change(bpm);
        }
        if outcome.phrase_boundary {
            for output in self.outputs.iter_mut() {
                output.resync(self.now, &mut Edges(&mut *self.collaborator));
            }
            self.collaborator.on_phrase_boundary();
        }
        self.collaborator.on_clock_tick();
    }

    fn on_start(&mut self) {
        self.transport(Realtime::Start);
        self.collaborator.on_start();
    }

    fn on_continue(&mut self) {
        self.transport(Realtime::Continue);
        self.collaborator.on_continue();
    }

    fn on_stop(&mut self) {
        self.transport(Realtime::Stop);
        self.collaborator.on_stop();
    }

    fn on_sysex_complete(&mut self, payload: &[u8]) {
        sysex::dispatch(payload, &mut *self.collaborator);
    }

    fn on_factory_reset(&mut self) {
        self.collaborator.on_factory_reset();
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use crate::sysex::ParameterChange;
    use std::vec::Vec;

    #[derive(Debug, PartialEq)]
    enum Call {
        NoteOn(u8),
        Clock,
        Start,
        Voltage(u8, f64),
        Edge(u8, GateState),
        Tempo(u16),
        Phrase,
        Chore(Housekeeping),
        Version,
        Parameter(ParameterChange),
        Other(Vec<u8>),
        FactoryReset,
    }

    #[derive(Default)]
    struct Log(Vec<Call>);

    impl MidiHandler for Log {
        fn on_note_on(&mut self, _: Channel, note: Note, _: Velocity) {
            self.0.push(Call::NoteOn(u8::from(note)));
        }
        fn on_clock_tick(&mut self) {
            self.0.push(Call::Clock);
        }
        fn on_start(&mut self) {
            self.0.push(Call::Start);
        }
        fn on_factory_reset(&mut self) {
            self.0.push(Call::FactoryReset);
        }
    }

    impl SysExHandler for Log {
        fn on_version_request(&mut self) {
            self.0.push(Call::Version);
        }
        fn on_parameter(&mut self, change: ParameterChange) {
            self.0.push(Call::Parameter(change));
        }
        fn on_sysex(&mut self, payload: &[u8]) {
            self.0.push(Call::Other(payload.to_vec()));
        }
    }

    impl Collaborator for Log {
        fn set_output_voltage(&mut self, output: u8, voltage: Voltage) {
            self.0.push(Call::Voltage(output, voltage.as_volts()));
        }
        fn on_pulse_edge(&mut self, output: u8, state: GateState) {
            self.0.push(Call::Edge(output, state));
        }
        fn on_tempo_change(&mut self, bpm: u16) {
            self.0.push(Call::Tempo(bpm));
        }
        fn on_phrase_boundary(&mut self) {
            self.0.push(Call::Phrase);
        }
        fn on_housekeeping(&mut self, task: Housekeeping) {
            self.0.push(Call::Chore(task));
        }
    }

    fn at(ms: u64) -> Instant {
        Instant::from_millis(ms)
    }

    #[test]
    fn channel_events_pass_through() {
        let mut engine = Engine::<2>::new(EngineConfig::default(), at(0));
        let mut log = Log::default();
        engine.receive(&[0x90, 60, 100], at(0), &mut log);
        engine.receive(&[0xB0, 0, 0], at(0), &mut log);
        assert_eq!(std::vec![Call::NoteOn(60), Call::FactoryReset], log.0, "Expected left but got right");
    }

    #[test]
    fn sysex_is_dispatched() {
        let mut engine = Engine::<2>::new(EngineConfig::default(), at(0));
        let mut log = Log::default();
        engine.receive(&[0xF0, b'v', b'e'], at(0), &mut log);
        engine.receive(&[b'r', b's', b'i'], at(0), &mut log);
        engine.receive(&[b'o', b'n', b'1'], at(0), &mut log);
        engine.receive(&[0xF7], at(0), &mut log);
        engine.receive(&[0xF0, b'0', b'_'], at(0), &mut log);
        engine.receive(&[b'1', b'_', b'7'], at(0), &mut log);
        engine.receive(&[0xF7], at(0), &mut log);
        engine.receive(&[0xF0, b'?', 0xF7], at(0), &mut log);
        assert_eq!(
            std::vec![
                Call::Version,
                Call::Parameter(ParameterChange {
                    scene: 0,
                    output: 1,
                    param: 7,
                    value: None,
                }),
                Call::Other(std::vec![b'?']),
            ],
            log.0,
            "Expected left but got right"
        );
    }

    #[test]
    fn tick_delivers_every_output() {
        let mut engine = Engine::<3>::new(EngineConfig::default(), at(0));
        engine.set_manual_target(1, Voltage::from_volts(2.0));
        engine.set_manual_target(7, Voltage::from_volts(2.0));
        let mut log = Log::default();
        engine.tick(at(1), &mut log);
        assert_eq!(
            std::vec![Call::Voltage(0, 0.0), Call::Voltage(1, 2.0), Call::Voltage(2, 0.0)],
            log.0,
            "Expected left but got right"
        );
    }

    #[test]
    fn housekeeping_waits_for_start() {
        let mut engine = Engine::<0>::new(EngineConfig::default(), at(0));
        let mut log = Log::default();
        engine.tick(at(100), &mut log);
        assert!(log.0.is_empty());

        engine.start_housekeeping(at(100));
        // 900 BPM at division 4 toggles every 1000 / 120 ms
        engine.tick(at(109), &mut log);
        assert_eq!(
            std::vec![Call::Chore(Housekeeping::SampleKnobs), Call::Chore(Housekeeping::RefreshLeds)],
            log.0,
            "Expected left but got right"
        );
    }

    #[test]
    fn clock_mode_reports_edges() {
        let mut engine = Engine::<1>::new(EngineConfig::default(), at(0));
        let mut log = Log::default();
        engine.set_division(0, ClockDivision::Quarter, &mut log);
        engine.set_mode(0, OutputMode::Clock, at(0), &mut log);
        engine.tick(at(250), &mut log);
        assert_eq!(
            std::vec![
                Call::Edge(0, GateState::High),
                Call::Edge(0, GateState::Low),
                Call::Voltage(0, 0.0),
            ],
            log.0,
            "Expected left but got right"
        );
    }

    #[test]
    fn start_realigns_phrase_and_resyncs_clock_outputs() {
        let mut engine = Engine::<1>::new(EngineConfig::default(), at(0));
        let mut log = Log::default();
        engine.set_mode(0, OutputMode::Clock, at(0), &mut log);
        log.0.clear();

        engine.receive(&[0xFA], at(10), &mut log);
        engine.receive(&[0xF8], at(20), &mut log);
        assert_eq!(
            std::vec![Call::Start, Call::Edge(0, GateState::High), Call::Phrase, Call::Clock],
            log.0,
            "Expected left but got right"
        );
        assert_eq!(at(20) + engine.outputs()[0].pulse().half_period(), engine.outputs()[0].pulse().next_edge());
    }
}
