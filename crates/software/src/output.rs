//! Provides the [`OutputChannel`], the control logic behind one analog output.

use crate::configuration::{ClockDivision, OutputMode};
use crate::pulse::{GateState, PulseGenerator, PulseHandler};
use crate::ramp::Ramp;
use embassy_time::{Duration, Instant};
use measurements::Voltage;

/// Gate level used by clock outputs until configured otherwise.
const DEFAULT_HIGH_VOLTS: f64 = 5.0;

/// One analog output: a [`PulseGenerator`] tagged with the output's index, gating a [`Ramp`] which produces the
/// voltage.
#[derive(Clone, Debug)]
pub struct OutputChannel {
    mode: OutputMode,
    division: ClockDivision,
    pulse: PulseGenerator,
    ramp: Ramp,
    /// Where a [`Manual`][OutputMode::Manual] output slews to.
    manual_target: Voltage,
    low: Voltage,
    high: Voltage,
}

impl OutputChannel {
    /// Constructs a [`Manual`][OutputMode::Manual] output resting at zero volts, without slew.
    pub fn new(index: u8, bpm: f32, now: Instant) -> Self {
        let division = ClockDivision::default();
        Self {
            mode: OutputMode::default(),
            division,
            pulse: PulseGenerator::new(bpm, division.factor(), Duration::from_ticks(0), index, now),
            ramp: Ramp::new(Duration::from_ticks(0), 0.0),
            manual_target: Voltage::from_volts(0.0),
            low: Voltage::from_volts(0.0),
            high: Voltage::from_volts(DEFAULT_HIGH_VOLTS),
        }
    }

    /// The output's index, which also tags its pulse edges.
    pub fn index(&self) -> u8 {
        self.pulse.tag()
    }

    /// Getter.
    pub fn mode(&self) -> OutputMode {
        self.mode
    }

    /// Getter.
    pub fn division(&self) -> ClockDivision {
        self.division
    }

    /// The low and high gate levels.
    pub fn levels(&self) -> (Voltage, Voltage) {
        (self.low, self.high)
    }

    /// Getter.
    pub fn manual_target(&self) -> Voltage {
        self.manual_target
    }

    /// Getter.
    pub fn pulse(&self) -> &PulseGenerator {
        &self.pulse
    }

    /// Getter.
    pub fn ramp(&self) -> &Ramp {
        &self.ramp
    }

    /// The voltage produced by the latest [`tick`][Self::tick].
    pub fn voltage(&self) -> Voltage {
        Voltage::from_volts(f64::from(self.ramp.value()))
    }

    /// Switches what drives the output. Entering [`Clock`][OutputMode::Clock] mode restarts the pulse at `now`.
    pub fn set_mode<H: PulseHandler + ?Sized>(&mut self, mode: OutputMode, now: Instant, handler: &mut H) {
        if mode == self.mode {
            return;
        }
        debug!("Output {} switching to {}", self.index(), mode);
        self.mode = mode;
        match mode {
            OutputMode::Clock => {
                self.pulse.start();
                self.pulse.reset(now, handler);
                self.follow_gate(self.pulse.state());
            }
            OutputMode::Manual => {
                self.pulse.stop();
                self.ramp.set_target(volts(self.manual_target));
            }
        }
    }

    /// Sets how many pulses per beat the output produces in [`Clock`][OutputMode::Clock] mode.
    ///
    /// The new schedule is replayed from the pulse's anchor, so the gate may change; such a change is reported to
    /// `handler` like any other edge.
    pub fn set_division<H: PulseHandler + ?Sized>(&mut self, division: ClockDivision, handler: &mut H) {
        self.division = division;
        let before = self.pulse.state();
        self.pulse.set_division(division.factor());
        self.follow_replay(before, handler);
    }

    /// Sets how long the output takes to glide to a new level. Zero makes changes immediate.
    pub fn set_slew(&mut self, duration: Duration) {
        self.ramp.set_duration(duration);
    }

    /// Sets the voltages of the gate's low and high halves in [`Clock`][OutputMode::Clock] mode.
    pub fn set_levels(&mut self, low: Voltage, high: Voltage) {
        self.low = low;
        self.high = high;
        if self.mode == OutputMode::Clock {
            self.follow_gate(self.pulse.state());
        }
    }

    /// Sets where the output slews to in [`Manual`][OutputMode::Manual] mode.
    pub fn set_manual_target(&mut self, target: Voltage) {
        self.manual_target = target;
    }

    /// Follows a new tempo, reporting the gate to `handler` if the replayed schedule lands in the other half of the
    /// period.
    pub fn retune<H: PulseHandler + ?Sized>(&mut self, bpm: f32, handler: &mut H) {
        let before = self.pulse.state();
        if self.pulse.configure(bpm, self.division.factor()) {
            self.follow_replay(before, handler);
        }
    }

    /// Realigns a clock output with the start of a phrase.
    pub fn resync<H: PulseHandler + ?Sized>(&mut self, now: Instant, handler: &mut H) {
        if self.mode == OutputMode::Clock {
            self.pulse.reset(now, handler);
            self.follow_gate(self.pulse.state());
        }
    }

    /// Advances the output to `now`, reporting any pulse edge to `handler`, and returns the voltage to produce.
    pub fn tick<H: PulseHandler + ?Sized>(&mut self, now: Instant, handler: &mut H) -> Voltage {
        let volts = match self.mode {
            OutputMode::Clock => {
                if let Some(state) = self.pulse.advance(now, handler) {
                    self.follow_gate(state);
                }
                self.ramp.process_current(now)
            }
            OutputMode::Manual => self.ramp.process(volts(self.manual_target), now),
        };
        Voltage::from_volts(f64::from(volts))
    }

    fn follow_replay<H: PulseHandler + ?Sized>(&mut self, before: GateState, handler: &mut H) {
        let state = self.pulse.state();
        if self.mode == OutputMode::Clock && state != before {
            self.follow_gate(state);
            handler.on_edge(self.index(), state);
        }
    }

    fn follow_gate(&mut self, state: GateState) {
        let level = if state.is_high() { self.high } else { self.low };
        self.ramp.set_target(volts(level));
    }
}

fn volts(voltage: Voltage) -> f32 {
    voltage.as_volts() as f32
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;

    fn ignore(_: u8, _: GateState) {}

    fn at(ms: u64) -> Instant {
        Instant::from_millis(ms)
    }

    #[test]
    fn manual_output_follows_target() {
        let mut output = OutputChannel::new(0, 120.0, at(0));
        output.set_manual_target(Voltage::from_volts(2.5));
        assert_eq!(Voltage::from_volts(2.5), output.tick(at(1), &mut ignore), "Expected left but got right");
    }

    #[test]
    fn manual_output_slews() {
        let mut output = OutputChannel::new(0, 120.0, at(0));
        output.set_slew(Duration::from_millis(100));
        output.set_manual_target(Voltage::from_volts(4.0));
        assert_eq!(0.0, output.tick(at(10), &mut ignore).as_volts());
        assert_eq!(2.0, output.tick(at(60), &mut ignore).as_volts());
        assert_eq!(4.0, output.tick(at(110), &mut ignore).as_volts());
    }

    #[test]
    fn clock_output_gates_between_levels() {
        let mut output = OutputChannel::new(1, 120.0, at(0));
        output.set_division(ClockDivision::Quarter, &mut ignore);
        output.set_levels(Voltage::from_volts(-1.0), Voltage::from_volts(3.0));
        let mut edges = 0;
        output.set_mode(OutputMode::Clock, at(0), &mut |_: u8, _: GateState| edges += 1);
        assert_eq!(1, edges, "Entering clock mode should report a rising edge");

        assert_eq!(3.0, output.tick(at(100), &mut ignore).as_volts());
        assert_eq!(-1.0, output.tick(at(250), &mut ignore).as_volts());
        assert_eq!(3.0, output.tick(at(500), &mut ignore).as_volts());
    }

    #[test]
    fn leaving_clock_mode_stops_pulses() {
        let mut output = OutputChannel::new(2, 120.0, at(0));
        output.set_mode(OutputMode::Clock, at(0), &mut ignore);
        output.set_mode(OutputMode::Manual, at(10), &mut ignore);
        assert!(!output.pulse().is_active());
        assert_eq!(0.0, output.tick(at(20), &mut ignore).as_volts());
    }

    #[test]
    fn retune_keeps_division() {
        let mut output = OutputChannel::new(0, 120.0, at(0));
        output.set_division(ClockDivision::Eighth, &mut ignore);
        output.retune(90.0, &mut ignore);
        assert_eq!(90.0, output.pulse().bpm());
        assert_eq!(2.0, output.pulse().division());
    }

    #[test]
    fn retune_mid_period_keeps_gate_in_step() {
        let mut output = OutputChannel::new(0, 100.0, at(0));
        output.set_division(ClockDivision::Quarter, &mut ignore);
        output.set_levels(Voltage::from_volts(0.0), Voltage::from_volts(5.0));

        let mut edges = std::vec::Vec::new();
        let mut record = |_: u8, state: GateState| edges.push(state);
        output.set_mode(OutputMode::Clock, at(0), &mut record);
        // at 100 BPM the half period is 300 ms
        for ms in [300, 600, 800] {
            output.tick(at(ms), &mut record);
        }
        assert_eq!(GateState::High, output.pulse().state(), "Expected left but got right");

        // at 120 BPM the same 800 ms falls in the low half of the third period
        output.retune(120.0, &mut record);
        assert_eq!(GateState::Low, output.pulse().state(), "Expected left but got right");
        assert_eq!(0.0, output.tick(at(801), &mut record).as_volts(), "Gate voltage should follow the pulse");

        // next rising edge at 1000 ms
        assert_eq!(5.0, output.tick(at(1001), &mut record).as_volts(), "Gate voltage should follow the pulse");
        drop(record);
        assert_eq!(
            std::vec![
                GateState::High,
                GateState::Low,
                GateState::High,
                GateState::Low,
                GateState::High
            ],
            edges,
            "Edges should alternate; expected left but got right"
        );
    }

    #[test]
    fn retune_in_manual_mode_reports_nothing() {
        let mut output = OutputChannel::new(0, 100.0, at(0));
        output.tick(at(800), &mut ignore);
        let mut edges = 0;
        output.retune(120.0, &mut |_: u8, _: GateState| edges += 1);
        assert_eq!(0, edges, "Expected left but got right");
        assert_eq!(0.0, output.tick(at(801), &mut ignore).as_volts());
    }
}
