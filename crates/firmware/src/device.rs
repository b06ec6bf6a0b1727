//! Pairs the [`Engine`] with the board's [`Module`] and applies the parameter changes the host sends.

use crate::{diagnostics, module::Module};
use embassy_time::{Duration, Instant};
use measurements::Voltage;
use num_traits::FromPrimitive;
use yoctocore_lib::{
    configuration::{ClockDivision, CycleConfig, OutputMode},
    engine::{Engine, OUTPUTS},
    output::OutputChannel,
    sysex::{ParameterChange, param_hash},
};

/// Only one scene is held in memory; changes addressed to other scenes are ignored.
const ACTIVE_SCENE: u8 = 0;

const SCENE: u32 = param_hash("scene");
const MODE: u32 = param_hash("mode");
const CLOCK_DIVISION: u32 = param_hash("clock_division");
const SLEW_TIME: u32 = param_hash("slew_time");
const MIN_VOLTAGE: u32 = param_hash("min_voltage");
const MAX_VOLTAGE: u32 = param_hash("max_voltage");
const VOLTAGE_SETPOINT: u32 = param_hash("voltage_setpoint");

/// Everything the real-time tasks share.
pub struct Device {
    engine: Engine,
    module: Module,
}

impl Device {
    /// Constructs a [`Device`].
    pub fn new(engine: Engine, module: Module) -> Self {
        Self { engine, module }
    }

    /// Feeds one MIDI burst to the engine, then applies any parameter changes it carried.
    pub fn receive(&mut self, burst: &[u8], now: Instant) {
        self.engine.receive(burst, now, &mut self.module);
        for change in self.module.take_pending() {
            self.apply(change, now);
        }
    }

    /// Advances the engine.
    pub fn tick(&mut self, now: Instant) {
        self.engine.tick(now, &mut self.module);
    }

    /// Starts sampling and LED refreshes.
    pub fn start_housekeeping(&mut self, now: Instant) {
        self.engine.start_housekeeping(now);
    }

    /// Advances every output to the next [`ClockDivision`], returning it.
    pub fn cycle_division(&mut self) -> ClockDivision {
        let division = self.output(0).division().cycle();
        for output in 0..OUTPUTS {
            self.engine.set_division(output, division, &mut self.module);
        }
        division
    }

    /// Switches every output to the next [`OutputMode`], returning it.
    pub fn cycle_mode(&mut self, now: Instant) -> OutputMode {
        let mode = self.output(0).mode().cycle();
        for output in 0..OUTPUTS {
            self.engine.set_mode(output, mode, now, &mut self.module);
        }
        mode
    }

    fn output(&self, output: usize) -> &OutputChannel {
        // every index below OUTPUTS exists
        &self.engine.outputs()[output]
    }

    /// Applies one change and echoes the resulting value back to the host.
    fn apply(&mut self, change: ParameterChange, now: Instant) {
        if change.param == SCENE {
            // the host asks which scene is loaded when it connects
            diagnostics::send_frame(change.echo(f32::from(ACTIVE_SCENE)));
            return;
        }
        if change.scene != ACTIVE_SCENE {
            debug!("Ignoring change to scene {}, which is not loaded", change.scene);
            return;
        }
        let output = usize::from(change.output);
        if output >= OUTPUTS {
            warn!("There is no output {}", output);
            return;
        }

        if let Some(value) = change.value {
            match change.param {
                MODE => match host_code(value).and_then(OutputMode::from_host_code) {
                    Some(mode) => self.engine.set_mode(output, mode, now, &mut self.module),
                    None => warn!("Invalid mode {}", value),
                },
                CLOCK_DIVISION => match host_code(value).and_then(ClockDivision::from_host_code) {
                    Some(division) => self.engine.set_division(output, division, &mut self.module),
                    None => warn!("Invalid clock division {}", value),
                },
                SLEW_TIME => self
                    .engine
                    .set_slew(output, Duration::from_millis(value.max(0.0) as u64)),
                MIN_VOLTAGE => {
                    let (_, high) = self.output(output).levels();
                    self.engine.set_levels(output, volts(value), high);
                }
                MAX_VOLTAGE => {
                    let (low, _) = self.output(output).levels();
                    self.engine.set_levels(output, low, volts(value));
                }
                VOLTAGE_SETPOINT => self.engine.set_manual_target(output, volts(value)),
                _ => {}
            }
        }

        let channel = self.output(output);
        let current = match change.param {
            MODE => f32::from(channel.mode().host_code()),
            CLOCK_DIVISION => f32::from(channel.division().host_code()),
            SLEW_TIME => channel.ramp().duration().as_millis() as f32,
            MIN_VOLTAGE => channel.levels().0.as_volts() as f32,
            MAX_VOLTAGE => channel.levels().1.as_volts() as f32,
            VOLTAGE_SETPOINT => channel.manual_target().as_volts() as f32,
            _ => {
                debug!("Unknown parameter {}", change.param);
                return;
            }
        };
        diagnostics::send_frame(change.echo(current));
    }
}

/// Host codes arrive as floats; anything but a small non-negative whole number is not a code.
fn host_code(value: f32) -> Option<u8> {
    u8::from_f32(value).filter(|&code| f32::from(code) == value)
}

fn volts(value: f32) -> Voltage {
    Voltage::from_volts(f64::from(value))
}
