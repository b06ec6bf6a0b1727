//! What the engine's callbacks do on the reference board: two DAC outputs, three status LEDs and the SysEx replies.

use crate::diagnostics;
use embassy_stm32::{
    dac::{DacCh1, DacCh2, Value},
    gpio::{Level, Output},
    mode::Async,
    peripherals::DAC1,
};
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, signal::Signal};
use measurements::Voltage;
use tinyvec::ArrayVec;
use wmidi::{Channel, Note, Velocity};
use yoctocore_lib::{
    engine::{Collaborator, Housekeeping, OUTPUTS},
    midi::{MidiHandler, sparkline},
    pulse::GateState,
    sysex::{ParameterChange, SysExHandler},
};

/// Raised when the host or the maintenance escape asks for a reboot into the system bootloader.
pub static REBOOT: Signal<CriticalSectionRawMutex, ()> = Signal::new();

/// Parameter changes collected during one transport read, applied once the engine is free.
const PENDING_CAPACITY: usize = 8;

/// Telemetry is sent on every this many LED refreshes (about four times per second).
const TELEMETRY_EVERY: u8 = 30;

/// Per-output correction applied on the way to the DAC.
#[derive(Clone, Copy, Debug)]
struct Calibration {
    offset: f32,
    scale: f32,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            offset: 0.0,
            scale: 1.0,
        }
    }
}

/// The board peripherals the engine drives, plus state collected from its callbacks.
pub struct Module {
    dac_ch1: DacCh1<'static, DAC1, Async>,
    dac_ch2: DacCh2<'static, DAC1, Async>,
    /// Follows the gate of the first output.
    gate_led: Output<'static>,
    /// Toggles on every phrase boundary.
    phrase_led: Output<'static>,
    calibration: [Calibration; OUTPUTS],
    voltages: [f32; OUTPUTS],
    pending: ArrayVec<[ParameterChange; PENDING_CAPACITY]>,
    refreshes: u8,
}

impl Module {
    /// Constructs a [`Module`].
    pub fn new(
        dac_ch1: DacCh1<'static, DAC1, Async>,
        dac_ch2: DacCh2<'static, DAC1, Async>,
        gate_led: Output<'static>,
        phrase_led: Output<'static>,
    ) -> Self {
        Self {
            dac_ch1,
            dac_ch2,
            gate_led,
            phrase_led,
            calibration: [Calibration::default(); OUTPUTS],
            voltages: [0.0; OUTPUTS],
            pending: ArrayVec::new(),
            refreshes: 0,
        }
    }

    /// Hands over the parameter changes received since the last call.
    pub fn take_pending(&mut self) -> ArrayVec<[ParameterChange; PENDING_CAPACITY]> {
        core::mem::take(&mut self.pending)
    }
}

/// Helper function to convert an output voltage to a <abbr name="digital-to-analog converter">DAC</abbr> value.
///
/// The on-chip DAC spans 0 V to its 3.3 V reference in 12 bits; anything outside that range is clamped. Reaching the
/// full Eurorack range needs an amplifier stage after the DAC, which is what the calibration compensates for.
fn voltage_to_dac_value(volts: f32) -> Value {
    let fraction = (volts / (10.0 / 3.0)).clamp(0.0, 1.0);
    Value::Bit12Right((fraction * 4095.0) as u16)
}

impl MidiHandler for Module {
    fn on_note_on(&mut self, channel: Channel, note: Note, velocity: Velocity) {
        debug!(
            "Note on: channel {}, note {}, velocity {}",
            channel.index(),
            u8::from(note),
            u8::from(velocity)
        );
    }

    fn on_note_off(&mut self, channel: Channel, note: Note) {
        debug!("Note off: channel {}, note {}", channel.index(), u8::from(note));
    }

    fn on_start(&mut self) {
        info!("MIDI start");
    }

    fn on_continue(&mut self) {
        info!("MIDI continue");
    }

    fn on_stop(&mut self) {
        info!("MIDI stop");
    }

    fn on_factory_reset(&mut self) {
        warn!("Factory reset requested");
        REBOOT.signal(());
    }
}

impl SysExHandler for Module {
    fn on_scene_code(&mut self, scene: u8, output: u8, code: &[u8], append: bool) {
        info!(
            "Received {} bytes of code for scene {}, output {} (append: {})",
            code.len(),
            scene,
            output,
            append
        );
    }

    fn on_version_request(&mut self) {
        diagnostics::send_text(format_args!("v{}", env!("CARGO_PKG_VERSION")));
    }

    fn on_diskmode_request(&mut self) {
        warn!("Disk mode requested");
        REBOOT.signal(());
    }

    fn on_calibration(&mut self, channel: i32, offset: f32, scale: f32) {
        match usize::try_from(channel)
            .ok()
            .and_then(|i| self.calibration.get_mut(i))
        {
            Some(calibration) => {
                info!("Calibrating output {}: offset {}, scale {}", channel, offset, scale);
                *calibration = Calibration { offset, scale };
            }
            None => warn!("Cannot calibrate output {}", channel),
        }
    }

    fn on_parameter(&mut self, change: ParameterChange) {
        if self.pending.try_push(change).is_some() {
            warn!("Too many parameter changes at once; dropping one");
        }
    }

    fn on_sysex(&mut self, payload: &[u8]) {
        debug!("Ignoring unrecognized SysEx of {} bytes", payload.len());
    }
}

impl Collaborator for Module {
    fn set_output_voltage(&mut self, output: u8, voltage: Voltage) {
        let index = usize::from(output);
        let (Some(calibration), Some(latest)) = (self.calibration.get(index), self.voltages.get_mut(index)) else {
            return;
        };
        let volts = voltage.as_volts() as f32 * calibration.scale + calibration.offset;
        *latest = volts;
        match output {
            0 => self.dac_ch1.set(voltage_to_dac_value(volts)),
            1 => self.dac_ch2.set(voltage_to_dac_value(volts)),
            // the reference board has two DAC channels
            _ => {}
        }
    }

    fn on_pulse_edge(&mut self, output: u8, state: GateState) {
        if output == 0 {
            self.gate_led
                .set_level(if state.is_high() { Level::High } else { Level::Low });
        }
    }

    fn on_tempo_change(&mut self, bpm: u16) {
        info!("Following MIDI clock at {} BPM", bpm);
    }

    fn on_phrase_boundary(&mut self) {
        self.phrase_led.toggle();
    }

    fn on_housekeeping(&mut self, task: Housekeeping) {
        match task {
            // the reference board has no knobs; manual targets arrive as parameter changes instead
            Housekeeping::SampleKnobs => {}
            Housekeeping::RefreshLeds => {
                self.refreshes = (self.refreshes + 1) % TELEMETRY_EVERY;
                if self.refreshes == 0 {
                    for (output, &volts) in self.voltages.iter().enumerate().take(2) {
                        diagnostics::queue(sparkline(output, volts));
                    }
                }
            }
        }
    }
}
