//! Interpretation of completed SysEx payloads as configuration and maintenance commands.

mod params;
pub use params::*;

use crate::midi::SysExFrame;
use core::fmt::{self, Write};

const VERSION: &str = "version";
const DISKMODE: &str = "diskmode";
const CALIBRATION: &str = "calibration";

/// Hashes a parameter name the way the host tool does (djb2), so parameters can be addressed without sending their
/// names.
pub const fn param_hash(name: &str) -> u32 {
    let bytes = name.as_bytes();
    let mut hash: u32 = 5381;
    let mut i = 0;
    while i < bytes.len() {
        hash = hash.wrapping_mul(33).wrapping_add(bytes[i] as u32);
        i += 1;
    }
    hash
}

/// A request to change one parameter of one output in one scene, sent as `<scene>_<output>_<hash>[_<value>]`.
///
/// Without a value, the request asks the device to report the current value back.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ParameterChange {
    /// Scene the parameter belongs to.
    pub scene: u8,
    /// Output the parameter belongs to.
    pub output: u8,
    /// The [`param_hash`] of the parameter name.
    pub param: u32,
    /// The new value, if any.
    pub value: Option<f32>,
}

impl ParameterChange {
    /// Parses a parameter change. Unlike the named parameters, every field must be well formed.
    pub fn parse(payload: &[u8]) -> Option<Self> {
        let text = core::str::from_utf8(payload).ok()?;
        let mut fields = text.split('_');
        let scene = fields.next()?.parse().ok()?;
        let output = fields.next()?.parse().ok()?;
        let param = fields.next()?.parse().ok()?;
        let value = match fields.next() {
            Some(value) => Some(value.parse().ok()?),
            None => None,
        };
        if fields.next().is_some() {
            return None;
        }
        Some(Self {
            scene,
            output,
            param,
            value,
        })
    }

    /// Frames this change as the echo the host tool expects after a value is applied or queried:
    /// `<scene> <output> <hash> <value>`, space separated.
    pub fn echo<const N: usize>(&self, value: f32) -> SysExFrame<N> {
        let mut frame = SysExFrame::new();
        // writing to a frame never fails; overflow truncates instead
        let _ = write!(frame, "{}", Echo { change: self, value });
        frame
    }
}

struct Echo<'a> {
    change: &'a ParameterChange,
    value: f32,
}

impl fmt::Display for Echo<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {:.3}",
            self.change.scene, self.change.output, self.change.param, self.value
        )
    }
}

/// A recognized SysEx payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SysExCommand<'a> {
    /// A block of user code for one output of one scene.
    SceneCode {
        /// Scene index, 0 through 9.
        scene: u8,
        /// Output index, 0 through 9.
        output: u8,
        /// The raw code bytes.
        code: &'a [u8],
        /// Whether the block extends the stored code (`LA`) or replaces it (`LN`).
        append: bool,
    },
    /// `version<any>`: the host asks for the firmware version.
    Version,
    /// `diskmode<any>`: reboot into mass-storage mode.
    DiskMode,
    /// `calibration<channel>,<offset>,<scale>`.
    Calibration {
        /// Output being calibrated.
        channel: i32,
        /// Offset added to the output voltage.
        offset: f32,
        /// Scale applied to the output voltage.
        scale: f32,
    },
    /// A scene parameter change.
    Parameter(ParameterChange),
    /// Anything else, left to the generic handler.
    Unrecognized(&'a [u8]),
}

impl<'a> SysExCommand<'a> {
    /// Recognizes a payload. Scene code blocks are tried first, then the maintenance parameters, then parameter
    /// changes; whatever is left is [`Unrecognized`][Self::Unrecognized].
    pub fn parse(payload: &'a [u8]) -> Self {
        if let Some(command) = Self::scene_code(payload) {
            return command;
        }
        if param_float(VERSION, payload).is_some() {
            return Self::Version;
        }
        if param_float(DISKMODE, payload).is_some() {
            return Self::DiskMode;
        }
        if let Some((channel, offset, scale)) = param_int_and_two_floats(CALIBRATION, payload) {
            return Self::Calibration {
                channel,
                offset,
                scale,
            };
        }
        if let Some(change) = ParameterChange::parse(payload) {
            return Self::Parameter(change);
        }
        Self::Unrecognized(payload)
    }

    fn scene_code(payload: &'a [u8]) -> Option<Self> {
        let [a, b, scene, output, code @ ..] = payload else {
            return None;
        };
        let append = match [*a, *b] {
            [b'L', b'A'] => true,
            [b'L', b'N'] => false,
            _ => return None,
        };
        if !scene.is_ascii_digit() || !output.is_ascii_digit() {
            return None;
        }
        Some(Self::SceneCode {
            scene: scene - b'0',
            output: output - b'0',
            code,
            append,
        })
    }

    /// Delivers this command to the matching [`SysExHandler`] method.
    pub fn dispatch<H: SysExHandler + ?Sized>(self, handler: &mut H) {
        match self {
            Self::SceneCode {
                scene,
                output,
                code,
                append,
            } => handler.on_scene_code(scene, output, code, append),
            Self::Version => handler.on_version_request(),
            Self::DiskMode => handler.on_diskmode_request(),
            Self::Calibration {
                channel,
                offset,
                scale,
            } => handler.on_calibration(channel, offset, scale),
            Self::Parameter(change) => handler.on_parameter(change),
            Self::Unrecognized(payload) => handler.on_sysex(payload),
        }
    }
}

/// Parses `payload` and hands the result to `handler`.
pub fn dispatch<H: SysExHandler + ?Sized>(payload: &[u8], handler: &mut H) {
    let command = SysExCommand::parse(payload);
    trace!("SysEx of {} bytes recognized", payload.len());
    command.dispatch(handler);
}

/// Receives recognized SysEx commands. Every method defaults to doing nothing.
#[allow(unused_variables)]
pub trait SysExHandler {
    /// A block of scene code arrived.
    fn on_scene_code(&mut self, scene: u8, output: u8, code: &[u8], append: bool) {}
    /// The host asked for the firmware version.
    fn on_version_request(&mut self) {}
    /// The host asked the device to reboot into mass-storage mode.
    fn on_diskmode_request(&mut self) {}
    /// Calibration for one output changed.
    fn on_calibration(&mut self, channel: i32, offset: f32, scale: f32) {}
    /// A scene parameter changed, or was queried.
    fn on_parameter(&mut self, change: ParameterChange) {}
    /// A payload matched nothing else.
    fn on_sysex(&mut self, payload: &[u8]) {}
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;

    #[test]
    fn djb2() {
        assert_eq!(261238937, param_hash("hello"), "Expected left but got right");
        assert_eq!(279393645, param_hash("world"), "Expected left but got right");
        assert_eq!(4294815105, param_hash("helloworld"), "Expected left but got right");
        assert_eq!(5381, param_hash(""));
    }

    #[test]
    fn scene_code_blocks() {
        assert_eq!(
            SysExCommand::SceneCode {
                scene: 2,
                output: 7,
                code: b"x=1",
                append: true,
            },
            SysExCommand::parse(b"LA27x=1"),
            "Expected left but got right"
        );
        assert_eq!(
            SysExCommand::SceneCode {
                scene: 0,
                output: 0,
                code: b"",
                append: false,
            },
            SysExCommand::parse(b"LN00")
        );
    }

    #[test]
    fn scene_code_indices_must_be_digits() {
        assert_eq!(SysExCommand::Unrecognized(b"LAx7abc"), SysExCommand::parse(b"LAx7abc"));
        assert_eq!(SysExCommand::Unrecognized(b"LA2"), SysExCommand::parse(b"LA2"));
    }

    #[test]
    fn maintenance_parameters() {
        assert_eq!(SysExCommand::Version, SysExCommand::parse(b"version1.0"));
        assert_eq!(SysExCommand::DiskMode, SysExCommand::parse(b"diskmode1"));
        assert_eq!(SysExCommand::Unrecognized(b"version"), SysExCommand::parse(b"version"));
        assert_eq!(
            SysExCommand::Calibration {
                channel: 3,
                offset: 1.5,
                scale: -2.25,
            },
            SysExCommand::parse(b"calibration3,1.5,-2.25")
        );
    }

    #[test]
    fn parameter_changes() {
        assert_eq!(
            SysExCommand::Parameter(ParameterChange {
                scene: 1,
                output: 4,
                param: param_hash("scene"),
                value: Some(0.5),
            }),
            SysExCommand::parse(b"1_4_274204627_0.5"),
            "Expected left but got right"
        );
        assert_eq!(
            SysExCommand::Parameter(ParameterChange {
                scene: 0,
                output: 1,
                param: 42,
                value: None,
            }),
            SysExCommand::parse(b"0_1_42")
        );
        assert_eq!(SysExCommand::Unrecognized(b"1_4_x"), SysExCommand::parse(b"1_4_x"));
        assert_eq!(SysExCommand::Unrecognized(b"1_4_5_6_7"), SysExCommand::parse(b"1_4_5_6_7"));
    }

    #[test]
    fn parameter_echo() {
        let change = ParameterChange {
            scene: 1,
            output: 4,
            param: 42,
            value: None,
        };
        assert_eq!(b"\xF01 4 42 0.250\xF7", change.echo::<32>(0.25).finish().as_slice());
    }

    #[test]
    fn parameter_echo_has_four_fields() {
        let change = ParameterChange {
            scene: 0,
            output: 1,
            param: param_hash("slew_time"),
            value: Some(12.5),
        };
        let framed = change.echo::<64>(12.5).finish();
        let text = core::str::from_utf8(&framed[1..framed.len() - 1]).unwrap();
        let fields: std::vec::Vec<&str> = text.split(' ').collect();
        assert_eq!(
            std::vec!["0", "1", "1829861614", "12.500"],
            fields,
            "The host splits replies on spaces; expected left but got right"
        );
    }

    #[derive(Default)]
    struct Counts {
        scene_code: usize,
        version: usize,
        diskmode: usize,
        calibration: usize,
        parameter: usize,
        other: usize,
    }

    impl SysExHandler for Counts {
        fn on_scene_code(&mut self, _: u8, _: u8, _: &[u8], _: bool) {
            self.scene_code += 1;
        }
        fn on_version_request(&mut self) {
            self.version += 1;
        }
        fn on_diskmode_request(&mut self) {
            self.diskmode += 1;
        }
        fn on_calibration(&mut self, _: i32, _: f32, _: f32) {
            self.calibration += 1;
        }
        fn on_parameter(&mut self, _: ParameterChange) {
            self.parameter += 1;
        }
        fn on_sysex(&mut self, _: &[u8]) {
            self.other += 1;
        }
    }

    #[test]
    fn exactly_one_handler_per_payload() {
        let mut counts = Counts::default();
        for payload in [
            &b"LN12abc"[..],
            b"version2",
            b"diskmode1",
            b"calibration1,0,1",
            b"0_0_1_2",
            b"hello",
        ] {
            dispatch(payload, &mut counts);
        }
        assert_eq!(1, counts.scene_code);
        assert_eq!(1, counts.version);
        assert_eq!(1, counts.diskmode);
        assert_eq!(1, counts.calibration);
        assert_eq!(1, counts.parameter);
        assert_eq!(1, counts.other);
    }
}
