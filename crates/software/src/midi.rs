//! Decoding of the incoming MIDI byte stream and framing of outbound diagnostic messages.
//!
//! Events are delivered through the [`MidiHandler`] trait rather than returned, because a single transport read can
//! complete a SysEx payload which lives in the [`Decoder`]'s own buffer; handing it to a callback avoids copying it.

use wmidi::{Channel, ControlFunction, ControlValue, Note, PitchBend, ProgramNumber, U7, U14, Velocity};

mod decoder;
pub use decoder::*;

mod outbound;
pub use outbound::*;

/// Marks the beginning of a System Exclusive message.
pub const SYSEX_START: u8 = 0xF0;
/// Marks the end of a System Exclusive message.
pub const SYSEX_END: u8 = 0xF7;

/// The System Realtime messages the core reacts to.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Realtime {
    /// Timing Clock, sent 24 times per quarter note.
    Clock,
    /// Start the sequence from the beginning.
    Start,
    /// Resume the sequence from where it stopped.
    Continue,
    /// Stop the sequence.
    Stop,
}

impl Realtime {
    /// Interprets a status byte as one of the supported realtime messages.
    pub fn from_status(status: u8) -> Option<Self> {
        match status {
            0xF8 => Some(Self::Clock),
            0xFA => Some(Self::Start),
            0xFB => Some(Self::Continue),
            0xFC => Some(Self::Stop),
            _ => None,
        }
    }

    /// Returns the status byte for this message.
    pub fn status(&self) -> u8 {
        match self {
            Self::Clock => 0xF8,
            Self::Start => 0xFA,
            Self::Continue => 0xFB,
            Self::Stop => 0xFC,
        }
    }
}

/// Returns `true` for any System Realtime status byte (0xF8 through 0xFF), supported or not.
pub fn is_realtime(byte: u8) -> bool {
    byte >= 0xF8
}

/// A decoded Channel Voice message.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ChannelVoice {
    /// Note Off (0x8n). Release velocity is not reported.
    NoteOff {
        /// Channel the note was released on.
        channel: Channel,
        /// Released note.
        note: Note,
    },
    /// Note On (0x9n).
    NoteOn {
        /// Channel the note was struck on.
        channel: Channel,
        /// Struck note.
        note: Note,
        /// Strike velocity; zero when the transport delivered the status and note only.
        velocity: Velocity,
    },
    /// Polyphonic Key Pressure (0xAn).
    KeyPressure {
        /// Channel of the held note.
        channel: Channel,
        /// Held note.
        note: Note,
        /// Pressure applied to the note.
        pressure: Velocity,
    },
    /// Control Change (0xBn).
    ControlChange {
        /// Channel of the controller.
        channel: Channel,
        /// Controller number.
        controller: ControlFunction,
        /// New controller value.
        value: ControlValue,
    },
    /// Program Change (0xCn).
    ProgramChange {
        /// Channel whose program changes.
        channel: Channel,
        /// Selected program.
        program: ProgramNumber,
    },
    /// Channel Pressure (0xDn).
    ChannelPressure {
        /// Channel the pressure applies to.
        channel: Channel,
        /// Pressure value.
        pressure: Velocity,
    },
    /// Pitch Bend (0xEn), as a 14-bit value centered at 8192.
    PitchBend {
        /// Channel being bent.
        channel: Channel,
        /// Bend amount, 0 through 16383.
        value: PitchBend,
    },
}

impl ChannelVoice {
    /// Builds a message from a status byte and whatever data bytes followed it in the same burst.
    ///
    /// Returns `None` for non-channel status bytes and for bursts too short to carry the message. As a workaround
    /// for a transport that sometimes delivers Note On without its velocity byte, a Note On with only a note number
    /// is accepted with a velocity of zero.
    pub fn parse(status: u8, data: &[u8]) -> Option<Self> {
        if status < 0x80 {
            return None;
        }
        let channel = Channel::from_index(status & 0x0F).ok()?;
        let u7 = |byte: u8| U7::from_u8_lossy(byte & 0x7F);

        let msg = match (status >> 4, data) {
            (0x8, [note, ..]) => Self::NoteOff {
                channel,
                note: Note::from(u7(*note)),
            },
            (0x9, [note, velocity, ..]) => Self::NoteOn {
                channel,
                note: Note::from(u7(*note)),
                velocity: u7(*velocity),
            },
            (0x9, [note]) => Self::NoteOn {
                channel,
                note: Note::from(u7(*note)),
                velocity: u7(0),
            },
            (0xA, [note, pressure, ..]) => Self::KeyPressure {
                channel,
                note: Note::from(u7(*note)),
                pressure: u7(*pressure),
            },
            (0xB, [controller, value, ..]) => Self::ControlChange {
                channel,
                controller: ControlFunction(u7(*controller)),
                value: u7(*value),
            },
            (0xC, [program, ..]) => Self::ProgramChange {
                channel,
                program: u7(*program),
            },
            (0xD, [pressure, ..]) => Self::ChannelPressure {
                channel,
                pressure: u7(*pressure),
            },
            (0xE, [lsb, msb, ..]) => Self::PitchBend {
                channel,
                value: pitch_bend(*lsb, *msb),
            },
            _ => return None,
        };
        Some(msg)
    }
}

/// Reassembles the 14-bit pitch bend value from its least- and most-significant data bytes.
pub fn pitch_bend(lsb: u8, msb: u8) -> U14 {
    // both halves are masked to seven bits, so the value always fits
    U14::try_from((u16::from(msb & 0x7F) << 7) | u16::from(lsb & 0x7F)).unwrap_or_default()
}

/// One decoded unit of the MIDI stream.
///
/// Events are built by the [`Decoder`] and consumed immediately by [`dispatch`][Self::dispatch]; they borrow the
/// decoder's SysEx buffer and are never retained.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MidiEvent<'a> {
    /// A note, controller, program, pressure or pitch bend message.
    ChannelVoice(ChannelVoice),
    /// A transport message.
    SystemRealtime(Realtime),
    /// A complete SysEx payload, without its start and end markers.
    SysExComplete(&'a [u8]),
    /// The out-of-band maintenance escape (Control Change 0 with value 0 on the first channel), which asks the device
    /// to reboot into its firmware updater.
    FactoryReset,
}

impl MidiEvent<'_> {
    /// Delivers this event to the matching [`MidiHandler`] method.
    pub fn dispatch<H: MidiHandler + ?Sized>(self, handler: &mut H) {
        match self {
            Self::ChannelVoice(msg) => match msg {
                ChannelVoice::NoteOff { channel, note } => handler.on_note_off(channel, note),
                ChannelVoice::NoteOn {
                    channel,
                    note,
                    velocity,
                } => handler.on_note_on(channel, note, velocity),
                ChannelVoice::KeyPressure {
                    channel,
                    note,
                    pressure,
                } => handler.on_key_pressure(channel, note, pressure),
                ChannelVoice::ControlChange {
                    channel,
                    controller,
                    value,
                } => handler.on_control_change(channel, controller, value),
                ChannelVoice::ProgramChange { channel, program } => {
                    handler.on_program_change(channel, program)
                }
                ChannelVoice::ChannelPressure { channel, pressure } => {
                    handler.on_channel_pressure(channel, pressure)
                }
                ChannelVoice::PitchBend { channel, value } => handler.on_pitch_bend(channel, value),
            },
            Self::SystemRealtime(Realtime::Clock) => handler.on_clock_tick(),
            Self::SystemRealtime(Realtime::Start) => handler.on_start(),
            Self::SystemRealtime(Realtime::Continue) => handler.on_continue(),
            Self::SystemRealtime(Realtime::Stop) => handler.on_stop(),
            Self::SysExComplete(payload) => handler.on_sysex_complete(payload),
            Self::FactoryReset => handler.on_factory_reset(),
        }
    }
}

/// Receives decoded MIDI events. Every method defaults to doing nothing.
#[allow(unused_variables)]
pub trait MidiHandler {
    /// A note was struck.
    fn on_note_on(&mut self, channel: Channel, note: Note, velocity: Velocity) {}
    /// A note was released.
    fn on_note_off(&mut self, channel: Channel, note: Note) {}
    /// Pressure changed on a held note.
    fn on_key_pressure(&mut self, channel: Channel, note: Note, pressure: Velocity) {}
    /// A controller moved.
    fn on_control_change(&mut self, channel: Channel, controller: ControlFunction, value: ControlValue) {}
    /// A program was selected.
    fn on_program_change(&mut self, channel: Channel, program: ProgramNumber) {}
    /// Channel-wide pressure changed.
    fn on_channel_pressure(&mut self, channel: Channel, pressure: Velocity) {}
    /// The pitch wheel moved.
    fn on_pitch_bend(&mut self, channel: Channel, value: PitchBend) {}
    /// A Timing Clock byte arrived.
    fn on_clock_tick(&mut self) {}
    /// Transport started.
    fn on_start(&mut self) {}
    /// Transport resumed.
    fn on_continue(&mut self) {}
    /// Transport stopped.
    fn on_stop(&mut self) {}
    /// A SysEx message completed. The payload excludes the start and end markers.
    fn on_sysex_complete(&mut self, payload: &[u8]) {}
    /// The maintenance escape asked for a reboot into the firmware updater.
    fn on_factory_reset(&mut self) {}
}

/// Extracts the MIDI bytes carried by a single 32-bit USB-MIDI Event Packet.
///
/// The low nibble of the packet header is the Code Index Number, which tells how many of the three remaining bytes
/// belong to the message. Returns `None` for malformed packets and reserved code indices.
pub fn usb_packet_bytes(packet: &[u8]) -> Option<&[u8]> {
    if packet.len() != 4 {
        error!("USB-MIDI Event Packets must always be 32 bits long");
        return None;
    }
    let len = match packet[0] & 0x0F {
        0x5 | 0xF => 1,
        0x2 | 0x6 | 0xC | 0xD => 2,
        0x3 | 0x4 | 0x7 | 0x8..=0xB | 0xE => 3,
        cin => {
            debug!("Ignoring USB-MIDI packet with reserved code index {}", cin);
            return None;
        }
    };
    Some(&packet[1..=len])
}

/// Splits a USB read into the MIDI bursts carried by each USB-MIDI Event Packet.
pub fn usb_bursts(data: &[u8]) -> impl Iterator<Item = &[u8]> {
    data.chunks(4).filter_map(usb_packet_bytes)
}
