use num_derive::{FromPrimitive, ToPrimitive};

/// Determines how the [`Decoder`][crate::midi::Decoder] treats System Realtime bytes (e.g., Timing Clock) which arrive
/// while a System Exclusive message is being accumulated.
///
/// MIDI allows realtime bytes to be interleaved anywhere in the stream, including inside SysEx. Earlier firmware
/// stored them as payload data instead, which delays clock ticks for the length of the message and corrupts the
/// payload. Both behaviors are kept so a host that depends on the old one can still opt in.
#[derive(Debug, Default, Copy, Clone, ToPrimitive, FromPrimitive, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SysExRealtime {
    /// Realtime bytes are dispatched immediately and never stored in the SysEx payload.
    #[default]
    Interleave,
    /// Realtime bytes are stored in the SysEx payload like any other data byte.
    AsPayload,
}
impl super::CycleConfig for SysExRealtime {}
