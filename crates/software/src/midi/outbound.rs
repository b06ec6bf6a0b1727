//! Framing of outbound SysEx messages used for host-side diagnostics and telemetry.

use super::{SYSEX_END, SYSEX_START};
use core::fmt;
use tinyvec::ArrayVec;

/// Default capacity of an outbound frame, markers included.
pub const FRAME_CAPACITY: usize = 128;

/// An outbound SysEx message under construction.
///
/// Text is written through [`core::fmt::Write`]; each byte is masked to seven bits so the frame stays valid MIDI.
/// Text that does not fit is truncated, always leaving room for the end marker added by [`finish`][Self::finish].
#[derive(Clone, Debug)]
pub struct SysExFrame<const N: usize = FRAME_CAPACITY> {
    data: ArrayVec<[u8; N]>,
    truncated: bool,
}

impl Default for SysExFrame {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> SysExFrame<N> {
    /// Starts a new frame containing only the start marker.
    pub fn new() -> Self {
        let mut data = ArrayVec::new();
        data.push(SYSEX_START);
        Self {
            data,
            truncated: false,
        }
    }

    /// Appends payload bytes, truncating once the frame is full.
    pub fn extend(&mut self, payload: &[u8]) {
        for &byte in payload {
            // the last slot is reserved for the end marker
            if self.data.len() + 1 >= N {
                self.truncated = true;
                return;
            }
            self.data.push(byte & 0x7F);
        }
    }

    /// Returns `true` if some of the written text did not fit.
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Appends the end marker and returns the complete message.
    pub fn finish(mut self) -> ArrayVec<[u8; N]> {
        self.data.push(SYSEX_END);
        if self.truncated {
            warn!("Outbound SysEx truncated to {} bytes", N);
        }
        self.data
    }
}

impl<const N: usize> fmt::Write for SysExFrame<N> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.extend(s.as_bytes());
        Ok(())
    }
}

/// Formats text into a complete outbound SysEx message, e.g. `sysex_text::<64>(format_args!("bpm {}", bpm))`.
pub fn sysex_text<const N: usize>(args: fmt::Arguments) -> ArrayVec<[u8; N]> {
    let mut frame = SysExFrame::<N>::new();
    // writing to a frame never fails; overflow truncates instead
    let _ = fmt::Write::write_fmt(&mut frame, args);
    frame.finish()
}

/// Builds the telemetry message the host editor plots as a sparkline for one output.
pub fn sparkline(output: usize, volts: f32) -> ArrayVec<[u8; FRAME_CAPACITY]> {
    sysex_text(format_args!("spark_{}_{:.3}", output, volts))
}

/// Splits a complete SysEx message into USB-MIDI Event Packets on cable 0.
///
/// Every packet but the last carries three bytes (code index 0x4); the last carries the end marker and uses code index
/// 0x5, 0x6 or 0x7 depending on how many bytes are left.
pub fn sysex_usb_packets(message: &[u8]) -> impl Iterator<Item = [u8; 4]> + '_ {
    let count = message.len().div_ceil(3);
    message.chunks(3).enumerate().map(move |(i, chunk)| {
        let cin = if i + 1 < count { 0x4 } else { 0x4 + chunk.len() as u8 };
        let mut packet = [cin, 0, 0, 0];
        packet[1..=chunk.len()].copy_from_slice(chunk);
        packet
    })
}
