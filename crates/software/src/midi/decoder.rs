//! Provides the [`Decoder`], which turns transport reads into [`MidiEvent`]s.

use super::{ChannelVoice, MidiEvent, MidiHandler, Realtime, SYSEX_END, SYSEX_START, is_realtime};
use crate::configuration::SysExRealtime;
use tinyvec::ArrayVec;
use wmidi::Channel;

/// The largest SysEx payload the device accepts by default. Scene code blocks are sent in small chunks, so this
/// leaves ample headroom.
pub const SYSEX_CAPACITY: usize = 1024;

/// Decodes a MIDI byte stream delivered in short bursts (one transport read each, typically one to three bytes).
///
/// The decoder keeps only the state needed to reassemble System Exclusive messages across bursts; every other message
/// must arrive whole within one burst. Malformed or truncated bursts are dropped silently, as is any SysEx message
/// longer than the buffer capacity `N`.
#[derive(Clone, Debug)]
pub struct Decoder<const N: usize = SYSEX_CAPACITY> {
    /// Bytes of the SysEx message being accumulated. Never longer than `N`.
    sysex: ArrayVec<[u8; N]>,
    /// Whether a SysEx start marker has been seen without a matching end marker.
    active: bool,
    realtime: SysExRealtime,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder {
    /// Constructs a [`Decoder`] with the default SysEx capacity and realtime policy.
    pub fn new() -> Self {
        Self::with_policy(SysExRealtime::default())
    }
}

impl<const N: usize> Decoder<N> {
    /// Constructs a [`Decoder`] which treats realtime bytes inside SysEx according to `realtime`.
    pub fn with_policy(realtime: SysExRealtime) -> Self {
        Self {
            sysex: ArrayVec::new(),
            active: false,
            realtime,
        }
    }

    /// Returns `true` while a SysEx message is being accumulated.
    pub fn is_accumulating(&self) -> bool {
        self.active
    }

    /// Getter.
    pub fn realtime_policy(&self) -> SysExRealtime {
        self.realtime
    }

    /// Setter.
    pub fn set_realtime_policy(&mut self, realtime: SysExRealtime) {
        self.realtime = realtime;
    }

    /// Decodes one transport read, delivering any resulting events to `handler`.
    ///
    /// SysEx framing bytes are examined first. If the burst took part in a SysEx message (started, continued, ended
    /// or overflowed one), nothing else is decoded from it. Otherwise the first byte is classified as a realtime or
    /// channel status byte and the rest of the burst supplies its data bytes.
    pub fn decode<H: MidiHandler + ?Sized>(&mut self, burst: &[u8], handler: &mut H) {
        let mut framing = false;
        for &byte in burst {
            match byte {
                SYSEX_START => {
                    if self.active {
                        debug!(
                            "SysEx restarted before it ended; discarding {} bytes",
                            self.sysex.len()
                        );
                    }
                    self.sysex.clear();
                    self.active = true;
                    framing = true;
                }
                SYSEX_END => {
                    if self.active && !self.sysex.is_empty() {
                        MidiEvent::SysExComplete(self.sysex.as_slice()).dispatch(handler);
                    }
                    // cleared even when nothing was emitted so stale bytes never leak into the next message
                    self.sysex.clear();
                    self.active = false;
                    framing = true;
                }
                _ if self.active => {
                    framing = true;
                    if is_realtime(byte) && self.realtime == SysExRealtime::Interleave {
                        if let Some(msg) = Realtime::from_status(byte) {
                            MidiEvent::SystemRealtime(msg).dispatch(handler);
                        }
                    } else if self.sysex.try_push(byte).is_some() {
                        warn!("SysEx message exceeds {} bytes; dropping it", N);
                        self.sysex.clear();
                        self.active = false;
                    }
                }
                _ => {}
            }
        }
        if self.active || framing {
            return;
        }

        let Some((&status, data)) = burst.split_first() else {
            return;
        };

        if let Some(msg) = Realtime::from_status(status) {
            MidiEvent::SystemRealtime(msg).dispatch(handler);
            return;
        }

        match ChannelVoice::parse(status, data) {
            Some(ChannelVoice::ControlChange {
                channel: Channel::Ch1,
                controller,
                value,
            }) if u8::from(controller) == 0 && u8::from(value) == 0 => {
                info!("Received factory reset escape");
                MidiEvent::FactoryReset.dispatch(handler);
            }
            Some(msg) => MidiEvent::ChannelVoice(msg).dispatch(handler),
            None => {
                trace!("Dropping burst starting with {=u8:x}", status);
            }
        }
    }
}
