//! This crate contains architecture-agnostic logic for the Yoctocore, a Eurorack control-voltage module which
//! synchronizes its outputs to an incoming [MIDI](https://midi.org/midi-1-0) clock and to locally generated
//! pulse and ramp modulation.
//!
//! The real-time signal path is made of five pieces which are wired together by the [`engine::Engine`]:
//!
//! - the [`midi::Decoder`] turns raw transport bytes into channel, transport and SysEx events;
//! - the [`sysex`] dispatcher turns completed SysEx payloads into configuration commands;
//! - the [`tempo::TempoEstimator`] turns clock ticks into a median-filtered BPM estimate;
//! - the [`pulse::PulseGenerator`] divides that tempo into gate edges;
//! - the [`ramp::Ramp`] slews output voltages along a smootherstep curve.
//!
//! Nothing here reads a clock or touches hardware; every operation receives the current [`Instant`][embassy_time::Instant]
//! from the caller and reports its effects through collaborator traits.

#![deny(missing_docs)]
#![no_std]

#[macro_use]
mod fmt;

pub mod configuration;
pub mod engine;
pub mod midi;
pub mod output;
pub mod pulse;
pub mod ramp;
pub mod sysex;
pub mod tempo;
