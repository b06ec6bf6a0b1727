//! Provides the [`PulseGenerator`], a clock divider producing a square wave locked to a tempo.

use embassy_time::{Duration, Instant};

/// Half a minute in microseconds. Divided by pulses per minute, gives the time between two edges.
const HALF_MINUTE_MICROS: f32 = 30_000_000.0;

/// The level of a pulse output.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum GateState {
    /// The first half of each period.
    #[default]
    High,
    /// The second half of each period.
    Low,
}

impl GateState {
    /// Returns the opposite state.
    pub fn toggled(self) -> Self {
        match self {
            Self::High => Self::Low,
            Self::Low => Self::High,
        }
    }

    /// Returns `true` if the gate is [`High`][Self::High].
    pub fn is_high(self) -> bool {
        self == Self::High
    }
}

/// Receives the edges produced by a [`PulseGenerator`].
pub trait PulseHandler {
    /// The generator tagged `tag` changed to `state`.
    fn on_edge(&mut self, tag: u8, state: GateState);
}

impl<F: FnMut(u8, GateState)> PulseHandler for F {
    fn on_edge(&mut self, tag: u8, state: GateState) {
        self(tag, state)
    }
}

/// Produces a square wave of `division` pulses per beat at `bpm`.
///
/// Edges are scheduled relative to a persistent anchor (the time of the last [`reset`][Self::reset] plus a fixed
/// offset), never relative to the time of a reconfiguration, so retuning to the same tempo never moves an edge and
/// retuning to a new tempo keeps the wave aligned with the anchor.
#[derive(Debug, Clone)]
pub struct PulseGenerator {
    bpm: f32,
    division: f32,
    /// Anchor of the edge schedule.
    first_time: Instant,
    /// Time of the latest [`advance`][Self::advance] or [`reset`][Self::reset].
    last_time: Instant,
    offset: Duration,
    next_edge: Instant,
    half_period: Duration,
    state: GateState,
    active: bool,
    tag: u8,
}

impl PulseGenerator {
    /// Constructs an inactive [`PulseGenerator`] anchored at `now`.
    ///
    /// A non-positive `bpm * division` falls back to one pulse per beat at 120 BPM.
    pub fn new(bpm: f32, division: f32, offset: Duration, tag: u8, now: Instant) -> Self {
        let (bpm, division) = if is_valid(bpm, division) {
            (bpm, division)
        } else {
            warn!("Pulse generator {} got an invalid tempo; using 120 BPM", tag);
            (120.0, 1.0)
        };
        let mut generator = Self {
            bpm,
            division,
            first_time: now,
            last_time: now,
            offset,
            next_edge: now,
            half_period: Duration::from_micros(1),
            state: GateState::High,
            active: false,
            tag,
        };
        generator.retune();
        generator
    }

    /// Getter.
    pub fn bpm(&self) -> f32 {
        self.bpm
    }

    /// Getter.
    pub fn division(&self) -> f32 {
        self.division
    }

    /// Getter.
    pub fn tag(&self) -> u8 {
        self.tag
    }

    /// Getter.
    pub fn state(&self) -> GateState {
        self.state
    }

    /// Getter.
    pub fn next_edge(&self) -> Instant {
        self.next_edge
    }

    /// Getter.
    pub fn half_period(&self) -> Duration {
        self.half_period
    }

    /// Returns `true` if the generator produces edges.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Changes tempo and division together. Does nothing if neither changed, or if `bpm * division` is not positive.
    ///
    /// Returns `true` if the schedule was recomputed.
    pub fn configure(&mut self, bpm: f32, division: f32) -> bool {
        if bpm == self.bpm && division == self.division {
            return false;
        }
        if !is_valid(bpm, division) {
            warn!("Pulse generator {} ignoring invalid tempo", self.tag);
            return false;
        }
        self.bpm = bpm;
        self.division = division;
        self.retune();
        true
    }

    /// Changes the division, keeping the tempo.
    pub fn set_division(&mut self, division: f32) {
        if !is_valid(self.bpm, division) {
            warn!("Pulse generator {} ignoring invalid division", self.tag);
            return;
        }
        self.division = division;
        self.retune();
    }

    /// Resumes producing edges. The phase is unaffected.
    pub fn start(&mut self) {
        self.active = true;
    }

    /// Stops producing edges. The phase is unaffected.
    pub fn stop(&mut self) {
        self.active = false;
    }

    /// Re-anchors the schedule at `now`, restarting the wave with a rising edge which is reported immediately.
    pub fn reset<H: PulseHandler + ?Sized>(&mut self, now: Instant, handler: &mut H) {
        self.first_time = now;
        self.last_time = now;
        self.next_edge = now + self.offset + self.half_period;
        self.state = GateState::High;
        handler.on_edge(self.tag, self.state);
    }

    /// Produces any edges due by `now`.
    ///
    /// If several edges were missed (e.g., because the caller stalled), they are all applied but only the final
    /// state is reported, once. Returns that state, or `None` if no edge was due.
    pub fn advance<H: PulseHandler + ?Sized>(&mut self, now: Instant, handler: &mut H) -> Option<GateState> {
        self.last_time = now;
        if !self.active || now < self.next_edge {
            return None;
        }
        while self.next_edge <= now {
            self.state = self.state.toggled();
            self.next_edge += self.half_period;
        }
        handler.on_edge(self.tag, self.state);
        Some(self.state)
    }

    /// Recomputes the half period and replays the schedule from the anchor up to the latest known time.
    fn retune(&mut self) {
        let micros = HALF_MINUTE_MICROS / (self.bpm * self.division) + 0.5;
        // sub-microsecond periods would never let the catch-up loop finish
        self.half_period = Duration::from_micros((micros as u64).max(1));

        self.next_edge = self.first_time + self.offset + self.half_period;
        self.state = GateState::High;
        while self.next_edge < self.last_time {
            self.next_edge += self.half_period;
            self.state = self.state.toggled();
        }
    }
}

fn is_valid(bpm: f32, division: f32) -> bool {
    let product = bpm * division;
    product.is_finite() && product > 0.0
}
