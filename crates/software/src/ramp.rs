//! Provides the [`Ramp`], a slew limiter which glides an output voltage towards its target.

use embassy_time::{Duration, Instant};

/// Quintic smootherstep: `t³(t(6t − 15) + 10)`, clamped to `[0, 1]`.
///
/// Its first and second derivatives are zero at both ends, so a ramp neither jumps nor kinks when it starts or lands.
pub fn smootherstep(t: f32) -> f32 {
    let t = t.clamp(0.0, 1.0);
    t * t * t * (t * (t * 6.0 - 15.0) + 10.0)
}

/// Contains the state of a glide from one value to another.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Ramp {
    /// The value produced by the latest [`process`][Self::process].
    current: f32,
    /// Where the glide in progress began.
    start_value: f32,
    /// Where the glide in progress ends.
    target: f32,
    /// The [`Instant`] at which the glide in progress began.
    start_time: Instant,
    /// How long a glide takes. Zero disables slewing.
    duration: Duration,
    /// Set when the target changed outside of [`process`][Self::process]; the glide then starts at the next call.
    pending_start: bool,
}

impl Ramp {
    /// Constructs a [`Ramp`] resting at `initial`.
    pub fn new(duration: Duration, initial: f32) -> Self {
        Self {
            current: initial,
            start_value: initial,
            target: initial,
            start_time: Instant::from_ticks(0),
            duration,
            pending_start: false,
        }
    }

    /// Getter.
    pub fn value(&self) -> f32 {
        self.current
    }

    /// Getter.
    pub fn target(&self) -> f32 {
        self.target
    }

    /// Getter.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Begins a glide from the current value to `target`. The glide is timed from the next
    /// [`process`][Self::process] call. Does nothing if `target` is already the target.
    pub fn set_target(&mut self, target: f32) {
        if target != self.target {
            self.start_value = self.current;
            self.target = target;
            self.pending_start = true;
        }
    }

    /// Setter. A zero duration disables slewing, snapping the value to the target.
    pub fn set_duration(&mut self, duration: Duration) {
        self.duration = duration;
        if duration == Duration::from_ticks(0) {
            self.current = self.target;
            self.pending_start = false;
        }
    }

    /// Glides towards `target`, returning the value at `now`. A change of target starts a new glide from wherever the
    /// previous one had got to.
    ///
    /// Calling this again with the same arguments returns the same value.
    pub fn process(&mut self, target: f32, now: Instant) -> f32 {
        if self.duration == Duration::from_ticks(0) {
            self.start_value = target;
            self.target = target;
            self.current = target;
            self.pending_start = false;
            return target;
        }

        self.set_target(target);
        if self.pending_start {
            self.start_time = now;
            self.pending_start = false;
        }

        let elapsed = now.saturating_duration_since(self.start_time);
        self.current = if elapsed >= self.duration {
            self.target
        } else {
            let t = elapsed.as_micros() as f32 / self.duration.as_micros() as f32;
            self.start_value + (self.target - self.start_value) * smootherstep(t)
        };
        self.current
    }

    /// Glides towards the existing target.
    pub fn process_current(&mut self, now: Instant) -> f32 {
        self.process(self.target, now)
    }
}
