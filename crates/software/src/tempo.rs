//! Estimation of the tempo of an incoming MIDI clock.
//!
//! Inter-tick deltas are averaged over a window of [`WINDOW`] ticks to produce one instantaneous estimate; the median
//! of the last [`MEDIAN_SLOTS`] estimates is adopted as the tempo if it is plausible and new. The median makes a
//! single burst of jitter (or a late tick after a USB hiccup) invisible to the outputs.

use crate::midi::Realtime;
use embassy_time::Instant;

/// Number of inter-tick deltas averaged into one instantaneous estimate.
pub const WINDOW: usize = 32;
/// Number of instantaneous estimates the median is taken over.
pub const MEDIAN_SLOTS: usize = 7;

const MICROS_PER_MINUTE: u64 = 60_000_000;

/// Tuning of the [`TempoEstimator`].
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TempoConfig {
    /// Clock ticks per quarter note.
    pub ppqn: u32,
    /// Scales the measured rate, for clock sources which do not tick at `ppqn`.
    pub multiplier: u32,
    /// Length of a phrase in beats; a phrase boundary is reported every `ppqn * reset_every_beats` ticks.
    pub reset_every_beats: u32,
    /// Tempo before any clock has been measured.
    pub initial_bpm: u16,
    /// Slowest tempo that will be adopted.
    pub min_bpm: u16,
    /// Fastest tempo that will be adopted.
    pub max_bpm: u16,
}

impl Default for TempoConfig {
    fn default() -> Self {
        Self {
            ppqn: 24,
            multiplier: 2,
            reset_every_beats: 16,
            initial_bpm: 120,
            min_bpm: 60,
            max_bpm: 260,
        }
    }
}

impl TempoConfig {
    fn ticks_per_phrase(&self) -> u32 {
        (self.ppqn * self.reset_every_beats).max(1)
    }
}

/// What a single clock tick changed.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TickOutcome {
    /// The newly adopted tempo, if it changed.
    pub tempo: Option<u16>,
    /// Whether this tick starts a new phrase.
    pub phrase_boundary: bool,
}

/// Tracks the tempo of a MIDI clock and the position within the current phrase.
#[derive(Debug, Clone)]
pub struct TempoEstimator {
    config: TempoConfig,
    last_tick: Option<Instant>,
    /// Sum of the deltas in the current window, in microseconds.
    sum: u64,
    count: usize,
    estimates: [u16; MEDIAN_SLOTS],
    cursor: usize,
    bpm: u16,
    ticks: u32,
}

impl Default for TempoEstimator {
    fn default() -> Self {
        Self::new(TempoConfig::default())
    }
}

impl TempoEstimator {
    /// Constructs a [`TempoEstimator`] that has seen no clock yet.
    pub fn new(config: TempoConfig) -> Self {
        Self {
            config,
            last_tick: None,
            sum: 0,
            count: 0,
            estimates: [0; MEDIAN_SLOTS],
            cursor: 0,
            bpm: config.initial_bpm,
            ticks: 0,
        }
    }

    /// Getter.
    pub fn config(&self) -> TempoConfig {
        self.config
    }

    /// The adopted tempo in beats per minute.
    pub fn bpm(&self) -> u16 {
        self.bpm
    }

    /// Records a Timing Clock tick received at `now`.
    pub fn on_tick(&mut self, now: Instant) -> TickOutcome {
        self.ticks = self.ticks.wrapping_add(1);
        let phrase_boundary = self.ticks % self.config.ticks_per_phrase() == 0;
        if phrase_boundary {
            trace!("Phrase boundary");
        }

        let previous = self.last_tick.replace(now);
        let Some(previous) = previous else {
            return TickOutcome {
                tempo: None,
                phrase_boundary,
            };
        };

        self.sum += now.saturating_duration_since(previous).as_micros();
        self.count += 1;
        if self.count < WINDOW {
            return TickOutcome {
                tempo: None,
                phrase_boundary,
            };
        }

        let estimate = self.window_estimate();
        self.sum = 0;
        self.count = 0;
        self.estimates[self.cursor] = estimate;
        self.cursor = (self.cursor + 1) % MEDIAN_SLOTS;

        let candidate = self.median();
        let tempo = if (self.config.min_bpm..=self.config.max_bpm).contains(&candidate) && candidate != self.bpm {
            info!("Tempo changed from {} to {} BPM", self.bpm, candidate);
            self.bpm = candidate;
            Some(candidate)
        } else {
            None
        };
        TickOutcome {
            tempo,
            phrase_boundary,
        }
    }

    /// Reacts to a transport message. Start, Continue and Stop all realign the phrase so that the next tick begins a
    /// new one, and discard the partial window so the gap while stopped is not measured.
    pub fn on_transport(&mut self, msg: Realtime) {
        match msg {
            Realtime::Start | Realtime::Continue | Realtime::Stop => {
                debug!("Realigning phrase on {}", msg);
                self.ticks = self.config.ticks_per_phrase() - 1;
                self.last_tick = None;
                self.sum = 0;
                self.count = 0;
            }
            Realtime::Clock => {}
        }
    }

    /// Instantaneous estimate over the current window, rounded to the nearest whole BPM.
    fn window_estimate(&self) -> u16 {
        let denominator = self.sum * u64::from(self.config.ppqn.max(1));
        if denominator == 0 {
            return u16::MAX;
        }
        let numerator = MICROS_PER_MINUTE * u64::from(self.config.multiplier) * WINDOW as u64;
        let bpm = (numerator + denominator / 2) / denominator;
        u16::try_from(bpm).unwrap_or(u16::MAX)
    }

    fn median(&self) -> u16 {
        let mut sorted = self.estimates;
        sorted.sort_unstable();
        sorted[MEDIAN_SLOTS / 2]
    }
}
