use num_derive::{FromPrimitive, ToPrimitive};

/// Determines how many pulses a clock output produces per beat (quarter note).
///
/// Each pulse consists of a high half and a low half, so a [`PulseGenerator`][crate::pulse::PulseGenerator] running
/// at a given BPM toggles its gate twice per pulse.
#[derive(Debug, Default, Clone, Copy, ToPrimitive, FromPrimitive, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ClockDivision {
    /// One pulse every four beats.
    Whole,
    /// One pulse every two beats.
    Half,
    /// One pulse per beat.
    Quarter,
    /// Two pulses per beat.
    Eighth,
    /// Four pulses per beat.
    #[default]
    Sixteenth,
    /// Eight pulses per beat.
    ThirtySecond,
}

/// The host tool's division menu, `/512` through `x48`, indexed by its codes.
const HOST_MENU_LEN: u8 = 19;

impl ClockDivision {
    /// Looks up a code from the host tool's division menu. Menu entries with no [`ClockDivision`] yield `None`.
    pub fn from_host_code(code: u8) -> Option<Self> {
        match code {
            7 => Some(Self::Whole),
            8 => Some(Self::Half),
            9 => Some(Self::Quarter),
            10 => Some(Self::Eighth),
            12 => Some(Self::Sixteenth),
            14 => Some(Self::ThirtySecond),
            code if code < HOST_MENU_LEN => {
                debug!("Host division {} is not supported", code);
                None
            }
            _ => None,
        }
    }

    /// The code of this division in the host tool's menu.
    pub fn host_code(&self) -> u8 {
        match self {
            Self::Whole => 7,
            Self::Half => 8,
            Self::Quarter => 9,
            Self::Eighth => 10,
            Self::Sixteenth => 12,
            Self::ThirtySecond => 14,
        }
    }

    /// Returns the number of pulses per beat.
    pub fn factor(&self) -> f32 {
        match self {
            Self::Whole => 0.25,
            Self::Half => 0.5,
            Self::Quarter => 1.0,
            Self::Eighth => 2.0,
            Self::Sixteenth => 4.0,
            Self::ThirtySecond => 8.0,
        }
    }
}

impl super::CycleConfig for ClockDivision {}
