use num_derive::{FromPrimitive, ToPrimitive};

/// Determines what drives an analog output.
#[derive(Debug, Default, Copy, Clone, ToPrimitive, FromPrimitive, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OutputMode {
    /// The output slews towards a target supplied from outside the core, typically a knob reading.
    #[default]
    Manual,
    /// The output follows a tempo-synced pulse, slewing between its low and high levels on every edge.
    Clock,
}
impl OutputMode {
    /// Looks up a mode code as the host tool sends it. Modes this module doesn't offer yield `None`.
    pub fn from_host_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Manual),
            5 => Some(Self::Clock),
            _ => None,
        }
    }

    /// The host tool's code for this mode.
    pub fn host_code(&self) -> u8 {
        match self {
            Self::Manual => 0,
            Self::Clock => 5,
        }
    }
}

impl super::CycleConfig for OutputMode {}
