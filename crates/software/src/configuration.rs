//! This module contains both user-configurable settings (implemented as enums) and traits to make them easier to work with in code.

mod clock_division;
pub use clock_division::*;

mod output_mode;
pub use output_mode::*;

mod sysex_realtime;
pub use sysex_realtime::*;

use num_traits::{FromPrimitive, ToPrimitive};

/// A trait which allows infinite cycling of an enum's variants.
///
/// Useful for pushbutton user interfaces, allowing presses to advance from the current to the next variant,
/// cycling back to the beginning when all variants have been exhausted.
pub trait CycleConfig {
    /// Return the next variant, cycling back to the beginning as needed.
    fn cycle(self) -> Self
    where
        Self: FromPrimitive + ToPrimitive + Sized,
    {
        let index = self
            .to_u8()
            .expect("enum variants should be castable to u8");
        match <Self as FromPrimitive>::from_u8(index + 1) {
            Some(new_selection) => new_selection,
            None => FromPrimitive::from_u8(0).expect("enum should not be empty"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_division() {
        let config = ClockDivision::Eighth.cycle();
        assert_eq!(
            ClockDivision::Sixteenth,
            config,
            "Should advance to next variant; expected left but got right"
        );

        let config = config.cycle();
        assert_eq!(
            ClockDivision::ThirtySecond,
            config,
            "Should advance to next variant; expected left but got right"
        );

        let config = config.cycle();
        assert_eq!(
            ClockDivision::Whole,
            config,
            "Should wrap around to first variant; expected left but got right"
        );
    }

    #[test]
    fn cycle_output_mode() {
        assert_eq!(OutputMode::Clock, OutputMode::Manual.cycle());
        assert_eq!(OutputMode::Manual, OutputMode::Clock.cycle());
    }
}
