//! Persisted stepper configuration.
//!
//! The settings store itself lives outside the core; the core takes a copy
//! of the fields it needs at construction and on explicit update.

/// Sentinel for `stepper_idle_lock_time`: never disable the drivers.
pub const KEEP_STEPPERS_ENABLED: u8 = 0xff;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "defmt-logging", derive(defmt::Format))]
pub struct Settings {
    /// Width of the step pulse in microseconds.
    pub pulse_microseconds: u8,
    /// Invert mask applied to the whole stepping-port image, step and
    /// direction bits alike.
    pub step_invert_mask: u8,
    /// Dwell in ms before drivers are disabled after motion stops, or
    /// [`KEEP_STEPPERS_ENABLED`].
    pub stepper_idle_lock_time: u8,
    /// Inverts the level of the stepper-disable line.
    pub invert_st_enable: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            pulse_microseconds: 10,
            step_invert_mask: 0,
            stepper_idle_lock_time: 25,
            invert_st_enable: false,
        }
    }
}
