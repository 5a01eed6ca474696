//! # Stepper Execution Core
//!
//! Converts a queue of planned straight-line motion blocks into a precisely
//! timed train of step pulses on three axis outputs, usable on both host
//! (simulation, tests) and MCU (`no_std`-friendly).
//!
//! The core is split along the foreground/interrupt boundary:
//! - [`SegmentPreparer`] runs from the cooperative foreground loop and slices
//!   the head planner block into short, roughly constant-rate segments.
//! - [`StepExecutor`] runs from the periodic step interrupt and drains those
//!   segments, firing step events with a Bresenham-within-Bresenham scheme:
//!   an inverse-time counter decides *when* an event fires, per-axis
//!   counters decide *which* axes step on it.
//!
//! The two halves communicate only through the [`SegmentQueue`] ring and the
//! [`SystemState`] atomics, so no locking is needed on the interrupt path.
//! Hardware access goes through the [`StepperHal`] capability trait.

#![cfg_attr(not(feature = "std"), no_std)]

pub mod block;
pub mod cycle;
pub mod executor;
pub mod prep;
pub mod queue;
pub mod settings;

// Re-export core types for easier access
pub use block::{PlannerBlock, PlannerQueue};
pub use cycle::{CycleController, CycleState, SystemState, EXEC_ALARM, EXEC_CYCLE_STOP};
pub use executor::{StepExecutor, StepperHal};
pub use prep::{PartialBlockParameters, SegmentPreparer};
pub use queue::{Segment, SegmentConsumer, SegmentProducer, SegmentQueue, SEGMENT_END_OF_BLOCK};
pub use settings::{Settings, KEEP_STEPPERS_ENABLED};

/// Number of controlled axes.
pub const N_AXIS: usize = 3;

pub const X_AXIS: usize = 0;
pub const Y_AXIS: usize = 1;
pub const Z_AXIS: usize = 2;

// Layout of the combined 8-bit stepping-port image. Step bits occupy the low
// nibble, direction bits the high nibble; both are covered by the step invert
// mask from [`Settings`].
pub const X_STEP_BIT: u8 = 0;
pub const Y_STEP_BIT: u8 = 1;
pub const Z_STEP_BIT: u8 = 2;
pub const X_DIRECTION_BIT: u8 = 4;
pub const Y_DIRECTION_BIT: u8 = 5;
pub const Z_DIRECTION_BIT: u8 = 6;

pub const STEP_MASK: u8 = (1 << X_STEP_BIT) | (1 << Y_STEP_BIT) | (1 << Z_STEP_BIT);
pub const DIRECTION_MASK: u8 =
    (1 << X_DIRECTION_BIT) | (1 << Y_DIRECTION_BIT) | (1 << Z_DIRECTION_BIT);
pub const STEPPING_MASK: u8 = STEP_MASK | DIRECTION_MASK;

/// Frequency of the periodic step interrupt.
pub const ISR_TICKS_PER_SECOND: u32 = 30_000;

/// How many segments the preparer targets per second of motion.
pub const ACCELERATION_TICKS_PER_SECOND: u32 = 120;

/// Target duration of one prepared segment, in seconds.
pub const DT_SEGMENT: f32 = 1.0 / ACCELERATION_TICKS_PER_SECOND as f32;

/// Capacity of the segment ring buffer. One slot stays reserved, so the
/// usable capacity is `SEGMENT_BUFFER_SIZE - 1`.
pub const SEGMENT_BUFFER_SIZE: usize = 6;

/// Number of shared block-data slots cycled through by the preparer.
pub const SEGMENT_DATA_SLOTS: usize = SEGMENT_BUFFER_SIZE - 1;

/// Fixed-point scale of the inverse-time counters. With distance expressed
/// in `INV_TIME_MULTIPLIER * mm` units, `dist_per_step > dist_per_tick`
/// holds for every rate up to one step event per interrupt tick, which keeps
/// the executor's counter arithmetic meaningful.
pub const INV_TIME_MULTIPLIER: f32 = 10_000_000.0;

/// Lower bound on step events per emitted segment. Enforced by the preparer
/// so the executor's Bresenham counters always make progress.
pub const MINIMUM_STEPS_PER_SEGMENT: u32 = 1;
