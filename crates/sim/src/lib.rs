//! # In-Process Simulation Harness
//!
//! Drives the stepper execution core at interrupt-tick granularity with a
//! recording hardware seam in place of real pins and timers, so motion can
//! be validated in CI without physical hardware.
//!
//! The two primary components are [`RingPlanner`], a planner-queue stand-in
//! the tests feed with planned blocks, and [`SimMachine`], which wires the
//! preparer, executor and cycle controller together and captures a
//! timestamped pin-edge trace for analysis.

pub mod machine;
pub mod planner;

pub use machine::{RecordedHal, SimMachine, TraceEvent, TraceKind};
pub use planner::{RingPlanner, PLANNER_BUFFER_SIZE};
