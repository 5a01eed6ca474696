//! Planner-facing interface.
//!
//! The motion planner owns its block queue; the core only reads blocks by
//! ring index and asks for the head block to be released once it has been
//! fully executed. [`PlannerQueue`] is the seam those four operations go
//! through, so the core never holds a pointer into planner storage across a
//! replan.

use crate::N_AXIS;

/// A planned straight-line move in step space, produced by the external
/// planner and read-only to the core.
///
/// Speeds are stored squared (mm^2/s^2) the way the planner's junction math
/// produces them; the preparer takes the square roots exactly once per
/// block.
#[derive(Debug, Copy, Clone, PartialEq)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub struct PlannerBlock {
    /// Step count per axis for this move.
    pub steps: [u32; N_AXIS],
    /// Maximum of `steps`; the number of Bresenham step events in the block.
    pub step_event_count: u32,
    /// Per-axis sign flags, laid out on the direction bits of the stepping
    /// port image.
    pub direction_bits: u8,
    /// Geometric length of the move in mm.
    pub millimeters: f32,
    /// Squared speed at which the block is entered.
    pub entry_speed_sqr: f32,
    /// Squared cruising speed the block was planned for.
    pub nominal_speed_sqr: f32,
    /// Constant acceleration over the block, mm/s^2.
    pub acceleration: f32,
}

/// Indexed, read-only access to the planner's block ring, plus the single
/// release hook the executor is allowed to call.
pub trait PlannerQueue {
    /// The block currently at the head of the queue, i.e. the one the
    /// executor is tracing.
    fn current_block(&self) -> Option<&PlannerBlock>;

    /// The block at ring index `index`, if one is queued there.
    fn block_by_index(&self, index: u8) -> Option<&PlannerBlock>;

    /// Ring successor of `index` in the planner's own buffer arithmetic.
    fn next_block_index(&self, index: u8) -> u8;

    /// Release the head block. Called by the executor exactly once per
    /// block, when it pops the segment flagged end-of-block.
    fn discard_current_block(&mut self);
}
