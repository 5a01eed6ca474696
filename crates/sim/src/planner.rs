//! Ring-indexed planner queue stand-in.
//!
//! The real planner owns a ring of blocks and exposes them to the core by
//! ring index; this stand-in reproduces that indexing over a
//! `heapless::Deque` so the preparer's index arithmetic is exercised the
//! same way it would be against the production planner.

use heapless::Deque;
use stepper_core::{PlannerBlock, PlannerQueue};

/// Ring size of the planner buffer, matching the planner's own block queue.
pub const PLANNER_BUFFER_SIZE: usize = 18;

#[derive(Default)]
pub struct RingPlanner {
    queue: Deque<PlannerBlock, PLANNER_BUFFER_SIZE>,
    /// Ring index of the queue front, advanced on every discard so block
    /// indices stay stable while blocks drain.
    tail_index: u8,
}

impl RingPlanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a planned block. Returns it back when the ring is full.
    pub fn push(&mut self, block: PlannerBlock) -> Result<(), PlannerBlock> {
        self.queue.push_back(block)
    }

    /// Mutable access to the head block, for replanning it mid-execution.
    pub fn current_block_mut(&mut self) -> Option<&mut PlannerBlock> {
        self.queue.front_mut()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }
}

impl PlannerQueue for RingPlanner {
    fn current_block(&self) -> Option<&PlannerBlock> {
        self.queue.front()
    }

    fn block_by_index(&self, index: u8) -> Option<&PlannerBlock> {
        let offset =
            (index as usize + PLANNER_BUFFER_SIZE - self.tail_index as usize) % PLANNER_BUFFER_SIZE;
        self.queue.iter().nth(offset)
    }

    fn next_block_index(&self, index: u8) -> u8 {
        (index + 1) % PLANNER_BUFFER_SIZE as u8
    }

    fn discard_current_block(&mut self) {
        if self.queue.pop_front().is_some() {
            self.tail_index = (self.tail_index + 1) % PLANNER_BUFFER_SIZE as u8;
        }
    }
}
