//! Block-level laws of the segment preparer, checked over the public API:
//! prepared segments must account for every step event of every block, keep
//! a cruise at constant rate, and close each block with no phase debt.

use stepper_core::queue::SEGMENT_END_OF_BLOCK;
use stepper_core::{
    PlannerBlock, PlannerQueue, Segment, SegmentPreparer, SegmentQueue, SystemState,
};

struct VecPlanner {
    blocks: Vec<PlannerBlock>,
    tail: usize,
}

impl VecPlanner {
    fn new(blocks: Vec<PlannerBlock>) -> Self {
        Self { blocks, tail: 0 }
    }
}

impl PlannerQueue for VecPlanner {
    fn current_block(&self) -> Option<&PlannerBlock> {
        self.blocks.get(self.tail)
    }
    fn block_by_index(&self, index: u8) -> Option<&PlannerBlock> {
        self.blocks.get(index as usize)
    }
    fn next_block_index(&self, index: u8) -> u8 {
        index + 1
    }
    fn discard_current_block(&mut self) {
        self.tail += 1;
    }
}

fn line(steps_x: u32, mm: f32, entry_sqr: f32, nominal_sqr: f32, accel: f32) -> PlannerBlock {
    PlannerBlock {
        steps: [steps_x, 0, 0],
        step_event_count: steps_x,
        direction_bits: 0,
        millimeters: mm,
        entry_speed_sqr: entry_sqr,
        nominal_speed_sqr: nominal_sqr,
        acceleration: accel,
    }
}

/// Prepares and retires segments the way the executor would, grouping them
/// per block.
fn segments_per_block(planner: &mut VecPlanner) -> Vec<Vec<Segment>> {
    let sys = SystemState::new();
    let mut queue = SegmentQueue::new();
    let (producer, mut consumer) = queue.split();
    let mut prep = SegmentPreparer::new(producer, &sys);

    let mut blocks = Vec::new();
    let mut current = Vec::new();
    loop {
        prep.prepare(planner);
        let Some(segment) = consumer.peek() else {
            assert!(current.is_empty(), "block left unterminated");
            return blocks;
        };
        consumer.finish();
        current.push(segment);
        if segment.flags & SEGMENT_END_OF_BLOCK != 0 {
            planner.discard_current_block();
            blocks.push(core::mem::take(&mut current));
        }
    }
}

#[test]
fn every_block_accounts_for_every_step_event() {
    // Trapezoid, triangle, and a cruise chained through shared junction
    // speeds; the queue ends at rest.
    let mut planner = VecPlanner::new(vec![
        line(300, 30.0, 0.0, 10_000.0, 500.0),
        line(100, 10.0, 0.0, 10_000.0, 500.0),
        line(50, 5.0, 0.0, 2_500.0, 500.0),
    ]);

    let per_block = segments_per_block(&mut planner);
    assert_eq!(per_block.len(), 3);

    let totals: Vec<u32> = per_block
        .iter()
        .map(|segments| segments.iter().map(|s| s.n_step as u32).sum())
        .collect();
    assert_eq!(totals, vec![300, 100, 50]);

    for segments in &per_block {
        // The minimum-steps rule holds everywhere.
        assert!(segments.iter().all(|s| s.n_step >= 1));
        // Only the last segment of a block may close it, and it carries no
        // phase debt into the next block.
        let last = segments.last().unwrap();
        assert_eq!(last.n_phase_tick, 0);
        assert_eq!(
            segments
                .iter()
                .filter(|s| s.flags & SEGMENT_END_OF_BLOCK != 0)
                .count(),
            1
        );
    }
}

#[test]
fn pure_cruise_holds_its_rate_to_rounding() {
    // Two identical cruise blocks; the first sees the second's entry speed
    // as its exit, so it never decelerates.
    let mut planner = VecPlanner::new(vec![
        line(100, 10.0, 10_000.0, 10_000.0, 100.0),
        line(100, 10.0, 10_000.0, 10_000.0, 100.0),
    ]);

    let per_block = segments_per_block(&mut planner);
    let cruise = &per_block[0];

    let nominal = cruise[0].dist_per_tick;
    for segment in cruise {
        assert!(
            segment.dist_per_tick.abs_diff(nominal) <= 2,
            "cruise rate drifted: {} vs {}",
            segment.dist_per_tick,
            nominal
        );
    }
    let total: u32 = cruise.iter().map(|s| s.n_step as u32).sum();
    assert_eq!(total, 100);
}

#[test]
fn empty_planner_yields_no_segments_after_reset() {
    let sys = SystemState::new();
    let mut queue = SegmentQueue::new();
    let (producer, consumer) = queue.split();
    let mut prep = SegmentPreparer::new(producer, &sys);
    let mut planner = VecPlanner::new(vec![]);

    prep.reset();
    for _ in 0..4 {
        prep.prepare(&mut planner);
    }
    assert!(consumer.is_empty());
}
