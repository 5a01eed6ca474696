//! Segment preparer.
//!
//! Runs from the cooperative foreground loop and keeps the segment ring
//! topped up by slicing the head planner block into short, roughly
//! constant-rate segments. Each call to [`SegmentPreparer::prepare`] returns
//! promptly: it fills until the ring or the planner runs out and never
//! blocks.
//!
//! ## Why segments carry a step count, not a time span
//!
//! A segment executes a fixed number of step events over an approximate time
//! window. Predicting exactly how many steps land in a fixed window, while
//! keeping pulse phasing consistent across window boundaries, would cost far
//! more than it is worth. Instead the executor's inverse-time counter keeps
//! the sub-step remainders across segment boundaries on its own, so the
//! preparer only needs a cheap velocity estimate per slice: the step count
//! comes from a ceiling rule, and the fractional-step residue is paid out as
//! trailing phase ticks so the next segment starts with the pulse train
//! still on grid.
//!
//! Profile math runs in f32, in step units, from thresholds expressed as
//! *steps remaining* counted down from the block's step event count. Only
//! the emitted segment fields cross into the integer domain.

#[cfg(not(feature = "std"))]
use libm::{ceilf, sqrtf};

#[cfg(feature = "std")]
#[inline]
fn ceilf(value: f32) -> f32 {
    value.ceil()
}

#[cfg(feature = "std")]
#[inline]
fn sqrtf(value: f32) -> f32 {
    value.sqrt()
}

use crate::block::{PlannerBlock, PlannerQueue};
use crate::cycle::{CycleState, SystemState};
use crate::queue::{BlockData, Segment, SegmentProducer, SEGMENT_END_OF_BLOCK};
use crate::{
    DT_SEGMENT, INV_TIME_MULTIPLIER, ISR_TICKS_PER_SECOND, MINIMUM_STEPS_PER_SEGMENT,
    SEGMENT_DATA_SLOTS,
};

/// Upper bound on `DT_SEGMENT` slices merged into one segment while chasing
/// the minimum step count. Reaching it means the planner handed us a rate so
/// low the block makes no measurable progress, which its contract forbids.
const MAX_SEGMENT_SLICES: u32 = 128;

/// Residual of an in-flight block, handed back to the planner for a
/// mid-block replan.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct PartialBlockParameters {
    /// Length of the unexecuted remainder in mm.
    pub millimeters_remaining: f32,
    /// True when the remainder is already inside the deceleration ramp.
    pub is_decelerating: bool,
}

/// Foreground half of the core. Owns the producer side of the segment ring
/// and all block-slicing state.
pub struct SegmentPreparer<'a> {
    producer: SegmentProducer<'a>,
    sys: &'a SystemState,
    /// Planner ring index of the block being prepped.
    prep_block_index: u8,
    /// Block-data slot being prepped.
    data_prep_index: u8,
    /// Whether a block is currently checked out for slicing.
    has_prep_block: bool,
    /// Set when the planner replanned the checked-out block mid-execution;
    /// the next block load carries the residual forward instead of starting
    /// over.
    partial_block_flag: bool,
}

impl<'a> SegmentPreparer<'a> {
    pub fn new(producer: SegmentProducer<'a>, sys: &'a SystemState) -> Self {
        Self {
            producer,
            sys,
            prep_block_index: 0,
            data_prep_index: 0,
            has_prep_block: false,
            partial_block_flag: false,
        }
    }

    /// Fills the segment ring from the planner queue. Called whenever the
    /// foreground has time; returns as soon as the ring is full or the
    /// planner is empty.
    pub fn prepare<P: PlannerQueue>(&mut self, planner: &mut P) {
        if self.sys.state() == CycleState::Queued {
            return;
        }
        while !self.producer.is_full() {
            if !self.has_prep_block && !self.begin_block(planner) {
                return;
            }
            self.emit_segment(planner);
        }
    }

    /// Planner ring index of the block currently being prepped.
    pub fn prep_block_index(&self) -> u8 {
        self.prep_block_index
    }

    /// Releases the preparer's claim on the in-flight block and reports its
    /// residual, so the planner can replan from here. The next
    /// [`prepare`](Self::prepare) reloads the block, carries the residual
    /// step count forward and recomputes only the rate profile.
    ///
    /// Returns `None` when no block is checked out (the previous block just
    /// finished), in which case the planner replans from a block boundary
    /// and no carry-forward is needed.
    pub fn fetch_partial_block_parameters(
        &mut self,
        block_index: u8,
    ) -> Option<PartialBlockParameters> {
        if !self.has_prep_block {
            return None;
        }
        debug_assert_eq!(block_index, self.prep_block_index);
        let data = self.producer.data(self.data_prep_index);
        let params = PartialBlockParameters {
            millimeters_remaining: data.step_events_remaining / data.step_per_mm,
            is_decelerating: data.step_events_remaining < data.decelerate_after,
        };
        self.partial_block_flag = true;
        self.has_prep_block = false;
        Some(params)
    }

    /// Zeroes all prep state and empties the segment ring. Only valid with
    /// the step interrupt stopped.
    pub fn reset(&mut self) {
        self.producer.flush();
        self.prep_block_index = 0;
        self.data_prep_index = 0;
        self.has_prep_block = false;
        self.partial_block_flag = false;
    }

    /// Checks out the next planner block and initializes its block-data
    /// slot. Returns false when the planner has nothing queued.
    fn begin_block<P: PlannerQueue>(&mut self, planner: &mut P) -> bool {
        let block = match planner.block_by_index(self.prep_block_index) {
            Some(block) => *block,
            None => return false,
        };

        let previous_data_index = self.data_prep_index;
        self.data_prep_index = (self.data_prep_index + 1) % SEGMENT_DATA_SLOTS as u8;

        // Exit speed is the entry speed of the following block, zero at the
        // end of the planner buffer.
        let next_index = planner.next_block_index(self.prep_block_index);
        let exit_speed_sqr = planner
            .block_by_index(next_index)
            .map(|next| next.entry_speed_sqr)
            .unwrap_or(0.0);

        if self.partial_block_flag {
            // The planner replanned this block mid-execution. Step-domain
            // identity carries over; only the rate profile is recomputed
            // from the new plan.
            let carried = self.producer.data(previous_data_index);
            let data = self.producer.data_mut(self.data_prep_index);
            data.step_events_remaining = carried.step_events_remaining;
            data.dist_per_step = carried.dist_per_step;
            data.step_per_mm = carried.step_per_mm;
            data.acceleration = carried.acceleration;
            self.partial_block_flag = false;
        } else {
            let data = self.producer.data_mut(self.data_prep_index);
            data.step_events_remaining = block.step_event_count as f32;
            data.step_per_mm = block.step_event_count as f32 / block.millimeters;
            data.dist_per_step = ceilf(INV_TIME_MULTIPLIER / data.step_per_mm) as u32;
            data.acceleration = data.step_per_mm * block.acceleration;
        }

        let data = self.producer.data_mut(self.data_prep_index);
        data.current_rate = data.step_per_mm * sqrtf(block.entry_speed_sqr);
        data.exit_rate = data.step_per_mm * sqrtf(exit_speed_sqr);
        classify_profile(&block, exit_speed_sqr, data);

        self.has_prep_block = true;
        true
    }

    /// Slices one segment off the in-flight block and publishes it. The
    /// caller has verified the ring has room.
    fn emit_segment<P: PlannerQueue>(&mut self, planner: &mut P) {
        let data_index = self.data_prep_index;
        let mut end_of_block = false;

        let segment = {
            let data = self.producer.data_mut(data_index);
            let entry_remaining = data.step_events_remaining;
            let mut steps_remaining = entry_remaining;
            let mut dt = 0.0f32;

            // Advance by DT_SEGMENT slices until the segment holds at least
            // one step event or the block runs out.
            let mut slices = 0;
            loop {
                dt += time_slice(data, &mut steps_remaining);
                if steps_remaining <= 0.0 {
                    break;
                }
                if ceilf(entry_remaining) - ceilf(steps_remaining)
                    >= MINIMUM_STEPS_PER_SEGMENT as f32
                {
                    break;
                }
                slices += 1;
                debug_assert!(
                    slices < MAX_SEGMENT_SLICES,
                    "planner block makes no step progress"
                );
                if slices >= MAX_SEGMENT_SLICES {
                    break;
                }
            }

            // Average rate over the segment, converted to the inverse-time
            // fixed-point increment per interrupt tick.
            let rate = (entry_remaining - steps_remaining) / dt;
            let dist_per_tick = ceilf(
                rate / data.step_per_mm * (INV_TIME_MULTIPLIER / ISR_TICKS_PER_SECOND as f32),
            ) as u32;

            let mut segment = Segment {
                n_step: 0,
                n_phase_tick: 0,
                dist_per_tick,
                data_index,
                flags: 0,
            };

            if steps_remaining > 0.0 {
                // The ceiling rule fixes the integer step count; the
                // fractional residue becomes trailing phase ticks so the
                // next segment picks the pulse train up on grid.
                segment.n_step = (ceilf(entry_remaining) - ceilf(steps_remaining)) as u8;
                let fraction = ceilf(steps_remaining) - steps_remaining;
                segment.n_phase_tick =
                    ceilf(fraction * data.dist_per_step as f32 / dist_per_tick as f32) as u8;
            } else {
                // End of block: finish out the remaining steps, no phase
                // correction.
                segment.n_step = ceilf(entry_remaining) as u8;
                segment.flags |= SEGMENT_END_OF_BLOCK;
                end_of_block = true;
            }

            data.step_events_remaining = steps_remaining;
            segment
        };

        if end_of_block {
            self.prep_block_index = planner.next_block_index(self.prep_block_index);
            self.has_prep_block = false;
        }

        let published = self.producer.push(segment);
        debug_assert!(published.is_ok());
    }
}

/// Decides which of the seven profile shapes the block takes and fills in
/// `maximum_rate`, `accelerate_until` and `decelerate_after`, first in mm,
/// then converted to step units.
fn classify_profile(block: &PlannerBlock, exit_speed_sqr: f32, data: &mut BlockData) {
    let mm = block.millimeters;
    let two_a = 2.0 * block.acceleration;

    data.accelerate_until = mm;
    if block.entry_speed_sqr == block.nominal_speed_sqr {
        data.maximum_rate = sqrtf(block.nominal_speed_sqr);
        if exit_speed_sqr == block.nominal_speed_sqr {
            // Cruise-only
            data.decelerate_after = 0.0;
        } else {
            // Cruise-deceleration
            data.decelerate_after = (block.nominal_speed_sqr - exit_speed_sqr) / two_a;
        }
    } else if exit_speed_sqr == block.nominal_speed_sqr {
        // Acceleration-cruise
        data.maximum_rate = sqrtf(block.nominal_speed_sqr);
        data.decelerate_after = 0.0;
        data.accelerate_until -= (block.nominal_speed_sqr - block.entry_speed_sqr) / two_a;
    } else {
        let intersection = 0.5 * (mm + (block.entry_speed_sqr - exit_speed_sqr) / two_a);
        if intersection > 0.0 {
            if intersection < mm {
                data.decelerate_after = (block.nominal_speed_sqr - exit_speed_sqr) / two_a;
                if data.decelerate_after < intersection {
                    // Trapezoid
                    data.maximum_rate = sqrtf(block.nominal_speed_sqr);
                    data.accelerate_until -=
                        (block.nominal_speed_sqr - block.entry_speed_sqr) / two_a;
                } else {
                    // Triangle: nominal speed is never reached.
                    data.decelerate_after = intersection;
                    data.maximum_rate = sqrtf(two_a * intersection + exit_speed_sqr);
                    data.accelerate_until -= intersection;
                }
            } else {
                // Deceleration-only
                data.maximum_rate = sqrtf(block.entry_speed_sqr);
                data.decelerate_after = mm;
            }
        } else {
            // Acceleration-only
            data.maximum_rate = sqrtf(exit_speed_sqr);
            data.decelerate_after = 0.0;
            data.accelerate_until = 0.0;
        }
    }

    // Express the profile in steps.
    data.maximum_rate *= data.step_per_mm;
    data.accelerate_until *= data.step_per_mm;
    data.decelerate_after *= data.step_per_mm;
}

/// Advances the slicing position by up to one `DT_SEGMENT`, walking at most
/// two ramp junctions (accelerate to cruise, cruise into deceleration).
/// Returns the time actually covered; shorter than `DT_SEGMENT` only at the
/// end of the block.
fn time_slice(data: &mut BlockData, steps_remaining: &mut f32) -> f32 {
    let entry = *steps_remaining;
    let mut dt = DT_SEGMENT;

    if entry > data.accelerate_until {
        // Acceleration ramp
        *steps_remaining -=
            data.current_rate * DT_SEGMENT + data.acceleration * (0.5 * DT_SEGMENT * DT_SEGMENT);
        if *steps_remaining < data.accelerate_until {
            // Ramp ends inside the slice. Clamp to the junction and average
            // the rates over the distance actually covered.
            *steps_remaining = data.accelerate_until;
            dt = 2.0 * (entry - *steps_remaining) / (data.current_rate + data.maximum_rate);
            data.current_rate = data.maximum_rate;
        } else {
            data.current_rate += data.acceleration * DT_SEGMENT;
        }
    } else if entry <= data.decelerate_after {
        // Deceleration ramp. Once the rate cannot sustain a full slice the
        // midpoint rule would drive it negative; by then only a sub-step
        // residual is left, so close the block at the exit junction.
        if data.current_rate > data.acceleration * DT_SEGMENT {
            *steps_remaining -= data.current_rate * DT_SEGMENT
                - data.acceleration * (0.5 * DT_SEGMENT * DT_SEGMENT);
            if *steps_remaining > 0.0 {
                data.current_rate -= data.acceleration * DT_SEGMENT;
            } else {
                // Block runs out inside the slice.
                dt = 2.0 * entry / (data.current_rate + data.exit_rate);
                *steps_remaining = 0.0;
            }
        } else {
            let junction_rate = data.current_rate + data.exit_rate;
            dt = if junction_rate > 0.0 {
                (2.0 * entry / junction_rate).min(DT_SEGMENT)
            } else {
                DT_SEGMENT
            };
            *steps_remaining = 0.0;
        }
    } else {
        // Cruise
        *steps_remaining -= data.maximum_rate * DT_SEGMENT;
        if *steps_remaining < data.decelerate_after {
            *steps_remaining = data.decelerate_after;
            dt = (entry - *steps_remaining) / data.maximum_rate;
        }
    }

    // An incomplete slice always continues into a cruise and/or a
    // deceleration ramp. Fill the remainder.
    if dt < DT_SEGMENT && *steps_remaining > 0.0 {
        if *steps_remaining > data.decelerate_after {
            let last = *steps_remaining;
            *steps_remaining -= data.current_rate * (DT_SEGMENT - dt);
            if *steps_remaining < data.decelerate_after {
                *steps_remaining = data.decelerate_after;
                dt += (last - *steps_remaining) / data.maximum_rate;
            } else {
                dt = DT_SEGMENT;
            }
        }
        if *steps_remaining > 0.0 && *steps_remaining <= data.decelerate_after && dt < DT_SEGMENT {
            let last = *steps_remaining;
            let dt_remainder = DT_SEGMENT - dt;
            if data.current_rate > data.acceleration * dt_remainder {
                *steps_remaining -=
                    dt_remainder * (data.current_rate - 0.5 * data.acceleration * dt_remainder);
                if *steps_remaining > 0.0 {
                    data.current_rate -= data.acceleration * dt_remainder;
                    dt = DT_SEGMENT;
                } else {
                    dt += 2.0 * last / (data.current_rate + data.exit_rate);
                    *steps_remaining = 0.0;
                }
            } else {
                // Same rundown as the main ramp: only a sub-step residual
                // can be left at this rate.
                let junction_rate = data.current_rate + data.exit_rate;
                dt += if junction_rate > 0.0 {
                    (2.0 * last / junction_rate).min(DT_SEGMENT)
                } else {
                    dt_remainder
                };
                *steps_remaining = 0.0;
            }
        }
    }

    dt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::SegmentQueue;

    const STEP_PER_MM: f32 = 10.0;

    fn block(mm: f32, entry_sqr: f32, nominal_sqr: f32, accel: f32) -> PlannerBlock {
        let steps = (mm * STEP_PER_MM) as u32;
        PlannerBlock {
            steps: [steps, 0, 0],
            step_event_count: steps,
            direction_bits: 0,
            millimeters: mm,
            entry_speed_sqr: entry_sqr,
            nominal_speed_sqr: nominal_sqr,
            acceleration: accel,
        }
    }

    fn classified(block: &PlannerBlock, exit_sqr: f32) -> BlockData {
        let mut data = BlockData {
            step_per_mm: block.step_event_count as f32 / block.millimeters,
            ..BlockData::default()
        };
        classify_profile(block, exit_sqr, &mut data);
        data
    }

    #[test]
    fn classify_cruise_only() {
        let data = classified(&block(10.0, 10_000.0, 10_000.0, 100.0), 10_000.0);
        assert_eq!(data.maximum_rate, 100.0 * STEP_PER_MM);
        assert_eq!(data.accelerate_until, 100.0);
        assert_eq!(data.decelerate_after, 0.0);
    }

    #[test]
    fn classify_cruise_deceleration() {
        let data = classified(&block(10.0, 10_000.0, 10_000.0, 500.0), 2_500.0);
        assert_eq!(data.maximum_rate, 100.0 * STEP_PER_MM);
        assert_eq!(data.accelerate_until, 100.0);
        // (10000 - 2500) / (2 * 500) = 7.5 mm of deceleration
        assert!((data.decelerate_after - 75.0).abs() < 1e-3);
    }

    #[test]
    fn classify_acceleration_cruise() {
        let data = classified(&block(10.0, 2_500.0, 10_000.0, 500.0), 10_000.0);
        assert_eq!(data.maximum_rate, 100.0 * STEP_PER_MM);
        assert!((data.accelerate_until - 25.0).abs() < 1e-3);
        assert_eq!(data.decelerate_after, 0.0);
    }

    #[test]
    fn classify_trapezoid() {
        // 10 mm of accel, 10 mm of cruise, 10 mm of decel.
        let data = classified(&block(30.0, 0.0, 10_000.0, 500.0), 0.0);
        assert_eq!(data.maximum_rate, 100.0 * STEP_PER_MM);
        assert!((data.accelerate_until - 200.0).abs() < 1e-2);
        assert!((data.decelerate_after - 100.0).abs() < 1e-2);
    }

    #[test]
    fn classify_triangle() {
        // Accel and decel ramps meet at 2.5 mm; nominal speed is never hit.
        let mut short = block(5.0, 0.0, 10_000.0, 500.0);
        short.steps = [300, 0, 0];
        short.step_event_count = 300;
        let data = classified(&short, 0.0);
        let spm = 300.0 / 5.0;
        assert!((data.decelerate_after - 2.5 * spm).abs() < 1e-2);
        assert!((data.accelerate_until - 2.5 * spm).abs() < 1e-2);
        // sqrt(2 * 500 * 2.5) = 50 mm/s peak, below the 100 mm/s nominal
        assert!((data.maximum_rate - 50.0 * spm).abs() < 1e-1);
    }

    #[test]
    fn classify_deceleration_only() {
        let data = classified(&block(10.0, 10_000.0, 40_000.0, 100.0), 0.0);
        assert_eq!(data.maximum_rate, 100.0 * STEP_PER_MM);
        assert_eq!(data.decelerate_after, 10.0 * STEP_PER_MM);
    }

    #[test]
    fn classify_acceleration_only() {
        let data = classified(&block(10.0, 0.0, 40_000.0, 100.0), 10_000.0);
        assert_eq!(data.maximum_rate, 100.0 * STEP_PER_MM);
        assert_eq!(data.accelerate_until, 0.0);
        assert_eq!(data.decelerate_after, 0.0);
    }

    #[test]
    fn cruise_slice_covers_one_dt_segment() {
        let b = block(10.0, 10_000.0, 10_000.0, 100.0);
        let mut data = classified(&b, 10_000.0);
        data.current_rate = data.maximum_rate;
        data.step_events_remaining = 100.0;

        let mut remaining = 100.0;
        let dt = time_slice(&mut data, &mut remaining);
        assert_eq!(dt, DT_SEGMENT);
        // 1000 steps/s for 1/120 s
        assert!((remaining - (100.0 - 1000.0 * DT_SEGMENT)).abs() < 1e-3);
    }

    #[test]
    fn acceleration_junction_averages_rates() {
        // Accel-cruise block about to hit the ramp end mid-slice.
        let b = block(10.0, 2_500.0, 10_000.0, 2_000.0);
        let mut data = classified(&b, 10_000.0);
        data.current_rate = 50.0 * STEP_PER_MM;
        let mut remaining = data.accelerate_until + 0.5;

        let entry = remaining;
        let dt = time_slice(&mut data, &mut remaining);
        // The junction snapped the rate to cruise and the slice was filled
        // out to a full DT_SEGMENT with cruise distance.
        assert_eq!(data.current_rate, data.maximum_rate);
        assert_eq!(dt, DT_SEGMENT);
        assert!(remaining < entry);
        assert!(remaining < data.accelerate_until);
    }

    struct StubPlanner {
        blocks: Vec<PlannerBlock>,
        tail: usize,
    }

    impl PlannerQueue for StubPlanner {
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

    /// Drains every segment the preparer can produce for the queued blocks,
    /// retiring them as the executor would.
    fn drain_all(
        prep: &mut SegmentPreparer<'_>,
        consumer: &mut crate::queue::SegmentConsumer<'_>,
        planner: &mut StubPlanner,
    ) -> Vec<Segment> {
        let mut out = Vec::new();
        loop {
            prep.prepare(planner);
            match consumer.peek() {
                Some(segment) => {
                    out.push(segment);
                    consumer.finish();
                    if segment.flags & SEGMENT_END_OF_BLOCK != 0 {
                        planner.discard_current_block();
                    }
                }
                None => return out,
            }
        }
    }

    #[test]
    fn segment_steps_sum_to_block_event_count() {
        let sys = SystemState::new();
        let mut queue = SegmentQueue::new();
        let (producer, mut consumer) = queue.split();
        let mut prep = SegmentPreparer::new(producer, &sys);
        let mut planner = StubPlanner {
            blocks: vec![
                block(30.0, 0.0, 10_000.0, 500.0), // trapezoid
                block(10.0, 0.0, 10_000.0, 500.0), // triangle, too short to cruise
            ],
            tail: 0,
        };

        let segments = drain_all(&mut prep, &mut consumer, &mut planner);
        let end_markers = segments
            .iter()
            .filter(|s| s.flags & SEGMENT_END_OF_BLOCK != 0)
            .count();
        assert_eq!(end_markers, 2);

        let split = segments
            .iter()
            .position(|s| s.flags & SEGMENT_END_OF_BLOCK != 0)
            .unwrap();
        let first: u32 = segments[..=split].iter().map(|s| s.n_step as u32).sum();
        let second: u32 = segments[split + 1..].iter().map(|s| s.n_step as u32).sum();
        assert_eq!(first, 300);
        assert_eq!(second, 100);

        // Every segment carries at least one step event.
        assert!(segments.iter().all(|s| s.n_step >= 1));
    }

    #[test]
    fn cruise_rate_is_constant_across_segments() {
        let sys = SystemState::new();
        let mut queue = SegmentQueue::new();
        let (producer, mut consumer) = queue.split();
        let mut prep = SegmentPreparer::new(producer, &sys);
        let mut planner = StubPlanner {
            blocks: vec![block(10.0, 10_000.0, 10_000.0, 100.0)],
            tail: 0,
        };
        // Give the block a cruise exit so no deceleration tail appears.
        planner.blocks.push(block(10.0, 10_000.0, 10_000.0, 100.0));

        let segments = drain_all(&mut prep, &mut consumer, &mut planner);
        // Only the first block is guaranteed cruise throughout; its trailing
        // neighbor ends the queue and decelerates.
        let split = segments
            .iter()
            .position(|s| s.flags & SEGMENT_END_OF_BLOCK != 0)
            .unwrap();
        let segments = &segments[..=split];
        let nominal = segments[0].dist_per_tick;
        for segment in segments {
            assert!(
                segment.dist_per_tick.abs_diff(nominal) <= 2,
                "cruise dist_per_tick drifted: {} vs {}",
                segment.dist_per_tick,
                nominal
            );
        }
    }

    #[test]
    fn partial_block_carries_residual_forward() {
        let sys = SystemState::new();
        let mut queue = SegmentQueue::new();
        let (producer, mut consumer) = queue.split();
        let mut prep = SegmentPreparer::new(producer, &sys);
        let mut planner = StubPlanner {
            blocks: vec![block(30.0, 10_000.0, 10_000.0, 500.0)],
            tail: 0,
        };

        // Fill the ring once, consume what was produced, and note how far
        // the preparer got.
        prep.prepare(&mut planner);
        let mut consumed: u32 = 0;
        while let Some(segment) = consumer.peek() {
            consumed += segment.n_step as u32;
            consumer.finish();
        }
        assert!(consumed > 0);

        let params = prep
            .fetch_partial_block_parameters(prep.prep_block_index())
            .unwrap();
        assert!(params.millimeters_remaining > 0.0);
        assert!(params.millimeters_remaining < 30.0);

        // The planner replans the remainder as a cruise at the same speed.
        let remaining_steps = params.millimeters_remaining * STEP_PER_MM;
        planner.blocks[0] = block(
            params.millimeters_remaining,
            10_000.0,
            10_000.0,
            500.0,
        );
        planner.blocks[0].steps = [remaining_steps as u32, 0, 0];
        planner.blocks[0].step_event_count = remaining_steps as u32;

        let segments = drain_all(&mut prep, &mut consumer, &mut planner);
        let replanned: u32 = segments.iter().map(|s| s.n_step as u32).sum();
        assert_eq!(consumed + replanned, 300);
    }

    #[test]
    fn prepare_is_a_no_op_while_queued() {
        let sys = SystemState::new();
        sys.set_state(CycleState::Queued);
        let mut queue = SegmentQueue::new();
        let (producer, consumer) = queue.split();
        let mut prep = SegmentPreparer::new(producer, &sys);
        let mut planner = StubPlanner {
            blocks: vec![block(10.0, 10_000.0, 10_000.0, 100.0)],
            tail: 0,
        };

        prep.prepare(&mut planner);
        assert!(consumer.is_empty());
    }

    #[test]
    fn prepare_with_empty_planner_produces_nothing() {
        let sys = SystemState::new();
        let mut queue = SegmentQueue::new();
        let (producer, consumer) = queue.split();
        let mut prep = SegmentPreparer::new(producer, &sys);
        let mut planner = StubPlanner {
            blocks: vec![],
            tail: 0,
        };

        prep.reset();
        prep.prepare(&mut planner);
        prep.prepare(&mut planner);
        assert!(consumer.is_empty());
    }
}
