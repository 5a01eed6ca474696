//! Step-pulse executor.
//!
//! Runs as a fixed-period timer interrupt at
//! [`ISR_TICKS_PER_SECOND`](crate::ISR_TICKS_PER_SECOND). Each
//! tick pops work from the segment ring and decides whether a multi-axis
//! step event is due, using two nested Bresenham schemes: a single
//! inverse-time counter accumulates distance per tick and fires an event
//! when it wraps, and per-axis counters distribute that event onto exactly
//! the axes whose step counts demand it. Integer counters keep the
//! remainders, so the pulse train stays phase-continuous across segment and
//! block boundaries without any floating point on the interrupt path.
//!
//! Direction bits are latched one tick before the step edge they belong to:
//! a step event only *flags* the output for the next tick, and the flagged
//! bits are driven at the top of that tick before any new segment work. The
//! short pulse-reset timer armed alongside the edge lowers the step lines
//! again after the configured pulse width, from its own interrupt
//! ([`StepExecutor::on_pulse_reset`]).
//!
//! Reentrancy: the original firmware guarded this interrupt with a `busy`
//! flag. Here the tick handler takes `&mut self`, so a second entry cannot
//! be expressed; the integration is expected to keep the handler
//! non-reentrant, as any single timer interrupt is.
//!
//! ## Wiring
//!
//! ```no_run
//! use core::cell::RefCell;
//! use critical_section::Mutex;
//! use stepper_core::{
//!     CycleController, CycleState, SegmentPreparer, SegmentQueue, Settings, StepExecutor,
//!     SystemState,
//! };
//! # use stepper_core::{PlannerBlock, PlannerQueue, StepperHal};
//! # struct NoPins;
//! # impl StepperHal for NoPins {
//! #     fn drive_step_dir(&mut self, _bits: u8) {}
//! #     fn reset_step(&mut self, _bits: u8) {}
//! #     fn set_stepper_disable(&mut self, _level: bool) {}
//! #     fn start_step_timer(&mut self) {}
//! #     fn stop_step_timer(&mut self) {}
//! #     fn arm_pulse_timer(&mut self, _width_us: u8) {}
//! #     fn delay_ms(&mut self, _ms: u8) {}
//! # }
//! # struct NoPlanner;
//! # impl PlannerQueue for NoPlanner {
//! #     fn current_block(&self) -> Option<&PlannerBlock> { None }
//! #     fn block_by_index(&self, _index: u8) -> Option<&PlannerBlock> { None }
//! #     fn next_block_index(&self, index: u8) -> u8 { index.wrapping_add(1) }
//! #     fn discard_current_block(&mut self) {}
//! # }
//! static SYS: SystemState = SystemState::new();
//!
//! let mut queue = SegmentQueue::new();
//! let (producer, consumer) = queue.split();
//! let executor = Mutex::new(RefCell::new(StepExecutor::new(
//!     consumer,
//!     &SYS,
//!     Settings::default(),
//! )));
//! let mut controller = CycleController::new(SegmentPreparer::new(producer, &SYS), &SYS);
//! let mut planner = NoPlanner;
//! let mut hal = NoPins;
//!
//! // Foreground loop: keep the segment buffer topped up, start queued work.
//! controller.prepare(&mut planner);
//! if SYS.state() == CycleState::Queued {
//!     critical_section::with(|cs| {
//!         let mut executor = executor.borrow_ref_mut(cs);
//!         controller.cycle_start(&mut planner, &mut executor, &mut hal);
//!     });
//! }
//!
//! // Step timer interrupt handler:
//! critical_section::with(|cs| {
//!     executor.borrow_ref_mut(cs).on_timer_tick(&mut planner, &mut hal);
//! });
//! ```

use crate::block::PlannerQueue;
use crate::cycle::{CycleState, SystemState, EXEC_ALARM, EXEC_CYCLE_STOP};
use crate::queue::{Segment, SegmentConsumer, SEGMENT_END_OF_BLOCK};
use crate::settings::{Settings, KEEP_STEPPERS_ENABLED};
use crate::{N_AXIS, STEP_MASK, X_DIRECTION_BIT};

/// Capability set for everything the executor touches outside its own
/// state: the stepping port, the stepper-disable line, the two timers, and
/// the idle-lock dwell. Implementations are plain register writes on
/// hardware and recording mocks in tests.
pub trait StepperHal {
    /// Latch the full step+direction image onto the stepping port.
    fn drive_step_dir(&mut self, bits: u8);
    /// Lower the step lines to their idle levels, leaving direction bits
    /// untouched. `bits` is already masked to the step lines.
    fn reset_step(&mut self, bits: u8);
    /// Raw level of the stepper-disable line. Polarity is applied by the
    /// core from [`Settings::invert_st_enable`].
    fn set_stepper_disable(&mut self, level: bool);
    /// Start the periodic step interrupt.
    fn start_step_timer(&mut self);
    /// Stop the periodic step interrupt. The one-shot pulse timer is left
    /// alone so an in-flight pulse can finish on its own.
    fn stop_step_timer(&mut self);
    /// Arm the one-shot pulse-reset timer for the given pulse width.
    fn arm_pulse_timer(&mut self, width_us: u8);
    /// Busy-wait for the idle-lock dwell.
    fn delay_ms(&mut self, ms: u8);
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum LoadFlag {
    Noop,
    Segment,
    Block,
}

/// Planner-block fields the interrupt needs every tick, copied out at block
/// load so no planner storage is referenced from the interrupt path.
#[derive(Debug, Copy, Clone, Default)]
struct ExecBlock {
    steps: [u32; N_AXIS],
    step_event_count: u32,
    direction_bits: u8,
}

/// Interrupt half of the core. Owns the consumer side of the segment ring
/// and all pulse-generation state.
pub struct StepExecutor<'a> {
    consumer: SegmentConsumer<'a>,
    sys: &'a SystemState,
    settings: Settings,

    /// Per-axis Bresenham counters, seeded to half the event count.
    counters: [i32; N_AXIS],
    /// Inverse-time accumulator. Wraps below zero when a step event is due.
    counter_dist: i32,
    /// Step events left in the current segment.
    step_count: u8,
    /// Trailing ticks left after the last step of the segment.
    phase_count: u8,

    /// Output image flagged for the next tick.
    out_bits: u8,
    /// Set when `out_bits` must be driven at the top of the next tick.
    execute_step: bool,
    /// Pulse width latched from settings at wake-up.
    step_pulse_width: u8,
    load_flag: LoadFlag,

    segment: Segment,
    /// Inverse-time reload of the segment's block, bound via its data index.
    dist_per_step: u32,
    block: ExecBlock,
}

impl<'a> StepExecutor<'a> {
    pub fn new(consumer: SegmentConsumer<'a>, sys: &'a SystemState, settings: Settings) -> Self {
        Self {
            consumer,
            sys,
            settings,
            counters: [0; N_AXIS],
            counter_dist: 0,
            step_count: 0,
            phase_count: 0,
            out_bits: 0,
            execute_step: false,
            step_pulse_width: 0,
            load_flag: LoadFlag::Block,
            segment: Segment::default(),
            dist_per_step: 0,
            block: ExecBlock::default(),
        }
    }

    /// One-time hardware bring-up: runs the wake/idle pair so the
    /// keep-enabled setting takes effect from power-on. Pin and timer mode
    /// configuration belongs to the `StepperHal` construction.
    pub fn init<H: StepperHal>(&mut self, hal: &mut H) {
        self.wake_up(hal);
        self.go_idle(hal);
    }

    /// Zeroes all execution state. Only valid with the step timer stopped.
    pub fn reset(&mut self) {
        self.counters = [0; N_AXIS];
        self.counter_dist = 0;
        self.step_count = 0;
        self.phase_count = 0;
        self.out_bits = 0;
        self.execute_step = false;
        self.load_flag = LoadFlag::Block;
        self.segment = Segment::default();
        self.dist_per_step = 0;
        self.block = ExecBlock::default();
    }

    /// Replace the settings copy. Only valid between cycles.
    pub fn set_settings(&mut self, settings: Settings) {
        self.settings = settings;
    }

    /// Energize the drivers and, when a cycle is running, start the step
    /// interrupt.
    pub fn wake_up<H: StepperHal>(&mut self, hal: &mut H) {
        // The disable line idles at the inverted level when enabled.
        hal.set_stepper_disable(self.settings.invert_st_enable);
        if self.sys.state() == CycleState::Cycle {
            self.out_bits = self.settings.step_invert_mask;
            self.step_pulse_width = self.settings.pulse_microseconds;
            self.execute_step = false;
            self.load_flag = LoadFlag::Block;
            hal.start_step_timer();
        }
    }

    /// Stop the step interrupt and, unless configured to stay locked, dwell
    /// and release the drivers. An active alarm releases them
    /// unconditionally.
    pub fn go_idle<H: StepperHal>(&mut self, hal: &mut H) {
        hal.stop_step_timer();
        let alarm = self.sys.exec_set(EXEC_ALARM);
        if self.settings.stepper_idle_lock_time != KEEP_STEPPERS_ENABLED || alarm {
            // Hold the axes until residual inertia has settled, then drop
            // the drivers.
            hal.delay_ms(self.settings.stepper_idle_lock_time);
            hal.set_stepper_disable(!self.settings.invert_st_enable);
        }
    }

    /// The step interrupt body. Must be called once per timer period.
    pub fn on_timer_tick<P: PlannerQueue, H: StepperHal>(&mut self, planner: &mut P, hal: &mut H) {
        // Drive the output flagged on the previous tick. Because a fresh
        // block only flags its direction bits here, direction is always
        // stable one full tick before the first step edge.
        if self.execute_step {
            self.execute_step = false;
            hal.drive_step_dir(self.out_bits);
            hal.arm_pulse_timer(self.step_pulse_width);
        }

        // Load the next segment if the previous one completed.
        if self.load_flag != LoadFlag::Noop {
            let segment = match self.consumer.peek() {
                Some(segment) => segment,
                None => {
                    // Buffer drained: the motion is finished (or the
                    // foreground fell behind, which sizing forbids). Wind
                    // down and tell the foreground.
                    self.go_idle(hal);
                    if self.sys.state() == CycleState::Cycle {
                        self.sys.set_state(CycleState::Idle);
                    }
                    self.sys.set_exec(EXEC_CYCLE_STOP);
                    #[cfg(feature = "defmt-logging")]
                    defmt::debug!("segment buffer drained, cycle stop");
                    return;
                }
            };

            // The tail slot is not retired here; it stays checked out until
            // the segment (phase ticks included) has executed.
            self.segment = segment;
            self.step_count = segment.n_step;
            self.phase_count = segment.n_phase_tick;
            self.dist_per_step = self.consumer.dist_per_step(segment.data_index);

            if self.load_flag == LoadFlag::Block {
                // Planner contract: the head block exists for as long as a
                // segment of it is queued.
                debug_assert!(planner.current_block().is_some());
                if let Some(block) = planner.current_block() {
                    self.block = ExecBlock {
                        steps: block.steps,
                        step_event_count: block.step_event_count,
                        direction_bits: block.direction_bits,
                    };
                }

                // Flag the new direction bits so they latch on the next
                // tick, ahead of the first step.
                self.out_bits = self.block.direction_bits ^ self.settings.step_invert_mask;
                self.execute_step = true;

                // Seed the Bresenham counters by the midpoint rule and the
                // inverse-time counter with one full step distance.
                let half = (self.block.step_event_count >> 1) as i32;
                self.counters = [half; N_AXIS];
                self.counter_dist = self.dist_per_step as i32;
            }

            self.load_flag = LoadFlag::Noop;
        }

        // Advance the inverse-time counter; a wrap below zero fires one
        // Bresenham step event.
        self.counter_dist -= self.segment.dist_per_tick as i32;
        if self.counter_dist < 0 && self.step_count > 0 {
            self.counter_dist += self.dist_per_step as i32;

            self.out_bits = self.block.direction_bits;
            self.execute_step = true;

            for axis in 0..N_AXIS {
                self.counters[axis] -= self.block.steps[axis] as i32;
                if self.counters[axis] < 0 {
                    self.out_bits |= 1 << axis;
                    self.counters[axis] += self.block.step_event_count as i32;
                    if self.out_bits & (1 << (X_DIRECTION_BIT + axis as u8)) != 0 {
                        self.sys.bump_position(axis, -1);
                    } else {
                        self.sys.bump_position(axis, 1);
                    }
                }
            }

            self.step_count -= 1;
            self.out_bits ^= self.settings.step_invert_mask;
        }

        // Segment complete once its steps and trailing phase ticks are out.
        if self.step_count == 0 {
            if self.phase_count == 0 {
                if self.segment.flags & SEGMENT_END_OF_BLOCK != 0 {
                    planner.discard_current_block();
                    self.load_flag = LoadFlag::Block;
                } else {
                    self.load_flag = LoadFlag::Segment;
                }
                self.consumer.finish();
            }
            self.phase_count = self.phase_count.wrapping_sub(1);
        }
    }

    /// The pulse-reset interrupt body: lowers the step lines after the
    /// configured pulse width. Always outruns the next step tick.
    pub fn on_pulse_reset<H: StepperHal>(&self, hal: &mut H) {
        hal.reset_step(self.settings.step_invert_mask & STEP_MASK);
    }
}
