//! Cycle state machine and shared system state.
//!
//! [`SystemState`] is the one piece of state both execution contexts touch:
//! the machine state byte, the execution flags the interrupt raises for the
//! foreground, the planner auto-start flag, and the position counters the
//! step interrupt owns. Every word is individually atomic, so foreground
//! readers snapshot without masking interrupts.
//!
//! [`CycleController`] owns the foreground side of cycle control: it starts
//! cycles, requests feed holds, and fronts the segment preparer for the
//! main loop.

use core::sync::atomic::{AtomicBool, AtomicI32, AtomicU8, Ordering};

use crate::block::PlannerQueue;
use crate::executor::{StepExecutor, StepperHal};
use crate::prep::{PartialBlockParameters, SegmentPreparer};
use crate::N_AXIS;

/// Raised by the executor when the segment buffer drains and the cycle ends.
pub const EXEC_CYCLE_STOP: u8 = 1 << 0;
/// Raised externally on a critical fault; makes `go_idle` drop the drivers
/// unconditionally.
pub const EXEC_ALARM: u8 = 1 << 1;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-logging", derive(defmt::Format))]
#[repr(u8)]
pub enum CycleState {
    Idle = 0,
    Queued = 1,
    Cycle = 2,
    Hold = 3,
    Alarm = 4,
}

impl CycleState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => CycleState::Idle,
            1 => CycleState::Queued,
            2 => CycleState::Cycle,
            3 => CycleState::Hold,
            _ => CycleState::Alarm,
        }
    }
}

/// Process-wide state shared between the foreground and the step interrupt.
pub struct SystemState {
    state: AtomicU8,
    exec: AtomicU8,
    auto_start: AtomicBool,
    position: [AtomicI32; N_AXIS],
}

impl SystemState {
    pub const fn new() -> Self {
        const ZERO: AtomicI32 = AtomicI32::new(0);
        Self {
            state: AtomicU8::new(CycleState::Idle as u8),
            exec: AtomicU8::new(0),
            auto_start: AtomicBool::new(true),
            position: [ZERO; N_AXIS],
        }
    }

    pub fn state(&self) -> CycleState {
        CycleState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: CycleState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Raise execution flags for the foreground to act on.
    pub fn set_exec(&self, flags: u8) {
        self.exec.fetch_or(flags, Ordering::Release);
    }

    pub fn clear_exec(&self, flags: u8) {
        self.exec.fetch_and(!flags, Ordering::Release);
    }

    pub fn exec_set(&self, flags: u8) -> bool {
        self.exec.load(Ordering::Acquire) & flags != 0
    }

    /// Atomically observe-and-clear the given flags. Returns whether any of
    /// them was set.
    pub fn take_exec(&self, flags: u8) -> bool {
        self.exec.fetch_and(!flags, Ordering::AcqRel) & flags != 0
    }

    pub fn auto_start(&self) -> bool {
        self.auto_start.load(Ordering::Acquire)
    }

    pub fn set_auto_start(&self, on: bool) {
        self.auto_start.store(on, Ordering::Release);
    }

    /// Snapshot of the machine position in steps.
    pub fn position(&self) -> [i32; N_AXIS] {
        let mut out = [0; N_AXIS];
        for (axis, counter) in self.position.iter().enumerate() {
            out[axis] = counter.load(Ordering::Relaxed);
        }
        out
    }

    pub fn set_position(&self, position: [i32; N_AXIS]) {
        for (axis, counter) in self.position.iter().enumerate() {
            counter.store(position[axis], Ordering::Relaxed);
        }
    }

    /// Updated exclusively from the step interrupt, one count per emitted
    /// pulse.
    pub(crate) fn bump_position(&self, axis: usize, delta: i32) {
        self.position[axis].fetch_add(delta, Ordering::Relaxed);
    }
}

impl Default for SystemState {
    fn default() -> Self {
        Self::new()
    }
}

/// Foreground cycle control over the preparer/executor pair.
pub struct CycleController<'a> {
    prep: SegmentPreparer<'a>,
    sys: &'a SystemState,
}

impl<'a> CycleController<'a> {
    pub fn new(prep: SegmentPreparer<'a>, sys: &'a SystemState) -> Self {
        Self { prep, sys }
    }

    /// Starts a queued cycle: primes the segment buffer, then wakes the
    /// executor. No-op unless the state machine is in `Queued`.
    pub fn cycle_start<P: PlannerQueue, H: StepperHal>(
        &mut self,
        planner: &mut P,
        executor: &mut StepExecutor<'_>,
        hal: &mut H,
    ) {
        if self.sys.state() == CycleState::Queued {
            self.sys.set_state(CycleState::Cycle);
            #[cfg(feature = "defmt-logging")]
            defmt::debug!("cycle start");
            self.prep.prepare(planner);
            executor.wake_up(hal);
        }
    }

    /// Requests a decelerating stop. The planner is expected to replan the
    /// in-flight block through [`Self::fetch_partial_block_parameters`];
    /// auto-start is disabled so it does not immediately relaunch.
    pub fn feed_hold(&mut self) {
        if self.sys.state() == CycleState::Cycle {
            self.sys.set_state(CycleState::Hold);
            self.sys.set_auto_start(false);
            #[cfg(feature = "defmt-logging")]
            defmt::debug!("feed hold");
        }
    }

    /// Finalizes a feed hold once the buffer has drained: the machine
    /// returns to `Idle` and the residual of the in-flight block is
    /// abandoned. Resuming takes a fresh plan and a new cycle start.
    pub fn cycle_reinitialize(&mut self) {
        self.sys.set_state(CycleState::Idle);
    }

    /// Foreground tick; refills the segment buffer whenever there is time.
    pub fn prepare<P: PlannerQueue>(&mut self, planner: &mut P) {
        self.prep.prepare(planner);
    }

    /// Planner ring index of the block currently being prepped.
    pub fn prep_block_index(&self) -> u8 {
        self.prep.prep_block_index()
    }

    /// Hands the residual of the in-flight block back to the planner for a
    /// mid-block replan. See [`SegmentPreparer::fetch_partial_block_parameters`].
    pub fn fetch_partial_block_parameters(
        &mut self,
        block_index: u8,
    ) -> Option<PartialBlockParameters> {
        self.prep.fetch_partial_block_parameters(block_index)
    }

    /// Immediate stop on a critical fault: flags the alarm, drops the
    /// drivers and halts the step timer.
    pub fn alarm<H: StepperHal>(&mut self, executor: &mut StepExecutor<'_>, hal: &mut H) {
        self.sys.set_exec(EXEC_ALARM);
        self.sys.set_state(CycleState::Alarm);
        executor.go_idle(hal);
        #[cfg(feature = "defmt-logging")]
        defmt::warn!("alarm: steppers dropped");
    }

    /// Zeroes all core state and empties the segment ring. Only valid with
    /// the step interrupt stopped.
    pub fn reset(&mut self, executor: &mut StepExecutor<'_>) {
        self.prep.reset();
        executor.reset();
    }
}
