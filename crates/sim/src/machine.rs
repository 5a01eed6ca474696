//! Simulated machine: core wiring plus a recording hardware seam.
//!
//! [`RecordedHal`] captures every call the executor makes through
//! [`StepperHal`] as a timestamped trace entry and reconstructs pulse
//! counts and axis positions from the step edges alone, independently of
//! the core's own position counters. [`SimMachine`] advances the whole
//! arrangement one interrupt tick at a time: foreground preparation, the
//! step interrupt, and the pulse-reset interrupt that falls between ticks.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use stepper_core::{
    CycleController, CycleState, PlannerBlock, SegmentPreparer, SegmentQueue, Settings,
    StepExecutor, StepperHal, SystemState, N_AXIS, STEP_MASK, X_DIRECTION_BIT,
};
use tracing::{debug, info};

use crate::planner::RingPlanner;

/// One recorded hardware access.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TraceEvent {
    /// Interrupt tick at which the access happened.
    pub tick: u64,
    pub kind: TraceKind,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum TraceKind {
    /// The full step+direction image was latched onto the port.
    StepDir { bits: u8 },
    /// Step lines were lowered by the pulse-reset interrupt.
    PulseReset { bits: u8 },
    /// Level written to the stepper-disable line.
    Disable { level: bool },
    StepTimerStart,
    StepTimerStop,
    PulseTimerArm { width_us: u8 },
    Dwell { ms: u8 },
}

/// Recording implementation of the hardware seam.
#[derive(Default)]
pub struct RecordedHal {
    /// Current interrupt tick, advanced by [`SimMachine::tick`].
    pub tick: u64,
    pub trace: Vec<TraceEvent>,
    /// Current state of the stepping port image.
    pub port: u8,
    pub timer_running: bool,
    pulse_pending: bool,
    /// Rising step edges seen per axis.
    pub pulses: [u64; N_AXIS],
    /// Axis positions reconstructed from the recorded edges.
    pub position: [i64; N_AXIS],
    /// Tick index of every step event, any axis.
    pub step_ticks: Vec<u64>,
}

impl RecordedHal {
    fn record(&mut self, kind: TraceKind) {
        self.trace.push(TraceEvent {
            tick: self.tick,
            kind,
        });
    }

    fn take_pulse_pending(&mut self) -> bool {
        core::mem::take(&mut self.pulse_pending)
    }

    /// Ticks of each step event on one axis.
    pub fn axis_step_ticks(&self, axis: usize) -> Vec<u64> {
        let step_bit = 1 << axis;
        let mut out = Vec::new();
        let mut high = false;
        for event in &self.trace {
            match event.kind {
                TraceKind::StepDir { bits } => {
                    let now = bits & step_bit != 0;
                    if now && !high {
                        out.push(event.tick);
                    }
                    high = now;
                }
                TraceKind::PulseReset { bits } => high = bits & step_bit != 0,
                _ => {}
            }
        }
        out
    }
}

impl StepperHal for RecordedHal {
    fn drive_step_dir(&mut self, bits: u8) {
        let rising = bits & !self.port & STEP_MASK;
        if rising != 0 {
            self.step_ticks.push(self.tick);
        }
        for axis in 0..N_AXIS {
            if rising & (1 << axis) != 0 {
                self.pulses[axis] += 1;
                if bits & (1 << (X_DIRECTION_BIT + axis as u8)) != 0 {
                    self.position[axis] -= 1;
                } else {
                    self.position[axis] += 1;
                }
            }
        }
        self.port = bits;
        self.record(TraceKind::StepDir { bits });
    }

    fn reset_step(&mut self, bits: u8) {
        self.port = (self.port & !STEP_MASK) | (bits & STEP_MASK);
        self.record(TraceKind::PulseReset { bits });
    }

    fn set_stepper_disable(&mut self, level: bool) {
        self.record(TraceKind::Disable { level });
    }

    fn start_step_timer(&mut self) {
        self.timer_running = true;
        self.record(TraceKind::StepTimerStart);
    }

    fn stop_step_timer(&mut self) {
        self.timer_running = false;
        self.record(TraceKind::StepTimerStop);
    }

    fn arm_pulse_timer(&mut self, width_us: u8) {
        self.pulse_pending = true;
        self.record(TraceKind::PulseTimerArm { width_us });
    }

    fn delay_ms(&mut self, ms: u8) {
        self.record(TraceKind::Dwell { ms });
    }
}

/// The full core wired to a recording seam and a ring planner.
pub struct SimMachine<'a> {
    pub controller: CycleController<'a>,
    pub executor: StepExecutor<'a>,
    pub planner: RingPlanner,
    pub hal: RecordedHal,
    sys: &'a SystemState,
}

impl<'a> SimMachine<'a> {
    pub fn new(sys: &'a SystemState, queue: &'a mut SegmentQueue, settings: Settings) -> Self {
        let (producer, consumer) = queue.split();
        let executor = StepExecutor::new(consumer, sys, settings);
        let controller = CycleController::new(SegmentPreparer::new(producer, sys), sys);
        Self {
            controller,
            executor,
            planner: RingPlanner::new(),
            hal: RecordedHal::default(),
            sys,
        }
    }

    pub fn sys(&self) -> &SystemState {
        self.sys
    }

    /// Queues a planned block, the way the planner hands finished plans to
    /// the core.
    pub fn queue_block(&mut self, block: PlannerBlock) -> Result<()> {
        if self.planner.push(block).is_err() {
            bail!("planner buffer full");
        }
        Ok(())
    }

    /// Marks the queued plan ready and starts the cycle.
    pub fn start_cycle(&mut self) {
        info!(blocks = self.planner.len(), "starting cycle");
        self.sys.set_state(CycleState::Queued);
        self.controller
            .cycle_start(&mut self.planner, &mut self.executor, &mut self.hal);
    }

    /// One step-interrupt period: the timer interrupt, then the pulse-reset
    /// interrupt that fires between ticks. No-op while the step timer is
    /// stopped.
    pub fn tick(&mut self) {
        if !self.hal.timer_running {
            return;
        }
        self.executor.on_timer_tick(&mut self.planner, &mut self.hal);
        if self.hal.take_pulse_pending() {
            self.executor.on_pulse_reset(&mut self.hal);
        }
        self.hal.tick += 1;
    }

    /// Runs the foreground loop and the step interrupt side by side until
    /// the motion winds down or `max_ticks` elapse. Returns the number of
    /// ticks executed.
    pub fn run(&mut self, max_ticks: u64) -> u64 {
        let mut ticks = 0;
        while ticks < max_ticks {
            self.controller.prepare(&mut self.planner);
            if !self.hal.timer_running {
                break;
            }
            self.tick();
            ticks += 1;
        }
        debug!(
            ticks,
            pulses = ?self.hal.pulses,
            state = ?self.sys.state(),
            "run finished"
        );
        ticks
    }
}
