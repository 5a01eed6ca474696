//! Runs a short three-axis trapezoid through the simulated machine and
//! dumps the recorded pin-edge trace as JSON for offline inspection.

use anyhow::Result;
use sim::SimMachine;
use stepper_core::{PlannerBlock, SegmentQueue, Settings, SystemState, ISR_TICKS_PER_SECOND};
use tracing::info;

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let sys = SystemState::new();
    let mut queue = SegmentQueue::new();
    let mut machine = SimMachine::new(&sys, &mut queue, Settings::default());

    machine.queue_block(PlannerBlock {
        steps: [300, 200, 100],
        step_event_count: 300,
        direction_bits: 0,
        millimeters: 30.0,
        entry_speed_sqr: 0.0,
        nominal_speed_sqr: 10_000.0,
        acceleration: 500.0,
    })?;

    machine.start_cycle();
    let ticks = machine.run(10 * ISR_TICKS_PER_SECOND as u64);

    info!(
        ticks,
        seconds = ticks as f64 / ISR_TICKS_PER_SECOND as f64,
        pulses = ?machine.hal.pulses,
        position = ?sys.position(),
        "motion complete"
    );

    let path = std::env::temp_dir().join("stepper_sim_trace.json");
    std::fs::write(&path, serde_json::to_string_pretty(&machine.hal.trace)?)?;
    info!(path = %path.display(), events = machine.hal.trace.len(), "trace written");

    Ok(())
}
