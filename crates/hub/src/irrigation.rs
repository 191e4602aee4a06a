//! Interval irrigation: start the pump every `water_interval` and keep it
//! running for `water_duration`.
//!
//! ```text
//!            first tick / interval elapsed
//!   Off ─────────────────────────────────────▶ On (timer unset)
//!    ▲                                            │ next tick
//!    │      run time ≥ duration                   ▼
//!    └──────────────────────────────────── On (timer running)
//! ```
//!
//! The interval is measured start-to-start from `last_watering_start`; the
//! run duration from `pump_energized_since`, which is armed on the first tick
//! the pump is seen running. A pump switched on manually is therefore also
//! switched off after the stage's watering duration.

use crate::actuator::{Actuator, Transition};
use crate::profile::GrowthStage;

/// Process-lifetime timers. Zero means "not set". Never persisted, so every
/// restart begins with a bootstrap watering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerTimers {
    pub last_watering_start: i64,
    pub pump_energized_since: i64,
    pub first_tick_consumed: bool,
}

/// Advance the irrigation schedule by one tick. Returns the transitions that
/// actually changed the pump: at most one on and one off.
pub fn tick(
    timers: &mut SchedulerTimers,
    pump: &mut Actuator,
    stage: &GrowthStage,
    now: i64,
) -> Vec<Transition> {
    let mut transitions = Vec::new();

    // A pump stopped outside the scheduler leaves a stale run timer; clear it
    // before deciding to start again so a fresh run is not cut short.
    if !pump.is_on() && timers.pump_energized_since != 0 {
        tracing::debug!("pump off with run timer set, resetting");
        timers.pump_energized_since = 0;
    }

    if !timers.first_tick_consumed {
        tracing::info!("first scheduled tick since start, bootstrap watering");
        transitions.extend(pump.set(true, now));
        timers.last_watering_start = now;
        timers.first_tick_consumed = true;
    } else if !pump.is_on()
        && timers.last_watering_start != 0
        && now - timers.last_watering_start >= stage.water_interval_secs()
    {
        tracing::info!(
            since_last = now - timers.last_watering_start,
            interval_sec = stage.water_interval_secs(),
            "watering interval elapsed, starting pump"
        );
        transitions.extend(pump.set(true, now));
        timers.last_watering_start = now;
    }

    if pump.is_on() {
        if timers.pump_energized_since == 0 {
            timers.pump_energized_since = now;
        } else if now - timers.pump_energized_since >= stage.water_duration_secs() {
            tracing::info!(
                ran_sec = now - timers.pump_energized_since,
                "watering duration complete, stopping pump"
            );
            transitions.extend(pump.set(false, now));
            timers.pump_energized_since = 0;
        }
    }

    transitions
}

/// Seconds until the pump is next expected to change state, for status
/// reporting. Zero when unknown or overdue.
pub fn seconds_until_next_change(
    timers: &SchedulerTimers,
    pump_on: bool,
    stage: &GrowthStage,
    now: i64,
) -> i64 {
    let remaining = if pump_on {
        if timers.pump_energized_since == 0 {
            return 0;
        }
        stage.water_duration_secs() - (now - timers.pump_energized_since)
    } else {
        if timers.last_watering_start == 0 {
            return 0;
        }
        stage.water_interval_secs() - (now - timers.last_watering_start)
    };
    remaining.max(0)
}

// ===========================================================================
// Tests
// ===========================================================================
