//! Daily light window with midnight wrap-around.
//!
//! The window opens at `light_start_hour` local time and lasts
//! `light_hours_per_day` hours. `end = (start + hours) % 24`; when
//! `start >= end` the window wraps past midnight. A 24-hour window is always
//! lit. Stages with zero light hours fail profile validation and never reach
//! the scheduler; `window_position` still treats them as always dark.

use crate::actuator::{Actuator, Transition};
use crate::cycle::SECS_PER_DAY;
use crate::profile::GrowthStage;

const SECS_PER_HOUR: i64 = 60 * 60;

/// Where the current instant falls relative to the daily window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowPosition {
    pub lit: bool,
    /// Seconds until the lights should next flip. `None` for windows that
    /// never change (0 or 24 hours).
    pub seconds_to_transition: Option<u32>,
}

pub fn end_hour(stage: &GrowthStage) -> u8 {
    ((u32::from(stage.light_start_hour) + u32::from(stage.light_hours_per_day)) % 24) as u8
}

/// Local second of the day for `now`, shifted by `utc_offset_secs`.
pub fn second_of_day(now: i64, utc_offset_secs: i32) -> u32 {
    (now + i64::from(utc_offset_secs)).rem_euclid(SECS_PER_DAY) as u32
}

/// Single modular-arithmetic helper behind both the switching decision and
/// the status countdown.
pub fn window_position(second_of_day: u32, start_hour: u8, hours: u8) -> WindowPosition {
    if hours == 0 {
        return WindowPosition {
            lit: false,
            seconds_to_transition: None,
        };
    }
    if hours >= 24 {
        return WindowPosition {
            lit: true,
            seconds_to_transition: None,
        };
    }

    let start = i64::from(start_hour) * SECS_PER_HOUR;
    let end = ((i64::from(start_hour) + i64::from(hours)) % 24) * SECS_PER_HOUR;
    let sod = i64::from(second_of_day);

    let lit = if start < end {
        sod >= start && sod < end
    } else {
        sod >= start || sod < end
    };
    let target = if lit { end } else { start };
    let remaining = (target - sod).rem_euclid(SECS_PER_DAY);

    WindowPosition {
        lit,
        seconds_to_transition: Some(remaining as u32),
    }
}

/// Switch the lights to match the window. Returns the transition if one
/// happened.
pub fn tick(
    lights: &mut Actuator,
    stage: &GrowthStage,
    now: i64,
    utc_offset_secs: i32,
) -> Option<Transition> {
    let pos = window_position(
        second_of_day(now, utc_offset_secs),
        stage.light_start_hour,
        stage.light_hours_per_day,
    );
    let transition = lights.set(pos.lit, now)?;
    tracing::info!(
        on = transition.on,
        start_hour = stage.light_start_hour,
        end_hour = end_hour(stage),
        "light window changed"
    );
    Some(transition)
}

/// Seconds until the lights next change, given what they are now. When the
/// lights disagree with the window (e.g. a manual override), the next tick
/// corrects them, so the answer is zero.
pub fn seconds_until_next_transition(
    now: i64,
    utc_offset_secs: i32,
    stage: &GrowthStage,
    current: bool,
) -> Option<u32> {
    let pos = window_position(
        second_of_day(now, utc_offset_secs),
        stage.light_start_hour,
        stage.light_hours_per_day,
    );
    if pos.lit != current {
        return Some(0);
    }
    pos.seconds_to_transition
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::ActuatorKind;
    use proptest::prelude::*;

    fn at(hour: u32, minute: u32) -> u32 {
        hour * 3600 + minute * 60
    }

    fn stage(start: u8, hours: u8) -> GrowthStage {
        GrowthStage {
            light_start_hour: start,
            light_hours_per_day: hours,
            ..GrowthStage::DEFAULT_GROWING
        }
    }

    #[test]
    fn wrapping_window_twenty_two_plus_ten() {
        assert_eq!(end_hour(&stage(22, 10)), 8);
        assert!(window_position(at(23, 0), 22, 10).lit);
        assert!(!window_position(at(9, 0), 22, 10).lit);
        assert!(window_position(at(7, 0), 22, 10).lit);
        assert!(window_position(at(22, 0), 22, 10).lit);
        assert!(!window_position(at(8, 0), 22, 10).lit);
        assert!(!window_position(at(21, 59), 22, 10).lit);
    }

    #[test]
    fn plain_window() {
        // 06:00 - 18:00
        assert!(!window_position(at(5, 59), 6, 12).lit);
        assert!(window_position(at(6, 0), 6, 12).lit);
        assert!(window_position(at(17, 59), 6, 12).lit);
        assert!(!window_position(at(18, 0), 6, 12).lit);
    }

    #[test]
    fn countdown_across_midnight() {
        // Lit at 23:30, window ends at 08:00.
        let pos = window_position(at(23, 30), 22, 10);
        assert_eq!(pos.seconds_to_transition, Some(8 * 3600 + 30 * 60));
        // Dark at 09:00, next start 22:00.
        let pos = window_position(at(9, 0), 22, 10);
        assert_eq!(pos.seconds_to_transition, Some(13 * 3600));
        // Dark at 23:00 for a 06:00 start.
        let pos = window_position(at(23, 0), 6, 12);
        assert_eq!(pos.seconds_to_transition, Some(7 * 3600));
    }

    #[test]
    fn degenerate_windows_never_change() {
        let dark = window_position(at(12, 0), 6, 0);
        assert!(!dark.lit);
        assert_eq!(dark.seconds_to_transition, None);

        let always = window_position(at(3, 0), 6, 24);
        assert!(always.lit);
        assert_eq!(always.seconds_to_transition, None);
    }

    #[test]
    fn second_of_day_applies_offset() {
        // 2023-11-14T22:13:20Z
        let now = 1_700_000_000;
        assert_eq!(second_of_day(now, 0), 22 * 3600 + 13 * 60 + 20);
        assert_eq!(second_of_day(now, 2 * 3600), 13 * 60 + 20);
        assert_eq!(second_of_day(now, -23 * 3600), 23 * 3600 + 13 * 60 + 20);
    }

    #[test]
    fn tick_emits_once_per_change() {
        let s = stage(6, 12);
        let mut lights = Actuator::new(ActuatorKind::Lights);
        let midnight = 1_699_920_000; // 2023-11-14T00:00:00Z

        assert!(tick(&mut lights, &s, midnight + 3600, 0).is_none());
        let on = tick(&mut lights, &s, midnight + 6 * 3600, 0).unwrap();
        assert!(on.on);
        assert!(tick(&mut lights, &s, midnight + 6 * 3600 + 1, 0).is_none());
        let off = tick(&mut lights, &s, midnight + 18 * 3600, 0).unwrap();
        assert!(!off.on);
        assert!(tick(&mut lights, &s, midnight + 20 * 3600, 0).is_none());
    }

    #[test]
    fn status_countdown_reports_pending_correction() {
        let s = stage(6, 12);
        let midnight = 1_699_920_000;
        // Dark window, lights forced on: they go off on the next tick.
        assert_eq!(
            seconds_until_next_transition(midnight + 3600, 0, &s, true),
            Some(0)
        );
        assert_eq!(
            seconds_until_next_transition(midnight + 3600, 0, &s, false),
            Some(5 * 3600)
        );
    }

    proptest! {
        #[test]
        fn countdown_lands_on_a_flip(sod in 0u32..86_400, start in 0u8..24, hours in 1u8..24) {
            let pos = window_position(sod, start, hours);
            let secs = pos.seconds_to_transition.unwrap();
            prop_assert!(secs > 0 && secs <= 86_400 - 3600);
            let after = window_position((sod + secs) % 86_400, start, hours);
            prop_assert_ne!(after.lit, pos.lit);
            if secs > 1 {
                let before = window_position((sod + secs - 1) % 86_400, start, hours);
                prop_assert_eq!(before.lit, pos.lit);
            }
        }
    }
}
