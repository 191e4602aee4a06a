//! Growth cycle: which stage a run is in, derived purely from whole days
//! elapsed since its start.
//!
//! ```text
//! Inactive ──start──▶ Seedling ──E ≥ s──▶ Growing ──E ≥ s+g──▶ Harvesting
//!     ▲                                                         (terminal)
//!     └──────────────────────────── stop ───────────────────────────┘
//! ```
//!
//! Harvesting never ends on its own; the run continues until stopped.

use serde::{Deserialize, Serialize};

use crate::profile::{GrowthProfile, GrowthStage, ProfileStore, StageKind};

pub const SECS_PER_DAY: i64 = 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GrowthCycle {
    pub profile_id: String,
    /// Unix epoch seconds.
    pub start_timestamp: i64,
    pub active: bool,
}

/// Where the cycle stands at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Inactive,
    /// Active, but the referenced profile no longer exists.
    Unavailable,
    Stage(StageKind),
}

impl CycleState {
    pub fn label(&self) -> String {
        match self {
            Self::Inactive => "None".to_string(),
            Self::Unavailable => "Invalid".to_string(),
            Self::Stage(kind) => kind.to_string(),
        }
    }
}

/// Settings of the stage the cycle is currently in.
#[derive(Debug, Clone, Copy)]
pub struct ActiveStage<'a> {
    pub kind: StageKind,
    pub settings: &'a GrowthStage,
    pub profile: &'a GrowthProfile,
}

impl GrowthCycle {
    pub fn started(profile_id: impl Into<String>, start_timestamp: i64) -> Self {
        Self {
            profile_id: profile_id.into(),
            start_timestamp,
            active: true,
        }
    }

    pub fn stopped(&self) -> Self {
        Self {
            active: false,
            ..self.clone()
        }
    }

    /// Deactivate a cycle whose profile is missing from `store`. Returns
    /// `true` when a correction was made and must be committed.
    pub fn reconcile(&mut self, store: &ProfileStore) -> bool {
        if self.active && !store.contains(&self.profile_id) {
            self.active = false;
            return true;
        }
        false
    }

    pub fn state(&self, store: &ProfileStore, now: i64) -> CycleState {
        match self.current_stage(store, now) {
            Some(stage) => CycleState::Stage(stage.kind),
            None if !self.active => CycleState::Inactive,
            None => CycleState::Unavailable,
        }
    }

    /// `None` when the cycle is inactive or its profile is gone.
    pub fn current_stage<'a>(&self, store: &'a ProfileStore, now: i64) -> Option<ActiveStage<'a>> {
        if !self.active {
            return None;
        }
        let profile = store.find(&self.profile_id)?;
        let kind = stage_at(profile, elapsed_days(self.start_timestamp, now));
        Some(ActiveStage {
            kind,
            settings: profile.stage(kind),
            profile,
        })
    }
}

/// Whole days from `start` to `now`, rounding toward negative infinity.
pub fn elapsed_days(start: i64, now: i64) -> i64 {
    now.saturating_sub(start).div_euclid(SECS_PER_DAY)
}

pub fn stage_at(profile: &GrowthProfile, elapsed_days: i64) -> StageKind {
    let seedling_end = i64::from(profile.seedling.duration_days);
    let growing_end = seedling_end + i64::from(profile.growing.duration_days);
    if elapsed_days < seedling_end {
        StageKind::Seedling
    } else if elapsed_days < growing_end {
        StageKind::Growing
    } else {
        StageKind::Harvesting
    }
}

// ---------------------------------------------------------------------------
// Progress projection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StageProgress {
    pub seedling: u8,
    pub growing: u8,
    pub harvesting: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleProgress {
    pub elapsed_days: i64,
    pub total_duration: i64,
    pub remaining_days: i64,
    pub progress: StageProgress,
}

pub fn progress(profile: &GrowthProfile, start: i64, now: i64) -> CycleProgress {
    let elapsed = elapsed_days(start, now).max(0);
    let total = profile.total_duration_days();

    let mut offset = 0_i64;
    let mut pct = [0_u8; 3];
    for (slot, kind) in pct.iter_mut().zip(StageKind::ALL) {
        let duration = i64::from(profile.stage(kind).duration_days);
        *slot = if elapsed >= offset + duration {
            100
        } else if elapsed < offset {
            0
        } else {
            ((elapsed - offset) * 100 / duration) as u8
        };
        offset += duration;
    }

    CycleProgress {
        elapsed_days: elapsed,
        total_duration: total,
        remaining_days: (total - elapsed).max(0),
        progress: StageProgress {
            seedling: pct[0],
            growing: pct[1],
            harvesting: pct[2],
        },
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{default_catalog, MAX_STAGE_DAYS};
    use proptest::prelude::*;

    const T: i64 = 1_700_000_000;

    fn store() -> ProfileStore {
        ProfileStore::from_catalog(default_catalog(), 10)
    }

    fn day(n: i64) -> i64 {
        T + n * SECS_PER_DAY
    }

    #[test]
    fn stage_boundaries_follow_whole_days() {
        // tomatoes: 14 / 35 / 21
        let store = store();
        let cycle = GrowthCycle::started("tomatoes", T);
        let at = |now| cycle.state(&store, now);

        assert_eq!(at(T), CycleState::Stage(StageKind::Seedling));
        assert_eq!(at(day(13)), CycleState::Stage(StageKind::Seedling));
        assert_eq!(at(day(14) - 1), CycleState::Stage(StageKind::Seedling));
        assert_eq!(at(day(14)), CycleState::Stage(StageKind::Growing));
        assert_eq!(at(day(48)), CycleState::Stage(StageKind::Growing));
        assert_eq!(at(day(49) - 1), CycleState::Stage(StageKind::Growing));
        assert_eq!(at(day(49)), CycleState::Stage(StageKind::Harvesting));
        assert_eq!(at(day(50)), CycleState::Stage(StageKind::Harvesting));
        assert_eq!(at(day(10_000)), CycleState::Stage(StageKind::Harvesting));
    }

    #[test]
    fn start_in_future_counts_as_seedling() {
        let store = store();
        let cycle = GrowthCycle::started("tomatoes", day(3));
        assert_eq!(cycle.state(&store, T), CycleState::Stage(StageKind::Seedling));
    }

    #[test]
    fn current_stage_returns_stage_settings() {
        let store = store();
        let cycle = GrowthCycle::started("peppers", T);
        let stage = cycle.current_stage(&store, day(20)).unwrap();
        assert_eq!(stage.kind, StageKind::Growing);
        assert_eq!(stage.settings.water_interval_minutes, 45);
        assert_eq!(stage.profile.id, "peppers");
    }

    #[test]
    fn inactive_cycle_has_no_stage() {
        let store = store();
        let cycle = GrowthCycle::started("tomatoes", T).stopped();
        assert!(cycle.current_stage(&store, day(1)).is_none());
        assert_eq!(cycle.state(&store, day(1)), CycleState::Inactive);
        assert_eq!(cycle.state(&store, day(1)).label(), "None");
    }

    #[test]
    fn dangling_profile_is_unavailable() {
        let store = store();
        let cycle = GrowthCycle::started("orchids", T);
        assert!(cycle.current_stage(&store, day(1)).is_none());
        assert_eq!(cycle.state(&store, day(1)), CycleState::Unavailable);
    }

    #[test]
    fn reconcile_disables_dangling_cycle() {
        let store = store();
        let mut cycle = GrowthCycle::started("orchids", T);
        assert!(cycle.reconcile(&store));
        assert!(!cycle.active);
        assert_eq!(cycle.profile_id, "orchids");
        // Already corrected: nothing further to commit.
        assert!(!cycle.reconcile(&store));
    }

    #[test]
    fn reconcile_keeps_valid_or_inactive_cycles() {
        let store = store();
        let mut valid = GrowthCycle::started("lettuce", T);
        assert!(!valid.reconcile(&store));
        assert!(valid.active);

        let mut idle = GrowthCycle {
            profile_id: "orchids".into(),
            start_timestamp: T,
            active: false,
        };
        assert!(!idle.reconcile(&store));
    }

    #[test]
    fn elapsed_days_floors() {
        assert_eq!(elapsed_days(T, T), 0);
        assert_eq!(elapsed_days(T, T + SECS_PER_DAY - 1), 0);
        assert_eq!(elapsed_days(T, T + SECS_PER_DAY), 1);
        assert_eq!(elapsed_days(T, T - 1), -1);
    }

    #[test]
    fn progress_through_stages() {
        let store = store();
        let tomatoes = store.find("tomatoes").unwrap();

        let p = progress(tomatoes, T, day(7));
        assert_eq!(p.elapsed_days, 7);
        assert_eq!(p.total_duration, 70);
        assert_eq!(p.remaining_days, 63);
        assert_eq!(
            p.progress,
            StageProgress {
                seedling: 50,
                growing: 0,
                harvesting: 0
            }
        );

        let p = progress(tomatoes, T, day(21));
        assert_eq!(p.progress.seedling, 100);
        assert_eq!(p.progress.growing, 20);

        let p = progress(tomatoes, T, day(500));
        assert_eq!(p.remaining_days, 0);
        assert_eq!(
            p.progress,
            StageProgress {
                seedling: 100,
                growing: 100,
                harvesting: 100
            }
        );
    }

    #[test]
    fn progress_handles_zero_length_stage() {
        let mut profile = default_catalog().remove(0);
        profile.seedling.duration_days = 0;
        let p = progress(&profile, T, T);
        assert_eq!(p.progress.seedling, 100);
        assert_eq!(p.progress.growing, 0);
    }

    fn rank(state: CycleState) -> usize {
        match state {
            CycleState::Stage(kind) => StageKind::ALL.iter().position(|&k| k == kind).unwrap(),
            other => panic!("expected a stage, got {other:?}"),
        }
    }

    proptest! {
        #[test]
        fn stage_never_goes_backwards(
            start in 1_000_000_000_i64..2_000_000_000,
            a in 0_i64..200 * SECS_PER_DAY,
            b in 0_i64..200 * SECS_PER_DAY,
        ) {
            let store = store();
            let cycle = GrowthCycle::started("tomatoes", start);
            let (early, late) = (a.min(b), a.max(b));
            prop_assert!(
                rank(cycle.state(&store, start + early)) <= rank(cycle.state(&store, start + late))
            );
        }

        #[test]
        fn harvesting_once_seedling_and_growing_elapsed(
            start in 1_000_000_000_i64..2_000_000_000,
            offset in 49 * SECS_PER_DAY..20_000 * SECS_PER_DAY,
        ) {
            // tomatoes: 14 + 35 days before harvesting
            let store = store();
            let cycle = GrowthCycle::started("tomatoes", start);
            prop_assert_eq!(
                cycle.state(&store, start + offset),
                CycleState::Stage(StageKind::Harvesting)
            );
        }

        #[test]
        fn stage_follows_cumulative_durations(
            seedling in 0_u32..=MAX_STAGE_DAYS,
            growing in 0_u32..=MAX_STAGE_DAYS,
            elapsed in 0_i64..3 * i64::from(MAX_STAGE_DAYS),
        ) {
            let mut profile = default_catalog().remove(0);
            profile.seedling.duration_days = seedling;
            profile.growing.duration_days = growing;
            let s = i64::from(seedling);
            let g = i64::from(growing);
            let expected = if elapsed < s {
                StageKind::Seedling
            } else if elapsed < s + g {
                StageKind::Growing
            } else {
                StageKind::Harvesting
            };
            prop_assert_eq!(stage_at(&profile, elapsed), expected);
        }
    }
}
