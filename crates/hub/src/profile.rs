//! Growth profiles and the fixed-capacity catalog that owns them.
//!
//! A profile is three stages (seedling → growing → harvesting), each with its
//! own irrigation, lighting and pH targets. The catalog keeps insertion order
//! for listing and an id index for lookup. It never talks to storage itself:
//! `staged_save` computes the catalog that *would* result, the caller commits
//! it, and only then `install`s it.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::error::AdminError;

/// Default catalog ceiling when the config file does not set one.
pub const DEFAULT_MAX_PROFILES: usize = 10;

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    Seedling,
    Growing,
    Harvesting,
}

impl StageKind {
    pub const ALL: [StageKind; 3] = [Self::Seedling, Self::Growing, Self::Harvesting];
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Seedling => write!(f, "Seedling"),
            Self::Growing => write!(f, "Growing"),
            Self::Harvesting => write!(f, "Harvesting"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GrowthStage {
    pub duration_days: u32,
    pub water_duration_minutes: u32,
    pub water_interval_minutes: u32,
    pub light_hours_per_day: u8,
    /// Local hour (0–23) at which the light window opens.
    pub light_start_hour: u8,
    pub ph_min: f64,
    pub ph_max: f64,
}

const fn stage(
    duration_days: u32,
    water_duration_minutes: u32,
    water_interval_minutes: u32,
    light_hours_per_day: u8,
    light_start_hour: u8,
    ph_min: f64,
    ph_max: f64,
) -> GrowthStage {
    GrowthStage {
        duration_days,
        water_duration_minutes,
        water_interval_minutes,
        light_hours_per_day,
        light_start_hour,
        ph_min,
        ph_max,
    }
}

/// Upper bound on a single stage, about ten years.
pub const MAX_STAGE_DAYS: u32 = 3650;

impl GrowthStage {
    /// Fallbacks applied when a save request omits a stage.
    pub const DEFAULT_SEEDLING: GrowthStage = stage(14, 5, 60, 8, 6, 5.5, 6.5);
    pub const DEFAULT_GROWING: GrowthStage = stage(30, 5, 30, 12, 6, 5.8, 6.2);
    pub const DEFAULT_HARVESTING: GrowthStage = stage(14, 5, 45, 10, 6, 6.0, 6.5);

    pub fn default_for(kind: StageKind) -> GrowthStage {
        match kind {
            StageKind::Seedling => Self::DEFAULT_SEEDLING,
            StageKind::Growing => Self::DEFAULT_GROWING,
            StageKind::Harvesting => Self::DEFAULT_HARVESTING,
        }
    }

    pub fn water_interval_secs(&self) -> i64 {
        i64::from(self.water_interval_minutes) * 60
    }

    pub fn water_duration_secs(&self) -> i64 {
        i64::from(self.water_duration_minutes) * 60
    }

    fn validate(&self, kind: StageKind, errors: &mut Vec<String>) {
        if self.duration_days > MAX_STAGE_DAYS {
            errors.push(format!(
                "{kind}: duration_days {} out of range [0, {MAX_STAGE_DAYS}]",
                self.duration_days
            ));
        }
        if self.light_start_hour > 23 {
            errors.push(format!(
                "{kind}: light_start_hour {} out of range [0, 23]",
                self.light_start_hour
            ));
        }
        if !(1..=24).contains(&self.light_hours_per_day) {
            errors.push(format!(
                "{kind}: light_hours_per_day {} out of range [1, 24]",
                self.light_hours_per_day
            ));
        }
        if self.water_interval_minutes == 0 {
            errors.push(format!("{kind}: water_interval_minutes must be positive"));
        }
        if self.water_duration_minutes == 0 {
            errors.push(format!("{kind}: water_duration_minutes must be positive"));
        }
        if !self.ph_min.is_finite() || !self.ph_max.is_finite() {
            errors.push(format!("{kind}: pH bounds must be finite"));
        } else if self.ph_min > self.ph_max {
            errors.push(format!(
                "{kind}: ph_min ({}) must not exceed ph_max ({})",
                self.ph_min, self.ph_max
            ));
        }
    }
}

// ---------------------------------------------------------------------------
// Profiles
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrowthProfile {
    pub id: String,
    pub name: String,
    pub seedling: GrowthStage,
    pub growing: GrowthStage,
    pub harvesting: GrowthStage,
}

impl GrowthProfile {
    pub fn stage(&self, kind: StageKind) -> &GrowthStage {
        match kind {
            StageKind::Seedling => &self.seedling,
            StageKind::Growing => &self.growing,
            StageKind::Harvesting => &self.harvesting,
        }
    }

    /// Nominal length of the whole run. Harvesting continues past it.
    pub fn total_duration_days(&self) -> i64 {
        StageKind::ALL
            .iter()
            .map(|&kind| i64::from(self.stage(kind).duration_days))
            .sum()
    }

    /// Check every stage and report all violations at once.
    pub fn validate(&self) -> Result<(), AdminError> {
        let mut errors = Vec::new();
        if self.id.trim().is_empty() {
            errors.push("id is empty".to_string());
        }
        if self.name.trim().is_empty() {
            errors.push("name is empty".to_string());
        }
        for kind in StageKind::ALL {
            self.stage(kind).validate(kind, &mut errors);
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(AdminError::InvalidProfile(format!(
                "profile '{}': {}",
                self.id,
                errors.join("; ")
            )))
        }
    }
}

/// A profile as submitted by an operator or a config file: name and stages
/// may be left out and fall back to defaults.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ProfileDraft {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub seedling: Option<GrowthStage>,
    #[serde(default)]
    pub growing: Option<GrowthStage>,
    #[serde(default)]
    pub harvesting: Option<GrowthStage>,
}

impl ProfileDraft {
    pub fn into_profile(self) -> GrowthProfile {
        GrowthProfile {
            id: self.id.trim().to_string(),
            name: self
                .name
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| "Unnamed Profile".to_string()),
            seedling: self
                .seedling
                .unwrap_or_else(|| GrowthStage::default_for(StageKind::Seedling)),
            growing: self
                .growing
                .unwrap_or_else(|| GrowthStage::default_for(StageKind::Growing)),
            harvesting: self
                .harvesting
                .unwrap_or_else(|| GrowthStage::default_for(StageKind::Harvesting)),
        }
    }
}

/// Catalog shipped with the controller, used until a catalog is first
/// committed.
pub fn default_catalog() -> Vec<GrowthProfile> {
    vec![
        GrowthProfile {
            id: "tomatoes".into(),
            name: "Tomatoes".into(),
            seedling: stage(14, 5, 60, 8, 6, 5.5, 6.5),
            growing: stage(35, 5, 30, 12, 6, 5.8, 6.2),
            harvesting: stage(21, 5, 45, 10, 6, 6.0, 6.5),
        },
        GrowthProfile {
            id: "peppers".into(),
            name: "Peppers".into(),
            seedling: stage(14, 5, 120, 10, 6, 5.5, 6.5),
            growing: stage(30, 5, 45, 14, 6, 5.8, 6.3),
            harvesting: stage(14, 5, 60, 12, 6, 5.8, 6.5),
        },
        GrowthProfile {
            id: "lettuce".into(),
            name: "Lettuce".into(),
            seedling: stage(7, 5, 90, 10, 6, 5.6, 6.2),
            growing: stage(21, 5, 40, 12, 6, 5.6, 6.2),
            harvesting: stage(7, 5, 30, 12, 6, 5.8, 6.0),
        },
    ]
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ProfileStore {
    profiles: Vec<GrowthProfile>,
    index: HashMap<String, usize>,
    capacity: usize,
}

impl ProfileStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            profiles: Vec::with_capacity(capacity),
            index: HashMap::with_capacity(capacity),
            capacity,
        }
    }

    /// Build a store from a loaded catalog. Entries past the ceiling are
    /// dropped with a warning; later duplicates of an id are ignored.
    pub fn from_catalog(catalog: Vec<GrowthProfile>, capacity: usize) -> Self {
        let mut store = Self::new(capacity);
        let loaded = catalog.len();
        let mut kept = Vec::with_capacity(capacity.min(loaded));
        for p in catalog {
            if kept.len() >= capacity {
                break;
            }
            if kept.iter().any(|k: &GrowthProfile| k.id == p.id) {
                tracing::warn!(profile = %p.id, "duplicate profile id in catalog, ignoring");
                continue;
            }
            kept.push(p);
        }
        if kept.len() < loaded {
            tracing::warn!(loaded, kept = kept.len(), capacity, "catalog trimmed on load");
        }
        store.install(kept);
        store
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    pub fn list(&self) -> &[GrowthProfile] {
        &self.profiles
    }

    pub fn find(&self, id: &str) -> Option<&GrowthProfile> {
        self.index.get(id).map(|&i| &self.profiles[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// The catalog that saving `profile` would produce. An existing id is
    /// replaced in place (keeping its position); a new id is appended unless
    /// the store is full. `self` is not modified.
    pub fn staged_save(&self, profile: GrowthProfile) -> Result<Vec<GrowthProfile>, AdminError> {
        profile.validate()?;

        let mut next = self.profiles.clone();
        match self.index.get(&profile.id) {
            Some(&i) => next[i] = profile,
            None => {
                if next.len() >= self.capacity {
                    return Err(AdminError::CapacityExceeded {
                        capacity: self.capacity,
                    });
                }
                next.push(profile);
            }
        }
        Ok(next)
    }

    /// Replace the catalog with an already-committed one.
    pub fn install(&mut self, catalog: Vec<GrowthProfile>) {
        self.index = catalog
            .iter()
            .enumerate()
            .map(|(i, p)| (p.id.clone(), i))
            .collect();
        self.profiles = catalog;
    }

    /// In-memory save without a durability step.
    #[cfg(test)]
    pub fn save(&mut self, profile: GrowthProfile) -> Result<(), AdminError> {
        let next = self.staged_save(profile)?;
        self.install(next);
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(id: &str) -> GrowthProfile {
        GrowthProfile {
            id: id.into(),
            name: format!("Profile {id}"),
            seedling: GrowthStage::DEFAULT_SEEDLING,
            growing: GrowthStage::DEFAULT_GROWING,
            harvesting: GrowthStage::DEFAULT_HARVESTING,
        }
    }

    #[test]
    fn default_catalog_is_valid_and_unique() {
        let catalog = default_catalog();
        assert_eq!(catalog.len(), 3);
        for p in &catalog {
            p.validate().unwrap();
        }
        let store = ProfileStore::from_catalog(catalog, DEFAULT_MAX_PROFILES);
        assert_eq!(store.len(), 3);
        assert_eq!(store.find("tomatoes").unwrap().growing.duration_days, 35);
    }

    #[test]
    fn list_keeps_insertion_order() {
        let mut store = ProfileStore::new(5);
        for id in ["c", "a", "b"] {
            store.save(profile(id)).unwrap();
        }
        let ids: Vec<_> = store.list().iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, ["c", "a", "b"]);
    }

    #[test]
    fn save_existing_id_replaces_in_place() {
        let mut store = ProfileStore::new(5);
        store.save(profile("a")).unwrap();
        store.save(profile("b")).unwrap();

        let mut updated = profile("a");
        updated.name = "Renamed".into();
        updated.seedling.duration_days = 3;
        store.save(updated).unwrap();

        assert_eq!(store.len(), 2);
        assert_eq!(store.list()[0].id, "a");
        assert_eq!(store.list()[0].name, "Renamed");
        assert_eq!(store.find("a").unwrap().seedling.duration_days, 3);
    }

    #[test]
    fn find_unknown_is_none() {
        let store = ProfileStore::from_catalog(default_catalog(), 10);
        assert!(store.find("orchids").is_none());
        assert!(!store.contains("orchids"));
    }

    #[test]
    fn capacity_exceeded_leaves_catalog_unchanged() {
        let mut store = ProfileStore::new(2);
        store.save(profile("a")).unwrap();
        store.save(profile("b")).unwrap();
        let before = store.list().to_vec();

        let err = store.save(profile("c")).unwrap_err();
        assert!(matches!(err, AdminError::CapacityExceeded { capacity: 2 }));
        assert_eq!(store.list(), before.as_slice());
        assert!(store.find("c").is_none());
    }

    #[test]
    fn full_store_still_accepts_updates() {
        let mut store = ProfileStore::new(1);
        store.save(profile("a")).unwrap();
        let mut updated = profile("a");
        updated.name = "Still fits".into();
        store.save(updated).unwrap();
        assert_eq!(store.find("a").unwrap().name, "Still fits");
    }

    #[test]
    fn staged_save_does_not_mutate() {
        let store = ProfileStore::new(3);
        let next = store.staged_save(profile("a")).unwrap();
        assert_eq!(next.len(), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn from_catalog_trims_to_capacity_and_dedups() {
        let catalog = vec![profile("a"), profile("a"), profile("b"), profile("c")];
        let store = ProfileStore::from_catalog(catalog, 2);
        let ids: Vec<_> = store.list().iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, ["a", "b"]);
    }

    #[test]
    fn invalid_stage_rejected_with_all_reasons() {
        let mut p = profile("bad");
        p.growing.light_start_hour = 24;
        p.harvesting.ph_min = 7.0;
        p.harvesting.ph_max = 6.0;
        p.seedling.water_interval_minutes = 0;

        let err = p.validate().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("Growing: light_start_hour 24"), "got: {msg}");
        assert!(msg.contains("Harvesting: ph_min"), "got: {msg}");
        assert!(msg.contains("Seedling: water_interval_minutes"), "got: {msg}");
    }

    #[test]
    fn dark_or_endless_stages_rejected() {
        let mut p = profile("edge");
        p.seedling.light_hours_per_day = 0;
        p.growing.duration_days = u32::MAX;
        p.harvesting.duration_days = MAX_STAGE_DAYS + 1;

        let msg = p.validate().unwrap_err().to_string();
        assert!(msg.contains("Seedling: light_hours_per_day 0"), "got: {msg}");
        assert!(msg.contains("Growing: duration_days"), "got: {msg}");
        assert!(msg.contains("Harvesting: duration_days"), "got: {msg}");

        p.seedling.light_hours_per_day = 24;
        p.growing.duration_days = MAX_STAGE_DAYS;
        p.harvesting.duration_days = MAX_STAGE_DAYS;
        p.validate().unwrap();
    }

    #[test]
    fn total_duration_does_not_overflow() {
        let mut p = profile("long");
        p.seedling.duration_days = u32::MAX;
        p.growing.duration_days = u32::MAX;
        p.harvesting.duration_days = u32::MAX;
        assert_eq!(p.total_duration_days(), 3 * i64::from(u32::MAX));
    }

    #[test]
    fn invalid_profile_not_saved() {
        let mut store = ProfileStore::new(3);
        let mut p = profile("x");
        p.name = " ".into();
        assert!(matches!(store.save(p), Err(AdminError::InvalidProfile(_))));
        assert!(store.is_empty());
    }

    #[test]
    fn stage_kind_display_and_serde() {
        assert_eq!(StageKind::Harvesting.to_string(), "Harvesting");
        assert_eq!(
            serde_json::to_string(&StageKind::Seedling).unwrap(),
            "\"seedling\""
        );
    }

    #[test]
    fn draft_fills_missing_name_and_stages() {
        let draft: ProfileDraft = serde_json::from_str(
            r#"{
                "id": " basil ",
                "growing": {
                    "duration_days": 20, "water_duration_minutes": 4,
                    "water_interval_minutes": 50, "light_hours_per_day": 14,
                    "light_start_hour": 5, "ph_min": 5.9, "ph_max": 6.4
                }
            }"#,
        )
        .unwrap();
        let p = draft.into_profile();
        assert_eq!(p.id, "basil");
        assert_eq!(p.name, "Unnamed Profile");
        assert_eq!(p.seedling, GrowthStage::DEFAULT_SEEDLING);
        assert_eq!(p.growing.duration_days, 20);
        assert_eq!(p.harvesting, GrowthStage::DEFAULT_HARVESTING);
        p.validate().unwrap();
    }

    #[test]
    fn total_duration_sums_stages() {
        let store = ProfileStore::from_catalog(default_catalog(), 10);
        assert_eq!(store.find("tomatoes").unwrap().total_duration_days(), 70);
        assert_eq!(store.find("lettuce").unwrap().total_duration_days(), 35);
    }
}
