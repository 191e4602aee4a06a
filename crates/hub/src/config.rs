//! TOML config file loading and validation.
//!
//! Deployment plumbing (broker address, database URL, ports) comes from
//! environment variables in `main`; this file covers controller behaviour.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;

use crate::alerts::AlertThresholds;
use crate::calibration::PhModel;
use crate::profile::{GrowthProfile, ProfileDraft, DEFAULT_MAX_PROFILES};

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Used in MQTT topics: `hydroponics/<device_id>/...`.
    pub device_id: String,
    pub tick_interval_ms: u64,
    /// Offset of local time from UTC, for the light window.
    pub utc_offset_hours: i32,
    /// Timestamps before this are treated as an unsynchronized clock.
    pub clock_sanity_epoch: i64,
    pub max_profiles: usize,
    pub alerts: AlertThresholds,
    pub calibration: CalibrationConfig,
    pub relays: RelayConfig,
    /// Seed catalog used instead of the built-in one on first start.
    pub profiles: Vec<ProfileDraft>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    pub ph_model: PhModel,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub pump_gpio: u8,
    pub lights_gpio: u8,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            pump_gpio: 21,
            lights_gpio: 19,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device_id: "tower1".into(),
            tick_interval_ms: 1000,
            utc_offset_hours: 0,
            clock_sanity_epoch: 1_000_000_000,
            max_profiles: DEFAULT_MAX_PROFILES,
            alerts: AlertThresholds::default(),
            calibration: CalibrationConfig::default(),
            relays: RelayConfig::default(),
            profiles: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// GPIO whitelist
// ---------------------------------------------------------------------------

/// BCM GPIO pins available on the Raspberry Pi 40-pin header for general
/// use. GPIO 0-1 are reserved for the ID EEPROM.
const VALID_GPIO_PINS: &[u8] = &[
    2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25, 26, 27,
];

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate every section. Returns `Ok(())` or an error describing every
    /// violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_general(&mut errors);
        self.validate_alerts(&mut errors);
        self.validate_relays(&mut errors);
        self.validate_profiles(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_general(&self, errors: &mut Vec<String>) {
        if self.device_id.trim().is_empty() {
            errors.push("device_id is empty".into());
        } else if self.device_id.contains(['/', '+', '#']) {
            errors.push(format!(
                "device_id '{}' must not contain MQTT topic characters (/ + #)",
                self.device_id
            ));
        }
        if !(100..=60_000).contains(&self.tick_interval_ms) {
            errors.push(format!(
                "tick_interval_ms {} out of range [100, 60000]",
                self.tick_interval_ms
            ));
        }
        if !(-12..=14).contains(&self.utc_offset_hours) {
            errors.push(format!(
                "utc_offset_hours {} out of range [-12, 14]",
                self.utc_offset_hours
            ));
        }
        if self.clock_sanity_epoch < 0 {
            errors.push(format!(
                "clock_sanity_epoch must not be negative, got {}",
                self.clock_sanity_epoch
            ));
        }
        if self.max_profiles == 0 {
            errors.push("max_profiles must be at least 1".into());
        }
    }

    fn validate_alerts(&self, errors: &mut Vec<String>) {
        let a = &self.alerts;
        if !(0.0..=100.0).contains(&a.liquid_low_percent) {
            errors.push(format!(
                "alerts.liquid_low_percent {} out of range [0, 100]",
                a.liquid_low_percent
            ));
        }
        if !a.ph_min.is_finite() || !a.ph_max.is_finite() {
            errors.push("alerts.ph_min and alerts.ph_max must be finite".into());
        } else if a.ph_min >= a.ph_max {
            errors.push(format!(
                "alerts.ph_min ({}) must be less than alerts.ph_max ({})",
                a.ph_min, a.ph_max
            ));
        }
    }

    fn validate_relays(&self, errors: &mut Vec<String>) {
        let r = &self.relays;
        for (name, pin) in [("pump_gpio", r.pump_gpio), ("lights_gpio", r.lights_gpio)] {
            if !VALID_GPIO_PINS.contains(&pin) {
                errors.push(format!(
                    "relays.{name} {pin} is not a valid BCM GPIO pin (allowed: 2-27)"
                ));
            }
        }
        if r.pump_gpio == r.lights_gpio {
            errors.push(format!(
                "relays.pump_gpio and relays.lights_gpio are both {}",
                r.pump_gpio
            ));
        }
    }

    fn validate_profiles(&self, errors: &mut Vec<String>) {
        if self.profiles.len() > self.max_profiles {
            errors.push(format!(
                "{} profiles configured but max_profiles is {}",
                self.profiles.len(),
                self.max_profiles
            ));
        }

        let mut seen_ids: HashSet<String> = HashSet::new();
        for (i, draft) in self.profiles.iter().enumerate() {
            let profile = draft.clone().into_profile();
            if profile.id.is_empty() {
                errors.push(format!("profiles[{i}]: id is empty"));
                continue;
            }
            if !seen_ids.insert(profile.id.clone()) {
                errors.push(format!("profile '{}': duplicate id", profile.id));
            }
            if let Err(e) = profile.validate() {
                errors.push(e.to_string());
            }
        }
    }

    pub fn utc_offset_secs(&self) -> i32 {
        self.utc_offset_hours * 3600
    }

    /// Configured seed catalog, if any.
    pub fn seed_catalog(&self) -> Option<Vec<GrowthProfile>> {
        if self.profiles.is_empty() {
            return None;
        }
        Some(
            self.profiles
                .iter()
                .cloned()
                .map(ProfileDraft::into_profile)
                .collect(),
        )
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read, parse, and validate a TOML config file. A missing file yields the
/// defaults.
pub fn load(path: &str) -> Result<Config> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!(path, "no config file, using defaults");
            String::new()
        }
        Err(e) => return Err(e).with_context(|| format!("failed to read config: {path}")),
    };
    let config: Config =
        toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?;
    config
        .validate()
        .with_context(|| format!("invalid config: {path}"))?;
    Ok(config)
}

// ===========================================================================
// Tests
// ===========================================================================
