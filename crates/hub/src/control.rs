//! The controller: sole owner of the catalog, the active cycle, both
//! calibrations, the actuators and the scheduler timers.
//!
//! `tick` is synchronous and takes `now` explicitly; it never reads the
//! clock or touches storage. Administrative operations compute the next
//! state, commit it through [`Db`], and install it only once the commit
//! succeeded, so a failed commit leaves memory exactly as it was.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::actuator::{Actuator, ActuatorKind, Transition};
use crate::alerts::{self, Alert, AlertInputs, AlertThresholds};
use crate::calibration::{self, LiquidCalibration, PhCalibration, PhModel};
use crate::config::Config;
use crate::cycle::{self, CycleState, GrowthCycle};
use crate::db::Db;
use crate::error::AdminError;
use crate::irrigation::{self, SchedulerTimers};
use crate::lights;
use crate::profile::{default_catalog, GrowthProfile, ProfileStore};
use crate::report::{
    ActiveCycleReport, CalibrationReport, LightInfo, ProfilesReport, StatusReport, WateringInfo,
};

/// Readings older than this are treated as missing.
pub const SENSOR_STALE_SECS: i64 = 120;

// ---------------------------------------------------------------------------
// Inputs and outputs
// ---------------------------------------------------------------------------

/// Decoded readings from the sensor node. Any of them may be missing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorSnapshot {
    pub liquid_raw: Option<f64>,
    pub ph_raw: Option<f64>,
    pub tds: Option<f64>,
    pub temperature: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CalibratedReadings {
    pub liquid_percent: Option<f64>,
    pub ph: Option<f64>,
    pub tds: Option<f64>,
    pub temperature: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ControlEvent {
    Actuator(Transition),
    Alert { alert: Alert, at: i64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub clock_synchronized: bool,
    pub readings: CalibratedReadings,
    pub events: Vec<ControlEvent>,
}

#[derive(Debug, Clone, Copy)]
pub struct ControlSettings {
    pub thresholds: AlertThresholds,
    pub ph_model: PhModel,
    pub utc_offset_secs: i32,
    pub clock_sanity_epoch: i64,
}

impl Default for ControlSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for ControlSettings {
    fn from(cfg: &Config) -> Self {
        Self {
            thresholds: cfg.alerts,
            ph_model: cfg.calibration.ph_model,
            utc_offset_secs: cfg.utc_offset_secs(),
            clock_sanity_epoch: cfg.clock_sanity_epoch,
        }
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

pub struct Controller {
    store: ProfileStore,
    cycle: GrowthCycle,
    liquid: LiquidCalibration,
    ph: PhCalibration,
    pump: Actuator,
    lights: Actuator,
    timers: SchedulerTimers,
    settings: ControlSettings,
    sensors: SensorSnapshot,
    sensors_at: Option<i64>,
}

impl Controller {
    pub fn new(
        store: ProfileStore,
        cycle: GrowthCycle,
        liquid: LiquidCalibration,
        ph: PhCalibration,
        settings: ControlSettings,
    ) -> Self {
        Self {
            store,
            cycle,
            liquid,
            ph,
            pump: Actuator::new(ActuatorKind::Pump),
            lights: Actuator::new(ActuatorKind::Lights),
            timers: SchedulerTimers::default(),
            settings,
            sensors: SensorSnapshot::default(),
            sensors_at: None,
        }
    }

    /// Restore durable state. Falls back to the seed catalog when no catalog
    /// was ever committed, and deactivates (and commits) a cycle whose
    /// profile is gone.
    pub async fn load(db: &Db, config: &Config) -> Result<Self> {
        let store = match db.load_catalog().await? {
            Some(catalog) => ProfileStore::from_catalog(catalog, config.max_profiles),
            None => {
                let seed = config.seed_catalog().unwrap_or_else(default_catalog);
                tracing::info!(profiles = seed.len(), "no committed catalog, using seed catalog");
                ProfileStore::from_catalog(seed, config.max_profiles)
            }
        };

        let mut cycle = db.load_active_cycle().await?.unwrap_or_default();
        if cycle.reconcile(&store) {
            tracing::warn!(
                profile = %cycle.profile_id,
                "active cycle references a missing profile, deactivating"
            );
            db.commit_active_cycle(&cycle)
                .await
                .context("failed to commit self-healed cycle")?;
        }

        let liquid = db.load_liquid_calibration().await?.unwrap_or_default();
        let ph = db.load_ph_calibration().await?.unwrap_or_default();

        tracing::info!(
            profiles = store.len(),
            capacity = store.capacity(),
            cycle_active = cycle.active,
            profile = %cycle.profile_id,
            "controller state loaded"
        );

        Ok(Self::new(store, cycle, liquid, ph, ControlSettings::from(config)))
    }

    pub fn clock_synchronized(&self, now: i64) -> bool {
        now >= self.settings.clock_sanity_epoch
    }

    pub fn is_on(&self, actuator: ActuatorKind) -> bool {
        self.actuator(actuator).is_on()
    }

    pub fn cycle(&self) -> &GrowthCycle {
        &self.cycle
    }

    pub fn store(&self) -> &ProfileStore {
        &self.store
    }

    fn actuator(&self, kind: ActuatorKind) -> &Actuator {
        match kind {
            ActuatorKind::Pump => &self.pump,
            ActuatorKind::Lights => &self.lights,
        }
    }

    fn actuator_mut(&mut self, kind: ActuatorKind) -> &mut Actuator {
        match kind {
            ActuatorKind::Pump => &mut self.pump,
            ActuatorKind::Lights => &mut self.lights,
        }
    }

    // -----------------------------------------------------------------------
    // Sensors
    // -----------------------------------------------------------------------

    pub fn record_readings(&mut self, snapshot: SensorSnapshot, now: i64) {
        self.sensors = snapshot;
        self.sensors_at = Some(now);
    }

    fn current_sensors(&self, now: i64) -> SensorSnapshot {
        match self.sensors_at {
            Some(at) if now - at <= SENSOR_STALE_SECS => self.sensors,
            _ => SensorSnapshot::default(),
        }
    }

    pub fn calibrate(&self, now: i64) -> CalibratedReadings {
        let raw = self.current_sensors(now);
        CalibratedReadings {
            liquid_percent: raw
                .liquid_raw
                .and_then(|r| calibration::liquid_percentage(r, &self.liquid)),
            ph: raw
                .ph_raw
                .and_then(|r| self.ph.ph_value(r, self.settings.ph_model)),
            tds: raw.tds.filter(|v| v.is_finite()),
            temperature: raw.temperature.filter(|v| v.is_finite()),
        }
    }

    // -----------------------------------------------------------------------
    // Tick
    // -----------------------------------------------------------------------

    /// One control-loop iteration.
    pub fn tick(&mut self, now: i64) -> TickReport {
        let clock_synchronized = self.clock_synchronized(now);
        let readings = self.calibrate(now);
        let mut events = Vec::new();

        let stage = if clock_synchronized {
            self.cycle.current_stage(&self.store, now)
        } else {
            tracing::debug!(now, "clock not synchronized, stage logic deferred");
            None
        };

        if let Some(active) = &stage {
            for t in irrigation::tick(&mut self.timers, &mut self.pump, active.settings, now) {
                events.push(ControlEvent::Actuator(t));
            }
            if let Some(t) =
                lights::tick(&mut self.lights, active.settings, now, self.settings.utc_offset_secs)
            {
                events.push(ControlEvent::Actuator(t));
            }
        }

        let inputs = AlertInputs {
            liquid_percent: readings.liquid_percent,
            liquid_critical_percent: self.liquid.critical_percentage(),
            ph: readings.ph,
            stage: stage.as_ref().map(|s| (s.kind, s.settings)),
        };
        for alert in alerts::evaluate(&self.settings.thresholds, &inputs) {
            tracing::warn!(kind = ?alert.kind, message = %alert.message, "alert");
            events.push(ControlEvent::Alert { alert, at: now });
        }

        tracing::debug!(
            now,
            stage = stage.as_ref().map(|s| s.kind.to_string()).unwrap_or_default(),
            pump = self.pump.is_on(),
            lights = self.lights.is_on(),
            events = events.len(),
            "tick"
        );

        TickReport {
            clock_synchronized,
            readings,
            events,
        }
    }

    // -----------------------------------------------------------------------
    // Manual overrides
    // -----------------------------------------------------------------------

    pub fn set_actuator(&mut self, kind: ActuatorKind, on: bool, now: i64) -> Option<Transition> {
        let t = self.actuator_mut(kind).set(on, now);
        if t.is_some() {
            tracing::info!(actuator = %kind, on, "manual override");
        }
        t
    }

    pub fn toggle_actuator(&mut self, kind: ActuatorKind, now: i64) -> Option<Transition> {
        let on = !self.is_on(kind);
        self.set_actuator(kind, on, now)
    }

    // -----------------------------------------------------------------------
    // Administrative operations
    // -----------------------------------------------------------------------

    pub async fn save_profile(&mut self, db: &Db, profile: GrowthProfile) -> Result<(), AdminError> {
        let id = profile.id.clone();
        let next = self.store.staged_save(profile)?;
        db.commit_catalog(&next).await?;
        self.store.install(next);
        tracing::info!(profile = %id, profiles = self.store.len(), "profile saved");
        Ok(())
    }

    /// Start a cycle for `profile_id`. Without an explicit start time the
    /// current clock is used, which must be synchronized.
    pub async fn start_cycle(
        &mut self,
        db: &Db,
        profile_id: &str,
        start_timestamp: Option<i64>,
        now: i64,
    ) -> Result<GrowthCycle, AdminError> {
        if !self.store.contains(profile_id) {
            return Err(AdminError::ProfileNotFound(profile_id.to_string()));
        }
        let start = match start_timestamp {
            Some(ts) => ts,
            None if !self.clock_synchronized(now) => return Err(AdminError::ClockNotSynchronized),
            None => now,
        };

        let next = GrowthCycle::started(profile_id, start);
        db.commit_active_cycle(&next).await?;
        self.cycle = next.clone();
        tracing::info!(profile = %profile_id, start, "growth cycle started");
        Ok(next)
    }

    /// Stop the cycle and switch both actuators off. Returns the resulting
    /// transitions so the caller can drive the relays.
    pub async fn stop_cycle(&mut self, db: &Db, now: i64) -> Result<Vec<Transition>, AdminError> {
        let next = self.cycle.stopped();
        db.commit_active_cycle(&next).await?;
        self.cycle = next;

        let mut transitions = Vec::new();
        transitions.extend(self.pump.set(false, now));
        transitions.extend(self.lights.set(false, now));
        self.timers.pump_energized_since = 0;
        tracing::info!(profile = %self.cycle.profile_id, "growth cycle stopped");
        Ok(transitions)
    }

    pub async fn set_liquid_calibration(
        &mut self,
        db: &Db,
        calib: LiquidCalibration,
    ) -> Result<(), AdminError> {
        calib.validate()?;
        db.commit_liquid_calibration(&calib).await?;
        self.liquid = calib;
        tracing::info!(
            dry = calib.dry,
            full = calib.full,
            critical = ?calib.critical_level,
            "liquid calibration updated"
        );
        Ok(())
    }

    pub async fn set_ph_calibration(
        &mut self,
        db: &Db,
        calib: PhCalibration,
    ) -> Result<(), AdminError> {
        calib.validate()?;
        db.commit_ph_calibration(&calib).await?;
        self.ph = calib;
        tracing::info!(
            ph4 = calib.ph4_raw,
            ph7 = calib.ph7_raw,
            ph10 = calib.ph10_raw,
            "pH calibration updated"
        );
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Projections
    // -----------------------------------------------------------------------

    pub fn status(&self, now: i64) -> StatusReport {
        let clock_synchronized = self.clock_synchronized(now);
        let state = if clock_synchronized {
            self.cycle.state(&self.store, now)
        } else if self.cycle.active {
            CycleState::Unavailable
        } else {
            CycleState::Inactive
        };
        let stage = if clock_synchronized {
            self.cycle.current_stage(&self.store, now)
        } else {
            None
        };

        let watering_info = stage.as_ref().map(|s| WateringInfo {
            seconds_until_next_change: irrigation::seconds_until_next_change(
                &self.timers,
                self.pump.is_on(),
                s.settings,
                now,
            ),
            interval_minutes: s.settings.water_interval_minutes,
            duration_minutes: s.settings.water_duration_minutes,
        });
        let light_info = stage.as_ref().map(|s| LightInfo {
            seconds_until_next_change: lights::seconds_until_next_transition(
                now,
                self.settings.utc_offset_secs,
                s.settings,
                self.lights.is_on(),
            ),
            light_hours: s.settings.light_hours_per_day,
            start_hour: s.settings.light_start_hour,
            end_hour: lights::end_hour(s.settings),
        });

        StatusReport {
            timestamp: now,
            clock_synchronized,
            raw: self.current_sensors(now),
            readings: self.calibrate(now),
            pump: self.pump.is_on(),
            lights: self.lights.is_on(),
            stage: state.label(),
            profile_id: self.cycle.active.then(|| self.cycle.profile_id.clone()),
            watering_info,
            light_info,
        }
    }

    pub fn profiles_report(&self, now: i64) -> ProfilesReport {
        let active_cycle = if self.cycle.active && self.clock_synchronized(now) {
            self.store.find(&self.cycle.profile_id).map(|p| ActiveCycleReport {
                profile_id: p.id.clone(),
                profile_name: p.name.clone(),
                start_timestamp: self.cycle.start_timestamp,
                current_stage: self.cycle.state(&self.store, now).label(),
                progress: cycle::progress(p, self.cycle.start_timestamp, now),
            })
        } else {
            None
        };

        ProfilesReport {
            capacity: self.store.capacity(),
            profiles: self.store.list().to_vec(),
            active_cycle,
        }
    }

    pub fn calibration_report(&self) -> CalibrationReport {
        CalibrationReport {
            liquid: self.liquid,
            ph: self.ph,
            ph_model: self.settings.ph_model,
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
