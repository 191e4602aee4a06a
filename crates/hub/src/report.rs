//! Read-only projections of the controller, serialized for the HTTP API.

use serde::Serialize;

use crate::calibration::{LiquidCalibration, PhCalibration, PhModel};
use crate::control::{CalibratedReadings, SensorSnapshot};
use crate::cycle::CycleProgress;
use crate::profile::GrowthProfile;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub timestamp: i64,
    pub clock_synchronized: bool,
    pub raw: SensorSnapshot,
    pub readings: CalibratedReadings,
    pub pump: bool,
    pub lights: bool,
    /// "None" without an active cycle, "Invalid" for a dangling profile.
    pub stage: String,
    pub profile_id: Option<String>,
    pub watering_info: Option<WateringInfo>,
    pub light_info: Option<LightInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WateringInfo {
    pub seconds_until_next_change: i64,
    pub interval_minutes: u32,
    pub duration_minutes: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LightInfo {
    /// Absent when the window never changes (0 or 24 hours of light).
    pub seconds_until_next_change: Option<u32>,
    pub light_hours: u8,
    pub start_hour: u8,
    pub end_hour: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfilesReport {
    pub capacity: usize,
    pub profiles: Vec<GrowthProfile>,
    pub active_cycle: Option<ActiveCycleReport>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveCycleReport {
    pub profile_id: String,
    pub profile_name: String,
    pub start_timestamp: i64,
    pub current_stage: String,
    #[serde(flatten)]
    pub progress: CycleProgress,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalibrationReport {
    pub liquid: LiquidCalibration,
    pub ph: PhCalibration,
    pub ph_model: PhModel,
}
