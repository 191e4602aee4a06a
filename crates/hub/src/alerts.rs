//! Threshold alerts, evaluated fresh every tick. Repeats are not suppressed;
//! deduplication is left to whoever consumes the alert stream.

use serde::{Deserialize, Serialize};

use crate::profile::{GrowthStage, StageKind};

/// Profile-independent safety band plus the low-reservoir threshold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertThresholds {
    /// Fill percentage below which the reservoir is reported low.
    pub liquid_low_percent: f64,
    pub ph_min: f64,
    pub ph_max: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            liquid_low_percent: 20.0,
            ph_min: 5.5,
            ph_max: 6.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    LiquidLow,
    LiquidCritical,
    PhLow,
    PhHigh,
    StagePhLow,
    StagePhHigh,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Alert {
    pub kind: AlertKind,
    pub message: String,
}

impl Alert {
    fn new(kind: AlertKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Calibrated inputs for one evaluation. `None` readings raise nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlertInputs<'a> {
    pub liquid_percent: Option<f64>,
    pub liquid_critical_percent: Option<f64>,
    pub ph: Option<f64>,
    /// Active stage, absent while no cycle runs or the clock is unsynced.
    pub stage: Option<(StageKind, &'a GrowthStage)>,
}

pub fn evaluate(thresholds: &AlertThresholds, inputs: &AlertInputs<'_>) -> Vec<Alert> {
    let mut alerts = Vec::new();

    if let Some(pct) = inputs.liquid_percent {
        if pct < thresholds.liquid_low_percent {
            alerts.push(Alert::new(AlertKind::LiquidLow, "Low water level!"));
        }
        if let Some(critical) = inputs.liquid_critical_percent {
            if pct <= critical {
                alerts.push(Alert::new(
                    AlertKind::LiquidCritical,
                    "Critical water level! Pump may run dry.",
                ));
            }
        }
    }

    if let Some(ph) = inputs.ph {
        if ph < thresholds.ph_min {
            alerts.push(Alert::new(AlertKind::PhLow, "pH too low!"));
        } else if ph > thresholds.ph_max {
            alerts.push(Alert::new(AlertKind::PhHigh, "pH too high!"));
        }

        if let Some((kind, stage)) = inputs.stage {
            if ph < stage.ph_min {
                alerts.push(Alert::new(
                    AlertKind::StagePhLow,
                    format!("pH too low for {kind} stage!"),
                ));
            } else if ph > stage.ph_max {
                alerts.push(Alert::new(
                    AlertKind::StagePhHigh,
                    format!("pH too high for {kind} stage!"),
                ));
            }
        }
    }

    alerts
}
