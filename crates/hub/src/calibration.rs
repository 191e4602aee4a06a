//! Raw transducer counts to physical units.
//!
//! Two conversions live here:
//!
//! * reservoir fill level: a two-point linear map from the `dry` / `full` raw
//!   counts onto 0–100 %, clamped;
//! * pH: a line fitted through the raw readings captured in pH 4.0, 7.0 and
//!   10.0 buffer solutions, either one least-squares line over all three
//!   anchors or two piecewise segments meeting at the pH 7 anchor.
//!
//! Both are pure and cheap enough to run on every tick. Unusable calibration
//! never produces a spurious number: the fill level becomes `None`, and a
//! degenerate pH fit collapses to a flat neutral 7.0.

use serde::{Deserialize, Serialize};

use crate::error::AdminError;

/// Physical pH values of the three buffer solutions used for calibration.
pub const PH_ANCHORS: [f64; 3] = [4.0, 7.0, 10.0];

/// Output of a pH model whose fit is degenerate.
pub const NEUTRAL_PH: f64 = 7.0;

// ---------------------------------------------------------------------------
// Calibration points and linear fits
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationPoint {
    pub raw: f64,
    pub physical: f64,
}

impl CalibrationPoint {
    pub const fn new(raw: f64, physical: f64) -> Self {
        Self { raw, physical }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
}

impl LinearFit {
    /// Line through two points. `None` when both share the same raw value.
    pub fn through(a: CalibrationPoint, b: CalibrationPoint) -> Option<Self> {
        let run = b.raw - a.raw;
        if run == 0.0 || !run.is_finite() {
            return None;
        }
        let slope = (b.physical - a.physical) / run;
        Some(Self {
            slope,
            intercept: a.physical - slope * a.raw,
        })
    }

    /// Ordinary least-squares line over `points`. `None` when the raw values
    /// have zero spread (the regression denominator is zero).
    ///
    /// Uses the centred form so identical raw values yield an exact zero.
    pub fn least_squares(points: &[CalibrationPoint]) -> Option<Self> {
        if points.is_empty() {
            return None;
        }
        let n = points.len() as f64;
        let mean_x = points.iter().map(|p| p.raw).sum::<f64>() / n;
        let mean_y = points.iter().map(|p| p.physical).sum::<f64>() / n;

        let (sxy, sxx) = points.iter().fold((0.0, 0.0), |(sxy, sxx), p| {
            let dx = p.raw - mean_x;
            (sxy + dx * (p.physical - mean_y), sxx + dx * dx)
        });

        if sxx == 0.0 || !sxx.is_finite() {
            return None;
        }
        let slope = sxy / sxx;
        Some(Self {
            slope,
            intercept: mean_y - slope * mean_x,
        })
    }

    pub fn apply(&self, raw: f64) -> f64 {
        self.slope * raw + self.intercept
    }
}

// ---------------------------------------------------------------------------
// Liquid level
// ---------------------------------------------------------------------------

/// Raw load-cell counts for an empty and a full reservoir, plus an optional
/// critical marker below which the pump should not be relied on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LiquidCalibration {
    pub dry: i64,
    #[serde(default)]
    pub critical_level: Option<i64>,
    pub full: i64,
}

impl LiquidCalibration {
    /// Reject a calibration that cannot produce a percentage. Used by the
    /// set-calibration operation; stored values are never rejected on load.
    pub fn validate(&self) -> Result<(), AdminError> {
        if self.full == self.dry {
            return Err(AdminError::InvalidCalibration(format!(
                "dry and full are both {}, calibration range is zero",
                self.dry
            )));
        }
        if let Some(critical) = self.critical_level {
            let (lo, hi) = (self.dry.min(self.full), self.dry.max(self.full));
            if !(lo..=hi).contains(&critical) {
                return Err(AdminError::InvalidCalibration(format!(
                    "critical level {critical} outside the dry..full range [{lo}, {hi}]"
                )));
            }
        }
        Ok(())
    }

    /// Fill percentage of the critical marker, if one is configured and the
    /// calibration is usable.
    pub fn critical_percentage(&self) -> Option<f64> {
        self.critical_level
            .and_then(|raw| liquid_percentage(raw as f64, self))
    }
}

/// Map a raw reading onto 0–100 % of the `dry..full` range.
///
/// `None` if the calibration range is zero or the reading is not a finite
/// number.
pub fn liquid_percentage(raw: f64, calib: &LiquidCalibration) -> Option<f64> {
    if calib.full == calib.dry || !raw.is_finite() {
        return None;
    }
    let dry = calib.dry as f64;
    let full = calib.full as f64;
    let pct = (raw - dry) / (full - dry) * 100.0;
    Some(pct.clamp(0.0, 100.0))
}

// ---------------------------------------------------------------------------
// pH
// ---------------------------------------------------------------------------

/// Which line is fitted through the three pH anchors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhModel {
    /// One least-squares line across all three anchors.
    #[default]
    LeastSquares,
    /// pH 4↔7 below the neutral anchor, pH 7↔10 above it.
    Piecewise,
}

/// Raw ADC readings captured in pH 4.0, 7.0 and 10.0 buffers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhCalibration {
    pub ph4_raw: f64,
    pub ph7_raw: f64,
    pub ph10_raw: f64,
}

impl Default for PhCalibration {
    /// Typical analog pH board on a 12-bit ADC: ~2500 counts at neutral,
    /// roughly 400 counts per 3 pH units, falling as pH rises.
    fn default() -> Self {
        Self {
            ph4_raw: 2900.0,
            ph7_raw: 2500.0,
            ph10_raw: 2100.0,
        }
    }
}

impl PhCalibration {
    pub fn anchors(&self) -> [CalibrationPoint; 3] {
        [
            CalibrationPoint::new(self.ph4_raw, PH_ANCHORS[0]),
            CalibrationPoint::new(self.ph7_raw, PH_ANCHORS[1]),
            CalibrationPoint::new(self.ph10_raw, PH_ANCHORS[2]),
        ]
    }

    pub fn validate(&self) -> Result<(), AdminError> {
        let raws = [self.ph4_raw, self.ph7_raw, self.ph10_raw];
        if raws.iter().any(|r| !r.is_finite()) {
            return Err(AdminError::InvalidCalibration(
                "pH anchor readings must be finite numbers".into(),
            ));
        }
        if raws[0] == raws[1] || raws[1] == raws[2] || raws[0] == raws[2] {
            return Err(AdminError::InvalidCalibration(format!(
                "pH anchor readings must be distinct, got {} / {} / {}",
                raws[0], raws[1], raws[2]
            )));
        }
        Ok(())
    }

    /// Convert a raw pH ADC reading. `None` only when `raw` is not finite.
    pub fn ph_value(&self, raw: f64, model: PhModel) -> Option<f64> {
        if !raw.is_finite() {
            return None;
        }
        let [p4, p7, p10] = self.anchors();
        let fit = match model {
            PhModel::LeastSquares => LinearFit::least_squares(&[p4, p7, p10]),
            PhModel::Piecewise => {
                // Pick the segment on the same side of the neutral anchor as
                // the reading; works for rising and falling probe curves.
                let alkaline_side = (p10.raw - p7.raw).signum();
                if (raw - p7.raw).signum() == alkaline_side {
                    LinearFit::through(p7, p10)
                } else {
                    LinearFit::through(p4, p7)
                }
            }
        };
        Some(fit.map_or(NEUTRAL_PH, |f| f.apply(raw)))
    }
}

// ===========================================================================
// Tests
// ===========================================================================
