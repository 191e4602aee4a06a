//! Stateful hydroponic reservoir simulator for running the hub without
//! hardware.
//!
//! Models:
//! - Reservoir drawdown while the pump fills the tower, recovering after the
//!   pump stops
//! - Slow consumption (uptake and evaporation) with an optional float-valve
//!   top-up
//! - pH drift and TDS concentration as the reservoir drops
//! - Load-cell and probe noise, plus occasional spikes and dropped readings

use serde::Serialize;
use std::fmt;

// ---------------------------------------------------------------------------
// Gaussian approximation (no extra dependency)
// ---------------------------------------------------------------------------

/// Irwin-Hall: sum of 12 uniform [0,1) values minus 6 ~ N(0,1).
fn approx_std_normal() -> f64 {
    (0..12).map(|_| fastrand::f64()).sum::<f64>() - 6.0
}

fn gaussian(mean: f64, sigma: f64) -> f64 {
    mean + sigma * approx_std_normal()
}

// ---------------------------------------------------------------------------
// pH probe model
// ---------------------------------------------------------------------------

/// Raw counts at pH 7 and per pH unit, matching the hub's default pH
/// calibration (2900 / 2500 / 2100 at pH 4 / 7 / 10).
const PH_NEUTRAL_RAW: f64 = 2500.0;
const PH_COUNTS_PER_UNIT: f64 = 400.0 / 3.0;

pub fn ph_to_raw(ph: f64) -> f64 {
    PH_NEUTRAL_RAW - (ph - 7.0) * PH_COUNTS_PER_UNIT
}

// ---------------------------------------------------------------------------
// Scenario presets
// ---------------------------------------------------------------------------

/// Selected via the `SIM_SCENARIO` env var.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Float valve keeps the reservoir topped up, pH hovers around 6.0.
    Steady,
    /// Fast consumption and no top-up: walks down into the low and
    /// critical water alerts.
    Draining,
    /// pH creeps upward until the high-pH alerts fire.
    Drifting,
    /// Noisy probes, spikes and dropped readings.
    Flaky,
}

impl Scenario {
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "draining" => Self::Draining,
            "drifting" => Self::Drifting,
            "flaky" => Self::Flaky,
            _ => Self::Steady,
        }
    }

    /// (consumption per second as a fill fraction, pH drift per second,
    /// noise multiplier, spike/drop probability, float valve fitted)
    fn params(self) -> (f64, f64, f64, f32, bool) {
        match self {
            Self::Steady => (0.000_02, 0.0, 1.0, 0.0, true),
            Self::Draining => (0.000_5, 0.0, 1.0, 0.0, false),
            Self::Drifting => (0.000_02, 0.002, 1.0, 0.0, true),
            Self::Flaky => (0.000_02, 0.0, 4.0, 0.08, true),
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Steady => write!(f, "steady"),
            Self::Draining => write!(f, "draining"),
            Self::Drifting => write!(f, "drifting"),
            Self::Flaky => write!(f, "flaky"),
        }
    }
}

// ---------------------------------------------------------------------------
// Published sample
// ---------------------------------------------------------------------------

/// One sensor message, in the shape the hub decodes from
/// `hydroponics/<device>/sensors`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Sample {
    pub ts: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub liquid_raw: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ph_raw: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

// ---------------------------------------------------------------------------
// Simulator
// ---------------------------------------------------------------------------

/// Water held in the tower while the pump runs, as a fill fraction.
const TOWER_HOLDUP: f64 = 0.08;
/// Time constant for the tower filling and draining back, seconds.
const HOLDUP_TAU_S: f64 = 60.0;
const REFILL_BELOW: f64 = 0.6;
const REFILL_TO: f64 = 0.95;
const BASE_TDS_PPM: f64 = 800.0;
const AMBIENT_C: f64 = 21.0;

pub struct ReservoirSim {
    scenario: Scenario,
    /// Load-cell counts for an empty and a full reservoir.
    dry_raw: f64,
    full_raw: f64,

    /// Fill fraction of the whole system (reservoir plus tower).
    level: f64,
    /// Fraction currently up in the tower.
    in_flight: f64,
    ph: f64,
    temperature: f64,
    pumping: bool,
}

impl ReservoirSim {
    pub fn new(scenario: Scenario, dry_raw: f64, full_raw: f64) -> Self {
        Self {
            scenario,
            dry_raw,
            full_raw,
            level: REFILL_TO + gaussian(0.0, 0.01),
            in_flight: 0.0,
            ph: 6.0 + gaussian(0.0, 0.05),
            temperature: AMBIENT_C + gaussian(0.0, 0.5),
            pumping: false,
        }
    }

    /// Follow the hub's retained pump state.
    pub fn set_pumping(&mut self, on: bool) {
        self.pumping = on;
    }

    /// Fill fraction of the reservoir as the load cell sees it.
    pub fn reservoir_fraction(&self) -> f64 {
        (self.level - self.in_flight).clamp(0.0, 1.0)
    }

    pub fn ph(&self) -> f64 {
        self.ph
    }

    /// Advance the model by `dt_s` seconds and produce the next message.
    pub fn sample(&mut self, ts: i64, dt_s: f64) -> Sample {
        let (consumption, ph_drift, noise, flake, float_valve) = self.scenario.params();

        // -- Evolve ---------------------------------------------------------

        let target = if self.pumping { TOWER_HOLDUP } else { 0.0 };
        let k = 1.0 - (-dt_s / HOLDUP_TAU_S).exp();
        self.in_flight += (target - self.in_flight) * k;

        self.level = (self.level - consumption * dt_s).max(0.0);
        if float_valve && self.level < REFILL_BELOW {
            self.level = REFILL_TO;
        }

        self.ph = (self.ph + ph_drift * dt_s + gaussian(0.0, 0.005 * dt_s.sqrt())).clamp(3.0, 9.0);
        self.temperature += 0.02 * (AMBIENT_C - self.temperature) * dt_s.min(50.0)
            + gaussian(0.0, 0.02 * dt_s.sqrt());

        // -- Measure --------------------------------------------------------

        let fraction = self.reservoir_fraction();
        let range = self.full_raw - self.dry_raw;
        let liquid = self.dry_raw + range * fraction + gaussian(0.0, range.abs() * 0.002 * noise);

        // Less water, same nutrient mass: concentration rises.
        let tds = BASE_TDS_PPM * (REFILL_TO / fraction.max(0.05)) + gaussian(0.0, 5.0 * noise);
        let ph_raw = ph_to_raw(self.ph) + gaussian(0.0, 2.0 * noise);
        let temperature = self.temperature + gaussian(0.0, 0.05 * noise);

        Sample {
            ts,
            liquid_raw: self.flaky(flake, liquid, range.abs() * 0.3),
            ph_raw: self.flaky(flake, ph_raw, 300.0),
            tds: self.flaky(flake, tds.max(0.0), 400.0),
            temperature: self.flaky(flake, temperature, 5.0),
        }
    }

    /// Drop the reading or add a spike with probability `p` each.
    fn flaky(&self, p: f32, value: f64, spike_sigma: f64) -> Option<f64> {
        if p > 0.0 && fastrand::f32() < p {
            return None;
        }
        if p > 0.0 && fastrand::f32() < p {
            return Some(value + gaussian(0.0, spike_sigma));
        }
        Some(value)
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const DRY: f64 = 120_000.0;
    const FULL: f64 = 520_000.0;

    fn mean_liquid(sim: &mut ReservoirSim, n: usize, dt: f64) -> f64 {
        (0..n)
            .map(|_| sim.sample(0, dt).liquid_raw.unwrap())
            .sum::<f64>()
            / n as f64
    }

    #[test]
    fn ph_raw_matches_default_calibration_anchors() {
        assert!((ph_to_raw(4.0) - 2900.0).abs() < 1e-9);
        assert!((ph_to_raw(7.0) - 2500.0).abs() < 1e-9);
        assert!((ph_to_raw(10.0) - 2100.0).abs() < 1e-9);
    }

    #[test]
    fn steady_readings_stay_plausible() {
        let mut sim = ReservoirSim::new(Scenario::Steady, DRY, FULL);
        for _ in 0..500 {
            let s = sim.sample(0, 5.0);
            let liquid = s.liquid_raw.unwrap();
            assert!(liquid > DRY && liquid < FULL + 5_000.0, "liquid {liquid}");
            let ph_raw = s.ph_raw.unwrap();
            assert!((2100.0..2900.0).contains(&ph_raw), "ph_raw {ph_raw}");
            assert!(s.tds.unwrap() > 0.0);
        }
    }

    #[test]
    fn pumping_draws_reservoir_down_and_it_recovers() {
        let mut sim = ReservoirSim::new(Scenario::Steady, DRY, FULL);
        let before = mean_liquid(&mut sim, 10, 1.0);

        sim.set_pumping(true);
        for _ in 0..300 {
            sim.sample(0, 1.0);
        }
        let pumping = mean_liquid(&mut sim, 10, 1.0);
        assert!(pumping < before - 0.05 * (FULL - DRY), "before={before:.0} pumping={pumping:.0}");

        sim.set_pumping(false);
        for _ in 0..600 {
            sim.sample(0, 1.0);
        }
        let after = mean_liquid(&mut sim, 10, 1.0);
        assert!(after > pumping, "pumping={pumping:.0} after={after:.0}");
    }

    #[test]
    fn draining_scenario_runs_dry_without_top_up() {
        let mut sim = ReservoirSim::new(Scenario::Draining, DRY, FULL);
        for _ in 0..400 {
            sim.sample(0, 5.0);
        }
        assert!(sim.reservoir_fraction() < 0.1, "fraction {}", sim.reservoir_fraction());
    }

    #[test]
    fn float_valve_tops_up() {
        let mut sim = ReservoirSim::new(Scenario::Steady, DRY, FULL);
        sim.level = REFILL_BELOW + 0.001;
        sim.sample(0, 120.0);
        assert!(sim.reservoir_fraction() > 0.9);
    }

    #[test]
    fn drifting_scenario_raises_ph() {
        let mut sim = ReservoirSim::new(Scenario::Drifting, DRY, FULL);
        let start = sim.ph();
        for _ in 0..200 {
            sim.sample(0, 5.0);
        }
        assert!(sim.ph() > start + 1.0, "start={start:.2} now={:.2}", sim.ph());
    }

    #[test]
    fn flaky_scenario_drops_some_readings() {
        let mut sim = ReservoirSim::new(Scenario::Flaky, DRY, FULL);
        let dropped = (0..500)
            .map(|_| sim.sample(0, 5.0))
            .filter(|s| s.liquid_raw.is_none())
            .count();
        assert!(dropped > 0, "flaky scenario should drop readings");
        assert!(dropped < 250, "too many drops: {dropped}");
    }

    #[test]
    fn sample_omits_missing_fields() {
        let s = Sample {
            ts: 1_700_000_000,
            liquid_raw: Some(300_000.0),
            ph_raw: None,
            tds: Some(820.0),
            temperature: None,
        };
        let json = serde_json::to_value(s).unwrap();
        assert_eq!(json["liquid_raw"], 300_000.0);
        assert!(json.get("ph_raw").is_none());
        assert_eq!(json.as_object().unwrap().len(), 3);
    }

    #[test]
    fn scenario_from_str_lossy() {
        assert_eq!(Scenario::from_str_lossy("DRAINING"), Scenario::Draining);
        assert_eq!(Scenario::from_str_lossy("drifting"), Scenario::Drifting);
        assert_eq!(Scenario::from_str_lossy("Flaky"), Scenario::Flaky);
        assert_eq!(Scenario::from_str_lossy(""), Scenario::Steady);
        assert_eq!(Scenario::Draining.to_string(), "draining");
    }
}
