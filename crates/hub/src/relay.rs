//! Pump and grow-light relays. The `gpio` feature gates the real rppal
//! driver; without it, a mock board only records and logs state.

use anyhow::Result;

use crate::actuator::ActuatorKind;
use crate::config::RelayConfig;

// ---------------------------------------------------------------------------
// Real GPIO relay board (requires rppal + Raspberry Pi hardware)
// ---------------------------------------------------------------------------
#[cfg(feature = "gpio")]
pub(crate) struct RelayBoard {
    pump: rppal::gpio::OutputPin,
    lights: rppal::gpio::OutputPin,
    active_low: bool,
}

#[cfg(feature = "gpio")]
impl RelayBoard {
    pub(crate) fn new(relays: &RelayConfig, active_low: bool) -> Result<Self> {
        let gpio = rppal::gpio::Gpio::new()?;
        let mut board = Self {
            pump: gpio.get(relays.pump_gpio)?.into_output(),
            lights: gpio.get(relays.lights_gpio)?.into_output(),
            active_low,
        };
        board.all_off();
        Ok(board)
    }

    pub(crate) fn set(&mut self, actuator: ActuatorKind, on: bool) {
        // active-low boards energize the coil on LOW
        let high = on != self.active_low;
        let pin = match actuator {
            ActuatorKind::Pump => &mut self.pump,
            ActuatorKind::Lights => &mut self.lights,
        };
        if high {
            pin.set_high();
        } else {
            pin.set_low();
        }
        tracing::info!(%actuator, on, gpio = pin.pin(), "relay set");
    }

    pub(crate) fn all_off(&mut self) {
        self.set(ActuatorKind::Pump, false);
        self.set(ActuatorKind::Lights, false);
    }
}

// ---------------------------------------------------------------------------
// Mock relay board (development: no hardware)
// ---------------------------------------------------------------------------
#[cfg(not(feature = "gpio"))]
pub(crate) struct RelayBoard {
    pub(super) pump: bool,
    pub(super) lights: bool,
}

#[cfg(not(feature = "gpio"))]
impl RelayBoard {
    pub(crate) fn new(relays: &RelayConfig, active_low: bool) -> Result<Self> {
        tracing::info!(
            pump_gpio = relays.pump_gpio,
            lights_gpio = relays.lights_gpio,
            active_low,
            "mock relay board initialised (no hardware)"
        );
        Ok(Self {
            pump: false,
            lights: false,
        })
    }

    pub(crate) fn set(&mut self, actuator: ActuatorKind, on: bool) {
        match actuator {
            ActuatorKind::Pump => self.pump = on,
            ActuatorKind::Lights => self.lights = on,
        }
        tracing::info!(%actuator, on, "[mock-gpio] relay set");
    }

    pub(crate) fn all_off(&mut self) {
        self.set(ActuatorKind::Pump, false);
        self.set(ActuatorKind::Lights, false);
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(all(test, not(feature = "gpio")))]
mod tests {
    use super::*;

    fn board() -> RelayBoard {
        RelayBoard::new(&RelayConfig::default(), true).unwrap()
    }

    #[test]
    fn starts_off() {
        let b = board();
        assert!(!b.pump);
        assert!(!b.lights);
    }

    #[test]
    fn set_drives_only_that_relay() {
        let mut b = board();
        b.set(ActuatorKind::Lights, true);
        assert!(b.lights);
        assert!(!b.pump);
    }

    #[test]
    fn all_off_resets_everything() {
        let mut b = board();
        b.set(ActuatorKind::Pump, true);
        b.set(ActuatorKind::Lights, true);
        b.all_off();
        assert!(!b.pump);
        assert!(!b.lights);
    }
}
