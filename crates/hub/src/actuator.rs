use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActuatorKind {
    Pump,
    Lights,
}

impl fmt::Display for ActuatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pump => write!(f, "pump"),
            Self::Lights => write!(f, "lights"),
        }
    }
}

impl std::str::FromStr for ActuatorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pump" => Ok(Self::Pump),
            "lights" => Ok(Self::Lights),
            other => Err(format!("unknown actuator '{other}'")),
        }
    }
}

/// A change of an actuator's energized state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub actuator: ActuatorKind,
    pub on: bool,
    pub at: i64,
}

/// Logical state of one relay-driven output. Starts de-energized; only the
/// control loop mutates it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actuator {
    kind: ActuatorKind,
    energized: bool,
}

impl Actuator {
    pub fn new(kind: ActuatorKind) -> Self {
        Self {
            kind,
            energized: false,
        }
    }

    pub fn is_on(&self) -> bool {
        self.energized
    }

    /// Set the state, returning a transition only when it actually changed.
    pub fn set(&mut self, on: bool, at: i64) -> Option<Transition> {
        if self.energized == on {
            return None;
        }
        self.energized = on;
        Some(Transition {
            actuator: self.kind,
            on,
            at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_off() {
        assert!(!Actuator::new(ActuatorKind::Pump).is_on());
    }

    #[test]
    fn set_reports_only_changes() {
        let mut pump = Actuator::new(ActuatorKind::Pump);
        assert_eq!(pump.set(false, 1), None);
        assert_eq!(
            pump.set(true, 2),
            Some(Transition {
                actuator: ActuatorKind::Pump,
                on: true,
                at: 2
            })
        );
        assert_eq!(pump.set(true, 3), None);
        assert!(pump.set(false, 4).is_some());
    }

    #[test]
    fn kind_parses_case_insensitive() {
        assert_eq!("Lights".parse::<ActuatorKind>(), Ok(ActuatorKind::Lights));
        assert_eq!("pump".parse::<ActuatorKind>(), Ok(ActuatorKind::Pump));
        assert!("fan".parse::<ActuatorKind>().is_err());
    }
}
