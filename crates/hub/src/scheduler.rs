//! The control loop task. Owns the [`Controller`] and is the only place its
//! state changes: once per tick, or when a command arrives from the web API
//! or the MQTT task.
//!
//! ```text
//!   interval ──tick──┐
//!                    ▼
//!   mpsc<Command> ─▶ ControlLoop ─▶ relays
//!     (web, mqtt)        │      └──▶ mqtt telemetry
//!                        └────────▶ SharedState snapshots + events
//! ```

use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::actuator::{ActuatorKind, Transition};
use crate::calibration::{LiquidCalibration, PhCalibration};
use crate::control::{ControlEvent, Controller, SensorSnapshot};
use crate::cycle::GrowthCycle;
use crate::db::Db;
use crate::error::AdminError;
use crate::mqtt::Publisher;
use crate::profile::GrowthProfile;
use crate::relay::RelayBoard;
use crate::state::SharedState;

pub type Reply<T> = oneshot::Sender<Result<T, AdminError>>;

/// Requests handled between ticks.
#[derive(Debug)]
pub enum Command {
    Readings(SensorSnapshot),
    SetActuator {
        actuator: ActuatorKind,
        on: bool,
    },
    /// Flip an actuator; replies with its new state.
    Toggle {
        actuator: ActuatorKind,
        reply: oneshot::Sender<bool>,
    },
    SaveProfile {
        profile: GrowthProfile,
        reply: Reply<()>,
    },
    StartCycle {
        profile_id: String,
        start_timestamp: Option<i64>,
        reply: Reply<GrowthCycle>,
    },
    StopCycle {
        reply: Reply<()>,
    },
    SetLiquidCalibration {
        calibration: LiquidCalibration,
        reply: Reply<()>,
    },
    SetPhCalibration {
        calibration: PhCalibration,
        reply: Reply<()>,
    },
}

pub fn now_unix() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

pub struct ControlLoop {
    controller: Controller,
    db: Db,
    relays: RelayBoard,
    publisher: Publisher,
    shared: SharedState,
}

impl ControlLoop {
    pub(crate) fn new(
        controller: Controller,
        db: Db,
        relays: RelayBoard,
        publisher: Publisher,
        shared: SharedState,
    ) -> Self {
        Self {
            controller,
            db,
            relays,
            publisher,
            shared,
        }
    }

    /// Run until every command sender is dropped, then switch all relays off.
    pub async fn run(mut self, mut commands: mpsc::Receiver<Command>, tick: Duration) {
        let mut ticker = tokio::time::interval(tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(tick_ms = tick.as_millis() as u64, "control loop started");
        self.shared
            .write()
            .await
            .record_system("control loop started".to_string());

        loop {
            tokio::select! {
                _ = ticker.tick() => self.on_tick(now_unix()).await,
                cmd = commands.recv() => match cmd {
                    Some(cmd) => self.apply_command(cmd, now_unix()).await,
                    None => break,
                },
            }
        }

        info!("command channel closed, stopping control loop");
        self.relays.all_off();
        self.db.close().await;
    }

    pub(crate) async fn on_tick(&mut self, now: i64) {
        let report = self.controller.tick(now);
        self.publisher.readings(&report.readings);

        for event in &report.events {
            match event {
                ControlEvent::Actuator(t) => self.drive(t),
                ControlEvent::Alert { alert, .. } => self.publisher.alert(alert),
            }
        }

        let mut st = self.shared.write().await;
        for event in &report.events {
            match event {
                ControlEvent::Actuator(t) => st.record_transition(t),
                ControlEvent::Alert { alert, .. } => st.record_alert(alert),
            }
        }
        st.status = Some(self.controller.status(now));
        st.profiles = Some(self.controller.profiles_report(now));
        st.calibration = Some(self.controller.calibration_report());
    }

    pub(crate) async fn apply_command(&mut self, cmd: Command, now: i64) {
        match cmd {
            Command::Readings(snapshot) => {
                self.controller.record_readings(snapshot, now);
            }
            Command::SetActuator { actuator, on } => {
                let t = self.controller.set_actuator(actuator, on, now);
                self.apply_transitions(t.into_iter().collect(), now).await;
            }
            Command::Toggle { actuator, reply } => {
                let t = self.controller.toggle_actuator(actuator, now);
                self.apply_transitions(t.into_iter().collect(), now).await;
                let _ = reply.send(self.controller.is_on(actuator));
            }
            Command::SaveProfile { profile, reply } => {
                let id = profile.id.clone();
                let result = self.controller.save_profile(&self.db, profile).await;
                self.finish_admin(format!("profile '{id}' saved"), &result, now).await;
                let _ = reply.send(result);
            }
            Command::StartCycle {
                profile_id,
                start_timestamp,
                reply,
            } => {
                let result = self
                    .controller
                    .start_cycle(&self.db, &profile_id, start_timestamp, now)
                    .await;
                self.finish_admin(format!("cycle started with '{profile_id}'"), &result, now)
                    .await;
                let _ = reply.send(result);
            }
            Command::StopCycle { reply } => {
                let result = match self.controller.stop_cycle(&self.db, now).await {
                    Ok(transitions) => {
                        self.apply_transitions(transitions, now).await;
                        Ok(())
                    }
                    Err(e) => Err(e),
                };
                self.finish_admin("cycle stopped".to_string(), &result, now).await;
                let _ = reply.send(result);
            }
            Command::SetLiquidCalibration { calibration, reply } => {
                let result = self
                    .controller
                    .set_liquid_calibration(&self.db, calibration)
                    .await;
                self.finish_admin("liquid calibration updated".to_string(), &result, now)
                    .await;
                let _ = reply.send(result);
            }
            Command::SetPhCalibration { calibration, reply } => {
                let result = self
                    .controller
                    .set_ph_calibration(&self.db, calibration)
                    .await;
                self.finish_admin("pH calibration updated".to_string(), &result, now)
                    .await;
                let _ = reply.send(result);
            }
        }
    }

    fn drive(&mut self, t: &Transition) {
        self.relays.set(t.actuator, t.on);
        self.publisher.transition(t);
    }

    async fn apply_transitions(&mut self, transitions: Vec<Transition>, now: i64) {
        for t in &transitions {
            self.drive(t);
        }
        let mut st = self.shared.write().await;
        for t in &transitions {
            st.record_transition(t);
        }
        st.status = Some(self.controller.status(now));
    }

    /// Log the outcome of an administrative operation and refresh the
    /// snapshots the web API serves.
    async fn finish_admin<T>(&self, detail: String, result: &Result<T, AdminError>, now: i64) {
        let mut st = self.shared.write().await;
        match result {
            Ok(_) => st.record_admin(detail),
            Err(e) => {
                warn!(code = e.code(), error = %e, "administrative operation rejected");
                st.record_error(format!("{}: {e}", e.code()));
            }
        }
        st.status = Some(self.controller.status(now));
        st.profiles = Some(self.controller.profiles_report(now));
        st.calibration = Some(self.controller.calibration_report());
    }
}

// ===========================================================================
// Tests
// ===========================================================================
