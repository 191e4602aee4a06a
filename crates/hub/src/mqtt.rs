//! MQTT topics, payload helpers and the broker-facing tasks.
//!
//! Outbound telemetry goes to `hydroponics/<device>/<key>`; the sensor node
//! publishes readings to `hydroponics/<device>/sensors`, and manual overrides
//! arrive on `hydroponics/<device>/{pump,lights}/set`.

use rumqttc::{AsyncClient, Event, EventLoop, Packet, QoS};
use serde_json::json;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;

use crate::actuator::{ActuatorKind, Transition};
use crate::alerts::Alert;
use crate::control::{CalibratedReadings, SensorSnapshot};
use crate::scheduler::Command;
use crate::state::SharedState;

// ---------------------------------------------------------------------------
// Topics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Topics {
    device_id: String,
    prefix: String,
}

/// What an inbound publish is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Inbound {
    Sensors,
    Set(ActuatorKind),
}

impl Topics {
    pub fn new(device_id: &str) -> Self {
        Self {
            device_id: device_id.to_string(),
            prefix: format!("hydroponics/{device_id}"),
        }
    }

    fn topic(&self, key: &str) -> String {
        format!("{}/{key}", self.prefix)
    }

    pub fn sensors(&self) -> String {
        self.topic("sensors")
    }

    pub fn set(&self, actuator: ActuatorKind) -> String {
        self.topic(&format!("{actuator}/set"))
    }

    pub fn state(&self, actuator: ActuatorKind) -> String {
        match actuator {
            ActuatorKind::Pump => self.topic("pump_state"),
            ActuatorKind::Lights => self.topic("lights_state"),
        }
    }

    pub fn alerts(&self) -> String {
        self.topic("alerts")
    }

    /// Classify an inbound topic. `None` for anything we do not handle.
    pub(crate) fn classify(&self, topic: &str) -> Option<Inbound> {
        let rest = topic.strip_prefix(&self.prefix)?.strip_prefix('/')?;
        let parts: Vec<&str> = rest.split('/').collect();
        match parts.as_slice() {
            ["sensors"] => Some(Inbound::Sensors),
            [actuator, "set"] => actuator.parse().ok().map(Inbound::Set),
            _ => None,
        }
    }

    /// Home-Assistant discovery documents, published retained on connect.
    pub(crate) fn discovery(&self) -> Vec<(String, serde_json::Value)> {
        let dev = &self.device_id;
        let device = json!({ "identifiers": [dev], "name": format!("Hydroponics {dev}") });

        let sensor = |key: &str, name: &str, unit: &str, icon: &str| {
            (
                format!("homeassistant/sensor/{dev}/{key}/config"),
                json!({
                    "name": name,
                    "uniq_id": format!("{dev}_{key}"),
                    "stat_t": self.topic(key),
                    "unit_of_meas": unit,
                    "ic": icon,
                    "dev": device,
                }),
            )
        };
        let switch = |actuator: ActuatorKind, name: &str, icon: &str| {
            (
                format!("homeassistant/switch/{dev}/{actuator}/config"),
                json!({
                    "name": name,
                    "uniq_id": format!("{dev}_{actuator}"),
                    "stat_t": self.state(actuator),
                    "cmd_t": self.set(actuator),
                    "ic": icon,
                    "dev": device,
                }),
            )
        };

        vec![
            sensor("liquid_level", "Liquid Level", "%", "mdi:water-percent"),
            sensor("ph_value", "pH Value", "pH", "mdi:ph"),
            sensor("tds_value", "TDS Value", "ppm", "mdi:water"),
            sensor("temperature_value", "Temperature", "°C", "mdi:thermometer"),
            switch(ActuatorKind::Pump, "Pump", "mdi:pump"),
            switch(ActuatorKind::Lights, "Grow Lights", "mdi:lightbulb"),
        ]
    }
}

// ---------------------------------------------------------------------------
// Payload helpers
// ---------------------------------------------------------------------------

/// Parse an "ON"/"OFF" payload into a bool (case-insensitive, trims whitespace).
pub(crate) fn parse_switch_command(payload: &[u8]) -> Result<bool, String> {
    let s = String::from_utf8_lossy(payload).trim().to_uppercase();
    match s.as_str() {
        "ON" => Ok(true),
        "OFF" => Ok(false),
        _ => Err(format!("unknown switch command '{s}'")),
    }
}

pub(crate) fn switch_payload(on: bool) -> &'static str {
    if on {
        "ON"
    } else {
        "OFF"
    }
}

/// Telemetry messages for the defined readings, as (topic key, payload).
pub(crate) fn reading_payloads(r: &CalibratedReadings) -> Vec<(&'static str, String)> {
    let mut out = Vec::new();
    if let Some(pct) = r.liquid_percent {
        out.push(("liquid_level", format!("{}", pct.round() as i64)));
    }
    if let Some(ph) = r.ph {
        out.push(("ph_value", format!("{ph:.2}")));
    }
    if let Some(tds) = r.tds {
        out.push(("tds_value", format!("{tds:.0}")));
    }
    if let Some(t) = r.temperature {
        out.push(("temperature_value", format!("{t:.1}")));
    }
    out
}

/// Turn an inbound publish into a control-loop command.
pub(crate) fn command_for(topics: &Topics, topic: &str, payload: &[u8]) -> Result<Command, String> {
    match topics.classify(topic) {
        Some(Inbound::Sensors) => serde_json::from_slice::<SensorSnapshot>(payload)
            .map(Command::Readings)
            .map_err(|e| format!("bad sensor json: {e} topic={topic}")),
        Some(Inbound::Set(actuator)) => parse_switch_command(payload)
            .map(|on| Command::SetActuator { actuator, on })
            .map_err(|e| format!("{e} (use ON/OFF) topic={topic}")),
        None => Err(format!("unhandled topic={topic}")),
    }
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// Non-blocking publisher used by the control loop. A full client queue
/// drops the message rather than stalling a tick.
#[derive(Clone)]
pub struct Publisher {
    client: AsyncClient,
    topics: Topics,
}

impl Publisher {
    pub fn new(client: AsyncClient, topics: Topics) -> Self {
        Self { client, topics }
    }

    fn send(&self, topic: String, qos: QoS, retain: bool, payload: impl Into<Vec<u8>>) {
        if let Err(e) = self.client.try_publish(&topic, qos, retain, payload) {
            tracing::warn!(%topic, error = %e, "mqtt publish dropped");
        }
    }

    pub fn readings(&self, r: &CalibratedReadings) {
        for (key, payload) in reading_payloads(r) {
            self.send(self.topics.topic(key), QoS::AtMostOnce, false, payload);
        }
    }

    pub fn transition(&self, t: &Transition) {
        self.send(
            self.topics.state(t.actuator),
            QoS::AtLeastOnce,
            true,
            switch_payload(t.on),
        );
    }

    pub fn alert(&self, alert: &Alert) {
        self.send(
            self.topics.alerts(),
            QoS::AtLeastOnce,
            false,
            alert.message.clone(),
        );
    }
}

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// Poll the broker connection forever, forwarding sensor readings and manual
/// overrides to the control loop. Intended to be `tokio::spawn`-ed from main.
pub async fn run_inbound(
    mut eventloop: EventLoop,
    client: AsyncClient,
    topics: Topics,
    commands: mpsc::Sender<Command>,
    shared: SharedState,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(p))) => {
                match command_for(&topics, &p.topic, &p.payload) {
                    Ok(cmd) => {
                        if commands.send(cmd).await.is_err() {
                            tracing::info!("control loop gone, stopping mqtt task");
                            return;
                        }
                    }
                    Err(msg) => {
                        tracing::warn!("{msg}");
                        shared.write().await.record_error(msg);
                    }
                }
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                tracing::info!("mqtt connected");
                subscribe_and_announce(&client, &topics);
                let mut st = shared.write().await;
                st.mqtt_connected = true;
                st.record_system("mqtt connected".to_string());
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                tracing::warn!("mqtt disconnected");
                let mut st = shared.write().await;
                st.mqtt_connected = false;
                st.record_system("mqtt disconnected".to_string());
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(error = %e, "mqtt error, reconnecting");
                {
                    let mut st = shared.write().await;
                    st.mqtt_connected = false;
                    st.record_error(format!("mqtt error: {e}"));
                }
                sleep(Duration::from_secs(2)).await;
            }
        }
    }
}

/// Runs on every ConnAck: subscriptions do not survive a clean reconnect.
/// Uses the non-blocking calls since this runs on the task that drains the
/// client's request queue.
fn subscribe_and_announce(client: &AsyncClient, topics: &Topics) {
    let subs = [
        topics.sensors(),
        topics.set(ActuatorKind::Pump),
        topics.set(ActuatorKind::Lights),
    ];
    for topic in subs {
        if let Err(e) = client.try_subscribe(&topic, QoS::AtLeastOnce) {
            tracing::error!(%topic, error = %e, "mqtt subscribe failed");
        }
    }
    for (topic, doc) in topics.discovery() {
        if let Err(e) = client.try_publish(&topic, QoS::AtLeastOnce, true, doc.to_string()) {
            tracing::warn!(%topic, error = %e, "discovery publish failed");
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
