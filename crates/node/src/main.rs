//! Sensor node: publishes reservoir readings for the hub.
//!
//! With no probes attached it runs the [`sim::ReservoirSim`] model, which
//! follows the hub's retained pump state so the reservoir reacts to
//! watering.

mod sim;

use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::{env, time::Duration};
use time::OffsetDateTime;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

use sim::{ReservoirSim, Scenario};

fn now_unix() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn sensors_topic(device_id: &str) -> String {
    format!("hydroponics/{device_id}/sensors")
}

fn pump_state_topic(device_id: &str) -> String {
    format!("hydroponics/{device_id}/pump_state")
}

/// `ON`/`OFF` as published by the hub; anything else is ignored.
fn parse_pump_state(payload: &[u8]) -> Option<bool> {
    match String::from_utf8_lossy(payload).trim().to_uppercase().as_str() {
        "ON" => Some(true),
        "OFF" => Some(false),
        _ => None,
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let broker = env::var("MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port: u16 = env_or("MQTT_PORT", 1883);
    let device_id = env::var("DEVICE_ID").unwrap_or_else(|_| "tower1".to_string());
    let sample_every_s: u64 = env_or("SAMPLE_EVERY_S", 5);
    let scenario = Scenario::from_str_lossy(&env::var("SIM_SCENARIO").unwrap_or_default());
    let dry_raw: f64 = env_or("SIM_DRY_RAW", 120_000.0);
    let full_raw: f64 = env_or("SIM_FULL_RAW", 520_000.0);

    let mut mqttoptions = MqttOptions::new(format!("hydro-node-{device_id}"), broker, port);
    mqttoptions.set_keep_alive(Duration::from_secs(30));
    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 10);

    let pumping = Arc::new(AtomicBool::new(false));

    // Inbound: (re)subscribe on every connect and track the pump state.
    let state_topic = pump_state_topic(&device_id);
    let sub_client = client.clone();
    let pump_flag = Arc::clone(&pumping);
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    tracing::info!("node connected to mqtt");
                    if let Err(e) = sub_client.try_subscribe(state_topic.as_str(), QoS::AtLeastOnce) {
                        tracing::warn!(error = %e, "subscribe failed");
                    }
                }
                Ok(Event::Incoming(Packet::Publish(p))) if p.topic == state_topic => {
                    if let Some(on) = parse_pump_state(&p.payload) {
                        tracing::debug!(on, "pump state");
                        pump_flag.store(on, Ordering::Relaxed);
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "mqtt error, retrying");
                    sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });

    let topic = sensors_topic(&device_id);
    let mut sim = ReservoirSim::new(scenario, dry_raw, full_raw);
    tracing::info!(%topic, %scenario, sample_every_s, "publishing simulated readings");

    loop {
        sim.set_pumping(pumping.load(Ordering::Relaxed));
        let sample = sim.sample(now_unix(), sample_every_s as f64);
        let payload = serde_json::to_vec(&sample)?;

        match client.publish(&topic, QoS::AtLeastOnce, false, payload).await {
            Ok(()) => tracing::debug!(ts = sample.ts, "published readings"),
            Err(e) => tracing::warn!(error = %e, "publish error"),
        }

        sleep(Duration::from_secs(sample_every_s)).await;
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topics_match_hub_layout() {
        assert_eq!(sensors_topic("tower1"), "hydroponics/tower1/sensors");
        assert_eq!(pump_state_topic("tower1"), "hydroponics/tower1/pump_state");
    }

    #[test]
    fn pump_state_payloads() {
        assert_eq!(parse_pump_state(b"ON"), Some(true));
        assert_eq!(parse_pump_state(b" off\n"), Some(false));
        assert_eq!(parse_pump_state(b"TOGGLE"), None);
    }

    #[test]
    fn now_unix_is_recent() {
        let ts = now_unix();
        assert!(ts > 1_704_067_200, "timestamp too old: {ts}");
        assert!(ts < 2_208_988_800, "timestamp too far in future: {ts}");
    }

    #[test]
    fn env_or_falls_back_on_missing_or_bad_values() {
        assert_eq!(env_or("HYDRO_NODE_TEST_UNSET_VAR", 42u64), 42);
    }
}
