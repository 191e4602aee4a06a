mod actuator;
mod alerts;
mod calibration;
mod config;
mod control;
mod cycle;
mod db;
mod error;
mod irrigation;
mod lights;
mod mqtt;
mod profile;
mod relay;
mod report;
mod scheduler;
mod state;
mod web;

use anyhow::Result;
use rumqttc::{AsyncClient, MqttOptions};
use std::{env, time::Duration};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use control::Controller;
use db::Db;
use mqtt::{Publisher, Topics};
use relay::RelayBoard;
use scheduler::ControlLoop;
use state::SystemState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // ── Env config ──────────────────────────────────────────────────
    let broker = env::var("MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let mqtt_port: u16 = env::var("MQTT_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(1883);
    let web_port: u16 = env::var("WEB_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(8080);
    let db_url = env::var("DB_URL").unwrap_or_else(|_| "sqlite:hydro.db?mode=rwc".to_string());
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());

    let cfg = config::load(&config_path)?;

    // ── Database & persisted state ──────────────────────────────────
    let db = Db::connect(&db_url).await?;
    db.migrate().await?;

    let controller = Controller::load(&db, &cfg).await?;
    tracing::info!(
        device = %cfg.device_id,
        profiles = controller.store().list().len(),
        capacity = cfg.max_profiles,
        cycle_active = controller.cycle().active,
        "controller ready"
    );

    // ── Relay board ─────────────────────────────────────────────────
    // Many common relay boards are active-low. If yours is active-high, set false.
    let active_low = env::var("RELAY_ACTIVE_LOW")
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(true);

    let mut relays = RelayBoard::new(&cfg.relays, active_low)?;
    relays.all_off();

    // ── Shared state (ephemeral, for the web API) ───────────────────
    let shared = SystemState::shared();
    shared
        .write()
        .await
        .record_system("hub started".to_string());

    // ── MQTT ────────────────────────────────────────────────────────
    let topics = Topics::new(&cfg.device_id);
    let mut mqttoptions = MqttOptions::new(format!("hydro-hub-{}", cfg.device_id), broker, mqtt_port);
    mqttoptions.set_keep_alive(Duration::from_secs(30));
    let (client, eventloop) = AsyncClient::new(mqttoptions, 64);

    let (tx, rx) = mpsc::channel(32);

    tokio::spawn(mqtt::run_inbound(
        eventloop,
        client.clone(),
        topics.clone(),
        tx.clone(),
        shared.clone(),
    ));

    // ── Web server ──────────────────────────────────────────────────
    let web_state = web::AppState {
        shared: shared.clone(),
        commands: tx,
    };
    tokio::spawn(web::serve(web_state, web_port));

    // ── Control loop (owns the controller, relays and database) ─────
    ControlLoop::new(controller, db, relays, Publisher::new(client, topics), shared)
        .run(rx, Duration::from_millis(cfg.tick_interval_ms))
        .await;

    Ok(())
}
