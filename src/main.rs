use std::{f32::consts::TAU, sync::Arc, time::Duration};

use anyhow::Context;
use tai::{
	clock::{Clock, SessionClock},
	config::{AiMode, SlotConfig, TrafficConfig},
	network::{builder::NetworkBuilder, Vec3},
	traffic::{debug::LogSink, Environment, TrafficCoordinator},
	vehicle::status::CarStatus,
};
use tokio::{sync::watch, time::interval};
use tracing::info;
use tracing_subscriber::EnvFilter;

const PLAYER_SESSION_ID: u8 = 0;
const RING_RADIUS: f32 = 400.0;
const PLAYER_SPEED: f32 = 25.0;

fn demo_config() -> TrafficConfig {
	TrafficConfig {
		seed: Some(42),
		ai_per_player_target_count: 12,
		slots: (1..=8)
			.map(|session_id| SlotConfig {
				session_id,
				ai_mode: AiMode::Fixed,
				..Default::default()
			})
			.collect(),
		..Default::default()
	}
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
		.init();

	let config = match std::env::args().nth(1) {
		Some(path) => TrafficConfig::load(&path).with_context(|| format!("loading traffic config {path}"))?,
		None => demo_config(),
	};
	config.validate().context("validating traffic config")?;

	// NETWORK

	let network = Arc::new(
		NetworkBuilder::ring_road(3, RING_RADIUS, 5.0, config.lane_width_meters).context("building ring road")?
	);
	info!(points = network.len(), "built {} m ring road", (TAU * RING_RADIUS) as u32);

	let clock = Arc::new(SessionClock::new());
	let coordinator = Arc::new(TrafficCoordinator::new(network, config, clock.clone(), Some(Arc::new(LogSink))));
	coordinator.set_environment(Environment {
		rain_intensity: 0.2,
		sun_altitude: Some(0.6),
		hour: Some(14),
	});

	// PLAYER

	coordinator.player_connected(PLAYER_SESSION_ID);
	let (shutdown_tx, shutdown_rx) = watch::channel(false);
	let player = {
		let coordinator = coordinator.clone();
		let clock = clock.clone();
		let mut shutdown = shutdown_rx.clone();
		tokio::spawn(async move {
			let mut ticker = interval(Duration::from_millis(50));
			loop {
				tokio::select! {
					_ = ticker.tick() => {}
					_ = shutdown.changed() => break,
				}
				let seconds = clock.now_ms() as f32 / 1000.0;
				let angle = seconds * PLAYER_SPEED / RING_RADIUS;
				let position = Vec3::new(RING_RADIUS * angle.cos(), 0.0, RING_RADIUS * angle.sin());
				let velocity = Vec3::new(-angle.sin(), 0.0, angle.cos()) * PLAYER_SPEED;
				coordinator.update_player(PLAYER_SESSION_ID, CarStatus {
					timestamp: clock.now_ms(),
					position,
					velocity,
					..Default::default()
				});
			}
		})
	};

	let loops = tokio::spawn(coordinator.clone().run(shutdown_rx));
	tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
	info!("shutting down");
	shutdown_tx.send(true).context("signalling shutdown")?;
	loops.await.context("joining traffic loops")?;
	player.await.context("joining player task")?;

	let metrics = coordinator.metrics();
	info!(
		ai_states = metrics.ai_state_count,
		updates = metrics.update.ticks,
		update_avg_us = metrics.update.average.as_micros() as u64,
		obstacle_ticks = metrics.obstacle_detection.ticks,
		obstacle_avg_us = metrics.obstacle_detection.average.as_micros() as u64,
		"final metrics"
	);
	Ok(())
}
