use std::{sync::Arc, time::Duration};

use tai::{
	clock::{ManualClock, SessionClock},
	config::{AiMode, SlotConfig, TrafficConfig},
	network::{builder::NetworkBuilder, Vec3},
	traffic::{CollisionEvent, Environment},
	vehicle::status::CarStatus,
	TrafficCoordinator,
};
use tokio::sync::watch;

const PLAYER: u8 = 10;
const AI: u8 = 0;

fn config() -> TrafficConfig {
	TrafficConfig {
		seed: Some(9),
		slots: vec![SlotConfig {
			session_id: AI,
			ai_mode: AiMode::Fixed,
			..Default::default()
		}],
		..Default::default()
	}
}

fn road() -> Arc<tai::network::Network> {
	Arc::new(NetworkBuilder::straight_road(1, 3000.0, 5.0, 3.0).unwrap())
}

fn driving_at(z: f32) -> CarStatus {
	CarStatus {
		position: Vec3::new(0.0, 0.0, z),
		velocity: Vec3::new(0.0, 0.0, 20.0),
		..Default::default()
	}
}

#[tokio::test(start_paused = true)]
async fn collision_report_for_a_respawned_car_is_dropped() {
	let clock = Arc::new(ManualClock::new(0));
	let coordinator = TrafficCoordinator::new(road(), config(), clock, None);
	coordinator.player_connected(PLAYER);
	coordinator.update_player(PLAYER, driving_at(5.0));

	let handle = coordinator.slot(AI).unwrap().states()[0].clone();
	assert!(handle.state.lock().teleport(0, 0, &Environment::default()));

	let event = CollisionEvent { sender: PLAYER, target: Some(AI), speed: 4.0 };
	let pending = coordinator.on_collision(event).unwrap();
	// respawned before the reaction delay ran out
	assert!(handle.state.lock().teleport(2, 0, &Environment::default()));
	assert!(!pending.await.unwrap());

	let pending = coordinator.on_collision(event).unwrap();
	assert!(pending.await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn collisions_far_from_the_ai_are_ignored() {
	let clock = Arc::new(ManualClock::new(0));
	let coordinator = TrafficCoordinator::new(road(), config(), clock, None);
	coordinator.player_connected(PLAYER);
	coordinator.update_player(PLAYER, driving_at(500.0));
	let handle = coordinator.slot(AI).unwrap().states()[0].clone();
	handle.state.lock().teleport(0, 0, &Environment::default());

	assert!(coordinator.on_collision(CollisionEvent { sender: PLAYER, target: Some(AI), speed: 4.0 }).is_none());
	assert!(coordinator.on_collision(CollisionEvent { sender: PLAYER, target: None, speed: 4.0 }).is_none());
}

#[test]
fn spawn_protection_delays_respawning() {
	let clock = Arc::new(ManualClock::new(0));
	let coordinator = TrafficCoordinator::new(road(), config(), clock, None);
	coordinator.player_connected(PLAYER);
	coordinator.update_player(PLAYER, driving_at(2500.0));
	let handle = coordinator.slot(AI).unwrap().states()[0].clone();
	handle.state.lock().teleport(0, 0, &Environment::default());

	let players = coordinator.players().all();
	assert!(coordinator.respawn_candidates(0, &players).is_empty());

	let candidates = coordinator.respawn_candidates(9_000, &players);
	assert_eq!(candidates.len(), 1);
	assert!(Arc::ptr_eq(&candidates[0].1.shared, &handle.shared));
}

#[test]
fn cars_near_a_player_are_kept() {
	let clock = Arc::new(ManualClock::new(0));
	let coordinator = TrafficCoordinator::new(road(), config(), clock, None);
	coordinator.player_connected(PLAYER);
	coordinator.update_player(PLAYER, driving_at(50.0));
	let handle = coordinator.slot(AI).unwrap().states()[0].clone();
	handle.state.lock().teleport(0, 0, &Environment::default());

	let players = coordinator.players().all();
	assert!(coordinator.respawn_candidates(9_000, &players).is_empty());
}

#[test]
fn last_player_leaving_clears_the_population() {
	let clock = Arc::new(ManualClock::new(0));
	let coordinator = TrafficCoordinator::new(road(), config(), clock, None);
	coordinator.player_connected(PLAYER);
	let handle = coordinator.slot(AI).unwrap().states()[0].clone();
	handle.state.lock().teleport(0, 0, &Environment::default());

	coordinator.player_disconnected(PLAYER);
	assert!(coordinator.slot(AI).unwrap().states().is_empty());
	assert!(!handle.shared.snapshot().initialized);
	assert!(coordinator.network().slowest.get(0).is_none());
}

#[tokio::test(start_paused = true)]
async fn loops_tick_until_shutdown() {
	let clock = Arc::new(SessionClock::new());
	let coordinator = Arc::new(TrafficCoordinator::new(road(), config(), clock, None));
	coordinator.player_connected(PLAYER);
	coordinator.update_player(PLAYER, driving_at(100.0));

	let (shutdown_tx, shutdown_rx) = watch::channel(false);
	let loops = tokio::spawn(coordinator.clone().run(shutdown_rx));
	tokio::time::sleep(Duration::from_secs(3)).await;
	shutdown_tx.send(true).unwrap();
	loops.await.unwrap();

	let metrics = coordinator.metrics();
	assert!(metrics.update.ticks >= 2);
	assert!(metrics.obstacle_detection.ticks >= 10);
	assert_eq!(metrics.ai_state_count, 1);
}

#[test]
fn sample_config_loads() {
	let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/traffic.ron");
	let config = TrafficConfig::load(path).unwrap();
	assert_eq!(config.seed, Some(7));
	assert_eq!(config.slots.len(), 6);
	assert_eq!(config.max_ai_target_count, 40);
	assert!(config.enable_lane_changing);
}
