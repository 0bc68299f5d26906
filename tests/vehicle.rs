use std::sync::Arc;

use tai::{
	config::{SlotConfig, TrafficConfig},
	network::{builder::NetworkBuilder, Network},
	traffic::{Environment, TickContext},
	vehicle::{profile::VehicleProfile, shared::{AiRef, AiShared}, status::CarStatusFlags, AiState},
};

fn state(network: &Arc<Network>, id: u32, seed: u64) -> AiState {
	let config = TrafficConfig::default();
	let slot = SlotConfig::default();
	let profile = Arc::new(VehicleProfile::resolve(&config, &slot));
	let shared = Arc::new(AiShared::new(id, id as u8, slot.vehicle_length_pre_meters, slot.vehicle_length_post_meters));
	AiState::new(shared, network.clone(), Arc::new(config), profile, seed, 0)
}

#[test]
fn slowest_car_owns_a_shared_point() {
	let network = Arc::new(NetworkBuilder::straight_road(1, 500.0, 5.0, 3.0).unwrap());
	let environment = Environment::default();
	let mut first = state(&network, 0, 1);
	let mut second = state(&network, 1, 2);
	assert!(first.teleport(5, 0, &environment));
	assert!(second.teleport(5, 0, &environment));

	let owner = network.slowest.get(5).unwrap();
	let expected = if second.current_speed() < first.current_speed() { second.shared() } else { first.shared() };
	assert!(Arc::ptr_eq(&owner, expected));

	// every other point stays empty
	for point in (0..network.len() as u32).filter(|&p| p != 5) {
		assert!(network.slowest.get(point).is_none());
	}
}

#[test]
fn despawn_mid_lane_change_leaves_no_registration() {
	let network = Arc::new(NetworkBuilder::straight_road(2, 1000.0, 5.0, 3.0).unwrap());
	let environment = Environment::default();
	let mut car = state(&network, 0, 3);
	let start = network.point(20).right;
	assert!(car.teleport(start, 0, &environment));

	let ai: Vec<AiRef> = vec![car.shared().clone()];
	let ctx = TickContext { now: 0, players: &[], ai: &ai, environment };
	assert!(car.begin_lane_change(20, false, &ctx));
	car.update(300, &environment);
	assert!(car.is_changing_lane());

	car.despawn();
	assert!(!car.is_initialized());
	assert!(!car.is_changing_lane());
	assert!(network.slowest.entries_of(car.shared()).is_empty());
	assert!(network.slowest.get(20).is_none());
	assert!(network.slowest.get(start).is_none());
	assert!(!car.shared().snapshot().initialized);
}

#[test]
fn dropping_a_state_releases_its_point() {
	let network = Arc::new(NetworkBuilder::straight_road(1, 500.0, 5.0, 3.0).unwrap());
	let mut car = state(&network, 0, 4);
	assert!(car.teleport(12, 0, &Environment::default()));
	assert!(network.slowest.get(12).is_some());
	drop(car);
	assert!(network.slowest.get(12).is_none());
}

#[test]
fn overtake_indicator_runs_out_after_the_clear_distance() {
	let network = Arc::new(NetworkBuilder::straight_road(2, 1000.0, 5.0, 3.0).unwrap());
	let environment = Environment::default();
	let mut car = state(&network, 0, 7);
	assert!(car.teleport(network.point(20).right, 0, &environment));

	let ai: Vec<AiRef> = vec![car.shared().clone()];
	let ctx = TickContext { now: 0, players: &[], ai: &ai, environment };
	assert!(car.begin_lane_change(20, true, &ctx));

	let mut now = 0;
	while car.is_changing_lane() {
		now += 50;
		car.update(now, &environment);
		assert!(car.indicator().contains(CarStatusFlags::INDICATE_LEFT));
	}
	assert!(!network.point(car.current_point()).has_left());

	let landed_z = car.status.position.z;
	while car.status.position.z - landed_z < 10.0 {
		now += 50;
		car.update(now, &environment);
	}
	assert!(car.indicator().contains(CarStatusFlags::INDICATE_LEFT));
	while car.status.position.z - landed_z < 30.0 {
		now += 50;
		car.update(now, &environment);
	}
	assert!(car.indicator().is_empty());
}
