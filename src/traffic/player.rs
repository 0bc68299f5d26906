use std::collections::BTreeMap;

use parking_lot::RwLock;

use crate::vehicle::status::CarStatus;

/// Last known state of a human-driven car.
#[derive(Debug, Clone, Copy)]
pub struct PlayerCar {
	pub session_id: u8,
	pub status: CarStatus,
	pub has_sent_first_update: bool,
	pub collisions_enabled: bool,
	/// Session time of the last update that showed the driver doing something.
	pub last_active: i64,
}

impl PlayerCar {
	pub fn new(session_id: u8) -> Self {
		Self {
			session_id,
			status: CarStatus::default(),
			has_sent_first_update: false,
			collisions_enabled: true,
			last_active: 0,
		}
	}

	/// Whether AI drivers treat this car as an obstacle.
	pub fn is_collidable(&self) -> bool {
		self.has_sent_first_update && self.collisions_enabled
	}

	pub fn is_afk(&self, now: i64, timeout_ms: i64) -> bool {
		now - self.last_active >= timeout_ms
	}
}

/// Connected players by session id, fed from the network layer.
#[derive(Debug, Default)]
pub struct PlayerRegistry {
	cars: RwLock<BTreeMap<u8, PlayerCar>>,
}

impl PlayerRegistry {
	pub fn connect(&self, session_id: u8, now: i64) {
		let mut car = PlayerCar::new(session_id);
		car.last_active = now;
		self.cars.write().insert(session_id, car);
	}

	pub fn disconnect(&self, session_id: u8) -> Option<PlayerCar> {
		self.cars.write().remove(&session_id)
	}

	/// Stores a position update. Moving or steering counts as activity.
	pub fn update_status(&self, session_id: u8, status: CarStatus, now: i64) {
		let mut wa_cars = self.cars.write();
		let Some(car) = wa_cars.get_mut(&session_id) else {
			return;
		};
		let moved = (status.position - car.status.position).norm_squared() > 0.25;
		if !car.has_sent_first_update || moved || status.steer_angle != car.status.steer_angle {
			car.last_active = now;
		}
		car.status = status;
		car.has_sent_first_update = true;
	}

	pub fn set_collisions_enabled(&self, session_id: u8, enabled: bool) {
		if let Some(car) = self.cars.write().get_mut(&session_id) {
			car.collisions_enabled = enabled;
		}
	}

	pub fn get(&self, session_id: u8) -> Option<PlayerCar> {
		self.cars.read().get(&session_id).copied()
	}

	pub fn all(&self) -> Vec<PlayerCar> {
		self.cars.read().values().copied().collect()
	}

	pub fn connected_count(&self) -> usize {
		self.cars.read().len()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::network::Vec3;

	#[test]
	fn standing_still_goes_afk() {
		let registry = PlayerRegistry::default();
		registry.connect(2, 0);
		let status = CarStatus { position: Vec3::new(1.0, 0.0, 1.0), ..Default::default() };
		registry.update_status(2, status, 1_000);
		registry.update_status(2, status, 9_000);

		let car = registry.get(2).unwrap();
		assert!(car.has_sent_first_update);
		assert_eq!(car.last_active, 1_000);
		assert!(!car.is_afk(9_000, 10_000));
		assert!(car.is_afk(11_000, 10_000));
	}

	#[test]
	fn collisions_can_be_disabled() {
		let registry = PlayerRegistry::default();
		registry.connect(1, 0);
		registry.update_status(1, CarStatus::default(), 0);
		assert!(registry.get(1).unwrap().is_collidable());
		registry.set_collisions_enabled(1, false);
		assert!(!registry.get(1).unwrap().is_collidable());
		assert!(registry.disconnect(1).is_some());
		assert_eq!(registry.connected_count(), 0);
	}
}
