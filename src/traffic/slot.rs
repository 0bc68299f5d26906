use std::sync::{
	atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering},
	Arc,
};

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::{
	config::{AiMode, SlotConfig, TrafficConfig},
	network::{Network, Vec3},
	vehicle::{profile::VehicleProfile, shared::{AiRef, AiShared}, AiState},
};

use super::TickContext;

/// One AI instance of a slot: the published identity next to the lockable
/// driving state.
#[derive(Debug, Clone)]
pub struct AiHandle {
	pub shared: AiRef,
	pub state: Arc<Mutex<AiState>>,
}

/// An entry-list car that AI may drive. Holds as many AI instances as its
/// overbooking asks for; all of them drive as this one car.
#[derive(Debug)]
pub struct AiSlot {
	pub session_id: u8,
	pub ai_mode: AiMode,
	profile: Arc<VehicleProfile>,
	network: Arc<Network>,
	config: Arc<TrafficConfig>,
	ids: Arc<AtomicU32>,
	seed: u64,
	ai_controlled: AtomicBool,
	target_overbooking: AtomicUsize,
	states: RwLock<Vec<AiHandle>>,
}

impl AiSlot {
	pub fn new(
		slot: &SlotConfig,
		network: Arc<Network>,
		config: Arc<TrafficConfig>,
		ids: Arc<AtomicU32>,
		seed: u64
	) -> Self {
		Self {
			session_id: slot.session_id,
			ai_mode: slot.ai_mode,
			profile: Arc::new(VehicleProfile::resolve(&config, slot)),
			network,
			config,
			ids,
			seed,
			ai_controlled: AtomicBool::new(slot.ai_mode != AiMode::None),
			target_overbooking: AtomicUsize::new(0),
			states: RwLock::new(Vec::new()),
		}
	}

	pub fn profile(&self) -> &VehicleProfile {
		&self.profile
	}

	pub fn is_ai_controlled(&self) -> bool {
		self.ai_controlled.load(Ordering::SeqCst)
	}

	/// Hands the slot to or from the AI. Taking it away despawns every
	/// instance.
	pub fn set_ai_control(&self, enabled: bool) {
		let enabled = enabled && self.ai_mode != AiMode::None;
		let previous = self.ai_controlled.swap(enabled, Ordering::SeqCst);
		if previous && !enabled {
			self.despawn_all();
		}
		debug!(session_id = self.session_id, enabled, "AI control changed");
	}

	pub fn target_overbooking(&self) -> usize {
		self.target_overbooking.load(Ordering::SeqCst)
	}

	/// Grows or shrinks the instance list to `count`. Removed instances are
	/// despawned before they are dropped.
	pub fn set_overbooking(&self, count: usize, now: i64) {
		self.target_overbooking.store(count, Ordering::SeqCst);
		let mut wa_states = self.states.write();
		while wa_states.len() > count {
			if let Some(handle) = wa_states.pop() {
				handle.state.lock().despawn();
			}
		}
		while wa_states.len() < count {
			let id = self.ids.fetch_add(1, Ordering::SeqCst);
			let shared = Arc::new(AiShared::new(id, self.session_id, self.profile.length_pre, self.profile.length_post));
			let seed = self.seed ^ (id as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
			let state = AiState::new(shared.clone(), self.network.clone(), self.config.clone(), self.profile.clone(), seed, now);
			wa_states.push(AiHandle {
				shared,
				state: Arc::new(Mutex::new(state)),
			});
		}
	}

	/// Cloned list of instances; no lock is held afterwards.
	pub fn states(&self) -> Vec<AiHandle> {
		self.states.read().clone()
	}

	pub fn despawn_all(&self) {
		for handle in self.states() {
			handle.state.lock().despawn();
		}
	}

	/// Despawns instances that drive close behind a sibling in the same
	/// direction; both would show up as the same car.
	pub fn remove_unsafe_states(&self) {
		let states = self.states();
		let min_distance_squared = self.config.min_state_distance_meters.powi(2);
		for (i, handle) in states.iter().enumerate() {
			let snapshot = handle.shared.snapshot();
			if !snapshot.initialized {
				continue;
			}
			let conflict = states.iter().enumerate().any(|(j, other)| {
				if i == j {
					return false;
				}
				let other = other.shared.snapshot();
				other.initialized
					&& (snapshot.position - other.position).norm_squared() < min_distance_squared
					&& snapshot.velocity.dot(&other.velocity) > 0.0
			});
			if conflict {
				debug!(session_id = self.session_id, id = handle.shared.id, "removing AI state too close to a sibling");
				handle.state.lock().despawn();
			}
		}
	}

	/// False when `point` lies within an instance's safety distance.
	pub fn is_position_safe(&self, point: u32) -> bool {
		let position = self.network.point(point).position;
		self.states().iter().all(|handle| {
			let snapshot = handle.shared.snapshot();
			!snapshot.initialized || (snapshot.position - position).norm_squared() >= snapshot.safety_distance_squared
		})
	}

	/// Keeps sibling instances of this slot far apart from each other.
	pub fn can_spawn_state(&self, point: u32, candidate: &AiRef) -> bool {
		let position = self.network.point(point).position;
		let spawn_distance_squared = self.config.state_spawn_distance_meters.powi(2);
		self.states().iter().all(|handle| {
			if Arc::ptr_eq(&handle.shared, candidate) {
				return true;
			}
			let snapshot = handle.shared.snapshot();
			!snapshot.initialized || (snapshot.position - position).norm_squared() >= spawn_distance_squared
		})
	}

	/// Initialized instance nearest to `position` with its squared distance.
	pub fn closest_state(&self, position: &Vec3) -> Option<(AiHandle, f32)> {
		self.states()
			.into_iter()
			.filter_map(|handle| {
				let snapshot = handle.shared.snapshot();
				snapshot.initialized.then(|| {
					let distance_squared = (snapshot.position - position).norm_squared();
					(handle, distance_squared)
				})
			})
			.min_by(|a, b| a.1.total_cmp(&b.1))
	}

	/// Obstacle scan followed by a motion update for every instance.
	pub fn obstacle_detection(&self, ctx: &TickContext) {
		for handle in self.states() {
			let mut state = handle.state.lock();
			state.detect_obstacles(ctx);
			state.update(ctx.now, &ctx.environment);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{network::builder::NetworkBuilder, traffic::Environment};

	fn slot(network: Arc<Network>, config: TrafficConfig) -> AiSlot {
		let slot = SlotConfig {
			session_id: 5,
			..Default::default()
		};
		AiSlot::new(&slot, network, Arc::new(config), Arc::new(AtomicU32::new(0)), 11)
	}

	#[test]
	fn overbooking_grows_and_shrinks() {
		let network = Arc::new(NetworkBuilder::straight_road(1, 2000.0, 5.0, 3.0).unwrap());
		let slot = slot(network.clone(), TrafficConfig::default());
		slot.set_overbooking(3, 0);
		assert_eq!(slot.states().len(), 3);

		let last = slot.states()[2].clone();
		assert!(last.state.lock().teleport(40, 0, &Environment::default()));
		slot.set_overbooking(1, 0);
		assert_eq!(slot.states().len(), 1);
		assert!(!last.shared.snapshot().initialized);
		assert!(network.slowest.entries_of(&last.shared).is_empty());
	}

	#[test]
	fn siblings_keep_their_distance() {
		let network = Arc::new(NetworkBuilder::straight_road(1, 2000.0, 5.0, 3.0).unwrap());
		let slot = slot(network, TrafficConfig::default());
		slot.set_overbooking(2, 0);
		let states = slot.states();
		states[0].state.lock().teleport(10, 0, &Environment::default());

		// 1000 m between siblings by default, 5 m per point
		assert!(!slot.can_spawn_state(100, &states[1].shared));
		assert!(slot.can_spawn_state(250, &states[1].shared));
		assert!(slot.can_spawn_state(100, &states[0].shared));
		assert!(!slot.is_position_safe(12));
	}

	#[test]
	fn losing_ai_control_despawns() {
		let network = Arc::new(NetworkBuilder::straight_road(1, 500.0, 5.0, 3.0).unwrap());
		let slot = slot(network, TrafficConfig::default());
		slot.set_overbooking(1, 0);
		let handle = slot.states()[0].clone();
		handle.state.lock().teleport(0, 0, &Environment::default());
		let (closest, _) = slot.closest_state(&Vec3::zeros()).unwrap();
		assert!(Arc::ptr_eq(&closest.shared, &handle.shared));

		slot.set_ai_control(false);
		assert!(!slot.is_ai_controlled());
		assert!(slot.closest_state(&Vec3::zeros()).is_none());
	}
}
