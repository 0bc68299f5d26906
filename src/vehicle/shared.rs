use std::sync::Arc;

use parking_lot::RwLock;

use crate::network::{Vec3, NONE};

pub type AiRef = Arc<AiShared>;

/// What other drivers and the coordinator may read about an AI without
/// touching its state machine.
#[derive(Debug, Clone, Copy)]
pub struct AiSnapshot {
	pub initialized: bool,
	pub point: u32,
	pub lane_changing: bool,
	/// Overtakes go left.
	pub lane_change_overtake: bool,
	pub current_speed: f32,
	pub target_speed: f32,
	pub max_speed: f32,
	pub acceleration: f32,
	pub position: Vec3,
	pub velocity: Vec3,
	pub spawn_counter: u32,
	pub spawn_protection_ends: i64,
	pub safety_distance_squared: f32,
	/// -1 when nothing is ahead.
	pub closest_ai_obstacle_distance: f32,
}

impl Default for AiSnapshot {
	fn default() -> Self {
		Self {
			initialized: false,
			point: NONE,
			lane_changing: false,
			lane_change_overtake: false,
			current_speed: 0.0,
			target_speed: 0.0,
			max_speed: 0.0,
			acceleration: 0.0,
			position: Vec3::zeros(),
			velocity: Vec3::zeros(),
			spawn_counter: 0,
			spawn_protection_ends: 0,
			safety_distance_squared: 20.0 * 20.0,
			closest_ai_obstacle_distance: -1.0,
		}
	}
}

/// Identity plus published snapshot of one AI. Compared by pointer.
#[derive(Debug)]
pub struct AiShared {
	pub id: u32,
	pub session_id: u8,
	pub length_pre: f32,
	pub length_post: f32,
	snapshot: RwLock<AiSnapshot>,
}

impl AiShared {
	pub fn new(id: u32, session_id: u8, length_pre: f32, length_post: f32) -> Self {
		Self {
			id,
			session_id,
			length_pre,
			length_post,
			snapshot: RwLock::new(AiSnapshot::default()),
		}
	}

	pub fn snapshot(&self) -> AiSnapshot {
		*self.snapshot.read()
	}

	pub fn publish(&self, update: impl FnOnce(&mut AiSnapshot)) {
		update(&mut self.snapshot.write());
	}

	/// Whether an occupancy entry at `point` still describes this AI.
	pub fn is_registered_at(&self, point: u32) -> bool {
		let ra_snapshot = self.snapshot.read();
		ra_snapshot.initialized && (ra_snapshot.point == point || ra_snapshot.lane_changing)
	}
}
