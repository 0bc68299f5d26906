use std::{f32::consts::PI, sync::Arc};

use rand::{rngs::SmallRng, Rng, SeedableRng};
use tracing::debug;

use crate::{
	config::{LaneSpawnBehavior, TrafficConfig},
	network::{curve, navigation::JunctionEvaluator, Network, Vec3, NONE},
	traffic::Environment,
};

use self::{
	idm::CarFollowing,
	lane_change::LaneChangeState,
	obstacles::LeaderKey,
	personality::{DriverPersonality, PersonalityFactory},
	profile::VehicleProfile,
	shared::AiRef,
	status::{encode_tyre_angular_speed, light_flags, tyre_angular_speed, wiper_flags, CarStatus, CarStatusFlags},
};

pub mod idm;
pub mod lane_change;
mod maneuver;
mod obstacles;
pub mod personality;
pub mod profile;
pub mod shared;
pub mod status;

pub const CAR_COLORS: [[u8; 3]; 18] = [
	[13, 17, 22],
	[19, 24, 31],
	[28, 29, 33],
	[12, 13, 24],
	[11, 20, 33],
	[151, 154, 151],
	[153, 157, 160],
	[194, 196, 198],
	[234, 234, 234],
	[255, 255, 255],
	[182, 17, 27],
	[218, 25, 24],
	[73, 17, 29],
	[35, 49, 85],
	[28, 53, 81],
	[37, 58, 167],
	[21, 92, 45],
	[18, 46, 43],
];

const HAZARD_SPEED: f32 = 20.0 / 3.6;
const MAX_TWILIGHT_DEGREES: f64 = 12.0;

/// Uniform integer in `min..max`, `min` for an empty range.
pub(crate) fn between(rng: &mut SmallRng, min: i64, max: i64) -> i64 {
	if max <= min { min } else { rng.gen_range(min..max) }
}

pub(crate) fn between_f32(rng: &mut SmallRng, min: f32, max: f32) -> f32 {
	if max <= min { min } else { rng.gen_range(min..max) }
}

/// One simulated car instance: where it is on the network, how fast it wants
/// to go, and the lane-change and obstacle bookkeeping driving it.
///
/// Mutated only under its owner's lock. Everything other drivers need is
/// mirrored into the shared snapshot by `publish`.
#[derive(Debug)]
pub struct AiState {
	shared: AiRef,
	network: Arc<Network>,
	config: Arc<TrafficConfig>,
	profile: Arc<VehicleProfile>,
	model: CarFollowing,
	personalities: PersonalityFactory,
	navigation: JunctionEvaluator,
	rng: SmallRng,

	pub status: CarStatus,
	initialized: bool,
	current_point: u32,
	spawn_counter: u32,
	spawn_protection_ends: i64,
	safety_distance_squared: f32,
	color: [u8; 3],

	// MOTION

	acceleration: f32,
	current_speed: f32,
	target_speed: f32,
	initial_max_speed: f32,
	max_speed: f32,
	desired_speed: f32,
	start_tangent: Vec3,
	end_tangent: Vec3,
	current_vec_length: f32,
	current_vec_progress: f32,
	last_tick: i64,

	// OBSTACLES

	closest_ai_obstacle_distance: f32,
	min_obstacle_distance: f32,
	stopped_for_obstacle: bool,
	stopped_for_obstacle_since: i64,
	ignore_obstacles_until: i64,
	stopped_for_collision_until: i64,
	obstacle_honk_start: i64,
	obstacle_honk_end: i64,
	leader: Option<LeaderKey>,
	reacting_until: i64,
	drive_off_at: Option<i64>,

	// INDICATORS / JUNCTIONS

	indicator: CarStatusFlags,
	next_junction: Option<u32>,
	junction_passed: bool,
	junction_unsafe: bool,
	end_indicator_distance: f32,
	random_twilight: f64,

	// LANE CHANGE

	lane_change: LaneChangeState,
	last_lane_change_attempt: Option<i64>,
	lane_change_source: u32,
	lane_change_registration: u32,

	personality: DriverPersonality,
	last_overtake_desire: f32,
}

impl AiState {
	pub fn new(
		shared: AiRef,
		network: Arc<Network>,
		config: Arc<TrafficConfig>,
		profile: Arc<VehicleProfile>,
		seed: u64,
		now: i64
	) -> Self {
		let mut rng = SmallRng::seed_from_u64(seed);
		let navigation = JunctionEvaluator::new(network.clone(), rng.gen());
		Self {
			shared,
			model: CarFollowing::from(config.as_ref()),
			personalities: PersonalityFactory::new(config.personality_variety, config.personality_bias),
			navigation,
			network,
			config,
			profile,
			rng,

			status: CarStatus::default(),
			initialized: false,
			current_point: NONE,
			spawn_counter: 0,
			spawn_protection_ends: 0,
			safety_distance_squared: 20.0 * 20.0,
			color: CAR_COLORS[0],

			acceleration: 0.0,
			current_speed: 0.0,
			target_speed: 0.0,
			initial_max_speed: 0.0,
			max_speed: 0.0,
			desired_speed: 0.0,
			start_tangent: Vec3::zeros(),
			end_tangent: Vec3::zeros(),
			current_vec_length: 0.0,
			current_vec_progress: 0.0,
			last_tick: now,

			closest_ai_obstacle_distance: -1.0,
			min_obstacle_distance: 10.0,
			stopped_for_obstacle: false,
			stopped_for_obstacle_since: 0,
			ignore_obstacles_until: 0,
			stopped_for_collision_until: 0,
			obstacle_honk_start: 0,
			obstacle_honk_end: 0,
			leader: None,
			reacting_until: 0,
			drive_off_at: None,

			indicator: CarStatusFlags::empty(),
			next_junction: None,
			junction_passed: false,
			junction_unsafe: false,
			end_indicator_distance: 0.0,
			random_twilight: 0.0,

			lane_change: LaneChangeState::default(),
			last_lane_change_attempt: None,
			lane_change_source: NONE,
			lane_change_registration: NONE,

			personality: DriverPersonality::default(),
			last_overtake_desire: 0.0,
		}
	}

	pub fn shared(&self) -> &AiRef {
		&self.shared
	}

	pub fn is_initialized(&self) -> bool {
		self.initialized
	}

	pub fn current_point(&self) -> u32 {
		self.current_point
	}

	pub fn current_speed(&self) -> f32 {
		self.current_speed
	}

	pub fn target_speed(&self) -> f32 {
		self.target_speed
	}

	pub fn max_speed(&self) -> f32 {
		self.max_speed
	}

	pub fn initial_max_speed(&self) -> f32 {
		self.initial_max_speed
	}

	pub fn acceleration(&self) -> f32 {
		self.acceleration
	}

	pub fn spawn_counter(&self) -> u32 {
		self.spawn_counter
	}

	pub fn spawn_protection_ends(&self) -> i64 {
		self.spawn_protection_ends
	}

	pub fn safety_distance_squared(&self) -> f32 {
		self.safety_distance_squared
	}

	pub fn closest_ai_obstacle_distance(&self) -> f32 {
		self.closest_ai_obstacle_distance
	}

	pub fn color(&self) -> [u8; 3] {
		self.color
	}

	pub fn personality(&self) -> &DriverPersonality {
		&self.personality
	}

	pub fn indicator(&self) -> CarStatusFlags {
		self.indicator
	}

	pub fn is_changing_lane(&self) -> bool {
		self.lane_change.is_changing_lane()
	}

	pub fn profile(&self) -> &VehicleProfile {
		&self.profile
	}

	/// Mirrors the fields other drivers read into the shared snapshot.
	fn publish(&self) {
		let lane_changing = self.lane_change.is_changing_lane();
		let overtake = self.lane_change.is_overtake();
		self.shared.publish(|s| {
			s.initialized = self.initialized;
			s.point = self.current_point;
			s.lane_changing = lane_changing;
			s.lane_change_overtake = overtake;
			s.current_speed = self.current_speed;
			s.target_speed = self.target_speed;
			s.max_speed = self.max_speed;
			s.acceleration = self.acceleration;
			s.position = self.status.position;
			s.velocity = self.status.velocity;
			s.spawn_counter = self.spawn_counter;
			s.spawn_protection_ends = self.spawn_protection_ends;
			s.safety_distance_squared = self.safety_distance_squared;
			s.closest_ai_obstacle_distance = self.closest_ai_obstacle_distance;
		});
	}

	/// Moves the registration to `point`. The new point is published before
	/// entering so the entry is never read as stale.
	fn set_current_point(&mut self, point: u32) {
		let previous = self.current_point;
		self.current_point = point;
		self.publish();
		self.network.slowest.enter(point, &self.shared);
		if previous != point {
			self.network.slowest.leave(previous, &self.shared);
		}
	}

	fn release_lane_change_registrations(&mut self) {
		self.network.slowest.leave(self.lane_change_source, &self.shared);
		self.network.slowest.leave(self.lane_change_registration, &self.shared);
		self.lane_change_source = NONE;
		self.lane_change_registration = NONE;
	}

	/// Drops every registration and marks the state free for reuse.
	pub fn despawn(&mut self) {
		self.initialized = false;
		if self.lane_change.is_changing_lane() {
			self.lane_change.abort();
		}
		self.publish();
		self.network.slowest.leave(self.current_point, &self.shared);
		self.release_lane_change_registrations();
	}

	fn next_point(&mut self, point: u32) -> Option<u32> {
		let allow_junctions = self.next_junction.is_some();
		self.navigation.try_next(point, 1, allow_junctions)
	}

	fn position_of(&self, point: u32) -> Vec3 {
		self.network.point(point).position
	}

	fn set_random_speed(&mut self) {
		let config = &self.config;
		let variation = config.max_speed_ms() * config.max_speed_variation_percent;
		let lane_offset = if self.network.point(self.current_point).has_left() {
			config.right_lane_offset_ms()
		} else {
			0.0
		};
		self.initial_max_speed = config.max_speed_ms() + lane_offset - variation / 2.0 + self.rng.gen::<f32>() * variation;
		self.current_speed = self.initial_max_speed;
		self.target_speed = self.initial_max_speed;
		self.max_speed = self.initial_max_speed;
	}

	fn random_safety_distance_squared(&mut self, point: u32, density: f32) -> f32 {
		let lanes = self.network.lanes(point).len();
		let (mut min, mut max) = match self.config.lane_count_specific_overrides.get(&lanes) {
			Some(overrides) => (
				overrides.min_ai_safety_distance_meters.powi(2),
				overrides.max_ai_safety_distance_meters.powi(2),
			),
			None => (
				self.config.min_traffic_gap_meters.powi(2),
				self.config.max_traffic_gap_meters.powi(2),
			),
		};
		if let Some(value) = self.profile.min_safety_distance_squared {
			min = value;
		}
		if let Some(value) = self.profile.max_safety_distance_squared {
			max = value;
		}
		let density = density.max(0.01);
		between(&mut self.rng, (min / density).round() as i64, (max / density).round() as i64) as f32
	}

	/// Places the car at `point` with a fresh personality and speed. Returns
	/// false when the point has no successor.
	pub fn teleport(&mut self, point: u32, now: i64, environment: &Environment) -> bool {
		self.navigation.clear();
		if self.lane_change.is_changing_lane() {
			self.lane_change.abort();
		}
		self.release_lane_change_registrations();
		self.next_junction = None;

		let Some(next) = self.next_point(point) else {
			return false;
		};
		self.initialized = true;
		self.set_current_point(point);
		self.current_vec_length = (self.position_of(next) - self.position_of(point)).norm();
		self.current_vec_progress = 0.0;
		if !self.calculate_tangents() {
			self.despawn();
			return false;
		}

		self.set_random_speed();
		if self.spawn_counter == 0 {
			self.color = CAR_COLORS[self.rng.gen_range(0..CAR_COLORS.len())];
		}

		self.personality = self.personalities.create(&mut self.rng);
		self.desired_speed = self.initial_max_speed * self.personality.desired_speed_factor;
		self.last_overtake_desire = 0.0;

		let density = self.config.density_at(environment.hour);
		self.safety_distance_squared = self.random_safety_distance_squared(point, density);
		let (min, max) = self.profile.spawn_protection_ms;
		self.spawn_protection_ends = now + between(&mut self.rng, min, max);

		self.stopped_for_collision_until = 0;
		self.stopped_for_obstacle = false;
		self.ignore_obstacles_until = 0;
		self.obstacle_honk_start = 0;
		self.obstacle_honk_end = 0;
		self.leader = None;
		self.reacting_until = 0;
		self.drive_off_at = None;
		self.acceleration = 0.0;
		self.closest_ai_obstacle_distance = -1.0;

		self.indicator = CarStatusFlags::empty();
		self.random_twilight = self.rng.gen_range(0.0..MAX_TWILIGHT_DEGREES).to_radians();
		self.junction_passed = false;
		self.junction_unsafe = false;
		self.end_indicator_distance = 0.0;
		self.last_lane_change_attempt = None;
		self.min_obstacle_distance = self.rng.gen_range(8..13) as f32;

		self.spawn_counter = self.spawn_counter.wrapping_add(1);
		self.last_tick = now;
		self.update(now, environment);
		true
	}

	/// Hermite tangents for the segment leaving the current point.
	fn calculate_tangents(&mut self) -> bool {
		let current = self.current_point;
		let Some(next) = self.next_point(current) else {
			return false;
		};
		let allow_junctions = self.next_junction.is_some();
		let previous = self.navigation.previous(current);
		let next_next = self.navigation.try_next(current, 2, allow_junctions);

		let current_position = self.position_of(current);
		let next_position = self.position_of(next);
		self.start_tangent = match previous {
			Some(previous) => (next_position - self.position_of(previous)) * 0.5,
			None => (next_position - current_position) * 0.5,
		};
		self.end_tangent = match next_next {
			Some(next_next) => (self.position_of(next_next) - current_position) * 0.5,
			None => (next_position - current_position) * 0.5,
		};
		true
	}

	/// Advances `progress` meters past the current point, stepping over as
	/// many points as needed. False at the end of the network.
	fn move_along(&mut self, mut progress: f32) -> bool {
		let mut recalculate_tangents = false;
		while progress > self.current_vec_length {
			progress -= self.current_vec_length;

			let leaving = *self.network.point(self.current_point);
			let Some(next) = self.next_point(self.current_point) else {
				return false;
			};
			let Some(next_next) = self.next_point(next) else {
				return false;
			};

			self.set_current_point(next);
			self.current_vec_length = (self.position_of(next_next) - self.position_of(next)).norm();
			recalculate_tangents = true;

			if self.junction_passed {
				self.end_indicator_distance -= self.current_vec_length;
				if self.end_indicator_distance < 0.0 {
					self.indicator = CarStatusFlags::empty();
					self.junction_passed = false;
					self.end_indicator_distance = 0.0;
				}
			}

			if leaving.junction_start != NONE {
				self.junction_unsafe = false;
			}
			if let Some(junction_id) = self.next_junction {
				let junction = self.network.junctions[junction_id as usize];
				let taken = self.network.point(next).junction_end == junction_id;
				let skipped = leaving.junction_start == junction_id && next != junction.end;
				if taken || skipped {
					self.junction_passed = true;
					self.end_indicator_distance = junction.indicate_distance_post;
					self.next_junction = None;
				}
			}
		}

		if recalculate_tangents && !self.calculate_tangents() {
			return false;
		}
		self.current_vec_progress = progress;
		true
	}

	/// Spawn constraints that depend on this slot: lane count, lane position
	/// and spacing to the neighbours ahead and behind.
	pub fn can_spawn(&self, point: u32, previous: Option<&AiRef>, next: Option<&AiRef>) -> bool {
		self.is_allowed_lane_count(point)
			&& self.is_allowed_lane(point)
			&& self.is_keeping_safety_distances(point, previous, next)
	}

	fn is_keeping_safety_distances(&self, point: u32, previous: Option<&AiRef>, next: Option<&AiRef>) -> bool {
		let position = self.position_of(point);
		let too_close = |other: &AiRef, other_length: f32, own_length: f32| {
			let snapshot = other.snapshot();
			let distance = ((position - snapshot.position).norm() - other_length - own_length).max(0.0);
			let distance_squared = distance * distance;
			distance_squared < snapshot.safety_distance_squared || distance_squared < self.safety_distance_squared
		};
		if let Some(previous) = previous {
			if too_close(previous, previous.length_pre, self.shared.length_post) {
				return false;
			}
		}
		if let Some(next) = next {
			if too_close(next, next.length_post, self.shared.length_pre) {
				return false;
			}
		}
		true
	}

	fn is_allowed_lane_count(&self, point: u32) -> bool {
		let lanes = self.network.lanes(point).len();
		if matches!(self.profile.min_lane_count, Some(min) if lanes < min) {
			return false;
		}
		if matches!(self.profile.max_lane_count, Some(max) if lanes > max) {
			return false;
		}
		true
	}

	fn is_allowed_lane(&self, point: u32) -> bool {
		let Some(allowed) = &self.profile.allowed_lanes else {
			return true;
		};
		let point = self.network.point(point);
		(allowed.contains(&LaneSpawnBehavior::Middle) && point.has_left() && point.has_right())
			|| (allowed.contains(&LaneSpawnBehavior::Left) && !point.has_left())
			|| (allowed.contains(&LaneSpawnBehavior::Right) && !point.has_right())
	}

	/// Holds the car for a random collision stop time and abandons any lane
	/// change in progress.
	pub fn stop_for_collision(&mut self, now: i64) {
		if !self.should_ignore_player_obstacles() {
			let (min, max) = self.profile.collision_stop_ms;
			self.stopped_for_collision_until = now + between(&mut self.rng, min, max);
		}
		if self.lane_change.is_changing_lane() {
			self.abort_lane_change();
		}
		self.publish();
	}

	/// `stop_for_collision` for a delayed report: ignored when the car was
	/// despawned or respawned since `spawn_counter` was captured.
	pub fn stop_for_collision_if_current(&mut self, spawn_counter: u32, now: i64) -> bool {
		if !self.initialized || self.spawn_counter != spawn_counter {
			return false;
		}
		self.stop_for_collision(now);
		true
	}

	/// Integrates speed over the time since the last tick, moves along the
	/// network or the lane-change curve, and refreshes the outbound status.
	pub fn update(&mut self, now: i64, environment: &Environment) {
		if !self.initialized {
			return;
		}

		let dt = (now - self.last_tick).max(0) as f32 / 1000.0;
		self.last_tick = now;

		if self.acceleration != 0.0 {
			self.current_speed += self.acceleration * dt;
			if (self.acceleration < 0.0 && self.current_speed < self.target_speed)
				|| (self.acceleration > 0.0 && self.current_speed > self.target_speed)
			{
				self.current_speed = self.target_speed;
				self.acceleration = 0.0;
			}
		}
		self.current_speed = self.current_speed.min(self.max_speed).max(0.0);

		let move_meters = dt * self.current_speed;
		let was_lane_changing = self.lane_change.is_changing_lane();

		// MOVE

		let (position, tangent, camber) = if was_lane_changing {
			self.lane_change.update_progress(move_meters);
			let point = self.lane_change.interpolated_point();
			let height = self.lane_change.blended_height();
			let camber = self.lane_change.blended_camber();
			let slope = self.lane_change.blended_pitch_slope();

			let horizontal = (point.tangent.x * point.tangent.x + point.tangent.z * point.tangent.z).sqrt();
			let tangent = if horizontal > 0.001 {
				Vec3::new(point.tangent.x, slope * horizontal, point.tangent.z).normalize()
			} else {
				point.tangent
			};

			if self.lane_change.is_complete() {
				if self.lane_change.is_aborting() {
					self.finalize_abort_return();
				} else {
					self.complete_lane_change();
				}
				if !self.initialized {
					return;
				}
			}
			(Vec3::new(point.position.x, height, point.position.z), tangent, camber)
		} else {
			let next = if self.move_along(self.current_vec_progress + move_meters) {
				self.next_point(self.current_point)
			} else {
				None
			};
			let Some(next) = next else {
				debug!("AI {} reached network end, despawning", self.profile.session_id);
				self.despawn();
				return;
			};

			let t = if self.current_vec_length > 0.0 { self.current_vec_progress / self.current_vec_length } else { 0.0 };
			let start = self.position_of(self.current_point);
			let end = self.position_of(next);
			let smooth = curve::evaluate(&start, &end, &self.start_tangent, &self.end_tangent, t);
			let height = start.y * (1.0 - t) + end.y * t;
			(
				Vec3::new(smooth.position.x, height, smooth.position.z),
				smooth.tangent,
				self.network.camber_at(self.current_point, t),
			)
		};

		// ORIENT

		let yaw = tangent.z.atan2(tangent.x) - PI / 2.0;
		let pitch = if was_lane_changing {
			let horizontal = (tangent.x * tangent.x + tangent.z * tangent.z).sqrt();
			tangent.y.atan2(horizontal)
		} else {
			self.segment_pitch()
		};

		// STATUS

		let encoded_tyre_speed = encode_tyre_angular_speed(tyre_angular_speed(self.current_speed, self.profile.tyre_diameter));
		let rpm_ratio = (self.current_speed / self.config.max_speed_ms()).max(0.0);
		let idle = self.profile.idle_engine_rpm as f32;
		let rpm = idle + (self.profile.max_engine_rpm as f32 - idle) * rpm_ratio;

		let mut flags = light_flags(self.config.enable_daytime_lights, environment.sun_altitude, self.random_twilight)
			| wiper_flags(environment.rain_intensity)
			| self.indicator;
		if now < self.stopped_for_collision_until || self.current_speed < HAZARD_SPEED {
			flags |= CarStatusFlags::HAZARDS_ON;
		}
		if self.current_speed == 0.0 || self.acceleration < 0.0 {
			flags |= CarStatusFlags::BRAKE_LIGHTS_ON;
		}
		if self.stopped_for_obstacle && now > self.obstacle_honk_start && now < self.obstacle_honk_end {
			flags |= CarStatusFlags::HORN;
		}

		self.status = CarStatus {
			timestamp: now,
			position: Vec3::new(position.x, position.y + self.profile.spline_height_offset, position.z),
			rotation: Vec3::new(yaw, pitch, camber),
			velocity: tangent * self.current_speed,
			steer_angle: 127,
			wheel_angle: 127,
			tyre_angular_speed: [encoded_tyre_speed; 4],
			engine_rpm: rpm.clamp(0.0, u16::MAX as f32) as u16,
			gear: 2,
			flags,
		};
		self.publish();
	}

	/// Road slope under the car, eased toward the next segment's slope.
	fn segment_pitch(&mut self) -> f32 {
		let slope = |from: Vec3, to: Vec3| {
			let horizontal = ((to.x - from.x).powi(2) + (to.z - from.z).powi(2)).sqrt();
			(to.y - from.y).atan2(horizontal)
		};
		let current = self.current_point;
		let Some(next) = self.next_point(current) else {
			return 0.0;
		};
		let current_pitch = slope(self.position_of(current), self.position_of(next));
		match self.next_point(next) {
			Some(next_next) => {
				let t = if self.current_vec_length > 0.0 { self.current_vec_progress / self.current_vec_length } else { 0.0 };
				let next_pitch = slope(self.position_of(next), self.position_of(next_next));
				current_pitch + (next_pitch - current_pitch) * t
			}
			None => current_pitch,
		}
	}
}

impl Drop for AiState {
	fn drop(&mut self) {
		self.despawn();
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{network::builder::NetworkBuilder, config::SlotConfig, vehicle::shared::AiShared};

	pub(crate) fn state_on(network: Arc<Network>, config: TrafficConfig) -> AiState {
		let slot = SlotConfig::default();
		let profile = Arc::new(VehicleProfile::resolve(&config, &slot));
		let shared = Arc::new(AiShared::new(0, 0, slot.vehicle_length_pre_meters, slot.vehicle_length_post_meters));
		AiState::new(shared, network, Arc::new(config), profile, 7, 0)
	}

	#[test]
	fn teleport_registers_and_despawn_releases() {
		let network = Arc::new(NetworkBuilder::straight_road(2, 500.0, 5.0, 3.0).unwrap());
		let mut state = state_on(network.clone(), TrafficConfig::default());
		assert!(state.teleport(3, 0, &Environment::default()));
		assert!(state.is_initialized());
		assert_eq!(state.spawn_counter(), 1);
		assert!(Arc::ptr_eq(&network.slowest.get(3).unwrap(), state.shared()));
		assert!(state.spawn_protection_ends() >= 4000);

		state.despawn();
		assert!(network.slowest.get(3).is_none());
		assert!(network.slowest.entries_of(state.shared()).is_empty());
	}

	#[test]
	fn fast_lane_offset_applies_to_lanes_with_a_left_neighbour() {
		let network = Arc::new(NetworkBuilder::straight_road(2, 500.0, 5.0, 3.0).unwrap());
		let config = TrafficConfig {
			max_speed_variation_percent: 0.0,
			..Default::default()
		};
		let expected_base = config.max_speed_ms();
		let expected_offset = config.right_lane_offset_ms();
		let mut state = state_on(network, config);
		state.teleport(3, 0, &Environment::default());
		assert!((state.initial_max_speed() - expected_base).abs() < 1.0e-4);
		// lane 1 starts at id 101
		state.teleport(104, 0, &Environment::default());
		assert!((state.initial_max_speed() - expected_base - expected_offset).abs() < 1.0e-4);
	}

	#[test]
	fn drives_forward_and_despawns_at_the_end() {
		let network = Arc::new(NetworkBuilder::straight_road(1, 100.0, 5.0, 3.0).unwrap());
		let mut state = state_on(network.clone(), TrafficConfig::default());
		let environment = Environment::default();
		state.teleport(0, 0, &environment);
		let start = state.status.position;

		state.update(500, &environment);
		assert!(state.status.position.z > start.z);
		assert!(state.current_point() > 0);
		assert!(state.status.rotation.x.abs() < 1.0e-3);

		let mut now = 500;
		while state.is_initialized() && now < 60_000 {
			now += 100;
			state.update(now, &environment);
		}
		assert!(!state.is_initialized());
		assert!(network.slowest.entries_of(state.shared()).is_empty());
	}

	#[test]
	fn stale_collision_report_is_ignored() {
		let network = Arc::new(NetworkBuilder::straight_road(1, 500.0, 5.0, 3.0).unwrap());
		let mut state = state_on(network, TrafficConfig::default());
		let environment = Environment::default();
		state.teleport(0, 0, &environment);
		let counter = state.spawn_counter();
		state.teleport(10, 0, &environment);
		assert!(!state.stop_for_collision_if_current(counter, 100));
		assert!(state.stop_for_collision_if_current(state.spawn_counter(), 100));
	}

	#[test]
	fn lane_restrictions() {
		let network = Arc::new(NetworkBuilder::straight_road(3, 100.0, 5.0, 3.0).unwrap());
		let config = TrafficConfig::default();
		let slot = SlotConfig {
			allowed_lanes: Some(vec![LaneSpawnBehavior::Middle]),
			min_lane_count: Some(2),
			..Default::default()
		};
		let profile = Arc::new(VehicleProfile::resolve(&config, &slot));
		let shared = Arc::new(AiShared::new(0, 0, 2.0, 2.0));
		let state = AiState::new(shared, network.clone(), Arc::new(config), profile, 1, 0);
		let middle = network.point(0).right;
		assert!(state.can_spawn(middle, None, None));
		assert!(!state.can_spawn(0, None, None));
	}
}
