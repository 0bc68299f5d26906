use std::sync::Arc;

use tracing::trace;

use crate::{
	network::{link, Vec3},
	traffic::{player::PlayerCar, TickContext},
};

use super::{
	between, between_f32,
	idm::{braking_distance, desired_speed, max_cornering_speed_squared, Leader},
	shared::AiRef,
	status::CarStatusFlags,
	AiState,
};

/// Seconds ahead other cars are projected when checking a junction exit.
const JUNCTION_TIME_HORIZON: f32 = 3.0;
const HONK_BASE_MS: f32 = 3000.0;
const HONK_VARIATION_MS: f32 = 4000.0;

/// Identity of whatever the car is currently following.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LeaderKey {
	Player(u8),
	Ai(u32),
}

/// What lies ahead along the route within braking range.
pub(crate) struct Lookahead {
	/// Distinct AI ahead, nearest first, with bumper-to-bumper distances.
	pub leaders: Vec<(AiRef, f32)>,
	/// Speed cap from upcoming curves, `f32::MAX` when none applies.
	pub max_speed: f32,
}

impl Lookahead {
	pub fn closest_distance(&self) -> f32 {
		self.leaders.first().map_or(f32::MAX, |(_, distance)| *distance)
	}
}

impl AiState {
	/// Walks the route ahead for as far as twice the braking distance,
	/// committing to junctions within their indicate distance, collecting the
	/// AI ahead and the cornering speed limit.
	pub(crate) fn spline_lookahead(&mut self, ctx: &TickContext) -> Lookahead {
		let max_distance = braking_distance(self.current_speed, self.profile.deceleration) * 2.0
			+ self.config.lookahead_buffer_meters;
		let leader_count = self.model.anticipation_count.max(1);
		let speed_squared = self.current_speed * self.current_speed;

		let mut leaders: Vec<(AiRef, f32)> = Vec::new();
		let mut max_speed = f32::MAX;
		let mut junction_found = self.next_junction.is_some();
		let mut travelled = 0.0;
		let mut point_id = self.current_point;

		while travelled < max_distance {
			travelled += self.network.point(point_id).length;
			let Some(next) = self.navigation.next(point_id) else {
				break;
			};
			point_id = next;
			let point = *self.network.point(point_id);

			// JUNCTION

			if let Some(junction_id) = link(point.junction_start) {
				let junction = self.network.junctions[junction_id as usize];
				if !junction_found && travelled < junction.indicate_distance_pre {
					let will_take = self.navigation.will_take_junction(junction_id);
					let exit = if will_take { junction.end } else { point.next };
					let indicator = if will_take {
						junction.indicate_when_taken
					} else {
						junction.indicate_when_not_taken
					}.flags();

					if !self.is_junction_endpoint_clear(exit, ctx) || self.junction_unsafe {
						self.junction_unsafe = true;
					} else if indicator.is_empty() || self.can_use_junction(indicator, ctx) {
						self.indicator = indicator;
						self.next_junction = Some(junction_id);
						junction_found = true;
						trace!("AI {} committed to junction {}", self.profile.session_id, junction_id);
					} else {
						self.junction_unsafe = true;
					}
				}
			}

			// LEADERS

			if leaders.len() < leader_count {
				if let Some(slowest) = self.network.slowest.get(point_id) {
					let known = Arc::ptr_eq(&slowest, &self.shared)
						|| leaders.iter().any(|(other, _)| Arc::ptr_eq(other, &slowest));
					if !known {
						let distance = ((self.status.position - slowest.snapshot().position).norm()
							- self.shared.length_pre
							- slowest.length_post).max(0.0);
						leaders.push((slowest, distance));
					}
				}
			}

			// CORNERING

			let corner_speed_squared = max_cornering_speed_squared(point.radius, self.profile.cornering_speed_factor);
			if corner_speed_squared < speed_squared {
				let corner_speed = corner_speed_squared.sqrt();
				let brake_distance = braking_distance(
					self.current_speed - corner_speed,
					self.profile.deceleration * self.profile.cornering_brake_force_factor
				) * self.profile.cornering_brake_distance_factor;
				if brake_distance > travelled {
					max_speed = max_speed.min(corner_speed);
				}
			}
		}

		Lookahead { leaders, max_speed }
	}

	/// No AI near the point a junction leads onto.
	pub(crate) fn is_junction_endpoint_clear(&self, end: u32, ctx: &TickContext) -> bool {
		let Some(end) = link(end) else {
			return true;
		};
		let safe_squared = self.config.lane_change_min_distance_meters.powi(2);
		let end_position = self.network.point(end).position;
		ctx.ai
			.iter()
			.filter(|&other| !Arc::ptr_eq(other, &self.shared))
			.map(|other| other.snapshot())
			.filter(|snapshot| snapshot.initialized)
			.all(|snapshot| (snapshot.position - end_position).norm_squared() >= safe_squared)
	}

	/// Projects every car three seconds ahead and rejects the junction when any
	/// lands in the box beside this car on the indicated side.
	pub(crate) fn can_use_junction(&self, indicator: CarStatusFlags, ctx: &TickContext) -> bool {
		let ignore_players = self.should_ignore_player_obstacles();
		let box_width = self.config.lane_width_meters + 1.0;
		let box_length = self.config.max_traffic_gap_meters + 2.0;
		let is_left = indicator.contains(CarStatusFlags::INDICATE_LEFT);

		let center_x = self.status.position.x + if is_left { -box_width } else { box_width };
		let (left, right) = (center_x - box_width / 2.0, center_x + box_width / 2.0);
		let (back, front) = (self.status.position.z - box_length, self.status.position.z + box_length);
		let inside = |position: Vec3, velocity: Vec3| {
			let future = position + velocity * JUNCTION_TIME_HORIZON;
			future.x > left && future.x < right && future.z > back && future.z < front
		};

		if !ignore_players {
			for player in ctx.players.iter().filter(|p| p.is_collidable()) {
				if inside(player.status.position, player.status.velocity) {
					return false;
				}
			}
		}
		for other in ctx.ai.iter().filter(|&other| !Arc::ptr_eq(other, &self.shared)) {
			let snapshot = other.snapshot();
			if snapshot.initialized && inside(snapshot.position, snapshot.velocity) {
				return false;
			}
		}
		true
	}

	pub(crate) fn should_ignore_player_obstacles(&self) -> bool {
		self.config
			.ignore_player_obstacle_spheres
			.iter()
			.any(|sphere| sphere.contains(&self.status.position))
	}

	/// Nearest player roughly straight ahead and on the same level.
	pub(crate) fn find_closest_player_obstacle(&self, ctx: &TickContext) -> Option<(PlayerCar, f32)> {
		if self.should_ignore_player_obstacles() {
			return None;
		}
		let min_angle = 180.0 - self.config.player_detection_angle_range;
		let max_angle = 180.0 + self.config.player_detection_angle_range;

		let mut closest: Option<(PlayerCar, f32)> = None;
		for player in ctx.players.iter().filter(|p| p.is_collidable()) {
			let distance_squared = (player.status.position - self.status.position).norm_squared();
			let angle = self.status.angle_to(&player.status.position);
			if closest.map_or(true, |(_, best)| distance_squared < best)
				&& (player.status.position.y - self.status.position.y).abs() < self.config.player_detection_height_threshold
				&& angle > min_angle
				&& angle < max_angle
			{
				closest = Some((*player, distance_squared));
			}
		}
		closest.map(|(player, distance_squared)| (player, distance_squared.sqrt()))
	}

	/// Chooses acceleration and target speed for the next motion updates from
	/// the car-following model, handling the ignore and collision-stop
	/// windows, emergency braking and lane-change opportunities.
	pub fn detect_obstacles(&mut self, ctx: &TickContext) {
		if !self.initialized {
			return;
		}
		let now = ctx.now;
		let max_acceleration = self.profile.acceleration;
		let deceleration = self.profile.deceleration;

		if now < self.ignore_obstacles_until {
			let lookahead = self.spline_lookahead(ctx);
			let player = self.find_closest_player_obstacle(ctx);
			let closest = lookahead.closest_distance().min(player.map_or(f32::MAX, |(_, d)| d));
			if closest < self.min_obstacle_distance * 2.0 {
				self.acceleration = -deceleration;
				self.target_speed = 0.0;
			} else {
				self.acceleration = max_acceleration * self.personality.acceleration_factor;
				self.target_speed = self.max_speed;
			}
			self.publish();
			return;
		}

		if now < self.stopped_for_collision_until {
			self.acceleration = -deceleration * self.personality.deceleration_factor;
			self.target_speed = 0.0;
			self.publish();
			return;
		}

		let lookahead = self.spline_lookahead(ctx);
		let player = self.find_closest_player_obstacle(ctx);
		self.closest_ai_obstacle_distance = lookahead.leaders.first().map_or(-1.0, |(_, d)| *d);
		self.desired_speed = desired_speed(self.initial_max_speed, lookahead.max_speed, &self.personality);

		// PICK OBSTACLE

		let mut leaders: Vec<Leader> = Vec::new();
		let mut leader_key: Option<LeaderKey> = None;
		match player {
			Some((car, distance)) if distance < lookahead.closest_distance() => {
				let mut speed = car.status.velocity.norm();
				if speed < 0.1 {
					speed = 0.0;
				}
				leaders.push(Leader { gap: distance, speed, acceleration: 0.0 });
				leader_key = Some(LeaderKey::Player(car.session_id));
			}
			_ => {
				for (other, distance) in &lookahead.leaders {
					let snapshot = other.snapshot();
					leaders.push(Leader {
						gap: *distance,
						speed: snapshot.current_speed.min(snapshot.target_speed),
						acceleration: snapshot.acceleration,
					});
				}
				leader_key = lookahead.leaders.first().map(|(other, _)| LeaderKey::Ai(other.id));
			}
		}

		let speed = self.current_speed;
		let (mut obstacle_distance, mut obstacle_speed) = leaders.first().map_or((f32::MAX, 0.0), |l| (l.gap, l.speed));
		let should_follow = obstacle_distance < f32::MAX
			&& (obstacle_distance < self.config.idm_base_time_headway_seconds * speed * 3.0
				|| speed >= obstacle_speed - 2.0
				|| obstacle_distance < self.min_obstacle_distance * 3.0);
		if !should_follow {
			leaders.clear();
			leader_key = None;
			obstacle_distance = f32::MAX;
			obstacle_speed = speed;
		}

		if obstacle_distance < self.min_obstacle_distance {
			self.acceleration = -deceleration * 2.0;
			self.target_speed = 0.0;
			self.handle_stopped_for_obstacle(now);
			self.publish();
			return;
		}

		// FOLLOW

		self.perceive(&mut leaders);
		let mut acceleration = self.model.multi_anticipative_acceleration(
			speed,
			self.desired_speed,
			&leaders,
			&self.personality,
			max_acceleration,
			deceleration
		);
		acceleration = self.apply_reaction_delay(leader_key, acceleration, now);
		acceleration = self.apply_drive_off(acceleration, now);

		self.acceleration = acceleration;
		self.target_speed = if acceleration >= 0.0 { self.desired_speed } else { obstacle_speed.max(0.0) };
		self.max_speed = self.initial_max_speed.max(self.desired_speed);

		if !self.lane_change.is_changing_lane() {
			self.consider_lane_change(obstacle_distance, obstacle_speed, ctx);
		}
		self.handle_stopped_for_obstacle(now);
		self.publish();
	}

	/// Imperfect perception of gaps and speeds.
	fn perceive(&mut self, leaders: &mut [Leader]) {
		let gap_error = self.config.gap_estimation_error;
		let speed_error = self.config.speed_estimation_error;
		for leader in leaders.iter_mut() {
			if gap_error > 0.0 {
				leader.gap *= 1.0 + between_f32(&mut self.rng, -gap_error, gap_error);
			}
			if speed_error > 0.0 {
				leader.speed = (leader.speed * (1.0 + between_f32(&mut self.rng, -speed_error, speed_error))).max(0.0);
			}
		}
	}

	/// A new leader only gets a braking response after the driver's reaction
	/// time; until then the car coasts or keeps its previous braking.
	fn apply_reaction_delay(&mut self, leader: Option<LeaderKey>, acceleration: f32, now: i64) -> f32 {
		if leader != self.leader {
			self.leader = leader;
			if leader.is_some() {
				let seconds = between_f32(
					&mut self.rng,
					self.config.reaction_time_min_seconds,
					self.config.reaction_time_max_seconds
				);
				self.reacting_until = now + (seconds * 1000.0 * self.personality.reaction_time_factor) as i64;
			}
		}
		if now < self.reacting_until && acceleration < 0.0 {
			return self.acceleration.min(0.0).max(acceleration);
		}
		acceleration
	}

	/// Stopped cars wait a moment before pulling away, then ramp up the
	/// throttle.
	fn apply_drive_off(&mut self, acceleration: f32, now: i64) -> f32 {
		if acceleration <= 0.0 {
			self.drive_off_at = None;
			return acceleration;
		}
		if self.current_speed <= 0.0 && self.drive_off_at.is_none() {
			let seconds = between_f32(
				&mut self.rng,
				self.config.drive_off_delay_min_seconds,
				self.config.drive_off_delay_max_seconds
			);
			self.drive_off_at = Some(now + (seconds * 1000.0 * self.personality.drive_off_delay_factor) as i64);
		}
		match self.drive_off_at {
			Some(at) if now < at => 0.0,
			Some(at) => {
				let ramp_ms = (self.config.drive_off_ramp_seconds * 1000.0).max(1.0);
				let ramp = ((now - at) as f32 / ramp_ms).min(1.0);
				if ramp >= 1.0 {
					self.drive_off_at = None;
				}
				acceleration * ramp.max(0.1)
			}
			None => acceleration,
		}
	}

	/// Tracks how long the car has been standing behind an obstacle: honks
	/// after a patience-scaled delay and eventually ignores the obstacle.
	pub(crate) fn handle_stopped_for_obstacle(&mut self, now: i64) {
		let patience = self.personality.patience;
		let base_honk_delay = (HONK_BASE_MS * patience) as i64;
		let honk_delay_variation = (HONK_VARIATION_MS * patience) as i64;
		let ignore_timeout = (self.config.ignore_obstacles_after_seconds as f32 * 1000.0 * patience) as i64;

		if self.current_speed == 0.0 && !self.stopped_for_obstacle {
			self.stopped_for_obstacle = true;
			self.stopped_for_obstacle_since = now;
			self.obstacle_honk_start = now + between(&mut self.rng, base_honk_delay, base_honk_delay + honk_delay_variation);
			self.obstacle_honk_end = self.obstacle_honk_start + between(&mut self.rng, 500, 1500);
			trace!("AI {} stopped for obstacle", self.profile.session_id);
		} else if self.current_speed > 0.0 && self.stopped_for_obstacle {
			self.stopped_for_obstacle = false;
			trace!("AI {} no longer stopped for obstacle", self.profile.session_id);
		} else if self.stopped_for_obstacle && now - self.stopped_for_obstacle_since > ignore_timeout {
			self.ignore_obstacles_until = now + self.config.ignore_mode_duration_seconds as i64 * 1000;
			trace!("AI {} ignoring obstacles until {}", self.profile.session_id, self.ignore_obstacles_until);
		}
	}
}
