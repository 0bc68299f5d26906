use std::sync::Arc;

use tracing::{debug, trace};

use crate::{
	network::{curve, link, Vec3, NONE},
	traffic::TickContext,
};

use super::{lane_change::LaneChangePlan, status::CarStatusFlags, AiState};

/// Lane changes are refused where either lane bends tighter than this.
const MIN_LANE_CHANGE_RADIUS: f32 = 200.0;
/// How far the curve may stray from both lanes.
const MAX_CURVE_DEVIATION: f32 = 8.0;
const CORRIDOR_POINTS: usize = 10;

/// Clearance limits shared by the target lane checks.
struct Clearance {
	look_ahead: f32,
	look_behind: f32,
	min_safe: f32,
	lane_change_safe: f32,
	speed_threshold: f32,
}

impl AiState {
	/// Acts on overtake desire: prefers the left lane, falls back to the right.
	pub(crate) fn consider_lane_change(&mut self, obstacle_distance: f32, obstacle_speed: f32, ctx: &TickContext) {
		if !self.config.enable_lane_changing || self.next_junction.is_some() {
			return;
		}
		let now = ctx.now;
		let cooldown = (self.config.lane_change_cooldown_seconds * 1000.0) as i64;
		if matches!(self.last_lane_change_attempt, Some(last) if now - last < cooldown) {
			return;
		}

		self.last_overtake_desire = self.model.overtake_desire(
			self.current_speed,
			self.desired_speed,
			obstacle_distance,
			obstacle_speed,
			&self.personality
		);
		if self.last_overtake_desire <= self.model.overtake_threshold(&self.personality) {
			return;
		}

		self.last_lane_change_attempt = Some(now);
		let point = *self.network.point(self.current_point);
		if let Some(left) = link(point.left) {
			if self.begin_lane_change(left, true, ctx) {
				return;
			}
		}
		if let Some(right) = link(point.right) {
			self.begin_lane_change(right, false, ctx);
		}
	}

	fn clearance(&self) -> Clearance {
		let config = &self.config;
		Clearance {
			look_ahead: config.lane_change_max_distance_meters * config.lane_change_look_ahead_multiplier,
			look_behind: config.lane_change_max_distance_meters * config.lane_change_look_behind_multiplier,
			min_safe: config.lane_change_min_distance_meters * 0.5,
			lane_change_safe: config.lane_change_max_distance_meters,
			speed_threshold: config.lane_change_speed_threshold_ms(),
		}
	}

	/// Whether merging onto `target` right now is safe: no slow car ahead, no
	/// fast car behind, nobody merging into the same gap and no player in the
	/// way.
	pub(crate) fn is_target_lane_clear(&self, target: u32, is_overtake: bool, ctx: &TickContext) -> bool {
		if target == NONE || !self.network.is_same_direction(self.current_point, target) {
			return false;
		}
		let clearance = self.clearance();
		let speed = self.current_speed;

		// AHEAD / BEHIND IN TARGET LANE

		for ahead in [true, false] {
			let limit = if ahead { clearance.look_ahead } else { clearance.look_behind };
			let mut distance = 0.0;
			let mut check = Some(target);
			while let Some(id) = check {
				if distance >= limit {
					break;
				}
				if let Some(slowest) = self.network.slowest.get(id) {
					if !Arc::ptr_eq(&slowest, &self.shared) {
						let other = slowest.snapshot();
						let physical = (self.status.position - other.position).norm();
						if physical < clearance.min_safe {
							return false;
						}
						if other.lane_changing {
							if other.lane_change_overtake != is_overtake && physical < clearance.lane_change_safe * 1.5 {
								return false;
							}
							if physical < clearance.lane_change_safe {
								return false;
							}
						}
						if ahead && other.current_speed.min(other.target_speed) < speed - clearance.speed_threshold * 0.5 {
							return false;
						}
						if !ahead && other.current_speed > speed + clearance.speed_threshold {
							return false;
						}
					}
				}
				let point = self.network.point(id);
				distance += point.length;
				check = link(if ahead { point.next } else { point.previous });
			}
		}

		// PARALLEL MERGE

		let mut distance = 0.0;
		let mut check = Some(self.current_point);
		while let Some(id) = check {
			if distance >= clearance.look_ahead {
				break;
			}
			if let Some(slowest) = self.network.slowest.get(id) {
				let other = slowest.snapshot();
				if !Arc::ptr_eq(&slowest, &self.shared)
					&& other.lane_changing
					&& other.lane_change_overtake == is_overtake
					&& (self.status.position - other.position).norm() < clearance.lane_change_safe
				{
					return false;
				}
			}
			let point = self.network.point(id);
			distance += point.length;
			check = link(point.next);
		}

		// PLAYERS

		if !self.should_ignore_player_obstacles() {
			let target_position = self.network.point(target).position;
			let lane_width_squared = self.config.lane_width_meters.powi(2);
			for player in ctx.players.iter().filter(|p| p.is_collidable()) {
				let future = player.status.position + player.status.velocity * self.config.lane_change_time_horizon_seconds;
				if (future - target_position).norm_squared() < lane_width_squared * 4.0 {
					return false;
				}

				if self.config.lane_change_check_behind_for_players {
					let distance = (player.status.position - self.status.position).norm();
					if distance < self.config.lane_change_player_look_behind_meters {
						let angle = self.status.angle_to(&player.status.position);
						let behind = !(90.0..=270.0).contains(&angle);
						if behind && player.status.velocity.norm() > speed + clearance.speed_threshold {
							return false;
						}
					}
				}
			}
		}

		!self.is_any_ai_in_target_lane_corridor(target, &clearance, ctx)
	}

	/// Proximity check over every AI, catching cars the per-point table misses
	/// because a slower car holds their point.
	fn is_any_ai_in_target_lane_corridor(&self, target: u32, clearance: &Clearance, ctx: &TickContext) -> bool {
		let radius = clearance.look_ahead + clearance.look_behind + 50.0;
		let radius_squared = radius * radius;
		let speed = self.current_speed;

		for other in ctx.ai {
			if Arc::ptr_eq(other, &self.shared) {
				continue;
			}
			let other = other.snapshot();
			if !other.initialized {
				continue;
			}
			let distance_squared = (self.status.position - other.position).norm_squared();
			if distance_squared > radius_squared || !self.is_car_in_target_lane(&other.position, target) {
				continue;
			}

			let physical = distance_squared.sqrt();
			if physical < clearance.min_safe {
				return true;
			}
			if other.lane_changing && physical < clearance.lane_change_safe * 1.5 {
				return true;
			}
			let their_speed = other.velocity.norm();
			let ahead = self.is_car_ahead(&other.position);
			if ahead && their_speed < speed - clearance.speed_threshold * 0.5 {
				return true;
			}
			if !ahead && their_speed > speed + clearance.speed_threshold {
				return true;
			}
		}
		false
	}

	fn is_car_in_target_lane(&self, position: &Vec3, target: u32) -> bool {
		let near = self.config.lane_width_meters * 1.5;
		for forward in [true, false] {
			let mut check = Some(target);
			for _ in 0..CORRIDOR_POINTS {
				let Some(id) = check else {
					break;
				};
				let point = self.network.point(id);
				if (position - point.position).norm() < near {
					return true;
				}
				check = link(if forward { point.next } else { point.previous });
			}
		}
		false
	}

	fn is_car_ahead(&self, position: &Vec3) -> bool {
		let direction = if self.status.velocity.norm_squared() > 0.01 {
			self.status.velocity.normalize()
		} else {
			self.network.forward(self.current_point)
		};
		(position - self.status.position).dot(&direction) > 0.0
	}

	fn is_lane_change_path_straight_enough(&self, source: u32, target: u32, distance: f32) -> bool {
		[source, target].into_iter().all(|start| {
			let mut travelled = 0.0;
			let mut check = Some(start);
			while let Some(id) = check {
				if travelled >= distance {
					break;
				}
				let point = self.network.point(id);
				if point.radius > 0.0 && point.radius < MIN_LANE_CHANGE_RADIUS {
					return false;
				}
				travelled += point.length;
				check = link(point.next);
			}
			true
		})
	}

	/// Samples the curve at its quarter points; each must stay near one of the
	/// two lanes.
	fn validate_lane_change_curve(&self, plan: &LaneChangePlan, distance: f32) -> bool {
		(1..=3).all(|i| {
			let t = i as f32 * 0.25;
			let position = curve::position(&plan.start_position, &plan.end_position, &plan.start_tangent, &plan.end_tangent, t);
			let mut min_distance = f32::MAX;
			for start in [plan.source, plan.target_entry] {
				let mut travelled = 0.0;
				let mut check = Some(start);
				while let Some(id) = check {
					if travelled >= distance {
						break;
					}
					let point = self.network.point(id);
					min_distance = min_distance.min((position - point.position).norm());
					travelled += point.length;
					check = link(point.next);
				}
			}
			min_distance <= MAX_CURVE_DEVIATION
		})
	}

	/// Plans and starts a lane change onto `target`, the point beside the
	/// current one. Overtakes go left.
	pub fn begin_lane_change(&mut self, target: u32, is_overtake: bool, ctx: &TickContext) -> bool {
		if !self.initialized || self.lane_change.is_changing_lane() {
			return false;
		}
		if !self.is_target_lane_clear(target, is_overtake, ctx) {
			return false;
		}

		let config = &self.config;
		let speed_factor = (self.current_speed / config.max_speed_ms())
			.clamp(config.lane_change_speed_factor_min, config.lane_change_speed_factor_max);
		let distance = config.lane_change_min_distance_meters
			+ (config.lane_change_max_distance_meters - config.lane_change_min_distance_meters) * speed_factor;
		let min_distance = config.lane_change_min_distance_meters;

		if !self.is_lane_change_path_straight_enough(self.current_point, target, distance) {
			return false;
		}

		// END POINT

		let mut ahead = 0.0;
		let mut end = target;
		while ahead < distance {
			let point = self.network.point(end);
			ahead += point.length;
			match link(point.next) {
				Some(next) => end = next,
				None => break,
			}
		}
		if ahead < min_distance {
			return false;
		}

		// CURVE

		let mut start_position = self.status.position;
		start_position.y -= self.profile.spline_height_offset;
		let direction = if self.status.velocity.norm() > 0.1 {
			self.status.velocity.normalize()
		} else {
			self.network.forward(self.current_point)
		};
		let t = if self.current_vec_length > 0.0 { self.current_vec_progress / self.current_vec_length } else { 0.0 };
		let plan = LaneChangePlan {
			source: self.current_point,
			target_entry: target,
			target: end,
			offset: self.current_vec_progress,
			start_position,
			end_position: self.network.point(end).position,
			start_tangent: direction * distance * 0.5,
			end_tangent: self.network.forward(end) * distance * 0.5,
			start_camber: self.network.camber_at(self.current_point, t),
			end_camber: self.network.camber(end),
			is_overtake,
		};
		if !self.validate_lane_change_curve(&plan, distance) {
			return false;
		}

		// COMMIT

		self.indicator = if is_overtake { CarStatusFlags::INDICATE_LEFT } else { CarStatusFlags::INDICATE_RIGHT };
		self.lane_change_source = self.current_point;
		self.lane_change_registration = target;
		self.lane_change.begin(&self.network, &plan);
		self.publish();
		self.network.slowest.enter(target, &self.shared);

		trace!(
			"AI {} starting lane change from {} to {}, overtake={}",
			self.profile.session_id, self.current_point, end, is_overtake
		);
		true
	}

	/// Lands on the target lane: registrations move over, the lane speed offset
	/// is reapplied and the indicator runs out after the clear distance.
	pub(crate) fn complete_lane_change(&mut self) {
		if !self.lane_change.is_changing_lane() {
			return;
		}
		let target = self.lane_change.target();
		let source = self.lane_change.source();
		self.release_lane_change_registrations();
		self.set_current_point(target);

		self.navigation.clear();
		let Some(next) = self.next_point(target) else {
			debug!("AI {} cannot continue after lane change, despawning", self.profile.session_id);
			self.lane_change.complete();
			self.despawn();
			return;
		};
		self.current_vec_length = (self.position_of(next) - self.position_of(target)).norm();
		self.current_vec_progress = 0.0;
		self.calculate_tangents();

		self.end_indicator_distance = self.config.lane_change_indicator_clear_distance_meters;
		self.junction_passed = true;

		let lane_offset = |point: u32| {
			if link(point).is_some_and(|p| self.network.point(p).has_left()) {
				self.config.right_lane_offset_ms()
			} else {
				0.0
			}
		};
		let adjustment = lane_offset(target) - lane_offset(source);
		self.initial_max_speed += adjustment;
		self.max_speed = self.max_speed.max(self.initial_max_speed);

		self.lane_change.complete();
		trace!("AI {} completed lane change to {}", self.profile.session_id, target);
	}

	/// Turns back toward the source lane along a fresh curve. Falls back to a
	/// hard abort when no return point exists.
	pub fn abort_lane_change(&mut self) {
		if !self.lane_change.is_changing_lane() || self.lane_change.is_aborting() {
			return;
		}
		self.network.slowest.leave(self.lane_change_registration, &self.shared);
		self.lane_change_registration = NONE;

		let source = self.lane_change.source();
		let Some(source) = link(source) else {
			self.hard_abort_lane_change();
			return;
		};

		let mut current_position = self.lane_change.interpolated_position();
		current_position.y = self.lane_change.blended_height();
		let current_tangent = self.lane_change.interpolated_tangent();

		let return_distance = (current_position - self.position_of(source)).norm();
		let min_return = return_distance.max(self.config.lane_change_min_distance_meters * 0.5);
		let mut ahead = 0.0;
		let mut return_point = source;
		while ahead < min_return {
			let point = self.network.point(return_point);
			ahead += point.length;
			match link(point.next) {
				Some(next) => return_point = next,
				None => break,
			}
		}
		if return_point == source && ahead < min_return {
			self.hard_abort_lane_change();
			return;
		}

		self.indicator = CarStatusFlags::empty();
		let return_tangent = self.network.forward(return_point);
		self.lane_change.begin_abort_return(&self.network, current_tangent, return_point, return_tangent);
		self.publish();
		trace!("AI {} aborting lane change, returning to {}", self.profile.session_id, return_point);
	}

	/// Drops the maneuver on the spot; the car snaps back onto its source lane.
	pub(crate) fn hard_abort_lane_change(&mut self) {
		if self.lane_change_source != self.current_point {
			self.network.slowest.leave(self.lane_change_source, &self.shared);
		}
		self.network.slowest.leave(self.lane_change_registration, &self.shared);
		self.lane_change_source = NONE;
		self.lane_change_registration = NONE;

		self.navigation.clear();
		self.indicator = CarStatusFlags::empty();
		self.lane_change.abort();
		self.publish();
		trace!("AI {} hard-aborted lane change", self.profile.session_id);
	}

	/// Settles on the source lane once the return curve is driven.
	pub(crate) fn finalize_abort_return(&mut self) {
		if !self.lane_change.is_aborting() {
			return;
		}
		let return_point = self.lane_change.target();
		self.release_lane_change_registrations();
		self.set_current_point(return_point);

		self.navigation.clear();
		let Some(next) = self.next_point(return_point) else {
			debug!("AI {} cannot continue after abort return, despawning", self.profile.session_id);
			self.lane_change.complete();
			self.despawn();
			return;
		};
		self.current_vec_length = (self.position_of(next) - self.position_of(return_point)).norm();
		self.current_vec_progress = 0.0;
		self.calculate_tangents();

		self.lane_change.complete();
		trace!("AI {} returned to source lane at {}", self.profile.session_id, return_point);
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use crate::{
		config::TrafficConfig,
		network::{builder::NetworkBuilder, NONE},
		traffic::{Environment, TickContext},
		vehicle::{shared::AiRef, status::CarStatusFlags, tests::state_on},
	};

	fn two_lanes() -> Arc<crate::network::Network> {
		Arc::new(NetworkBuilder::straight_road(2, 1000.0, 5.0, 3.0).unwrap())
	}

	#[test]
	fn lane_change_moves_registration_and_clears_indicator() {
		let network = two_lanes();
		let environment = Environment::default();
		let mut state = state_on(network.clone(), TrafficConfig::default());
		// right lane, beside point 20 of the left lane
		let start = network.point(20).right;
		state.teleport(start, 0, &environment);

		let ai: Vec<AiRef> = vec![state.shared().clone()];
		let ctx = TickContext { now: 0, players: &[], ai: &ai, environment };
		assert!(state.begin_lane_change(20, true, &ctx));
		assert!(state.is_changing_lane());
		assert!(state.indicator().contains(CarStatusFlags::INDICATE_LEFT));
		assert!(Arc::ptr_eq(&network.slowest.get(20).unwrap(), state.shared()));
		assert!(Arc::ptr_eq(&network.slowest.get(start).unwrap(), state.shared()));

		let mut now = 0;
		while state.is_changing_lane() {
			now += 50;
			state.update(now, &environment);
			assert!(state.indicator().contains(CarStatusFlags::INDICATE_LEFT));
		}
		let landed = state.current_point();
		assert!(landed > 20 && landed < 40);
		assert!(network.slowest.get(start).is_none());
		assert_eq!(network.slowest.entries_of(state.shared()), vec![landed]);

		// indicator stays on for the clear distance, then goes out
		let landed_z = state.status.position.z;
		while state.status.position.z - landed_z < 30.0 {
			now += 50;
			state.update(now, &environment);
		}
		assert!(state.indicator().is_empty());
	}

	#[test]
	fn target_lane_with_slow_car_ahead_is_not_clear() {
		let network = two_lanes();
		let environment = Environment::default();
		let mut state = state_on(network.clone(), TrafficConfig::default());
		let mut blocker = state_on(network.clone(), TrafficConfig::default());
		state.teleport(network.point(20).right, 0, &environment);
		blocker.teleport(26, 0, &environment);
		blocker.current_speed = 2.0;
		blocker.publish();

		let ai: Vec<AiRef> = vec![state.shared().clone(), blocker.shared().clone()];
		let ctx = TickContext { now: 0, players: &[], ai: &ai, environment };
		assert!(!state.is_target_lane_clear(20, true, &ctx));
		assert!(!state.begin_lane_change(20, true, &ctx));
		assert!(!state.is_changing_lane());
	}

	#[test]
	fn abort_returns_to_source_lane() {
		let network = two_lanes();
		let environment = Environment::default();
		let mut state = state_on(network.clone(), TrafficConfig::default());
		let start = network.point(20).right;
		state.teleport(start, 0, &environment);
		let ai: Vec<AiRef> = vec![state.shared().clone()];
		let ctx = TickContext { now: 0, players: &[], ai: &ai, environment };
		assert!(state.begin_lane_change(20, true, &ctx));
		state.update(200, &environment);

		state.stop_for_collision(200);
		assert!(state.lane_change.is_aborting());
		assert!(state.indicator().is_empty());
		assert!(network.slowest.get(20).is_none());

		let mut now = 200;
		while state.is_changing_lane() && now < 20_000 {
			now += 50;
			state.update(now, &environment);
		}
		assert!(!state.is_changing_lane());
		assert!(state.current_point() > start);
		assert_ne!(state.current_point(), NONE);
		assert!(network.point(state.current_point()).has_left());
	}
}
