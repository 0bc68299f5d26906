//! Car-following and overtaking heuristics built on the Intelligent Driver
//! Model.

use crate::config::TrafficConfig;

use super::personality::DriverPersonality;

/// Free-road acceleration exponent.
const DELTA: i32 = 4;
const MIN_GAP: f32 = 0.01;
const GRAVITY: f32 = 9.81;

/// A vehicle ahead as seen by the follower.
#[derive(Debug, Clone, Copy)]
pub struct Leader {
	pub gap: f32,
	pub speed: f32,
	pub acceleration: f32,
}

#[derive(Debug, Clone, Copy)]
pub struct CarFollowing {
	/// Base time headway T in seconds.
	pub time_headway: f32,
	/// Base standstill gap s0 in meters.
	pub min_gap: f32,
	pub coolness: f32,
	pub anticipation_count: usize,
	pub anticipation_decay: f32,
	/// Leaders further than this never make a driver want to overtake.
	pub overtake_range: f32,
	pub overtake_threshold: f32,
}

impl From<&TrafficConfig> for CarFollowing {
	fn from(config: &TrafficConfig) -> Self {
		Self {
			time_headway: config.idm_base_time_headway_seconds,
			min_gap: config.idm_min_gap_meters,
			coolness: config.coolness_factor,
			anticipation_count: config.multi_anticipation_count,
			anticipation_decay: config.multi_anticipation_decay,
			overtake_range: config.lane_change_max_distance_meters * 3.0,
			overtake_threshold: config.overtake_desire_threshold,
		}
	}
}

impl CarFollowing {
	/// Dynamic desired gap s* = s0 + max(0, vT + vΔv / 2√(ab)).
	pub fn desired_gap(
		&self,
		speed: f32,
		leader_speed: f32,
		personality: &DriverPersonality,
		max_acceleration: f32,
		comfortable_deceleration: f32
	) -> f32 {
		let a = max_acceleration * personality.acceleration_factor;
		let b = comfortable_deceleration * personality.deceleration_factor;
		let t = self.time_headway * personality.following_distance_factor;
		let s0 = self.min_gap * personality.following_distance_factor;
		let dynamic = speed * t + speed * (speed - leader_speed) / (2.0 * (a * b).sqrt());
		s0 + dynamic.max(0.0)
	}

	/// Continuous IDM acceleration, clamped to [-2b, a].
	pub fn acceleration(
		&self,
		speed: f32,
		desired_speed: f32,
		gap: f32,
		leader_speed: f32,
		personality: &DriverPersonality,
		max_acceleration: f32,
		comfortable_deceleration: f32
	) -> f32 {
		let raw = self.raw_acceleration(speed, desired_speed, gap, leader_speed, personality, max_acceleration, comfortable_deceleration);
		raw.clamp(-2.0 * comfortable_deceleration, max_acceleration)
	}

	fn raw_acceleration(
		&self,
		speed: f32,
		desired_speed: f32,
		gap: f32,
		leader_speed: f32,
		personality: &DriverPersonality,
		max_acceleration: f32,
		comfortable_deceleration: f32
	) -> f32 {
		let a = max_acceleration * personality.acceleration_factor;
		let speed_ratio = if desired_speed > 0.01 { speed / desired_speed } else { 1.0 };
		let desired_gap = self.desired_gap(speed, leader_speed, personality, max_acceleration, comfortable_deceleration);
		let gap_ratio = desired_gap / gap.max(MIN_GAP);
		a * (1.0 - speed_ratio.powi(DELTA) - gap_ratio * gap_ratio)
	}

	/// IDM blended with the constant-acceleration heuristic so that cut-ins
	/// and slowly closing leaders do not cause overreactions.
	pub fn acc_acceleration(
		&self,
		speed: f32,
		desired_speed: f32,
		leader: &Leader,
		personality: &DriverPersonality,
		max_acceleration: f32,
		comfortable_deceleration: f32
	) -> f32 {
		let a = max_acceleration * personality.acceleration_factor;
		let b = comfortable_deceleration * personality.deceleration_factor;
		let idm = self.raw_acceleration(speed, desired_speed, leader.gap, leader.speed, personality, max_acceleration, comfortable_deceleration);
		let cah = constant_acceleration_heuristic(speed, leader.speed, leader.gap, leader.acceleration, a);
		let blended = if idm >= cah {
			idm
		} else {
			(1.0 - self.coolness) * idm + self.coolness * (cah + b * ((idm - cah) / b).tanh())
		};
		blended.clamp(-2.0 * comfortable_deceleration, max_acceleration)
	}

	/// Weighted response to several leaders, nearest first, with weights
	/// decaying geometrically.
	pub fn multi_anticipative_acceleration(
		&self,
		speed: f32,
		desired_speed: f32,
		leaders: &[Leader],
		personality: &DriverPersonality,
		max_acceleration: f32,
		comfortable_deceleration: f32
	) -> f32 {
		let leaders = &leaders[..leaders.len().min(self.anticipation_count.max(1))];
		if leaders.is_empty() {
			let free = Leader { gap: f32::MAX, speed, acceleration: 0.0 };
			return self.acc_acceleration(speed, desired_speed, &free, personality, max_acceleration, comfortable_deceleration);
		}

		let mut weight = 1.0;
		let mut weight_sum = 0.0;
		let mut result = 0.0;
		for leader in leaders {
			result += weight * self.acc_acceleration(speed, desired_speed, leader, personality, max_acceleration, comfortable_deceleration);
			weight_sum += weight;
			weight *= self.anticipation_decay;
		}
		result / weight_sum
	}

	/// Urge to leave the current lane, 0..=1.
	pub fn overtake_desire(
		&self,
		speed: f32,
		desired_speed: f32,
		gap: f32,
		leader_speed: f32,
		personality: &DriverPersonality
	) -> f32 {
		if gap > self.overtake_range || gap < 0.0 {
			return 0.0;
		}
		let deficit = desired_speed - speed;
		if deficit <= 0.0 {
			return 0.0;
		}

		let speed_frustration = (deficit / (desired_speed * 0.2)).clamp(0.0, 1.0);
		let ideal_gap = self.time_headway * personality.following_distance_factor * speed + self.min_gap;
		let gap_frustration = if gap < ideal_gap {
			(1.0 - gap / ideal_gap).clamp(0.0, 1.0)
		} else {
			0.0
		};
		let closing = speed - leader_speed;
		let closing_frustration = if closing > 0.0 { (closing / 5.0).clamp(0.0, 1.0) } else { 0.0 };

		let frustration = speed_frustration * 0.4 + gap_frustration * 0.35 + closing_frustration * 0.25;
		(frustration * personality.aggressiveness).clamp(0.0, 1.0)
	}

	/// Desire needed before a driver acts on it; aggressive drivers act sooner.
	pub fn overtake_threshold(&self, personality: &DriverPersonality) -> f32 {
		self.overtake_threshold / personality.aggressiveness
	}
}

fn constant_acceleration_heuristic(speed: f32, leader_speed: f32, gap: f32, leader_acceleration: f32, max_acceleration: f32) -> f32 {
	let gap = gap.max(MIN_GAP);
	let leader_acceleration = leader_acceleration.clamp(-max_acceleration, max_acceleration);
	if leader_speed * (speed - leader_speed) <= -2.0 * gap * leader_acceleration {
		let term = leader_speed * leader_speed - 2.0 * leader_acceleration * gap;
		(speed * speed - term.max(0.0)) / (2.0 * gap)
	} else {
		let closing = speed - leader_speed;
		leader_acceleration - closing * closing / (2.0 * gap)
	}
}

/// Road speed limited by upcoming curvature, scaled by the driver's taste.
pub fn desired_speed(road_max_speed: f32, cornering_max_speed: f32, personality: &DriverPersonality) -> f32 {
	road_max_speed.min(cornering_max_speed) * personality.desired_speed_factor
}

pub fn braking_distance(speed: f32, deceleration: f32) -> f32 {
	speed * speed / (2.0 * deceleration)
}

pub fn max_cornering_speed_squared(radius: f32, cornering_speed_factor: f32) -> f32 {
	radius * GRAVITY * cornering_speed_factor
}

/// Seconds until contact, infinite when not closing.
pub fn time_to_collision(gap: f32, relative_speed: f32) -> f32 {
	if relative_speed <= 0.0 {
		f32::INFINITY
	} else {
		gap / relative_speed
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn model() -> CarFollowing {
		CarFollowing::from(&TrafficConfig::default())
	}

	#[test]
	fn braking_scenario_matches_closed_form() {
		let personality = DriverPersonality::default();
		let accel = model().acceleration(20.0, 22.0, 50.0, 0.0, &personality, 2.5, 8.5);
		// s* = 2 + 30 + 400 / (2 * sqrt(21.25)) = 75.386
		let s_star = 2.0 + 30.0 + 400.0 / (2.0 * 21.25_f32.sqrt());
		let expected = 2.5 * (1.0 - (20.0_f32 / 22.0).powi(4) - (s_star / 50.0).powi(2));
		assert!(accel < 0.0);
		assert!((accel - expected).abs() < expected.abs() * 0.01);
		assert!((accel - -4.8906).abs() < 0.05);
	}

	#[test]
	fn far_leader_approaches_free_flow() {
		let personality = DriverPersonality::default();
		let m = model();
		let free = 2.5 * (1.0 - (20.0_f32 / 22.0).powi(4));
		let mut previous = f32::MIN;
		for gap in [100.0, 1_000.0, 10_000.0, 100_000.0] {
			let accel = m.acceleration(20.0, 22.0, gap, 20.0, &personality, 2.5, 8.5);
			assert!(accel > previous);
			previous = accel;
		}
		assert!((previous - free).abs() < 1.0e-3);
	}

	#[test]
	fn touching_stopped_leader_brakes_hard() {
		let personality = DriverPersonality::default();
		let accel = model().acceleration(10.0, 22.0, 0.0, 0.0, &personality, 2.5, 8.5);
		assert_eq!(accel, -17.0);
	}

	#[test]
	fn tiny_desired_speed_has_no_free_term() {
		let personality = DriverPersonality::default();
		let accel = model().acceleration(5.0, 0.0, f32::MAX, 5.0, &personality, 2.5, 8.5);
		assert!(accel.abs() < 1.0e-4);
	}

	#[test]
	fn acc_blend_softens_cut_in() {
		let personality = DriverPersonality::default();
		let m = model();
		// leader cut in close but drives at the same speed
		let leader = Leader { gap: 10.0, speed: 20.0, acceleration: 0.0 };
		let idm = m.acceleration(20.0, 22.0, 10.0, 20.0, &personality, 2.5, 8.5);
		let acc = m.acc_acceleration(20.0, 22.0, &leader, &personality, 2.5, 8.5);
		assert!(acc > idm);
		assert!(acc < 0.0);
	}

	#[test]
	fn multi_anticipation_weights_nearest_leader() {
		let personality = DriverPersonality::default();
		let m = model();
		let near = Leader { gap: 30.0, speed: 15.0, acceleration: 0.0 };
		let far = Leader { gap: 200.0, speed: 25.0, acceleration: 0.0 };
		let single = m.acc_acceleration(20.0, 22.0, &near, &personality, 2.5, 8.5);
		let both = m.multi_anticipative_acceleration(20.0, 22.0, &[near, far], &personality, 2.5, 8.5);
		let far_only = m.acc_acceleration(20.0, 22.0, &far, &personality, 2.5, 8.5);
		assert!((both - (single * 2.0 + far_only) / 3.0).abs() < 1.0e-4);
	}

	#[test]
	fn overtake_desire_rules() {
		let personality = DriverPersonality::default();
		let m = model();
		assert_eq!(m.overtake_desire(20.0, 22.0, 151.0, 10.0, &personality), 0.0);
		assert_eq!(m.overtake_desire(20.0, 22.0, -1.0, 10.0, &personality), 0.0);
		assert_eq!(m.overtake_desire(22.0, 22.0, 20.0, 10.0, &personality), 0.0);

		// stuck behind a slow car: full speed and closing frustration, some gap frustration
		let desire = m.overtake_desire(10.0, 22.0, 10.0, 5.0, &personality);
		let ideal_gap = 1.5 * 10.0 + 2.0;
		let expected = 0.4 + (1.0 - 10.0 / ideal_gap) * 0.35 + 0.25;
		assert!((desire - expected).abs() < 1.0e-5);

		let calm = DriverPersonality { aggressiveness: 0.7, ..Default::default() };
		assert!(m.overtake_desire(10.0, 22.0, 10.0, 5.0, &calm) < desire);
		assert!(m.overtake_threshold(&calm) > m.overtake_threshold(&personality));
	}

	#[test]
	fn helper_physics() {
		assert!((braking_distance(20.0, 8.0) - 25.0).abs() < 1.0e-5);
		assert!((max_cornering_speed_squared(100.0, 0.65) - 637.65).abs() < 1.0e-2);
		assert_eq!(time_to_collision(10.0, 0.0), f32::INFINITY);
		assert_eq!(time_to_collision(10.0, 5.0), 2.0);
		let p = DriverPersonality { desired_speed_factor: 1.1, ..Default::default() };
		assert!((desired_speed(20.0, 15.0, &p) - 16.5).abs() < 1.0e-5);
	}
}
