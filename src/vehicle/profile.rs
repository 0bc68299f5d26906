use crate::config::{LaneSpawnBehavior, SlotConfig, TrafficConfig};

/// Driving parameters of one slot: the global defaults with the slot's
/// overrides applied.
#[derive(Debug, Clone)]
pub struct VehicleProfile {
	pub session_id: u8,
	pub length_pre: f32,
	pub length_post: f32,
	pub acceleration: f32,
	pub deceleration: f32,
	pub cornering_speed_factor: f32,
	pub cornering_brake_distance_factor: f32,
	pub cornering_brake_force_factor: f32,
	pub spline_height_offset: f32,
	pub tyre_diameter: f32,
	pub idle_engine_rpm: u16,
	pub max_engine_rpm: u16,
	/// Squared, only set when the slot overrides the lane defaults.
	pub min_safety_distance_squared: Option<f32>,
	pub max_safety_distance_squared: Option<f32>,
	pub spawn_protection_ms: (i64, i64),
	pub collision_stop_ms: (i64, i64),
	pub min_lane_count: Option<usize>,
	pub max_lane_count: Option<usize>,
	pub allowed_lanes: Option<Vec<LaneSpawnBehavior>>,
}

impl VehicleProfile {
	pub fn resolve(config: &TrafficConfig, slot: &SlotConfig) -> Self {
		let seconds = |value: u32| value as i64 * 1000;
		Self {
			session_id: slot.session_id,
			length_pre: slot.vehicle_length_pre_meters,
			length_post: slot.vehicle_length_post_meters,
			acceleration: slot.acceleration.unwrap_or(config.default_acceleration),
			deceleration: slot.deceleration.unwrap_or(config.default_deceleration),
			cornering_speed_factor: slot.cornering_speed_factor.unwrap_or(config.cornering_speed_factor),
			cornering_brake_distance_factor: slot.cornering_brake_distance_factor.unwrap_or(config.cornering_brake_distance_factor),
			cornering_brake_force_factor: slot.cornering_brake_force_factor.unwrap_or(config.cornering_brake_force_factor),
			spline_height_offset: slot.spline_height_offset_meters.unwrap_or(config.spline_height_offset_meters),
			tyre_diameter: slot.tyre_diameter_meters.unwrap_or(config.tyre_diameter_meters),
			idle_engine_rpm: slot.idle_engine_rpm,
			max_engine_rpm: slot.max_engine_rpm,
			min_safety_distance_squared: slot.min_ai_safety_distance_meters.map(|d| d * d),
			max_safety_distance_squared: slot.max_ai_safety_distance_meters.map(|d| d * d),
			spawn_protection_ms: (
				seconds(slot.min_spawn_protection_time_seconds.unwrap_or(config.min_spawn_protection_time_seconds)),
				seconds(slot.max_spawn_protection_time_seconds.unwrap_or(config.max_spawn_protection_time_seconds)),
			),
			collision_stop_ms: (
				seconds(slot.min_collision_stop_time_seconds.unwrap_or(config.min_collision_stop_time_seconds)),
				seconds(slot.max_collision_stop_time_seconds.unwrap_or(config.max_collision_stop_time_seconds)),
			),
			min_lane_count: slot.min_lane_count,
			max_lane_count: slot.max_lane_count,
			allowed_lanes: slot.allowed_lanes.clone(),
		}
	}
}
