use std::{collections::{BTreeMap, HashSet}, path::Path};

use serde::{Deserialize, Serialize};

use crate::{error::{ConfigError, Result, TrafficError}, network::Vec3};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum AiMode {
	#[default]
	None,
	/// AI drives the slot whenever no player is connected to it.
	Auto,
	/// The slot is reserved for AI.
	Fixed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LaneSpawnBehavior {
	Left,
	Middle,
	Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sphere {
	pub center: [f32; 3],
	pub radius_meters: f32,
}

impl Sphere {
	pub fn contains(&self, position: &Vec3) -> bool {
		let center = Vec3::new(self.center[0], self.center[1], self.center[2]);
		(position - center).norm_squared() < self.radius_meters * self.radius_meters
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LaneCountOverrides {
	pub min_ai_safety_distance_meters: f32,
	pub max_ai_safety_distance_meters: f32,
}

/// Per-slot settings. Every `Option` falls back to the global value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SlotConfig {
	pub session_id: u8,
	pub ai_mode: AiMode,
	pub vehicle_length_pre_meters: f32,
	pub vehicle_length_post_meters: f32,
	pub acceleration: Option<f32>,
	pub deceleration: Option<f32>,
	pub cornering_speed_factor: Option<f32>,
	pub cornering_brake_distance_factor: Option<f32>,
	pub cornering_brake_force_factor: Option<f32>,
	pub spline_height_offset_meters: Option<f32>,
	pub tyre_diameter_meters: Option<f32>,
	pub idle_engine_rpm: u16,
	pub max_engine_rpm: u16,
	pub min_ai_safety_distance_meters: Option<f32>,
	pub max_ai_safety_distance_meters: Option<f32>,
	pub min_spawn_protection_time_seconds: Option<u32>,
	pub max_spawn_protection_time_seconds: Option<u32>,
	pub min_collision_stop_time_seconds: Option<u32>,
	pub max_collision_stop_time_seconds: Option<u32>,
	pub min_lane_count: Option<usize>,
	pub max_lane_count: Option<usize>,
	pub allowed_lanes: Option<Vec<LaneSpawnBehavior>>,
}

impl Default for SlotConfig {
	fn default() -> Self {
		Self {
			session_id: 0,
			ai_mode: AiMode::Fixed,
			vehicle_length_pre_meters: 2.0,
			vehicle_length_post_meters: 2.0,
			acceleration: None,
			deceleration: None,
			cornering_speed_factor: None,
			cornering_brake_distance_factor: None,
			cornering_brake_force_factor: None,
			spline_height_offset_meters: None,
			tyre_diameter_meters: None,
			idle_engine_rpm: 800,
			max_engine_rpm: 3000,
			min_ai_safety_distance_meters: None,
			max_ai_safety_distance_meters: None,
			min_spawn_protection_time_seconds: None,
			max_spawn_protection_time_seconds: None,
			min_collision_stop_time_seconds: None,
			max_collision_stop_time_seconds: None,
			min_lane_count: None,
			max_lane_count: None,
			allowed_lanes: None,
		}
	}
}

/// Everything that tunes the traffic simulation. Loaded from RON, every field
/// optional in the file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrafficConfig {
	/// Seed for every random draw of the session. Entropy when absent.
	pub seed: Option<u64>,
	pub debug: bool,
	pub ai_behavior_update_interval_hz: u32,
	pub obstacle_detection_interval_ms: u64,

	// POPULATION

	/// 0 derives the value from the slot list.
	pub max_ai_target_count: usize,
	/// 0 derives the value from the slot list.
	pub ai_per_player_target_count: usize,
	pub traffic_density: f32,
	pub hourly_traffic_density: Option<Vec<f32>>,
	pub player_cluster_radius_meters: f32,
	pub cluster_diminishing_factor: f32,

	// SPAWN / DESPAWN

	pub min_spawn_distance_meters: f32,
	pub max_spawn_distance_meters: f32,
	pub despawn_distance_meters: f32,
	pub player_position_offset_meters: f32,
	pub player_afk_timeout_seconds: u32,
	pub max_player_distance_to_ai_spline_meters: f32,
	pub min_traffic_gap_meters: f32,
	pub max_traffic_gap_meters: f32,
	pub state_spawn_distance_meters: f32,
	pub min_state_distance_meters: f32,
	pub spawn_safety_distance_to_player_meters: f32,
	pub min_spawn_protection_time_seconds: u32,
	pub max_spawn_protection_time_seconds: u32,
	pub min_collision_stop_time_seconds: u32,
	pub max_collision_stop_time_seconds: u32,
	pub two_way_traffic: bool,
	pub wrong_way_traffic: bool,
	pub lane_count_specific_overrides: BTreeMap<usize, LaneCountOverrides>,

	// DRIVING

	pub max_speed_kph: f32,
	pub right_lane_offset_kph: f32,
	pub max_speed_variation_percent: f32,
	pub default_acceleration: f32,
	pub default_deceleration: f32,
	pub spline_height_offset_meters: f32,
	pub tyre_diameter_meters: f32,
	pub cornering_speed_factor: f32,
	pub cornering_brake_distance_factor: f32,
	pub cornering_brake_force_factor: f32,
	pub ignore_obstacles_after_seconds: u32,
	pub ignore_mode_duration_seconds: u32,
	pub lookahead_buffer_meters: f32,
	pub player_detection_angle_range: f32,
	pub player_detection_height_threshold: f32,
	pub ignore_player_obstacle_spheres: Vec<Sphere>,
	pub enable_daytime_lights: bool,

	// LANE CHANGE

	pub lane_width_meters: f32,
	pub enable_lane_changing: bool,
	pub lane_change_min_distance_meters: f32,
	pub lane_change_max_distance_meters: f32,
	pub lane_change_speed_threshold_kph: f32,
	pub lane_change_cooldown_seconds: f32,
	pub lane_change_look_ahead_multiplier: f32,
	pub lane_change_look_behind_multiplier: f32,
	pub lane_change_time_horizon_seconds: f32,
	pub lane_change_check_behind_for_players: bool,
	pub lane_change_player_look_behind_meters: f32,
	pub lane_change_indicator_clear_distance_meters: f32,
	pub lane_change_speed_factor_min: f32,
	pub lane_change_speed_factor_max: f32,

	// DRIVER MODEL

	pub idm_base_time_headway_seconds: f32,
	pub idm_min_gap_meters: f32,
	pub coolness_factor: f32,
	pub multi_anticipation_count: usize,
	pub multi_anticipation_decay: f32,
	pub personality_variety: f32,
	pub personality_bias: f32,
	pub overtake_desire_threshold: f32,
	pub drive_off_delay_min_seconds: f32,
	pub drive_off_delay_max_seconds: f32,
	pub drive_off_ramp_seconds: f32,
	pub reaction_time_min_seconds: f32,
	pub reaction_time_max_seconds: f32,
	pub gap_estimation_error: f32,
	pub speed_estimation_error: f32,

	pub slots: Vec<SlotConfig>,
}

impl Default for TrafficConfig {
	fn default() -> Self {
		Self {
			seed: None,
			debug: false,
			ai_behavior_update_interval_hz: 2,
			obstacle_detection_interval_ms: 100,

			max_ai_target_count: 0,
			ai_per_player_target_count: 0,
			traffic_density: 1.0,
			hourly_traffic_density: None,
			player_cluster_radius_meters: 150.0,
			cluster_diminishing_factor: 0.25,

			min_spawn_distance_meters: 100.0,
			max_spawn_distance_meters: 400.0,
			despawn_distance_meters: 200.0,
			player_position_offset_meters: 100.0,
			player_afk_timeout_seconds: 10,
			max_player_distance_to_ai_spline_meters: 7.0,
			min_traffic_gap_meters: 20.0,
			max_traffic_gap_meters: 70.0,
			state_spawn_distance_meters: 1000.0,
			min_state_distance_meters: 200.0,
			spawn_safety_distance_to_player_meters: 150.0,
			min_spawn_protection_time_seconds: 4,
			max_spawn_protection_time_seconds: 8,
			min_collision_stop_time_seconds: 1,
			max_collision_stop_time_seconds: 3,
			two_way_traffic: false,
			wrong_way_traffic: true,
			lane_count_specific_overrides: BTreeMap::new(),

			max_speed_kph: 80.0,
			right_lane_offset_kph: 10.0,
			max_speed_variation_percent: 0.15,
			default_acceleration: 2.5,
			default_deceleration: 8.5,
			spline_height_offset_meters: 0.0,
			tyre_diameter_meters: 0.65,
			cornering_speed_factor: 0.65,
			cornering_brake_distance_factor: 3.0,
			cornering_brake_force_factor: 0.5,
			ignore_obstacles_after_seconds: 10,
			ignore_mode_duration_seconds: 10,
			lookahead_buffer_meters: 20.0,
			player_detection_angle_range: 14.0,
			player_detection_height_threshold: 1.5,
			ignore_player_obstacle_spheres: Vec::new(),
			enable_daytime_lights: false,

			lane_width_meters: 3.0,
			enable_lane_changing: true,
			lane_change_min_distance_meters: 20.0,
			lane_change_max_distance_meters: 50.0,
			lane_change_speed_threshold_kph: 10.0,
			lane_change_cooldown_seconds: 8.0,
			lane_change_look_ahead_multiplier: 2.0,
			lane_change_look_behind_multiplier: 1.0,
			lane_change_time_horizon_seconds: 2.0,
			lane_change_check_behind_for_players: true,
			lane_change_player_look_behind_meters: 50.0,
			lane_change_indicator_clear_distance_meters: 20.0,
			lane_change_speed_factor_min: 0.5,
			lane_change_speed_factor_max: 1.5,

			idm_base_time_headway_seconds: 1.5,
			idm_min_gap_meters: 2.0,
			coolness_factor: 0.99,
			multi_anticipation_count: 3,
			multi_anticipation_decay: 0.5,
			personality_variety: 0.3,
			personality_bias: 0.0,
			overtake_desire_threshold: 0.5,
			drive_off_delay_min_seconds: 0.8,
			drive_off_delay_max_seconds: 1.8,
			drive_off_ramp_seconds: 1.5,
			reaction_time_min_seconds: 0.3,
			reaction_time_max_seconds: 1.0,
			gap_estimation_error: 0.1,
			speed_estimation_error: 0.02,

			slots: Vec::new(),
		}
	}
}

impl TrafficConfig {
	pub fn from_ron_str(source: &str) -> Result<Self> {
		let mut config: TrafficConfig = ron::from_str(source)?;
		config.apply_fixes();
		config.validate()?;
		Ok(config)
	}

	pub fn load(path: impl AsRef<Path>) -> Result<Self> {
		let path = path.as_ref();
		let source = std::fs::read_to_string(path).map_err(|source| TrafficError::Io {
			path: path.to_path_buf(),
			source,
		})?;
		Self::from_ron_str(&source)
	}

	/// Fills in the target counts that default to "derive from the slot list".
	pub fn apply_fixes(&mut self) {
		if self.ai_per_player_target_count == 0 {
			self.ai_per_player_target_count = self.slots
				.iter()
				.filter(|s| s.ai_mode != AiMode::None)
				.count();
		}
		if self.max_ai_target_count == 0 {
			self.max_ai_target_count = self.slots
				.iter()
				.filter(|s| s.ai_mode != AiMode::Fixed)
				.count()
				.max(1) * self.ai_per_player_target_count;
		}
	}

	pub fn validate(&self) -> Result<()> {
		let mut errors = Vec::new();

		fn order(errors: &mut Vec<ConfigError>, min: f32, max: f32, min_name: &'static str, max_name: &'static str) {
			if min > max {
				errors.push(ConfigError::MinAboveMax { min: min_name, max: max_name });
			}
		}
		fn range(errors: &mut Vec<ConfigError>, value: f32, lower: f32, upper: f32, field: &'static str) {
			if !(lower..=upper).contains(&value) {
				errors.push(ConfigError::OutOfRange { field, lower, upper, value });
			}
		}
		fn positive(errors: &mut Vec<ConfigError>, value: f32, field: &'static str) {
			if value <= 0.0 {
				errors.push(ConfigError::NotPositive(field));
			}
		}

		order(&mut errors, self.min_spawn_distance_meters, self.max_spawn_distance_meters,
			"min_spawn_distance_meters", "max_spawn_distance_meters");
		order(&mut errors, self.min_traffic_gap_meters, self.max_traffic_gap_meters,
			"min_traffic_gap_meters", "max_traffic_gap_meters");
		order(&mut errors, self.min_spawn_protection_time_seconds as f32, self.max_spawn_protection_time_seconds as f32,
			"min_spawn_protection_time_seconds", "max_spawn_protection_time_seconds");
		order(&mut errors, self.min_collision_stop_time_seconds as f32, self.max_collision_stop_time_seconds as f32,
			"min_collision_stop_time_seconds", "max_collision_stop_time_seconds");
		order(&mut errors, self.lane_change_min_distance_meters, self.lane_change_max_distance_meters,
			"lane_change_min_distance_meters", "lane_change_max_distance_meters");
		order(&mut errors, self.lane_change_speed_factor_min, self.lane_change_speed_factor_max,
			"lane_change_speed_factor_min", "lane_change_speed_factor_max");
		order(&mut errors, self.drive_off_delay_min_seconds, self.drive_off_delay_max_seconds,
			"drive_off_delay_min_seconds", "drive_off_delay_max_seconds");
		order(&mut errors, self.reaction_time_min_seconds, self.reaction_time_max_seconds,
			"reaction_time_min_seconds", "reaction_time_max_seconds");

		range(&mut errors, self.max_speed_variation_percent, 0.0, 1.0, "max_speed_variation_percent");
		range(&mut errors, self.personality_variety, 0.0, 1.0, "personality_variety");
		range(&mut errors, self.personality_bias, -1.0, 1.0, "personality_bias");
		range(&mut errors, self.overtake_desire_threshold, 0.0, 1.0, "overtake_desire_threshold");
		range(&mut errors, self.coolness_factor, 0.0, 1.0, "coolness_factor");
		range(&mut errors, self.multi_anticipation_count as f32, 1.0, 3.0, "multi_anticipation_count");
		range(&mut errors, self.multi_anticipation_decay, 0.1, 0.9, "multi_anticipation_decay");

		positive(&mut errors, self.default_acceleration, "default_acceleration");
		positive(&mut errors, self.default_deceleration, "default_deceleration");
		positive(&mut errors, self.ai_behavior_update_interval_hz as f32, "ai_behavior_update_interval_hz");
		positive(&mut errors, self.obstacle_detection_interval_ms as f32, "obstacle_detection_interval_ms");
		positive(&mut errors, self.max_speed_kph, "max_speed_kph");
		positive(&mut errors, self.traffic_density, "traffic_density");
		positive(&mut errors, self.lane_width_meters, "lane_width_meters");

		if let Some(hourly) = &self.hourly_traffic_density {
			if hourly.len() != 24 {
				errors.push(ConfigError::HourlyDensityLength(hourly.len()));
			}
		}

		for (lanes, overrides) in &self.lane_count_specific_overrides {
			if *lanes == 0 {
				errors.push(ConfigError::ZeroLaneCount);
			}
			order(&mut errors, overrides.min_ai_safety_distance_meters, overrides.max_ai_safety_distance_meters,
				"lane_count_specific_overrides.min_ai_safety_distance_meters",
				"lane_count_specific_overrides.max_ai_safety_distance_meters");
		}

		let mut seen = HashSet::new();
		for slot in &self.slots {
			if !seen.insert(slot.session_id) {
				errors.push(ConfigError::DuplicateSlot(slot.session_id));
			}
		}

		if errors.is_empty() {
			Ok(())
		} else {
			Err(TrafficError::Config(errors))
		}
	}

	pub fn max_speed_ms(&self) -> f32 {
		self.max_speed_kph / 3.6
	}

	pub fn right_lane_offset_ms(&self) -> f32 {
		self.right_lane_offset_kph / 3.6
	}

	pub fn lane_change_speed_threshold_ms(&self) -> f32 {
		self.lane_change_speed_threshold_kph / 3.6
	}

	pub fn player_radius_squared(&self) -> f32 {
		self.despawn_distance_meters * self.despawn_distance_meters
	}

	pub fn player_afk_timeout_ms(&self) -> i64 {
		self.player_afk_timeout_seconds as i64 * 1000
	}

	pub fn update_interval_ms(&self) -> u64 {
		1000 / self.ai_behavior_update_interval_hz.max(1) as u64
	}

	/// Traffic density for the given hour of day, falling back to the flat value.
	pub fn density_at(&self, hour: Option<u32>) -> f32 {
		match (&self.hourly_traffic_density, hour) {
			(Some(hourly), Some(hour)) if hourly.len() == 24 => hourly[(hour % 24) as usize],
			_ => self.traffic_density,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults_are_valid() {
		let config = TrafficConfig::default();
		assert!(config.validate().is_ok());
		assert!((config.max_speed_ms() - 22.222).abs() < 0.01);
		assert_eq!(config.update_interval_ms(), 500);
	}

	#[test]
	fn parses_partial_ron_document() {
		let config = TrafficConfig::from_ron_str(
			"(max_speed_kph: 100.0, seed: Some(7), slots: [(session_id: 3, ai_mode: Auto)])"
		).unwrap();
		assert_eq!(config.max_speed_kph, 100.0);
		assert_eq!(config.seed, Some(7));
		assert_eq!(config.slots[0].session_id, 3);
		assert_eq!(config.slots[0].vehicle_length_pre_meters, 2.0);
		assert_eq!(config.ai_per_player_target_count, 1);
		assert_eq!(config.max_ai_target_count, 1);
	}

	#[test]
	fn rejects_inverted_ranges_and_bad_factors() {
		let config = TrafficConfig {
			min_traffic_gap_meters: 80.0,
			max_speed_variation_percent: 1.5,
			default_deceleration: 0.0,
			multi_anticipation_count: 4,
			hourly_traffic_density: Some(vec![1.0; 3]),
			..Default::default()
		};
		match config.validate() {
			Err(TrafficError::Config(errors)) => {
				assert!(errors.contains(&ConfigError::MinAboveMax {
					min: "min_traffic_gap_meters",
					max: "max_traffic_gap_meters",
				}));
				assert!(errors.contains(&ConfigError::NotPositive("default_deceleration")));
				assert!(errors.contains(&ConfigError::HourlyDensityLength(3)));
				assert_eq!(errors.len(), 5);
			}
			other => panic!("expected config errors, got {other:?}"),
		}
	}

	#[test]
	fn hourly_density_overrides_flat_value() {
		let mut hourly = vec![1.0; 24];
		hourly[3] = 0.25;
		let config = TrafficConfig {
			hourly_traffic_density: Some(hourly),
			..Default::default()
		};
		assert_eq!(config.density_at(Some(3)), 0.25);
		assert_eq!(config.density_at(Some(27)), 0.25);
		assert_eq!(config.density_at(None), 1.0);
	}
}
