use crate::network::{curve::{self, CurvePoint}, link, Network, Vec3, NONE};

pub const PROFILE_SAMPLES: usize = 64;
const LENGTH_SAMPLES: usize = 10;

/// Road height and camber sampled at even distances along one lane.
#[derive(Debug, Clone, Copy)]
pub struct TerrainProfile {
	heights: [f32; PROFILE_SAMPLES],
	cambers: [f32; PROFILE_SAMPLES],
	spacing: f32,
}

impl Default for TerrainProfile {
	fn default() -> Self {
		Self::flat(0.0, 0.0, 0.0)
	}
}

impl TerrainProfile {
	pub fn flat(height: f32, camber: f32, total: f32) -> Self {
		Self {
			heights: [height; PROFILE_SAMPLES],
			cambers: [camber; PROFILE_SAMPLES],
			spacing: total / (PROFILE_SAMPLES - 1) as f32,
		}
	}

	/// Samples `total` meters of the lane starting `skip` meters past `start`.
	pub fn along(network: &Network, start: u32, skip: f32, total: f32) -> Self {
		let mut profile = Self::flat(network.point(start).position.y, network.camber(start), total);
		for i in 0..PROFILE_SAMPLES {
			let (height, camber) = lane_height_at(network, start, skip + i as f32 * profile.spacing);
			profile.heights[i] = height;
			profile.cambers[i] = camber;
		}
		profile
	}

	pub fn sample(&self, distance: f32) -> (f32, f32) {
		if self.spacing <= 0.0 {
			return (self.heights[0], self.cambers[0]);
		}
		let position = (distance / self.spacing).clamp(0.0, (PROFILE_SAMPLES - 1) as f32);
		let index = (position.floor() as usize).min(PROFILE_SAMPLES - 2);
		let t = position - index as f32;
		(
			self.heights[index] + (self.heights[index + 1] - self.heights[index]) * t,
			self.cambers[index] + (self.cambers[index + 1] - self.cambers[index]) * t,
		)
	}
}

fn lane_height_at(network: &Network, start: u32, distance: f32) -> (f32, f32) {
	let mut id = start;
	let mut remaining = distance.max(0.0);
	loop {
		let point = network.point(id);
		let Some(next) = link(point.next) else {
			return (point.position.y, point.camber);
		};
		if remaining <= point.length || point.length <= 0.0 {
			let t = if point.length > 0.0 { remaining / point.length } else { 0.0 };
			let height = point.position.y + (network.point(next).position.y - point.position.y) * t;
			return (height, network.camber_at(id, t));
		}
		remaining -= point.length;
		id = next;
	}
}

/// Geometry of a planned maneuver.
#[derive(Debug, Clone, Copy)]
pub struct LaneChangePlan {
	pub source: u32,
	/// Point next to `source` in the target lane.
	pub target_entry: u32,
	/// Point in the target lane where the maneuver ends.
	pub target: u32,
	/// How far past `source` the car already is.
	pub offset: f32,
	pub start_position: Vec3,
	pub end_position: Vec3,
	pub start_tangent: Vec3,
	pub end_tangent: Vec3,
	pub start_camber: f32,
	pub end_camber: f32,
	pub is_overtake: bool,
}

/// Moves a car along a Hermite curve from one lane into the next, following
/// the terrain of both lanes.
#[derive(Debug, Clone)]
pub struct LaneChangeState {
	changing: bool,
	aborting: bool,
	progress: f32,
	source: u32,
	target: u32,
	overtake: bool,

	start_position: Vec3,
	end_position: Vec3,
	start_tangent: Vec3,
	end_tangent: Vec3,
	start_camber: f32,
	end_camber: f32,
	total_distance: f32,
	distance_travelled: f32,

	from: TerrainProfile,
	to: TerrainProfile,
}

impl Default for LaneChangeState {
	fn default() -> Self {
		Self {
			changing: false,
			aborting: false,
			progress: 0.0,
			source: NONE,
			target: NONE,
			overtake: false,
			start_position: Vec3::zeros(),
			end_position: Vec3::zeros(),
			start_tangent: Vec3::zeros(),
			end_tangent: Vec3::zeros(),
			start_camber: 0.0,
			end_camber: 0.0,
			total_distance: 0.0,
			distance_travelled: 0.0,
			from: TerrainProfile::default(),
			to: TerrainProfile::default(),
		}
	}
}

impl LaneChangeState {
	pub fn begin(&mut self, network: &Network, plan: &LaneChangePlan) {
		self.changing = true;
		self.aborting = false;
		self.progress = 0.0;
		self.distance_travelled = 0.0;
		self.source = plan.source;
		self.target = plan.target;
		self.overtake = plan.is_overtake;
		self.start_position = plan.start_position;
		self.end_position = plan.end_position;
		self.start_tangent = plan.start_tangent;
		self.end_tangent = plan.end_tangent;
		self.start_camber = plan.start_camber;
		self.end_camber = plan.end_camber;
		self.total_distance = curve::estimate_length(
			&self.start_position, &self.end_position,
			&self.start_tangent, &self.end_tangent,
			LENGTH_SAMPLES
		);

		self.from = TerrainProfile::along(network, plan.source, plan.offset, self.total_distance);
		self.to = TerrainProfile::along(network, plan.target_entry, plan.offset, self.total_distance);
	}

	/// Turns the maneuver around toward `return_point` on the source lane,
	/// starting from wherever the car is now.
	pub fn begin_abort_return(
		&mut self,
		network: &Network,
		current_tangent: Vec3,
		return_point: u32,
		return_tangent: Vec3
	) {
		let current_height = self.blended_height();
		let current_camber = self.blended_camber();
		let mut current_position = self.interpolated_position();
		current_position.y = current_height;
		let return_position = network.point(return_point).position;
		let return_distance = (return_position - current_position).norm();

		self.aborting = true;
		self.progress = 0.0;
		self.distance_travelled = 0.0;

		self.start_position = current_position;
		self.end_position = return_position;
		self.start_tangent = current_tangent.try_normalize(1.0e-6).unwrap_or_else(Vec3::zeros) * return_distance * 0.5;
		self.end_tangent = return_tangent.try_normalize(1.0e-6).unwrap_or_else(Vec3::zeros) * return_distance * 0.5;
		self.start_camber = current_camber;
		self.end_camber = network.camber(return_point);
		self.target = return_point;
		self.total_distance = curve::estimate_length(
			&self.start_position, &self.end_position,
			&self.start_tangent, &self.end_tangent,
			LENGTH_SAMPLES
		);

		let source_position = network.point(self.source).position;
		let along_source = (current_position - source_position).dot(&network.forward(self.source)).max(0.0);
		self.from = TerrainProfile::flat(current_height, current_camber, self.total_distance);
		self.to = TerrainProfile::along(network, self.source, along_source, self.total_distance);
	}

	pub fn update_progress(&mut self, distance_moved: f32) {
		if !self.changing || self.total_distance <= 0.0 {
			return;
		}
		self.distance_travelled += distance_moved;
		self.progress = (self.distance_travelled / self.total_distance).clamp(0.0, 1.0);
	}

	pub fn interpolated_point(&self) -> CurvePoint {
		curve::evaluate(&self.start_position, &self.end_position, &self.start_tangent, &self.end_tangent, self.progress)
	}

	pub fn interpolated_position(&self) -> Vec3 {
		curve::position(&self.start_position, &self.end_position, &self.start_tangent, &self.end_tangent, self.progress)
	}

	pub fn interpolated_tangent(&self) -> Vec3 {
		curve::tangent(&self.start_position, &self.end_position, &self.start_tangent, &self.end_tangent, self.progress)
	}

	pub fn interpolated_camber(&self) -> f32 {
		self.start_camber + (self.end_camber - self.start_camber) * self.progress
	}

	fn blend_weight(progress: f32) -> f32 {
		progress * progress * (3.0 - 2.0 * progress)
	}

	fn height_at(&self, progress: f32) -> f32 {
		let distance = progress * self.total_distance;
		let weight = Self::blend_weight(progress);
		self.from.sample(distance).0 * (1.0 - weight) + self.to.sample(distance).0 * weight
	}

	/// Road height under the car, fading from the source to the target lane.
	pub fn blended_height(&self) -> f32 {
		self.height_at(self.progress)
	}

	pub fn blended_camber(&self) -> f32 {
		let distance = self.progress * self.total_distance;
		let weight = Self::blend_weight(self.progress);
		self.from.sample(distance).1 * (1.0 - weight) + self.to.sample(distance).1 * weight
	}

	/// Rise over run of the blended height at the current progress.
	pub fn blended_pitch_slope(&self) -> f32 {
		if self.total_distance <= 0.0 {
			return 0.0;
		}
		let step = 1.0 / (PROFILE_SAMPLES - 1) as f32;
		let behind = (self.progress - step).max(0.0);
		let ahead = (self.progress + step).min(1.0);
		let run = (ahead - behind) * self.total_distance;
		if run <= 0.0 {
			return 0.0;
		}
		(self.height_at(ahead) - self.height_at(behind)) / run
	}

	pub fn is_complete(&self) -> bool {
		self.progress >= 1.0
	}

	pub fn complete(&mut self) {
		self.reset();
	}

	pub fn abort(&mut self) {
		self.reset();
	}

	fn reset(&mut self) {
		self.changing = false;
		self.aborting = false;
		self.progress = 0.0;
		self.source = NONE;
		self.target = NONE;
		self.distance_travelled = 0.0;
	}

	pub fn is_changing_lane(&self) -> bool {
		self.changing
	}

	pub fn is_aborting(&self) -> bool {
		self.aborting
	}

	pub fn is_overtake(&self) -> bool {
		self.overtake
	}

	pub fn source(&self) -> u32 {
		self.source
	}

	pub fn target(&self) -> u32 {
		self.target
	}

	pub fn progress(&self) -> f32 {
		self.progress
	}

	pub fn total_distance(&self) -> f32 {
		self.total_distance
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::network::builder::NetworkBuilder;

	/// Two parallel lanes 3 m apart, the left one climbing 1 m every 10 m.
	fn sloped() -> Network {
		let mut builder = NetworkBuilder::new();
		let left: Vec<Vec3> = (0..20).map(|i| Vec3::new(0.0, i as f32, i as f32 * 10.0)).collect();
		let right: Vec<Vec3> = (0..20).map(|i| Vec3::new(-3.0, 0.0, i as f32 * 10.0)).collect();
		let left = builder.lane(&left, 0.0, false);
		let right = builder.lane(&right, 0.1, false);
		builder.link_adjacent(&left, &right);
		builder.build().unwrap()
	}

	fn plan(network: &Network) -> LaneChangePlan {
		let start = network.point(0).position;
		let end = network.point(24).position;
		LaneChangePlan {
			source: 0,
			target_entry: 20,
			target: 24,
			offset: 0.0,
			start_position: start,
			end_position: end,
			start_tangent: Vec3::new(0.0, 0.0, 20.0),
			end_tangent: Vec3::new(0.0, 0.0, 20.0),
			start_camber: 0.0,
			end_camber: 0.1,
			is_overtake: false,
		}
	}

	#[test]
	fn progresses_to_completion() {
		let network = sloped();
		let mut state = LaneChangeState::default();
		state.begin(&network, &plan(&network));
		assert!(state.is_changing_lane());
		assert!(state.total_distance() > 40.0 && state.total_distance() < 42.0);

		state.update_progress(state.total_distance() * 0.5);
		assert!((state.progress() - 0.5).abs() < 1.0e-5);
		assert!(!state.is_complete());
		assert!((state.interpolated_camber() - 0.05).abs() < 1.0e-5);

		state.update_progress(1_000.0);
		assert!(state.is_complete());
		assert!((state.interpolated_position() - network.point(24).position).norm() < 1.0e-3);
		state.complete();
		assert!(!state.is_changing_lane());
		assert_eq!(state.target(), NONE);
	}

	#[test]
	fn blends_terrain_between_lanes() {
		let network = sloped();
		let mut state = LaneChangeState::default();
		state.begin(&network, &plan(&network));
		assert!(state.blended_height().abs() < 1.0e-5);
		assert!(state.blended_pitch_slope() > 0.0);

		state.update_progress(1_000.0);
		// fully in the flat right lane
		assert!(state.blended_height().abs() < 1.0e-4);
		assert!((state.blended_camber() - 0.1).abs() < 1.0e-5);
	}

	#[test]
	fn abort_returns_toward_source_lane() {
		let network = sloped();
		let mut state = LaneChangeState::default();
		state.begin(&network, &plan(&network));
		state.update_progress(10.0);
		let tangent = state.interpolated_tangent();
		let before = state.interpolated_position();

		state.begin_abort_return(&network, tangent, 4, network.forward(4));
		assert!(state.is_aborting());
		assert!(state.is_changing_lane());
		assert_eq!(state.source(), 0);
		assert_eq!(state.target(), 4);
		assert!((state.interpolated_position().x - before.x).abs() < 1.0e-4);

		state.update_progress(1_000.0);
		assert!(state.is_complete());
		assert!((state.blended_height() - network.point(4).position.y).abs() < 0.2);
	}
}
