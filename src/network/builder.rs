use std::f32::consts::TAU;

use crate::error::Result;

use super::{junction::{Indicator, Junction}, point::Point, Network, Vec3};

/// Assembles a network in code: lanes as point sequences, then adjacency and
/// junctions between them.
#[derive(Debug, Default)]
pub struct NetworkBuilder {
	points: Vec<Point>,
	junctions: Vec<Junction>,
}

impl NetworkBuilder {
	pub fn new() -> Self {
		Self::default()
	}

	/// Appends a lane through `positions`, linked front to back. A closed lane
	/// links its last point back to the first.
	pub fn lane(&mut self, positions: &[Vec3], camber: f32, closed: bool) -> Vec<u32> {
		let first = self.points.len() as u32;
		let ids: Vec<u32> = (0..positions.len() as u32).map(|i| first + i).collect();
		for (i, position) in positions.iter().enumerate() {
			let mut point = Point {
				position: *position,
				radius: 0.0,
				camber,
				..Default::default()
			};
			if i > 0 {
				point.previous = ids[i - 1];
			}
			if i + 1 < ids.len() {
				point.next = ids[i + 1];
			}
			self.points.push(point);
		}
		if closed && ids.len() > 2 {
			let (head, tail) = (ids[0], ids[ids.len() - 1]);
			self.points[head as usize].previous = tail;
			self.points[tail as usize].next = head;
		}
		ids
	}

	/// Evenly spaced lane on the segment `from`..`to`.
	pub fn straight_lane(&mut self, from: Vec3, to: Vec3, spacing: f32, camber: f32) -> Vec<u32> {
		let segments = ((to - from).norm() / spacing.max(0.1)).round().max(1.0) as usize;
		let positions: Vec<Vec3> = (0..=segments)
			.map(|i| from + (to - from) * (i as f32 / segments as f32))
			.collect();
		self.lane(&positions, camber, false)
	}

	/// Lane sampled from a cubic Bézier curve.
	pub fn bezier_lane(
		&mut self,
		p1: Vec3, p2: Vec3, p3: Vec3, p4: Vec3,
		samples: usize,
		camber: f32
	) -> Vec<u32> {
		let samples = samples.max(2);
		let mut positions: Vec<Vec3> = Vec::with_capacity(samples);
		for i in 0..samples {
			let t: f32 = (i as f32) / (samples - 1) as f32;
			let omt: f32 = 1.0 - t;
			let tm1: Vec3 = p1 * omt.powf(3.0);
			let tm2: Vec3 = p2 * omt.powf(2.0) * t * 3.0;
			let tm3: Vec3 = p3 * omt * t.powf(2.0) * 3.0;
			let tm4: Vec3 = p4 * t.powf(3.0);
			positions.push(tm1 + tm2 + tm3 + tm4);
		}
		self.lane(&positions, camber, false)
	}

	/// Pairs up points of two parallel lanes, `left[i]` beside `right[i]`.
	pub fn link_adjacent(&mut self, left: &[u32], right: &[u32]) {
		for (&l, &r) in left.iter().zip(right.iter()) {
			self.points[l as usize].right = r;
			self.points[r as usize].left = l;
		}
	}

	#[allow(clippy::too_many_arguments)]
	pub fn junction(
		&mut self,
		start: u32,
		end: u32,
		probability: f32,
		indicate_when_taken: Indicator,
		indicate_when_not_taken: Indicator,
		indicate_distance_pre: f32,
		indicate_distance_post: f32
	) -> u32 {
		let id = self.junctions.len() as u32;
		self.junctions.push(Junction {
			start,
			end,
			probability,
			indicate_when_taken,
			indicate_when_not_taken,
			indicate_distance_pre,
			indicate_distance_post,
		});
		self.points[start as usize].junction_start = id;
		self.points[end as usize].junction_end = id;
		id
	}

	pub fn build(self) -> Result<Network> {
		Network::new(self.points, self.junctions)
	}

	/// Parallel straight lanes along +Z. Lane 0 runs on x = 0 and is the
	/// leftmost; the others follow at `lane_width` steps toward -X.
	pub fn straight_road(lanes: usize, length: f32, spacing: f32, lane_width: f32) -> Result<Network> {
		let mut builder = Self::new();
		let mut previous: Option<Vec<u32>> = None;
		for lane in 0..lanes.max(1) {
			let x = -(lane as f32) * lane_width;
			let ids = builder.straight_lane(Vec3::new(x, 0.0, 0.0), Vec3::new(x, 0.0, length), spacing, 0.0);
			if let Some(left) = &previous {
				builder.link_adjacent(left, &ids);
			}
			previous = Some(ids);
		}
		builder.build()
	}

	/// Concentric closed lanes around the origin, driven counter clockwise.
	/// Lane 0 is the innermost and leftmost.
	pub fn ring_road(lanes: usize, radius: f32, spacing: f32, lane_width: f32) -> Result<Network> {
		let mut builder = Self::new();
		let count = ((TAU * radius) / spacing.max(0.1)).round().max(8.0) as usize;
		let mut previous: Option<Vec<u32>> = None;
		for lane in 0..lanes.max(1) {
			let r = radius + lane as f32 * lane_width;
			let positions: Vec<Vec3> = (0..count)
				.map(|i| {
					let angle = i as f32 / count as f32 * TAU;
					Vec3::new(r * angle.cos(), 0.0, r * angle.sin())
				})
				.collect();
			let ids = builder.lane(&positions, 0.0, true);
			if let Some(left) = &previous {
				builder.link_adjacent(left, &ids);
			}
			previous = Some(ids);
		}
		builder.build()
	}
}
