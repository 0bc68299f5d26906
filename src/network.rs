use std::{collections::HashMap, path::Path};

use nalgebra::Vector3;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrafficError};

use self::{junction::Junction, occupancy::SlowestOccupants, point::{Point, PointDescription, STRAIGHT_RADIUS}};

pub mod builder;
pub mod curve;
pub mod junction;
pub mod navigation;
pub mod occupancy;
pub mod point;

pub type Vec3 = Vector3<f32>;

/// Absent link / id.
pub const NONE: u32 = u32::MAX;

const GRID_CELL_SIZE: f32 = 20.0;
const MAX_LANES: usize = 16;

/// Optional link helper for the sentineled id fields.
#[inline]
pub fn link(id: u32) -> Option<u32> {
	if id == NONE { None } else { Some(id) }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkDescription {
	pub points: Vec<PointDescription>,
	#[serde(default)]
	pub junctions: Vec<Junction>,
}

/// Immutable route graph for a session plus the per-point occupancy table.
#[derive(Debug)]
pub struct Network {
	pub points: Vec<Point>,
	pub junctions: Vec<Junction>,
	pub slowest: SlowestOccupants,
	average_length: f32,
	grid: HashMap<(i32, i32), Vec<u32>>,
}

impl Network {
	/// Validates links, derives segment lengths and missing radii, and indexes
	/// positions for nearest-point lookups.
	pub fn new(
		mut points: Vec<Point>,
		junctions: Vec<Junction>
	) -> Result<Self> {
		if points.is_empty() {
			return Err(TrafficError::EmptyNetwork);
		}
		let count = points.len() as u32;

		// VALIDATE

		for (id, point) in points.iter().enumerate() {
			let id = id as u32;
			for (name, target) in [
				("previous", point.previous),
				("next", point.next),
				("left", point.left),
				("right", point.right),
			] {
				if target != NONE && target >= count {
					return Err(TrafficError::DanglingLink { point: id, link: name, target });
				}
			}
			for junction in [point.junction_start, point.junction_end] {
				if junction != NONE && junction as usize >= junctions.len() {
					return Err(TrafficError::DanglingJunction { point: id, junction });
				}
			}
		}
		for (id, junction) in junctions.iter().enumerate() {
			for target in [junction.start, junction.end] {
				if target >= count {
					return Err(TrafficError::JunctionOutOfRange { junction: id as u32, target });
				}
			}
		}

		// DERIVE GEOMETRY

		let positions: Vec<Vec3> = points.iter().map(|p| p.position).collect();
		for point in points.iter_mut() {
			point.length = match link(point.next) {
				Some(next) => (positions[next as usize] - point.position).norm(),
				None => 0.0,
			};
			if point.radius <= 0.0 {
				point.radius = match (link(point.previous), link(point.next)) {
					(Some(previous), Some(next)) => circumradius(
						&positions[previous as usize],
						&point.position,
						&positions[next as usize]
					),
					_ => STRAIGHT_RADIUS,
				};
			}
		}

		let linked: Vec<f32> = points.iter().filter(|p| p.next != NONE).map(|p| p.length).collect();
		let average_length = if linked.is_empty() {
			1.0
		} else {
			(linked.iter().sum::<f32>() / linked.len() as f32).max(0.01)
		};

		// INDEX

		let mut grid: HashMap<(i32, i32), Vec<u32>> = HashMap::new();
		for (id, point) in points.iter().enumerate() {
			grid.entry(cell(&point.position)).or_default().push(id as u32);
		}

		Ok(Self {
			slowest: SlowestOccupants::new(points.len()),
			points,
			junctions,
			average_length,
			grid,
		})
	}

	pub fn from_description(description: &NetworkDescription) -> Result<Self> {
		let points = description.points.iter().map(Point::from).collect();
		Self::new(points, description.junctions.clone())
	}

	pub fn from_ron_str(source: &str) -> Result<Self> {
		let description: NetworkDescription = ron::from_str(source)?;
		Self::from_description(&description)
	}

	pub fn load(path: impl AsRef<Path>) -> Result<Self> {
		let path = path.as_ref();
		let source = std::fs::read_to_string(path).map_err(|source| TrafficError::Io {
			path: path.to_path_buf(),
			source,
		})?;
		Self::from_ron_str(&source)
	}

	#[inline]
	pub fn point(&self, id: u32) -> &Point {
		&self.points[id as usize]
	}

	pub fn len(&self) -> usize {
		self.points.len()
	}

	pub fn is_empty(&self) -> bool {
		self.points.is_empty()
	}

	/// All lanes parallel to `id`, leftmost first.
	pub fn lanes(&self, id: u32) -> Vec<u32> {
		let mut leftmost = id;
		for _ in 0..MAX_LANES {
			match link(self.point(leftmost).left) {
				Some(left) if left != id => leftmost = left,
				_ => break,
			}
		}

		let mut lanes = vec![leftmost];
		let mut current = leftmost;
		while lanes.len() < MAX_LANES {
			match link(self.point(current).right) {
				Some(right) if !lanes.contains(&right) => {
					lanes.push(right);
					current = right;
				}
				_ => break,
			}
		}
		lanes
	}

	pub fn random_lane<R: Rng>(&self, id: u32, rng: &mut R) -> u32 {
		let lanes = self.lanes(id);
		lanes[rng.gen_range(0..lanes.len())]
	}

	/// Unit travel direction at a point.
	pub fn forward(&self, id: u32) -> Vec3 {
		let point = self.point(id);
		let direction = match (link(point.next), link(point.previous)) {
			(Some(next), _) => self.point(next).position - point.position,
			(None, Some(previous)) => point.position - self.point(previous).position,
			(None, None) => Vec3::x(),
		};
		direction.try_normalize(1.0e-6).unwrap_or_else(Vec3::x)
	}

	pub fn camber(&self, id: u32) -> f32 {
		self.point(id).camber
	}

	/// Camber interpolated toward the next point by `t` in 0..=1.
	pub fn camber_at(&self, id: u32, t: f32) -> f32 {
		let point = self.point(id);
		match link(point.next) {
			Some(next) => point.camber + (self.point(next).camber - point.camber) * t.clamp(0.0, 1.0),
			None => point.camber,
		}
	}

	pub fn is_same_direction(&self, a: u32, b: u32) -> bool {
		self.forward(a).dot(&self.forward(b)) > 0.0
	}

	/// Nearest point to a world position and its squared distance.
	pub fn world_to_spline(&self, position: &Vec3) -> Option<(u32, f32)> {
		let (cx, cz) = cell(position);
		let mut closest: Option<(u32, f32)> = None;
		for dx in -1..=1 {
			for dz in -1..=1 {
				let Some(ids) = self.grid.get(&(cx + dx, cz + dz)) else {
					continue;
				};
				for &id in ids {
					let distance_squared = (self.point(id).position - position).norm_squared();
					if closest.map_or(true, |(_, best)| distance_squared < best) {
						closest = Some((id, distance_squared));
					}
				}
			}
		}
		closest
	}

	/// Approximate number of points covering `meters` of road.
	pub fn meters_to_points(&self, meters: f32) -> u32 {
		(meters / self.average_length).round().max(0.0) as u32
	}
}

fn cell(position: &Vec3) -> (i32, i32) {
	(
		(position.x / GRID_CELL_SIZE).floor() as i32,
		(position.z / GRID_CELL_SIZE).floor() as i32,
	)
}

fn circumradius(a: &Vec3, b: &Vec3, c: &Vec3) -> f32 {
	let ab = (b - a).norm();
	let bc = (c - b).norm();
	let ca = (a - c).norm();
	let area_twice = (b - a).cross(&(c - a)).norm();
	if area_twice < 1.0e-4 {
		return STRAIGHT_RADIUS;
	}
	(ab * bc * ca / (2.0 * area_twice)).min(STRAIGHT_RADIUS)
}
