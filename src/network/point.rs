use serde::{Deserialize, Serialize};

use super::{Vec3, NONE};

/// Curvature radius reported for points without a measurable bend.
pub const STRAIGHT_RADIUS: f32 = 100_000.0;

/// One waypoint of the route graph. Links are arena indices, `NONE` when absent.
#[derive(Debug, Clone, Copy)]
pub struct Point {
	pub position: Vec3,
	/// Distance to `next`, 0 at a dead end.
	pub length: f32,
	pub radius: f32,
	/// Banking in radians.
	pub camber: f32,
	pub previous: u32,
	pub next: u32,
	pub left: u32,
	pub right: u32,
	pub junction_start: u32,
	pub junction_end: u32,
}

impl Default for Point {
	fn default() -> Self {
		Self {
			position: Vec3::zeros(),
			length: 0.0,
			radius: STRAIGHT_RADIUS,
			camber: 0.0,
			previous: NONE,
			next: NONE,
			left: NONE,
			right: NONE,
			junction_start: NONE,
			junction_end: NONE,
		}
	}
}

impl Point {
	pub fn has_left(&self) -> bool {
		self.left != NONE
	}

	pub fn has_right(&self) -> bool {
		self.right != NONE
	}
}

/// On-disk form of a point. Length and radius are derived when omitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointDescription {
	pub position: [f32; 3],
	#[serde(default)]
	pub radius: Option<f32>,
	#[serde(default)]
	pub camber: f32,
	#[serde(default)]
	pub previous: Option<u32>,
	#[serde(default)]
	pub next: Option<u32>,
	#[serde(default)]
	pub left: Option<u32>,
	#[serde(default)]
	pub right: Option<u32>,
	#[serde(default)]
	pub junction_start: Option<u32>,
	#[serde(default)]
	pub junction_end: Option<u32>,
}

impl From<&PointDescription> for Point {
	fn from(description: &PointDescription) -> Self {
		let [x, y, z] = description.position;
		Self {
			position: Vec3::new(x, y, z),
			length: 0.0,
			radius: description.radius.unwrap_or(0.0),
			camber: description.camber,
			previous: description.previous.unwrap_or(NONE),
			next: description.next.unwrap_or(NONE),
			left: description.left.unwrap_or(NONE),
			right: description.right.unwrap_or(NONE),
			junction_start: description.junction_start.unwrap_or(NONE),
			junction_end: description.junction_end.unwrap_or(NONE),
		}
	}
}
