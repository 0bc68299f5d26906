use serde::{Deserialize, Serialize};

use crate::vehicle::status::CarStatusFlags;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Indicator {
	#[default]
	None,
	Left,
	Right,
}

impl Indicator {
	pub fn flags(self) -> CarStatusFlags {
		match self {
			Indicator::None => CarStatusFlags::empty(),
			Indicator::Left => CarStatusFlags::INDICATE_LEFT,
			Indicator::Right => CarStatusFlags::INDICATE_RIGHT,
		}
	}
}

/// Branch from `start` onto the point sequence beginning at `end`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Junction {
	pub start: u32,
	pub end: u32,
	/// Chance a driver takes the branch.
	#[serde(default = "half")]
	pub probability: f32,
	#[serde(default)]
	pub indicate_when_taken: Indicator,
	#[serde(default)]
	pub indicate_when_not_taken: Indicator,
	/// Distance before the junction at which drivers commit and indicate.
	#[serde(default = "indicate_distance")]
	pub indicate_distance_pre: f32,
	/// Distance after the junction the indicator stays on.
	#[serde(default = "indicate_distance")]
	pub indicate_distance_post: f32,
}

fn half() -> f32 {
	0.5
}

fn indicate_distance() -> f32 {
	50.0
}
