use std::{collections::HashMap, sync::Arc};

use rand::{rngs::SmallRng, Rng, SeedableRng};

use super::{link, Network};

/// Walks the route graph for one driver. Junction decisions are drawn once and
/// remembered until `clear`, so the indicator shown and the path driven agree.
#[derive(Debug)]
pub struct JunctionEvaluator {
	network: Arc<Network>,
	decisions: HashMap<u32, bool>,
	caching: bool,
	rng: SmallRng,
}

impl JunctionEvaluator {
	pub fn new(network: Arc<Network>, seed: u64) -> Self {
		Self {
			network,
			decisions: HashMap::new(),
			caching: true,
			rng: SmallRng::seed_from_u64(seed),
		}
	}

	/// Evaluator that draws a fresh decision at every junction, used for
	/// picking spawn points.
	pub fn non_caching(network: Arc<Network>, seed: u64) -> Self {
		Self {
			caching: false,
			..Self::new(network, seed)
		}
	}

	pub fn clear(&mut self) {
		self.decisions.clear();
	}

	pub fn will_take_junction(&mut self, junction: u32) -> bool {
		if let Some(&decision) = self.decisions.get(&junction) {
			return decision;
		}
		let probability = self.network.junctions[junction as usize].probability;
		let decision = self.rng.gen::<f32>() < probability;
		if self.caching {
			self.decisions.insert(junction, decision);
		}
		decision
	}

	/// Point `count` steps ahead. Junctions are only followed when
	/// `allow_junctions` is set and the driver decided to take them.
	pub fn try_next(&mut self, point: u32, count: u32, allow_junctions: bool) -> Option<u32> {
		let mut current = point;
		for _ in 0..count {
			let junction = self.network.point(current).junction_start;
			current = match link(junction) {
				Some(junction) if allow_junctions && self.will_take_junction(junction) => {
					self.network.junctions[junction as usize].end
				}
				_ => link(self.network.point(current).next)?,
			};
		}
		Some(current)
	}

	pub fn next(&mut self, point: u32) -> Option<u32> {
		self.try_next(point, 1, true)
	}

	/// Point `count` steps behind, stepping back over a junction this driver
	/// took.
	pub fn try_previous(&mut self, point: u32, count: u32) -> Option<u32> {
		let mut current = point;
		for _ in 0..count {
			let junction = self.network.point(current).junction_end;
			current = match link(junction) {
				Some(junction) if self.decisions.get(&junction) == Some(&true) => {
					self.network.junctions[junction as usize].start
				}
				_ => link(self.network.point(current).previous)?,
			};
		}
		Some(current)
	}

	pub fn previous(&mut self, point: u32) -> Option<u32> {
		self.try_previous(point, 1)
	}

	/// Like `try_next` but never draws new decisions: junctions without a
	/// remembered decision are treated as not taken.
	pub fn peek(&self, point: u32, count: u32) -> Option<u32> {
		let mut current = point;
		for _ in 0..count {
			let junction = self.network.point(current).junction_start;
			current = match link(junction) {
				Some(junction) if self.decisions.get(&junction) == Some(&true) => {
					self.network.junctions[junction as usize].end
				}
				_ => link(self.network.point(current).next)?,
			};
		}
		Some(current)
	}

	/// Point reached after driving `distance` meters, backwards when negative.
	pub fn traverse(&mut self, point: u32, distance: f32) -> Option<u32> {
		let mut current = point;
		let mut travelled = 0.0;
		if distance >= 0.0 {
			while travelled < distance {
				travelled += self.network.point(current).length;
				current = self.next(current)?;
			}
		} else {
			while travelled < -distance {
				current = self.previous(current)?;
				travelled += self.network.point(current).length;
			}
		}
		Some(current)
	}
}
