use std::sync::Arc;

use parking_lot::{RwLock, RwLockUpgradableReadGuard};

use crate::vehicle::shared::AiRef;

use super::NONE;

/// Per-point reference to the slowest AI occupying or approaching the point.
///
/// Entries can go stale when an AI moves on without the slot being cleared
/// (another AI took it over in between). Reads verify the occupant is still
/// registered at the point, so a stale entry reads as empty.
#[derive(Debug, Default)]
pub struct SlowestOccupants {
	slots: RwLock<Vec<Option<AiRef>>>,
}

impl SlowestOccupants {
	pub fn new(len: usize) -> Self {
		Self {
			slots: RwLock::new(vec![None; len]),
		}
	}

	pub fn get(&self, point: u32) -> Option<AiRef> {
		if point == NONE {
			return None;
		}
		let ra_slots = self.slots.read();
		let occupant = ra_slots.get(point as usize)?.as_ref()?;
		if occupant.is_registered_at(point) {
			Some(occupant.clone())
		} else {
			None
		}
	}

	/// Claims `point` for `candidate` if the slot is free, stale or held by
	/// someone faster.
	pub fn enter(&self, point: u32, candidate: &AiRef) {
		if point == NONE {
			return;
		}
		let ua_slots = self.slots.upgradable_read();
		let replace = match ua_slots.get(point as usize) {
			None => false,
			Some(None) => true,
			Some(Some(current)) if Arc::ptr_eq(current, candidate) => false,
			Some(Some(current)) => {
				!current.is_registered_at(point)
					|| candidate.snapshot().current_speed < current.snapshot().current_speed
			}
		};
		if replace {
			let mut wa_slots = RwLockUpgradableReadGuard::upgrade(ua_slots);
			wa_slots[point as usize] = Some(candidate.clone());
		}
	}

	/// Clears `point` only while it still references `vehicle`.
	pub fn leave(&self, point: u32, vehicle: &AiRef) {
		if point == NONE {
			return;
		}
		let ua_slots = self.slots.upgradable_read();
		let owned = matches!(
			ua_slots.get(point as usize),
			Some(Some(current)) if Arc::ptr_eq(current, vehicle)
		);
		if owned {
			let mut wa_slots = RwLockUpgradableReadGuard::upgrade(ua_slots);
			wa_slots[point as usize] = None;
		}
	}

	/// Raw entries referencing `vehicle`, stale ones included.
	pub fn entries_of(&self, vehicle: &AiRef) -> Vec<u32> {
		self.slots
			.read()
			.iter()
			.enumerate()
			.filter_map(|(point, slot)| match slot {
				Some(current) if Arc::ptr_eq(current, vehicle) => Some(point as u32),
				_ => None,
			})
			.collect()
	}

	pub fn clear(&self) {
		self.slots.write().iter_mut().for_each(|slot| *slot = None);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::vehicle::shared::AiShared;

	fn driver(id: u32, point: u32, speed: f32) -> AiRef {
		let shared = Arc::new(AiShared::new(id, id as u8, 2.0, 2.0));
		shared.publish(|s| {
			s.initialized = true;
			s.point = point;
			s.current_speed = speed;
		});
		shared
	}

	#[test]
	fn slower_candidate_replaces_faster_occupant() {
		let table = SlowestOccupants::new(4);
		let fast = driver(1, 2, 20.0);
		let slow = driver(2, 2, 10.0);
		table.enter(2, &fast);
		table.enter(2, &slow);
		assert!(Arc::ptr_eq(&table.get(2).unwrap(), &slow));
		table.enter(2, &fast);
		assert!(Arc::ptr_eq(&table.get(2).unwrap(), &slow));
	}

	#[test]
	fn stale_entry_reads_empty_and_is_replaced() {
		let table = SlowestOccupants::new(4);
		let slow = driver(1, 1, 5.0);
		table.enter(1, &slow);
		slow.publish(|s| s.point = 2);
		assert!(table.get(1).is_none());

		let fast = driver(2, 1, 30.0);
		table.enter(1, &fast);
		assert!(Arc::ptr_eq(&table.get(1).unwrap(), &fast));
	}

	#[test]
	fn leave_only_clears_own_entry() {
		let table = SlowestOccupants::new(4);
		let a = driver(1, 3, 20.0);
		let b = driver(2, 3, 10.0);
		table.enter(3, &a);
		table.enter(3, &b);
		table.leave(3, &a);
		assert!(Arc::ptr_eq(&table.get(3).unwrap(), &b));
		table.leave(3, &b);
		assert!(table.get(3).is_none());
		assert!(table.entries_of(&b).is_empty());
	}

	#[test]
	fn ignores_out_of_range_points() {
		let table = SlowestOccupants::new(2);
		let a = driver(1, 9, 1.0);
		table.enter(9, &a);
		table.enter(NONE, &a);
		table.leave(9, &a);
		assert!(table.get(9).is_none());
		assert!(table.entries_of(&a).is_empty());
	}
}
