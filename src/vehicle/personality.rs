use rand::Rng;

/// Behavioral multipliers of one driver, fixed for the lifetime of a spawn.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriverPersonality {
	pub aggressiveness: f32,
	pub patience: f32,
	pub desired_speed_factor: f32,
	pub following_distance_factor: f32,
	pub acceleration_factor: f32,
	pub deceleration_factor: f32,
	pub reaction_time_factor: f32,
	pub drive_off_delay_factor: f32,
}

impl Default for DriverPersonality {
	fn default() -> Self {
		Self {
			aggressiveness: 1.0,
			patience: 1.0,
			desired_speed_factor: 1.0,
			following_distance_factor: 1.0,
			acceleration_factor: 1.0,
			deceleration_factor: 1.0,
			reaction_time_factor: 1.0,
			drive_off_delay_factor: 1.0,
		}
	}
}

struct Trait {
	min: f32,
	max: f32,
	/// +1 grows with temperament, -1 shrinks.
	correlation: i8,
}

const AGGRESSIVENESS: Trait = Trait { min: 0.7, max: 1.3, correlation: 1 };
const PATIENCE: Trait = Trait { min: 0.6, max: 1.8, correlation: -1 };
const DESIRED_SPEED: Trait = Trait { min: 0.9, max: 1.1, correlation: 1 };
const FOLLOWING_DISTANCE: Trait = Trait { min: 0.8, max: 1.4, correlation: -1 };
const ACCELERATION: Trait = Trait { min: 0.8, max: 1.2, correlation: 1 };
const DECELERATION: Trait = Trait { min: 0.85, max: 1.15, correlation: 1 };
const REACTION_TIME: Trait = Trait { min: 0.7, max: 1.3, correlation: -1 };
const DRIVE_OFF_DELAY: Trait = Trait { min: 0.6, max: 1.4, correlation: -1 };

/// Draws correlated personalities around a shared temperament.
#[derive(Debug, Clone, Copy)]
pub struct PersonalityFactory {
	/// 0 gives identical drivers, 1 the widest spread.
	pub variety: f32,
	/// -1 cautious .. +1 aggressive.
	pub bias: f32,
}

impl PersonalityFactory {
	pub fn new(variety: f32, bias: f32) -> Self {
		Self {
			variety: variety.clamp(0.0, 1.0),
			bias: bias.clamp(-1.0, 1.0),
		}
	}

	pub fn create<R: Rng>(&self, rng: &mut R) -> DriverPersonality {
		let center = 0.5 + self.bias * 0.3;
		let spread = self.variety * 0.5;
		let temperament = (center + (rng.gen::<f32>() - 0.5) * 2.0 * spread).clamp(0.0, 1.0);
		let jitter = self.variety * 0.15;

		let mut draw = |t: &Trait| {
			let effective = if t.correlation > 0 { temperament } else { 1.0 - temperament };
			let noise = (rng.gen::<f32>() - 0.5) * 2.0 * jitter;
			t.min + (effective + noise).clamp(0.0, 1.0) * (t.max - t.min)
		};

		DriverPersonality {
			aggressiveness: draw(&AGGRESSIVENESS),
			patience: draw(&PATIENCE),
			desired_speed_factor: draw(&DESIRED_SPEED),
			following_distance_factor: draw(&FOLLOWING_DISTANCE),
			acceleration_factor: draw(&ACCELERATION),
			deceleration_factor: draw(&DECELERATION),
			reaction_time_factor: draw(&REACTION_TIME),
			drive_off_delay_factor: draw(&DRIVE_OFF_DELAY),
		}
	}
}

#[cfg(test)]
mod tests {
	use rand::{rngs::SmallRng, SeedableRng};

	use super::*;

	#[test]
	fn no_variety_is_deterministic() {
		let factory = PersonalityFactory::new(0.0, 0.4);
		let mut rng = SmallRng::seed_from_u64(3);
		let first = factory.create(&mut rng);
		for _ in 0..100 {
			assert_eq!(factory.create(&mut rng), first);
		}
	}

	#[test]
	fn neutral_driver_sits_mid_range() {
		let personality = PersonalityFactory::new(0.0, 0.0).create(&mut SmallRng::seed_from_u64(0));
		assert!((personality.aggressiveness - 1.0).abs() < 1.0e-6);
		assert!((personality.patience - 1.2).abs() < 1.0e-6);
		assert!((personality.desired_speed_factor - 1.0).abs() < 1.0e-6);
	}

	fn within(value: f32, min: f32, max: f32) -> bool {
		value >= min - 1.0e-5 && value <= max + 1.0e-5
	}

	#[test]
	fn traits_stay_in_bounds_and_correlate() {
		let factory = PersonalityFactory::new(1.0, 0.0);
		let mut rng = SmallRng::seed_from_u64(42);
		for _ in 0..1000 {
			let p = factory.create(&mut rng);
			assert!(within(p.aggressiveness, 0.7, 1.3));
			assert!(within(p.patience, 0.6, 1.8));
			assert!(within(p.desired_speed_factor, 0.9, 1.1));
			assert!(within(p.following_distance_factor, 0.8, 1.4));
			assert!(within(p.acceleration_factor, 0.8, 1.2));
			assert!(within(p.deceleration_factor, 0.85, 1.15));
			assert!(within(p.reaction_time_factor, 0.7, 1.3));
			assert!(within(p.drive_off_delay_factor, 0.6, 1.4));
		}

		let aggressive = PersonalityFactory::new(0.0, 1.0).create(&mut rng);
		let cautious = PersonalityFactory::new(0.0, -1.0).create(&mut rng);
		assert!(aggressive.aggressiveness > cautious.aggressiveness);
		assert!(aggressive.patience < cautious.patience);
		assert!(aggressive.following_distance_factor < cautious.following_distance_factor);
	}
}
