use std::f32::consts::PI;

use bitflags::bitflags;
use serde::Serialize;

use crate::network::Vec3;

bitflags! {
	#[derive(Default, Serialize)]
	pub struct CarStatusFlags: u32 {
		const LIGHTS_ON = 0x20;
		const HIGH_BEAMS_OFF = 0x40;
		const HORN = 0x100;
		const BRAKE_LIGHTS_ON = 0x800;
		const HAZARDS_ON = 0x2000;
		const WIPER_LEVEL_1 = 0x4000;
		const WIPER_LEVEL_2 = 0x8000;
		const WIPER_LEVEL_3 = 0x10000;
		const INDICATE_LEFT = 0x20000;
		const INDICATE_RIGHT = 0x40000;
	}
}

/// Outbound pose and dashboard state of a car, refreshed every motion update.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CarStatus {
	pub timestamp: i64,
	pub position: Vec3,
	/// Yaw, pitch, roll in radians.
	pub rotation: Vec3,
	pub velocity: Vec3,
	pub steer_angle: u8,
	pub wheel_angle: u8,
	pub tyre_angular_speed: [u8; 4],
	pub engine_rpm: u16,
	pub gear: u8,
	pub flags: CarStatusFlags,
}

impl CarStatus {
	/// Heading in degrees, 0..360.
	pub fn rotation_angle(&self) -> f32 {
		let degrees = self.rotation.x.to_degrees();
		degrees.rem_euclid(360.0)
	}

	/// Angle of `other` as seen from this car. 0 is straight behind, counter
	/// clockwise.
	pub fn angle_to(&self, other: &Vec3) -> f32 {
		let mut angle = (self.position.x - other.x).atan2(self.position.z - other.z).to_degrees();
		if angle < 0.0 {
			angle += 360.0;
		}
		(angle + self.rotation_angle()) % 360.0
	}
}

pub fn tyre_angular_speed(speed: f32, wheel_diameter: f32) -> f32 {
	speed / (PI * wheel_diameter) * 6.0
}

/// Log-scaled single byte encoding of a wheel's angular speed.
pub fn encode_tyre_angular_speed(angular_speed: f32) -> u8 {
	let encoded = ((angular_speed.abs() + 1.0).log10() * 20.0).round() * angular_speed.signum();
	(encoded.clamp(-100.0, 154.0) + 100.0) as u8
}

pub fn wiper_flags(rain_intensity: f32) -> CarStatusFlags {
	match rain_intensity {
		r if r < 0.05 => CarStatusFlags::empty(),
		r if r < 0.25 => CarStatusFlags::WIPER_LEVEL_1,
		r if r < 0.5 => CarStatusFlags::WIPER_LEVEL_2,
		_ => CarStatusFlags::WIPER_LEVEL_3,
	}
}

/// Headlights come on once the sun drops below this driver's twilight angle.
pub fn light_flags(daytime_lights: bool, sun_altitude: Option<f64>, twilight: f64) -> CarStatusFlags {
	let lights = CarStatusFlags::LIGHTS_ON | CarStatusFlags::HIGH_BEAMS_OFF;
	match sun_altitude {
		_ if daytime_lights => lights,
		None => lights,
		Some(altitude) if altitude < twilight => lights,
		Some(_) => CarStatusFlags::empty(),
	}
}
