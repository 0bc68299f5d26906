//! Cubic Hermite segments as used by Catmull-Rom splines: two end points with
//! explicit tangents, parameterized by `t` in 0..=1.

use super::Vec3;

#[derive(Debug, Clone, Copy)]
pub struct CurvePoint {
	pub position: Vec3,
	/// Normalized direction of travel.
	pub tangent: Vec3,
}

pub fn position(start: &Vec3, end: &Vec3, tangent_start: &Vec3, tangent_end: &Vec3, t: f32) -> Vec3 {
	let t2 = t * t;
	let t3 = t2 * t;
	start * (2.0 * t3 - 3.0 * t2 + 1.0)
		+ tangent_start * (t3 - 2.0 * t2 + t)
		+ end * (-2.0 * t3 + 3.0 * t2)
		+ tangent_end * (t3 - t2)
}

/// First derivative, not normalized.
pub fn tangent(start: &Vec3, end: &Vec3, tangent_start: &Vec3, tangent_end: &Vec3, t: f32) -> Vec3 {
	let t2 = t * t;
	start * (6.0 * t2 - 6.0 * t)
		+ tangent_start * (3.0 * t2 - 4.0 * t + 1.0)
		+ end * (-6.0 * t2 + 6.0 * t)
		+ tangent_end * (3.0 * t2 - 2.0 * t)
}

pub fn evaluate(start: &Vec3, end: &Vec3, tangent_start: &Vec3, tangent_end: &Vec3, t: f32) -> CurvePoint {
	let derivative = tangent(start, end, tangent_start, tangent_end, t);
	CurvePoint {
		position: position(start, end, tangent_start, tangent_end, t),
		tangent: derivative.try_normalize(1.0e-6).unwrap_or_else(|| {
			(end - start).try_normalize(1.0e-6).unwrap_or_else(Vec3::x)
		}),
	}
}

/// Polyline length over `samples` evenly spaced parameter steps.
pub fn estimate_length(start: &Vec3, end: &Vec3, tangent_start: &Vec3, tangent_end: &Vec3, samples: usize) -> f32 {
	let mut length = 0.0;
	let mut previous = *start;
	for i in 1..=samples {
		let t = i as f32 / samples as f32;
		let current = position(start, end, tangent_start, tangent_end, t);
		length += (current - previous).norm();
		previous = current;
	}
	length
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn hits_end_points() {
		let start = Vec3::new(0.0, 0.0, 0.0);
		let end = Vec3::new(10.0, 0.0, 0.0);
		let tangent = Vec3::new(10.0, 0.0, 0.0);
		assert!((position(&start, &end, &tangent, &tangent, 0.0) - start).norm() < 1.0e-5);
		assert!((position(&start, &end, &tangent, &tangent, 1.0) - end).norm() < 1.0e-5);
		let mid = evaluate(&start, &end, &tangent, &tangent, 0.5);
		assert!((mid.position - Vec3::new(5.0, 0.0, 0.0)).norm() < 1.0e-4);
		assert!((mid.tangent - Vec3::x()).norm() < 1.0e-5);
	}

	#[test]
	fn straight_segment_length_matches_distance() {
		let start = Vec3::new(0.0, 0.0, 0.0);
		let end = Vec3::new(0.0, 0.0, 30.0);
		let tangent = end - start;
		let length = estimate_length(&start, &end, &tangent, &tangent, 10);
		assert!((length - 30.0).abs() < 0.01);
	}
}
