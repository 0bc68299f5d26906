use std::path::PathBuf;

use thiserror::Error;

/// Failures while loading or validating session data. The simulation itself
/// never fails: exhausted navigation and stale references resolve to despawns
/// and no-ops.
#[derive(Debug, Error)]
pub enum TrafficError {
	#[error("failed to read {path}: {source}")]
	Io {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},
	#[error("failed to parse ron document: {0}")]
	Parse(#[from] ron::error::SpannedError),
	#[error("network has no points")]
	EmptyNetwork,
	#[error("point {point} links {link} to missing point {target}")]
	DanglingLink {
		point: u32,
		link: &'static str,
		target: u32,
	},
	#[error("point {point} references missing junction {junction}")]
	DanglingJunction {
		point: u32,
		junction: u32,
	},
	#[error("junction {junction} references missing point {target}")]
	JunctionOutOfRange {
		junction: u32,
		target: u32,
	},
	#[error("invalid configuration: {}", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "))]
	Config(Vec<ConfigError>),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
	#[error("{min} must be <= {max}")]
	MinAboveMax {
		min: &'static str,
		max: &'static str,
	},
	#[error("{field} must be within {lower}..={upper}, got {value}")]
	OutOfRange {
		field: &'static str,
		lower: f32,
		upper: f32,
		value: f32,
	},
	#[error("{0} must be greater than zero")]
	NotPositive(&'static str),
	#[error("hourly traffic density needs 24 entries, got {0}")]
	HourlyDensityLength(usize),
	#[error("lane count override key must be greater than zero")]
	ZeroLaneCount,
	#[error("duplicate slot session id {0}")]
	DuplicateSlot(u8),
}

pub type Result<T> = std::result::Result<T, TrafficError>;
