use std::fmt::Debug;

use async_trait::async_trait;
use serde::Serialize;
use tracing::trace;

/// AI entries carried by one debug packet.
pub const AI_DEBUG_BATCH: usize = 20;
const EMPTY_SESSION: u8 = 255;

/// Speeds in km/h, obstacle distance in meters (-1 for none). Unused entries
/// carry session id 255.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AiDebugPacket {
	pub session_ids: [u8; AI_DEBUG_BATCH],
	pub current_speeds: [u8; AI_DEBUG_BATCH],
	pub target_speeds: [u8; AI_DEBUG_BATCH],
	pub max_speeds: [u8; AI_DEBUG_BATCH],
	pub closest_ai_obstacles: [i16; AI_DEBUG_BATCH],
}

impl Default for AiDebugPacket {
	fn default() -> Self {
		Self {
			session_ids: [EMPTY_SESSION; AI_DEBUG_BATCH],
			current_speeds: [0; AI_DEBUG_BATCH],
			target_speeds: [0; AI_DEBUG_BATCH],
			max_speeds: [0; AI_DEBUG_BATCH],
			closest_ai_obstacles: [0; AI_DEBUG_BATCH],
		}
	}
}

/// One AI as seen by a player, speeds in m/s.
#[derive(Debug, Clone, Copy)]
pub struct AiDebugEntry {
	pub session_id: u8,
	pub current_speed: f32,
	pub target_speed: f32,
	pub max_speed: f32,
	pub closest_ai_obstacle: f32,
}

fn kph(speed: f32) -> u8 {
	(speed * 3.6).clamp(0.0, u8::MAX as f32) as u8
}

pub fn batch(entries: &[AiDebugEntry]) -> Vec<AiDebugPacket> {
	entries
		.chunks(AI_DEBUG_BATCH)
		.map(|chunk| {
			let mut packet = AiDebugPacket::default();
			for (i, entry) in chunk.iter().enumerate() {
				packet.session_ids[i] = entry.session_id;
				packet.current_speeds[i] = kph(entry.current_speed);
				packet.target_speeds[i] = kph(entry.target_speed);
				packet.max_speeds[i] = kph(entry.max_speed);
				packet.closest_ai_obstacles[i] = entry.closest_ai_obstacle.clamp(i16::MIN as f32, i16::MAX as f32) as i16;
			}
			packet
		})
		.collect()
}

/// Where the coordinator delivers outbound traffic data.
#[async_trait]
pub trait TrafficSink: Debug + Send + Sync {
	async fn send_ai_debug(&self, recipient: u8, packet: AiDebugPacket);
}

/// Writes packets to the trace log.
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl TrafficSink for LogSink {
	async fn send_ai_debug(&self, recipient: u8, packet: AiDebugPacket) {
		let count = packet.session_ids.iter().filter(|&&id| id != EMPTY_SESSION).count();
		trace!(recipient, count, ?packet.session_ids, "ai debug packet");
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn entry(session_id: u8) -> AiDebugEntry {
		AiDebugEntry {
			session_id,
			current_speed: 10.0,
			target_speed: 20.0,
			max_speed: 100.0,
			closest_ai_obstacle: -1.0,
		}
	}

	#[test]
	fn batches_twenty_per_packet() {
		let entries: Vec<AiDebugEntry> = (0..25).map(entry).collect();
		let packets = batch(&entries);
		assert_eq!(packets.len(), 2);
		assert_eq!(packets[0].session_ids[19], 19);
		assert_eq!(packets[1].session_ids[4], 24);
		assert_eq!(packets[1].session_ids[5], 255);
		assert_eq!(packets[0].current_speeds[0], 36);
		assert_eq!(packets[0].target_speeds[0], 72);
		assert_eq!(packets[0].max_speeds[0], 255);
		assert_eq!(packets[0].closest_ai_obstacles[0], -1);
	}

	#[test]
	fn nothing_to_send_without_entries() {
		assert!(batch(&[]).is_empty());
	}
}
