use std::{
	sync::atomic::{AtomicU64, AtomicUsize, Ordering},
	time::Duration,
};

#[derive(Debug, Default)]
struct LoopTimer {
	ticks: AtomicU64,
	total_micros: AtomicU64,
	last_micros: AtomicU64,
}

impl LoopTimer {
	fn record(&self, elapsed: Duration) {
		let micros = elapsed.as_micros() as u64;
		self.ticks.fetch_add(1, Ordering::Relaxed);
		self.total_micros.fetch_add(micros, Ordering::Relaxed);
		self.last_micros.store(micros, Ordering::Relaxed);
	}

	fn snapshot(&self) -> LoopStats {
		let ticks = self.ticks.load(Ordering::Relaxed);
		let total = self.total_micros.load(Ordering::Relaxed);
		LoopStats {
			ticks,
			last: Duration::from_micros(self.last_micros.load(Ordering::Relaxed)),
			average: Duration::from_micros(if ticks == 0 { 0 } else { total / ticks }),
		}
	}
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
	pub ticks: u64,
	pub last: Duration,
	pub average: Duration,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
	pub ai_state_count: usize,
	pub update: LoopStats,
	pub obstacle_detection: LoopStats,
}

/// Counters written by the two coordinator loops.
#[derive(Debug, Default)]
pub struct TrafficMetrics {
	ai_state_count: AtomicUsize,
	update: LoopTimer,
	obstacle_detection: LoopTimer,
}

impl TrafficMetrics {
	pub fn set_ai_state_count(&self, count: usize) {
		self.ai_state_count.store(count, Ordering::Relaxed);
	}

	pub fn record_update(&self, elapsed: Duration) {
		self.update.record(elapsed);
	}

	pub fn record_obstacle_detection(&self, elapsed: Duration) {
		self.obstacle_detection.record(elapsed);
	}

	pub fn snapshot(&self) -> MetricsSnapshot {
		MetricsSnapshot {
			ai_state_count: self.ai_state_count.load(Ordering::Relaxed),
			update: self.update.snapshot(),
			obstacle_detection: self.obstacle_detection.snapshot(),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn averages_loop_durations() {
		let metrics = TrafficMetrics::default();
		metrics.record_update(Duration::from_micros(100));
		metrics.record_update(Duration::from_micros(300));
		metrics.set_ai_state_count(4);

		let snapshot = metrics.snapshot();
		assert_eq!(snapshot.ai_state_count, 4);
		assert_eq!(snapshot.update.ticks, 2);
		assert_eq!(snapshot.update.last, Duration::from_micros(300));
		assert_eq!(snapshot.update.average, Duration::from_micros(200));
		assert_eq!(snapshot.obstacle_detection, LoopStats::default());
	}
}
