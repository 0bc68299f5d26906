use std::{fmt::Debug, sync::atomic::{AtomicI64, Ordering}};

use tokio::time::Instant;

/// Millisecond session time read by every periodic loop and delayed callback.
pub trait Clock: Debug + Send + Sync {
	fn now_ms(&self) -> i64;
}

/// Milliseconds since the clock was created. Follows tokio's clock, so paused
/// test runtimes advance it too.
#[derive(Debug)]
pub struct SessionClock {
	start: Instant,
}

impl SessionClock {
	pub fn new() -> Self {
		Self {
			start: Instant::now(),
		}
	}
}

impl Default for SessionClock {
	fn default() -> Self {
		Self::new()
	}
}

impl Clock for SessionClock {
	fn now_ms(&self) -> i64 {
		self.start.elapsed().as_millis() as i64
	}
}

/// Clock moved by hand.
#[derive(Debug, Default)]
pub struct ManualClock {
	now: AtomicI64,
}

impl ManualClock {
	pub fn new(now: i64) -> Self {
		Self {
			now: AtomicI64::new(now),
		}
	}

	pub fn set(&self, now: i64) {
		self.now.store(now, Ordering::SeqCst);
	}

	pub fn advance(&self, ms: i64) -> i64 {
		self.now.fetch_add(ms, Ordering::SeqCst) + ms
	}
}

impl Clock for ManualClock {
	fn now_ms(&self) -> i64 {
		self.now.load(Ordering::SeqCst)
	}
}
