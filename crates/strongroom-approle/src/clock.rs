// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Injected time source for TTL and expiry computation.
//!
//! Every expiry decision in the engine reads through [`Clock`] rather than
//! calling `Utc::now()` directly, so tests can drive time deterministically
//! with [`ManualClock`].

use chrono::{DateTime, Duration, Utc};
use std::sync::Mutex;

/// Monotonic-enough time source for TTL/expiry computation.
pub trait Clock: Send + Sync {
	/// Current instant.
	fn now(&self) -> DateTime<Utc>;
}

/// Production clock reading the system time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
	fn now(&self) -> DateTime<Utc> {
		Utc::now()
	}
}

/// Controllable clock for tests.
///
/// Starts at a fixed instant and only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
	now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
	/// Clock pinned at the given instant.
	pub fn starting_at(start: DateTime<Utc>) -> Self {
		Self {
			now: Mutex::new(start),
		}
	}

	/// Advance the clock by the given duration.
	pub fn advance(&self, by: Duration) {
		let mut now = self.now.lock().expect("clock mutex poisoned");
		*now += by;
	}
}

impl Clock for ManualClock {
	fn now(&self) -> DateTime<Utc> {
		*self.now.lock().expect("clock mutex poisoned")
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn system_clock_moves_forward() {
		let clock = SystemClock;
		let a = clock.now();
		let b = clock.now();
		assert!(b >= a);
	}

	#[test]
	fn manual_clock_is_pinned_until_advanced() {
		let start = Utc::now();
		let clock = ManualClock::starting_at(start);
		assert_eq!(clock.now(), start);
		assert_eq!(clock.now(), start);

		clock.advance(Duration::seconds(90));
		assert_eq!(clock.now(), start + Duration::seconds(90));
	}
}
