// Kasalink Rust Source Code File - See https://kasalink.io for more info.
//
// Copyright 2016-2024 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Monotonic clock injection for the update engine, so polling intervals
//! and disable cooldowns are testable with frozen time.

use std::sync::Mutex;
use std::time::{Duration, Instant};

pub trait Clock: Send + Sync {
  fn now(&self) -> Instant;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> Instant {
    Instant::now()
  }
}

/// Manually advanced clock for tests.
#[derive(Debug)]
pub struct ManualClock {
  base: Instant,
  offset: Mutex<Duration>,
}

impl ManualClock {
  pub fn new() -> Self {
    Self {
      base: Instant::now(),
      offset: Mutex::new(Duration::ZERO),
    }
  }

  pub fn advance(&self, by: Duration) {
    *self.offset.lock().expect("clock mutex never poisoned") += by;
  }
}

impl Default for ManualClock {
  fn default() -> Self {
    Self::new()
  }
}

impl Clock for ManualClock {
  fn now(&self) -> Instant {
    self.base + *self.offset.lock().expect("clock mutex never poisoned")
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn manual_clock_advances_only_on_request() {
    let clock = ManualClock::new();
    let first = clock.now();
    assert_eq!(clock.now(), first);
    clock.advance(Duration::from_secs(61));
    assert_eq!(clock.now(), first + Duration::from_secs(61));
  }
}
