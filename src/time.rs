// Copyright (c) 2023 The TQUIC Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Simulated time source.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

/// A source of simulated time.
///
/// `now()` returns the time elapsed since the start of the simulation.
/// Algorithms only ever compare or subtract readings from the same clock.
pub trait Clock {
    fn now(&self) -> Duration;
}

/// Shared handle to a clock, held by time-aware algorithms.
pub type ClockRef = Rc<dyn Clock>;

/// A manually driven clock owned by the event scheduler.
///
/// Clones share the same underlying time, so advancing any handle is seen by
/// every algorithm built from it.
#[derive(Clone, Default)]
pub struct SimClock {
    now: Rc<Cell<Duration>>,
}

impl SimClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the clock forward by `d`.
    pub fn advance(&self, d: Duration) {
        self.now.set(self.now.get().saturating_add(d));
    }

    /// Jump to `t`. Simulated time never goes backwards, earlier values are
    /// ignored.
    pub fn set(&self, t: Duration) {
        if t > self.now.get() {
            self.now.set(t);
        }
    }

    /// Return a trait object handle sharing this clock.
    pub fn handle(&self) -> ClockRef {
        Rc::new(self.clone())
    }
}

impl Clock for SimClock {
    fn now(&self) -> Duration {
        self.now.get()
    }
}

impl fmt::Debug for SimClock {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "SimClock({:?})", self.now.get())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sim_clock_shared() {
        let clock = SimClock::new();
        let handle = clock.handle();
        assert_eq!(handle.now(), Duration::ZERO);

        clock.advance(Duration::from_millis(250));
        assert_eq!(handle.now(), Duration::from_millis(250));

        clock.set(Duration::from_secs(2));
        assert_eq!(handle.now(), Duration::from_secs(2));

        // Going backwards is ignored.
        clock.set(Duration::from_secs(1));
        assert_eq!(clock.now(), Duration::from_secs(2));
    }
}
