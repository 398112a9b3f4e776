//! The exam countdown.
//!
//! A `Countdown` is owned by the session controller while an exam runs.
//! Dropping it cancels it: there is no background task that could outlive
//! the session and fire into a discarded one.

use std::time::Duration;

use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

const TICK: Duration = Duration::from_secs(1);

/// What a single tick did to the countdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Time remains.
    Running { remaining_secs: u64 },
    /// This tick reached zero.
    Expired,
}

/// One-second countdown.
#[derive(Debug)]
pub struct Countdown {
    remaining_secs: u64,
    interval: Interval,
}

impl Countdown {
    /// Arm a countdown of `duration`, rounded up to whole seconds.
    pub fn start(duration: Duration) -> Self {
        Self {
            remaining_secs: whole_secs(duration),
            interval: new_interval(),
        }
    }

    /// Re-arm with a fresh duration, restarting the tick phase.
    pub fn reset(&mut self, duration: Duration) {
        self.remaining_secs = whole_secs(duration);
        self.interval = new_interval();
    }

    pub fn remaining(&self) -> Duration {
        Duration::from_secs(self.remaining_secs)
    }

    pub fn is_expired(&self) -> bool {
        self.remaining_secs == 0
    }

    /// Wait one second and decrement.
    ///
    /// An expired countdown keeps reporting `Expired` once per second.
    pub async fn tick(&mut self) -> Tick {
        self.interval.tick().await;
        self.remaining_secs = self.remaining_secs.saturating_sub(1);
        if self.remaining_secs == 0 {
            Tick::Expired
        } else {
            Tick::Running {
                remaining_secs: self.remaining_secs,
            }
        }
    }

    /// Wait one second without touching the remaining time.
    pub async fn hold(&mut self) {
        self.interval.tick().await;
    }
}

fn whole_secs(duration: Duration) -> u64 {
    let secs = duration.as_secs();
    if duration.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}

fn new_interval() -> Interval {
    let mut interval = interval_at(Instant::now() + TICK, TICK);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}
