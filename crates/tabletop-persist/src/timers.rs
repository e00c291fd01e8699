//! Timers for the authority's event loop.
//!
//! Both timers are polled from `tokio::select!` on every iteration, so a
//! disarmed timer returns a future that never completes instead of an
//! `Option` the caller has to branch on.

use std::future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::time::{Instant, Interval, MissedTickBehavior};

/// Wall-clock now, unix millis. Capture timestamps use this.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Periodic capture ticker.
#[derive(Debug)]
pub struct AutosaveTimer {
    period: Duration,
    interval: Option<Interval>,
}

impl AutosaveTimer {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            interval: None,
        }
    }

    /// Starts ticking one period from now. Restarting resets the phase.
    /// A zero period leaves the timer stopped.
    pub fn start(&mut self) {
        if self.period.is_zero() {
            return;
        }
        let mut interval = tokio::time::interval_at(Instant::now() + self.period, self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.interval = Some(interval);
    }

    pub fn stop(&mut self) {
        self.interval = None;
    }

    pub fn is_running(&self) -> bool {
        self.interval.is_some()
    }

    /// Completes on the next tick. Pends forever while stopped.
    pub async fn tick(&mut self) {
        match self.interval.as_mut() {
            Some(interval) => {
                interval.tick().await;
            }
            None => future::pending::<()>().await,
        }
    }
}

/// Fires once after the session has had no connections for a full window.
#[derive(Debug)]
pub struct IdleTimer {
    window: Duration,
    deadline: Option<Instant>,
    last_count: Option<usize>,
}

impl IdleTimer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            deadline: None,
            last_count: None,
        }
    }

    /// Feeds the current connection count.
    ///
    /// Arms when the count drops to zero (or starts there) and disarms as
    /// soon as it is positive. A repeated zero keeps the original deadline.
    pub fn connections_changed(&mut self, count: usize) {
        let previous = self.last_count.replace(count);
        if count > 0 {
            self.disarm();
        } else if previous != Some(0) {
            self.arm();
        }
    }

    /// Arms a full window from now, replacing any pending deadline.
    pub fn arm(&mut self) {
        self.deadline = Some(Instant::now() + self.window);
    }

    pub fn disarm(&mut self) {
        self.deadline = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Completes once when the deadline passes, then disarms.
    /// Pends forever while disarmed.
    pub async fn expired(&mut self) {
        match self.deadline {
            Some(deadline) => {
                tokio::time::sleep_until(deadline).await;
                self.deadline = None;
            }
            None => future::pending::<()>().await,
        }
    }
}
