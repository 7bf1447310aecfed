//! Node-wide quarantine after a detected selective attack.
//!
//! While quarantined the node refuses every new checkpoint snapshot and
//! every outgoing security query. Expiry is lazy: there is no background
//! timer, the state flips back on the first read past the deadline.

use std::time::{Duration, Instant};

use chrono::{Local, TimeDelta};
use tracing::{error, info};

use lynx_core::constants::{QUARANTINE_MAX_SECS, QUARANTINE_MIN_SECS};

/// Time-bounded, whole-node lockout. One instance is shared (behind a
/// mutex) by the acquisition pipeline and the query protocol.
#[derive(Debug, Default)]
pub struct QuarantineController {
    active: bool,
    started: Option<Instant>,
    duration: Duration,
}

impl QuarantineController {
    /// Create an inactive controller.
    pub fn new() -> Self {
        Self::default()
    }

    /// Activate the quarantine.
    ///
    /// No-op while already active. The duration is clamped into
    /// [1 hour, 6 hours]. `height` is the block height that triggered the
    /// lockout, recorded in the log only.
    pub fn activate(&mut self, height: u64, duration_secs: u64) {
        if self.is_active() {
            return;
        }

        let clamped = duration_secs.clamp(QUARANTINE_MIN_SECS, QUARANTINE_MAX_SECS);
        self.active = true;
        self.started = Some(Instant::now());
        self.duration = Duration::from_secs(clamped);

        let expires = Local::now() + TimeDelta::seconds(clamped as i64);
        error!(
            height,
            duration_secs = clamped,
            expires = %expires.format("%Y-%m-%d %H:%M:%S"),
            "QUARANTINE ACTIVATED: selective attack detected, \
             rejecting new checkpoints until expiry"
        );
    }

    /// Whether the quarantine is currently active.
    ///
    /// Reading past the deadline deactivates as a side effect, so a second
    /// read immediately after expiry also returns false.
    pub fn is_active(&mut self) -> bool {
        if !self.active {
            return false;
        }
        let expired = self
            .started
            .is_none_or(|started| started.elapsed() >= self.duration);
        if expired {
            self.active = false;
            self.started = None;
            info!("quarantine expired, resuming normal checkpoint processing");
            return false;
        }
        true
    }

    /// Time left until expiry, `None` when inactive.
    pub fn remaining(&self) -> Option<Duration> {
        if !self.active {
            return None;
        }
        let started = self.started?;
        self.duration.checked_sub(started.elapsed())
    }

    #[cfg(test)]
    fn force_window(&mut self, age: Duration, duration: Duration) {
        self.active = true;
        self.started = Some(Instant::now() - age);
        self.duration = duration;
    }
}
