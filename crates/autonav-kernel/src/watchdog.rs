//! [`FreshnessWatchdog`] – per-sensor sample age tracking.
//!
//! The control loop reports the acquisition instant of every sample it reads
//! via [`FreshnessWatchdog::observe`].  A sensor whose newest sample is older
//! than its stale bound is [`Freshness::Stale`] (the supervisor stops after a
//! few such cycles); older than the hard timeout it is [`Freshness::Dead`]
//! (the supervisor faults).
//!
//! A freshly registered sensor counts as observed at registration time, so a
//! device that never produces anything goes dead after the hard timeout
//! rather than immediately.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

// ────────────────────────────────────────────────────────────────────────────
// Public types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Freshness {
    Fresh,
    Stale,
    Dead,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FreshnessConfig {
    /// Age beyond which a range scan is stale.
    pub scan_stale_ms: u64,
    /// Age beyond which a camera embedding is stale (the localizer coasts).
    pub embedding_stale_ms: u64,
    /// Age beyond which an IMU sample is stale.
    pub imu_stale_ms: u64,
    /// Age beyond which any sensor is dead.
    pub hard_timeout_ms: u64,
}

impl Default for FreshnessConfig {
    fn default() -> Self {
        Self {
            scan_stale_ms: 250,
            embedding_stale_ms: 500,
            imu_stale_ms: 250,
            hard_timeout_ms: 1000,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Internal entry
// ────────────────────────────────────────────────────────────────────────────

struct SensorEntry {
    last_sample: Instant,
    stale_after: Duration,
    dead_after: Duration,
}

impl SensorEntry {
    fn classify(&self, at: Instant, now: Instant) -> Freshness {
        let age = now.saturating_duration_since(at);
        if age > self.dead_after {
            Freshness::Dead
        } else if age > self.stale_after {
            Freshness::Stale
        } else {
            Freshness::Fresh
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// FreshnessWatchdog
// ────────────────────────────────────────────────────────────────────────────

/// # Example
///
/// ```
/// use std::time::{Duration, Instant};
/// use autonav_kernel::watchdog::{Freshness, FreshnessWatchdog};
///
/// let mut wd = FreshnessWatchdog::new();
/// let t0 = Instant::now();
/// wd.register_at("lidar", Duration::from_millis(250), Duration::from_secs(1), t0);
/// wd.observe("lidar", t0);
///
/// assert_eq!(wd.freshness("lidar", t0 + Duration::from_millis(100)), Freshness::Fresh);
/// assert_eq!(wd.freshness("lidar", t0 + Duration::from_millis(400)), Freshness::Stale);
/// assert_eq!(wd.freshness("lidar", t0 + Duration::from_secs(2)), Freshness::Dead);
/// ```
#[derive(Default)]
pub struct FreshnessWatchdog {
    sensors: HashMap<String, SensorEntry>,
}

impl FreshnessWatchdog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `sensor` as last heard from at `now`; re-registering resets
    /// its clock.
    pub fn register_at(&mut self, sensor: &str, stale_after: Duration, dead_after: Duration, now: Instant) {
        self.sensors.insert(
            sensor.to_string(),
            SensorEntry {
                last_sample: now,
                stale_after,
                dead_after,
            },
        );
    }

    /// Record a sample acquired at `at`.  Older stamps than the newest seen
    /// are ignored; unregistered sensors are ignored.
    pub fn observe(&mut self, sensor: &str, at: Instant) {
        if let Some(entry) = self.sensors.get_mut(sensor)
            && at > entry.last_sample
        {
            entry.last_sample = at;
        }
    }

    /// Freshness of the newest sample seen for `sensor`.  Unknown sensors
    /// are reported [`Freshness::Dead`].
    pub fn freshness(&self, sensor: &str, now: Instant) -> Freshness {
        match self.sensors.get(sensor) {
            Some(entry) => entry.classify(entry.last_sample, now),
            None => Freshness::Dead,
        }
    }

    /// Freshness of one particular sample stamped `at`, judged against
    /// `sensor`'s bounds.
    pub fn classify(&self, sensor: &str, at: Instant, now: Instant) -> Freshness {
        match self.sensors.get(sensor) {
            Some(entry) => entry.classify(at, now),
            None => Freshness::Dead,
        }
    }

    /// Sensors that are not fresh, worst first, then by id.
    pub fn check_all(&self, now: Instant) -> Vec<(String, Freshness)> {
        let mut degraded: Vec<(String, Freshness)> = self
            .sensors
            .keys()
            .map(|id| (id.clone(), self.freshness(id, now)))
            .filter(|(_, f)| *f != Freshness::Fresh)
            .collect();
        degraded.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        degraded
    }

    /// The first dead sensor, if any.
    pub fn first_dead(&self, now: Instant) -> Option<String> {
        self.check_all(now)
            .into_iter()
            .find(|(_, f)| *f == Freshness::Dead)
            .map(|(id, _)| id)
    }
}
