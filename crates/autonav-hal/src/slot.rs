//! Single-slot latest-value buffers.
//!
//! Each physical sensor is drained by a background [`SensorPump`] that
//! overwrites a [`LatestSlot`].  The control loop reads the slot through a
//! [`SlotSensor`] without ever waiting on I/O, and older samples are simply
//! dropped.
//!
//! # Example
//!
//! ```rust
//! use autonav_hal::slot::{LatestSlot, SlotSensor};
//! use autonav_hal::SensorDriver;
//!
//! let slot = LatestSlot::new();
//! let sensor = SlotSensor::new("imu", slot.clone());
//! assert!(sensor.read_latest().is_err());
//!
//! slot.publish(42u32);
//! assert_eq!(sensor.read_latest().unwrap().value, 42);
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use autonav_types::{NavError, Stamped};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::driver::{SampleSource, SensorDriver};

/// Back-off after a source error before polling again.
const ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Shared, overwrite-only holder for the most recent sample.
pub struct LatestSlot<T> {
    inner: Arc<Mutex<Option<Stamped<T>>>>,
}

impl<T> Clone for LatestSlot<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for LatestSlot<T> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(None)),
        }
    }
}

impl<T> LatestSlot<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the held sample, stamping it with the current instant.
    pub fn publish(&self, value: T) {
        self.publish_at(value, Instant::now());
    }

    pub fn publish_at(&self, value: T, at: Instant) {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        *guard = Some(Stamped::new(value, at));
    }

    pub fn clear(&self) {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        *guard = None;
    }
}

impl<T: Clone> LatestSlot<T> {
    pub fn latest(&self) -> Option<Stamped<T>> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// [`SensorDriver`] view over a [`LatestSlot`].
pub struct SlotSensor<T> {
    id: String,
    slot: LatestSlot<T>,
}

impl<T> SlotSensor<T> {
    pub fn new(id: impl Into<String>, slot: LatestSlot<T>) -> Self {
        Self {
            id: id.into(),
            slot,
        }
    }
}

impl<T: Clone + Send> SensorDriver<T> for SlotSensor<T> {
    fn id(&self) -> &str {
        &self.id
    }

    fn read_latest(&self) -> Result<Stamped<T>, NavError> {
        self.slot.latest().ok_or_else(|| NavError::SensorUnavailable {
            sensor: self.id.clone(),
            details: "no sample acquired yet".to_string(),
        })
    }
}

/// Background task that drains a [`SampleSource`] into a [`LatestSlot`].
///
/// The source is polled on a blocking worker thread so serial reads never
/// stall the async runtime.
pub struct SensorPump {
    id: String,
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl SensorPump {
    /// Start pumping `source` into `slot`, sleeping `period` between polls.
    pub fn spawn<T, S>(mut source: S, slot: LatestSlot<T>, period: Duration) -> Self
    where
        T: Send + 'static,
        S: SampleSource<T>,
    {
        let id = source.id().to_string();
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let handle = tokio::task::spawn_blocking(move || {
            while !flag.load(Ordering::Relaxed) {
                match source.poll() {
                    Ok(Some(sample)) => slot.publish(sample),
                    Ok(None) => {}
                    Err(e) => {
                        warn!(sensor = source.id(), error = %e, "sensor source error, backing off");
                        std::thread::sleep(ERROR_BACKOFF);
                        continue;
                    }
                }
                if !period.is_zero() {
                    std::thread::sleep(period);
                }
            }
            debug!(sensor = source.id(), "sensor pump exited");
        });
        Self { id, stop, handle }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Ask the pump to exit and wait for the worker to finish.
    pub async fn shutdown(self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Err(e) = self.handle.await {
            warn!(sensor = %self.id, error = %e, "sensor pump panicked");
        }
    }
}
