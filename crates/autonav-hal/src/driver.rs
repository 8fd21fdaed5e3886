//! Driver traits at the hardware seam.
//!
//! Sensors are read through [`SensorDriver`], which must never block: it
//! returns whatever sample was most recently acquired together with its
//! acquisition instant, and the caller decides whether it is too old.
//! Actuation goes through [`MotorDriver`].

use autonav_types::{ControlAction, NavError, Stamped};

/// A non-blocking source of the most recent sample of type `T`.
pub trait SensorDriver<T>: Send + Sync {
    /// Stable identifier, e.g. `"lidar"` or `"imu"`.
    fn id(&self) -> &str;

    /// Return the latest sample.
    ///
    /// # Errors
    ///
    /// Returns [`NavError::SensorUnavailable`] when no sample has ever been
    /// acquired or the device is gone.
    fn read_latest(&self) -> Result<Stamped<T>, NavError>;
}

/// Throttle + steering output stage.
pub trait MotorDriver: Send {
    fn id(&self) -> &str;

    /// Apply a normalised drive command.
    ///
    /// # Errors
    ///
    /// Returns [`NavError::ActuatorFault`] when the command could not be
    /// written to the hardware.
    fn set_motor(&mut self, action: ControlAction) -> Result<(), NavError>;

    /// Command an active brake (not merely zero throttle).
    fn hard_brake(&mut self) -> Result<(), NavError>;

    /// Bring the outputs to a safe resting state and release the hardware.
    fn release(&mut self) -> Result<(), NavError>;
}

/// Blocking producer polled by a [`SensorPump`][crate::slot::SensorPump].
///
/// `poll` may block for a bounded time (e.g. a serial read timeout).
/// `Ok(None)` means nothing new was decoded during this poll.
pub trait SampleSource<T>: Send + 'static {
    fn id(&self) -> &str;

    fn poll(&mut self) -> Result<Option<T>, NavError>;
}
