//! `autonav-hal` – hardware abstraction for the AutoNav control core.
//!
//! The control loop only ever talks to the [`SensorDriver`] and
//! [`MotorDriver`] traits.  Concrete back-ends live here:
//!
//! - [`slot`]: single-slot latest-value buffers fed by background pumps.
//! - [`feed`]: newline-delimited JSON samples from companion processes.
//! - [`lidar`]: LD19 frame decoding and sector bucketing into a
//!   [`RangeScan`][autonav_types::RangeScan].
//! - [`pwm`]: throttle/steering pulse mapping for an ESC + servo pair.
//! - [`sim`]: an in-process kinematic rig for tests and `--sim` runs.

pub mod driver;
pub mod feed;
pub mod lidar;
pub mod pwm;
pub mod sim;
pub mod slot;

pub use driver::{MotorDriver, SampleSource, SensorDriver};
