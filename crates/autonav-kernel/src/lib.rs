//! `autonav-kernel` – Safety arbitration
//!
//! The brainstem of the control core.  It does not plan or learn; it decides
//! whether the policy's proposal may reach the motors.
//!
//! # Modules
//!
//! - [`supervisor`] – [`Supervisor`][supervisor::Supervisor]: the
//!   `NORMAL / SLOWED / STOPPED / FAULT` state machine.  Its
//!   [`SafeAction`][supervisor::SafeAction] output is the only non-zero
//!   command the actuator stage accepts.
//! - [`limits`] – [`ActionLimiter`][limits::ActionLimiter]: a chain of
//!   [`Limit`][limits::Limit]s (finite check, speed caps) applied to every
//!   action the supervisor lets through.
//! - [`watchdog`] – [`FreshnessWatchdog`][watchdog::FreshnessWatchdog]:
//!   classifies each sensor's latest sample as fresh, stale or dead.

pub mod limits;
pub mod supervisor;
pub mod watchdog;

pub use limits::{ActionLimiter, FiniteLimit, Limit, SpeedCapLimit};
pub use supervisor::{CycleSignals, SafeAction, SafetyConfig, Supervisor};
pub use watchdog::{Freshness, FreshnessConfig, FreshnessWatchdog};
