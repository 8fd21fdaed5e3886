//! Throttle/steering output through an ESC and a steering servo.
//!
//! [`PwmMapping`] turns a normalised [`ControlAction`] into pulse widths,
//! [`PwmOutput`] writes pulse widths to a channel, and [`PwmMotor`] ties the
//! two together behind [`MotorDriver`].
//!
//! The ESC is forward-only: any throttle at or below the deadband maps to the
//! neutral pulse, and the brake pulse is only emitted by
//! [`MotorDriver::hard_brake`].

use std::path::PathBuf;
use std::time::Duration;

use autonav_types::{ControlAction, NavError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::driver::MotorDriver;

/// Pulse-width calibration of the drive train (all widths in µs).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PwmMapping {
    pub frame_ns: u64,
    pub throttle_neutral_us: u32,
    pub throttle_brake_us: u32,
    /// First pulse that actually moves the wheels.
    pub throttle_start_us: u32,
    pub throttle_max_us: u32,
    pub throttle_deadband: f32,
    pub steer_center_us: u32,
    pub steer_span_us: u32,
    pub steer_min_us: u32,
    pub steer_max_us: u32,
    /// How long `release` holds the brake before going neutral.
    pub brake_hold_ms: u64,
}

impl Default for PwmMapping {
    fn default() -> Self {
        Self {
            frame_ns: 20_000_000,
            throttle_neutral_us: 1500,
            throttle_brake_us: 1000,
            throttle_start_us: 1575,
            throttle_max_us: 1600,
            throttle_deadband: 0.0,
            steer_center_us: 1500,
            steer_span_us: 500,
            steer_min_us: 1000,
            steer_max_us: 2000,
            brake_hold_ms: 2000,
        }
    }
}

impl PwmMapping {
    pub fn throttle_us(&self, throttle: f32) -> u32 {
        // NaN lands here too.
        if !(throttle > self.throttle_deadband) {
            return self.throttle_neutral_us;
        }
        let val = ((throttle - self.throttle_deadband) / (1.0 - self.throttle_deadband)).min(1.0);
        let range = self.throttle_max_us.saturating_sub(self.throttle_start_us) as f32;
        self.throttle_start_us + (val * range) as u32
    }

    pub fn steering_us(&self, steering: f32) -> u32 {
        if !steering.is_finite() {
            return self.steer_center_us;
        }
        let us = self.steer_center_us as f32 + steering * self.steer_span_us as f32;
        (us as u32).clamp(self.steer_min_us, self.steer_max_us)
    }
}

/// The two output channels of the drive train.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PwmChannel {
    Throttle,
    Steering,
}

/// A pulse-width output peripheral.
pub trait PwmOutput: Send {
    fn configure(&mut self, channel: PwmChannel, period_ns: u64) -> Result<(), NavError>;
    fn set_pulse_us(&mut self, channel: PwmChannel, pulse_us: u32) -> Result<(), NavError>;
    fn set_enabled(&mut self, channel: PwmChannel, enabled: bool) -> Result<(), NavError>;
}

/// Linux sysfs PWM (`/sys/class/pwm/pwmchipN/pwmM/…`).
pub struct SysfsPwm {
    chip_dir: PathBuf,
    throttle_index: u32,
    steering_index: u32,
}

impl SysfsPwm {
    pub fn new(chip_dir: impl Into<PathBuf>, throttle_index: u32, steering_index: u32) -> Self {
        Self {
            chip_dir: chip_dir.into(),
            throttle_index,
            steering_index,
        }
    }

    fn channel_dir(&self, channel: PwmChannel) -> PathBuf {
        let index = match channel {
            PwmChannel::Throttle => self.throttle_index,
            PwmChannel::Steering => self.steering_index,
        };
        self.chip_dir.join(format!("pwm{index}"))
    }

    fn write(&self, channel: PwmChannel, attr: &str, value: impl ToString) -> Result<(), NavError> {
        let path = self.channel_dir(channel).join(attr);
        std::fs::write(&path, value.to_string()).map_err(|e| NavError::ActuatorFault {
            component: format!("{channel:?}").to_lowercase(),
            details: format!("{}: {e}", path.display()),
        })
    }
}

impl PwmOutput for SysfsPwm {
    fn configure(&mut self, channel: PwmChannel, period_ns: u64) -> Result<(), NavError> {
        self.write(channel, "period", period_ns)
    }

    fn set_pulse_us(&mut self, channel: PwmChannel, pulse_us: u32) -> Result<(), NavError> {
        self.write(channel, "duty_cycle", u64::from(pulse_us) * 1_000)
    }

    fn set_enabled(&mut self, channel: PwmChannel, enabled: bool) -> Result<(), NavError> {
        self.write(channel, "enable", u8::from(enabled))
    }
}

/// [`MotorDriver`] for an ESC + steering servo pair.
pub struct PwmMotor<O> {
    id: String,
    output: O,
    mapping: PwmMapping,
    throttle_us: u32,
    steer_us: u32,
}

impl<O: PwmOutput> PwmMotor<O> {
    pub fn new(id: impl Into<String>, output: O, mapping: PwmMapping) -> Self {
        let throttle_us = mapping.throttle_neutral_us;
        let steer_us = mapping.steer_center_us;
        Self {
            id: id.into(),
            output,
            mapping,
            throttle_us,
            steer_us,
        }
    }

    /// Configure both channels and run the ESC arming sequence
    /// (brake pulse, then neutral), waiting `settle` after each step.
    pub fn arm(&mut self, settle: Duration) -> Result<(), NavError> {
        for channel in [PwmChannel::Throttle, PwmChannel::Steering] {
            self.output.configure(channel, self.mapping.frame_ns)?;
        }
        self.steer_us = self.mapping.steer_center_us;
        self.throttle_us = self.mapping.throttle_brake_us;
        self.apply()?;
        self.output.set_enabled(PwmChannel::Throttle, true)?;
        self.output.set_enabled(PwmChannel::Steering, true)?;
        std::thread::sleep(settle);
        self.throttle_us = self.mapping.throttle_neutral_us;
        self.apply()?;
        std::thread::sleep(settle);
        info!(motor = %self.id, "ESC armed");
        Ok(())
    }

    /// Current `(throttle, steering)` pulse widths.
    pub fn pulses(&self) -> (u32, u32) {
        (self.throttle_us, self.steer_us)
    }

    fn apply(&mut self) -> Result<(), NavError> {
        self.output.set_pulse_us(PwmChannel::Steering, self.steer_us)?;
        self.output.set_pulse_us(PwmChannel::Throttle, self.throttle_us)
    }
}

impl<O: PwmOutput> MotorDriver for PwmMotor<O> {
    fn id(&self) -> &str {
        &self.id
    }

    fn set_motor(&mut self, action: ControlAction) -> Result<(), NavError> {
        self.throttle_us = self.mapping.throttle_us(action.linear_velocity);
        self.steer_us = self.mapping.steering_us(action.angular_velocity);
        self.apply()
    }

    fn hard_brake(&mut self) -> Result<(), NavError> {
        self.throttle_us = self.mapping.throttle_brake_us;
        self.apply()
    }

    fn release(&mut self) -> Result<(), NavError> {
        self.hard_brake()?;
        std::thread::sleep(Duration::from_millis(self.mapping.brake_hold_ms));
        self.throttle_us = self.mapping.throttle_neutral_us;
        self.steer_us = self.mapping.steer_center_us;
        self.apply()?;
        self.output.set_enabled(PwmChannel::Throttle, false)?;
        self.output.set_enabled(PwmChannel::Steering, false)?;
        debug!(motor = %self.id, "PWM outputs released");
        Ok(())
    }
}
