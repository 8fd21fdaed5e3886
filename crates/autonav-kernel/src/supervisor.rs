//! [`Supervisor`] – the safety state machine.
//!
//! ```text
//!            warning range           hard-stop range / stale scan / lost
//!   NORMAL ───────────────► SLOWED ─────────────────────────────► STOPPED
//!      ▲  ◄──── clear for debounce ───┘  ◄──── clear for debounce ────┘
//!      │
//!      └── any state ──► FAULT  (dead sensor, repeated policy timeouts,
//!                                 repeated actuator faults; sticky until reset)
//! ```
//!
//! Escalation is immediate, including NORMAL straight to STOPPED.
//! De-escalation requires the triggering condition to stay clear for
//! `debounce_cycles` consecutive cycles.
//!
//! The supervisor is the single place a [`SafeAction`] can be produced.  In
//! STOPPED and FAULT the safe action is zero motion whatever the policy
//! asked for.

use std::f32::consts::PI;

use autonav_types::{ControlAction, RangeScan, RawAction, SafetyMode, SafetyState};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::limits::ActionLimiter;
use crate::watchdog::Freshness;

// ────────────────────────────────────────────────────────────────────────────
// Configuration
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    pub warning_distance_m: f32,
    pub hard_stop_distance_m: f32,
    /// Half-width of the slow-down cone around the commanded heading.
    pub warning_half_width_rad: f32,
    /// Half-width of the hard-stop cone around the commanded heading.
    pub stop_half_width_rad: f32,
    /// Heading offset produced by full steering (`angular_velocity == ±1`).
    pub full_steer_rad: f32,
    /// Linear speed multiplier while SLOWED.
    pub slow_factor: f32,
    pub stale_cycles_to_stop: u32,
    /// Confidence under which a cycle counts as lost.
    pub lost_confidence: f32,
    pub lost_cycles_to_stop: u32,
    pub debounce_cycles: u32,
    pub policy_timeouts_to_fault: u32,
    pub actuator_faults_to_fault: u32,
    pub max_linear: f32,
    pub max_angular: f32,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            warning_distance_m: 0.8,
            hard_stop_distance_m: 0.35,
            warning_half_width_rad: PI / 6.0,
            stop_half_width_rad: PI / 2.0,
            full_steer_rad: PI / 4.0,
            slow_factor: 0.4,
            stale_cycles_to_stop: 3,
            lost_confidence: 0.35,
            lost_cycles_to_stop: 10,
            debounce_cycles: 5,
            policy_timeouts_to_fault: 5,
            actuator_faults_to_fault: 5,
            max_linear: 1.0,
            max_angular: 1.0,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Per-cycle inputs and output
// ────────────────────────────────────────────────────────────────────────────

/// Health signals the control loop gathers each cycle, besides the scan.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleSignals {
    pub scan_freshness: Freshness,
    /// A sensor whose newest sample is older than the hard timeout.
    pub dead_sensor: Option<String>,
    pub localization_confidence: f32,
    pub consecutive_policy_timeouts: u32,
    pub consecutive_actuator_faults: u32,
}

impl Default for CycleSignals {
    fn default() -> Self {
        Self {
            scan_freshness: Freshness::Fresh,
            dead_sensor: None,
            localization_confidence: 1.0,
            consecutive_policy_timeouts: 0,
            consecutive_actuator_faults: 0,
        }
    }
}

/// An action cleared for the actuator.
///
/// Only [`Supervisor::arbitrate`] can produce a non-zero `SafeAction`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SafeAction {
    action: ControlAction,
    mode: SafetyMode,
}

impl SafeAction {
    /// Zero motion; always safe.
    pub fn hold(mode: SafetyMode) -> Self {
        Self {
            action: ControlAction::zero(),
            mode,
        }
    }

    pub fn action(&self) -> ControlAction {
        self.action
    }

    /// The supervisor mode this action was cleared under.
    pub fn mode(&self) -> SafetyMode {
        self.mode
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Supervisor
// ────────────────────────────────────────────────────────────────────────────

/// # Example
///
/// ```
/// use autonav_kernel::supervisor::{CycleSignals, SafetyConfig, Supervisor};
/// use autonav_types::{ControlAction, RangeScan, RawAction, SafetyMode};
///
/// let mut sup = Supervisor::new(SafetyConfig::default());
/// let wall = RangeScan::uniform(&[-0.2, 0.0, 0.2], 0.2, 12.0);
/// let out = sup.arbitrate(
///     RawAction(ControlAction::new(1.0, 0.0)),
///     Some(&wall),
///     &CycleSignals::default(),
/// );
/// assert!(out.action().is_zero());
/// assert_eq!(sup.mode(), SafetyMode::Stopped);
/// ```
pub struct Supervisor {
    config: SafetyConfig,
    limiter: ActionLimiter,
    state: SafetyState,
    stale_cycles: u32,
    lost_cycles: u32,
    clear_cycles: u32,
}

impl Supervisor {
    pub fn new(config: SafetyConfig) -> Self {
        let limiter = ActionLimiter::standard(config.max_linear, config.max_angular);
        Self::with_limiter(config, limiter)
    }

    pub fn with_limiter(config: SafetyConfig, limiter: ActionLimiter) -> Self {
        Self {
            config,
            limiter,
            state: SafetyState::default(),
            stale_cycles: 0,
            lost_cycles: 0,
            clear_cycles: 0,
        }
    }

    pub fn config(&self) -> &SafetyConfig {
        &self.config
    }

    pub fn state(&self) -> &SafetyState {
        &self.state
    }

    pub fn mode(&self) -> SafetyMode {
        self.state.mode
    }

    /// External reset: leaves FAULT (or any mode) for NORMAL and clears all
    /// counters.  Conditions that still hold re-escalate on the next cycle.
    pub fn reset(&mut self) {
        if self.state.mode != SafetyMode::Normal {
            info!(from = %self.state.mode, "safety supervisor reset");
        }
        self.state = SafetyState::new(SafetyMode::Normal, "external reset");
        self.stale_cycles = 0;
        self.lost_cycles = 0;
        self.clear_cycles = 0;
    }

    /// Decide what reaches the motors this cycle and update the mode.
    ///
    /// Call exactly once per cycle, even when the policy produced nothing
    /// (pass a zero [`RawAction`]), so the staleness and lost counters
    /// advance.
    pub fn arbitrate(&mut self, raw: RawAction, scan: Option<&RangeScan>, signals: &CycleSignals) -> SafeAction {
        if self.state.mode == SafetyMode::Fault {
            return SafeAction::hold(SafetyMode::Fault);
        }
        if let Some(reason) = self.fault_reason(signals) {
            self.transition(SafetyMode::Fault, reason);
            return SafeAction::hold(SafetyMode::Fault);
        }

        let (target, reason) = self.assess(raw.0, scan, signals);
        let current = self.state.mode;
        if target > current {
            self.clear_cycles = 0;
            self.transition(target, reason);
        } else if target < current {
            self.clear_cycles += 1;
            if self.clear_cycles >= self.config.debounce_cycles {
                self.clear_cycles = 0;
                self.transition(target, reason);
            }
        } else {
            self.clear_cycles = 0;
        }

        match self.state.mode {
            SafetyMode::Normal => SafeAction {
                action: self.limiter.apply(raw.0),
                mode: SafetyMode::Normal,
            },
            SafetyMode::Slowed => {
                let limited = self.limiter.apply(raw.0);
                SafeAction {
                    action: ControlAction::new(
                        limited.linear_velocity * self.config.slow_factor,
                        limited.angular_velocity,
                    ),
                    mode: SafetyMode::Slowed,
                }
            }
            mode => SafeAction::hold(mode),
        }
    }

    fn fault_reason(&self, signals: &CycleSignals) -> Option<String> {
        if let Some(sensor) = &signals.dead_sensor {
            return Some(format!("sensor {sensor} silent beyond hard timeout"));
        }
        if signals.consecutive_policy_timeouts >= self.config.policy_timeouts_to_fault {
            return Some(format!(
                "{} consecutive policy timeouts",
                signals.consecutive_policy_timeouts
            ));
        }
        if signals.consecutive_actuator_faults >= self.config.actuator_faults_to_fault {
            return Some(format!(
                "{} consecutive actuator faults",
                signals.consecutive_actuator_faults
            ));
        }
        None
    }

    /// The mode the current conditions call for, with its reason.
    fn assess(&mut self, raw: ControlAction, scan: Option<&RangeScan>, signals: &CycleSignals) -> (SafetyMode, String) {
        let scan_ok = scan.is_some() && signals.scan_freshness == Freshness::Fresh;
        self.stale_cycles = if scan_ok { 0 } else { self.stale_cycles + 1 };
        self.lost_cycles = if signals.localization_confidence < self.config.lost_confidence {
            self.lost_cycles + 1
        } else {
            0
        };

        if self.stale_cycles >= self.config.stale_cycles_to_stop {
            return (
                SafetyMode::Stopped,
                format!("range scan stale for {} cycles", self.stale_cycles),
            );
        }
        if self.lost_cycles > self.config.lost_cycles_to_stop {
            return (
                SafetyMode::Stopped,
                format!("localization lost for {} cycles", self.lost_cycles),
            );
        }

        let Some(scan) = scan else {
            return (SafetyMode::Normal, "clear".to_string());
        };
        let heading = self.commanded_heading(raw);
        if let Some(d) = scan.min_range_within(heading, self.config.stop_half_width_rad)
            && d < self.config.hard_stop_distance_m
        {
            return (SafetyMode::Stopped, format!("obstacle at {d:.2} m inside hard-stop distance"));
        }
        if let Some(d) = scan.min_range_within(heading, self.config.warning_half_width_rad)
            && d < self.config.warning_distance_m
        {
            return (SafetyMode::Slowed, format!("obstacle at {d:.2} m inside warning distance"));
        }
        (SafetyMode::Normal, "clear".to_string())
    }

    /// Direction of travel implied by `raw`, relative to the platform front.
    fn commanded_heading(&self, raw: ControlAction) -> f32 {
        let steer = if raw.angular_velocity.is_finite() {
            raw.angular_velocity.clamp(-1.0, 1.0) * self.config.full_steer_rad
        } else {
            0.0
        };
        if raw.linear_velocity < 0.0 { steer + PI } else { steer }
    }

    fn transition(&mut self, mode: SafetyMode, reason: String) {
        let from = self.state.mode;
        if mode >= SafetyMode::Stopped {
            warn!(%from, to = %mode, %reason, "safety transition");
        } else {
            info!(%from, to = %mode, %reason, "safety transition");
        }
        self.state = SafetyState::new(mode, reason);
    }
}
