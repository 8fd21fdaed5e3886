//! [`ActionLimiter`] – last-line clamps on outgoing actions.
//!
//! Unlike the supervisor, limits never change the operating mode; they only
//! reshape an action that is already allowed to move the platform.  Every
//! registered [`Limit`] is applied in insertion order.

use autonav_types::ControlAction;
use tracing::{debug, warn};

// ────────────────────────────────────────────────────────────────────────────
// Limit trait
// ────────────────────────────────────────────────────────────────────────────

/// A single invariant that an outgoing action is forced to satisfy.
pub trait Limit: Send + Sync {
    /// Human-readable name used in log lines.
    fn name(&self) -> &str;

    fn apply(&self, action: ControlAction) -> ControlAction;
}

// ────────────────────────────────────────────────────────────────────────────
// ActionLimiter
// ────────────────────────────────────────────────────────────────────────────

/// # Example
///
/// ```
/// use autonav_kernel::limits::ActionLimiter;
/// use autonav_types::ControlAction;
///
/// let limiter = ActionLimiter::standard(0.5, 1.0);
/// let out = limiter.apply(ControlAction::new(0.9, -3.0));
/// assert_eq!(out, ControlAction::new(0.5, -1.0));
///
/// let nan = limiter.apply(ControlAction::new(f32::NAN, 0.2));
/// assert!(nan.is_zero());
/// ```
#[derive(Default)]
pub struct ActionLimiter {
    limits: Vec<Box<dyn Limit>>,
}

impl ActionLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Non-finite rejection followed by symmetric speed caps.
    pub fn standard(max_linear: f32, max_angular: f32) -> Self {
        let mut limiter = Self::new();
        limiter.add_limit(Box::new(FiniteLimit));
        limiter.add_limit(Box::new(SpeedCapLimit {
            max_linear,
            max_angular,
        }));
        limiter
    }

    pub fn add_limit(&mut self, limit: Box<dyn Limit>) {
        self.limits.push(limit);
    }

    pub fn apply(&self, action: ControlAction) -> ControlAction {
        self.limits.iter().fold(action, |before, limit| {
            let after = limit.apply(before);
            if after != before {
                debug!(limit = limit.name(), ?before, ?after, "action limited");
            }
            after
        })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Built-in limits
// ────────────────────────────────────────────────────────────────────────────

/// Replaces any action with a NaN/∞ component by zero motion.
pub struct FiniteLimit;

impl Limit for FiniteLimit {
    fn name(&self) -> &str {
        "finite"
    }

    fn apply(&self, action: ControlAction) -> ControlAction {
        if action.is_finite() {
            action
        } else {
            warn!(?action, "non-finite action replaced by zero motion");
            ControlAction::zero()
        }
    }
}

/// Clamps each component to `±max`.
pub struct SpeedCapLimit {
    pub max_linear: f32,
    pub max_angular: f32,
}

impl Limit for SpeedCapLimit {
    fn name(&self) -> &str {
        "speed_cap"
    }

    fn apply(&self, action: ControlAction) -> ControlAction {
        ControlAction::new(
            action.linear_velocity.clamp(-self.max_linear, self.max_linear),
            action.angular_velocity.clamp(-self.max_angular, self.max_angular),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ForwardOnly;

    impl Limit for ForwardOnly {
        fn name(&self) -> &str {
            "forward_only"
        }

        fn apply(&self, action: ControlAction) -> ControlAction {
            ControlAction::new(action.linear_velocity.max(0.0), action.angular_velocity)
        }
    }

    #[test]
    fn empty_limiter_passes_through() {
        let a = ControlAction::new(5.0, 5.0);
        assert_eq!(ActionLimiter::new().apply(a), a);
    }

    #[test]
    fn limits_apply_in_insertion_order() {
        let mut limiter = ActionLimiter::standard(1.0, 1.0);
        limiter.add_limit(Box::new(ForwardOnly));
        assert_eq!(limiter.apply(ControlAction::new(-2.0, 0.3)), ControlAction::new(0.0, 0.3));
    }

    #[test]
    fn infinite_component_zeroes_action() {
        let limiter = ActionLimiter::standard(1.0, 1.0);
        assert!(limiter.apply(ControlAction::new(0.3, f32::INFINITY)).is_zero());
    }
}
