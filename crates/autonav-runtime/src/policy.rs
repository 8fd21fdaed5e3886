//! The policy capability and the adapter that bounds it.
//!
//! A [`Policy`] is an opaque function from an [`Observation`] to a
//! [`RawAction`].  The control loop never talks to a policy directly; it
//! goes through a [`PolicyAdapter`], which enforces the per-cycle inference
//! budget.  A policy that overruns the budget is abandoned for that cycle
//! and reported as [`NavError::PolicyTimeout`]; the loop substitutes a zero
//! action and the supervisor sees the consecutive-timeout count.
//!
//! Variants:
//!
//! | Reference | Implementation |
//! |---|---|
//! | `"heuristic"` | [`HeuristicPolicy`][crate::heuristic::HeuristicPolicy] |
//! | path to a `.json` model | [`MlpPolicy`][crate::mlp::MlpPolicy] |

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use autonav_types::{ControlAction, NavError, Orientation, PoseEstimate, RangeScan, RawAction};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::heuristic::HeuristicPolicy;
use crate::mlp::MlpPolicy;
use crate::navigator::Guidance;

/// Added to every range before taking its reciprocal.
pub const RECIPROCAL_EPSILON: f32 = 0.1;

const GRAVITY_MPS2: f32 = 9.81;

// ─────────────────────────────────────────────────────────────────────────────
// Observation
// ─────────────────────────────────────────────────────────────────────────────

/// Everything a policy may look at for one cycle.  Built fresh each cycle by
/// the control loop and handed over by value.
#[derive(Debug, Clone)]
pub struct Observation {
    pub scan: RangeScan,
    pub orientation: Orientation,
    pub estimate: PoseEstimate,
    pub guidance: Guidance,
    /// Guidance bearing minus IMU yaw, wrapped to `(-π, π]`.  Zero when there
    /// is nothing to steer toward.
    pub heading_error_rad: f32,
    /// The action that actually reached the motors last cycle.
    pub last_action: ControlAction,
}

impl Observation {
    /// Flat model input:
    ///
    /// `[last_linear, last_angular, 1/(ε+r_0) .. 1/(ε+r_n), gyro_z,
    ///   accel_x/g, sin(yaw), cos(yaw), sin(err), cos(err)]`
    pub fn features(&self) -> Vec<f32> {
        let mut features = Vec::with_capacity(Self::feature_len(self.scan.readings.len()));
        features.push(self.last_action.linear_velocity);
        features.push(self.last_action.angular_velocity);
        features.extend(self.scan.reciprocal(RECIPROCAL_EPSILON));
        features.push(self.orientation.gyro_z);
        features.push(self.orientation.accel_x / GRAVITY_MPS2);
        features.push(self.orientation.yaw_rad.sin());
        features.push(self.orientation.yaw_rad.cos());
        features.push(self.heading_error_rad.sin());
        features.push(self.heading_error_rad.cos());
        features
    }

    /// Length of [`Observation::features`] for a scan with `sectors` sectors.
    pub fn feature_len(sectors: usize) -> usize {
        sectors + 8
    }

    /// `true` when the navigator has somewhere for the platform to go.
    pub fn has_target(&self) -> bool {
        matches!(self.guidance, Guidance::Navigating { .. })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Policy capability
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
pub trait Policy: Send + Sync {
    fn name(&self) -> &str;

    /// Propose an action.  Long computations belong on the blocking pool;
    /// an implementation that blocks here still has its late result
    /// discarded by the adapter, but stalls the cycle while it runs.
    async fn infer(&self, observation: &Observation) -> Result<RawAction, NavError>;
}

/// Resolve a model reference to a policy.
///
/// # Errors
///
/// [`NavError::ModelLoadError`] when the reference is neither `"heuristic"`
/// nor a loadable model file.
pub fn load_policy(model_ref: &str) -> Result<Box<dyn Policy>, NavError> {
    match model_ref.trim() {
        "" => Err(NavError::ModelLoadError("empty model reference".into())),
        "heuristic" => Ok(Box::new(HeuristicPolicy::default())),
        path => Ok(Box::new(MlpPolicy::load(Path::new(path))?)),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// PolicyAdapter
// ─────────────────────────────────────────────────────────────────────────────

pub struct PolicyAdapter {
    policy: Box<dyn Policy>,
    budget: Duration,
    consecutive_timeouts: u32,
    total_timeouts: u64,
}

impl PolicyAdapter {
    pub fn new(policy: Box<dyn Policy>, budget: Duration) -> Self {
        Self {
            policy,
            budget,
            consecutive_timeouts: 0,
            total_timeouts: 0,
        }
    }

    pub fn policy_name(&self) -> &str {
        self.policy.name()
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// Run one bounded inference.  The returned action is clamped to
    /// `[-1, 1]` on both axes.
    ///
    /// A policy that blocks the executor instead of yielding cannot be
    /// interrupted; its result is discarded once it comes back past the
    /// budget.
    ///
    /// # Errors
    ///
    /// - [`NavError::PolicyTimeout`] when the budget elapses first.
    /// - Whatever the policy itself returned, typically
    ///   [`NavError::PolicyUnavailable`].
    pub async fn infer(&mut self, observation: Observation) -> Result<RawAction, NavError> {
        let started = Instant::now();
        let outcome = tokio::time::timeout(self.budget, self.policy.infer(&observation)).await;
        let elapsed = started.elapsed();
        match outcome {
            Ok(_) if elapsed > self.budget => {
                debug!(
                    policy = self.policy.name(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "late policy result discarded"
                );
                Err(self.timed_out())
            }
            Ok(Ok(RawAction(action))) => {
                self.consecutive_timeouts = 0;
                debug!(
                    policy = self.policy.name(),
                    linear = action.linear_velocity,
                    angular = action.angular_velocity,
                    "policy inference"
                );
                Ok(RawAction(action.clamped()))
            }
            Ok(Err(e)) => {
                warn!(policy = self.policy.name(), error = %e, "policy inference failed");
                Err(e)
            }
            Err(_) => Err(self.timed_out()),
        }
    }

    fn timed_out(&mut self) -> NavError {
        self.consecutive_timeouts += 1;
        self.total_timeouts += 1;
        let budget_ms = self.budget.as_millis() as u64;
        warn!(
            policy = self.policy.name(),
            budget_ms,
            consecutive = self.consecutive_timeouts,
            "policy inference timed out"
        );
        NavError::PolicyTimeout { budget_ms }
    }

    pub fn consecutive_timeouts(&self) -> u32 {
        self.consecutive_timeouts
    }

    pub fn total_timeouts(&self) -> u64 {
        self.total_timeouts
    }

    /// Forget the consecutive-timeout streak (after an external reset).
    pub fn reset_streak(&mut self) {
        self.consecutive_timeouts = 0;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use autonav_types::Pose;

    use super::*;

    fn observation() -> Observation {
        let angles: Vec<f32> = (0..4).map(|i| i as f32 * 0.5 - 0.75).collect();
        Observation {
            scan: RangeScan::from_ranges(&angles, &[Some(1.9), None, Some(0.4), Some(12.0)], 12.0),
            orientation: Orientation {
                yaw_rad: 0.0,
                gyro_z: 0.2,
                accel_x: 9.81,
            },
            estimate: PoseEstimate::seeded("a".into()),
            guidance: Guidance::Navigating {
                next: "b".into(),
                subgoal: Pose::new(2.0, 0.0, 0.0),
                bearing_rad: 0.0,
            },
            heading_error_rad: 0.0,
            last_action: ControlAction::new(0.5, -0.25),
        }
    }

    /// Sleeps for `delay` on every call, then drives forward.
    struct Sluggish {
        delay: Duration,
    }

    #[async_trait]
    impl Policy for Sluggish {
        fn name(&self) -> &str {
            "sluggish"
        }

        async fn infer(&self, _observation: &Observation) -> Result<RawAction, NavError> {
            tokio::time::sleep(self.delay).await;
            Ok(RawAction(ControlAction::new(3.0, -3.0)))
        }
    }

    /// Blocks the calling thread instead of yielding.
    struct Blocking {
        delay: Duration,
    }

    #[async_trait]
    impl Policy for Blocking {
        fn name(&self) -> &str {
            "blocking"
        }

        async fn infer(&self, _observation: &Observation) -> Result<RawAction, NavError> {
            std::thread::sleep(self.delay);
            Ok(RawAction(ControlAction::new(1.0, 0.0)))
        }
    }

    fn sluggish(delay_ms: u64) -> Box<dyn Policy> {
        Box::new(Sluggish {
            delay: Duration::from_millis(delay_ms),
        })
    }

    // ---------------------------------------------------------------------
    // features
    // ---------------------------------------------------------------------

    #[test]
    fn feature_layout() {
        let f = observation().features();
        assert_eq!(f.len(), Observation::feature_len(4));
        assert_eq!(&f[..2], &[0.5, -0.25]);
        assert!((f[2] - 1.0 / 2.0).abs() < 1e-6);
        // Missing sector falls back to the max range.
        assert!((f[3] - 1.0 / 12.1).abs() < 1e-6);
        assert!((f[4] - 2.0).abs() < 1e-6);
        assert!((f[6] - 0.2).abs() < 1e-6);
        assert!((f[7] - 1.0).abs() < 1e-6);
        assert_eq!(&f[8..], &[0.0, 1.0, 0.0, 1.0]);
    }

    // ---------------------------------------------------------------------
    // adapter
    // ---------------------------------------------------------------------

    #[tokio::test]
    async fn adapter_clamps_policy_output() {
        let mut adapter = PolicyAdapter::new(sluggish(0), Duration::from_millis(200));
        let action = adapter.infer(observation()).await.unwrap();
        assert_eq!(action.0, ControlAction::new(1.0, -1.0));
        assert_eq!(adapter.consecutive_timeouts(), 0);
    }

    #[tokio::test]
    async fn overrun_counts_as_timeout() {
        let mut adapter = PolicyAdapter::new(sluggish(200), Duration::from_millis(10));
        for expected in 1..=3 {
            let err = adapter.infer(observation()).await.unwrap_err();
            assert_eq!(err, NavError::PolicyTimeout { budget_ms: 10 });
            assert_eq!(adapter.consecutive_timeouts(), expected);
        }
        assert_eq!(adapter.total_timeouts(), 3);
    }

    #[tokio::test]
    async fn blocking_overrun_counts_as_timeout() {
        let policy = Box::new(Blocking {
            delay: Duration::from_millis(60),
        });
        let mut adapter = PolicyAdapter::new(policy, Duration::from_millis(10));
        for expected in 1..=2 {
            let err = adapter.infer(observation()).await.unwrap_err();
            assert_eq!(err, NavError::PolicyTimeout { budget_ms: 10 });
            assert_eq!(adapter.consecutive_timeouts(), expected);
        }
    }

    #[tokio::test]
    async fn success_resets_the_streak_but_not_the_total() {
        let mut adapter = PolicyAdapter::new(sluggish(200), Duration::from_millis(10));
        adapter.infer(observation()).await.unwrap_err();
        adapter.budget = Duration::from_secs(1);
        adapter.policy = sluggish(0);
        adapter.infer(observation()).await.unwrap();
        assert_eq!(adapter.consecutive_timeouts(), 0);
        assert_eq!(adapter.total_timeouts(), 1);
    }

    // ---------------------------------------------------------------------
    // load_policy
    // ---------------------------------------------------------------------

    #[test]
    fn heuristic_reference_resolves() {
        assert_eq!(load_policy("heuristic").unwrap().name(), "heuristic");
    }

    #[test]
    fn missing_model_file_is_a_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_policy(dir.path().join("absent.json").to_str().unwrap())
            .err()
            .unwrap();
        assert!(matches!(err, NavError::ModelLoadError(_)));
        assert!(matches!(load_policy("  "), Err(NavError::ModelLoadError(_))));
    }
}
