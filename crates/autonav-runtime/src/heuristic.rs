//! [`HeuristicPolicy`] – rule-based fallback driver.
//!
//! Steers with a PD law on the sub-goal heading error, bends away from
//! nearby returns with reciprocal-range repulsion, and scales forward speed
//! by the clearance straight ahead.

use async_trait::async_trait;
use autonav_types::{ControlAction, NavError, RawAction};
use serde::{Deserialize, Serialize};

use crate::policy::{Observation, Policy};

/// Half-width of the forward cone used for the clearance speed scale.
const CLEARANCE_HALF_WIDTH_RAD: f32 = std::f32::consts::FRAC_PI_6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeuristicConfig {
    /// Forward command on open floor.
    pub cruise: f32,
    /// Proportional gain on heading error (per radian).
    pub heading_gain: f32,
    /// Damping gain on yaw rate.
    pub yaw_rate_gain: f32,
    /// Returns closer than this push the heading away.
    pub influence_m: f32,
    pub repulsion_gain: f32,
    /// Forward command never drops below this fraction of cruise while a
    /// target remains; stopping is the supervisor's job.
    pub min_speed_fraction: f32,
}

impl Default for HeuristicConfig {
    fn default() -> Self {
        Self {
            cruise: 0.6,
            heading_gain: 1.2,
            yaw_rate_gain: 0.1,
            influence_m: 1.5,
            repulsion_gain: 0.3,
            min_speed_fraction: 0.2,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct HeuristicPolicy {
    config: HeuristicConfig,
}

impl HeuristicPolicy {
    pub fn new(config: HeuristicConfig) -> Self {
        Self { config }
    }

    fn repulsion(&self, observation: &Observation) -> f32 {
        let influence = self.config.influence_m;
        observation
            .scan
            .readings
            .iter()
            .filter_map(|r| r.range_m.map(|d| (r.angle_rad, d)))
            .filter(|&(_, d)| d > 0.0 && d < influence)
            .map(|(angle, d)| -angle.sin() * (1.0 / d - 1.0 / influence))
            .sum::<f32>()
            * self.config.repulsion_gain
    }

    fn clearance_scale(&self, observation: &Observation) -> f32 {
        let ahead = observation
            .scan
            .min_range_within(0.0, CLEARANCE_HALF_WIDTH_RAD)
            .unwrap_or(observation.scan.max_range_m);
        (ahead / self.config.influence_m).clamp(self.config.min_speed_fraction, 1.0)
    }
}

#[async_trait]
impl Policy for HeuristicPolicy {
    fn name(&self) -> &str {
        "heuristic"
    }

    async fn infer(&self, observation: &Observation) -> Result<RawAction, NavError> {
        if !observation.has_target() {
            return Ok(RawAction::default());
        }

        let err = observation.heading_error_rad;
        let steer = self.config.heading_gain * err
            - self.config.yaw_rate_gain * observation.orientation.gyro_z
            + self.repulsion(observation);

        // Turn in place-ish when facing away from the sub-goal.
        let alignment = err.cos().max(0.0);
        let speed = self.config.cruise * self.clearance_scale(observation) * alignment;

        Ok(RawAction(ControlAction::new(speed, steer).clamped()))
    }
}

#[cfg(test)]
mod tests {
    use autonav_types::{Orientation, Pose, PoseEstimate, RangeScan};

    use super::*;
    use crate::navigator::Guidance;

    fn observation(scan: RangeScan, heading_error_rad: f32) -> Observation {
        Observation {
            scan,
            orientation: Orientation::default(),
            estimate: PoseEstimate::seeded("a".into()),
            guidance: Guidance::Navigating {
                next: "b".into(),
                subgoal: Pose::new(2.0, 0.0, 0.0),
                bearing_rad: 0.0,
            },
            heading_error_rad,
            last_action: ControlAction::zero(),
        }
    }

    fn open_floor() -> RangeScan {
        RangeScan::uniform(&[-1.0, -0.3, 0.0, 0.3, 1.0], 12.0, 12.0)
    }

    #[tokio::test]
    async fn open_floor_aligned_cruises_straight() {
        let policy = HeuristicPolicy::default();
        let RawAction(a) = policy.infer(&observation(open_floor(), 0.0)).await.unwrap();
        assert!((a.linear_velocity - 0.6).abs() < 1e-6);
        assert_eq!(a.angular_velocity, 0.0);
    }

    #[tokio::test]
    async fn steers_toward_subgoal() {
        let policy = HeuristicPolicy::default();
        let RawAction(left) = policy.infer(&observation(open_floor(), 0.5)).await.unwrap();
        let RawAction(right) = policy.infer(&observation(open_floor(), -0.5)).await.unwrap();
        assert!(left.angular_velocity > 0.0);
        assert!(right.angular_velocity < 0.0);
        assert!(left.linear_velocity < 0.6);
    }

    #[tokio::test]
    async fn obstacle_on_left_pushes_right_and_slows() {
        let policy = HeuristicPolicy::default();
        let angles = [-1.0, -0.3, 0.0, 0.3, 1.0];
        let scan = RangeScan::from_ranges(
            &angles,
            &[Some(12.0), Some(12.0), Some(0.9), Some(0.5), Some(12.0)],
            12.0,
        );
        let RawAction(a) = policy.infer(&observation(scan, 0.0)).await.unwrap();
        assert!(a.angular_velocity < 0.0);
        assert!(a.linear_velocity < 0.6 * 0.5);
    }

    #[tokio::test]
    async fn no_target_means_no_motion() {
        let policy = HeuristicPolicy::default();
        let mut obs = observation(open_floor(), 0.0);
        obs.guidance = Guidance::GoalReached {
            subgoal: Pose::default(),
        };
        assert!(policy.infer(&obs).await.unwrap().0.is_zero());
    }
}
