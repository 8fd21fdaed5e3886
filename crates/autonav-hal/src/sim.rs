//! [`SimRig`] – in-process kinematic platform for tests and `--sim` runs.
//!
//! The rig owns a planar pose that a [`SimMotor`] integrates one control
//! period per command, plus sensor stubs that derive their readings from that
//! pose:
//!
//! | Driver | Stub behaviour |
//! |---|---|
//! | [`SimRangeSensor`] | Every sector reads the clear range, or the injected obstacle distance within ±30° of forward. |
//! | [`SimImu`] | Yaw is the rig heading; gyro is the commanded turn rate. |
//! | [`SimEmbeddingSensor`] | Returns the embedding of the nearest anchor. |
//! | [`SimMotor`] | Records every command and integrates the pose. |
//!
//! Faults can be injected at runtime: lagging scans, silent cameras and
//! failing motor writes.
//!
//! # Example
//!
//! ```rust
//! use autonav_hal::sim::SimRig;
//! use autonav_hal::{MotorDriver, SensorDriver};
//! use autonav_types::{ControlAction, Pose};
//!
//! let rig = SimRig::builder()
//!     .with_anchor(Pose::new(0.0, 0.0, 0.0), vec![1.0, 0.0])
//!     .with_anchor(Pose::new(2.0, 0.0, 0.0), vec![0.0, 1.0])
//!     .build();
//!
//! let mut motor = rig.motor();
//! motor.set_motor(ControlAction::new(1.0, 0.0)).unwrap();
//! assert!(rig.pose().x > 0.0);
//!
//! let camera = rig.embedding_sensor();
//! assert_eq!(camera.read_latest().unwrap().value, vec![1.0, 0.0]);
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use autonav_types::{ControlAction, Embedding, NavError, Orientation, Pose, RangeScan, Stamped};
use tracing::debug;

use crate::driver::{MotorDriver, SensorDriver};
use crate::lidar::ld19_default_sector_angles_rad;

/// Half-width of the forward cone an injected obstacle occupies.
const OBSTACLE_HALF_WIDTH_RAD: f32 = std::f32::consts::FRAC_PI_6;

/// Kinematic parameters of the simulated platform.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Speed at `linear_velocity == 1.0`.
    pub max_speed_mps: f32,
    /// Turn rate at `angular_velocity == 1.0`.
    pub max_turn_rate_rps: f32,
    /// Integration step applied per motor command.
    pub step: Duration,
    pub clear_range_m: f32,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            max_speed_mps: 1.0,
            max_turn_rate_rps: 1.5,
            step: Duration::from_millis(100),
            clear_range_m: 12.0,
        }
    }
}

#[derive(Debug, Default)]
struct SimState {
    pose: Pose,
    last_action: ControlAction,
    commands: Vec<ControlAction>,
    brakes: usize,
    released: bool,
    obstacle_m: Option<f32>,
    scan_lag: Option<Duration>,
    camera_silent: bool,
    embedding_override: Option<Embedding>,
    motor_failures: u32,
}

/// Shared handle to the simulated platform.  Clones observe the same state.
#[derive(Clone)]
pub struct SimRig {
    state: Arc<Mutex<SimState>>,
    anchors: Arc<Vec<(Pose, Embedding)>>,
    sector_angles: Arc<Vec<f32>>,
    config: SimConfig,
}

/// Builder for [`SimRig`].
#[derive(Default)]
pub struct SimRigBuilder {
    start: Pose,
    anchors: Vec<(Pose, Embedding)>,
    config: SimConfig,
}

impl SimRigBuilder {
    pub fn with_start(mut self, pose: Pose) -> Self {
        self.start = pose;
        self
    }

    /// Register a place whose camera view yields `embedding`.
    pub fn with_anchor(mut self, anchor: Pose, embedding: Embedding) -> Self {
        self.anchors.push((anchor, embedding));
        self
    }

    pub fn with_config(mut self, config: SimConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> SimRig {
        SimRig {
            state: Arc::new(Mutex::new(SimState {
                pose: self.start,
                ..SimState::default()
            })),
            anchors: Arc::new(self.anchors),
            sector_angles: Arc::new(ld19_default_sector_angles_rad()),
            config: self.config,
        }
    }
}

impl SimRig {
    pub fn builder() -> SimRigBuilder {
        SimRigBuilder::default()
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn range_sensor(&self) -> SimRangeSensor {
        SimRangeSensor { rig: self.clone() }
    }

    pub fn imu(&self) -> SimImu {
        SimImu { rig: self.clone() }
    }

    pub fn embedding_sensor(&self) -> SimEmbeddingSensor {
        SimEmbeddingSensor { rig: self.clone() }
    }

    pub fn motor(&self) -> SimMotor {
        SimMotor { rig: self.clone() }
    }

    // ── observation ─────────────────────────────────────────────────────────

    pub fn pose(&self) -> Pose {
        self.lock().pose
    }

    pub fn set_pose(&self, pose: Pose) {
        self.lock().pose = pose;
    }

    /// Every action written through [`SimMotor::set_motor`], oldest first.
    pub fn commands(&self) -> Vec<ControlAction> {
        self.lock().commands.clone()
    }

    pub fn brake_count(&self) -> usize {
        self.lock().brakes
    }

    pub fn is_released(&self) -> bool {
        self.lock().released
    }

    // ── fault injection ─────────────────────────────────────────────────────

    /// Place an obstacle `range_m` ahead, or clear it with `None`.
    pub fn place_obstacle(&self, range_m: Option<f32>) {
        self.lock().obstacle_m = range_m;
    }

    /// Make every scan appear `lag` old when read.
    pub fn lag_scans(&self, lag: Option<Duration>) {
        self.lock().scan_lag = lag;
    }

    /// A silent camera makes the embedding sensor unavailable.
    pub fn silence_camera(&self, silent: bool) {
        self.lock().camera_silent = silent;
    }

    /// Force the camera to report `embedding` regardless of position.
    pub fn override_embedding(&self, embedding: Option<Embedding>) {
        self.lock().embedding_override = embedding;
    }

    /// Fail the next `count` motor writes with an actuator fault.
    pub fn fail_motor_writes(&self, count: u32) {
        self.lock().motor_failures = count;
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Sensors
// ────────────────────────────────────────────────────────────────────────────

pub struct SimRangeSensor {
    rig: SimRig,
}

impl SensorDriver<RangeScan> for SimRangeSensor {
    fn id(&self) -> &str {
        "sim_lidar"
    }

    fn read_latest(&self) -> Result<Stamped<RangeScan>, NavError> {
        let state = self.rig.lock();
        let clear = self.rig.config.clear_range_m;
        let ranges: Vec<Option<f32>> = self
            .rig
            .sector_angles
            .iter()
            .map(|angle| match state.obstacle_m {
                Some(d) if angle.abs() <= OBSTACLE_HALF_WIDTH_RAD => Some(d),
                _ => Some(clear),
            })
            .collect();
        let scan = RangeScan::from_ranges(&self.rig.sector_angles, &ranges, clear);

        let now = Instant::now();
        let at = state
            .scan_lag
            .and_then(|lag| now.checked_sub(lag))
            .unwrap_or(now);
        Ok(Stamped::new(scan, at))
    }
}

pub struct SimImu {
    rig: SimRig,
}

impl SensorDriver<Orientation> for SimImu {
    fn id(&self) -> &str {
        "sim_imu"
    }

    fn read_latest(&self) -> Result<Stamped<Orientation>, NavError> {
        let state = self.rig.lock();
        Ok(Stamped::now(Orientation {
            yaw_rad: state.pose.heading_rad,
            gyro_z: state.last_action.angular_velocity * self.rig.config.max_turn_rate_rps,
            accel_x: 0.0,
        }))
    }
}

pub struct SimEmbeddingSensor {
    rig: SimRig,
}

impl SensorDriver<Embedding> for SimEmbeddingSensor {
    fn id(&self) -> &str {
        "sim_camera"
    }

    fn read_latest(&self) -> Result<Stamped<Embedding>, NavError> {
        let state = self.rig.lock();
        if state.camera_silent {
            return Err(NavError::SensorUnavailable {
                sensor: self.id().to_string(),
                details: "camera silenced".to_string(),
            });
        }
        if let Some(embedding) = &state.embedding_override {
            return Ok(Stamped::now(embedding.clone()));
        }
        let pose = state.pose;
        self.rig
            .anchors
            .iter()
            .min_by(|(a, _), (b, _)| pose.distance_to(a).total_cmp(&pose.distance_to(b)))
            .map(|(_, embedding)| Stamped::now(embedding.clone()))
            .ok_or_else(|| NavError::SensorUnavailable {
                sensor: self.id().to_string(),
                details: "no anchors registered".to_string(),
            })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Motor
// ────────────────────────────────────────────────────────────────────────────

pub struct SimMotor {
    rig: SimRig,
}

impl MotorDriver for SimMotor {
    fn id(&self) -> &str {
        "sim_motor"
    }

    fn set_motor(&mut self, action: ControlAction) -> Result<(), NavError> {
        let cfg = self.rig.config.clone();
        let mut state = self.rig.lock();
        if state.motor_failures > 0 {
            state.motor_failures -= 1;
            return Err(NavError::ActuatorFault {
                component: "sim_motor".to_string(),
                details: "injected write failure".to_string(),
            });
        }
        state.commands.push(action);
        state.last_action = action;

        let dt = cfg.step.as_secs_f32();
        let heading = state.pose.heading_rad + action.angular_velocity * cfg.max_turn_rate_rps * dt;
        let speed = action.linear_velocity * cfg.max_speed_mps;
        state.pose = Pose::new(
            state.pose.x + speed * heading.cos() * dt,
            state.pose.y + speed * heading.sin() * dt,
            autonav_types::wrap_angle(heading),
        );
        Ok(())
    }

    fn hard_brake(&mut self) -> Result<(), NavError> {
        let mut state = self.rig.lock();
        state.last_action = ControlAction::zero();
        state.brakes += 1;
        Ok(())
    }

    fn release(&mut self) -> Result<(), NavError> {
        let mut state = self.rig.lock();
        state.last_action = ControlAction::zero();
        state.released = true;
        debug!("sim motor released");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_anchor_rig() -> SimRig {
        SimRig::builder()
            .with_anchor(Pose::new(0.0, 0.0, 0.0), vec![1.0, 0.0])
            .with_anchor(Pose::new(2.0, 0.0, 0.0), vec![0.0, 1.0])
            .build()
    }

    #[test]
    fn motor_integrates_pose() {
        let rig = two_anchor_rig();
        let mut motor = rig.motor();
        for _ in 0..10 {
            motor.set_motor(ControlAction::new(1.0, 0.0)).unwrap();
        }
        let pose = rig.pose();
        assert!((pose.x - 1.0).abs() < 1e-4);
        assert!(pose.y.abs() < 1e-6);
        assert_eq!(rig.commands().len(), 10);
    }

    #[test]
    fn camera_reports_nearest_anchor() {
        let rig = two_anchor_rig();
        let camera = rig.embedding_sensor();
        rig.set_pose(Pose::new(1.6, 0.0, 0.0));
        assert_eq!(camera.read_latest().unwrap().value, vec![0.0, 1.0]);

        rig.silence_camera(true);
        assert!(camera.read_latest().is_err());
    }

    #[test]
    fn obstacle_only_affects_forward_cone() {
        let rig = two_anchor_rig();
        rig.place_obstacle(Some(0.3));
        let scan = rig.range_sensor().read_latest().unwrap().value;
        assert_eq!(scan.min_range_within(0.0, 0.2), Some(0.3));
        assert_eq!(scan.min_range_within(std::f32::consts::FRAC_PI_2, 0.1), Some(12.0));
    }

    #[test]
    fn lagged_scan_is_stamped_in_the_past() {
        let rig = two_anchor_rig();
        rig.lag_scans(Some(Duration::from_millis(400)));
        let sample = rig.range_sensor().read_latest().unwrap();
        assert!(sample.age(Instant::now()) >= Duration::from_millis(400));
    }

    #[test]
    fn injected_motor_failures_are_consumed() {
        let rig = two_anchor_rig();
        let mut motor = rig.motor();
        rig.fail_motor_writes(2);
        assert!(motor.set_motor(ControlAction::zero()).is_err());
        assert!(motor.set_motor(ControlAction::zero()).is_err());
        assert!(motor.set_motor(ControlAction::zero()).is_ok());
    }

    #[test]
    fn brake_and_release_are_recorded() {
        let rig = two_anchor_rig();
        let mut motor = rig.motor();
        motor.hard_brake().unwrap();
        motor.release().unwrap();
        assert_eq!(rig.brake_count(), 1);
        assert!(rig.is_released());
    }
}
