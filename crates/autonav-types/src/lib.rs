//! `autonav-types` – shared vocabulary of the AutoNav control core.
//!
//! Every crate in the workspace speaks in these types: region identifiers and
//! poses, per-cycle sensor samples, control actions, safety/run state, the
//! telemetry [`StatusSnapshot`], and the [`NavError`] taxonomy.

use std::f32::consts::PI;
use std::fmt;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

// ────────────────────────────────────────────────────────────────────────────
// Regions and poses
// ────────────────────────────────────────────────────────────────────────────

/// Stable identifier of a pre-mapped region (e.g. `"r_07"`).
///
/// Ordering is lexicographic and is used wherever a deterministic tie-break
/// between regions is needed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegionId(String);

impl RegionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RegionId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for RegionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Planar pose: position in metres plus heading measured counter-clockwise
/// from +X in radians.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pose {
    pub x: f32,
    pub y: f32,
    #[serde(default)]
    pub heading_rad: f32,
}

impl Pose {
    pub fn new(x: f32, y: f32, heading_rad: f32) -> Self {
        Self { x, y, heading_rad }
    }

    /// World-frame bearing from `self` towards `other`, in `(-π, π]`.
    pub fn bearing_to(&self, other: &Pose) -> f32 {
        (other.y - self.y).atan2(other.x - self.x)
    }

    pub fn distance_to(&self, other: &Pose) -> f32 {
        (other.x - self.x).hypot(other.y - self.y)
    }
}

/// Wrap an angle into `(-π, π]`.
pub fn wrap_angle(angle_rad: f32) -> f32 {
    let mut a = angle_rad % (2.0 * PI);
    if a <= -PI {
        a += 2.0 * PI;
    } else if a > PI {
        a -= 2.0 * PI;
    }
    a
}

// ────────────────────────────────────────────────────────────────────────────
// Localization
// ────────────────────────────────────────────────────────────────────────────

/// How the current [`PoseEstimate`] was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Fix {
    /// The best place-recognition match was accepted.
    Locked,
    /// The best match was too ambiguous; the prior region is held.
    LowConfidence,
    /// A confident match to a non-adjacent region was refused.
    JumpRejected,
    /// No fresh embedding arrived; the prior region is coasting.
    NoSignal,
}

/// The Localizer's belief about which region the platform is in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseEstimate {
    pub region: RegionId,
    /// Confidence in `[0, 1]`, derived from the best/second-best margin.
    pub confidence: f32,
    /// Optional continuous offset relative to the region's anchor.
    pub offset: Option<Pose>,
    pub fix: Fix,
    pub timestamp: DateTime<Utc>,
}

impl PoseEstimate {
    /// An estimate seeded from outside the Localizer (start region or the
    /// cached last-known region) with zero confidence.
    pub fn seeded(region: RegionId) -> Self {
        Self {
            region,
            confidence: 0.0,
            offset: None,
            fix: Fix::NoSignal,
            timestamp: Utc::now(),
        }
    }

    /// `true` unless this cycle's match was accepted.
    pub fn is_degraded(&self) -> bool {
        self.fix != Fix::Locked
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Sensor samples
// ────────────────────────────────────────────────────────────────────────────

/// A value paired with the monotonic instant it was acquired.
#[derive(Debug, Clone, PartialEq)]
pub struct Stamped<T> {
    pub value: T,
    pub at: Instant,
}

impl<T> Stamped<T> {
    pub fn new(value: T, at: Instant) -> Self {
        Self { value, at }
    }

    pub fn now(value: T) -> Self {
        Self::new(value, Instant::now())
    }

    /// Age of the sample relative to `now` (zero if `now` precedes it).
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.at)
    }
}

/// One angular sector of a range scan.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RangeReading {
    /// Sector centre, counter-clockwise from the platform's forward axis.
    pub angle_rad: f32,
    /// Distance to the nearest return, `None` when the sector has no reading.
    pub range_m: Option<f32>,
}

/// A sectorised range scan (LiDAR).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeScan {
    pub readings: Vec<RangeReading>,
    /// Range reported for sectors without a reading.
    pub max_range_m: f32,
}

impl RangeScan {
    /// Build a scan from parallel angle and range slices.
    pub fn from_ranges(angles_rad: &[f32], ranges_m: &[Option<f32>], max_range_m: f32) -> Self {
        let readings = angles_rad
            .iter()
            .zip(ranges_m)
            .map(|(&angle_rad, &range_m)| RangeReading { angle_rad, range_m })
            .collect();
        Self {
            readings,
            max_range_m,
        }
    }

    /// A scan where every sector reads `range_m`.
    pub fn uniform(angles_rad: &[f32], range_m: f32, max_range_m: f32) -> Self {
        let ranges: Vec<Option<f32>> = angles_rad.iter().map(|_| Some(range_m)).collect();
        Self::from_ranges(angles_rad, &ranges, max_range_m)
    }

    /// Minimum reading among sectors whose centre lies within `half_width_rad`
    /// of `center_rad`.  `None` when no sector in the window has a reading.
    pub fn min_range_within(&self, center_rad: f32, half_width_rad: f32) -> Option<f32> {
        self.readings
            .iter()
            .filter(|r| wrap_angle(r.angle_rad - center_rad).abs() <= half_width_rad)
            .filter_map(|r| r.range_m)
            .filter(|r| r.is_finite())
            .reduce(f32::min)
    }

    /// Reciprocal-range features `1 / (epsilon + range)`; sectors without a
    /// reading contribute the max range.
    pub fn reciprocal(&self, epsilon: f32) -> Vec<f32> {
        self.readings
            .iter()
            .map(|r| 1.0 / (epsilon + r.range_m.unwrap_or(self.max_range_m)))
            .collect()
    }
}

/// Place-recognition descriptor produced by the camera pipeline.
pub type Embedding = Vec<f32>;

/// IMU sample used by the loop.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Orientation {
    /// Absolute yaw in the map frame (radians).
    pub yaw_rad: f32,
    /// Angular velocity about Z (rad/s).
    pub gyro_z: f32,
    /// Forward linear acceleration (m/s²).
    pub accel_x: f32,
}

// ────────────────────────────────────────────────────────────────────────────
// Actions
// ────────────────────────────────────────────────────────────────────────────

/// Normalised drive command: both components nominally in `[-1, 1]`.
///
/// `linear_velocity` maps to throttle, `angular_velocity` to steering
/// (positive = turn left / counter-clockwise).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ControlAction {
    pub linear_velocity: f32,
    pub angular_velocity: f32,
}

impl ControlAction {
    pub fn new(linear_velocity: f32, angular_velocity: f32) -> Self {
        Self {
            linear_velocity,
            angular_velocity,
        }
    }

    /// The zero-motion command.
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn is_zero(&self) -> bool {
        self.linear_velocity == 0.0 && self.angular_velocity == 0.0
    }

    pub fn is_finite(&self) -> bool {
        self.linear_velocity.is_finite() && self.angular_velocity.is_finite()
    }

    /// Both components clamped to `[-1, 1]`.
    pub fn clamped(self) -> Self {
        Self::new(
            self.linear_velocity.clamp(-1.0, 1.0),
            self.angular_velocity.clamp(-1.0, 1.0),
        )
    }
}

/// An action straight out of the policy, before safety arbitration.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RawAction(pub ControlAction);

// ────────────────────────────────────────────────────────────────────────────
// Safety and run state
// ────────────────────────────────────────────────────────────────────────────

/// Safety Supervisor operating mode, ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SafetyMode {
    Normal,
    Slowed,
    Stopped,
    /// Terminal until an external reset.
    Fault,
}

impl fmt::Display for SafetyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SafetyMode::Normal => "NORMAL",
            SafetyMode::Slowed => "SLOWED",
            SafetyMode::Stopped => "STOPPED",
            SafetyMode::Fault => "FAULT",
        };
        f.write_str(s)
    }
}

/// Current safety mode plus the human-readable reason for the last transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyState {
    pub mode: SafetyMode,
    pub reason: String,
    pub since: DateTime<Utc>,
}

impl SafetyState {
    pub fn new(mode: SafetyMode, reason: impl Into<String>) -> Self {
        Self {
            mode,
            reason: reason.into(),
            since: Utc::now(),
        }
    }
}

impl Default for SafetyState {
    fn default() -> Self {
        Self::new(SafetyMode::Normal, "startup")
    }
}

/// Lifecycle of the Control Loop as seen by operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// No mission: localization and telemetry run, actuation is held at zero.
    Idle,
    Running,
    /// Actuation held at zero; localization and telemetry keep running.
    Paused,
    /// Goal region reached; brake held.
    Arrived,
    /// Resources released; the loop will not tick again.
    Stopped,
}

/// Operator commands, consumed by the Control Loop at the next cycle boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", content = "payload", rename_all = "snake_case")]
pub enum LoopCommand {
    Start { goal: RegionId },
    Pause,
    /// Resume actuation; also the external reset that clears `FAULT`.
    Resume,
    Stop,
}

/// Per-cycle status published to the telemetry collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub cycle: u64,
    pub mission_id: Option<Uuid>,
    pub run_state: RunState,
    pub goal: Option<RegionId>,
    pub region: Option<RegionId>,
    pub confidence: f32,
    pub fix: Option<Fix>,
    /// Most similar regions from the latest localization, best first.
    pub top_candidates: Vec<(RegionId, f32)>,
    pub safety: SafetyState,
    pub last_action: ControlAction,
    pub plan: Vec<RegionId>,
    /// Index of the current region within `plan`.
    pub plan_progress: usize,
    /// Plans recomputed because the estimate left the active plan.
    pub replans: u64,
    pub policy_timeouts: u64,
    pub timestamp: DateTime<Utc>,
}

impl StatusSnapshot {
    /// Snapshot describing a loop that has not ticked yet.
    pub fn initial() -> Self {
        Self {
            cycle: 0,
            mission_id: None,
            run_state: RunState::Idle,
            goal: None,
            region: None,
            confidence: 0.0,
            fix: None,
            top_candidates: Vec::new(),
            safety: SafetyState::default(),
            last_action: ControlAction::zero(),
            plan: Vec::new(),
            plan_progress: 0,
            replans: 0,
            policy_timeouts: 0,
            timestamp: Utc::now(),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// Whether an error aborts startup or is absorbed by the running loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Fatal,
    Recoverable,
}

/// Error taxonomy spanning startup failures and per-cycle degradations.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NavError {
    #[error("Invalid region graph: {0}")]
    InvalidGraph(String),

    #[error("Region embedding table unavailable: {0}")]
    NoEmbeddingTable(String),

    #[error("Policy model failed to load: {0}")]
    ModelLoadError(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Sensor {sensor} unavailable: {details}")]
    SensorUnavailable { sensor: String, details: String },

    #[error("Policy inference exceeded its {budget_ms} ms budget")]
    PolicyTimeout { budget_ms: u64 },

    #[error("Policy unavailable: {0}")]
    PolicyUnavailable(String),

    #[error("Actuator fault on {component}: {details}")]
    ActuatorFault { component: String, details: String },

    #[error("Region {to} is unreachable from {from}")]
    Unreachable { from: RegionId, to: RegionId },

    #[error("Unknown region {0}")]
    UnknownRegion(RegionId),

    #[error("Channel error: {0}")]
    Channel(String),
}

impl NavError {
    pub fn severity(&self) -> Severity {
        match self {
            NavError::InvalidGraph(_)
            | NavError::NoEmbeddingTable(_)
            | NavError::ModelLoadError(_)
            | NavError::Config(_) => Severity::Fatal,
            _ => Severity::Recoverable,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_id_orders_lexicographically() {
        let mut ids = vec![RegionId::from("r_10"), RegionId::from("r_02"), RegionId::from("r_01")];
        ids.sort();
        let names: Vec<&str> = ids.iter().map(RegionId::as_str).collect();
        assert_eq!(names, ["r_01", "r_02", "r_10"]);
    }

    #[test]
    fn region_id_serializes_as_plain_string() {
        let json = serde_json::to_string(&RegionId::from("r_03")).unwrap();
        assert_eq!(json, "\"r_03\"");
    }

    #[test]
    fn wrap_angle_stays_in_half_open_range() {
        assert!((wrap_angle(3.0 * PI) - PI).abs() < 1e-5);
        assert!((wrap_angle(-PI) - PI).abs() < 1e-5);
        assert!((wrap_angle(0.5) - 0.5).abs() < 1e-6);
        assert!((wrap_angle(-2.0 * PI + 0.25) - 0.25).abs() < 1e-5);
    }

    #[test]
    fn bearing_points_at_other_pose() {
        let a = Pose::new(0.0, 0.0, 0.0);
        let b = Pose::new(0.0, 2.0, 0.0);
        assert!((a.bearing_to(&b) - PI / 2.0).abs() < 1e-6);
        assert!((a.distance_to(&b) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn min_range_respects_sector_window() {
        let angles = [-1.0, 0.0, 1.0];
        let scan = RangeScan::from_ranges(&angles, &[Some(0.2), Some(3.0), None], 12.0);
        assert_eq!(scan.min_range_within(0.0, 0.1), Some(3.0));
        assert_eq!(scan.min_range_within(0.0, 1.5), Some(0.2));
        assert_eq!(scan.min_range_within(1.0, 0.1), None);
    }

    #[test]
    fn reciprocal_uses_max_range_for_missing_sectors() {
        let scan = RangeScan::from_ranges(&[0.0, 1.0], &[Some(0.9), None], 12.0);
        let recip = scan.reciprocal(0.1);
        assert!((recip[0] - 1.0).abs() < 1e-6);
        assert!((recip[1] - 1.0 / 12.1).abs() < 1e-6);
    }

    #[test]
    fn control_action_clamps_and_detects_zero() {
        let a = ControlAction::new(3.0, -7.0).clamped();
        assert_eq!(a, ControlAction::new(1.0, -1.0));
        assert!(ControlAction::zero().is_zero());
        assert!(!ControlAction::new(f32::NAN, 0.0).is_finite());
    }

    #[test]
    fn safety_modes_order_by_severity() {
        assert!(SafetyMode::Normal < SafetyMode::Slowed);
        assert!(SafetyMode::Slowed < SafetyMode::Stopped);
        assert!(SafetyMode::Stopped < SafetyMode::Fault);
    }

    #[test]
    fn loop_command_roundtrip() {
        let cmd = LoopCommand::Start { goal: "r_04".into() };
        let json = serde_json::to_string(&cmd).unwrap();
        let back: LoopCommand = serde_json::from_str(&json).unwrap();
        assert_eq!(cmd, back);
    }

    #[test]
    fn error_severity_classification() {
        assert!(NavError::InvalidGraph("dangling".into()).is_fatal());
        assert!(NavError::NoEmbeddingTable("missing".into()).is_fatal());
        assert!(NavError::ModelLoadError("bad weights".into()).is_fatal());
        assert!(!NavError::PolicyTimeout { budget_ms: 50 }.is_fatal());
        assert!(
            !NavError::SensorUnavailable {
                sensor: "lidar".into(),
                details: "serial closed".into()
            }
            .is_fatal()
        );
    }

    #[test]
    fn error_display_names_component() {
        let err = NavError::ActuatorFault {
            component: "esc".into(),
            details: "pwm write failed".into(),
        };
        assert!(err.to_string().contains("esc"));
    }

    #[test]
    fn stamped_age_saturates() {
        let now = Instant::now();
        let sample = Stamped::new(1u8, now);
        assert_eq!(sample.age(now), Duration::ZERO);
    }
}
