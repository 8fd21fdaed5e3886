//! Sensor and actuator wiring for a run: the simulated rig or the robot's
//! devices.

use std::fs::{File, OpenOptions};
use std::path::Path;
use std::time::Duration;

use autonav_hal::MotorDriver;
use autonav_hal::feed::JsonLinesSource;
use autonav_hal::lidar::{Ld19Source, SectorBucketer, ld19_default_targets_deg};
use autonav_hal::pwm::{PwmMapping, PwmMotor, SysfsPwm};
use autonav_hal::sim::SimRig;
use autonav_hal::slot::{LatestSlot, SensorPump, SlotSensor};
use autonav_perception::MapFile;
use autonav_runtime::SensorSet;
use autonav_types::{Embedding, NavError, Orientation, RangeScan};
use tracing::{debug, info};

use crate::config::HardwareConfig;

/// ± window around each LiDAR sector centre.
const LIDAR_SECTOR_RESOLUTION_DEG: f32 = 2.5;
const LIDAR_MAX_RANGE_M: f32 = 12.0;
/// Pause between polls of a sensor source.
const PUMP_PERIOD: Duration = Duration::from_millis(1);
/// How long shutdown waits for a pump stuck in a blocking read.
const PUMP_SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// Everything the control loop drives, plus what must outlive it.
pub struct Backend {
    pub sensors: SensorSet,
    pub motor: Box<dyn MotorDriver>,
    pumps: Vec<SensorPump>,
}

impl Backend {
    /// Build a simulated rig from the map: the platform starts on the start
    /// region's anchor and each region's first reference view is what the
    /// camera sees near its anchor.
    pub fn simulated(map: &MapFile) -> Result<Self, NavError> {
        let start = map
            .regions
            .get(&map.start)
            .ok_or_else(|| NavError::InvalidGraph(format!("start region {} not in map", map.start)))?;
        let rig = map
            .regions
            .values()
            .filter_map(|spec| spec.embeddings.first().map(|e| (spec.anchor, e.clone())))
            .fold(SimRig::builder().with_start(start.anchor), |b, (anchor, embedding)| {
                b.with_anchor(anchor, embedding)
            })
            .build();
        info!(regions = map.regions.len(), start = %map.start, "simulated rig ready");

        Ok(Self {
            sensors: SensorSet {
                range: Box::new(rig.range_sensor()),
                imu: Box::new(rig.imu()),
                camera: Box::new(rig.embedding_sensor()),
            },
            motor: Box::new(rig.motor()),
            pumps: Vec::new(),
        })
    }

    /// Open the LD19, the IMU and camera feeds, and arm the ESC.
    ///
    /// Must be called from within a tokio runtime; the sensor pumps run on
    /// its blocking pool.
    pub fn hardware(hw: &HardwareConfig, pwm: &PwmMapping) -> Result<Self, NavError> {
        let lidar = File::open(&hw.lidar_device).map_err(|e| device_error("lidar", &hw.lidar_device, e))?;
        let imu = open_feed(&hw.imu_feed).map_err(|e| device_error("imu", &hw.imu_feed, e))?;
        let camera = open_feed(&hw.camera_feed).map_err(|e| device_error("camera", &hw.camera_feed, e))?;

        let mut motor = PwmMotor::new(
            "drive",
            SysfsPwm::new(&hw.pwm_chip, hw.throttle_channel, hw.steering_channel),
            pwm.clone(),
        );
        motor.arm(Duration::from_millis(hw.arm_settle_ms))?;

        let scans: LatestSlot<RangeScan> = LatestSlot::new();
        let orientations: LatestSlot<Orientation> = LatestSlot::new();
        let embeddings: LatestSlot<Embedding> = LatestSlot::new();

        let bucketer = SectorBucketer::new(
            &ld19_default_targets_deg(),
            LIDAR_SECTOR_RESOLUTION_DEG,
            hw.lidar_offset_deg,
            LIDAR_MAX_RANGE_M,
        );
        let pumps = vec![
            SensorPump::spawn(Ld19Source::new("lidar", lidar, bucketer), scans.clone(), PUMP_PERIOD),
            SensorPump::spawn(JsonLinesSource::new("imu", imu), orientations.clone(), PUMP_PERIOD),
            SensorPump::spawn(JsonLinesSource::new("camera", camera), embeddings.clone(), PUMP_PERIOD),
        ];
        info!(
            lidar = %hw.lidar_device.display(),
            pwm_chip = %hw.pwm_chip.display(),
            "hardware back-end ready"
        );

        Ok(Self {
            sensors: SensorSet {
                range: Box::new(SlotSensor::new("lidar", scans)),
                imu: Box::new(SlotSensor::new("imu", orientations)),
                camera: Box::new(SlotSensor::new("camera", embeddings)),
            },
            motor: Box::new(motor),
            pumps,
        })
    }

    /// Split into the parts handed to the control loop and the pumps that
    /// keep feeding it.
    pub fn into_parts(self) -> (SensorSet, Box<dyn MotorDriver>, Pumps) {
        (self.sensors, self.motor, Pumps(self.pumps))
    }
}

/// Background sensor pumps of a hardware run.
pub struct Pumps(Vec<SensorPump>);

impl Pumps {
    /// Stop every pump.  A pump blocked in a device read is left to the
    /// runtime's shutdown.
    pub async fn shutdown(self) {
        for pump in self.0 {
            let id = pump.id().to_string();
            if tokio::time::timeout(PUMP_SHUTDOWN_GRACE, pump.shutdown()).await.is_err() {
                debug!(sensor = %id, "sensor pump still blocked in read");
            }
        }
    }
}

/// Open a feed read-write so a FIFO neither blocks at open nor reports EOF
/// while its writer restarts.
fn open_feed(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().read(true).write(true).open(path)
}

fn device_error(sensor: &str, path: &Path, e: std::io::Error) -> NavError {
    NavError::Config(format!("{sensor} device {}: {e}", path.display()))
}

#[cfg(test)]
mod tests {
    use autonav_hal::SensorDriver;
    use autonav_types::ControlAction;

    use super::*;

    const CORRIDOR: &str = r#"{
        "start": "b",
        "regions": {
            "a": { "anchor": {"x": 0.0, "y": 0.0}, "neighbors": ["b"], "embeddings": [[1.0, 0.0]] },
            "b": { "anchor": {"x": 2.0, "y": 0.0}, "neighbors": ["c"], "embeddings": [[0.0, 1.0], [0.2, 0.8]] },
            "c": { "anchor": {"x": 4.0, "y": 0.0}, "embeddings": [[0.7, 0.7]] }
        }
    }"#;

    #[test]
    fn simulated_rig_starts_on_start_anchor() {
        let map = MapFile::from_json(CORRIDOR).unwrap();
        let mut backend = Backend::simulated(&map).unwrap();

        // Standing on b's anchor, the camera reports b's first view.
        let view = backend.sensors.camera.read_latest().unwrap().value;
        assert_eq!(view, vec![0.0, 1.0]);
        assert!(backend.sensors.range.read_latest().is_ok());
        assert!(backend.motor.set_motor(ControlAction::new(0.5, 0.0)).is_ok());
    }

    #[test]
    fn simulated_rig_needs_start_region() {
        let mut map = MapFile::from_json(CORRIDOR).unwrap();
        map.start = "z".into();
        assert!(matches!(Backend::simulated(&map), Err(NavError::InvalidGraph(_))));
    }

    #[test]
    fn missing_lidar_device_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let hw = HardwareConfig {
            lidar_device: dir.path().join("ttyAMA9"),
            ..HardwareConfig::default()
        };
        let err = Backend::hardware(&hw, &PwmMapping::default()).err().unwrap();
        assert!(matches!(err, NavError::Config(ref msg) if msg.contains("lidar")));
    }

    #[tokio::test]
    async fn hardware_back_end_arms_esc_and_reads_feeds() {
        let dir = tempfile::tempdir().unwrap();
        let chip = dir.path().join("pwmchip0");
        std::fs::create_dir_all(chip.join("pwm0")).unwrap();
        std::fs::create_dir_all(chip.join("pwm1")).unwrap();
        let lidar = dir.path().join("lidar");
        let imu = dir.path().join("imu.jsonl");
        let camera = dir.path().join("embeddings.jsonl");
        std::fs::write(&lidar, b"").unwrap();
        std::fs::write(&imu, "{\"yaw_rad\": 0.25, \"gyro_z\": 0.0, \"accel_x\": 0.0}\n").unwrap();
        std::fs::write(&camera, "[0.0, 1.0]\n").unwrap();

        let hw = HardwareConfig {
            lidar_device: lidar,
            pwm_chip: chip.clone(),
            arm_settle_ms: 0,
            imu_feed: imu,
            camera_feed: camera,
            ..HardwareConfig::default()
        };
        let backend = Backend::hardware(&hw, &PwmMapping::default()).unwrap();
        // Armed: the throttle channel was left at neutral.
        let duty = std::fs::read_to_string(chip.join("pwm0").join("duty_cycle")).unwrap();
        assert_eq!(duty, "1500000");

        let (sensors, _motor, pumps) = backend.into_parts();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(sensors.imu.read_latest().unwrap().value.yaw_rad, 0.25);
        assert_eq!(sensors.camera.read_latest().unwrap().value, vec![0.0, 1.0]);
        // An empty LiDAR stream never produces a scan.
        assert!(sensors.range.read_latest().is_err());
        pumps.shutdown().await;
    }
}
