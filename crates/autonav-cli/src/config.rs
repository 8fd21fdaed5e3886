//! Run configuration – reads `~/.autonav/config.toml` (or `--config PATH`).
//!
//! Every field has a default, so an empty or absent file is a valid
//! configuration.  Library sections map one-to-one onto the config structs
//! of the crates they tune:
//!
//! ```toml
//! map = "/srv/autonav/floor2.json"
//! model = "heuristic"          # or a path to a JSON model file
//! goal = "r_12"
//! cache = "/var/lib/autonav/regions.db"
//!
//! [localizer]
//! low_confidence = 0.35
//!
//! [safety]
//! hard_stop_distance_m = 0.35
//!
//! [watchdog]
//! scan_stale_ms = 250
//!
//! [control]
//! cycle_hz = 10.0
//!
//! [pwm]
//! throttle_max_us = 1600
//!
//! [hardware]
//! lidar_device = "/dev/ttyAMA0"
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use autonav_hal::pwm::PwmMapping;
use autonav_kernel::{FreshnessConfig, SafetyConfig};
use autonav_perception::LocalizerConfig;
use autonav_runtime::ControlLoopConfig;
use autonav_types::{NavError, RegionId};
use serde::{Deserialize, Serialize};

/// Devices used when running on the robot rather than in simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HardwareConfig {
    /// LD19 serial device, already configured for 230400 baud.
    pub lidar_device: PathBuf,
    /// LiDAR mounting offset added to every reported angle.  The LD19 sits
    /// rotated a quarter turn on the reference chassis.
    pub lidar_offset_deg: f32,
    /// sysfs PWM chip carrying the ESC and steering servo channels.
    pub pwm_chip: PathBuf,
    pub throttle_channel: u32,
    pub steering_channel: u32,
    /// Settle time after each step of the ESC arming sequence.
    pub arm_settle_ms: u64,
    /// FIFO of JSON `Orientation` lines from the IMU fusion process.
    pub imu_feed: PathBuf,
    /// FIFO of JSON embedding arrays from the place-recognition process.
    pub camera_feed: PathBuf,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            lidar_device: PathBuf::from("/dev/ttyAMA0"),
            lidar_offset_deg: -90.0,
            pwm_chip: PathBuf::from("/sys/class/pwm/pwmchip0"),
            throttle_channel: 0,
            steering_channel: 1,
            arm_settle_ms: 1000,
            imu_feed: PathBuf::from("/run/autonav/imu.jsonl"),
            camera_feed: PathBuf::from("/run/autonav/embeddings.jsonl"),
        }
    }
}

/// Persisted run configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Region map document (graph, anchors, reference embeddings).
    pub map: PathBuf,
    /// `"heuristic"` or a path to a JSON model file.
    pub model: String,
    /// Region to drive to on startup.  Without one the loop idles until a
    /// `start` command arrives.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub goal: Option<RegionId>,
    /// SQLite last-known-region cache.  Disabled when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<PathBuf>,
    /// Drive the simulated rig instead of hardware.
    pub sim: bool,
    pub localizer: LocalizerConfig,
    pub safety: SafetyConfig,
    pub watchdog: FreshnessConfig,
    pub control: ControlLoopConfig,
    pub pwm: PwmMapping,
    pub hardware: HardwareConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            map: PathBuf::from("map.json"),
            model: "heuristic".to_string(),
            goal: None,
            cache: None,
            sim: false,
            localizer: LocalizerConfig::default(),
            safety: SafetyConfig::default(),
            watchdog: FreshnessConfig::default(),
            control: ControlLoopConfig::default(),
            pwm: PwmMapping::default(),
            hardware: HardwareConfig::default(),
        }
    }
}

/// Return the path to `~/.autonav/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".autonav").join("config.toml")
}

/// Load the effective configuration.
///
/// An explicit `path` must exist; the default location may be absent, in
/// which case defaults are used.  `AUTONAV_*` overrides are applied last.
pub fn load(path: Option<&Path>) -> Result<Config, NavError> {
    let mut cfg = match path {
        Some(p) => read_file(p)?.ok_or_else(|| {
            NavError::Config(format!("config file {} does not exist", p.display()))
        })?,
        None => read_file(&config_path())?.unwrap_or_default(),
    };
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

/// Parse a config file.  Returns `None` if the file does not exist.
pub(crate) fn read_file(path: &Path) -> Result<Option<Config>, NavError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| NavError::Config(format!("failed to read {}: {e}", path.display())))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| NavError::Config(format!("failed to parse {}: {e}", path.display())))?;
    Ok(Some(cfg))
}

/// Apply `AUTONAV_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `AUTONAV_MAP` | `map` |
/// | `AUTONAV_MODEL` | `model` |
/// | `AUTONAV_GOAL` | `goal` |
/// | `AUTONAV_CYCLE_HZ` | `control.cycle_hz` |
/// | `AUTONAV_CACHE` | `cache` |
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("AUTONAV_MAP") {
        cfg.map = PathBuf::from(v);
    }
    if let Ok(v) = std::env::var("AUTONAV_MODEL") {
        cfg.model = v;
    }
    if let Ok(v) = std::env::var("AUTONAV_GOAL")
        && !v.trim().is_empty()
    {
        cfg.goal = Some(RegionId::new(v.trim()));
    }
    if let Ok(v) = std::env::var("AUTONAV_CYCLE_HZ")
        && let Ok(hz) = v.parse::<f32>()
        && hz.is_finite()
        && hz > 0.0
    {
        cfg.control.cycle_hz = hz;
    }
    if let Ok(v) = std::env::var("AUTONAV_CACHE") {
        cfg.cache = Some(PathBuf::from(v));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_path_points_to_autonav_dir() {
        let p = config_path_for_home("/home/operator");
        assert_eq!(p, PathBuf::from("/home/operator/.autonav/config.toml"));
    }

    #[test]
    fn read_file_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let result = read_file(&dir.path().join("config.toml")).expect("no error");
        assert!(result.is_none());
    }

    #[test]
    fn explicit_missing_path_is_a_config_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let err = load(Some(&dir.path().join("absent.toml"))).unwrap_err();
        assert!(matches!(err, NavError::Config(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn empty_file_yields_documented_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "").unwrap();

        let cfg = read_file(&path).unwrap().unwrap();
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.model, "heuristic");
        assert_eq!(cfg.control.cycle_hz, 10.0);
        assert_eq!(cfg.control.policy_budget_ms, 50);
        assert_eq!(cfg.localizer.low_confidence, 0.35);
        assert_eq!(cfg.watchdog.scan_stale_ms, 250);
        assert_eq!(cfg.safety.policy_timeouts_to_fault, 5);
    }

    #[test]
    fn sections_override_only_what_they_name() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
                map = "/srv/maps/lab.json"
                goal = "r_07"
                sim = true

                [control]
                cycle_hz = 20.0

                [pwm]
                throttle_max_us = 1580
            "#,
        )
        .unwrap();

        let cfg = read_file(&path).unwrap().unwrap();
        assert_eq!(cfg.map, PathBuf::from("/srv/maps/lab.json"));
        assert_eq!(cfg.goal, Some(RegionId::from("r_07")));
        assert!(cfg.sim);
        assert_eq!(cfg.control.cycle_hz, 20.0);
        assert_eq!(cfg.control.policy_budget_ms, 50);
        assert_eq!(cfg.pwm.throttle_max_us, 1580);
        assert_eq!(cfg.pwm.throttle_neutral_us, 1500);
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[control\ncycle_hz = ").unwrap();
        assert!(matches!(read_file(&path), Err(NavError::Config(_))));
    }

    #[test]
    fn written_config_reads_back() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");

        let mut cfg = Config::default();
        cfg.goal = Some("r_03".into());
        cfg.cache = Some(PathBuf::from("/tmp/regions.db"));
        std::fs::write(&path, toml::to_string_pretty(&cfg).unwrap()).unwrap();

        assert_eq!(read_file(&path).unwrap(), Some(cfg));
    }

    #[test]
    fn apply_env_overrides_changes_map() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe { std::env::set_var("AUTONAV_MAP", "/srv/maps/office.json") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.map, PathBuf::from("/srv/maps/office.json"));
        unsafe { std::env::remove_var("AUTONAV_MAP") };
    }

    #[test]
    fn apply_env_overrides_changes_model() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe { std::env::set_var("AUTONAV_MODEL", "/srv/models/driver.json") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.model, "/srv/models/driver.json");
        unsafe { std::env::remove_var("AUTONAV_MODEL") };
    }

    #[test]
    fn apply_env_overrides_changes_goal() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe { std::env::set_var("AUTONAV_GOAL", " r_09 ") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.goal, Some(RegionId::from("r_09")));
        unsafe { std::env::remove_var("AUTONAV_GOAL") };
    }

    #[test]
    fn apply_env_overrides_changes_cycle_rate() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe { std::env::set_var("AUTONAV_CYCLE_HZ", "15") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.control.cycle_hz, 15.0);

        unsafe { std::env::set_var("AUTONAV_CYCLE_HZ", "fast") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.control.cycle_hz, 10.0);

        unsafe { std::env::set_var("AUTONAV_CYCLE_HZ", "-4") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.control.cycle_hz, 10.0);
        unsafe { std::env::remove_var("AUTONAV_CYCLE_HZ") };
    }

    #[test]
    fn apply_env_overrides_enables_cache() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe { std::env::set_var("AUTONAV_CACHE", "/var/lib/autonav/regions.db") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.cache, Some(PathBuf::from("/var/lib/autonav/regions.db")));
        unsafe { std::env::remove_var("AUTONAV_CACHE") };
    }
}
