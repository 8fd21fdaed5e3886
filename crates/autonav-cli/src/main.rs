//! `autonav` – headless navigation runner
//!
//! ```text
//! autonav [--config PATH] [--goal REGION] [--sim]
//! ```
//!
//! 1. Loads `~/.autonav/config.toml` (or `--config`) plus `AUTONAV_*`
//!    overrides.
//! 2. Loads the region map and the driving policy; any failure here is
//!    fatal.
//! 3. Wires the simulated rig (`--sim`) or the robot's devices and runs the
//!    control loop until it is stopped, arrives, or is stuck in FAULT.
//! 4. Intercepts **Ctrl-C** to enqueue a graceful `stop`.
//!
//! Exit codes: `0` normal stop or arrival, `2` startup/config failure,
//! `3` unrecovered FAULT.

mod backend;
mod config;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use autonav_memory::RegionCache;
use autonav_middleware::StatusBus;
use autonav_perception::{Localizer, load_map};
use autonav_runtime::{ControlLoop, LoopExit, init_tracing, load_policy};
use autonav_types::{NavError, RegionId, StatusSnapshot};
use colored::Colorize;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::backend::{Backend, Pumps};
use crate::config::Config;

const EXIT_STARTUP_FAILURE: u8 = 2;
const EXIT_FAULT: u8 = 3;
const STATUS_LOG_INTERVAL: Duration = Duration::from_secs(1);
/// Grace period for blocking sensor reads once the loop has finished.
const RUNTIME_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

const USAGE: &str = "usage: autonav [--config PATH] [--goal REGION] [--sim]";

fn main() -> ExitCode {
    let args = match Args::parse(std::env::args().skip(1)) {
        Ok(Some(args)) => args,
        Ok(None) => {
            println!("{USAGE}");
            return ExitCode::SUCCESS;
        }
        Err(msg) => {
            eprintln!("{}: {msg}", "error".red().bold());
            eprintln!("{USAGE}");
            return ExitCode::from(EXIT_STARTUP_FAILURE);
        }
    };

    // ── Structured logging ────────────────────────────────────────────────
    let _tracing = init_tracing("autonav");

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to start tokio runtime");
            return ExitCode::from(EXIT_STARTUP_FAILURE);
        }
    };
    let code = runtime.block_on(run(args));
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_TIMEOUT);
    code
}

async fn run(args: Args) -> ExitCode {
    print_banner();

    let Session {
        mut control_loop,
        pumps,
    } = match resolve_config(&args).and_then(Session::start) {
        Ok(session) => session,
        Err(e) => {
            error!(error = %e, "startup failed");
            eprintln!("  {} {e}", "Startup failed:".red().bold());
            return ExitCode::from(EXIT_STARTUP_FAILURE);
        }
    };

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    let handle = control_loop.handle();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping …".yellow().bold());
        if let Err(e) = handle.stop() {
            warn!(error = %e, "stop command not delivered");
        }
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; Ctrl-C will terminate without a graceful stop");
    }

    let status_logger = spawn_status_logger(control_loop.status_bus());
    let exit = control_loop.run().await;
    status_logger.abort();
    pumps.shutdown().await;

    let last = control_loop.status_bus().latest();
    match exit {
        LoopExit::Stopped => {
            println!("  {} stopped after {} cycles", "✓".green().bold(), last.cycle);
            ExitCode::SUCCESS
        }
        LoopExit::Arrived => {
            let goal = last.goal.as_ref().map_or("-", RegionId::as_str);
            println!("  {} arrived at {}", "✓".green().bold(), goal.bold());
            ExitCode::SUCCESS
        }
        LoopExit::Faulted => {
            error!(reason = %last.safety.reason, "run ended in FAULT");
            eprintln!("  {} {}", "FAULT:".red().bold(), last.safety.reason);
            ExitCode::from(EXIT_FAULT)
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Startup
// ─────────────────────────────────────────────────────────────────────────────

/// File, then environment, then command line.
fn resolve_config(args: &Args) -> Result<Config, NavError> {
    let mut cfg = config::load(args.config.as_deref())?;
    if let Some(goal) = &args.goal {
        cfg.goal = Some(goal.clone());
    }
    cfg.sim |= args.sim;
    Ok(cfg)
}

struct Session {
    control_loop: ControlLoop,
    pumps: Pumps,
}

impl Session {
    /// Everything that must succeed before the first cycle.
    fn start(cfg: Config) -> Result<Self, NavError> {
        info!(map = %cfg.map.display(), model = %cfg.model, sim = cfg.sim, "configuration loaded");

        let map = load_map(&cfg.map)?;
        let graph = Arc::new(map.graph);
        if let Some(goal) = &cfg.goal
            && !graph.contains(goal)
        {
            return Err(NavError::Config(format!("goal region {goal} is not on the map")));
        }
        let localizer = Localizer::new(Arc::clone(&graph), map.table, cfg.localizer.clone())?;
        let policy = load_policy(&cfg.model)?;

        let backend = if cfg.sim {
            Backend::simulated(&map.file)?
        } else {
            Backend::hardware(&cfg.hardware, &cfg.pwm)?
        };
        let (sensors, motor, pumps) = backend.into_parts();

        let mut builder = ControlLoop::builder(graph, localizer, policy, sensors, motor)
            .with_config(cfg.control.clone())
            .with_safety(cfg.safety.clone())
            .with_freshness(cfg.watchdog.clone());
        if let Some(path) = &cfg.cache {
            let cache = RegionCache::open(path)?;
            builder = builder.with_cache(cache, cfg.map.display().to_string());
        }
        let control_loop = builder.build();

        if let Some(goal) = cfg.goal {
            println!("  Heading for {}", goal.as_str().bold());
            control_loop.handle().start(goal)?;
        } else {
            println!("  {}", "No goal configured; idling until a start command.".dimmed());
        }

        Ok(Self { control_loop, pumps })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Status logger
// ─────────────────────────────────────────────────────────────────────────────

fn spawn_status_logger(bus: &StatusBus) -> JoinHandle<()> {
    let mut status = bus.watch();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(STATUS_LOG_INTERVAL);
        loop {
            interval.tick().await;
            if status.has_changed().is_err() {
                break;
            }
            log_status(&status.borrow_and_update());
        }
    })
}

fn log_status(s: &StatusSnapshot) {
    info!(
        cycle = s.cycle,
        state = ?s.run_state,
        region = s.region.as_ref().map_or("-", RegionId::as_str),
        confidence = s.confidence,
        safety = ?s.safety.mode,
        throttle = s.last_action.linear_velocity,
        steering = s.last_action.angular_velocity,
        progress = s.plan_progress,
        plan_len = s.plan.len(),
        "status"
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// Arguments
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default, PartialEq)]
struct Args {
    config: Option<PathBuf>,
    goal: Option<RegionId>,
    sim: bool,
}

impl Args {
    /// `Ok(None)` when help was requested.
    fn parse(args: impl IntoIterator<Item = String>) -> Result<Option<Self>, String> {
        let mut parsed = Args::default();
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" => {
                    let path = args.next().ok_or("--config needs a path")?;
                    parsed.config = Some(PathBuf::from(path));
                }
                "--goal" => {
                    let goal = args.next().ok_or("--goal needs a region id")?;
                    parsed.goal = Some(RegionId::new(goal));
                }
                "--sim" => parsed.sim = true,
                "-h" | "--help" => return Ok(None),
                other => return Err(format!("unexpected argument `{other}`")),
            }
        }
        Ok(Some(parsed))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!(
        "  {} {}",
        "AutoNav".bold().cyan(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Region-graph navigation control core");
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Option<Args>, String> {
        Args::parse(args.iter().map(|s| s.to_string()))
    }

    #[test]
    fn no_arguments_uses_defaults() {
        assert_eq!(parse(&[]).unwrap(), Some(Args::default()));
    }

    #[test]
    fn all_flags_are_recognised() {
        let args = parse(&["--sim", "--goal", "r_04", "--config", "/etc/autonav.toml"])
            .unwrap()
            .unwrap();
        assert!(args.sim);
        assert_eq!(args.goal, Some(RegionId::from("r_04")));
        assert_eq!(args.config, Some(PathBuf::from("/etc/autonav.toml")));
    }

    #[test]
    fn help_short_circuits() {
        assert_eq!(parse(&["--sim", "--help", "--bogus"]).unwrap(), None);
    }

    #[test]
    fn missing_values_and_unknown_flags_are_rejected() {
        assert!(parse(&["--goal"]).is_err());
        assert!(parse(&["--config"]).is_err());
        assert!(parse(&["--fast"]).unwrap_err().contains("--fast"));
    }

    #[test]
    fn command_line_overrides_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "goal = \"r_01\"\n").unwrap();
        let args = Args {
            config: Some(path),
            goal: Some("r_02".into()),
            sim: true,
        };
        let cfg = resolve_config(&args).unwrap();
        assert_eq!(cfg.goal, Some(RegionId::from("r_02")));
        assert!(cfg.sim);
    }

    #[tokio::test]
    async fn startup_fails_on_missing_map() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config {
            map: dir.path().join("absent.json"),
            sim: true,
            ..Config::default()
        };
        let err = Session::start(cfg).err().unwrap();
        assert!(matches!(err, NavError::NoEmbeddingTable(_)));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn startup_checks_goal_and_seeds_from_start() {
        let dir = tempfile::tempdir().unwrap();
        let map = dir.path().join("map.json");
        std::fs::write(
            &map,
            r#"{ "start": "a", "regions": {
                "a": { "anchor": {"x": 0.0, "y": 0.0}, "neighbors": ["b"], "embeddings": [[1.0, 0.0]] },
                "b": { "anchor": {"x": 2.0, "y": 0.0}, "embeddings": [[0.0, 1.0]] } } }"#,
        )
        .unwrap();
        let cfg = Config {
            map,
            sim: true,
            ..Config::default()
        };

        let off_map = Config {
            goal: Some("z".into()),
            ..cfg.clone()
        };
        assert!(matches!(Session::start(off_map).err().unwrap(), NavError::Config(_)));

        let bad_model = Config {
            model: dir.path().join("missing.json").display().to_string(),
            ..cfg.clone()
        };
        assert!(matches!(Session::start(bad_model).err().unwrap(), NavError::ModelLoadError(_)));

        let session = Session::start(Config {
            goal: Some("b".into()),
            ..cfg
        })
        .unwrap();
        assert_eq!(session.control_loop.estimate().region.as_str(), "a");
    }
}
