//! [`ControlLoop`] – the fixed-cadence navigation cycle.
//!
//! Each call to [`ControlLoop::tick`] runs one complete cycle, in order:
//!
//! 1. **Commands** – drain the operator queue (`start`, `pause`, `resume`,
//!    `stop`).  Commands only ever take effect here, at a cycle boundary.
//! 2. **Sense** – read the latest range scan, IMU sample and camera
//!    embedding from their last-value-wins drivers and stamp them into the
//!    [`FreshnessWatchdog`].
//! 3. **Localize** – a new, fresh embedding goes through the [`Localizer`];
//!    a stale or missing one coasts the prior estimate.
//! 4. **Navigate** – the [`Navigator`] advances or replans and yields this
//!    cycle's [`Guidance`].  Reaching the goal with enough confidence brakes
//!    and ends the mission.
//! 5. **Decide** – while running, an [`Observation`] is handed to the
//!    [`PolicyAdapter`].  Timeouts and failures become a zero action.
//! 6. **Arbitrate** – the [`Supervisor`] runs every cycle, whatever the run
//!    state, and its [`SafeAction`][autonav_kernel::SafeAction] is the only
//!    thing that reaches the motor.
//! 7. **Act** – write the action (zero unless running).
//! 8. **Publish** – one [`StatusSnapshot`] on the [`StatusBus`].
//! 9. **Remember** – cache the region when a locked fix changes it.
//!
//! Per-cycle failures never escape `tick`; they are counted, logged and fed
//! to the supervisor, which escalates sustained trouble to `FAULT`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use autonav_hal::{MotorDriver, SensorDriver};
use autonav_kernel::{CycleSignals, Freshness, FreshnessConfig, FreshnessWatchdog, SafetyConfig, Supervisor};
use autonav_memory::RegionCache;
use autonav_middleware::{CommandQueue, LoopHandle, StatusBus, command_channel};
use autonav_perception::{Localizer, RegionGraph};
use autonav_types::{
    ControlAction, Embedding, LoopCommand, Orientation, PoseEstimate, RangeScan, RawAction, RegionId,
    RunState, SafetyMode, Stamped, StatusSnapshot, wrap_angle,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::navigator::{Guidance, Navigator};
use crate::policy::{Observation, Policy, PolicyAdapter};

/// Commands buffered between cycles.
const COMMAND_QUEUE_CAPACITY: usize = 32;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlLoopConfig {
    /// Target cycle rate.
    pub cycle_hz: f32,
    /// Inference budget per cycle.
    pub policy_budget_ms: u64,
    /// Confidence at which being in the goal region counts as arrival.
    pub arrival_confidence: f32,
    /// [`ControlLoop::run`] gives up once FAULT has lasted this long
    /// without a reset.
    pub fault_exit_after_ms: u64,
    /// Return from [`ControlLoop::run`] on arrival instead of idling.
    pub exit_on_arrival: bool,
    /// Cached fixes kept per map.
    pub cache_keep: usize,
}

impl Default for ControlLoopConfig {
    fn default() -> Self {
        Self {
            cycle_hz: 10.0,
            policy_budget_ms: 50,
            arrival_confidence: 0.75,
            fault_exit_after_ms: 5_000,
            exit_on_arrival: true,
            cache_keep: 64,
        }
    }
}

impl ControlLoopConfig {
    pub fn period(&self) -> Duration {
        Duration::from_secs_f32(1.0 / self.cycle_hz.clamp(0.5, 200.0))
    }
}

/// Why [`ControlLoop::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoopExit {
    Stopped,
    Arrived,
    Faulted,
}

/// The three sensor drivers the loop reads every cycle.
pub struct SensorSet {
    pub range: Box<dyn SensorDriver<RangeScan>>,
    pub imu: Box<dyn SensorDriver<Orientation>>,
    pub camera: Box<dyn SensorDriver<Embedding>>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Builder
// ─────────────────────────────────────────────────────────────────────────────

pub struct ControlLoopBuilder {
    graph: Arc<RegionGraph>,
    localizer: Localizer,
    policy: Box<dyn Policy>,
    sensors: SensorSet,
    motor: Box<dyn MotorDriver>,
    config: ControlLoopConfig,
    safety: SafetyConfig,
    freshness: FreshnessConfig,
    bus: StatusBus,
    cache: Option<(RegionCache, String)>,
}

impl ControlLoopBuilder {
    pub fn with_config(mut self, config: ControlLoopConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_safety(mut self, safety: SafetyConfig) -> Self {
        self.safety = safety;
        self
    }

    pub fn with_freshness(mut self, freshness: FreshnessConfig) -> Self {
        self.freshness = freshness;
        self
    }

    pub fn with_status_bus(mut self, bus: StatusBus) -> Self {
        self.bus = bus;
        self
    }

    /// Persist region changes under `map_key` and seed the first estimate
    /// from the last one stored.
    pub fn with_cache(mut self, cache: RegionCache, map_key: impl Into<String>) -> Self {
        self.cache = Some((cache, map_key.into()));
        self
    }

    pub fn build(self) -> ControlLoop {
        let now = Instant::now();
        let hard = Duration::from_millis(self.freshness.hard_timeout_ms);
        let mut watchdog = FreshnessWatchdog::new();
        watchdog.register_at(
            self.sensors.range.id(),
            Duration::from_millis(self.freshness.scan_stale_ms),
            hard,
            now,
        );
        watchdog.register_at(
            self.sensors.imu.id(),
            Duration::from_millis(self.freshness.imu_stale_ms),
            hard,
            now,
        );
        watchdog.register_at(
            self.sensors.camera.id(),
            Duration::from_millis(self.freshness.embedding_stale_ms),
            hard,
            now,
        );

        let seed = self.seed_region();
        let (handle, commands) = command_channel(COMMAND_QUEUE_CAPACITY);
        let budget = Duration::from_millis(self.config.policy_budget_ms);

        ControlLoop {
            navigator: Navigator::new(Arc::clone(&self.graph)),
            graph: self.graph,
            localizer: self.localizer,
            policy: PolicyAdapter::new(self.policy, budget),
            supervisor: Supervisor::new(self.safety),
            watchdog,
            sensors: self.sensors,
            motor: self.motor,
            bus: self.bus,
            handle,
            commands,
            cache: self.cache,
            config: self.config,
            run_state: RunState::Idle,
            goal: None,
            mission_id: None,
            estimate: PoseEstimate::seeded(seed),
            last_embedding_at: None,
            guidance: Guidance::Idle,
            last_action: ControlAction::zero(),
            cycle: 0,
            actuator_faults: 0,
            fault_since: None,
            motor_released: false,
        }
    }

    fn seed_region(&self) -> RegionId {
        let start = self.graph.start().clone();
        let Some((cache, key)) = &self.cache else {
            return start;
        };
        match cache.last_known(key) {
            Ok(Some(fix)) if self.graph.contains(&fix.region) => {
                info!(region = %fix.region, recorded_at = %fix.recorded_at, "seeding from cached region");
                fix.region
            }
            Ok(Some(fix)) => {
                warn!(region = %fix.region, "cached region is not on this map, seeding from start");
                start
            }
            Ok(None) => start,
            Err(e) => {
                warn!(error = %e, "region cache unreadable, seeding from start");
                start
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ControlLoop
// ─────────────────────────────────────────────────────────────────────────────

pub struct ControlLoop {
    config: ControlLoopConfig,
    graph: Arc<RegionGraph>,
    localizer: Localizer,
    navigator: Navigator,
    policy: PolicyAdapter,
    supervisor: Supervisor,
    watchdog: FreshnessWatchdog,
    sensors: SensorSet,
    motor: Box<dyn MotorDriver>,
    bus: StatusBus,
    handle: LoopHandle,
    commands: CommandQueue,
    cache: Option<(RegionCache, String)>,
    // ── Mission state ────────────────────────────────────────────────────────
    run_state: RunState,
    goal: Option<RegionId>,
    mission_id: Option<Uuid>,
    // ── Per-cycle carry-over ─────────────────────────────────────────────────
    estimate: PoseEstimate,
    last_embedding_at: Option<Instant>,
    guidance: Guidance,
    last_action: ControlAction,
    cycle: u64,
    actuator_faults: u32,
    fault_since: Option<Instant>,
    motor_released: bool,
}

impl ControlLoop {
    pub fn builder(
        graph: Arc<RegionGraph>,
        localizer: Localizer,
        policy: Box<dyn Policy>,
        sensors: SensorSet,
        motor: Box<dyn MotorDriver>,
    ) -> ControlLoopBuilder {
        ControlLoopBuilder {
            graph,
            localizer,
            policy,
            sensors,
            motor,
            config: ControlLoopConfig::default(),
            safety: SafetyConfig::default(),
            freshness: FreshnessConfig::default(),
            bus: StatusBus::default(),
            cache: None,
        }
    }

    /// A handle for enqueueing commands from other tasks.
    pub fn handle(&self) -> LoopHandle {
        self.handle.clone()
    }

    pub fn status_bus(&self) -> &StatusBus {
        &self.bus
    }

    pub fn config(&self) -> &ControlLoopConfig {
        &self.config
    }

    pub fn run_state(&self) -> RunState {
        self.run_state
    }

    pub fn estimate(&self) -> &PoseEstimate {
        &self.estimate
    }

    pub fn guidance(&self) -> &Guidance {
        &self.guidance
    }

    pub fn navigator(&self) -> &Navigator {
        &self.navigator
    }

    pub fn safety_mode(&self) -> SafetyMode {
        self.supervisor.mode()
    }

    pub fn policy_timeouts(&self) -> u64 {
        self.policy.total_timeouts()
    }

    // ── Commands ─────────────────────────────────────────────────────────────

    pub fn start(&mut self, goal: RegionId) {
        self.apply(LoopCommand::Start { goal });
    }

    pub fn pause(&mut self) {
        self.apply(LoopCommand::Pause);
    }

    pub fn resume(&mut self) {
        self.apply(LoopCommand::Resume);
    }

    /// Zero the motor and release it.  Idempotent.
    pub fn stop(&mut self) {
        self.apply(LoopCommand::Stop);
    }

    fn apply(&mut self, command: LoopCommand) {
        if self.run_state == RunState::Stopped {
            warn!(?command, "loop stopped, command ignored");
            return;
        }
        match command {
            LoopCommand::Start { goal } => {
                if !self.graph.contains(&goal) {
                    warn!(goal = %goal, "start rejected: goal is not on the map");
                    return;
                }
                let mission = Uuid::new_v4();
                info!(%mission, goal = %goal, from = %self.estimate.region, "mission started");
                self.navigator.clear();
                self.goal = Some(goal);
                self.mission_id = Some(mission);
                self.run_state = RunState::Running;
            }
            LoopCommand::Pause => {
                if self.run_state == RunState::Running {
                    info!("mission paused");
                    self.run_state = RunState::Paused;
                }
            }
            LoopCommand::Resume => {
                self.supervisor.reset();
                self.policy.reset_streak();
                self.actuator_faults = 0;
                self.fault_since = None;
                if self.run_state == RunState::Paused {
                    info!("mission resumed");
                    self.run_state = RunState::Running;
                }
            }
            LoopCommand::Stop => {
                info!(cycle = self.cycle, "loop stopping");
                self.run_state = RunState::Stopped;
                self.navigator.clear();
                self.release_motor();
            }
        }
    }

    fn release_motor(&mut self) {
        if self.motor_released {
            return;
        }
        if let Err(e) = self.motor.set_motor(ControlAction::zero()) {
            warn!(error = %e, "zeroing motor on stop failed");
        }
        if let Err(e) = self.motor.release() {
            error!(error = %e, "motor release failed");
        }
        self.last_action = ControlAction::zero();
        self.motor_released = true;
    }

    // ── Cycle ────────────────────────────────────────────────────────────────

    /// Run one cycle against the wall clock.
    pub async fn tick(&mut self) -> StatusSnapshot {
        self.tick_at(Instant::now()).await
    }

    /// Run one cycle, judging sample freshness against `now`.
    #[instrument(level = "debug", skip_all, fields(cycle = self.cycle + 1))]
    pub async fn tick_at(&mut self, now: Instant) -> StatusSnapshot {
        self.cycle += 1;

        for command in self.commands.drain() {
            self.apply(command);
        }
        if self.run_state == RunState::Stopped {
            return self.publish();
        }

        // Sense.
        let scan = read_sensor(self.sensors.range.as_ref(), &mut self.watchdog);
        let imu = read_sensor(self.sensors.imu.as_ref(), &mut self.watchdog);
        let embedding = read_sensor(self.sensors.camera.as_ref(), &mut self.watchdog);

        // Localize.
        self.localize(embedding, now);

        // Navigate.
        self.navigate();

        // Decide.
        let orientation = imu.map(|s| s.value).unwrap_or_default();
        let raw = match (&scan, self.run_state) {
            (Some(scan), RunState::Running) if matches!(self.guidance, Guidance::Navigating { .. }) => {
                self.decide(scan.value.clone(), orientation).await
            }
            _ => RawAction::default(),
        };

        // Arbitrate.
        let signals = CycleSignals {
            scan_freshness: match &scan {
                Some(sample) => self.watchdog.classify(self.sensors.range.id(), sample.at, now),
                None => Freshness::Stale,
            },
            dead_sensor: self.watchdog.first_dead(now),
            localization_confidence: self.estimate.confidence,
            consecutive_policy_timeouts: self.policy.consecutive_timeouts(),
            consecutive_actuator_faults: self.actuator_faults,
        };
        let safe = self
            .supervisor
            .arbitrate(raw, scan.as_ref().map(|s| &s.value), &signals);
        self.track_fault(now);

        // Act.
        match self.run_state {
            RunState::Running => self.actuate(safe.action()),
            RunState::Idle | RunState::Paused => self.actuate(ControlAction::zero()),
            RunState::Arrived | RunState::Stopped => {}
        }

        let snapshot = self.publish();
        self.remember();
        snapshot
    }

    fn localize(&mut self, embedding: Option<Stamped<Embedding>>, now: Instant) {
        let camera = self.sensors.camera.id();
        let usable = embedding.filter(|s| self.watchdog.classify(camera, s.at, now) == Freshness::Fresh);
        match usable {
            Some(sample) if self.last_embedding_at.is_none_or(|t| sample.at > t) => {
                self.last_embedding_at = Some(sample.at);
                self.estimate = self.localizer.localize(&sample.value, Some(&self.estimate));
            }
            // Same frame as last cycle: keep the estimate as is.
            Some(_) => {}
            None => {
                self.estimate = self.localizer.coast(&self.estimate);
            }
        }
    }

    fn navigate(&mut self) {
        let Some(goal) = self.goal.clone() else {
            self.guidance = Guidance::Idle;
            return;
        };
        if !matches!(self.run_state, RunState::Running | RunState::Paused) {
            self.guidance = Guidance::Idle;
            return;
        }
        self.guidance = match self.navigator.update(&self.estimate.region, &goal) {
            Ok(guidance) => guidance,
            Err(e) => {
                warn!(error = %e, region = %self.estimate.region, goal = %goal, "navigation failed");
                Guidance::Idle
            }
        };

        if self.run_state == RunState::Running
            && self.estimate.region == goal
            && self.estimate.confidence >= self.config.arrival_confidence
        {
            info!(
                goal = %goal,
                confidence = self.estimate.confidence,
                cycle = self.cycle,
                "goal reached"
            );
            self.run_state = RunState::Arrived;
            if let Err(e) = self.motor.hard_brake() {
                warn!(error = %e, "hard brake failed");
            }
            self.last_action = ControlAction::zero();
        }
    }

    async fn decide(&mut self, scan: RangeScan, orientation: Orientation) -> RawAction {
        let heading_error_rad = match &self.guidance {
            Guidance::Navigating { bearing_rad, .. } => wrap_angle(bearing_rad - orientation.yaw_rad),
            _ => 0.0,
        };
        let observation = Observation {
            scan,
            orientation,
            estimate: self.estimate.clone(),
            guidance: self.guidance.clone(),
            heading_error_rad,
            last_action: self.last_action,
        };
        self.policy.infer(observation).await.unwrap_or_default()
    }

    fn actuate(&mut self, action: ControlAction) {
        match self.motor.set_motor(action) {
            Ok(()) => {
                self.actuator_faults = 0;
                self.last_action = action;
            }
            Err(e) => {
                self.actuator_faults += 1;
                self.last_action = ControlAction::zero();
                warn!(
                    motor = self.motor.id(),
                    error = %e,
                    consecutive = self.actuator_faults,
                    "actuator write failed"
                );
            }
        }
    }

    fn track_fault(&mut self, now: Instant) {
        if self.supervisor.mode() == SafetyMode::Fault {
            if self.fault_since.is_none() {
                error!(reason = %self.supervisor.state().reason, "loop entered FAULT");
                self.fault_since = Some(now);
            }
        } else {
            self.fault_since = None;
        }
    }

    fn publish(&self) -> StatusSnapshot {
        let plan = self.navigator.active_plan();
        let snapshot = StatusSnapshot {
            cycle: self.cycle,
            mission_id: self.mission_id,
            run_state: self.run_state,
            goal: self.goal.clone(),
            region: Some(self.estimate.region.clone()),
            confidence: self.estimate.confidence,
            fix: Some(self.estimate.fix),
            top_candidates: self.localizer.top_k(),
            safety: self.supervisor.state().clone(),
            last_action: self.last_action,
            plan: plan.map(|p| p.regions().to_vec()).unwrap_or_default(),
            plan_progress: plan.map_or(0, |p| p.progress()),
            replans: self.navigator.replans(),
            policy_timeouts: self.policy.total_timeouts(),
            timestamp: Utc::now(),
        };
        self.bus.publish(snapshot.clone());
        snapshot
    }

    fn remember(&self) {
        let Some((cache, key)) = &self.cache else {
            return;
        };
        if self.estimate.is_degraded() {
            return;
        }
        let changed = match cache.last_known(key) {
            Ok(last) => last.is_none_or(|f| f.region != self.estimate.region),
            Err(e) => {
                warn!(error = %e, "region cache read failed");
                return;
            }
        };
        if !changed {
            return;
        }
        match cache.store(key, &self.estimate.region, self.estimate.confidence) {
            Ok(fix) => {
                debug!(region = %fix.region, "region cached");
                if let Err(e) = cache.prune(key, self.config.cache_keep) {
                    warn!(error = %e, "region cache prune failed");
                }
            }
            Err(e) => warn!(error = %e, "region cache write failed"),
        }
    }

    // ── Headless driver ──────────────────────────────────────────────────────

    /// Tick at the configured rate until stopped, arrived (when
    /// `exit_on_arrival`), or stuck in FAULT past `fault_exit_after_ms`.
    /// The motor is released before returning.
    pub async fn run(&mut self) -> LoopExit {
        let period = self.config.period();
        let fault_limit = Duration::from_millis(self.config.fault_exit_after_ms);
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            cycle_hz = self.config.cycle_hz,
            policy = self.policy.policy_name(),
            region = %self.estimate.region,
            "control loop running"
        );

        loop {
            interval.tick().await;
            let started = Instant::now();
            let snapshot = self.tick_at(started).await;
            let elapsed = started.elapsed();
            if elapsed > period {
                warn!(elapsed_ms = elapsed.as_millis() as u64, period_ms = period.as_millis() as u64, "cycle overrun");
            }

            let exit = match snapshot.run_state {
                RunState::Stopped => Some(LoopExit::Stopped),
                RunState::Arrived if self.config.exit_on_arrival => Some(LoopExit::Arrived),
                _ => self
                    .fault_since
                    .filter(|since| since.elapsed() >= fault_limit)
                    .map(|_| LoopExit::Faulted),
            };
            if let Some(exit) = exit {
                self.release_motor();
                info!(?exit, cycle = self.cycle, "control loop finished");
                return exit;
            }
        }
    }
}

/// Read one driver and stamp the watchdog.  Failures are logged and yield
/// `None`; the watchdog ages the sensor on its own.
fn read_sensor<T>(driver: &dyn SensorDriver<T>, watchdog: &mut FreshnessWatchdog) -> Option<Stamped<T>> {
    match driver.read_latest() {
        Ok(sample) => {
            watchdog.observe(driver.id(), sample.at);
            Some(sample)
        }
        Err(e) => {
            debug!(sensor = driver.id(), error = %e, "sensor read failed");
            None
        }
    }
}
