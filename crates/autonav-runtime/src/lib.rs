//! `autonav-runtime` – Navigation cycle orchestration
//!
//! Where the platform decides where to go and how to get there.
//!
//! # Modules
//!
//! - [`control_loop`] – [`ControlLoop`][control_loop::ControlLoop]: the
//!   fixed-cadence sense–localize–navigate–decide–arbitrate–act cycle, its
//!   operator commands and the headless [`run`][control_loop::ControlLoop::run]
//!   driver.
//! - [`navigator`] – [`Navigator`][navigator::Navigator]: deterministic
//!   Dijkstra routing over the region graph with replan-on-divergence.
//! - [`policy`] – the [`Policy`][policy::Policy] capability, the
//!   [`Observation`][policy::Observation] it consumes and the
//!   budget-enforcing [`PolicyAdapter`][policy::PolicyAdapter].
//! - [`heuristic`] – [`HeuristicPolicy`][heuristic::HeuristicPolicy]:
//!   PD steering with obstacle repulsion.
//! - [`mlp`] – [`MlpPolicy`][mlp::MlpPolicy]: dense network loaded from a
//!   JSON model file.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: console or
//!   JSON logs plus optional OTLP span export.
//!
//! # Safety gating
//!
//! Nothing the policy proposes reaches a [`MotorDriver`][autonav_hal::MotorDriver]
//! without passing the kernel's [`Supervisor`]; it is re-exported here so
//! callers wiring a loop need no direct `autonav-kernel` dependency.

pub mod control_loop;
pub mod heuristic;
pub mod mlp;
pub mod navigator;
pub mod policy;
pub mod telemetry;

pub use control_loop::{ControlLoop, ControlLoopBuilder, ControlLoopConfig, LoopExit, SensorSet};
pub use heuristic::{HeuristicConfig, HeuristicPolicy};
pub use mlp::{MlpModel, MlpPolicy, ModelError};
pub use navigator::{Guidance, NavigationPlan, Navigator};
pub use policy::{Observation, Policy, PolicyAdapter, load_policy};
pub use telemetry::{TracerProviderGuard, init_tracing};

pub use autonav_kernel::Supervisor;
