//! `autonav-middleware` – The Nervous System
//!
//! Moves data between the control loop and its operators without caring
//! what the data means.
//!
//! # Modules
//!
//! - [`status_bus`] – per-cycle [`StatusSnapshot`][autonav_types::StatusSnapshot]
//!   fan-out on a Tokio broadcast channel, plus a latest-value view.
//! - [`commands`] – the loop's command queue and the cloneable
//!   [`LoopHandle`][commands::LoopHandle] operators use to feed it.

pub mod commands;
pub mod status_bus;

pub use commands::{CommandQueue, LoopHandle, command_channel};
pub use status_bus::{StatusBus, StatusSubscriber};
