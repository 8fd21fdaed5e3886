//! `autonav-memory` – state that survives a restart.
//!
//! The only thing the control core persists is where it last was: the
//! [`region_cache`] keeps a short history of accepted region fixes in SQLite
//! so a restarted process can seed its prior estimate and reacquire faster.

pub mod region_cache;

pub use region_cache::{CacheError, CachedFix, RegionCache};
