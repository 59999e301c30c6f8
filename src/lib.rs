//! hcp-backup-tracker: volume-backup completion tracking for hosted clusters
//!
//! This crate watches the snapshot and data-movement jobs of an in-flight
//! backup of a hosted control plane, pausing the hosted workload while its
//! volumes are captured and resuming it once all volume data is durable.

pub mod config;
pub mod controller;
pub mod crd;
pub mod error;

pub use crate::config::TrackerConfig;
pub use crate::error::{Error, Result};
