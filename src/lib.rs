//! revgen - review generation scheduler
//!
//! A generator host owns a registry of synthetic reviewers and schedules
//! their review emission now, after a delay, on a cron schedule, or as a
//! continuous worker, through a swappable job-scheduling backend.

pub mod access;
pub mod config;
pub mod domain;
pub mod emission;
pub mod error;
pub mod host;
pub mod jobs;
pub mod registry;
pub mod store;

pub use error::{GeneratorError, Result};
pub use host::{GeneratorHost, HostConfig};
