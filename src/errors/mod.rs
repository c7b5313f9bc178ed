//! Error handling for the keyed job queue
//!
//! # Error Categories
//!
//! - **State consistency errors**: the per-key exclusion invariant was broken.
//!   These are fatal for the coordinator and are never swallowed.
//! - **Job queue errors**: failures surfaced by coordinator operations.
//! - **Configuration errors**: loading or validating settings.
//!
//! Job failures are not part of this hierarchy. `Job::perform` returns an
//! `anyhow::Result` and the job records its own failure.

pub mod types;

pub use types::*;

/// Convenience type alias for coordinator results
pub type JobQueueResult<T> = Result<T, JobQueueError>;

/// Convenience type alias for configuration results
pub type ConfigResult<T> = Result<T, ConfigError>;
